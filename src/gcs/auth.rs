//! OAuth access tokens for the storage API.
//!
//! Exchanges a self-signed service-account JWT for a bearer token
//! (`urn:ietf:params:oauth:grant-type:jwt-bearer`). Tokens are cached by
//! [`StorageTokenProvider`] until shortly before they expire.
//!
//! # Security
//!
//! Neither the signed assertion nor the access token is ever logged.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::credentials::ServiceAccountKey;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Read/write access to bucket objects.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for the signed assertion. The token endpoint caps it at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Cached tokens are refreshed this long before their reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct WireTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// A bearer token and the instant it stops being valid.
#[derive(Clone)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    /// True while the token is valid for at least the refresh margin.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Exchange
// ─────────────────────────────────────────────────────────────────────────────

/// Signs the RS256 assertion presented to the token endpoint.
///
/// # Errors
///
/// `AppError::Config` if the signing key is not a readable RSA PEM key.
pub fn build_assertion(key: &ServiceAccountKey, now: DateTime<Utc>) -> Result<String, AppError> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: STORAGE_SCOPE,
        aud: &key.token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.expose_secret().as_bytes())
        .map_err(|_| AppError::Config("storage credentials carry an unreadable signing key".into()))?;

    jsonwebtoken::encode(&header, &claims, &encoding_key)
        .map_err(|e| AppError::Internal(format!("Failed to sign storage assertion: {}", e)))
}

/// Exchanges a fresh assertion for an access token.
///
/// # Errors
///
/// - `AppError::Config` - Unusable signing key
/// - `AppError::Publish` - Token endpoint unreachable, rejected the
///   assertion, or answered with an unreadable body
pub async fn fetch_access_token(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<AccessToken, AppError> {
    let now = Utc::now();
    let assertion = build_assertion(key, now)?;

    info!("[GCS] Requesting storage access token for {}", key.client_email);

    let params = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];

    let response = http
        .post(&key.token_uri)
        .form(&params)
        .send()
        .await
        .map_err(|_| {
            error!("[GCS] Token request failed");
            AppError::Publish("could not reach the storage token endpoint".into())
        })?;

    let status = response.status();
    if !status.is_success() {
        error!("[GCS] Token request rejected: {}", status.as_u16());
        return Err(AppError::Publish(format!(
            "storage token request rejected with HTTP {}",
            status.as_u16()
        )));
    }

    let wire: WireTokenResponse = response.json().await.map_err(|_| {
        error!("[GCS] Failed to parse token response");
        AppError::Publish("invalid storage token response".into())
    })?;

    let lifetime = wire.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
    info!("[GCS] Storage access token valid for {}s", lifetime);

    Ok(AccessToken {
        token: SecretString::from(wire.access_token),
        expires_at: now + Duration::seconds(lifetime),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// StorageTokenProvider
// ─────────────────────────────────────────────────────────────────────────────

/// Hands out storage access tokens, reusing one until it nears expiry.
///
/// Concurrent callers serialise on the cache lock, so at most one exchange is
/// in flight.
pub struct StorageTokenProvider {
    http: reqwest::Client,
    key: ServiceAccountKey,
    cached: Mutex<Option<AccessToken>>,
}

impl StorageTokenProvider {
    pub fn new(http: reqwest::Client, key: ServiceAccountKey) -> Self {
        Self {
            http,
            key,
            cached: Mutex::new(None),
        }
    }

    pub async fn access_token(&self) -> Result<SecretString, AppError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh_at(Utc::now()) {
                return Ok(token.token.clone());
            }
        }

        let fresh = fetch_access_token(&self.http, &self.key).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────


#[cfg(test)]
mod wiremock_tests {
    use super::tests::test_key;
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn token_exchange_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .and(body_string_contains("assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.storage_token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let token = fetch_access_token(&reqwest::Client::new(), &test_key(&mock_server.uri()))
            .await
            .unwrap();

        assert_eq!(token.token.expose_secret(), "ya29.storage_token");
        assert!(token.is_fresh_at(Utc::now()));
    }

    #[tokio::test]
    async fn rejected_assertion_is_publish_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid JWT Signature."
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = fetch_access_token(&reqwest::Client::new(), &test_key(&mock_server.uri())).await;
        match result {
            Err(AppError::Publish(msg)) => assert!(msg.contains("400")),
            other => panic!("expected Publish error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn provider_reuses_fresh_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.cached",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = StorageTokenProvider::new(reqwest::Client::new(), test_key(&mock_server.uri()));
        for _ in 0..3 {
            assert_eq!(provider.access_token().await.unwrap().expose_secret(), "ya29.cached");
        }
    }

    #[tokio::test]
    async fn provider_refreshes_near_expiry() {
        let mock_server = MockServer::start().await;

        // A token that expires inside the margin is never served from cache.
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.short_lived",
                "expires_in": 30
            })))
            .expect(2)
            .mount(&mock_server)
            .await;

        let provider = StorageTokenProvider::new(reqwest::Client::new(), test_key(&mock_server.uri()));
        provider.access_token().await.unwrap();
        provider.access_token().await.unwrap();
    }
}
