//! Salesforce HTTP client with secure session handling and safe logging.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all outbound API requests.
pub(crate) const CLIENT_USER_AGENT: &str = "sf-bucket-export/0.1.0";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// An authenticated Salesforce session.
///
/// The session id is wrapped in `SecretString` so it cannot leak through
/// `Debug` or logging.
#[derive(Clone)]
pub struct Session {
    /// Instance URL (e.g., "https://na1.salesforce.com")
    pub instance_url: String,
    /// Session id, used as a bearer token on REST calls.
    pub session_id: SecretString,
    /// Salesforce user ID (e.g., "005...")
    pub user_id: String,
    /// Salesforce organization ID (e.g., "00D...")
    pub org_id: String,
    /// API version without the `v` prefix (e.g., "60.0")
    pub api_version: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("instance_url", &self.instance_url)
            .field("session_id", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("org_id", &self.org_id)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Session {
    /// REST base path for this session's API version.
    pub fn data_path(&self) -> String {
        format!("/services/data/v{}", self.api_version)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Reduces a URL to its path for logging.
///
/// Scheme, host, query (SOQL carries filter values) and fragment are dropped.
pub fn sanitize_url_for_logs(url: &Url) -> String {
    url.path().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// SalesforceClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client bound to one authenticated session.
///
/// Cheap to clone; the underlying `reqwest::Client` shares its connection pool.
#[derive(Clone)]
pub struct SalesforceClient {
    http: reqwest::Client,
    session: Session,
}

impl SalesforceClient {
    /// Creates a client for an established session.
    pub fn new(http: reqwest::Client, session: Session) -> Self {
        Self { http, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Builds a full URL by joining the path with the instance URL.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Auth` if the session has no instance URL.
    /// Returns `AppError::Internal` if the URL cannot be parsed.
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        if self.session.instance_url.is_empty() {
            return Err(AppError::Auth("session has no instance URL".into()));
        }

        let base = Url::parse(&self.session.instance_url)
            .map_err(|_| AppError::Internal("Invalid instance URL".to_string()))?;

        base.join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Executes an authenticated GET against a fully built URL.
    ///
    /// A 401 means the session was revoked or expired mid-export; it is
    /// reported as `AppError::Auth` since there is no refresh path for
    /// password sessions.
    ///
    /// # Errors
    ///
    /// - `AppError::Auth` - Session rejected
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn get_authed(&self, url: Url) -> Result<reqwest::Response, AppError> {
        let response = self.execute_authed_request(Method::GET, url).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            warn!("[SFDC] Session rejected by Salesforce");
            return Err(AppError::Auth("session expired or revoked".into()));
        }

        Ok(response)
    }

    /// Executes a single authenticated request with timing and logging.
    ///
    /// Never logs the Authorization header, bodies, or raw URLs.
    async fn execute_authed_request(
        &self,
        method: Method,
        url: Url,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url);

        let result = self
            .http
            .request(method.clone(), url.as_str())
            .bearer_auth(self.session.session_id.expose_secret())
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status = response.status();
                let sforce_limit = response
                    .headers()
                    .get("sforce-limit-info")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");

                info!(
                    "[SFDC] {} {} {} {}ms {}",
                    method,
                    sanitized_url,
                    status.as_u16(),
                    duration_ms,
                    sforce_limit
                );

                Ok(response)
            }
            Err(_) => {
                // The reqwest error may embed the full URL, so it is not forwarded.
                info!(
                    "[SFDC] {} {} FAILED {}ms",
                    method, sanitized_url, duration_ms
                );
                Err(AppError::ConnectionFailed(
                    "Connection to Salesforce failed".to_string(),
                ))
            }
        }
    }
}

/// Builds the shared HTTP client used for every outbound call.
pub fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Session pointing at a mock server.
    pub(crate) fn test_session(instance_url: &str) -> Session {
        Session {
            instance_url: instance_url.to_string(),
            session_id: SecretString::from("00Dxx!session".to_string()),
            user_id: "005xx0000001234".to_string(),
            org_id: "00Dxx0000001234".to_string(),
            api_version: "60.0".to_string(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Sanitization Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn sanitize_strips_scheme_and_host() {
        let url = Url::parse("https://na1.salesforce.com/services/data/v60.0/query").unwrap();

        let result = sanitize_url_for_logs(&url);

        assert_eq!(result, "/services/data/v60.0/query");
        assert!(!result.contains("na1.salesforce.com"));
    }

    #[test]
    fn path_only_excludes_query_string() {
        let url = Url::parse(
            "https://na1.salesforce.com/services/data/v60.0/query?q=SELECT+Id+FROM+Account",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url);

        assert_eq!(result, "/services/data/v60.0/query");
        assert!(!result.contains("SELECT"));
    }

    #[test]
    fn sanitize_strips_fragment_and_session_params() {
        let url = Url::parse("https://example.com/path?sid=sess456#secret-anchor").unwrap();

        assert_eq!(sanitize_url_for_logs(&url), "/path");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn session_debug_redacts_session_id() {
        let session = test_session("https://na1.salesforce.com");
        let debug_output = format!("{:?}", session);

        assert!(debug_output.contains("na1.salesforce.com"));
        assert!(!debug_output.contains("00Dxx!session"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn data_path_uses_api_version() {
        let session = test_session("https://na1.salesforce.com");
        assert_eq!(session.data_path(), "/services/data/v60.0");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // SalesforceClient Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn build_url_joins_instance_url() {
        let client = SalesforceClient::new(
            build_http_client().unwrap(),
            test_session("https://na1.salesforce.com"),
        );

        let url = client.build_url("/services/data/v60.0/query").unwrap();
        assert_eq!(
            url.as_str(),
            "https://na1.salesforce.com/services/data/v60.0/query"
        );
    }

    #[test]
    fn build_url_without_instance_is_auth_error() {
        let client = SalesforceClient::new(build_http_client().unwrap(), test_session(""));
        assert!(matches!(
            client.build_url("/services/data/v60.0/query"),
            Err(AppError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn get_authed_sends_bearer_session() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/limits"))
            .and(header("authorization", "Bearer 00Dxx!session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client =
            SalesforceClient::new(build_http_client().unwrap(), test_session(&mock_server.uri()));
        let url = client.build_url("/services/data/v60.0/limits").unwrap();

        let response = client.get_authed(url).await.expect("request should succeed");
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn get_authed_maps_401_to_auth_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let client =
            SalesforceClient::new(build_http_client().unwrap(), test_session(&mock_server.uri()));
        let url = client.build_url("/services/data/v60.0/query").unwrap();

        assert!(matches!(client.get_authed(url).await, Err(AppError::Auth(_))));
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_failed() {
        // Port 9 (discard) on loopback is not expected to be listening.
        let client = SalesforceClient::new(
            build_http_client().unwrap(),
            test_session("http://127.0.0.1:9"),
        );
        let url = client.build_url("/services/data/v60.0/query").unwrap();

        assert!(matches!(
            client.get_authed(url).await,
            Err(AppError::ConnectionFailed(_))
        ));
    }
}
