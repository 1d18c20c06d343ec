//! Service-account credential parsing for the storage backend.
//!
//! The credential payload is held verbatim in configuration as JSON. Parsing
//! is pure; the resulting [`ServiceAccountKey`] is built once per process and
//! shared through the context. Its `Debug` implementation redacts the key.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::StorageConfig;
use crate::error::AppError;

/// Token endpoint used when the payload does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Identity and signing key of a storage service account.
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: SecretString,
    pub private_key_id: Option<String>,
    pub project_id: Option<String>,
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"***")
            .field("private_key_id", &self.private_key_id)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

/// Internal type mirroring the JSON key file.
#[derive(Deserialize)]
struct StoredKey {
    client_email: Option<String>,
    private_key: Option<String>,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Parses a JSON service-account payload.
    ///
    /// # Errors
    /// Returns `AppError::Config` if the payload is not JSON or lacks
    /// `client_email` / `private_key`. Error text never echoes the payload.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let stored: StoredKey = serde_json::from_str(raw).map_err(|e| {
            AppError::Config(format!(
                "storage credentials are not valid JSON (line {}, column {})",
                e.line(),
                e.column()
            ))
        })?;

        let client_email = stored
            .client_email
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Config("storage credentials lack client_email".into()))?;

        let private_key = stored
            .private_key
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AppError::Config("storage credentials lack a signing key".into()))?;

        Ok(Self {
            client_email,
            private_key: SecretString::from(private_key),
            private_key_id: stored.private_key_id,
            project_id: stored.project_id,
            token_uri: stored
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        })
    }

    /// Resolves the key from storage configuration.
    ///
    /// # Errors
    /// Returns `AppError::Config` if no payload is configured or it is invalid.
    pub fn from_config(storage: &StorageConfig) -> Result<Self, AppError> {
        let raw = storage.credentials_json.as_ref().ok_or_else(|| {
            AppError::Config("GOOGLE_APPLICATION_CREDENTIALS is not set".into())
        })?;
        Self::from_json(raw.expose_secret())
    }
}
