//! Environment configuration.
//!
//! Everything the handlers need is read once from the process environment
//! into [`AppConfig`]. Secrets are wrapped in `SecretString` and never appear
//! in `Debug` output.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_OBJECT_NAME: &str = "OpportunityHistory";
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
pub const DEFAULT_API_VERSION: &str = "60.0";
pub const DEFAULT_SORT_FIELD: &str = "CloseDate";
pub const DEFAULT_DEDUP_FIELD: &str = "Id";
pub const DEFAULT_PAGE_SIZE: u32 = 200;
pub const DEFAULT_STORAGE_API_URL: &str = "https://storage.googleapis.com";
pub const DEFAULT_PORT: u16 = 8080;

/// Largest page the REST query endpoint will hand back in one response.
const MAX_PAGE_SIZE: u32 = 2000;

// ─────────────────────────────────────────────────────────────────────────────
// AppConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Salesforce connection settings.
#[derive(Clone)]
pub struct SalesforceConfig {
    pub login_url: String,
    pub api_version: String,
    pub username: String,
    pub password: SecretString,
    pub security_token: SecretString,
}

impl std::fmt::Debug for SalesforceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceConfig")
            .field("login_url", &self.login_url)
            .field("api_version", &self.api_version)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("security_token", &"[REDACTED]")
            .finish()
    }
}

/// What to extract and how to page through it.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub object_name: String,
    pub sort_field: String,
    /// Explicit field list. Empty means "discover via describe".
    pub fields: Vec<String>,
    pub page_size: u32,
    /// Identity field used to drop records repeated at a page boundary.
    pub dedup_field: Option<String>,
    pub tmp_dir: PathBuf,
}

/// Storage backend settings.
#[derive(Clone)]
pub struct StorageConfig {
    pub project_id: String,
    pub bucket_name: String,
    pub api_url: String,
    /// Raw JSON service-account payload.
    pub credentials_json: Option<SecretString>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("project_id", &self.project_id)
            .field("bucket_name", &self.bucket_name)
            .field("api_url", &self.api_url)
            .field(
                "credentials_json",
                &self.credentials_json.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub salesforce: SalesforceConfig,
    pub export: ExportConfig,
    pub storage: StorageConfig,
    pub port: u16,
}

impl AppConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| AppError::Config(format!("{} is not set", key)))
        };

        let salesforce = SalesforceConfig {
            login_url: get("SF_LOGIN_URL")
                .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_version: get("SF_API_VERSION")
                .map(|v| v.trim_start_matches('v').to_string())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            username: require("SF_USERNAME")?,
            password: SecretString::from(require("SF_PASSWORD")?),
            // Trusted IP ranges let an org log in without a token.
            security_token: SecretString::from(lookup("SF_SECURITY_TOKEN").unwrap_or_default()),
        };

        let page_size = match get("SF_PAGE_SIZE") {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|_| AppError::Config(format!("SF_PAGE_SIZE is not a number: {}", raw)))?,
            None => DEFAULT_PAGE_SIZE,
        };
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(AppError::Config(format!(
                "SF_PAGE_SIZE must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, page_size
            )));
        }

        let fields = get("SF_FIELDS")
            .map(|raw| {
                raw.split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let dedup_field = match lookup("SF_DEDUP_FIELD") {
            // Explicitly set to empty: keep boundary duplicates.
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => Some(DEFAULT_DEDUP_FIELD.to_string()),
        };

        let export = ExportConfig {
            object_name: get("SF_OBJECT_NAME").unwrap_or_else(|| DEFAULT_OBJECT_NAME.to_string()),
            sort_field: get("SF_SORT_FIELD").unwrap_or_else(|| DEFAULT_SORT_FIELD.to_string()),
            fields,
            page_size,
            dedup_field,
            tmp_dir: get("EXPORT_TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        };

        let storage = StorageConfig {
            project_id: require("PROJECT_NAME")?,
            bucket_name: require("BUCKET_NAME")?,
            api_url: get("STORAGE_API_URL")
                .unwrap_or_else(|| DEFAULT_STORAGE_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            credentials_json: get("GOOGLE_APPLICATION_CREDENTIALS").map(SecretString::from),
        };

        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| AppError::Config(format!("PORT is not a valid port: {}", raw)))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            salesforce,
            export,
            storage,
            port,
        })
    }
}
