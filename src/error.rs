use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for a response body.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "sessionid",
    "access_token",
    "private_key",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Application-wide error type.
///
/// Every component wraps lower-level failures with its own prefix, so the
/// rendered message names the stage that failed (`extraction failed: ...`).
#[derive(Debug, Error)]
pub enum AppError {
    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Salesforce ────────────────────────────────────────────────────────────
    #[error("auth error: {0}")]
    Auth(String),

    #[error("Salesforce error: {0}")]
    Salesforce(String),

    #[error("extraction failed: {0}")]
    Extraction(Box<AppError>),

    // ── CSV ───────────────────────────────────────────────────────────────────
    #[error("schema mismatch: field '{field}' in row {row} is not in the header")]
    SchemaMismatch { field: String, row: usize },

    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("publish failed: {0}")]
    Publish(String),

    // ── Triggers ──────────────────────────────────────────────────────────────
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    // ── Network / IO ──────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    Io(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Wraps a failure raised while pulling records from the data source.
    ///
    /// Already-wrapped extraction errors are passed through unchanged so the
    /// prefix only appears once.
    pub fn extraction(cause: AppError) -> Self {
        match cause {
            AppError::Extraction(_) => cause,
            other => AppError::Extraction(Box::new(other)),
        }
    }

    /// Text returned to HTTP callers and written to logs.
    ///
    /// The message is passed through as-is unless it carries something that
    /// looks like a credential, in which case only the error kind survives.
    pub fn response_text(&self) -> String {
        let msg = self.to_string();
        if contains_sensitive(&msg) {
            format!("{} (details redacted)", self.kind())
        } else {
            msg
        }
    }

    /// Short, stable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "ConfigError",
            AppError::Auth(_) => "AuthError",
            AppError::Salesforce(_) => "SalesforceError",
            AppError::Extraction(_) => "ExtractionError",
            AppError::SchemaMismatch { .. } => "SchemaMismatchError",
            AppError::Publish(_) => "PublishError",
            AppError::UnknownFunction(_) => "UnknownFunctionError",
            AppError::ConnectionFailed(_) => "ConnectionError",
            AppError::Io(_) => "IoError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}
