//! Cloud Storage JSON API client for bucket objects.
//!
//! - **Exists** - `GET /storage/v1/b/{bucket}/o/{object}` (404 means absent)
//! - **Delete** - `DELETE` on the same resource
//! - **Upload** - single-request media upload, streamed from disk
//!
//! Object names are percent-encoded as one path segment, so names with `/`
//! address the object rather than a nested path.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::gcs::auth::StorageTokenProvider;

/// Visibility applied to uploaded objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PredefinedAcl {
    /// Project team members get access by role; nobody else.
    #[default]
    ProjectPrivate,
    /// Owner-only access.
    Private,
}

impl PredefinedAcl {
    pub fn as_str(self) -> &'static str {
        match self {
            PredefinedAcl::ProjectPrivate => "projectPrivate",
            PredefinedAcl::Private => "private",
        }
    }
}

/// Object metadata returned by a successful upload.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub bucket: String,
    /// Byte size; the API encodes it as a decimal string.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub generation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
}

/// Client for object operations in any bucket reachable with the token.
///
/// Cheap to clone; clones share the token cache.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    api_url: String,
    tokens: Arc<StorageTokenProvider>,
}

impl StorageClient {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        tokens: Arc<StorageTokenProvider>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    /// Returns whether `object_name` currently exists in `bucket`.
    pub async fn object_exists(&self, bucket: &str, object_name: &str) -> Result<bool, AppError> {
        let url = self.object_url(bucket, object_name)?;
        let response = self.execute(Method::GET, url, None).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(self.error_from(response, status, "existence check", object_name).await),
        }
    }

    /// Deletes `object_name` from `bucket`.
    ///
    /// An object that vanished since it was last seen counts as deleted.
    pub async fn delete_object(&self, bucket: &str, object_name: &str) -> Result<(), AppError> {
        let url = self.object_url(bucket, object_name)?;
        let response = self.execute(Method::DELETE, url, None).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!("[GCS] {} was already gone at delete time", object_name);
                Ok(())
            }
            status => Err(self.error_from(response, status, "delete", object_name).await),
        }
    }

    /// Uploads `local_path` as `object_name` in one non-resumable request.
    ///
    /// The file is streamed from disk rather than read into memory.
    pub async fn upload_object(
        &self,
        bucket: &str,
        object_name: &str,
        local_path: &Path,
        content_type: &str,
        acl: PredefinedAcl,
    ) -> Result<ObjectInfo, AppError> {
        let mut url = self.build_url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object_name)
            .append_pair("predefinedAcl", acl.as_str());

        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| AppError::Io(format!("Failed to open upload file: {}", e)))?;
        let file_size = file
            .metadata()
            .await
            .map_err(|e| AppError::Io(format!("Failed to get file metadata: {}", e)))?
            .len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));

        info!("[GCS] Uploading {} ({} bytes)", object_name, file_size);

        let response = self
            .execute(Method::POST, url, Some((body, file_size, content_type)))
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.error_from(response, status, "upload", object_name).await);
        }

        response
            .json::<ObjectInfo>()
            .await
            .map_err(|e| AppError::Publish(format!("unreadable upload response: {}", e)))
    }

    fn build_url(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|_| AppError::Config(format!("invalid storage API URL: {}", self.api_url)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("invalid storage API URL: {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, object_name: &str) -> Result<Url, AppError> {
        self.build_url(&["storage", "v1", "b", bucket, "o", object_name])
    }

    /// Sends one authorised request, logging method, path, status and latency.
    ///
    /// Query strings are left out of the log line.
    async fn execute(
        &self,
        method: Method,
        url: Url,
        upload: Option<(reqwest::Body, u64, &str)>,
    ) -> Result<reqwest::Response, AppError> {
        let token = self.tokens.access_token().await?;
        let log_path = url.path().to_string();
        let start = Instant::now();

        let mut request = self
            .http
            .request(method.clone(), url)
            .bearer_auth(token.expose_secret());
        if let Some((body, len, content_type)) = upload {
            request = request
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, len)
                .body(body);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                info!(
                    "[GCS] {} {} {} {}ms",
                    method,
                    log_path,
                    response.status().as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(_) => {
                info!("[GCS] {} {} FAILED {}ms", method, log_path, duration_ms);
                Err(AppError::ConnectionFailed(
                    "Connection to storage failed".to_string(),
                ))
            }
        }
    }

    async fn error_from(
        &self,
        response: reqwest::Response,
        status: StatusCode,
        operation: &str,
        object_name: &str,
    ) -> AppError {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<WireErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_string());

        AppError::Publish(format!(
            "{} of {} failed: HTTP {} - {}",
            operation,
            object_name,
            status.as_u16(),
            detail
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
