//! Delete-then-upload publishing of one named object.
//!
//! After a successful [`BucketPublisher::ensure_replaced`] exactly one object
//! of the target name exists and it holds the new content.
//!
//! If the delete succeeds and the upload then fails, no object of that name
//! is left in the bucket until the next successful run. The returned
//! `AppError::Publish` says so explicitly.

use std::path::Path;

use tracing::{error, info};

use crate::error::AppError;
use crate::gcs::client::{PredefinedAcl, StorageClient};

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Where an export lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub bucket: String,
    pub object_name: String,
    pub acl: PredefinedAcl,
}

impl PublishTarget {
    pub fn new(bucket: impl Into<String>, object_name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            object_name: object_name.into(),
            acl: PredefinedAcl::default(),
        }
    }
}

/// Outcome of a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub bucket: String,
    pub object_name: String,
    pub bytes: u64,
    /// Whether a previous object of the same name was deleted first.
    pub replaced: bool,
    pub generation: Option<String>,
}

pub struct BucketPublisher {
    client: StorageClient,
}

impl BucketPublisher {
    pub fn new(client: StorageClient) -> Self {
        Self { client }
    }

    /// Replaces `target.object_name` in `target.bucket` with `local_path`.
    ///
    /// # Errors
    ///
    /// `AppError::Publish` if the existence check, delete, or upload fails.
    /// Token and network failures are wrapped the same way.
    pub async fn ensure_replaced(
        &self,
        target: &PublishTarget,
        local_path: &Path,
    ) -> Result<UploadResult, AppError> {
        let exists = self
            .client
            .object_exists(&target.bucket, &target.object_name)
            .await
            .map_err(publish_error)?;

        if exists {
            info!(
                "[GCS] Deleting previous {} from {}",
                target.object_name, target.bucket
            );
            self.client
                .delete_object(&target.bucket, &target.object_name)
                .await
                .map_err(publish_error)?;
        }

        let uploaded = self
            .client
            .upload_object(
                &target.bucket,
                &target.object_name,
                local_path,
                CSV_CONTENT_TYPE,
                target.acl,
            )
            .await;

        let info = match uploaded {
            Ok(info) => info,
            Err(e) if exists => {
                error!(
                    "[GCS] Upload failed after delete; {} is now absent from {}",
                    target.object_name, target.bucket
                );
                return Err(AppError::Publish(format!(
                    "{} was deleted but the new upload failed, object is absent: {}",
                    target.object_name,
                    publish_detail(e)
                )));
            }
            Err(e) => return Err(publish_error(e)),
        };

        let bytes = info
            .size
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        info!(
            "[GCS] Published {}/{} ({} bytes, replaced: {})",
            target.bucket, target.object_name, bytes, exists
        );

        Ok(UploadResult {
            bucket: target.bucket.clone(),
            object_name: target.object_name.clone(),
            bytes,
            replaced: exists,
            generation: info.generation,
        })
    }
}

/// Wraps a lower-level failure once as `AppError::Publish`.
fn publish_error(e: AppError) -> AppError {
    match e {
        AppError::Publish(_) => e,
        other => AppError::Publish(other.to_string()),
    }
}

fn publish_detail(e: AppError) -> String {
    match e {
        AppError::Publish(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcs::client::tests::{mount_token, test_client};
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    const BUCKET: &str = "acme-exports";
    const OBJECT: &str = "opportunityhistory.csv";

    /// In-memory bucket holding at most one object, shared by the responders below.
    #[derive(Clone, Default)]
    struct FakeBucket {
        content: Arc<Mutex<Option<Vec<u8>>>>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    struct ExistsResponder(FakeBucket);
    struct DeleteResponder(FakeBucket);
    struct UploadResponder(FakeBucket);

    impl Respond for ExistsResponder {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            self.0.log.lock().unwrap().push("exists");
            if self.0.content.lock().unwrap().is_some() {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": OBJECT, "bucket": BUCKET}))
            } else {
                ResponseTemplate::new(404)
            }
        }
    }

    impl Respond for DeleteResponder {
        fn respond(&self, _: &Request) -> ResponseTemplate {
            self.0.log.lock().unwrap().push("delete");
            match self.0.content.lock().unwrap().take() {
                Some(_) => ResponseTemplate::new(204),
                None => ResponseTemplate::new(404),
            }
        }
    }

    impl Respond for UploadResponder {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            self.0.log.lock().unwrap().push("upload");
            let mut content = self.0.content.lock().unwrap();
            if content.is_some() {
                // The media endpoint would overwrite; flag it so tests catch a skipped delete.
                return ResponseTemplate::new(412);
            }
            *content = Some(request.body.clone());
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": OBJECT,
                "bucket": BUCKET,
                "size": request.body.len().to_string(),
                "generation": "1"
            }))
        }
    }

    async fn mount_bucket(mock_server: &MockServer, bucket: &FakeBucket) {
        mount_token(mock_server).await;
        let object_path = format!("/storage/v1/b/{}/o/{}", BUCKET, OBJECT);

        Mock::given(method("GET"))
            .and(path(object_path.as_str()))
            .respond_with(ExistsResponder(bucket.clone()))
            .mount(mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(object_path.as_str()))
            .respond_with(DeleteResponder(bucket.clone()))
            .mount(mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/upload/storage/v1/b/{}/o", BUCKET)))
            .and(query_param("name", OBJECT))
            .respond_with(UploadResponder(bucket.clone()))
            .mount(mock_server)
            .await;
    }

    fn csv_file(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let file = dir.path().join("export.csv");
        std::fs::write(&file, content).unwrap();
        file
    }

    #[tokio::test]
    async fn existing_object_is_deleted_before_upload() {
        let mock_server = MockServer::start().await;
        let bucket = FakeBucket::default();
        *bucket.content.lock().unwrap() = Some(b"stale".to_vec());
        mount_bucket(&mock_server, &bucket).await;

        let dir = tempfile::TempDir::new().unwrap();
        let file = csv_file(&dir, "Id\n006A\n");

        let publisher = BucketPublisher::new(test_client(&mock_server));
        let result = publisher
            .ensure_replaced(&PublishTarget::new(BUCKET, OBJECT), &file)
            .await
            .unwrap();

        assert!(result.replaced);
        assert_eq!(result.bytes, 8);
        assert_eq!(*bucket.log.lock().unwrap(), vec!["exists", "delete", "upload"]);
        assert_eq!(bucket.content.lock().unwrap().as_deref(), Some(&b"Id\n006A\n"[..]));
    }

    #[tokio::test]
    async fn absent_object_skips_delete() {
        let mock_server = MockServer::start().await;
        let bucket = FakeBucket::default();
        mount_bucket(&mock_server, &bucket).await;

        let dir = tempfile::TempDir::new().unwrap();
        let file = csv_file(&dir, "Id\n");

        let result = BucketPublisher::new(test_client(&mock_server))
            .ensure_replaced(&PublishTarget::new(BUCKET, OBJECT), &file)
            .await
            .unwrap();

        assert!(!result.replaced);
        assert_eq!(*bucket.log.lock().unwrap(), vec!["exists", "upload"]);
    }

    #[tokio::test]
    async fn publishing_twice_leaves_one_object_with_final_content() {
        let mock_server = MockServer::start().await;
        let bucket = FakeBucket::default();
        mount_bucket(&mock_server, &bucket).await;

        let dir = tempfile::TempDir::new().unwrap();
        let publisher = BucketPublisher::new(test_client(&mock_server));
        let target = PublishTarget::new(BUCKET, OBJECT);

        let file = csv_file(&dir, "Id\n006A\n");
        publisher.ensure_replaced(&target, &file).await.unwrap();
        publisher.ensure_replaced(&target, &file).await.unwrap();

        assert_eq!(
            *bucket.log.lock().unwrap(),
            vec!["exists", "upload", "exists", "delete", "upload"]
        );
        assert_eq!(bucket.content.lock().unwrap().as_deref(), Some(&b"Id\n006A\n"[..]));
    }

    #[tokio::test]
    async fn upload_failure_after_delete_reports_absent_object() {
        let mock_server = MockServer::start().await;
        mount_token(&mock_server).await;
        let object_path = format!("/storage/v1/b/{}/o/{}", BUCKET, OBJECT);

        Mock::given(method("GET"))
            .and(path(object_path.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": OBJECT})))
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(object_path.as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/upload/storage/v1/b/{}/o", BUCKET)))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let file = csv_file(&dir, "Id\n");

        match BucketPublisher::new(test_client(&mock_server))
            .ensure_replaced(&PublishTarget::new(BUCKET, OBJECT), &file)
            .await
        {
            Err(AppError::Publish(msg)) => {
                assert!(msg.contains("absent"));
                assert!(msg.contains("503"));
            }
            other => panic!("expected Publish error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_local_file_is_publish_error() {
        let mock_server = MockServer::start().await;
        let bucket = FakeBucket::default();
        mount_bucket(&mock_server, &bucket).await;

        let result = BucketPublisher::new(test_client(&mock_server))
            .ensure_replaced(
                &PublishTarget::new(BUCKET, OBJECT),
                Path::new("/nonexistent/export.csv"),
            )
            .await;

        assert!(matches!(result, Err(AppError::Publish(_))));
        assert!(bucket.content.lock().unwrap().is_none());
    }
}
