//! Process-wide context shared by every trigger.
//!
//! Built once at startup and passed around as `Arc<AppContext>`. Expensive
//! pieces (credential parsing, the storage token cache) are created on first
//! use and then reused for the life of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, MutexGuard, OnceCell};

use crate::config::AppConfig;
use crate::credentials::ServiceAccountKey;
use crate::error::AppError;
use crate::gcs::{BucketPublisher, StorageClient, StorageTokenProvider};
use crate::salesforce::{build_http_client, SalesforceSource};

pub struct AppContext {
    config: AppConfig,
    http: reqwest::Client,
    storage: OnceCell<StorageClient>,
    object_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Claim on the export lock of one source object.
///
/// The registry entry is removed when the last lease for the object drops.
pub struct ObjectLease<'a> {
    key: String,
    lock: Arc<Mutex<()>>,
    registry: &'a StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ObjectLease<'_> {
    /// Waits until no other export of this object is running.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for ObjectLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the registry, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

impl AppContext {
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        Ok(Self::with_http(config, build_http_client()?))
    }

    pub fn with_http(config: AppConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            storage: OnceCell::new(),
            object_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Source for the configured org, field list, and sort field.
    pub fn salesforce_source(&self) -> SalesforceSource {
        SalesforceSource::new(
            self.http.clone(),
            self.config.salesforce.clone(),
            self.config.export.fields.clone(),
            self.config.export.sort_field.clone(),
            self.config.export.dedup_field.clone(),
        )
    }

    /// Publisher bound to the shared storage client.
    ///
    /// The first call parses the storage credentials.
    ///
    /// # Errors
    ///
    /// `AppError::Config` if the credential payload is absent or invalid.
    pub async fn publisher(&self) -> Result<BucketPublisher, AppError> {
        let client = self
            .storage
            .get_or_try_init(|| async {
                let key = ServiceAccountKey::from_config(&self.config.storage)?;
                let tokens = Arc::new(StorageTokenProvider::new(self.http.clone(), key));
                Ok::<_, AppError>(StorageClient::new(
                    self.http.clone(),
                    self.config.storage.api_url.clone(),
                    tokens,
                ))
            })
            .await?;
        Ok(BucketPublisher::new(client.clone()))
    }

    /// Lock serialising exports of one source object within this process.
    pub fn object_lock(&self, object_name: &str) -> ObjectLease<'_> {
        let key = object_name.to_ascii_lowercase();
        let mut locks = self.object_locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ObjectLease {
            key,
            lock,
            registry: &self.object_locks,
        }
    }
}
