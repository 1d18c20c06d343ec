//! Cloud Storage publishing.

pub mod auth;
pub mod client;
pub mod publisher;

pub use auth::StorageTokenProvider;
pub use client::{PredefinedAcl, StorageClient};
pub use publisher::{BucketPublisher, PublishTarget, UploadResult};
