pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod export;
pub mod gcs;
pub mod salesforce;
pub mod trigger;

pub use config::AppConfig;
pub use context::AppContext;
pub use error::AppError;
