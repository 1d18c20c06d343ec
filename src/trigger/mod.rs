//! Trigger adapters: HTTP requests and fire-and-forget events.

pub mod event;
pub mod functions;
pub mod http;

pub use functions::{invoke, ExportFunction, FunctionParams, Invocation};
pub use http::HttpTrigger;
