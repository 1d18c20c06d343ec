//! Fire-and-forget event trigger.
//!
//! The export runs on a background task. Its outcome is only logged; the
//! caller gets nothing back except the task handle.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::AppContext;
use crate::trigger::functions::{self, Invocation};

/// Starts the export described by `payload` and returns immediately.
///
/// Awaiting the handle is optional; it never carries an error.
pub fn dispatch(ctx: Arc<AppContext>, payload: serde_json::Value) -> JoinHandle<()> {
    let invocation = Invocation::from_event(payload);
    let event_id = Uuid::new_v4();

    info!("[TRIGGER] Event {} accepted: {}", event_id, invocation.function);

    tokio::spawn(async move {
        match functions::invoke(&ctx, &invocation).await {
            Ok(message) => info!("[TRIGGER] Event {}: {}", event_id, message),
            Err(e) => error!("[TRIGGER] Event {} failed: {}", event_id, e.response_text()),
        }
    })
}
