//! Process-wide report queue for producers that cannot be handed a
//! [`ReportQueue`] explicitly.
//!
//! The first successful [`init_global`] call wins; configuration passed to
//! later calls is ignored. Until then the enqueue helpers are no-ops.

use std::sync::{Mutex, OnceLock};

use crate::client::ClientError;
use crate::config::ServiceConfig;
use crate::event::Role;
use crate::queue::ReportQueue;

static GLOBAL_QUEUE: OnceLock<ReportQueue> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Get or create the global report queue.
///
/// Must be called from within a tokio runtime the first time.
pub fn init_global(config: &ServiceConfig) -> Result<&'static ReportQueue, ClientError> {
    init_once(&GLOBAL_QUEUE, &INIT_LOCK, || ReportQueue::new(config))
}

/// Build the queue at most once, even under concurrent first calls.
fn init_once<F>(
    cell: &'static OnceLock<ReportQueue>,
    lock: &Mutex<()>,
    build: F,
) -> Result<&'static ReportQueue, ClientError>
where
    F: FnOnce() -> Result<ReportQueue, ClientError>,
{
    if let Some(queue) = cell.get() {
        return Ok(queue);
    }

    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(queue) = cell.get() {
        return Ok(queue);
    }
    let queue = build()?;
    Ok(cell.get_or_init(|| queue))
}

/// The global report queue, if one has been initialised.
pub fn global() -> Option<&'static ReportQueue> {
    GLOBAL_QUEUE.get()
}

/// Enqueue a chat message on the global queue, if any.
pub fn enqueue_chat_message(device_id: &str, role: Role, text: &str, image_base64: Option<String>) {
    if let Some(queue) = global() {
        queue.enqueue_message(device_id, role, text, image_base64);
    }
}

/// Enqueue a chat end report on the global queue, if any.
pub fn enqueue_chat_end(device_id: &str) {
    if let Some(queue) = global() {
        queue.enqueue_chat_end(device_id);
    }
}
