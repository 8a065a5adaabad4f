//! Chat History Reporter Library
//!
//! Persists conversational events to a remote chat history server without
//! blocking the pipeline that produced them:
//!
//! - **config**: Environment-based configuration; disabled unless both the
//!   server URL and signing secret are set
//! - **event**: Immutable report events and the stdin line format
//! - **signer**: HS256 device tokens with a one hour expiry
//! - **client**: Single-attempt HTTP delivery folded into a success flag
//! - **service**: The `messages` and `chat_end` remote operations
//! - **queue**: Unbounded FIFO drained by one background consumer
//! - **global**: Optional first-call-wins process-wide queue
//!
//! # Example
//!
//! ```no_run
//! use chat_history_reporter::{ReportQueue, Role, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Load configuration from environment
//!     let config = ServiceConfig::from_env().expect("Failed to load config");
//!
//!     // Start the queue and its consumer
//!     let queue = ReportQueue::new(&config).expect("Failed to create queue");
//!
//!     // Producers never wait on the network
//!     queue.enqueue_message("device-1", Role::User, "what's the weather?", None);
//!     queue.enqueue_message("device-1", Role::Assistant, "Sunny, 22 degrees.", None);
//!     queue.enqueue_chat_end("device-1");
//!
//!     queue.stop().await;
//! }
//! ```

// Module declarations
pub mod client;
pub mod config;
pub mod event;
pub mod global;
pub mod queue;
pub mod service;
pub mod signer;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, DeliveryClient};
pub use config::{ConfigError, ServiceConfig};
pub use event::{ReportEvent, ReportKind, ReportLine, Role};
pub use global::{enqueue_chat_end, enqueue_chat_message, global, init_global};
pub use queue::ReportQueue;
pub use service::{ChatHistoryService, ReportError};
pub use signer::{DeviceClaims, SignerError, TokenSigner};
