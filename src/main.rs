//! Chat History Reporter - replays chat events to the chat history server
//!
//! Reads newline-delimited JSON events from stdin and reports them through
//! the non-blocking report queue.
//!
//! ## Input
//!
//! ```text
//! {"role":"user","device_id":"dev-1","text":"hello"}
//! {"role":"assistant","device_id":"dev-1","text":"hi there"}
//! {"role":"chat_end","device_id":"dev-1"}
//! ```
//!
//! ## Configuration
//!
//! - `CHAT_HISTORY_SERVER_URL`: chat history server base URL
//! - `CHAT_HISTORY_SERVER_SECRET`: token signing secret
//! - `CHAT_HISTORY_REQUEST_TIMEOUT_SECS`: per-call timeout (default: 10)
//! - `CHAT_HISTORY_POLL_INTERVAL_MS`: consumer poll interval (default: 1000)
//! - `CHAT_HISTORY_SHUTDOWN_TIMEOUT_SECS`: stop join timeout (default: 2)
//! - `RUST_LOG`: Logging level filter (default: info)
//!
//! Reporting is disabled, and input is read and discarded, unless both the
//! URL and the secret are set.

use std::io::BufRead;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chat_history_reporter::{ReportEvent, ReportLine, ReportQueue, ServiceConfig};

/// How long to wait for queued reports after stdin closes
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting chat history reporter...");

    let config = match ServiceConfig::from_env() {
        Ok(config) => {
            info!(
                enabled = config.enabled(),
                request_timeout_secs = config.request_timeout.as_secs(),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let queue = match ReportQueue::new(&config) {
        Ok(queue) => queue,
        Err(e) => {
            error!(error = %e, "Failed to create report queue");
            std::process::exit(1);
        }
    };

    let input = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));

    tokio::select! {
        lines = read_events(queue.clone(), input) => {
            info!(lines, "Input closed, waiting for pending reports");
            if tokio::time::timeout(DRAIN_TIMEOUT, queue.wait_idle()).await.is_err() {
                warn!(
                    pending = queue.pending(),
                    "Pending reports not drained after {:?}", DRAIN_TIMEOUT
                );
            }
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        }
    }

    queue.stop().await;
    info!("Chat history reporter stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Read lines on a dedicated OS thread.
///
/// Blocking reads cannot be cancelled; a detached thread lets the process
/// exit while a read is still pending, which the runtime's blocking pool
/// would not.
fn spawn_line_reader<R>(reader: R) -> mpsc::UnboundedReceiver<String>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to read from stdin");
                        break;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        error!(error = %e, "Failed to start stdin reader");
    }
    rx
}

/// Enqueue every valid line until the reader closes; returns the number of
/// lines read.
async fn read_events(queue: ReportQueue, mut lines: mpsc::UnboundedReceiver<String>) -> u64 {
    let mut count: u64 = 0;

    while let Some(line) = lines.recv().await {
        count += 1;

        if line.trim().is_empty() {
            continue;
        }

        match ReportLine::parse(&line) {
            Ok(parsed) => queue.enqueue(ReportEvent::from(parsed)),
            Err(e) => warn!(line = count, error = %e, "Skipping malformed event"),
        }
    }

    count
}
