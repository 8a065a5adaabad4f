//! Non-blocking report queue with a single background consumer.
//!
//! Producers append to an unbounded channel and return immediately. One
//! tokio task drains the channel in FIFO order and hands each event to the
//! [`ChatHistoryService`]. The consumer waits for items in bounded slices so
//! that a stop request is noticed within one poll interval.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::client::ClientError;
use crate::config::ServiceConfig;
use crate::event::{QueueItem, ReportEvent, ReportKind, Role};
use crate::service::ChatHistoryService;

/// State shared between producers and the consumer task.
#[derive(Debug, Default)]
struct Shared {
    stop_requested: AtomicBool,
    /// Events enqueued but not yet processed or discarded
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Mark `count` events as finished and wake idle waiters if none remain.
    fn task_done(&self, count: usize) {
        if count == 0 {
            return;
        }
        if self.pending.fetch_sub(count, Ordering::SeqCst) == count {
            self.idle.notify_waiters();
        }
    }
}

struct Inner {
    enabled: bool,
    tx: mpsc::UnboundedSender<QueueItem>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

/// Handle to the chat history report queue.
///
/// Cloning is cheap and every clone refers to the same queue and consumer.
/// Construct one per application at startup and pass it to producers.
///
/// # Example
///
/// ```no_run
/// use chat_history_reporter::{ReportQueue, Role, ServiceConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = ServiceConfig::new("http://localhost:8080", "secret");
///     let queue = ReportQueue::new(&config).expect("Failed to create queue");
///
///     queue.enqueue_message("device-1", Role::User, "hello", None);
///     queue.enqueue_chat_end("device-1");
///
///     queue.stop().await;
/// }
/// ```
#[derive(Clone)]
pub struct ReportQueue {
    inner: Arc<Inner>,
}

impl ReportQueue {
    /// Create the queue and start its consumer task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if there is no current tokio runtime or
    /// the HTTP client cannot be built.
    pub fn new(config: &ServiceConfig) -> Result<Self, ClientError> {
        let runtime = current_runtime()?;
        let service = Arc::new(ChatHistoryService::new(config)?);
        let enabled = service.enabled();

        Ok(Self::with_dispatch(runtime, enabled, config, move |event| {
            let service = service.clone();
            async move { report(&service, event).await }
        }))
    }

    /// Start a queue whose consumer hands each event to `dispatch`.
    pub(crate) fn with_dispatch<F, Fut>(
        runtime: Handle,
        enabled: bool,
        config: &ServiceConfig,
        dispatch: F,
    ) -> Self
    where
        F: Fn(ReportEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let worker = runtime.spawn(run_consumer(
            rx,
            dispatch,
            shared.clone(),
            config.poll_interval,
        ));

        Self {
            inner: Arc::new(Inner {
                enabled,
                tx,
                shared,
                worker: Mutex::new(Some(worker)),
                shutdown_timeout: config.shutdown_timeout,
            }),
        }
    }

    /// Queue a chat message for reporting.
    ///
    /// Images are only kept for [`Role::User`]. Dropped silently when the
    /// service is disabled, `device_id` is empty, or the queue is stopped.
    pub fn enqueue_message(
        &self,
        device_id: &str,
        role: Role,
        text: &str,
        image_base64: Option<String>,
    ) {
        if !self.accepts(device_id) {
            return;
        }
        self.push(ReportEvent::message(device_id, role, text, image_base64));
    }

    /// Queue a chat end report for `device_id`.
    pub fn enqueue_chat_end(&self, device_id: &str) {
        if !self.accepts(device_id) {
            return;
        }
        self.push(ReportEvent::chat_end(device_id));
    }

    /// Queue a prebuilt event, subject to the same checks as the other
    /// enqueue operations.
    pub fn enqueue(&self, event: ReportEvent) {
        if !self.accepts(event.device_id()) {
            return;
        }
        self.push(event);
    }

    fn accepts(&self, device_id: &str) -> bool {
        self.inner.enabled && !device_id.is_empty() && !self.inner.shared.is_stopped()
    }

    fn push(&self, event: ReportEvent) {
        let shared = &self.inner.shared;
        let event_id = event.event_id();

        shared.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.inner.tx.send(QueueItem::Report(event)) {
            shared.task_done(1);
            debug!(error = %e, %event_id, "Chat history queue closed, report dropped");
        }
    }

    /// Number of events enqueued and not yet processed or discarded.
    pub fn pending(&self) -> usize {
        self.inner.shared.pending.load(Ordering::SeqCst)
    }

    /// True while reporting is configured.
    pub fn enabled(&self) -> bool {
        self.inner.enabled
    }

    /// True once `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.shared.is_stopped()
    }

    /// Wait until every enqueued event has been processed or discarded.
    ///
    /// Does not stop the queue. Callers that need a bound should wrap this in
    /// `tokio::time::timeout`.
    pub async fn wait_idle(&self) {
        let shared = &self.inner.shared;
        loop {
            let notified = shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Request shutdown and wait a bounded time for the consumer to exit.
    ///
    /// Idempotent: only the first call has any effect. Returns after the
    /// shutdown timeout even if the consumer is still busy with an in-flight
    /// delivery. Events still queued are discarded.
    pub async fn stop(&self) {
        let shared = &self.inner.shared;
        if shared.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        // Wakes the consumer immediately when it is idle.
        let _ = self.inner.tx.send(QueueItem::Stop);

        let worker = match self.inner.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(worker) = worker else {
            return;
        };

        let shutdown_timeout = self.inner.shutdown_timeout;
        match timeout(shutdown_timeout, worker).await {
            Ok(Ok(())) => info!("Chat history queue stopped"),
            Ok(Err(e)) => warn!(error = %e, "Chat history consumer panicked during shutdown"),
            Err(_) => warn!(
                "Chat history consumer did not stop within {:?}",
                shutdown_timeout
            ),
        }
    }
}

fn current_runtime() -> Result<Handle, ClientError> {
    Handle::try_current()
        .map_err(|e| ClientError::Config(format!("report queue needs a tokio runtime: {}", e)))
}

/// Consumer loop: drains the channel serially until stopped.
async fn run_consumer<F, Fut>(
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
    dispatch: F,
    shared: Arc<Shared>,
    poll_interval: Duration,
) where
    F: Fn(ReportEvent) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    debug!("Chat history consumer started");

    while !shared.is_stopped() {
        let event = match timeout(poll_interval, rx.recv()).await {
            Err(_) => continue,
            Ok(None) | Ok(Some(QueueItem::Stop)) => break,
            Ok(Some(QueueItem::Report(event))) => event,
        };

        let event_id = event.event_id();
        let kind = event.kind().label();

        // Own task per event so a panic is contained to it.
        if let Err(e) = tokio::spawn(dispatch(event)).await {
            error!(%event_id, kind, error = %e, "Chat history report processing error");
        }
        shared.task_done(1);
    }

    // Reject late producers, then discard what is left.
    rx.close();
    let mut discarded = 0;
    while let Ok(item) = rx.try_recv() {
        if let QueueItem::Report(_) = item {
            discarded += 1;
        }
    }
    shared.task_done(discarded);

    if discarded > 0 {
        warn!(
            discarded = discarded,
            "Chat history consumer stopped, dropped pending reports"
        );
    }
    debug!("Chat history consumer exited");
}

/// Send one event to the chat history server.
async fn report(service: &ChatHistoryService, event: ReportEvent) {
    let (device_id, kind) = event.into_parts();
    match kind {
        ReportKind::UserMessage { text, image_base64 } => {
            service
                .report_message(&device_id, Role::User, &text, image_base64.as_deref())
                .await
        }
        ReportKind::AssistantMessage { text } => {
            service
                .report_message(&device_id, Role::Assistant, &text, None)
                .await
        }
        ReportKind::ChatEnd => service.report_chat_end(&device_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn fast(config: ServiceConfig) -> ServiceConfig {
        config
            .with_poll_interval(Duration::from_millis(20))
            .with_request_timeout(Duration::from_secs(1))
    }

    /// Enabled config pointing at a port nothing listens on.
    fn unreachable_config() -> ServiceConfig {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        fast(ServiceConfig::new(format!("http://{}", addr), "secret"))
    }

    #[tokio::test]
    async fn test_disabled_queue_drops_everything() {
        let queue = ReportQueue::new(&fast(ServiceConfig::disabled())).unwrap();
        assert!(!queue.enabled());

        for _ in 0..10 {
            queue.enqueue_message("device-1", Role::User, "hi", None);
            queue.enqueue_chat_end("device-1");
        }
        assert_eq!(queue.pending(), 0);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_empty_device_id_is_dropped() {
        let queue = ReportQueue::new(&unreachable_config()).unwrap();
        assert!(queue.enabled());

        queue.enqueue_message("", Role::User, "hi", None);
        queue.enqueue_chat_end("");
        queue.enqueue(ReportEvent::chat_end(""));
        assert_eq!(queue.pending(), 0);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_failed_deliveries_do_not_stop_consumer() {
        let queue = ReportQueue::new(&unreachable_config()).unwrap();

        queue.enqueue_message("device-1", Role::User, "one", None);
        queue.enqueue_message("device-1", Role::Assistant, "two", None);
        queue.enqueue_chat_end("device-1");

        timeout(Duration::from_secs(10), queue.wait_idle())
            .await
            .expect("consumer should keep draining after failures");
        assert_eq!(queue.pending(), 0);

        queue.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_bounded() {
        let queue = ReportQueue::new(&fast(ServiceConfig::disabled())).unwrap();

        let started = Instant::now();
        queue.stop().await;
        queue.stop().await;
        assert!(queue.is_stopped());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_enqueue_after_stop_is_ignored() {
        let queue = ReportQueue::new(&unreachable_config()).unwrap();
        queue.stop().await;

        queue.enqueue_message("device-1", Role::User, "late", None);
        queue.enqueue_chat_end("device-1");
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let queue = ReportQueue::new(&fast(ServiceConfig::disabled())).unwrap();
        timeout(Duration::from_millis(100), queue.wait_idle())
            .await
            .expect("empty queue is idle");
        queue.stop().await;
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let queue = ReportQueue::new(&fast(ServiceConfig::disabled())).unwrap();
        let clone = queue.clone();
        clone.stop().await;
        assert!(queue.is_stopped());
    }

    #[tokio::test]
    async fn test_panicking_event_does_not_stop_consumer() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let recorded = delivered.clone();

        let queue = ReportQueue::with_dispatch(
            Handle::current(),
            true,
            &fast(ServiceConfig::disabled()),
            move |event: ReportEvent| {
                let recorded = recorded.clone();
                async move {
                    if let ReportKind::UserMessage { text, .. } = event.kind() {
                        if text == "boom" {
                            panic!("malformed event");
                        }
                        recorded.lock().unwrap().push(text.clone());
                    }
                }
            },
        );

        queue.enqueue_message("device-1", Role::User, "before", None);
        queue.enqueue_message("device-1", Role::User, "boom", None);
        queue.enqueue_message("device-1", Role::User, "after", None);

        timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .expect("consumer should survive a panicking event");
        assert_eq!(*delivered.lock().unwrap(), vec!["before", "after"]);
        assert_eq!(queue.pending(), 0);

        queue.stop().await;
    }

    #[test]
    fn test_new_outside_runtime_is_an_error() {
        let result = ReportQueue::new(&ServiceConfig::disabled());
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_task_done_notifies_at_zero() {
        let shared = Shared::default();
        shared.pending.store(2, Ordering::SeqCst);
        shared.task_done(1);
        assert_eq!(shared.pending.load(Ordering::SeqCst), 1);
        shared.task_done(0);
        assert_eq!(shared.pending.load(Ordering::SeqCst), 1);
        shared.task_done(1);
        assert_eq!(shared.pending.load(Ordering::SeqCst), 0);
    }
}
