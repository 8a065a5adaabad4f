//! In-process mock chat history server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use chat_history_reporter::ServiceConfig;

pub const SECRET: &str = "integration-secret";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: Option<serde_json::Value>,
}

impl RecordedRequest {
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization.as_deref()?.strip_prefix("Bearer ")
    }
}

type StatusFn = dyn Fn(&str) -> StatusCode + Send + Sync;
type DelayFn = dyn Fn(&str) -> Duration + Send + Sync;

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    status_for: Arc<StatusFn>,
    delay_for: Arc<DelayFn>,
}

pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockServer {
    /// Server answering 201 to everything.
    pub async fn start() -> Self {
        Self::start_with(|_| StatusCode::CREATED, Duration::ZERO).await
    }

    /// Server choosing its status from the request path and sleeping
    /// `delay` before answering.
    pub async fn start_with<F>(status_for: F, delay: Duration) -> Self
    where
        F: Fn(&str) -> StatusCode + Send + Sync + 'static,
    {
        Self::start_with_delays(status_for, move |_| delay).await
    }

    /// Server choosing both status and response delay from the request path.
    pub async fn start_with_delays<F, D>(status_for: F, delay_for: D) -> Self
    where
        F: Fn(&str) -> StatusCode + Send + Sync + 'static,
        D: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            requests: requests.clone(),
            status_for: Arc::new(status_for),
            delay_for: Arc::new(delay_for),
        };

        let app = Router::new().fallback(record).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Enabled configuration pointing at this server with a fast poll.
    pub fn config(&self) -> ServiceConfig {
        ServiceConfig::new(&self.base_url, SECRET).with_poll_interval(Duration::from_millis(20))
    }
}

async fn record(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let request = RecordedRequest {
        method,
        path: uri.path().to_string(),
        authorization: header_str(header::AUTHORIZATION),
        content_type: header_str(header::CONTENT_TYPE),
        body: if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        },
    };
    let status = (state.status_for)(&request.path);
    let delay = (state.delay_for)(&request.path);
    state.requests.lock().unwrap().push(request);

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    status
}
