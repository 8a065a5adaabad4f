//! HTTP delivery client for the chat history server.
//!
//! A delivery is a single attempt: no retries, no backoff. Every outcome is
//! folded into a boolean plus a log record so callers never see an error.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use tracing::{error, warn};

/// Errors that can occur during a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    /// Server answered with a status outside the success set
    #[error("Server error ({code}): {message}")]
    Status { code: StatusCode, message: String },

    /// Only POST is supported
    #[error("Unsupported HTTP method: {0}")]
    UnsupportedMethod(Method),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Client configuration error
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// True for the status codes the chat history server uses to acknowledge
/// a report.
pub fn is_accepted(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::CREATED
}

/// Synchronous-per-call HTTP wrapper used by the report consumer.
///
/// The underlying `reqwest::Client` is reused across calls for connection
/// pooling.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: Client,
    timeout: Duration,
}

impl DeliveryClient {
    /// Create a client whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Issue one call and report whether the server accepted it.
    ///
    /// Returns `true` only for 200 and 201. Non-success statuses are logged
    /// at warn, transport failures and unsupported methods at error.
    pub async fn deliver(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> bool {
        match self.send(method, url, headers, body).await {
            Ok(()) => true,
            Err(ClientError::Status { code, message }) => {
                warn!(
                    status = code.as_u16(),
                    body = %message,
                    url = %url,
                    "Chat history request failed"
                );
                false
            }
            Err(e) => {
                error!(error = %e, url = %url, "Chat history request error");
                false
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> Result<(), ClientError> {
        if method != Method::POST {
            return Err(ClientError::UnsupportedMethod(method));
        }

        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if is_accepted(status) {
            Ok(())
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
