//! Chat history reporting service.
//!
//! Composes the token signer and the delivery client into the two remote
//! operations the queue consumer performs. Both are no-ops when the service
//! is disabled or the device id is empty, and neither ever returns an error.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::{ClientError, DeliveryClient};
use crate::config::ServiceConfig;
use crate::event::Role;
use crate::signer::{SignerError, TokenSigner};

/// Failures while preparing a report, before anything hits the network.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to sign device token: {0}")]
    Signing(#[from] SignerError),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("failed to serialize report body: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid chat history URL '{url}': {message}")]
    Url { url: String, message: String },
}

/// `{base_url}/devices/{device_id}/{action}` with `device_id` encoded as a
/// single path segment.
pub fn endpoint(base_url: &str, device_id: &str, action: &str) -> Result<Url, ReportError> {
    let invalid = |message: String| ReportError::Url {
        url: base_url.to_string(),
        message,
    };

    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("cannot be a base URL".to_string()))?
        .pop_if_empty()
        .extend(["devices", device_id, action]);
    Ok(url)
}

/// Body of `POST /devices/{device_id}/messages`.
#[derive(Debug, Serialize)]
struct MessageBody<'a> {
    role: Role,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64: Option<&'a str>,
}

pub struct ChatHistoryService {
    base_url: Option<String>,
    enabled: bool,
    signer: TokenSigner,
    client: DeliveryClient,
}

impl ChatHistoryService {
    /// Create the service from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &ServiceConfig) -> Result<Self, ClientError> {
        let enabled = config.enabled();
        let client = DeliveryClient::new(config.request_timeout)?;

        match config.base_url.as_deref() {
            Some(base_url) if enabled => {
                info!(base_url = %base_url, "Chat history service enabled");
            }
            _ => info!("Chat history service disabled - no configuration found"),
        }

        Ok(Self {
            base_url: config.base_url.clone(),
            enabled,
            signer: TokenSigner::new(config.signing_secret.clone()),
            client,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Report a chat message for `device_id`.
    pub async fn report_message(
        &self,
        device_id: &str,
        role: Role,
        text: &str,
        image_base64: Option<&str>,
    ) {
        let Some(base_url) = self.target(device_id) else {
            return;
        };

        let body = MessageBody {
            role,
            text,
            image_base64: image_base64.filter(|image| !image.is_empty()),
        };

        match self.post(base_url, device_id, "messages", Some(&body)).await {
            Ok(true) => debug!(device_id = %device_id, role = %role, "Successfully reported message"),
            Ok(false) => warn!(device_id = %device_id, role = %role, "Failed to report message"),
            Err(e) => error!(device_id = %device_id, error = %e, "Error reporting message"),
        }
    }

    /// Report that the chat session on `device_id` has ended.
    pub async fn report_chat_end(&self, device_id: &str) {
        let Some(base_url) = self.target(device_id) else {
            return;
        };

        match self.post::<()>(base_url, device_id, "chat_end", None).await {
            Ok(true) => debug!(device_id = %device_id, "Successfully reported chat end"),
            Ok(false) => warn!(device_id = %device_id, "Failed to report chat end"),
            Err(e) => error!(device_id = %device_id, error = %e, "Error reporting chat end"),
        }
    }

    /// Base URL to report to, or `None` when this report must be skipped.
    fn target(&self, device_id: &str) -> Option<&str> {
        if !self.enabled || device_id.is_empty() {
            return None;
        }
        self.base_url.as_deref()
    }

    async fn post<B: Serialize>(
        &self,
        base_url: &str,
        device_id: &str,
        action: &str,
        body: Option<&B>,
    ) -> Result<bool, ReportError> {
        let url = endpoint(base_url, device_id, action)?;
        let headers = self.auth_headers(device_id)?;
        let body = body.map(serde_json::to_value).transpose()?;

        Ok(self
            .client
            .deliver(Method::POST, url.as_str(), headers, body.as_ref())
            .await)
    }

    fn auth_headers(&self, device_id: &str) -> Result<HeaderMap, ReportError> {
        let token = self.signer.sign(device_id)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}
