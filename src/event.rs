//! Report events placed on the chat history queue.
//!
//! An event is immutable once built. The stop sentinel lives in [`QueueItem`]
//! and is never a [`ReportKind`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a chat message, serialized as the `role` field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportKind {
    /// Message spoken or typed by the device user, optionally with an image
    UserMessage {
        text: String,
        image_base64: Option<String>,
    },

    /// Reply produced by the assistant
    AssistantMessage { text: String },

    /// The conversation on the device has ended
    ChatEnd,
}

impl ReportKind {
    /// Short label used in log fields.
    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::UserMessage { .. } => "user_message",
            ReportKind::AssistantMessage { .. } => "assistant_message",
            ReportKind::ChatEnd => "chat_end",
        }
    }
}

/// A single chat event waiting to be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEvent {
    event_id: Uuid,
    created_at: DateTime<Utc>,
    device_id: String,
    kind: ReportKind,
}

impl ReportEvent {
    /// Build a message event. Images are kept for user messages only.
    pub fn message(
        device_id: impl Into<String>,
        role: Role,
        text: impl Into<String>,
        image_base64: Option<String>,
    ) -> Self {
        let text = text.into();
        let kind = match role {
            Role::User => ReportKind::UserMessage { text, image_base64 },
            Role::Assistant => ReportKind::AssistantMessage { text },
        };
        Self::new(device_id, kind)
    }

    /// Build a chat end event.
    pub fn chat_end(device_id: impl Into<String>) -> Self {
        Self::new(device_id, ReportKind::ChatEnd)
    }

    fn new(device_id: impl Into<String>, kind: ReportKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            device_id: device_id.into(),
            kind,
        }
    }

    /// Local identifier for log correlation; never sent to the server.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn kind(&self) -> &ReportKind {
        &self.kind
    }

    pub(crate) fn into_parts(self) -> (String, ReportKind) {
        (self.device_id, self.kind)
    }
}

/// Item travelling through the report channel.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Report(ReportEvent),
    Stop,
}

/// One line of newline-delimited JSON accepted by the replay binary.
///
/// ```text
/// {"role":"user","device_id":"dev-1","text":"hello","image_base64":"..."}
/// {"role":"assistant","device_id":"dev-1","text":"hi there"}
/// {"role":"chat_end","device_id":"dev-1"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ReportLine {
    User {
        device_id: String,
        text: String,
        #[serde(default)]
        image_base64: Option<String>,
    },
    Assistant {
        device_id: String,
        text: String,
    },
    ChatEnd {
        device_id: String,
    },
}

impl ReportLine {
    /// Parse a single JSON line.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

impl From<ReportLine> for ReportEvent {
    fn from(line: ReportLine) -> Self {
        match line {
            ReportLine::User {
                device_id,
                text,
                image_base64,
            } => ReportEvent::message(device_id, Role::User, text, image_base64),
            ReportLine::Assistant { device_id, text } => {
                ReportEvent::message(device_id, Role::Assistant, text, None)
            }
            ReportLine::ChatEnd { device_id } => ReportEvent::chat_end(device_id),
        }
    }
}
