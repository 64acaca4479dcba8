//! Conversation messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::conversation::ContentBlock;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<ContentBlock>>,
    pub timestamp: DateTime<Utc>,
    pub is_streaming: bool,
}

fn message_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("msg-{}-{}", Utc::now().timestamp_millis(), &uuid[..8])
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: message_id(),
            role,
            content: content.into(),
            content_blocks: None,
            timestamp: Utc::now(),
            is_streaming: false,
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>, blocks: Option<Vec<ContentBlock>>) -> Self {
        Self {
            content_blocks: blocks,
            ..Self::new(Role::Assistant, content)
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Empty assistant message filled in while a turn streams.
    #[must_use]
    pub fn streaming_placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }
}
