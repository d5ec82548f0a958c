//! # Messages
//!
//! One entry of a conversation, as the server returns it in history pages and
//! as the session builds it while a turn streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::files::FileId;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Attachment carried by a message.
///
/// Messages created locally point at the [`FileStore`](crate::core::files::FileStore)
/// entry; messages loaded from history carry the server URL.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FileRef {
    Local { id: FileId, name: String },
    Remote(String),
}

impl FileRef {
    pub fn display_name(&self) -> &str {
        match self {
            FileRef::Local { name, .. } => name,
            FileRef::Remote(url) => url.rsplit('/').next().unwrap_or(url),
        }
    }
}

/// Client-side delivery status. Never sent to or read from the server.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MessageStatus {
    #[default]
    Complete,
    Failed {
        reason: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    #[serde(skip)]
    pub status: MessageStatus,
}

impl Message {
    /// Optimistic user message, shown before the server has seen it.
    pub fn user(content: impl Into<String>, file: Option<FileRef>) -> Self {
        Self {
            id: None,
            role: Role::User,
            content: content.into(),
            file,
            image_url: None,
            created_at: Some(Utc::now()),
            input_tokens: None,
            output_tokens: None,
            status: MessageStatus::Complete,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: None,
            role: Role::Assistant,
            content: content.into(),
            file: None,
            image_url: None,
            created_at: Some(Utc::now()),
            input_tokens: None,
            output_tokens: None,
            status: MessageStatus::Complete,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, MessageStatus::Failed { .. })
    }
}
