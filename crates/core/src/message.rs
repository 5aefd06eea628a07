//! Message domain types for the final model request.
//!
//! Messages carry either plain text or a list of content blocks (text and
//! image blocks). Block form exists so individual text blocks can be marked
//! cacheable for models with prompt-caching support — image blocks are part
//! of the cached prefix but never carry their own cache control.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Prompt-cache directive attached to a text block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheControl {
    Ephemeral,
}

/// One block of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Message content: a plain string or a block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// The concatenated text of the content, ignoring image blocks.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text, .. } => Some(text.as_str()),
                    ContentBlock::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// A single message in the final request sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(content.into()))
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(content.into()))
    }

    pub fn user_with_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::User, MessageContent::Blocks(blocks))
    }
}

/// Capability flags of the target completion model, as advertised by the
/// host's model registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    /// Whether the model handles explicit mentioned-context injection.
    #[serde(default)]
    pub supports_mentioned_context: bool,
    /// Whether the model supports long context windows (gates search-source
    /// caps for small models).
    #[serde(default)]
    pub long_context: bool,
    /// Whether the model supports prompt caching.
    #[serde(default)]
    pub context_caching: bool,
}

impl ModelInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supports_mentioned_context: true,
            long_context: true,
            context_caching: false,
        }
    }
}
