use crate::core::tokens::{MESSAGE_HEADER_CHARS, tokens_for_chars};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    #[serde(other)]
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transcript message. `index` is its position in the source transcript
/// and doubles as the item key for per-message results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub index: u64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Upstream classifier tier; higher means more substantive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_tier: Option<u8>,
}

impl Message {
    pub fn new(index: u64, role: Role, content: impl Into<String>) -> Self {
        Self {
            index,
            role,
            content: content.into(),
            timestamp: None,
            filter_tier: None,
        }
    }

    /// Estimated cost of this message inside a prompt, header included.
    pub fn estimated_tokens(&self) -> usize {
        tokens_for_chars(self.content.chars().count() + MESSAGE_HEADER_CHARS)
    }
}
