use crate::{error::TranscriptError, transcript::MessageStream};
use chrono::{DateTime, Utc};
use futures_util::{StreamExt, stream};
use model::records::message::{Message, Role};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader, Lines},
};

/// Accepts both flat `{role, content}` lines and session-log lines that
/// nest the message under `message` with block-style content.
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default, rename = "type")]
    kind: Option<Role>,
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    message: Option<RawInner>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    filter_tier: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct RawInner {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: Option<RawContent>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawBlock>),
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    text: Option<String>,
}

impl RawContent {
    fn into_text(self) -> String {
        match self {
            RawContent::Text(text) => text,
            RawContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl RawLine {
    fn into_message(self, fallback_index: u64) -> Option<Message> {
        let (inner_role, inner_content) = match self.message {
            Some(inner) => (inner.role, inner.content),
            None => (None, None),
        };
        let role = self.role.or(inner_role).or(self.kind)?;
        let content = self.content.or(inner_content)?.into_text();
        if content.trim().is_empty() {
            return None;
        }
        Some(Message {
            index: self.index.unwrap_or(fallback_index),
            role,
            content,
            timestamp: self.timestamp,
            filter_tier: self.filter_tier,
        })
    }
}

struct Cursor {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    emitted: u64,
}

/// Lazily yields one message per non-empty line. Lines carrying no text
/// (tool traffic, summaries) are skipped.
pub async fn read_messages(path: PathBuf) -> Result<MessageStream, TranscriptError> {
    let file = File::open(&path).await?;
    let cursor = Cursor {
        path,
        lines: BufReader::new(file).lines(),
        line_no: 0,
        emitted: 0,
    };

    let messages = stream::unfold(Some(cursor), |state| async move {
        let mut cursor = state?;
        loop {
            let line = match cursor.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(err) => return Some((Err(TranscriptError::Io(err)), None)),
            };
            cursor.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let raw: RawLine = match serde_json::from_str(&line) {
                Ok(raw) => raw,
                Err(err) => {
                    let err = TranscriptError::Malformed {
                        path: cursor.path.clone(),
                        line: cursor.line_no,
                        message: err.to_string(),
                    };
                    return Some((Err(err), None));
                }
            };

            if let Some(message) = raw.into_message(cursor.emitted) {
                cursor.emitted += 1;
                return Some((Ok(message), Some(cursor)));
            }
        }
    });

    Ok(messages.boxed())
}
