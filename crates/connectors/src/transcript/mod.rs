use crate::error::TranscriptError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use model::records::{message::Message, unit::WorkUnit};
use std::path::{Path, PathBuf};

pub mod enriched;
pub mod jsonl;

pub const JSONL_FILE: &str = "transcript.jsonl";
pub const ENRICHED_FILE: &str = "enriched_session.json";

pub type MessageStream = BoxStream<'static, Result<Message, TranscriptError>>;

/// Ordered, finite, restartable message source for a work unit. Every call
/// to `open` starts a fresh pass from the first message.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn open(&self, unit: &WorkUnit) -> Result<MessageStream, TranscriptError>;
}

/// Reads whichever transcript file a unit directory carries, preferring the
/// line-delimited form because it streams.
#[derive(Debug, Clone, Default)]
pub struct DirectoryTranscriptSource;

impl DirectoryTranscriptSource {
    pub fn new() -> Self {
        Self
    }

    fn locate(dir: &Path) -> Option<(PathBuf, bool)> {
        let jsonl = dir.join(JSONL_FILE);
        if jsonl.is_file() {
            return Some((jsonl, true));
        }
        let enriched = dir.join(ENRICHED_FILE);
        enriched.is_file().then_some((enriched, false))
    }
}

#[async_trait]
impl TranscriptSource for DirectoryTranscriptSource {
    async fn open(&self, unit: &WorkUnit) -> Result<MessageStream, TranscriptError> {
        match Self::locate(&unit.locator) {
            Some((path, true)) => jsonl::read_messages(path).await,
            Some((path, false)) => enriched::read_messages(path).await,
            None => Err(TranscriptError::NotFound(unit.locator.clone())),
        }
    }
}
