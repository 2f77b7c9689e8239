use crate::{error::TranscriptError, transcript::MessageStream};
use futures_util::{StreamExt, stream};
use model::records::message::Message;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct EnrichedSession {
    #[serde(default)]
    messages: Vec<Message>,
}

/// The enriched session is one JSON document, so it is parsed whole and then
/// replayed in index order.
pub async fn read_messages(path: PathBuf) -> Result<MessageStream, TranscriptError> {
    let raw = tokio::fs::read_to_string(&path).await?;
    let mut session: EnrichedSession =
        serde_json::from_str(&raw).map_err(|e| TranscriptError::Malformed {
            path: path.clone(),
            line: e.line(),
            message: e.to_string(),
        })?;
    session.messages.sort_by_key(|m| m.index);

    Ok(stream::iter(session.messages.into_iter().map(Ok)).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use tempfile::tempdir;

    #[tokio::test]
    async fn replays_messages_in_index_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enriched_session.json");
        std::fs::write(
            &path,
            r#"{"session_id":"x","messages":[
                {"index":2,"role":"assistant","content":"b"},
                {"index":1,"role":"user","content":"a","filter_tier":2}
            ]}"#,
        )
        .unwrap();

        let messages: Vec<Message> = read_messages(path).await.unwrap().try_collect().await.unwrap();
        assert_eq!(
            messages.iter().map(|m| m.index).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }
}
