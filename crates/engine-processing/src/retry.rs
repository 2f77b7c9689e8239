use connectors::error::{InferenceError, TranscriptError};
use engine_core::{error::StateStoreError, retry::RetryDisposition};

pub fn classify_inference_error(err: &InferenceError) -> RetryDisposition {
    match err {
        InferenceError::RateLimited(_) => RetryDisposition::Retry,
        InferenceError::Unavailable { .. } => RetryDisposition::Retry,
        InferenceError::Timeout => RetryDisposition::Retry,
        InferenceError::Transport(_) => RetryDisposition::Retry,
        // Results may lag the job's end by a little.
        InferenceError::ResultsUnavailable(_) => RetryDisposition::Retry,
        InferenceError::Decode(_) => RetryDisposition::Retry,
        InferenceError::Authentication(_) => RetryDisposition::Stop,
        InferenceError::InvalidRequest(_) => RetryDisposition::Stop,
        InferenceError::JobNotFound(_) => RetryDisposition::Stop,
    }
}

pub fn classify_state_error(err: &StateStoreError) -> RetryDisposition {
    match err {
        StateStoreError::Storage(sled::Error::Io(_)) => RetryDisposition::Retry,
        StateStoreError::Storage(_) => RetryDisposition::Stop,
        StateStoreError::Encode(_) => RetryDisposition::Stop,
        StateStoreError::Record(_) => RetryDisposition::Stop,
        StateStoreError::SaveCheckpoint(_) => RetryDisposition::Retry,
        StateStoreError::CommitPhase(_) => RetryDisposition::Retry,
    }
}

pub fn classify_transcript_error(err: &TranscriptError) -> RetryDisposition {
    match err {
        TranscriptError::Io(_) => RetryDisposition::Retry,
        TranscriptError::NotFound(_) => RetryDisposition::Stop,
        TranscriptError::Malformed { .. } => RetryDisposition::Stop,
    }
}
