use crate::types::Lifecycle;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Required device unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Cannot move session from {from} to {to}")]
    InvalidTransition { from: Lifecycle, to: Lifecycle },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Session is not active")]
    Inactive,
    #[error("Playback failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Session is not active")]
    Inactive,
    #[error("Chat service failed: {0}")]
    Chat(String),
    #[error("Chat service returned an empty reply")]
    EmptyReply,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregationError {
    #[error("Transcript upload failed: {0}")]
    TranscriptUpload(String),
    #[error("Aggregation was cancelled")]
    Cancelled,
}
