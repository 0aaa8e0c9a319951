pub mod aggregator;
pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod fallback;
pub mod finalizer;
pub mod playback;
pub mod sampler;
pub mod services;
pub mod session_state;
pub mod speech;
pub mod types;

pub use config::{FinalizeStrategy, SessionConfig};
pub use controller::SessionController;
pub use error::{AggregationError, BridgeError, PlaybackError, SessionError};
pub use services::{RecognizerEvent, Services};
pub use types::{Lifecycle, SessionId, SessionResults};

use serde::Serialize;
use std::sync::Arc;

/// Notifications the `SessionController` broadcasts to whoever drives the UI.
///
/// This enum decouples the orchestrator from any presentation layer: the CLI prints
/// them, the control API forwards them over a websocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Started { session_id: SessionId },
    /// A deduplicated user utterance that was forwarded to the assistant.
    Utterance { text: String },
    AssistantReply { text: String },
    /// Non-fatal, user-visible problem (chat failure, recognizer error, ...).
    Notice { message: String },
    Ending { session_id: SessionId },
    Ended { session_id: SessionId },
    ResultsReady { results: Box<SessionResults> },
}

/// What `SessionController::end` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportStatus {
    /// The session was ended without a report (automatic end, or not active).
    NoReport,
    /// Aggregation runs in the background; await `SessionController::results`.
    AggregationPending,
    Resolved(Arc<SessionResults>),
}
