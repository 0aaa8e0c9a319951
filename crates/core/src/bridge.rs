use crate::SessionEvent;
use crate::error::{BridgeError, PlaybackError};
use crate::playback::PlaybackChannel;
use crate::services::ChatService;
use crate::session_state::SessionState;
use crate::types::ChatMessage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// An assistant turn that was appended to the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// The reply stays in the transcript even when speaking it failed.
    pub playback: Result<(), PlaybackError>,
}

/// Turns a validated utterance into an assistant reply.
pub struct ConversationBridge {
    chat: Arc<dyn ChatService>,
    playback: Arc<PlaybackChannel>,
    state: Arc<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    history_window: Option<usize>,
}

impl ConversationBridge {
    pub fn new(
        chat: Arc<dyn ChatService>,
        playback: Arc<PlaybackChannel>,
        state: Arc<SessionState>,
        events: broadcast::Sender<SessionEvent>,
        history_window: Option<usize>,
    ) -> Self {
        Self {
            chat,
            playback,
            state,
            events,
            history_window,
        }
    }

    /// Appends the user turn, asks the chat service for a reply, appends it and
    /// speaks it. On error nothing is appended after the user turn and nothing is
    /// spoken.
    pub async fn handle_utterance(&self, text: &str) -> Result<Reply, BridgeError> {
        let history = self
            .state
            .record_user_turn(text)
            .ok_or(BridgeError::Inactive)?;
        let request = request_history(&history, self.history_window);
        debug!(messages = request.len(), "Requesting assistant reply");

        let reply = self
            .chat
            .reply(&request)
            .await
            .map_err(|e| BridgeError::Chat(format!("{e:#}")))?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(BridgeError::EmptyReply);
        }

        if !self.state.record_assistant_turn(reply) {
            info!("Discarding a reply that arrived after the session ended");
            return Err(BridgeError::Inactive);
        }
        let _ = self.events.send(SessionEvent::AssistantReply {
            text: reply.to_string(),
        });

        let playback = self.playback.speak(reply).await;
        Ok(Reply {
            text: reply.to_string(),
            playback,
        })
    }
}

/// The history actually sent: everything, or the system prompt plus the most
/// recent `window - 1` messages.
fn request_history(history: &[ChatMessage], window: Option<usize>) -> Vec<ChatMessage> {
    match window {
        Some(window) if window > 0 && history.len() > window => {
            let mut request = Vec::with_capacity(window);
            request.push(history[0].clone());
            request.extend_from_slice(&history[history.len() - (window - 1)..]);
            request
        }
        _ => history.to_vec(),
    }
}
