//! Microphone side of the conversation: when the recognizer may listen, and which
//! of its utterances are worth forwarding.

use crate::config::ECHO_PREFIX_CHARS;
use crate::error::PlaybackError;
use crate::services::{RecognizerEvent, SpeechRecognizer};
use crate::session_state::SessionState;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Why an utterance was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    Inactive,
    Speaking,
    Echo,
    Duplicate,
}

/// What the channel made of one recognizer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// A validated utterance for the conversation bridge.
    Forward(String),
    Dropped(DropReason),
    /// The recognizer stopped on its own (no speech, end of utterance).
    Boundary { restarted: bool },
    /// The recognizer failed. Listening is not resumed.
    Failed(String),
}

pub struct SpeechChannel {
    recognizer: Arc<dyn SpeechRecognizer>,
    state: Arc<SessionState>,
    last_emitted: Mutex<Option<String>>,
    /// Serialises every start/stop of the physical recognizer.
    control: AsyncMutex<()>,
}

impl SpeechChannel {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, state: Arc<SessionState>) -> Self {
        Self {
            recognizer,
            state,
            last_emitted: Mutex::new(None),
            control: AsyncMutex::new(()),
        }
    }

    /// Forgets the previous session's last utterance.
    pub fn reset(&self) {
        *self
            .last_emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Starts listening. Refused while speaking, while already listening or when
    /// the session is not active.
    pub async fn start(&self) -> bool {
        let _control = self.control.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> bool {
        if !self.state.try_begin_listening() {
            return false;
        }
        if let Err(e) = self.recognizer.start().await {
            warn!("Failed to start speech recognizer: {:#}", e);
            self.state.stop_listening();
            return false;
        }
        debug!("Listening");
        true
    }

    pub async fn stop(&self) {
        let _control = self.control.lock().await;
        self.state.stop_listening();
        if let Err(e) = self.recognizer.stop().await {
            warn!("Failed to stop speech recognizer: {:#}", e);
        }
    }

    /// Hands the microphone over to playback: raises `speaking` and stops the
    /// recognizer if it was listening.
    pub async fn suspend_for_playback(&self) -> Result<(), PlaybackError> {
        let _control = self.control.lock().await;
        let was_listening = self.state.begin_speaking().ok_or(PlaybackError::Inactive)?;
        if was_listening {
            if let Err(e) = self.recognizer.stop().await {
                warn!("Failed to stop speech recognizer before playback: {:#}", e);
            }
        }
        Ok(())
    }

    pub async fn handle(&self, event: RecognizerEvent) -> SpeechOutcome {
        match event {
            RecognizerEvent::Utterance(text) => self.filter(&text),
            RecognizerEvent::NoSpeech | RecognizerEvent::Ended => {
                let _control = self.control.lock().await;
                self.state.stop_listening();
                let restarted = self.start_locked().await;
                SpeechOutcome::Boundary { restarted }
            }
            RecognizerEvent::Error(message) => {
                self.state.stop_listening();
                SpeechOutcome::Failed(message)
            }
        }
    }

    fn filter(&self, text: &str) -> SpeechOutcome {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return SpeechOutcome::Dropped(DropReason::Empty);
        }
        if !self.state.is_active() {
            return SpeechOutcome::Dropped(DropReason::Inactive);
        }
        if self.state.is_speaking() {
            return SpeechOutcome::Dropped(DropReason::Speaking);
        }
        if self.is_echo(text, &normalized) {
            return SpeechOutcome::Dropped(DropReason::Echo);
        }

        let mut last = self
            .last_emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.as_deref() == Some(normalized.as_str()) {
            return SpeechOutcome::Dropped(DropReason::Duplicate);
        }
        *last = Some(normalized);
        SpeechOutcome::Forward(text.trim().to_string())
    }

    fn is_echo(&self, text: &str, normalized: &str) -> bool {
        let Some(last_reply) = self.state.last_assistant_text() else {
            return false;
        };
        let prefix = last_reply
            .chars()
            .take(ECHO_PREFIX_CHARS)
            .collect::<String>()
            .to_lowercase();
        if prefix.trim().is_empty() {
            return false;
        }
        text.to_lowercase().contains(&prefix) || normalized.contains(&normalize(&prefix))
    }
}

/// Lowercases and collapses whitespace.
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
