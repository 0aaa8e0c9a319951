use crate::types::{
    ChatMessage, EmotionSample, FrameSample, Lifecycle, Message, Sender, SessionId,
};
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle and microphone arbitration. Kept under one lock so that checks like
/// "active and not speaking" and the flag update that follows are atomic.
#[derive(Debug)]
struct Flags {
    lifecycle: Lifecycle,
    listening: bool,
    speaking: bool,
}

#[derive(Debug, Default)]
struct SessionData {
    session_id: Option<SessionId>,
    started_at: Option<DateTime<Utc>>,
    messages: Vec<Message>,
    chat: Vec<ChatMessage>,
    frames: Vec<FrameSample>,
    emotions: Vec<EmotionSample>,
}

/// The one authoritative state of the current session.
///
/// Owned by the `SessionController` and shared by `Arc` with every channel, the
/// sampler and the finalizers. Nothing keeps a private copy of these flags.
/// Locks are never held across an `.await`.
#[derive(Debug)]
pub struct SessionState {
    flags: Mutex<Flags>,
    data: Mutex<SessionData>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                lifecycle: Lifecycle::Idle,
                listening: false,
                speaking: false,
            }),
            data: Mutex::new(SessionData::default()),
        }
    }

    // --- lifecycle ---

    pub fn lifecycle(&self) -> Lifecycle {
        lock(&self.flags).lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    pub fn session_id(&self) -> Option<SessionId> {
        lock(&self.data).session_id.clone()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.data).started_at
    }

    /// Resets every buffer for a new session and enters `Active`.
    ///
    /// The chat history restarts with the system prompt as element 0.
    pub fn begin(&self, session_id: SessionId, started_at: DateTime<Utc>, system_prompt: &str) {
        {
            let mut data = lock(&self.data);
            *data = SessionData {
                session_id: Some(session_id),
                started_at: Some(started_at),
                messages: Vec::new(),
                chat: vec![ChatMessage::system(system_prompt)],
                frames: Vec::new(),
                emotions: Vec::new(),
            };
        }
        let mut flags = lock(&self.flags);
        flags.lifecycle = Lifecycle::Active;
        flags.listening = false;
        flags.speaking = false;
    }

    /// `Active -> Ending`. Listening is cleared in the same step. Returns `None`
    /// when the session was not active, which makes repeated `end()` calls no-ops.
    pub fn begin_ending(&self) -> Option<SessionId> {
        {
            let mut flags = lock(&self.flags);
            if flags.lifecycle != Lifecycle::Active {
                return None;
            }
            flags.lifecycle = Lifecycle::Ending;
            flags.listening = false;
        }
        self.session_id()
    }

    /// `Ending -> Ended`.
    pub fn finish(&self) {
        let mut flags = lock(&self.flags);
        if flags.lifecycle == Lifecycle::Ending {
            flags.lifecycle = Lifecycle::Ended;
        }
        flags.listening = false;
    }

    // --- microphone arbitration ---

    pub fn is_listening(&self) -> bool {
        lock(&self.flags).listening
    }

    pub fn is_speaking(&self) -> bool {
        lock(&self.flags).speaking
    }

    /// Marks the microphone as listening iff the session is active, nothing is
    /// being spoken and we are not listening already.
    pub fn try_begin_listening(&self) -> bool {
        let mut flags = lock(&self.flags);
        if flags.lifecycle != Lifecycle::Active || flags.speaking || flags.listening {
            return false;
        }
        flags.listening = true;
        true
    }

    /// Returns whether the microphone was listening.
    pub fn stop_listening(&self) -> bool {
        let mut flags = lock(&self.flags);
        std::mem::replace(&mut flags.listening, false)
    }

    /// Takes the speaker: `speaking` goes up and `listening` goes down in one step.
    ///
    /// Returns `None` when the session is not active (nothing may be spoken then),
    /// otherwise whether the microphone was listening and must be stopped.
    pub fn begin_speaking(&self) -> Option<bool> {
        let mut flags = lock(&self.flags);
        if flags.lifecycle != Lifecycle::Active {
            return None;
        }
        flags.speaking = true;
        Some(std::mem::replace(&mut flags.listening, false))
    }

    pub fn end_speaking(&self) {
        lock(&self.flags).speaking = false;
    }

    // --- transcript and chat history ---

    /// Appends the user's turn to both the transcript and the chat history and
    /// returns the history to send. `None` if the session is not active.
    pub fn record_user_turn(&self, text: &str) -> Option<Vec<ChatMessage>> {
        if !self.is_active() {
            return None;
        }
        let mut data = lock(&self.data);
        data.messages.push(Message::user(text));
        data.chat.push(ChatMessage::user(text));
        Some(data.chat.clone())
    }

    /// Appends an assistant turn. Returns `false`, appending nothing, if the
    /// session is not active.
    pub fn record_assistant_turn(&self, text: &str) -> bool {
        if !self.is_active() {
            return false;
        }
        let mut data = lock(&self.data);
        data.messages.push(Message::ai(text));
        data.chat.push(ChatMessage::assistant(text));
        true
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.data).messages.clone()
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        lock(&self.data).chat.clone()
    }

    pub fn last_assistant_text(&self) -> Option<String> {
        lock(&self.data)
            .messages
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Ai)
            .map(|m| m.text.clone())
    }

    pub fn has_user_turns(&self) -> bool {
        lock(&self.data)
            .messages
            .iter()
            .any(|m| m.sender == Sender::User)
    }

    /// The joined transcript log, one `"User: ..."` / `"AI: ..."` line per message.
    pub fn transcript(&self) -> String {
        lock(&self.data)
            .messages
            .iter()
            .map(Message::transcript_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    // --- visual samples ---

    /// Appends a gaze sample. Samples tagged with another session id (a tick that
    /// outlived its session) are discarded.
    pub fn record_frame(&self, sample: FrameSample) -> bool {
        let mut data = lock(&self.data);
        if data.session_id.as_ref() != Some(&sample.session_id) {
            return false;
        }
        data.frames.push(sample);
        true
    }

    pub fn record_emotion(&self, sample: EmotionSample) -> bool {
        let mut data = lock(&self.data);
        if data.session_id.as_ref() != Some(&sample.session_id) {
            return false;
        }
        data.emotions.push(sample);
        true
    }

    pub fn frames(&self) -> Vec<FrameSample> {
        lock(&self.data).frames.clone()
    }

    pub fn emotions(&self) -> Vec<EmotionSample> {
        lock(&self.data).emotions.clone()
    }
}
