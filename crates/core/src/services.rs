//! Contracts for the external collaborators the orchestrator drives.
//!
//! The orchestrator never talks to a network or a device directly. Each concern is
//! a trait here, so the runtime can plug in HTTP adapters while the tests plug in
//! fakes or `mockall` mocks.

use crate::types::{
    AnalysisReport, ChatMessage, EmotionAnalysis, EmotionSample, EncodedFrame, FrameSample,
    GazeAnalysis, SessionId, SessionResults,
};
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

/// Events a speech recognizer pushes into the channel handed to it at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// A finalized transcription unit.
    Utterance(String),
    /// The recognizer gave up on the current listen without hearing anything.
    NoSpeech,
    /// The recognizer reached a natural end-of-utterance boundary and stopped.
    Ended,
    /// The recognizer failed and stopped.
    Error(String),
}

/// Continuous speech-to-text over the (single) microphone.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Obtains access to the microphone. Called once per `start()` of a session.
    async fn acquire(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    /// Stops listening. Must be harmless when already stopped.
    async fn stop(&self) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Local audio output. `play` resolves once the audio has finished playing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn reply(&self, history: &[ChatMessage]) -> Result<String>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Camera: Send + Sync {
    async fn acquire(&self) -> Result<()>;

    async fn capture(&self) -> Result<EncodedFrame>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait GazeAnalyzer: Send + Sync {
    async fn analyze(&self, frame: &EncodedFrame, session_id: &SessionId) -> Result<GazeAnalysis>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmotionAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        frame: &EncodedFrame,
        session_id: &SessionId,
    ) -> Result<EmotionAnalysis>;
}

/// Server-side gaze report for a whole session. A report whose `error` is set is a
/// failed report even though the call itself succeeded.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GazeReportService: Send + Sync {
    async fn report(&self, session_id: &SessionId) -> Result<AnalysisReport>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn upload(&self, transcript: &str) -> Result<()>;
}

/// Server-delegated finalization: the server builds the whole `SessionResults`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FinalizeService: Send + Sync {
    async fn finalize(
        &self,
        history: &[ChatMessage],
        is_post_session: bool,
        gaze_samples: &[FrameSample],
        emotion_samples: &[EmotionSample],
    ) -> Result<SessionResults>;
}

/// Every collaborator a `SessionController` needs, bundled for construction.
#[derive(Clone)]
pub struct Services {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub player: Arc<dyn AudioPlayer>,
    pub chat: Arc<dyn ChatService>,
    pub camera: Arc<dyn Camera>,
    pub gaze: Arc<dyn GazeAnalyzer>,
    pub emotion: Arc<dyn EmotionAnalyzer>,
    pub gaze_reports: Arc<dyn GazeReportService>,
    pub transcripts: Arc<dyn TranscriptStore>,
    /// Only used with `FinalizeStrategy::Remote`.
    pub finalize: Option<Arc<dyn FinalizeService>>,
}
