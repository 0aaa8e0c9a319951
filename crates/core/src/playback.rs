use crate::error::PlaybackError;
use crate::services::{AudioPlayer, SpeechSynthesizer};
use crate::session_state::SessionState;
use crate::speech::SpeechChannel;
use crate::types::SessionId;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Speaks assistant text through TTS and the local speaker.
///
/// While audio is playing the microphone is off: `speak` takes the speaker, stops
/// the recognizer, plays, then hands the microphone back if the session is still
/// active. Synthesis or playback failures end the turn the same way, so the
/// conversation can continue.
pub struct PlaybackChannel {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    speech: Arc<SpeechChannel>,
    state: Arc<SessionState>,
    speaker: AsyncMutex<()>,
}

impl PlaybackChannel {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
        speech: Arc<SpeechChannel>,
        state: Arc<SessionState>,
    ) -> Self {
        Self {
            synthesizer,
            player,
            speech,
            state,
            speaker: AsyncMutex::new(()),
        }
    }

    pub async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        let _speaker = self.speaker.lock().await;
        let session_id = self.state.session_id();
        self.speech.suspend_for_playback().await?;

        let outcome = self.synthesize_and_play(text, session_id.as_ref()).await;
        if let Err(e @ PlaybackError::Failed(_)) = &outcome {
            warn!("{}", e);
        }

        // A newer session owns the flags once the id changed.
        if self.is_current(session_id.as_ref()) {
            self.state.end_speaking();
            self.speech.start().await;
        } else if self.state.session_id() == session_id {
            self.state.end_speaking();
        }
        outcome
    }

    /// Active and still the session this playback was started for.
    fn is_current(&self, session_id: Option<&SessionId>) -> bool {
        self.state.is_active() && self.state.session_id().as_ref() == session_id
    }

    async fn synthesize_and_play(
        &self,
        text: &str,
        session_id: Option<&SessionId>,
    ) -> Result<(), PlaybackError> {
        let audio = self
            .synthesizer
            .synthesize(text)
            .await
            .map_err(|e| PlaybackError::Failed(format!("{e:#}")))?;
        debug!(bytes = audio.len(), "Synthesized reply");
        if !self.is_current(session_id) {
            debug!("Session ended during synthesis, discarding audio");
            return Err(PlaybackError::Inactive);
        }
        self.player
            .play(audio)
            .await
            .map_err(|e| PlaybackError::Failed(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockSpeechRecognizer, MockSpeechSynthesizer};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Checks the microphone flags from inside playback.
    struct WatchfulPlayer {
        state: Arc<SessionState>,
        plays: AtomicUsize,
    }

    #[async_trait]
    impl AudioPlayer for WatchfulPlayer {
        async fn play(&self, _audio: Vec<u8>) -> Result<()> {
            assert!(self.state.is_speaking());
            assert!(!self.state.is_listening());
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn recognizer() -> MockSpeechRecognizer {
        let mut recognizer = MockSpeechRecognizer::new();
        recognizer.expect_start().returning(|| Ok(()));
        recognizer.expect_stop().returning(|| Ok(()));
        recognizer
    }

    /// Takes a second to synthesize.
    struct SlowSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for SlowSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(vec![0u8; 16])
        }
    }

    fn setup(
        synthesizer: impl SpeechSynthesizer + 'static,
    ) -> (PlaybackChannel, Arc<SessionState>, Arc<WatchfulPlayer>) {
        let state = Arc::new(SessionState::new());
        state.begin(SessionId::from("s1"), Utc::now(), "prompt");
        let speech = Arc::new(SpeechChannel::new(Arc::new(recognizer()), state.clone()));
        let player = Arc::new(WatchfulPlayer {
            state: state.clone(),
            plays: AtomicUsize::new(0),
        });
        let channel = PlaybackChannel::new(
            Arc::new(synthesizer),
            player.clone(),
            speech,
            state.clone(),
        );
        (channel, state, player)
    }

    #[tokio::test]
    async fn microphone_is_off_during_playback_and_back_on_after() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .returning(|_| Ok(vec![0u8; 16]));
        let (channel, state, player) = setup(synthesizer);
        assert!(state.try_begin_listening());

        channel.speak("How are you?").await.unwrap();

        assert_eq!(player.plays.load(Ordering::SeqCst), 1);
        assert!(!state.is_speaking());
        assert!(state.is_listening());
    }

    #[tokio::test]
    async fn tts_failure_is_reported_once_and_listening_resumes() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("tts returned 500")));
        let (channel, state, player) = setup(synthesizer);

        let outcome = channel.speak("How are you?").await;

        assert!(matches!(outcome, Err(PlaybackError::Failed(msg)) if msg.contains("500")));
        assert_eq!(player.plays.load(Ordering::SeqCst), 0);
        assert!(!state.is_speaking());
        assert!(state.is_listening());
    }

    #[tokio::test]
    async fn nothing_is_spoken_after_the_session_ends() {
        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer.expect_synthesize().never();
        let (channel, state, _player) = setup(synthesizer);
        state.begin_ending();

        assert_eq!(channel.speak("late reply").await, Err(PlaybackError::Inactive));
        assert!(!state.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn audio_synthesized_after_the_end_is_never_played() {
        let (channel, state, player) = setup(SlowSynthesizer);
        let channel = Arc::new(channel);

        let speaking = tokio::spawn({
            let channel = channel.clone();
            async move { channel.speak("Tell me more.").await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        state.begin_ending();
        state.finish();

        assert_eq!(speaking.await.unwrap(), Err(PlaybackError::Inactive));
        assert_eq!(player.plays.load(Ordering::SeqCst), 0);
        assert!(!state.is_speaking());
        assert!(!state.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn audio_from_a_previous_session_is_not_played_into_the_next() {
        let (channel, state, player) = setup(SlowSynthesizer);
        let channel = Arc::new(channel);

        let speaking = tokio::spawn({
            let channel = channel.clone();
            async move { channel.speak("Tell me more.").await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        state.begin_ending();
        state.finish();
        state.begin(SessionId::from("s2"), Utc::now(), "prompt");

        assert_eq!(speaking.await.unwrap(), Err(PlaybackError::Inactive));
        assert_eq!(player.plays.load(Ordering::SeqCst), 0);
        assert!(!state.is_speaking());
        assert!(!state.is_listening());
    }
}
