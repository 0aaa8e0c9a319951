use crate::error::AggregationError;
use crate::services::{FinalizeService, TranscriptStore};
use crate::session_state::SessionState;
use crate::types::{SessionId, SessionResults};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Produces the `SessionResults` of a manually ended session.
///
/// Implementations never fail: every error is folded into the all-error shape of
/// `SessionResults::failed`.
#[async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, session_id: &SessionId, cancel: &CancellationToken) -> SessionResults;
}

/// Sleeps for `duration` unless `cancel` fires first.
pub(crate) async fn pause(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), AggregationError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AggregationError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Delegates the whole result to the backend finalize service.
pub struct RemoteFinalizer {
    service: Arc<dyn FinalizeService>,
    transcripts: Arc<dyn TranscriptStore>,
    state: Arc<SessionState>,
    settle_delay: Duration,
}

impl RemoteFinalizer {
    pub fn new(
        service: Arc<dyn FinalizeService>,
        transcripts: Arc<dyn TranscriptStore>,
        state: Arc<SessionState>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            service,
            transcripts,
            state,
            settle_delay,
        }
    }

    async fn request(&self, cancel: &CancellationToken) -> anyhow::Result<SessionResults> {
        self.transcripts
            .upload(&self.state.transcript())
            .await
            .map_err(|e| AggregationError::TranscriptUpload(format!("{e:#}")))?;
        pause(self.settle_delay, cancel).await?;

        let history = self.state.chat_history();
        let frames = self.state.frames();
        let emotions = self.state.emotions();
        info!(
            frames = frames.len(),
            emotions = emotions.len(),
            "Requesting remote finalization"
        );
        tokio::select! {
            _ = cancel.cancelled() => Err(AggregationError::Cancelled.into()),
            results = self.service.finalize(&history, true, &frames, &emotions) => results,
        }
    }
}

#[async_trait]
impl Finalizer for RemoteFinalizer {
    async fn finalize(&self, session_id: &SessionId, cancel: &CancellationToken) -> SessionResults {
        match self.request(cancel).await {
            Ok(mut results) => {
                // Results are published under the local id, whatever the server echoes.
                results.session_id = session_id.to_string();
                results
            }
            Err(e) => {
                warn!(session_id = %session_id, "Remote finalization failed: {:#}", e);
                SessionResults::failed(session_id, &format!("{e:#}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockFinalizeService, MockTranscriptStore};
    use crate::types::AnalysisReport;
    use chrono::Utc;

    fn state() -> Arc<SessionState> {
        let state = Arc::new(SessionState::new());
        state.begin(SessionId::from("s1"), Utc::now(), "prompt");
        state.record_user_turn("I feel tired");
        state
    }

    fn uploads_ok() -> MockTranscriptStore {
        let mut store = MockTranscriptStore::new();
        store
            .expect_upload()
            .withf(|t| t == "User: I feel tired")
            .times(1)
            .returning(|_| Ok(()));
        store
    }

    #[tokio::test(start_paused = true)]
    async fn passes_history_and_samples_after_settling() {
        let mut service = MockFinalizeService::new();
        service
            .expect_finalize()
            .withf(|history, post_session, _, _| history.len() == 2 && *post_session)
            .times(1)
            .returning(|_, _, _, _| {
                let mut results = SessionResults::failed(&SessionId::from("server-7"), "unused");
                results.gaze_tracking = AnalysisReport::default();
                Ok(results)
            });
        let finalizer = RemoteFinalizer::new(
            Arc::new(service),
            Arc::new(uploads_ok()),
            state(),
            Duration::from_secs(7),
        );

        let started = tokio::time::Instant::now();
        let results = finalizer
            .finalize(&SessionId::from("s1"), &CancellationToken::new())
            .await;

        assert!(started.elapsed() >= Duration::from_secs(7));
        assert!(results.gaze_tracking.error.is_none());
        assert_eq!(results.session_id, "s1");
    }

    #[tokio::test(start_paused = true)]
    async fn service_failure_yields_the_error_shape() {
        let mut service = MockFinalizeService::new();
        service
            .expect_finalize()
            .returning(|_, _, _, _| Err(anyhow::anyhow!("503 Service Unavailable")));
        let finalizer = RemoteFinalizer::new(
            Arc::new(service),
            Arc::new(uploads_ok()),
            state(),
            Duration::from_secs(7),
        );

        let results = finalizer
            .finalize(&SessionId::from("s1"), &CancellationToken::new())
            .await;

        assert!(results.final_report.report.starts_with("Error generating report"));
        assert!(results.gaze_tracking.error.unwrap().contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_settle_resolves_with_errors() {
        let mut service = MockFinalizeService::new();
        service.expect_finalize().never();
        let finalizer = RemoteFinalizer::new(
            Arc::new(service),
            Arc::new(uploads_ok()),
            state(),
            Duration::from_secs(7),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = finalizer.finalize(&SessionId::from("s1"), &cancel).await;

        assert!(results.transcript.contains("cancelled"));
    }
}
