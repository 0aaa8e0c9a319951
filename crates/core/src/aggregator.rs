use crate::error::AggregationError;
use crate::fallback::{gaze_fallback, latest_emotion};
use crate::finalizer::{Finalizer, pause};
use crate::services::{GazeReportService, TranscriptStore};
use crate::session_state::SessionState;
use crate::types::{AnalysisReport, FinalReport, SessionId, SessionResults, VoiceChat};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Builds `SessionResults` on the client from the uploaded transcript, the
/// server-side gaze report (or a local fallback) and the emotion samples.
pub struct ResultAggregator {
    transcripts: Arc<dyn TranscriptStore>,
    gaze_reports: Arc<dyn GazeReportService>,
    state: Arc<SessionState>,
    settle_delay: Duration,
    attempts: u32,
    backoff: Duration,
}

impl ResultAggregator {
    pub fn new(
        transcripts: Arc<dyn TranscriptStore>,
        gaze_reports: Arc<dyn GazeReportService>,
        state: Arc<SessionState>,
        settle_delay: Duration,
        attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            transcripts,
            gaze_reports,
            state,
            settle_delay,
            attempts,
            backoff,
        }
    }

    async fn aggregate(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<SessionResults, AggregationError> {
        let transcript = self.state.transcript();
        self.transcripts
            .upload(&transcript)
            .await
            .map_err(|e| AggregationError::TranscriptUpload(format!("{e:#}")))?;
        info!(session_id = %session_id, "Transcript uploaded, waiting for in-flight analyses");

        pause(self.settle_delay, cancel).await?;

        let gaze_tracking = match self.fetch_gaze_report(session_id, cancel).await? {
            Some(report) => report,
            None => {
                let frames = self.state.frames();
                warn!(
                    session_id = %session_id,
                    frames = frames.len(),
                    "Gaze report unavailable, computing it locally"
                );
                gaze_fallback(&frames)
            }
        };
        let emotion_recognition = latest_emotion(&self.state.emotions());

        Ok(SessionResults {
            session_id: session_id.to_string(),
            gaze_tracking,
            emotion_recognition,
            voice_chat: VoiceChat::completed(),
            transcript,
            final_report: FinalReport::now("Analysis completed"),
        })
    }

    /// Up to `attempts` requests with a fixed backoff between them. A report that
    /// carries an error counts as a failed attempt.
    async fn fetch_gaze_report(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Option<AnalysisReport>, AggregationError> {
        for attempt in 1..=self.attempts {
            if attempt > 1 {
                pause(self.backoff, cancel).await?;
            }
            match self.gaze_reports.report(session_id).await {
                Ok(report) if !report.is_error() => return Ok(Some(report)),
                Ok(report) => warn!(
                    attempt,
                    error = report.error.as_deref().unwrap_or_default(),
                    "Gaze report attempt failed"
                ),
                Err(e) => warn!(attempt, "Gaze report attempt failed: {:#}", e),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Finalizer for ResultAggregator {
    async fn finalize(&self, session_id: &SessionId, cancel: &CancellationToken) -> SessionResults {
        let outcome = AssertUnwindSafe(self.aggregate(session_id, cancel))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(results)) => {
                info!(session_id = %session_id, "Session results ready");
                results
            }
            Ok(Err(e)) => {
                warn!(session_id = %session_id, "Aggregation failed: {}", e);
                SessionResults::failed(session_id, &e.to_string())
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(session_id = %session_id, "Aggregation panicked: {}", reason);
                SessionResults::failed(session_id, &reason)
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unexpected error".to_string()
    }
}
