//! Periodic webcam sampling while a session is active.

use crate::services::{Camera, EmotionAnalyzer, GazeAnalyzer};
use crate::session_state::SessionState;
use crate::types::{EmotionSample, FrameSample, SessionId};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct SamplerTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct VisualSampler {
    camera: Arc<dyn Camera>,
    gaze: Arc<dyn GazeAnalyzer>,
    emotion: Arc<dyn EmotionAnalyzer>,
    state: Arc<SessionState>,
    period: Duration,
    timeout: Duration,
    task: Mutex<Option<SamplerTask>>,
}

impl VisualSampler {
    pub fn new(
        camera: Arc<dyn Camera>,
        gaze: Arc<dyn GazeAnalyzer>,
        emotion: Arc<dyn EmotionAnalyzer>,
        state: Arc<SessionState>,
        period: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            camera,
            gaze,
            emotion,
            state,
            period,
            timeout,
            task: Mutex::new(None),
        }
    }

    /// Spawns the periodic task for `session_id`. The first tick fires one period
    /// after the call. Does nothing if a task is already running.
    pub fn start(self: &Arc<Self>, session_id: SessionId) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let sampler = Arc::clone(self);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { sampler.run_periodic(session_id, token).await });
        *task = Some(SamplerTask { cancel, handle });
    }

    /// Cancels the periodic task. No tick is dispatched after this returns; ticks
    /// already dispatched settle within the analysis timeout. The returned handle
    /// completes once they have.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        task.cancel.cancel();
        Some(task.handle)
    }

    async fn run_periodic(self: Arc<Self>, session_id: SessionId, cancel: CancellationToken) {
        info!(session_id = %session_id, "Visual sampling started");
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.state.is_active() {
                        break;
                    }
                    let sampler = Arc::clone(&self);
                    let id = session_id.clone();
                    in_flight.spawn(async move { sampler.tick(id).await });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Sampler tick failed: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!("Sampler tick failed: {}", e);
            }
        }
        info!(session_id = %session_id, "Visual sampling stopped");
    }

    /// One capture, analysed by both endpoints concurrently. Always records exactly
    /// one `FrameSample` and one `EmotionSample`.
    async fn tick(&self, session_id: SessionId) {
        let timestamp = Utc::now();

        let frame = match timeout(self.timeout, self.camera.capture()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                let reason = format!("Frame capture failed: {e:#}");
                warn!(session_id = %session_id, "{}", reason);
                self.record(
                    FrameSample::failure(session_id.clone(), timestamp, &reason, None),
                    EmotionSample::failure(session_id, timestamp, reason, None),
                );
                return;
            }
            Err(_) => {
                let reason = "Frame capture timed out";
                self.record(
                    FrameSample::failure(session_id.clone(), timestamp, reason, None),
                    EmotionSample::failure(session_id, timestamp, reason, None),
                );
                return;
            }
        };

        let (gaze, emotion) = tokio::join!(
            timeout(self.timeout, self.gaze.analyze(&frame, &session_id)),
            timeout(self.timeout, self.emotion.analyze(&frame, &session_id)),
        );

        let frame_sample = match gaze {
            Ok(Ok(analysis)) => match analysis.error.clone() {
                Some(error) => {
                    let details = serde_json::to_value(&analysis).ok();
                    FrameSample::failure(session_id.clone(), timestamp, error, details)
                }
                None => FrameSample::success(session_id.clone(), timestamp, analysis),
            },
            Ok(Err(e)) => {
                FrameSample::failure(session_id.clone(), timestamp, format!("{e:#}"), None)
            }
            Err(_) => FrameSample::failure(
                session_id.clone(),
                timestamp,
                "Gaze analysis timed out",
                None,
            ),
        };
        let emotion_sample = match emotion {
            Ok(Ok(analysis)) => EmotionSample::success(session_id.clone(), timestamp, analysis),
            Ok(Err(e)) => {
                EmotionSample::failure(session_id.clone(), timestamp, format!("{e:#}"), None)
            }
            Err(_) => EmotionSample::failure(
                session_id.clone(),
                timestamp,
                "Emotion analysis timed out",
                None,
            ),
        };

        debug!(
            session_id = %session_id,
            gaze_ok = frame_sample.error.is_none(),
            emotion_ok = emotion_sample.error.is_none(),
            "Tick settled"
        );
        self.record(frame_sample, emotion_sample);
    }

    fn record(&self, frame: FrameSample, emotion: EmotionSample) {
        let kept_frame = self.state.record_frame(frame);
        let kept_emotion = self.state.record_emotion(emotion);
        if !(kept_frame && kept_emotion) {
            debug!("Discarded samples of a previous session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{MockCamera, MockGazeAnalyzer};
    use crate::types::{EmotionAnalysis, EncodedFrame, GazeAnalysis, GazePoint};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every other call hangs past the analysis timeout.
    struct FlakyEmotion {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmotionAnalyzer for FlakyEmotion {
        async fn analyze(
            &self,
            _frame: &EncodedFrame,
            _session_id: &SessionId,
        ) -> Result<EmotionAnalysis> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(EmotionAnalysis {
                summary: "calm".into(),
                stats: "neutral 80%".into(),
                interpretation: "relaxed".into(),
            })
        }
    }

    fn camera() -> MockCamera {
        let mut camera = MockCamera::new();
        camera
            .expect_capture()
            .returning(|| Ok(EncodedFrame::jpeg(vec![0xff, 0xd8])));
        camera
    }

    fn sampler(
        camera: MockCamera,
        gaze: MockGazeAnalyzer,
        state: Arc<SessionState>,
    ) -> Arc<VisualSampler> {
        Arc::new(VisualSampler::new(
            Arc::new(camera),
            Arc::new(gaze),
            Arc::new(FlakyEmotion {
                calls: AtomicUsize::new(0),
            }),
            state,
            Duration::from_secs(1),
            Duration::from_secs(5),
        ))
    }

    fn active_state() -> Arc<SessionState> {
        let state = Arc::new(SessionState::new());
        state.begin(SessionId::from("s1"), Utc::now(), "prompt");
        state
    }

    #[tokio::test(start_paused = true)]
    async fn every_tick_records_one_sample_of_each_kind() {
        let state = active_state();
        let mut gaze = MockGazeAnalyzer::new();
        gaze.expect_analyze().returning(|_, _| {
            Ok(GazeAnalysis {
                eye_count: 2,
                gaze_points: vec![GazePoint { x: 0.5, y: 0.5 }],
                error: None,
            })
        });
        let sampler = sampler(camera(), gaze, state.clone());

        sampler.start(SessionId::from("s1"));
        tokio::time::sleep(Duration::from_millis(4500)).await;
        let handle = sampler.stop().unwrap();
        handle.await.unwrap();

        let frames = state.frames();
        let emotions = state.emotions();
        assert_eq!(frames.len(), 4);
        assert_eq!(emotions.len(), 4);
        assert!(frames.iter().all(FrameSample::is_valid));
        let timed_out = emotions
            .iter()
            .filter(|s| s.error.as_deref() == Some("Emotion analysis timed out"))
            .count();
        assert_eq!(timed_out, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_fires_after_stop() {
        let state = active_state();
        let mut gaze = MockGazeAnalyzer::new();
        gaze.expect_analyze().never();
        let mut camera = MockCamera::new();
        camera.expect_capture().never();
        let sampler = sampler(camera, gaze, state.clone());

        sampler.start(SessionId::from("s1"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        sampler.stop().unwrap().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(state.frames().is_empty());
        assert!(state.emotions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_still_records_both_samples() {
        let state = active_state();
        let mut camera = MockCamera::new();
        camera
            .expect_capture()
            .returning(|| Err(anyhow::anyhow!("camera unplugged")));
        let mut gaze = MockGazeAnalyzer::new();
        gaze.expect_analyze().never();
        let sampler = sampler(camera, gaze, state.clone());

        sampler.start(SessionId::from("s1"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sampler.stop().unwrap().await.unwrap();

        let frames = state.frames();
        let emotions = state.emotions();
        assert_eq!(frames.len(), 1);
        assert_eq!(emotions.len(), 1);
        assert!(frames[0].error.as_deref().unwrap().contains("camera unplugged"));
        assert!(emotions[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn embedded_gaze_error_is_kept_with_its_payload() {
        let state = active_state();
        let mut gaze = MockGazeAnalyzer::new();
        gaze.expect_analyze().returning(|_, _| {
            Ok(GazeAnalysis {
                eye_count: 0,
                gaze_points: vec![],
                error: Some("No face detected".into()),
            })
        });
        let sampler = sampler(camera(), gaze, state.clone());

        sampler.start(SessionId::from("s1"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sampler.stop().unwrap().await.unwrap();

        let frames = state.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].error.as_deref(), Some("No face detected"));
        let details = frames[0].details.as_ref().unwrap();
        assert_eq!(details["error"], "No face detected");
    }
}
