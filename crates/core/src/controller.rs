//! The one owner of a session's lifecycle.

use crate::aggregator::{ResultAggregator, panic_message};
use crate::bridge::ConversationBridge;
use crate::config::{FinalizeStrategy, SessionConfig};
use crate::error::{BridgeError, PlaybackError, SessionError};
use crate::finalizer::{Finalizer, RemoteFinalizer};
use crate::playback::PlaybackChannel;
use crate::sampler::VisualSampler;
use crate::services::{Camera, RecognizerEvent, Services, SpeechRecognizer};
use crate::session_state::SessionState;
use crate::speech::{SpeechChannel, SpeechOutcome};
use crate::types::{Lifecycle, SessionId, SessionResults};
use crate::{ReportStatus, SessionEvent};
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Drives one interview session at a time: `Idle -> Active -> Ending -> Ended`.
///
/// The controller owns the `SessionState` and hands `Arc`s of it to the speech and
/// playback channels, the visual sampler and the finalizer. Everything the UI needs
/// to know is published as a `SessionEvent`.
pub struct SessionController {
    config: SessionConfig,
    state: Arc<SessionState>,
    recognizer: Arc<dyn SpeechRecognizer>,
    camera: Arc<dyn Camera>,
    speech: Arc<SpeechChannel>,
    playback: Arc<PlaybackChannel>,
    sampler: Arc<VisualSampler>,
    bridge: ConversationBridge,
    finalizer: Arc<dyn Finalizer>,
    events: broadcast::Sender<SessionEvent>,
    report: Arc<watch::Sender<ReportStatus>>,
    aggregation: Mutex<Option<CancellationToken>>,
    /// The opening line, spoken in the background after `start`.
    opening: Mutex<Option<JoinHandle<()>>>,
    /// Serialises `start` and `end`.
    transitions: AsyncMutex<()>,
}

impl SessionController {
    pub fn new(config: SessionConfig, services: Services) -> Self {
        let state = Arc::new(SessionState::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (report, _) = watch::channel(ReportStatus::NoReport);

        let speech = Arc::new(SpeechChannel::new(
            services.recognizer.clone(),
            state.clone(),
        ));
        let playback = Arc::new(PlaybackChannel::new(
            services.synthesizer.clone(),
            services.player.clone(),
            speech.clone(),
            state.clone(),
        ));
        let sampler = Arc::new(VisualSampler::new(
            services.camera.clone(),
            services.gaze.clone(),
            services.emotion.clone(),
            state.clone(),
            config.sample_period,
            config.analysis_timeout,
        ));
        let bridge = ConversationBridge::new(
            services.chat.clone(),
            playback.clone(),
            state.clone(),
            events.clone(),
            config.history_window,
        );

        let finalizer: Arc<dyn Finalizer> = match (config.finalize_strategy, &services.finalize) {
            (FinalizeStrategy::Remote, Some(service)) => Arc::new(RemoteFinalizer::new(
                service.clone(),
                services.transcripts.clone(),
                state.clone(),
                config.settle_delay,
            )),
            (strategy, _) => {
                if strategy == FinalizeStrategy::Remote {
                    warn!("Remote finalization requested without a finalize service, aggregating locally");
                }
                Arc::new(ResultAggregator::new(
                    services.transcripts.clone(),
                    services.gaze_reports.clone(),
                    state.clone(),
                    config.settle_delay,
                    config.report_attempts,
                    config.report_backoff,
                ))
            }
        };

        Self {
            config,
            state,
            recognizer: services.recognizer,
            camera: services.camera,
            speech,
            playback,
            sampler,
            bridge,
            finalizer,
            events,
            report: Arc::new(report),
            aggregation: Mutex::new(None),
            opening: Mutex::new(None),
            transitions: AsyncMutex::new(()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    /// Acquires the devices and begins a fresh session.
    ///
    /// Calling it on an active session returns that session's id. A session whose
    /// report is still pending cannot be replaced.
    pub async fn start(&self) -> Result<SessionId, SessionError> {
        let _transition = self.transitions.lock().await;
        match self.state.lifecycle() {
            Lifecycle::Active => {
                if let Some(session_id) = self.state.session_id() {
                    return Ok(session_id);
                }
            }
            Lifecycle::Ending => {
                return Err(SessionError::InvalidTransition {
                    from: Lifecycle::Ending,
                    to: Lifecycle::Active,
                });
            }
            Lifecycle::Idle | Lifecycle::Ended => {}
        }

        self.recognizer
            .acquire()
            .await
            .map_err(|e| SessionError::ResourceUnavailable(format!("microphone: {e:#}")))?;
        if self.config.visual_sampling {
            self.camera
                .acquire()
                .await
                .map_err(|e| SessionError::ResourceUnavailable(format!("camera: {e:#}")))?;
        }

        let started_at = Utc::now();
        let session_id = SessionId::from_start(started_at);
        self.state
            .begin(session_id.clone(), started_at, &self.config.system_prompt);
        self.speech.reset();
        self.report.send_replace(ReportStatus::NoReport);
        info!(session_id = %session_id, "Session started");
        self.publish(SessionEvent::Started {
            session_id: session_id.clone(),
        });

        // The opening line is a regular assistant turn: it is in the transcript before
        // it is spoken, and listening begins once playback hands the microphone back.
        let opening = self.config.opening_line.clone();
        self.state.record_assistant_turn(&opening);
        self.publish(SessionEvent::AssistantReply {
            text: opening.clone(),
        });
        let playback = self.playback.clone();
        let events = self.events.clone();
        let opening = tokio::spawn(async move {
            match playback.speak(&opening).await {
                Ok(()) | Err(PlaybackError::Inactive) => {}
                Err(e) => {
                    let _ = events.send(SessionEvent::Notice {
                        message: e.to_string(),
                    });
                }
            }
        });
        if let Some(previous) = self
            .opening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(opening)
        {
            previous.abort();
        }

        if self.config.visual_sampling {
            self.sampler.start(session_id.clone());
        }
        Ok(session_id)
    }

    /// Ends the active session.
    ///
    /// Speech and sampling stop before this returns. A manual end with at least one
    /// user turn starts the finalizer in the background and returns
    /// `AggregationPending`; anything else ends without a report. Ending a session
    /// that is not active returns the current outcome unchanged.
    pub async fn end(&self, manual: bool) -> ReportStatus {
        let _transition = self.transitions.lock().await;
        let Some(session_id) = self.state.begin_ending() else {
            return self.outcome();
        };
        // In-flight ticks settle on their own; the finalizer's settle delay covers them.
        drop(self.sampler.stop());
        self.cancel_opening();
        self.speech.stop().await;
        info!(session_id = %session_id, manual, "Session ending");
        self.publish(SessionEvent::Ending {
            session_id: session_id.clone(),
        });

        if !manual || !self.state.has_user_turns() {
            self.state.finish();
            info!(session_id = %session_id, "Session ended without a report");
            self.publish(SessionEvent::Ended { session_id });
            return ReportStatus::NoReport;
        }

        let cancel = CancellationToken::new();
        *self
            .aggregation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        self.report.send_replace(ReportStatus::AggregationPending);

        let finalizer = self.finalizer.clone();
        let state = self.state.clone();
        let report = self.report.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let id = session_id.clone();
            let task = tokio::spawn(async move { finalizer.finalize(&id, &cancel).await });
            let results = match task.await {
                Ok(results) => results,
                Err(e) if e.is_panic() => {
                    SessionResults::failed(&session_id, &panic_message(e.into_panic().as_ref()))
                }
                Err(e) => SessionResults::failed(&session_id, &e.to_string()),
            };

            state.finish();
            let results = Arc::new(results);
            report.send_replace(ReportStatus::Resolved(results.clone()));
            info!(session_id = %session_id, "Session ended with results");
            let _ = events.send(SessionEvent::ResultsReady {
                results: Box::new(results.as_ref().clone()),
            });
            let _ = events.send(SessionEvent::Ended { session_id });
        });

        ReportStatus::AggregationPending
    }

    /// The report sub-state, without waiting.
    pub fn outcome(&self) -> ReportStatus {
        self.report.borrow().clone()
    }

    /// Waits for a pending report. `None` when the session ended (or will end)
    /// without one.
    pub async fn results(&self) -> Option<Arc<SessionResults>> {
        let mut rx = self.report.subscribe();
        let status = rx
            .wait_for(|status| !matches!(status, ReportStatus::AggregationPending))
            .await
            .ok()?;
        match &*status {
            ReportStatus::Resolved(results) => Some(results.clone()),
            _ => None,
        }
    }

    /// Consumes the recognizer's events until the sender side is dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<RecognizerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        debug!("Recognizer event stream closed");
    }

    pub async fn handle_event(&self, event: RecognizerEvent) {
        match self.speech.handle(event).await {
            SpeechOutcome::Forward(text) => {
                debug!(%text, "Utterance accepted");
                self.publish(SessionEvent::Utterance { text: text.clone() });
                match self.bridge.handle_utterance(&text).await {
                    Ok(reply) => match reply.playback {
                        Ok(()) | Err(PlaybackError::Inactive) => {}
                        Err(e) => self.notice(e.to_string()),
                    },
                    Err(BridgeError::Inactive) => debug!("Session left active during the turn"),
                    Err(e) => {
                        warn!("Conversation turn failed: {}", e);
                        self.notice(e.to_string());
                    }
                }
            }
            SpeechOutcome::Dropped(reason) => debug!(?reason, "Utterance dropped"),
            SpeechOutcome::Boundary { restarted } => debug!(restarted, "Recognizer boundary"),
            SpeechOutcome::Failed(message) => {
                warn!("Speech recognition error: {}", message);
                self.notice(format!("Speech recognition error: {message}"));
            }
        }
    }

    /// Stops everything the controller started, including a pending finalizer
    /// (which then resolves with the all-error results).
    pub async fn shutdown(&self) {
        if let Some(cancel) = self
            .aggregation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
        }
        drop(self.sampler.stop());
        self.cancel_opening();
        self.speech.stop().await;
    }

    /// Aborts an opening line that is still being synthesized or played.
    fn cancel_opening(&self) {
        let opening = self
            .opening
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(opening) = opening.filter(|task| !task.is_finished()) {
            debug!("Cancelling the opening line");
            opening.abort();
            self.state.end_speaking();
        }
    }

    fn notice(&self, message: String) {
        self.publish(SessionEvent::Notice { message });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscriber is fine.
        let _ = self.events.send(event);
    }
}
