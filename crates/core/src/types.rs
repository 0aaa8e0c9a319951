//! Data model shared by every part of the orchestrator.
//!
//! Everything here is plain data. The wire shapes (snake_case JSON) match what the
//! analysis backends send and what callers of the finished session receive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque session token derived from the session's start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Builds an id from a start time, e.g. `20250114093012-417`.
    pub fn from_start(started_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{:03}",
            started_at.format("%Y%m%d%H%M%S"),
            started_at.timestamp_subsec_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a session. `Ended` is terminal for the session, a later `start()`
/// replaces it with a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Idle,
    Active,
    Ending,
    Ended,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Active => "active",
            Lifecycle::Ending => "ending",
            Lifecycle::Ended => "ended",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Ai,
    User,
}

/// One line of the visible transcript. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn ai(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Ai,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Formats the message the way it appears in the uploaded transcript.
    pub fn transcript_line(&self) -> String {
        match self.sender {
            Sender::User => format!("User: {}", self.text),
            Sender::Ai => format!("AI: {}", self.text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the history sent to the conversational service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A single webcam frame, already encoded (JPEG in practice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl EncodedFrame {
    pub fn jpeg(data: Vec<u8>) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data,
        }
    }
}

/// Normalised gaze position inside the frame, both axes in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: f64,
    pub y: f64,
}

/// Response of the per-frame gaze endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazeAnalysis {
    #[serde(default)]
    pub eye_count: u32,
    #[serde(default)]
    pub gaze_points: Vec<GazePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response of the per-frame emotion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub stats: String,
    #[serde(default)]
    pub interpretation: String,
}

/// Outcome of one gaze request in one sampler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSample {
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eye_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaze_points: Option<Vec<GazePoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl FrameSample {
    pub fn success(
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        analysis: GazeAnalysis,
    ) -> Self {
        Self {
            timestamp,
            session_id,
            eye_count: Some(analysis.eye_count),
            gaze_points: Some(analysis.gaze_points),
            error: None,
            details: None,
        }
    }

    pub fn failure(
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        error: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp,
            session_id,
            eye_count: None,
            gaze_points: None,
            error: Some(error.into()),
            details,
        }
    }

    /// A frame counts towards the gaze statistics only when it carries no error
    /// and at least one eye was detected.
    pub fn is_valid(&self) -> bool {
        self.error.is_none() && self.eye_count.unwrap_or(0) > 0
    }
}

/// Outcome of one emotion request in one sampler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    pub timestamp: DateTime<Utc>,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EmotionSample {
    pub fn success(
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        analysis: EmotionAnalysis,
    ) -> Self {
        Self {
            timestamp,
            session_id,
            summary: Some(analysis.summary),
            stats: Some(analysis.stats),
            interpretation: Some(analysis.interpretation),
            error: None,
            details: None,
        }
    }

    pub fn failure(
        session_id: SessionId,
        timestamp: DateTime<Utc>,
        error: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp,
            session_id,
            summary: None,
            stats: None,
            interpretation: None,
            error: Some(error.into()),
            details,
        }
    }
}

/// Summary/stats/interpretation triple used for both the gaze and the emotion
/// sections of the results, and returned by the server-side gaze report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisReport {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceChat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VoiceChat {
    pub fn completed() -> Self {
        Self {
            reply: Some("Completed".to_string()),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub report: String,
    pub timestamp: DateTime<Utc>,
}

impl FinalReport {
    pub fn now(report: impl Into<String>) -> Self {
        Self {
            report: report.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The single artifact produced by a manually ended session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResults {
    pub session_id: String,
    pub gaze_tracking: AnalysisReport,
    pub emotion_recognition: AnalysisReport,
    pub voice_chat: VoiceChat,
    pub transcript: String,
    pub final_report: FinalReport,
}

impl SessionResults {
    /// The uniformly shaped error version: every section carries an error and
    /// nothing is left empty.
    pub fn failed(session_id: &SessionId, reason: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            gaze_tracking: AnalysisReport::failed(format!("Gaze tracking unavailable: {reason}")),
            emotion_recognition: AnalysisReport::failed(format!(
                "Emotion recognition unavailable: {reason}"
            )),
            voice_chat: VoiceChat {
                reply: None,
                error: Some(format!("Voice chat unavailable: {reason}")),
            },
            transcript: format!("Transcript unavailable: {reason}"),
            final_report: FinalReport::now(format!("Error generating report: {reason}")),
        }
    }
}
