//! `reqwest` adapters for the analysis and conversation backends.
//!
//! Every adapter posts JSON to one configured URL. A non-2xx status is an error
//! carrying the response body.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::Engine;
use interview_core::services::{
    ChatService, EmotionAnalyzer, FinalizeService, GazeAnalyzer, GazeReportService,
    SpeechSynthesizer, TranscriptStore,
};
use interview_core::types::{
    AnalysisReport, ChatMessage, EmotionAnalysis, EmotionSample, EncodedFrame, FrameSample,
    GazeAnalysis, SessionId, SessionResults,
};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Builds the client shared by every adapter.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn post(client: &Client, url: &str, body: &serde_json::Value) -> Result<Response> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("Request to {url} failed"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("{url} returned {status}: {body}");
    }
    Ok(response)
}

async fn post_json<R: DeserializeOwned>(
    client: &Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<R> {
    post(client, url, body)
        .await?
        .json::<R>()
        .await
        .with_context(|| format!("Invalid response from {url}"))
}

/// Encodes a frame the way the analysis endpoints expect it.
pub fn data_url(frame: &EncodedFrame) -> String {
    format!(
        "data:{};base64,{}",
        frame.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&frame.data)
    )
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpChat {
    client: Client,
    url: String,
}

impl HttpChat {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ChatService for HttpChat {
    async fn reply(&self, history: &[ChatMessage]) -> Result<String> {
        let response: ChatResponse =
            post_json(&self.client, &self.url, &json!({ "messages": history })).await?;
        if let Some(error) = response.error {
            bail!("Chat service error: {error}");
        }
        response.reply.context("Chat response has no reply")
    }
}

pub struct HttpSynthesizer {
    client: Client,
    url: String,
}

impl HttpSynthesizer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let audio = post(&self.client, &self.url, &json!({ "text": text }))
            .await?
            .bytes()
            .await
            .context("Failed to read synthesized audio")?;
        if audio.is_empty() {
            bail!("TTS service returned no audio");
        }
        Ok(audio.to_vec())
    }
}

pub struct HttpTranscriptStore {
    client: Client,
    url: String,
}

impl HttpTranscriptStore {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TranscriptStore for HttpTranscriptStore {
    async fn upload(&self, transcript: &str) -> Result<()> {
        post(&self.client, &self.url, &json!({ "transcript": transcript })).await?;
        Ok(())
    }
}

pub struct HttpGazeAnalyzer {
    client: Client,
    url: String,
}

impl HttpGazeAnalyzer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl GazeAnalyzer for HttpGazeAnalyzer {
    async fn analyze(&self, frame: &EncodedFrame, session_id: &SessionId) -> Result<GazeAnalysis> {
        post_json(
            &self.client,
            &self.url,
            &json!({ "frame": data_url(frame), "session_id": session_id }),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
struct EmotionResponse {
    #[serde(flatten)]
    analysis: EmotionAnalysis,
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpEmotionAnalyzer {
    client: Client,
    url: String,
}

impl HttpEmotionAnalyzer {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EmotionAnalyzer for HttpEmotionAnalyzer {
    async fn analyze(
        &self,
        frame: &EncodedFrame,
        session_id: &SessionId,
    ) -> Result<EmotionAnalysis> {
        let response: EmotionResponse = post_json(
            &self.client,
            &self.url,
            &json!({ "frame": data_url(frame), "session_id": session_id }),
        )
        .await?;
        if let Some(error) = response.error {
            bail!("Emotion analysis error: {error}");
        }
        Ok(response.analysis)
    }
}

pub struct HttpGazeReports {
    client: Client,
    url: String,
}

impl HttpGazeReports {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl GazeReportService for HttpGazeReports {
    async fn report(&self, session_id: &SessionId) -> Result<AnalysisReport> {
        post_json(&self.client, &self.url, &json!({ "session_id": session_id })).await
    }
}

pub struct HttpFinalizeService {
    client: Client,
    url: String,
}

impl HttpFinalizeService {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl FinalizeService for HttpFinalizeService {
    async fn finalize(
        &self,
        history: &[ChatMessage],
        is_post_session: bool,
        gaze_samples: &[FrameSample],
        emotion_samples: &[EmotionSample],
    ) -> Result<SessionResults> {
        post_json(
            &self.client,
            &self.url,
            &json!({
                "messages": history,
                "is_post_session": is_post_session,
                "gaze_data": gaze_samples,
                "emotion_data": emotion_samples,
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post as route_post;
    use axum::{Json, Router};
    use serde_json::Value;

    /// Serves `router` on an ephemeral port and returns its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client() -> Client {
        build_client(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn chat_sends_the_history_and_reads_the_reply() {
        let base = serve(Router::new().route(
            "/chat",
            route_post(|Json(body): Json<Value>| async move {
                let count = body["messages"].as_array().map(Vec::len).unwrap_or(0);
                let role = body["messages"][0]["role"].clone();
                Json(json!({ "reply": format!("{count} messages, first is {role}") }))
            }),
        ))
        .await;
        let chat = HttpChat::new(client(), format!("{base}/chat"));

        let reply = chat
            .reply(&[ChatMessage::system("prompt"), ChatMessage::user("hi")])
            .await
            .unwrap();

        assert_eq!(reply, "2 messages, first is \"system\"");
    }

    #[tokio::test]
    async fn non_success_status_carries_the_body() {
        let base = serve(Router::new().route(
            "/chat",
            route_post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model overloaded") }),
        ))
        .await;
        let chat = HttpChat::new(client(), format!("{base}/chat"));

        let err = chat.reply(&[ChatMessage::user("hi")]).await.unwrap_err();

        let message = format!("{err:#}");
        assert!(message.contains("500"), "{message}");
        assert!(message.contains("model overloaded"), "{message}");
    }

    #[tokio::test]
    async fn tts_returns_raw_audio() {
        let base = serve(Router::new().route(
            "/tts",
            route_post(|Json(body): Json<Value>| async move {
                assert_eq!(body["text"], "Hello");
                vec![b'R', b'I', b'F', b'F']
            }),
        ))
        .await;
        let tts = HttpSynthesizer::new(client(), format!("{base}/tts"));

        assert_eq!(tts.synthesize("Hello").await.unwrap(), b"RIFF".to_vec());
    }

    #[tokio::test]
    async fn gaze_frames_are_sent_as_data_urls() {
        let base = serve(Router::new().route(
            "/capture-eye-tracking",
            route_post(|Json(body): Json<Value>| async move {
                let frame = body["frame"].as_str().unwrap_or_default();
                let eyes = if frame.starts_with("data:image/jpeg;base64,") { 2 } else { 0 };
                Json(json!({
                    "session_id": body["session_id"],
                    "eye_count": eyes,
                    "gaze_points": [{ "x": 0.5, "y": 0.4 }]
                }))
            }),
        ))
        .await;
        let gaze = HttpGazeAnalyzer::new(client(), format!("{base}/capture-eye-tracking"));

        let analysis = gaze
            .analyze(&EncodedFrame::jpeg(vec![0xff, 0xd8]), &SessionId::from("s1"))
            .await
            .unwrap();

        assert_eq!(analysis.eye_count, 2);
        assert_eq!(analysis.gaze_points.len(), 1);
    }

    #[tokio::test]
    async fn emotion_error_payload_is_an_error() {
        let base = serve(Router::new().route(
            "/analyze-live-emotion",
            route_post(|| async { Json(json!({ "error": "No face found" })) }),
        ))
        .await;
        let emotion = HttpEmotionAnalyzer::new(client(), format!("{base}/analyze-live-emotion"));

        let err = emotion
            .analyze(&EncodedFrame::jpeg(vec![1]), &SessionId::from("s1"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("No face found"));
    }

    #[tokio::test]
    async fn gaze_report_keeps_an_embedded_error() {
        let base = serve(Router::new().route(
            "/generate-eye-tracking-report",
            route_post(|Json(body): Json<Value>| async move {
                let session_id = body["session_id"].as_str().unwrap_or("?");
                Json(json!({ "error": format!("No data for {session_id}") }))
            }),
        ))
        .await;
        let reports =
            HttpGazeReports::new(client(), format!("{base}/generate-eye-tracking-report"));

        let report = reports.report(&SessionId::from("abc")).await.unwrap();

        assert_eq!(report.error.as_deref(), Some("No data for abc"));
    }

    #[test]
    fn data_url_is_base64_encoded() {
        assert_eq!(
            data_url(&EncodedFrame::jpeg(vec![0xff, 0xd8, 0xff])),
            "data:image/jpeg;base64,/9j/"
        );
    }
}
