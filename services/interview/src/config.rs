//! Application Configuration Module
//!
//! Loads the backend endpoints and orchestrator tunables from environment
//! variables (and an optional `.env` file) into a single `Config`.

use crate::prompt_loader::Prompts;
use interview_core::config::{FinalizeStrategy, SETTLE_DELAY, SessionConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_CHAT_API_URL: &str = "http://127.0.0.1:8002/chat";
pub const DEFAULT_TTS_API_URL: &str = "http://127.0.0.1:8002/tts";
pub const DEFAULT_TRANSCRIPT_UPLOAD_URL: &str = "http://127.0.0.1:8002/upload_transcript";
pub const DEFAULT_GAZE_CAPTURE_URL: &str = "http://localhost:8001/capture-eye-tracking";
pub const DEFAULT_GAZE_REPORT_URL: &str = "http://localhost:8001/generate-eye-tracking-report";
pub const DEFAULT_EMOTION_API_URL: &str = "http://127.0.0.1:8000/analyze-live-emotion";
pub const DEFAULT_FINALIZE_API_URL: &str = "http://localhost:8003/start-session";
/// Timeout applied by the HTTP client to every backend request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub chat_url: String,
    pub tts_url: String,
    pub transcript_url: String,
    pub gaze_capture_url: String,
    pub gaze_report_url: String,
    pub emotion_url: String,
    pub finalize_url: String,
    pub finalize_strategy: FinalizeStrategy,
    pub visual_sampling: bool,
    pub frames_dir: PathBuf,
    pub settle_delay: Duration,
    pub history_window: Option<usize>,
    pub http_timeout: Duration,
    pub control_address: Option<SocketAddr>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `CHAT_API_URL`, `TTS_API_URL`, `TRANSCRIPT_UPLOAD_URL`, `GAZE_CAPTURE_URL`,
    ///     `GAZE_REPORT_URL`, `EMOTION_API_URL`, `FINALIZE_API_URL`: backend endpoints.
    /// *   `FINALIZE_STRATEGY`: "local" (default) or "remote".
    /// *   `VISUAL_SAMPLING`: webcam sampling on/off. Defaults to on.
    /// *   `FRAMES_DIR`: directory of JPEG frames served as the camera. Defaults to "frames".
    /// *   `SETTLE_DELAY_SECS`: wait before reading the samples at the end. Defaults to 7.
    /// *   `CHAT_HISTORY_WINDOW`: (Optional) number of chat messages sent per request.
    /// *   `HTTP_TIMEOUT_SECS`: per-request timeout. Defaults to 30.
    /// *   `CONTROL_ADDRESS`: (Optional) address of the control API, e.g. "127.0.0.1:3000".
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string =
            |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let finalize_strategy = match lookup("FINALIZE_STRATEGY") {
            None => FinalizeStrategy::Local,
            Some(value) => match value.to_lowercase().as_str() {
                "local" => FinalizeStrategy::Local,
                "remote" => FinalizeStrategy::Remote,
                _ => return Err(invalid("FINALIZE_STRATEGY", "expected 'local' or 'remote'")),
            },
        };

        let visual_sampling = match lookup("VISUAL_SAMPLING") {
            None => true,
            Some(value) => parse_flag(&value)
                .ok_or_else(|| invalid("VISUAL_SAMPLING", &format!("'{value}' is not a boolean")))?,
        };

        let settle_delay = match lookup("SETTLE_DELAY_SECS") {
            None => SETTLE_DELAY,
            Some(value) => Duration::from_secs(parse("SETTLE_DELAY_SECS", &value)?),
        };
        let http_timeout = match lookup("HTTP_TIMEOUT_SECS") {
            None => DEFAULT_HTTP_TIMEOUT,
            Some(value) => Duration::from_secs(parse("HTTP_TIMEOUT_SECS", &value)?),
        };

        let history_window = lookup("CHAT_HISTORY_WINDOW")
            .map(|value| parse::<usize>("CHAT_HISTORY_WINDOW", &value))
            .transpose()?;
        if history_window == Some(0) {
            return Err(invalid("CHAT_HISTORY_WINDOW", "must be at least 1"));
        }

        let control_address = lookup("CONTROL_ADDRESS")
            .map(|value| parse::<SocketAddr>("CONTROL_ADDRESS", &value))
            .transpose()?;

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = string("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            invalid("RUST_LOG", &format!("'{}' is not a valid log level", log_level_str))
        })?;

        Ok(Self {
            chat_url: string("CHAT_API_URL", DEFAULT_CHAT_API_URL),
            tts_url: string("TTS_API_URL", DEFAULT_TTS_API_URL),
            transcript_url: string("TRANSCRIPT_UPLOAD_URL", DEFAULT_TRANSCRIPT_UPLOAD_URL),
            gaze_capture_url: string("GAZE_CAPTURE_URL", DEFAULT_GAZE_CAPTURE_URL),
            gaze_report_url: string("GAZE_REPORT_URL", DEFAULT_GAZE_REPORT_URL),
            emotion_url: string("EMOTION_API_URL", DEFAULT_EMOTION_API_URL),
            finalize_url: string("FINALIZE_API_URL", DEFAULT_FINALIZE_API_URL),
            finalize_strategy,
            visual_sampling,
            frames_dir: PathBuf::from(string("FRAMES_DIR", "frames")),
            settle_delay,
            history_window,
            http_timeout,
            control_address,
            log_level,
        })
    }

    /// The orchestrator settings for this configuration and prompt set.
    pub fn session_config(&self, prompts: &Prompts) -> SessionConfig {
        SessionConfig::default()
            .with_system_prompt(&prompts.system_prompt)
            .with_opening_line(&prompts.opening_line)
            .with_visual_sampling(self.visual_sampling)
            .with_finalize_strategy(self.finalize_strategy)
            .with_settle_delay(self.settle_delay)
            .with_history_window(self.history_window)
    }
}

fn invalid(name: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue(name.to_string(), reason.to_string())
}

fn parse<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(name, &e.to_string()))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_match_the_local_backend() {
        let config = load(&[]).unwrap();

        assert_eq!(config.chat_url, DEFAULT_CHAT_API_URL);
        assert_eq!(config.gaze_capture_url, DEFAULT_GAZE_CAPTURE_URL);
        assert_eq!(config.finalize_strategy, FinalizeStrategy::Local);
        assert!(config.visual_sampling);
        assert_eq!(config.settle_delay, Duration::from_secs(7));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.history_window, None);
        assert_eq!(config.control_address, None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.frames_dir, PathBuf::from("frames"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("FINALIZE_STRATEGY", "Remote"),
            ("VISUAL_SAMPLING", "off"),
            ("SETTLE_DELAY_SECS", "9"),
            ("CHAT_HISTORY_WINDOW", "10"),
            ("CONTROL_ADDRESS", "127.0.0.1:3000"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();

        assert_eq!(config.finalize_strategy, FinalizeStrategy::Remote);
        assert!(!config.visual_sampling);
        assert_eq!(config.settle_delay, Duration::from_secs(9));
        assert_eq!(config.history_window, Some(10));
        assert_eq!(config.control_address, Some("127.0.0.1:3000".parse().unwrap()));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn bad_values_name_the_variable() {
        for (name, value) in [
            ("FINALIZE_STRATEGY", "cloud"),
            ("VISUAL_SAMPLING", "maybe"),
            ("SETTLE_DELAY_SECS", "soon"),
            ("CHAT_HISTORY_WINDOW", "0"),
            ("CONTROL_ADDRESS", "localhost"),
            ("RUST_LOG", "chatty"),
        ] {
            let err = load(&[(name, value)]).unwrap_err();
            let ConfigError::InvalidValue(var, _) = err;
            assert_eq!(var, name);
        }
    }

    #[test]
    fn session_config_carries_prompts_and_flags() {
        let config = load(&[("VISUAL_SAMPLING", "false"), ("CHAT_HISTORY_WINDOW", "4")]).unwrap();
        let prompts = Prompts {
            system_prompt: "Be kind.".into(),
            opening_line: "Hi.".into(),
        };

        let session = config.session_config(&prompts);

        assert_eq!(session.system_prompt, "Be kind.");
        assert_eq!(session.opening_line, "Hi.");
        assert!(!session.visual_sampling);
        assert_eq!(session.history_window, Some(4));
    }
}
