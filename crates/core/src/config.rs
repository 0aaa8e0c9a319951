use std::time::Duration;

/// Period between two visual sampler ticks.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(1);
/// Hard timeout applied to each per-frame analysis call.
pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(5);
/// Wait between the transcript upload and reading the sample buffers. Longer than
/// `ANALYSIS_TIMEOUT`, so every tick dispatched before the end has settled.
pub const SETTLE_DELAY: Duration = Duration::from_secs(7);
/// Maximum number of server-side gaze report requests per session.
pub const REPORT_ATTEMPTS: u32 = 3;
/// Fixed pause between two gaze report attempts.
pub const REPORT_BACKOFF: Duration = Duration::from_secs(2);
/// Number of leading characters of the last assistant reply used for echo detection.
pub const ECHO_PREFIX_CHARS: usize = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a compassionate, professional mental health assistant. \
Only respond to what the user explicitly shares, acknowledge it briefly, then give a clear, \
direct response and end with a specific suggestion or question. Use plain sentences without \
any formatting symbols.";

pub const DEFAULT_OPENING_LINE: &str =
    "Hello, I'm here to listen. How have you been feeling lately?";

/// How the final `SessionResults` of a manually ended session are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalizeStrategy {
    /// Client-side aggregation with the local gaze fallback.
    #[default]
    Local,
    /// Hand the collected data to the finalize service.
    Remote,
}

/// Tunables of one `SessionController`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub opening_line: String,
    pub visual_sampling: bool,
    pub finalize_strategy: FinalizeStrategy,
    pub sample_period: Duration,
    pub analysis_timeout: Duration,
    pub settle_delay: Duration,
    pub report_attempts: u32,
    pub report_backoff: Duration,
    /// When set, chat requests carry the system prompt plus the most recent
    /// `window - 1` messages. The stored history is never truncated.
    pub history_window: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            opening_line: DEFAULT_OPENING_LINE.to_string(),
            visual_sampling: true,
            finalize_strategy: FinalizeStrategy::Local,
            sample_period: SAMPLE_PERIOD,
            analysis_timeout: ANALYSIS_TIMEOUT,
            settle_delay: SETTLE_DELAY,
            report_attempts: REPORT_ATTEMPTS,
            report_backoff: REPORT_BACKOFF,
            history_window: None,
        }
    }
}

impl SessionConfig {
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    pub fn with_opening_line(mut self, line: &str) -> Self {
        self.opening_line = line.to_string();
        self
    }

    pub fn with_visual_sampling(mut self, enabled: bool) -> Self {
        self.visual_sampling = enabled;
        self
    }

    pub fn with_finalize_strategy(mut self, strategy: FinalizeStrategy) -> Self {
        self.finalize_strategy = strategy;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_history_window(mut self, window: Option<usize>) -> Self {
        self.history_window = window;
        self
    }
}
