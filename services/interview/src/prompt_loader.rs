use anyhow::{Context, Result};
use interview_core::config::{DEFAULT_OPENING_LINE, DEFAULT_SYSTEM_PROMPT};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const SYSTEM_PROMPT_KEY: &str = "system_prompt";
pub const OPENING_LINE_KEY: &str = "opening_line";

/// The texts that shape the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub system_prompt: String,
    pub opening_line: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            opening_line: DEFAULT_OPENING_LINE.to_string(),
        }
    }
}

impl Prompts {
    /// Reads `system_prompt.md` and `opening_line.md` from `dir_path`. Missing (or
    /// blank) files, and a missing directory, fall back to the built-in texts.
    pub fn load(dir_path: &Path) -> Result<Self> {
        let defaults = Self::default();
        if !dir_path.exists() {
            tracing::warn!(
                "Prompts directory {} not found, using built-in prompts",
                dir_path.display()
            );
            return Ok(defaults);
        }

        let mut prompts = load_prompts(dir_path)?;
        let mut take = |key: &str, fallback: String| match prompts.remove(key) {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => {
                tracing::debug!("No {}.md prompt, using the built-in one", key);
                fallback
            }
        };

        Ok(Self {
            system_prompt: take(SYSTEM_PROMPT_KEY, defaults.system_prompt),
            opening_line: take(OPENING_LINE_KEY, defaults.opening_line),
        })
    }
}

/// Loads every `*.md` file of `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}
