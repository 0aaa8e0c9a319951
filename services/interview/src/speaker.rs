use anyhow::{Context, Result};
use async_trait::async_trait;
use interview_core::services::AudioPlayer;
use interview_native_utils::{audio, device};

/// Plays WAV audio on a local output device.
pub struct SpeakerPlayer {
    device_name: Option<String>,
}

impl SpeakerPlayer {
    /// `None` selects the host's default output device.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait]
impl AudioPlayer for SpeakerPlayer {
    async fn play(&self, wav: Vec<u8>) -> Result<()> {
        let decoded = audio::decode_wav(&wav)?;
        tracing::debug!("Playing {:?} of audio", decoded.duration());

        let device_name = self.device_name.clone();
        tokio::task::spawn_blocking(move || {
            let output = device::get_or_default_output(device_name.as_deref())
                .context("Failed to get audio output device")?;
            audio::play_blocking(&output, &decoded)
        })
        .await
        .context("Playback task failed")?
    }
}
