use anyhow::{Context, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Producer, Split};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;
use std::time::Duration;

/// Extra time granted to the output device beyond the clip's own length.
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);
/// Frames fed to the resampler per call.
const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Mono PCM samples in `-1.0..=1.0` with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits samples into chunks of exactly `chunk_size`, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Decodes a WAV file (as returned by the TTS service) and downmixes it to mono.
pub fn decode_wav(bytes: &[u8]) -> anyhow::Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).context("Invalid WAV data")?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => {
            let pcm16 = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
            convert_i16_to_f32(&pcm16)
        }
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };
    tracing::debug!(
        sample_rate = spec.sample_rate,
        channels,
        frames = samples.len(),
        "Decoded WAV"
    );
    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Resamples mono audio. Returns the input unchanged when the rates match.
pub fn resample(samples: &[f32], from: f64, to: f64) -> anyhow::Result<Vec<f32>> {
    if (from - to).abs() < f64::EPSILON || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(from, to, RESAMPLE_CHUNK_SIZE)?;
    let mut output = Vec::with_capacity((samples.len() as f64 * to / from) as usize);
    for chunk in split_for_chunks(samples, resampler.input_frames_next()) {
        let processed = resampler.process(&[chunk.as_slice()], None)?;
        if let Some(channel) = processed.first() {
            output.extend_from_slice(channel);
        }
    }
    Ok(output)
}

/// Plays mono audio on `device` and blocks until the device has drained it.
///
/// Must run on a thread that may block (`tokio::task::spawn_blocking`).
pub fn play_blocking(device: &Device, audio: &DecodedAudio) -> anyhow::Result<()> {
    let supported = device
        .default_output_config()
        .context("Failed to get default output config")?;
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: supported.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channel_count = config.channels as usize;
    let output_rate = config.sample_rate.0 as f64;

    let samples = resample(&audio.samples, audio.sample_rate as f64, output_rate)?;
    let length = Duration::from_secs_f64(samples.len() as f64 / output_rate);
    let (mut producer, mut consumer) = shared_buffer(samples.len().max(1)).split();
    let pushed = producer.push_slice(&samples);
    if pushed < samples.len() {
        tracing::warn!("Dropped {} samples that did not fit the buffer", samples.len() - pushed);
    }

    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    let mut drained = false;
    let output_data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        for frame in data.chunks_mut(channel_count) {
            let sample = consumer.try_pop();
            frame.fill(sample.unwrap_or(0.0));
            if sample.is_none() && !drained {
                drained = true;
                let _ = done_tx.send(());
            }
        }
    };

    let stream = device.build_output_stream(
        &config,
        output_data_fn,
        move |err| tracing::error!("An error occurred on output stream: {}", err),
        None,
    )?;
    stream.play()?;

    done_rx
        .recv_timeout(length + PLAYBACK_GRACE)
        .map_err(|_| anyhow!("Output device did not finish playback in time"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(channels: u16, sample_rate: u32, frames: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in frames {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn stereo_wav_is_downmixed() {
        let bytes = wav(2, 22050, &[16384, 0, -16384, -16384]);

        let audio = decode_wav(&bytes).unwrap();

        assert_eq!(audio.sample_rate, 22050);
        assert_eq!(audio.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_wav(b"definitely not a wav file").is_err());
    }

    #[test]
    fn resampling_scales_the_length() {
        let samples = vec![0.1f32; 24000];

        let doubled = resample(&samples, 24000.0, 48000.0).unwrap();
        let same = resample(&samples, 24000.0, 24000.0).unwrap();

        assert!(doubled.len() >= 46000, "got {}", doubled.len());
        assert_eq!(same.len(), samples.len());
    }

    #[test]
    fn chunks_are_padded() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn duration_follows_the_rate() {
        let audio = DecodedAudio {
            samples: vec![0.0; 8000],
            sample_rate: 16000,
        };
        assert_eq!(audio.duration(), Duration::from_millis(500));
    }
}
