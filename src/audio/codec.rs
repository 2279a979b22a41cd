//! PCM codec for the live audio channel.
//!
//! The wire format on both directions is PCM 16-bit signed little-endian,
//! base64 encoded and tagged with a `audio/pcm;rate=<hz>` MIME descriptor.
//! Capture frames are quantized from f32 samples before upload; inbound
//! chunks are expanded back to per-channel f32 buffers for playback.

use base64::prelude::*;

use crate::error::{VoiceError, VoiceResult};

/// Scale factor converting a 16-bit PCM sample to f32 in [-1, 1).
const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// A decoded, playable block of audio.
///
/// Samples are stored deinterleaved, one buffer per channel, all of equal
/// length. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Number of samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Whether the frame holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }
}

/// A transport-ready audio chunk: base64 PCM plus its MIME descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    /// Base64-encoded PCM 16-bit little-endian bytes
    pub data: String,
    /// MIME descriptor, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// MIME descriptor for mono PCM 16-bit at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// Encode mono f32 samples for transport.
///
/// Each sample is quantized with `round(s * 32768)` clamped to the i16 range,
/// packed little-endian and base64 encoded.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> EncodedAudio {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let quantized = (sample * 32768.0)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    EncodedAudio {
        data: BASE64_STANDARD.encode(&bytes),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Decode raw PCM 16-bit little-endian bytes into an [`AudioFrame`].
///
/// Byte pairs are reinterpreted as signed 16-bit integers, scaled to
/// [-1, 1) and deinterleaved into `channels` buffers of equal length.
pub fn decode_frame(bytes: &[u8], sample_rate: u32, channels: usize) -> VoiceResult<AudioFrame> {
    if channels == 0 {
        return Err(VoiceError::Decode("channel count must be non-zero".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "odd payload length {} is not valid 16-bit PCM",
            bytes.len()
        )));
    }
    let total_samples = bytes.len() / 2;
    if total_samples % channels != 0 {
        return Err(VoiceError::Decode(format!(
            "{} samples do not divide into {} channels",
            total_samples, channels
        )));
    }

    let per_channel = total_samples / channels;
    let mut buffers = vec![Vec::with_capacity(per_channel); channels];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 * PCM_TO_FLOAT_SCALE;
        buffers[i % channels].push(sample);
    }

    Ok(AudioFrame {
        channels: buffers,
        sample_rate,
    })
}
