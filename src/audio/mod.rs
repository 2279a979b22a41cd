//! Audio pipeline: PCM codec, microphone capture and gapless playback.
//!
//! Capture and playback are abstracted behind the [`AudioCapture`],
//! [`AudioSink`] and [`OutputClock`] traits so the session logic stays
//! platform-agnostic; hardware-backed implementations live in [`device`]
//! behind the `devices` feature.

pub mod capture;
pub mod codec;
#[cfg(feature = "devices")]
pub mod device;
pub mod playback;

pub use capture::{AudioCapture, CAPTURE_CHANNEL_CAPACITY};
pub use codec::{AudioFrame, EncodedAudio, decode_frame, encode_frame, pcm_mime_type};
pub use playback::{AudioSink, OutputClock, PlaybackScheduler, SourceId};
