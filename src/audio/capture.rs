//! Microphone capture abstraction.
//!
//! The session does not talk to audio hardware directly; it consumes fixed
//! size frames of mono f32 samples from an [`AudioCapture`] implementation.
//! The cpal-backed implementation lives in [`crate::audio::device`] behind the
//! `devices` feature; tests substitute scripted captures.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::VoiceResult;

/// Capacity of the capture frame channel. Frames arrive tens of times per
/// second; a stalled consumer drops frames rather than blocking the device
/// callback.
pub const CAPTURE_CHANNEL_CAPACITY: usize = 32;

/// Source of live microphone audio.
///
/// Once started, the implementation delivers frames of exactly
/// `frame_samples` mono samples at `sample_rate` until stopped.
#[async_trait]
pub trait AudioCapture: Send {
    /// Acquire the input device and begin delivering frames.
    ///
    /// Fails with [`crate::VoiceError::PermissionDenied`] or
    /// [`crate::VoiceError::DeviceUnavailable`] when the microphone cannot be
    /// opened.
    async fn start(
        &mut self,
        frame_samples: usize,
        sample_rate: u32,
    ) -> VoiceResult<mpsc::Receiver<Vec<f32>>>;

    /// Release the input device. Idempotent; calling twice has no further
    /// effect.
    fn stop(&mut self);
}
