//! Real-time duplex voice conversation engine.
//!
//! `agrovoice` drives a live spoken conversation with an AI agronomist:
//! microphone audio is captured, encoded as PCM16 and streamed upstream
//! while synthesized speech, transcriptions and turn boundaries stream back
//! down the same channel. Inbound audio is scheduled gaplessly on the output
//! clock, and transcript fragments are reassembled into an ordered
//! conversation log.
//!
//! The entry point is [`VoiceSession`]: give it a [`SessionConfig`] and a
//! [`SessionIo`] bundle of backends, then drive it with `start()` / `stop()`
//! and observe it through `status()` and `events()`. Audio hardware support
//! lives behind the `devices` feature.
//!
//! ```rust,ignore
//! use agrovoice::{LiveTransport, SessionConfig, SessionIo, VoiceSession};
//!
//! #[tokio::main]
//! async fn main() -> agrovoice::VoiceResult<()> {
//!     let config = SessionConfig::from_env()?;
//!
//!     let (completions_tx, completions) = tokio::sync::mpsc::unbounded_channel();
//!     let (sink, clock) = agrovoice::audio::device::DeviceSink::open(completions_tx)?;
//!     let io = SessionIo {
//!         capture: Box::new(agrovoice::audio::device::DeviceCapture::new()),
//!         transport: Box::new(LiveTransport::new()),
//!         sink: Box::new(sink),
//!         clock: Box::new(clock),
//!         completions,
//!     };
//!
//!     let session = VoiceSession::new(config, io);
//!     session.start();
//!     let mut status = session.status();
//!     while status.changed().await.is_ok() {
//!         println!("session: {}", *status.borrow());
//!     }
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use audio::{
    AudioCapture, AudioFrame, AudioSink, EncodedAudio, OutputClock, PlaybackScheduler, SourceId,
    decode_frame, encode_frame, pcm_mime_type,
};
pub use config::{
    CAPTURE_FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, SessionConfig, Voice,
};
pub use error::{VoiceError, VoiceResult};
pub use session::{
    ConversationTurn, Role, SessionEvent, SessionIo, SessionStatus, TranscriptAssembler,
    VoiceSession,
};
pub use transport::{InboundEvent, LiveTransport, Transport};
