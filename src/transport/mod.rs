//! Streaming transport to the live conversation service.
//!
//! The session talks to the remote model through the [`Transport`] trait:
//! outbound audio chunks are fire-and-forget, inbound traffic is normalized
//! into [`InboundEvent`]s. The production WebSocket implementation is
//! [`LiveTransport`]; tests substitute scripted transports.

pub mod messages;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::audio::EncodedAudio;
use crate::config::SessionConfig;
use crate::error::{VoiceError, VoiceResult};

pub use ws::LiveTransport;

/// Normalized inbound traffic from the remote service.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// Incremental transcription of the user's speech
    PartialInputTranscript(String),
    /// Incremental transcription of the model's speech
    PartialOutputTranscript(String),
    /// Raw PCM bytes of synthesized model speech
    AudioPayload(Bytes),
    /// The model finished its reply for the current turn
    TurnComplete,
    /// The user barged in; pending model audio is stale
    Interrupted,
    /// A transport-level failure; recoverable errors do not end the stream
    Error(VoiceError),
    /// The remote side closed the stream
    Closed,
}

/// Bidirectional streaming channel for one session.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel and complete the session handshake.
    async fn connect(&mut self, config: &SessionConfig) -> VoiceResult<()>;

    /// Send one captured audio chunk upstream.
    ///
    /// Never blocks; if the outgoing channel is saturated the chunk is
    /// dropped.
    fn send(&self, chunk: EncodedAudio);

    /// Take the inbound event stream. Yields `Some` once per connection.
    fn take_events(&mut self) -> Option<mpsc::Receiver<InboundEvent>>;

    /// Close the channel. Idempotent.
    async fn close(&mut self);
}
