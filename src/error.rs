//! Error types for the voice session engine.

use thiserror::Error;

/// Errors that can occur during a voice session.
///
/// Only [`VoiceError::Decode`] is recoverable: a malformed audio chunk is
/// skipped and the session continues. Every other kind tears the session down
/// and moves it to the `Error` state.
#[derive(Debug, Clone, Error)]
pub enum VoiceError {
    /// Microphone access was denied by the OS or user
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// No usable input or output device
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Connecting to or talking over the live channel failed
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The remote side sent a message we could not understand
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An inbound audio payload could not be decoded
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for voice session operations.
pub type VoiceResult<T> = Result<T, VoiceError>;

impl VoiceError {
    /// Whether the session can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, VoiceError::Decode(_))
    }
}
