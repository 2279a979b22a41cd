//! Session lifecycle and conversation state.

pub mod controller;
pub mod transcript;

pub use controller::{SessionEvent, SessionIo, SessionStatus, VoiceSession};
pub use transcript::{ConversationTurn, Role, TranscriptAssembler};
