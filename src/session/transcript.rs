//! Turn reconstruction from streamed transcript fragments.
//!
//! Transcription arrives as small fragments interleaved with audio. The
//! assembler accumulates both directions independently and converts them into
//! ordered [`ConversationTurn`]s at each turn boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who spoke a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Model => write!(f, "model"),
        }
    }
}

/// One completed utterance of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Accumulates transcript fragments until a turn boundary.
#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    input: String,
    output: String,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment of the user's speech.
    pub fn push_input(&mut self, fragment: &str) {
        self.input.push_str(fragment);
    }

    /// Append a fragment of the model's speech.
    pub fn push_output(&mut self, fragment: &str) {
        self.output.push_str(fragment);
    }

    /// Close the current turn.
    ///
    /// Returns the user turn followed by the model turn, skipping whichever
    /// side accumulated no text. Both buffers are always reset, so a boundary
    /// with no fragments commits nothing.
    pub fn complete_turn(&mut self) -> Vec<ConversationTurn> {
        let mut turns = Vec::with_capacity(2);

        let user_text = std::mem::take(&mut self.input);
        let user_text = user_text.trim();
        if !user_text.is_empty() {
            turns.push(ConversationTurn {
                role: Role::User,
                text: user_text.to_string(),
            });
        }

        let model_text = std::mem::take(&mut self.output);
        let model_text = model_text.trim();
        if !model_text.is_empty() {
            turns.push(ConversationTurn {
                role: Role::Model,
                text: model_text.to_string(),
            });
        }

        turns
    }

    /// Discard any accumulated fragments.
    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }
}
