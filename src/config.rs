//! Session configuration.
//!
//! A [`SessionConfig`] describes one voice conversation: which model and voice
//! to use, the system prompt, and the fixed audio rates of the two clocks.
//! Values can be built programmatically or loaded from the environment with
//! [`SessionConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VoiceError, VoiceResult};

/// Sample rate of captured microphone audio sent upstream (Hz).
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of synthesized audio received downstream (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Number of samples per capture frame.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// Default live endpoint for the bidirectional stream.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default native-audio model.
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert AI agronomist providing helpful advice \
     to a Nigerian farmer. Keep your answers clear, concise, and easy to understand.";

/// Prebuilt voices supported by the live endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Voice {
    #[default]
    Zephyr,
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

impl Voice {
    /// Wire name of the voice.
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Aoede => "Aoede",
        }
    }

    /// Parse a voice name, falling back to the default on an unknown value.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "zephyr" => Voice::Zephyr,
            "puck" => Voice::Puck,
            "charon" => Voice::Charon,
            "kore" => Voice::Kore,
            "fenrir" => Voice::Fenrir,
            "aoede" => Voice::Aoede,
            other => {
                tracing::warn!("Unknown voice '{}', using default", other);
                Voice::default()
            }
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration for a voice conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// API key for the live endpoint
    pub api_key: String,

    /// Model identifier
    #[serde(default)]
    pub model: String,

    /// Voice used for synthesized speech
    #[serde(default)]
    pub voice: Voice,

    /// System prompt framing the conversation
    #[serde(default)]
    pub system_instruction: String,

    /// WebSocket endpoint of the live service
    #[serde(default)]
    pub endpoint: String,

    /// Capture clock rate (Hz), mono
    #[serde(default)]
    pub input_sample_rate: u32,

    /// Playback clock rate (Hz), mono
    #[serde(default)]
    pub output_sample_rate: u32,

    /// Samples per capture frame
    #[serde(default)]
    pub capture_frame_samples: usize,

    /// Request transcription of user speech
    #[serde(default)]
    pub transcribe_input: bool,

    /// Request transcription of model speech
    #[serde(default)]
    pub transcribe_output: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            voice: Voice::default(),
            system_instruction: DEFAULT_SYSTEM_PROMPT.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            capture_frame_samples: CAPTURE_FRAME_SAMPLES,
            transcribe_input: true,
            transcribe_output: true,
        }
    }
}

impl SessionConfig {
    /// Build a configuration from environment variables.
    ///
    /// Reads `AGROVOICE_API_KEY` (or `GEMINI_API_KEY`), with optional
    /// `AGROVOICE_MODEL`, `AGROVOICE_VOICE`, `AGROVOICE_ENDPOINT` and
    /// `AGROVOICE_SYSTEM_PROMPT` overrides.
    pub fn from_env() -> VoiceResult<Self> {
        let api_key = std::env::var("AGROVOICE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                VoiceError::Config("AGROVOICE_API_KEY or GEMINI_API_KEY must be set".to_string())
            })?;

        let mut config = Self {
            api_key,
            ..Default::default()
        };

        if let Ok(model) = std::env::var("AGROVOICE_MODEL") {
            config.model = model;
        }
        if let Ok(voice) = std::env::var("AGROVOICE_VOICE") {
            config.voice = Voice::from_str_or_default(&voice);
        }
        if let Ok(endpoint) = std::env::var("AGROVOICE_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(prompt) = std::env::var("AGROVOICE_SYSTEM_PROMPT") {
            config.system_instruction = prompt;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.api_key.is_empty() {
            return Err(VoiceError::Config("API key is required".to_string()));
        }
        if self.input_sample_rate == 0 || self.output_sample_rate == 0 {
            return Err(VoiceError::Config("sample rates must be non-zero".to_string()));
        }
        if self.capture_frame_samples == 0 {
            return Err(VoiceError::Config(
                "capture frame size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
