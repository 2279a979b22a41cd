//! Wire messages of the bidirectional generate-content protocol.
//!
//! Both directions carry JSON. The client sends exactly one `setup` message
//! after connecting, then a stream of `realtimeInput` audio chunks. The server
//! acknowledges with `setupComplete` and then interleaves `serverContent`
//! messages holding synthesized audio, transcriptions and turn boundaries.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::audio::EncodedAudio;
use crate::config::SessionConfig;
use crate::error::VoiceError;
use crate::transport::InboundEvent;

// =============================================================================
// Client -> server
// =============================================================================

/// Top-level client frame. Exactly one field is set per message.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realtime_input: Option<RealtimeInput>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<AudioTranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<AudioTranscriptionConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Empty marker enabling transcription of one audio direction.
#[derive(Debug, Clone, Serialize)]
pub struct AudioTranscriptionConfig {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<InlineData>,
}

impl ClientMessage {
    /// The session handshake sent immediately after connecting.
    pub fn setup(config: &SessionConfig) -> Self {
        let transcription = |enabled: bool| enabled.then_some(AudioTranscriptionConfig {});
        Self {
            setup: Some(Setup {
                model: config.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.as_str().to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: Some(config.system_instruction.clone()),
                        inline_data: None,
                    }],
                },
                input_audio_transcription: transcription(config.transcribe_input),
                output_audio_transcription: transcription(config.transcribe_output),
            }),
            ..Default::default()
        }
    }

    /// One captured audio chunk.
    pub fn audio_chunk(chunk: EncodedAudio) -> Self {
        Self {
            realtime_input: Some(RealtimeInput {
                media_chunks: vec![InlineData {
                    mime_type: chunk.mime_type,
                    data: chunk.data,
                }],
            }),
            ..Default::default()
        }
    }
}

// =============================================================================
// Server -> client
// =============================================================================

/// Top-level server frame. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

impl ServerMessage {
    /// Flatten one server frame into the session's inbound events.
    ///
    /// Transcript fragments come first, then audio payloads in part order,
    /// then the turn boundary. A part whose base64 payload is malformed
    /// yields a recoverable [`VoiceError::Decode`] event in its place.
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        let Some(content) = self.server_content else {
            return events;
        };

        if content.interrupted {
            events.push(InboundEvent::Interrupted);
        }
        if let Some(t) = content.input_transcription {
            if !t.text.is_empty() {
                events.push(InboundEvent::PartialInputTranscript(t.text));
            }
        }
        if let Some(t) = content.output_transcription {
            if !t.text.is_empty() {
                events.push(InboundEvent::PartialOutputTranscript(t.text));
            }
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                let Some(inline) = part.inline_data else {
                    continue;
                };
                if !inline.mime_type.starts_with("audio/pcm") {
                    tracing::debug!(mime = %inline.mime_type, "Ignoring non-PCM part");
                    continue;
                }
                match BASE64_STANDARD.decode(&inline.data) {
                    Ok(bytes) => events.push(InboundEvent::AudioPayload(Bytes::from(bytes))),
                    Err(e) => events.push(InboundEvent::Error(VoiceError::Decode(format!(
                        "invalid base64 audio payload: {e}"
                    )))),
                }
            }
        }
        if content.turn_complete {
            events.push(InboundEvent::TurnComplete);
        }
        events
    }
}
