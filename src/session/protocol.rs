//! Live service wire messages
//!
//! Outbound messages serialize to the service's JSON shape. Inbound JSON is
//! normalized into a flat [`ServerMessage`] so the session can dispatch on
//! each payload kind independently.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{ToolInvocation, ToolResult};
use crate::voice::encode_base64;
use crate::{Error, Result};

/// MIME type of outbound microphone frames
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// A message sent to the live service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// Session configuration, always the first message
    Setup(SetupMessage),
    /// One encoded microphone frame
    RealtimeInput(RealtimeInput),
    /// Reply to a tool call
    ToolResponse(ToolResponse),
}

impl ClientMessage {
    /// Wrap an encoded PCM16 frame
    #[must_use]
    pub fn audio(frame: &[u8]) -> Self {
        Self::RealtimeInput(RealtimeInput {
            audio: Blob {
                mime_type: INPUT_MIME_TYPE.to_string(),
                data: encode_base64(frame),
            },
        })
    }

    /// Wrap a tool result
    #[must_use]
    pub fn tool_result(result: ToolResult) -> Self {
        Self::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: result.id,
                name: result.name,
                response: serde_json::json!({ "result": result.result }),
            }],
        })
    }

    /// Serialize to wire JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Session setup
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupMessage {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolSet>,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

impl SetupMessage {
    /// Build an audio-response setup with transcription in both directions
    #[must_use]
    pub fn new(
        model: &str,
        voice: Option<&str>,
        instruction: String,
        declarations: Vec<FunctionDeclaration>,
    ) -> Self {
        let model = if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        };

        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: voice.map(|voice_name| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                }),
            },
            system_instruction: Content {
                parts: vec![TextPart { text: instruction }],
            },
            tools: vec![ToolSet {
                function_declarations: declarations,
            }],
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription: TranscriptionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// Response modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// A tool the service may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Empty object enabling transcription
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealtimeInput {
    pub audio: Blob,
}

/// Inline base64 media
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

/// Inbound message flattened by payload kind
///
/// A single message may carry any combination of these.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    /// Setup acknowledged; the connection is open
    pub setup_complete: bool,
    /// Latest user transcript text
    pub input_transcription: Option<String>,
    /// Latest assistant transcript text
    pub output_transcription: Option<String>,
    /// Base64 PCM16 speech chunks in arrival order
    pub audio_chunks: Vec<String>,
    /// Barge-in: stop current playback
    pub interrupted: bool,
    /// The assistant finished its turn
    pub turn_complete: bool,
    /// Tool invocations to answer
    pub tool_calls: Vec<ToolInvocation>,
    /// Server announced an imminent disconnect, with time left if given
    pub go_away: Option<String>,
}

impl ServerMessage {
    /// Parse inbound JSON text
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the text is not a valid server message
    pub fn parse(text: &str) -> Result<Self> {
        let wire: WireServerMessage =
            serde_json::from_str(text).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(wire.into())
    }

    /// Parse inbound JSON carried in a binary frame
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if the bytes are not a valid server message
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: WireServerMessage =
            serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))?;
        Ok(wire.into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerMessage {
    setup_complete: Option<Value>,
    server_content: Option<WireServerContent>,
    tool_call: Option<WireToolCall>,
    go_away: Option<WireGoAway>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireServerContent {
    model_turn: Option<WireContent>,
    input_transcription: Option<WireTranscription>,
    output_transcription: Option<WireTranscription>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    inline_data: Option<Blob>,
}

#[derive(Debug, Deserialize)]
struct WireTranscription {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireToolCall {
    #[serde(default)]
    function_calls: Vec<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGoAway {
    time_left: Option<String>,
}

impl From<WireServerMessage> for ServerMessage {
    fn from(wire: WireServerMessage) -> Self {
        let content = wire.server_content.unwrap_or_default();

        let audio_chunks = content
            .model_turn
            .map(|turn| {
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/"))
                    .map(|blob| blob.data)
                    .collect()
            })
            .unwrap_or_default();

        let tool_calls = wire
            .tool_call
            .map(|call| {
                call.function_calls
                    .into_iter()
                    .map(|fc| ToolInvocation {
                        id: fc.id,
                        name: fc.name,
                        arguments: fc.args,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            setup_complete: wire.setup_complete.is_some(),
            input_transcription: content.input_transcription.and_then(|t| t.text),
            output_transcription: content.output_transcription.and_then(|t| t.text),
            audio_chunks,
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
            tool_calls,
            go_away: wire
                .go_away
                .map(|g| g.time_left.unwrap_or_else(|| "unknown".to_string())),
        }
    }
}
