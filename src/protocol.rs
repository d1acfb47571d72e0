//! Live-model wire protocol.
//!
//! This module owns **every message that crosses the duplex channel**
//! between the session and the hosted conversational model.
//!
//! ## Message kinds
//!
//! | Message                 | Direction        | Purpose                                  |
//! |-------------------------|------------------|------------------------------------------|
//! | `setup`                 | client → model   | model, modalities, instruction, tools    |
//! | `clientContent`         | client → model   | one user turn (snapshot, directive, body)|
//! | `toolResponse`          | client → model   | batched results for one tool-call batch  |
//! | `setupComplete`         | model → client   | handshake acknowledged                   |
//! | `serverContent`         | model → client   | text/audio parts, transcripts, turn end  |
//! | `toolCall`              | model → client   | one batch of function calls              |
//! | `toolCallCancellation`  | model → client   | calls the model no longer wants answered |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with camelCase JSON.
//! 2. A single server message may carry several concerns at once; fields are
//!    optional and the session processes them in a fixed order.
//! 3. Audio travels as base64 inside `inlineData`, never as raw frames.
//! 4. Tool responses echo the call `id` so the model can correlate them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{ResponseModality, SessionConfig};

/// Prepended to every outgoing user turn.
pub const LANGUAGE_DIRECTIVE: &str = "[RESPOND IN ENGLISH ONLY]";

/// Grounding instruction sent once in the setup message.
pub const SYSTEM_INSTRUCTION: &str = "<<SYSTEM_INSTRUCTION_START>>You are an English-only AI assistant. \
LANGUAGE RULE: Respond EXCLUSIVELY in English, even if the user speaks another language.\
<<SYSTEM_INSTRUCTION_END>> You are an AI detective helping solve an escape room mystery. \
Provide concise, immersive hints and validate player actions. Each user turn starts with a \
world snapshot between [[WORLD_SNAPSHOT_START]] and [[WORLD_SNAPSHOT_END]]; use it and the \
provided tools to reason about the room. When a tool reports needsRetry, call it again once \
the player has moved. Use updateDetectiveThoughts to share your current line of reasoning. \
Remember: ALL responses must be in English.";

/// MIME types carried in `inlineData`.
pub mod mime {
    pub const RECORDED_VOICE: &str = "audio/webm";
}

// ---------------------------------------------------------------------------
// Content parts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Some("user".into()),
            parts,
        }
    }
}

// ---------------------------------------------------------------------------
// Client → model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    ClientContent(ClientContent),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<ResponseModality>,
}

/// Marker object enabling a transcription stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub tools: Vec<ToolSet>,
    pub input_audio_transcription: TranscriptionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

impl Setup {
    /// Build the setup message. Output transcription is only requested when
    /// the model replies with audio.
    pub fn new(config: &SessionConfig, declarations: Vec<FunctionDeclaration>) -> Self {
        let output_audio_transcription = match config.response_modality {
            ResponseModality::Audio => Some(TranscriptionConfig::default()),
            ResponseModality::Text => None,
        };
        Self {
            model: config.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.response_modality],
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(SYSTEM_INSTRUCTION)],
            },
            tools: vec![ToolSet {
                function_declarations: declarations,
            }],
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

impl ClientContent {
    pub fn single_turn(parts: Vec<Part>) -> Self {
        Self {
            turns: vec![Content::user(parts)],
            turn_complete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: ToolResult,
}

/// Structured payload returned for a tool call.
///
/// `success` and an optional human-readable `message` are always present;
/// tool-specific fields are flattened alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Soft failure: the caller should reissue the same call later.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub needs_retry: bool,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ToolResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            needs_retry: false,
            data: Map::new(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    /// A failure carrying an `error` field, used for dispatch-level faults.
    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(message).with("error", error.into())
    }

    pub fn retryable(mut self) -> Self {
        self.needs_retry = true;
        self
    }

    /// Attach a tool-specific field.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

// ---------------------------------------------------------------------------
// Model → client
// ---------------------------------------------------------------------------

/// One inbound event. Any combination of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallBatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_cancellation: Option<ToolCallCancellation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<Value>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_transcription: Option<Transcription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallCancellation {
    #[serde(default)]
    pub ids: Vec<String>,
}

/// Parse one inbound text frame.
pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
