//! Defines the WebSocket message protocol between clients and the server.

use mentor_core::action::ActionType;
use mentor_core::context::{ConversationContext, ConversationTurn};
use mentor_core::error::ErrorKind;
use mentor_core::executor::ActionExecutionRecord;
use mentor_core::quota::Tier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Identifies the connecting user. This must be the first message.
    Init { user_id: String, tier: Tier },
    /// A text message from the user to the assistant.
    UserMessage { text: String },
    /// Starts a voice recording session.
    VoiceStart,
    /// One audio chunk of the active recording (base64-encoded).
    VoiceChunk { seq: u32, data: String },
    /// Ends the recording; the assembled transcript is processed as a
    /// user message.
    VoiceStop,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms registration and provides the context snapshot to render.
    Initialized {
        session_id: Uuid,
        context: ConversationContext,
    },
    /// A turn was appended to the conversation (any session of this user).
    TurnAdded { turn: ConversationTurn },
    /// An action directive finished successfully.
    ActionCompleted {
        action_id: Uuid,
        action_type: ActionType,
        result: Value,
    },
    /// An action directive failed; `error_kind` is stable and human-readable.
    ActionFailed {
        action_id: Uuid,
        action_type: ActionType,
        error_kind: ErrorKind,
        message: String,
    },
    /// The user is close to (or at) the free-tier message limit.
    QuotaWarning { remaining: u32 },
    /// A voice recording session is open and accepting chunks.
    VoiceStarted { voice_session_id: Uuid },
    /// The assembled transcript of the recording that just ended.
    TranscriptFinal { text: String },
    /// Reports an error to the client.
    Error { message: String },
}

impl ServerMessage {
    /// The event a finished execution record fans out as. Failures are
    /// user-visible; duplicates re-emit the original outcome.
    pub fn from_record(record: &ActionExecutionRecord) -> Self {
        match &record.error {
            Some(failure) => ServerMessage::ActionFailed {
                action_id: record.action_id,
                action_type: record.action_type,
                error_kind: failure.kind,
                message: failure.message.clone(),
            },
            None => ServerMessage::ActionCompleted {
                action_id: record.action_id,
                action_type: record.action_type,
                result: record.result.clone().unwrap_or(Value::Null),
            },
        }
    }
}
