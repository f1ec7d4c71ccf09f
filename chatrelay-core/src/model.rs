use serde::{Deserialize, Serialize};

/// The chat message an assistant response is streamed into.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    /// Channel id in `type:id` form.
    pub cid: String,
}

/// Provider-side conversation thread the run belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub id: String,
}

/// Generation state carried by `ai_indicator.update` events.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AiState {
    #[serde(rename = "AI_STATE_GENERATING")]
    Generating,
    #[serde(rename = "AI_STATE_EXTERNAL_SOURCES")]
    ExternalSources,
    #[serde(rename = "AI_STATE_ERROR")]
    Error,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEventType {
    #[serde(rename = "ai_indicator.update")]
    IndicatorUpdate,
    #[serde(rename = "ai_indicator.clear")]
    IndicatorClear,
}

/// Transient indicator event scoped to a channel and message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    #[serde(rename = "type")]
    pub kind: ChannelEventType,
    pub cid: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_state: Option<AiState>,
}

impl ChannelEvent {
    pub fn indicator(message: &MessageRef, state: AiState) -> Self {
        Self {
            kind: ChannelEventType::IndicatorUpdate,
            cid: message.cid.clone(),
            message_id: message.id.clone(),
            ai_state: Some(state),
        }
    }

    pub fn clear(message: &MessageRef) -> Self {
        Self {
            kind: ChannelEventType::IndicatorClear,
            cid: message.cid.clone(),
            message_id: message.id.clone(),
            ai_state: None,
        }
    }
}

/// Fields replaced on the message record by a partial update.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageFields {
    pub text: String,
    /// Serialized error detail, only set on failure.
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

/// Body of `partial_update_message`: `{"set": {...}}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MessageUpdate {
    pub set: MessageFields,
}

impl MessageUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            set: MessageFields {
                text: text.into(),
                error_detail: None,
            },
        }
    }

    pub fn failure(text: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            set: MessageFields {
                text: text.into(),
                error_detail: Some(detail.into()),
            },
        }
    }
}

/// Platform-level "stop generating" signal.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub message_id: String,
}

/// One function call the assistant asks us to execute before the run can continue.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Kind of a run step as reported by `thread.run.step.created`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStepKind {
    MessageCreation,
    ToolCalls,
    Other(String),
}

impl RunStepKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "message_creation" => Self::MessageCreation,
            "tool_calls" => Self::ToolCalls,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One content part of a completed assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Non-text part (image, file, ...) or a text part whose shape was unexpected.
    Other(String),
}

/// Payload of `thread.message.completed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletedMessage {
    pub id: Option<String>,
    pub content: Vec<ContentPart>,
}

impl CompletedMessage {
    /// Text of the first content part, if that part is text.
    pub fn text(&self) -> Option<&str> {
        match self.content.first() {
            Some(ContentPart::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }
}
