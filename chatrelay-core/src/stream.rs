//! Assistant stream events consumed by the response handler.
//!
//! Contract:
//! - A run emits `RunCreated` first, then any mix of steps, deltas and tool requests.
//! - `MessageCompleted` and `Error` are terminal for the handler; anything after them is ignored.
//! - A stream may also simply end without a terminal event.
//!
//! Like the error type it carries, `AssistantEvent` is neither `Clone` nor `PartialEq`.

use crate::error::RelayError;
use crate::model::{CompletedMessage, RunStepKind, ToolCall};

#[non_exhaustive]
#[derive(Debug)]
pub enum AssistantEvent {
    /// Provider created the run; carries the id needed for cancellation.
    RunCreated { run_id: String },
    /// Partial assistant text.
    MessageDelta { text: String },
    /// Final message payload.
    MessageCompleted(CompletedMessage),
    RunStepCreated { kind: RunStepKind },
    /// The run is paused until outputs for these calls are submitted.
    RequiresAction {
        run_id: String,
        tool_calls: Vec<ToolCall>,
    },
    /// Transport/parse/provider error surfaced mid-stream.
    Error(RelayError),
    /// Any event kind the handler does not act on, by provider event name.
    Other(String),
}

impl AssistantEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageCompleted(_) | Self::Error(_))
    }
}

/// Boxed stream of assistant events. Streaming run calls return this.
pub type BoxStreamEv = futures::stream::BoxStream<'static, AssistantEvent>;
