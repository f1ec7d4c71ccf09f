//! Recording collaborators for handler tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{CoreResult, RelayError};
use crate::model::{ChannelEvent, MessageUpdate, ThreadRef, ToolOutput};
use crate::platform::{ChannelEvents, ChatClient};
use crate::provider::AssistantRuns;
use crate::stream::{AssistantEvent, BoxStreamEv};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Update { message_id: String, update: MessageUpdate },
    Event(ChannelEvent),
}

/// Chat client + channel that records every call in order.
#[derive(Default)]
pub struct RecordingChat {
    pub calls: Mutex<Vec<Call>>,
    pub fail_updates: AtomicBool,
    /// Fail this many upcoming message updates, then succeed.
    pub fail_next_updates: AtomicUsize,
    pub fail_events: AtomicBool,
}

impl RecordingChat {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update { update, .. } => Some(update.set.text),
                Call::Event(_) => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Event(e) => Some(e),
                Call::Update { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn partial_update_message(
        &self,
        message_id: &str,
        update: MessageUpdate,
    ) -> CoreResult<()> {
        self.calls.lock().unwrap().push(Call::Update {
            message_id: message_id.to_string(),
            update,
        });
        let fail_once = self
            .fail_next_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_once || self.fail_updates.load(Ordering::SeqCst) {
            return Err(RelayError::Collaborator {
                operation: "partial_update_message",
                message: "update rejected".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChannelEvents for RecordingChat {
    async fn send_event(&self, event: ChannelEvent) -> CoreResult<()> {
        self.calls.lock().unwrap().push(Call::Event(event));
        if self.fail_events.load(Ordering::SeqCst) {
            return Err(RelayError::Collaborator {
                operation: "send_event",
                message: "channel closed".into(),
            });
        }
        Ok(())
    }
}

/// Assistant whose tool-output submissions replay queued event scripts.
#[derive(Default)]
pub struct ScriptedAssistant {
    pub cancels: Mutex<Vec<(String, String)>>,
    pub submissions: Mutex<Vec<(String, Vec<ToolOutput>)>>,
    pub resumed: Mutex<VecDeque<Vec<AssistantEvent>>>,
    pub fail_cancel: AtomicBool,
}

impl ScriptedAssistant {
    pub fn resume_with(&self, events: Vec<AssistantEvent>) {
        self.resumed.lock().unwrap().push_back(events);
    }

    pub fn cancels(&self) -> Vec<(String, String)> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantRuns for ScriptedAssistant {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn cancel_run(&self, thread: &ThreadRef, run_id: &str) -> CoreResult<()> {
        self.cancels
            .lock()
            .unwrap()
            .push((thread.id.clone(), run_id.to_string()));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(RelayError::ProviderError {
                provider: "scripted".into(),
                code: "400".into(),
                message: "run already completed".into(),
            });
        }
        Ok(())
    }

    async fn submit_tool_outputs(
        &self,
        _thread: &ThreadRef,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> CoreResult<BoxStreamEv> {
        self.submissions
            .lock()
            .unwrap()
            .push((run_id.to_string(), outputs));
        match self.resumed.lock().unwrap().pop_front() {
            Some(events) => Ok(futures::stream::iter(events).boxed()),
            None => Err(RelayError::ProviderUnavailable {
                provider: "scripted".into(),
            }),
        }
    }
}

/// Stream that yields each event after the paired delay (in ms).
pub fn timed(events: Vec<(u64, AssistantEvent)>) -> BoxStreamEv {
    futures::stream::unfold(events.into_iter(), |mut it| async move {
        let (delay_ms, ev) = it.next()?;
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        Some((ev, it))
    })
    .boxed()
}

pub fn delta(text: &str) -> AssistantEvent {
    AssistantEvent::MessageDelta {
        text: text.to_string(),
    }
}

pub fn run_created(run_id: &str) -> AssistantEvent {
    AssistantEvent::RunCreated {
        run_id: run_id.to_string(),
    }
}
