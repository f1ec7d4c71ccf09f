//! Relays one assistant run into one chat message.
//!
//! A [`StreamResponseHandler`] consumes the run's event stream, keeps the chat
//! message text in step with it (partial pushes at most once per flush interval,
//! one unconditional final push), drives the channel's AI indicator, and honours
//! the platform "stop generating" signal. Completion, cancellation and failure
//! all end in [`StreamResponseHandler::dispose`], whose side effects run once.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_futures::Instrument;

use crate::config::HandlerCfg;
use crate::error::{CoreResult, RelayError};
use crate::model::{
    AiState, ChannelEvent, MessageRef, MessageUpdate, RunStepKind, StopEvent, ThreadRef,
};
use crate::platform::{ChannelEvents, ChatClient, ListenerId, StopBus};
use crate::provider::AssistantRuns;
use crate::stream::{AssistantEvent, BoxStreamEv};
use crate::telemetry::{self, Outcome, RelayLog};
use crate::tools::ToolRegistry;

/// Message text used when an error renders to nothing.
pub const ERROR_FALLBACK_TEXT: &str = "Error generating the message";

/// Lifecycle of a handler. `Completed`, `Cancelled` and `Errored` are terminal;
/// every path ends in `Disposed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Errored,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Event,
    Complete,
    Stop,
    Fail,
    Dispose,
}

impl Phase {
    fn next(self, trigger: Trigger) -> Option<Phase> {
        use Phase::*;
        match (self, trigger) {
            (Idle | Streaming, Trigger::Event) => Some(Streaming),
            (Idle | Streaming, Trigger::Complete) => Some(Completed),
            (Idle | Streaming, Trigger::Stop) => Some(Cancelled),
            // A completion whose final push failed still surfaces as an error.
            (Idle | Streaming | Completed, Trigger::Fail) => Some(Errored),
            (Disposed, Trigger::Dispose) => None,
            (_, Trigger::Dispose) => Some(Disposed),
            (Completed | Cancelled | Errored | Disposed, Trigger::Event)
            | (Completed | Cancelled | Errored | Disposed, Trigger::Complete)
            | (Completed | Cancelled | Errored | Disposed, Trigger::Stop)
            | (Cancelled | Errored | Disposed, Trigger::Fail) => None,
        }
    }

    /// True once the handler stopped reacting to stream events.
    pub fn is_settled(self) -> bool {
        !matches!(self, Phase::Idle | Phase::Streaming)
    }

    fn outcome(self) -> Outcome {
        match self {
            Phase::Completed => Outcome::Completed,
            Phase::Cancelled => Outcome::Cancelled,
            Phase::Errored => Outcome::Errored,
            Phase::Idle | Phase::Streaming | Phase::Disposed => Outcome::Abandoned,
        }
    }
}

struct HandlerState {
    phase: Phase,
    accumulated_text: String,
    chunk_count: u64,
    run_id: Option<String>,
    last_flush: Instant,
    error_kind: Option<&'static str>,
}

impl HandlerState {
    /// Apply a trigger; returns the phase it left, or `None` if not allowed.
    fn apply(&mut self, trigger: Trigger) -> Option<Phase> {
        let next = self.phase.next(trigger)?;
        let prev = self.phase;
        self.phase = next;
        Some(prev)
    }
}

/// Everything a handler is bound to.
pub struct HandlerParts {
    pub assistant: Arc<dyn AssistantRuns>,
    pub thread: ThreadRef,
    pub stream: BoxStreamEv,
    pub chat: Arc<dyn ChatClient>,
    pub stop_bus: StopBus,
    pub channel: Arc<dyn ChannelEvents>,
    pub message: MessageRef,
}

#[derive(Clone)]
pub struct HandlerOptions {
    pub flush_interval: Duration,
    pub tools: ToolRegistry,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self::from_config(&HandlerCfg::default(), ToolRegistry::new())
    }
}

impl HandlerOptions {
    pub fn from_config(cfg: &HandlerCfg, tools: ToolRegistry) -> Self {
        Self {
            flush_interval: cfg.flush_interval(),
            tools,
        }
    }
}

type DisposeFn = Box<dyn FnOnce() + Send>;

pub struct StreamResponseHandler {
    assistant: Arc<dyn AssistantRuns>,
    thread: ThreadRef,
    chat: Arc<dyn ChatClient>,
    channel: Arc<dyn ChannelEvents>,
    message: MessageRef,
    stop_bus: StopBus,
    listener: ListenerId,
    stop_events: Mutex<Option<UnboundedReceiver<StopEvent>>>,
    stream: Mutex<Option<BoxStreamEv>>,
    pending_flush: Mutex<Option<JoinHandle<()>>>,
    tools: ToolRegistry,
    flush_interval: Duration,
    state: Mutex<HandlerState>,
    on_dispose: Mutex<Option<DisposeFn>>,
    started: Instant,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn next_stop(rx: &mut Option<UnboundedReceiver<StopEvent>>) -> Option<StopEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl StreamResponseHandler {
    /// Create a handler with the default 1s flush interval and no tools.
    pub fn new(parts: HandlerParts, on_dispose: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Self::with_options(parts, HandlerOptions::default(), on_dispose)
    }

    /// Create a handler and register its stop listener on the bus.
    pub fn with_options(
        parts: HandlerParts,
        options: HandlerOptions,
        on_dispose: impl FnOnce() + Send + 'static,
    ) -> Arc<Self> {
        let listener = parts.stop_bus.on();
        let now = Instant::now();
        Arc::new(Self {
            assistant: parts.assistant,
            thread: parts.thread,
            chat: parts.chat,
            channel: parts.channel,
            message: parts.message,
            stop_bus: parts.stop_bus,
            listener: listener.id,
            stop_events: Mutex::new(Some(listener.events)),
            stream: Mutex::new(Some(parts.stream)),
            pending_flush: Mutex::new(None),
            tools: options.tools,
            flush_interval: options.flush_interval,
            state: Mutex::new(HandlerState {
                phase: Phase::Idle,
                accumulated_text: String::new(),
                chunk_count: 0,
                run_id: None,
                last_flush: now,
                error_kind: None,
            }),
            on_dispose: Mutex::new(Some(Box::new(on_dispose))),
            started: now,
        })
    }

    pub fn message(&self) -> &MessageRef {
        &self.message
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn run_id(&self) -> Option<String> {
        lock(&self.state).run_id.clone()
    }

    pub fn accumulated_text(&self) -> String {
        lock(&self.state).accumulated_text.clone()
    }

    pub fn chunk_count(&self) -> u64 {
        lock(&self.state).chunk_count
    }

    /// Consume the event stream until the handler settles or the stream ends.
    /// Never fails; errors are turned into the error transition.
    pub async fn run(&self) {
        let span = tracing::info_span!(
            "relay",
            message_id = %self.message.id,
            thread_id = %self.thread.id,
        );
        self.consume().instrument(span).await
    }

    async fn consume(&self) {
        let Some(mut stream) = lock(&self.stream).take() else {
            warn!("stream already consumed");
            return;
        };
        let mut stop_events = lock(&self.stop_events).take();

        while !self.phase().is_settled() {
            tokio::select! {
                biased;
                Some(ev) = next_stop(&mut stop_events) => {
                    self.stop_generating(&ev).await;
                }
                next = stream.next() => match next {
                    Some(ev) => {
                        let terminal = ev.is_terminal();
                        let handled = self
                            .until_stopped(&mut stop_events, self.handle_event(ev, &mut stream))
                            .await;
                        if let Some(Err(e)) = handled {
                            self.handle_error(e).await;
                        }
                        if terminal {
                            break;
                        }
                    }
                    None => {
                        if let Err(e) = self.finish_stream().await {
                            self.handle_error(e).await;
                        }
                        break;
                    }
                },
            }
        }
    }

    /// Drive `work` to the end unless a stop for this message claims the handler
    /// first, in which case `work` is dropped where it stands.
    async fn until_stopped<T>(
        &self,
        stop_events: &mut Option<UnboundedReceiver<StopEvent>>,
        work: impl Future<Output = T>,
    ) -> Option<T> {
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                Some(ev) = next_stop(stop_events) => {
                    if self.stop_generating(&ev).await {
                        return None;
                    }
                }
                out = &mut work => return Some(out),
            }
        }
    }

    async fn handle_event(&self, ev: AssistantEvent, stream: &mut BoxStreamEv) -> CoreResult<()> {
        match ev {
            AssistantEvent::RunCreated { run_id } => {
                let mut st = lock(&self.state);
                if st.apply(Trigger::Event).is_none() {
                    return Ok(());
                }
                if st.run_id.is_none() {
                    debug!(run_id = %run_id, "run created");
                    st.run_id = Some(run_id);
                } else {
                    debug!(ignored = %run_id, "run id already set");
                }
            }
            AssistantEvent::MessageDelta { text } => {
                let flush = {
                    let mut st = lock(&self.state);
                    if st.apply(Trigger::Event).is_none() {
                        return Ok(());
                    }
                    st.accumulated_text.push_str(&text);
                    st.chunk_count += 1;
                    let now = Instant::now();
                    if now.duration_since(st.last_flush) > self.flush_interval {
                        st.last_flush = now;
                        Some(st.accumulated_text.clone())
                    } else {
                        None
                    }
                };
                if let Some(text) = flush {
                    self.spawn_partial_update(text);
                }
            }
            AssistantEvent::MessageCompleted(done) => {
                self.complete(done.text().map(str::to_string)).await?;
            }
            AssistantEvent::RunStepCreated { kind } => {
                if lock(&self.state).apply(Trigger::Event).is_none() {
                    return Ok(());
                }
                if kind == RunStepKind::MessageCreation {
                    self.send_event(ChannelEvent::indicator(&self.message, AiState::Generating))
                        .await;
                }
            }
            AssistantEvent::RequiresAction { run_id, tool_calls } => {
                if lock(&self.state).apply(Trigger::Event).is_none() {
                    return Ok(());
                }
                info!(run_id = %run_id, calls = tool_calls.len(), "run requires tool outputs");
                if self.tools.is_empty() {
                    warn!("run requested tool outputs but no tools are registered");
                }
                self.send_event(ChannelEvent::indicator(
                    &self.message,
                    AiState::ExternalSources,
                ))
                .await;
                let outputs = self.tools.execute(&tool_calls).await;
                *stream = self
                    .assistant
                    .submit_tool_outputs(&self.thread, &run_id, outputs)
                    .await?;
            }
            AssistantEvent::Error(e) => return Err(e),
            AssistantEvent::Other(name) => {
                if lock(&self.state).apply(Trigger::Event).is_some() {
                    debug!(event = %name, "ignoring stream event");
                }
            }
        }
        Ok(())
    }

    /// Terminal success: push the final text unconditionally, clear the indicator, dispose.
    async fn complete(&self, provided: Option<String>) -> CoreResult<()> {
        let text = {
            let mut st = lock(&self.state);
            if st.apply(Trigger::Complete).is_none() {
                return Ok(());
            }
            provided.unwrap_or_else(|| st.accumulated_text.clone())
        };
        info!(len = text.len(), "message completed");
        self.settle_partial_updates().await;
        self.chat
            .partial_update_message(&self.message.id, MessageUpdate::text(text))
            .await?;
        self.send_event(ChannelEvent::clear(&self.message)).await;
        self.dispose();
        Ok(())
    }

    /// Stream ended without a completion event: whatever accumulated is final.
    async fn finish_stream(&self) -> CoreResult<()> {
        let text = {
            let mut st = lock(&self.state);
            if st.apply(Trigger::Complete).is_none() {
                return Ok(());
            }
            st.accumulated_text.clone()
        };
        info!(len = text.len(), "stream ended without completion event");
        self.settle_partial_updates().await;
        if !text.is_empty() {
            self.chat
                .partial_update_message(&self.message.id, MessageUpdate::text(text))
                .await?;
        }
        self.send_event(ChannelEvent::clear(&self.message)).await;
        self.dispose();
        Ok(())
    }

    /// React to a platform stop signal. Events for other messages are ignored.
    pub async fn handle_stop_generating(&self, event: &StopEvent) {
        self.stop_generating(event).await;
    }

    /// Returns true when this stop claimed the handler.
    async fn stop_generating(&self, event: &StopEvent) -> bool {
        if event.message_id != self.message.id {
            return false;
        }
        let run_id = {
            let mut st = lock(&self.state);
            if st.apply(Trigger::Stop).is_none() {
                return false;
            }
            st.run_id.clone()
        };

        info!(message_id = %self.message.id, "stopping generation");

        let provider = self.assistant.name();
        match run_id {
            Some(run_id) => {
                if let Err(e) = self.assistant.cancel_run(&self.thread, &run_id).await {
                    warn!(provider, run_id = %run_id, error = %e, "failed to cancel run");
                }
            }
            None => info!(provider, "no run to cancel yet"),
        }

        self.send_event(ChannelEvent::clear(&self.message)).await;
        self.dispose();
        true
    }

    /// Report a failure on the message and dispose.
    pub async fn handle_error(&self, err: RelayError) {
        {
            let mut st = lock(&self.state);
            if st.apply(Trigger::Fail).is_none() {
                debug!(error = %err, "error after settle ignored");
                return;
            }
            st.error_kind = Some(err.kind());
        }

        error!(error = %err, kind = err.kind(), "response generation failed");
        self.settle_partial_updates().await;

        self.send_event(ChannelEvent::indicator(&self.message, AiState::Error))
            .await;

        let text = match err.to_string() {
            s if s.trim().is_empty() => ERROR_FALLBACK_TEXT.to_string(),
            s => s,
        };
        let detail = json!({ "kind": err.kind(), "message": err.to_string() }).to_string();
        if let Err(e) = self
            .chat
            .partial_update_message(&self.message.id, MessageUpdate::failure(text, detail))
            .await
        {
            warn!(error = %e, "failed to write error to message");
        }

        self.dispose();
    }

    /// Release the stop listener and run the owner's callback. Only the first call does anything.
    pub fn dispose(&self) {
        let (prev, log) = {
            let mut st = lock(&self.state);
            let Some(prev) = st.apply(Trigger::Dispose) else {
                return;
            };
            let log = RelayLog {
                message_id: self.message.id.clone(),
                run_id: st.run_id.clone(),
                outcome: prev.outcome(),
                chunk_count: st.chunk_count,
                text_len: st.accumulated_text.len(),
                elapsed_ms: self.started.elapsed().as_millis() as u64,
                error_kind: st.error_kind.map(str::to_string),
            };
            (prev, log)
        };

        self.stop_bus.off(self.listener);
        if let Some(flush) = lock(&self.pending_flush).take() {
            flush.abort();
        }
        if let Some(cb) = lock(&self.on_dispose).take() {
            cb();
        }
        debug!(from = ?prev, chunks = log.chunk_count, "handler disposed");
        telemetry::emit(log);
    }

    /// Push partial text without holding up the stream. Pushes are chained so
    /// they land in order.
    fn spawn_partial_update(&self, text: String) {
        let chat = self.chat.clone();
        let message_id = self.message.id.clone();
        let mut pending = lock(&self.pending_flush);
        let previous = pending.take();
        let push = async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if let Err(e) = chat
                .partial_update_message(&message_id, MessageUpdate::text(text))
                .await
            {
                warn!(error = %e, "partial message update failed");
            }
        };
        *pending = Some(tokio::spawn(push.in_current_span()));
    }

    /// Wait for an in-flight partial push so it cannot overwrite what follows.
    async fn settle_partial_updates(&self) {
        let pending = lock(&self.pending_flush).take();
        if let Some(flush) = pending {
            let _ = flush.await;
        }
    }

    async fn send_event(&self, event: ChannelEvent) {
        if let Err(e) = self.channel.send_event(event).await {
            warn!(error = %e, "failed to send channel event");
        }
    }
}
