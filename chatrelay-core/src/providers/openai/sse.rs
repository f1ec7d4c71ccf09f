//! Decoding of the assistants streaming API (`text/event-stream`) into `AssistantEvent`s.

use futures::StreamExt;
use serde_json::Value;

use crate::error::RelayError;
use crate::http_client::SseStream;
use crate::model::{CompletedMessage, ContentPart, RunStepKind, ToolCall};
use crate::stream::{AssistantEvent, BoxStreamEv};

/// Accumulates `event:` / `data:` lines until a blank line closes the frame.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feed one line; returns an event when the line completes a frame.
    pub fn push_line(&mut self, line: &str) -> Option<AssistantEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    /// Flush a frame left open when the body ended without a trailing blank line.
    pub fn finish(&mut self) -> Option<AssistantEvent> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<AssistantEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data).join("\n");
        match event {
            Some(name) => Some(decode_frame(&name, &data)),
            None if data.is_empty() => None,
            None => Some(AssistantEvent::Other("message".into())),
        }
    }
}

/// Map one named frame to an event. Unknown names become `Other`.
pub fn decode_frame(event: &str, data: &str) -> AssistantEvent {
    match event {
        "thread.run.created" => with_json(event, data, |v| {
            str_at(&v, "/id").map(|run_id| AssistantEvent::RunCreated { run_id })
        }),
        "thread.message.delta" => with_json(event, data, |v| {
            let text: String = v
                .pointer("/delta/content")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
                        .filter_map(|p| p.pointer("/text/value").and_then(Value::as_str))
                        .collect()
                })
                .unwrap_or_default();
            if text.is_empty() {
                Some(AssistantEvent::Other(event.to_string()))
            } else {
                Some(AssistantEvent::MessageDelta { text })
            }
        }),
        "thread.message.completed" => with_json(event, data, |v| {
            Some(AssistantEvent::MessageCompleted(completed_message(&v)))
        }),
        "thread.run.step.created" => with_json(event, data, |v| {
            str_at(&v, "/type").map(|t| AssistantEvent::RunStepCreated {
                kind: RunStepKind::parse(&t),
            })
        }),
        "thread.run.requires_action" => with_json(event, data, |v| {
            let run_id = str_at(&v, "/id")?;
            let calls = v
                .pointer("/required_action/submit_tool_outputs/tool_calls")
                .and_then(Value::as_array)?;
            let tool_calls = calls
                .iter()
                .map(|c| {
                    Some(ToolCall {
                        id: str_at(c, "/id")?,
                        name: str_at(c, "/function/name")?,
                        arguments: str_at(c, "/function/arguments").unwrap_or_default(),
                    })
                })
                .collect::<Option<Vec<_>>>()?;
            Some(AssistantEvent::RequiresAction { run_id, tool_calls })
        }),
        "thread.run.failed" => with_json(event, data, |v| {
            Some(AssistantEvent::Error(RelayError::ProviderError {
                provider: "openai".into(),
                code: str_at(&v, "/last_error/code").unwrap_or_else(|| "run_failed".into()),
                message: str_at(&v, "/last_error/message")
                    .unwrap_or_else(|| "assistant run failed".into()),
            }))
        }),
        "error" => {
            let v: Value = serde_json::from_str(data).unwrap_or(Value::Null);
            let err = v.get("error").unwrap_or(&v);
            AssistantEvent::Error(RelayError::ProviderError {
                provider: "openai".into(),
                code: str_at(err, "/code").unwrap_or_else(|| "stream_error".into()),
                message: str_at(err, "/message").unwrap_or_else(|| data.to_string()),
            })
        }
        other => AssistantEvent::Other(other.to_string()),
    }
}

fn with_json(
    event: &str,
    data: &str,
    f: impl FnOnce(Value) -> Option<AssistantEvent>,
) -> AssistantEvent {
    let decoded = serde_json::from_str::<Value>(data)
        .map_err(|e| e.to_string())
        .and_then(|v| f(v).ok_or_else(|| "unexpected shape".to_string()));
    match decoded {
        Ok(ev) => ev,
        Err(message) => AssistantEvent::Error(RelayError::Decode {
            event: event.to_string(),
            message,
        }),
    }
}

fn str_at(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn completed_message(v: &Value) -> CompletedMessage {
    let content = v
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .map(|p| {
                    let kind = p.get("type").and_then(Value::as_str).unwrap_or("unknown");
                    match (kind, p.pointer("/text/value").and_then(Value::as_str)) {
                        ("text", Some(text)) => ContentPart::Text(text.to_string()),
                        _ => ContentPart::Other(kind.to_string()),
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    CompletedMessage {
        id: str_at(v, "/id"),
        content,
    }
}

/// Turn a raw SSE line stream into assistant events. A transport error is
/// yielded as `AssistantEvent::Error` and ends the stream.
pub fn decode_events(lines: SseStream) -> BoxStreamEv {
    futures::stream::unfold(
        Some((lines, SseDecoder::default())),
        |state| async move {
            let (mut lines, mut decoder) = state?;
            loop {
                match lines.next().await {
                    Some(Ok(l)) => {
                        if let Some(ev) = decoder.push_line(&l.line) {
                            return Some((ev, Some((lines, decoder))));
                        }
                    }
                    Some(Err(e)) => return Some((AssistantEvent::Error(e), None)),
                    None => return decoder.finish().map(|ev| (ev, None)),
                }
            }
        },
    )
    .boxed()
}
