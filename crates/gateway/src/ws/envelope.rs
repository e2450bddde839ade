//! On-wire envelope for WebSocket events.
//!
//! Every server message is `{event_id, event_type, event_data}` where
//! `event_data` is a JSON-encoded *string*. `event_id` resets to zero
//! whenever the event type differs from the previously sent event and
//! increments otherwise; the state lives for exactly one user turn.

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use parley_domain::event::CanonicalEvent;
use parley_domain::wire::{content_type, event_type, message_status};

/// One on-wire message.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    /// Sequence number within the current run of same-typed events,
    /// serialized as a string for client compatibility.
    pub event_id: String,
    pub event_type: i32,
    /// JSON-encoded payload string.
    pub event_data: String,
}

impl Envelope {
    pub fn new(event_id: u64, event_type: i32, event_data: &Value) -> Self {
        Self {
            event_id: event_id.to_string(),
            event_type,
            event_data: event_data.to_string(),
        }
    }

    /// Standalone envelope outside any turn (connected, pong, title).
    pub fn standalone(event_type: i32, event_data: &Value) -> Self {
        Self::new(0, event_type, event_data)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".into())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event-id sequencing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stateful per-turn sequencer implementing the reset rule:
/// `event_id` is 0 when the type changes, previous + 1 otherwise.
#[derive(Debug, Default)]
pub struct EventSequencer {
    last_type: Option<i32>,
    current_id: u64,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, event_type: i32) -> u64 {
        if self.last_type == Some(event_type) {
            self.current_id += 1;
        } else {
            self.current_id = 0;
            self.last_type = Some(event_type);
        }
        self.current_id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical event → wire payload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-turn wrapping state: the invariant frame fields plus the
/// sequencer and the per-turn message index.
pub struct TurnEnvelopeWriter {
    conversation_id: String,
    message_id: String,
    sequencer: EventSequencer,
    message_index: u64,
}

impl TurnEnvelopeWriter {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: String::new(),
            sequencer: EventSequencer::new(),
            message_index: 0,
        }
    }

    /// Wrap one canonical event. Returns `None` for events that have no
    /// wire representation.
    pub fn wrap(&mut self, event: &CanonicalEvent) -> Option<Envelope> {
        let (code, data) = self.encode(event)?;
        let id = self.sequencer.next(code);
        self.message_index += 1;
        Some(Envelope::new(id, code, &data))
    }

    fn frame(&self, status: i32, is_finish: bool) -> Value {
        json!({
            "message_id": self.message_id,
            "conversation_id": self.conversation_id,
            "status": status,
            "is_finish": is_finish,
            "message_index": self.message_index,
        })
    }

    fn with_message(&self, status: i32, is_finish: bool, message: Value) -> Value {
        let mut data = self.frame(status, is_finish);
        data["message"] = message;
        data
    }

    fn nested(id: &str, content_type: i32, content: &Value) -> Value {
        json!({
            "id": id,
            "content_type": content_type,
            "content": content.to_string(),
        })
    }

    fn encode(&mut self, event: &CanonicalEvent) -> Option<(i32, Value)> {
        match event {
            CanonicalEvent::TurnStarted { message_id } => {
                self.message_id = message_id.clone();
                Some((
                    event_type::MESSAGE_START,
                    self.frame(message_status::PENDING, false),
                ))
            }

            CanonicalEvent::ContentDelta { delta } => {
                let nested = Self::nested(
                    &Uuid::new_v4().to_string(),
                    content_type::TEXT,
                    &json!({ "text": delta }),
                );
                let mut data = self.with_message(message_status::PENDING, false, nested);
                data["is_delta"] = json!(true);
                Some((event_type::MESSAGE_CONTENT, data))
            }

            CanonicalEvent::ThinkingBegin { thinking_id } => {
                let nested = Self::nested(
                    thinking_id,
                    content_type::THINKING,
                    &json!({ "finish_title": "thinking" }),
                );
                let mut data = self.with_message(message_status::PENDING, false, nested);
                data["is_delta"] = json!(true);
                Some((event_type::THINKING_START, data))
            }

            CanonicalEvent::ThinkingDelta { thinking_id, delta } => {
                let nested = Self::nested(
                    thinking_id,
                    content_type::THINKING,
                    &json!({ "text": delta }),
                );
                let mut data = self.with_message(message_status::PENDING, false, nested);
                data["is_delta"] = json!(true);
                Some((event_type::THINKING_DELTA, data))
            }

            CanonicalEvent::ThinkingEnd { thinking_id } => {
                let nested = Self::nested(
                    thinking_id,
                    content_type::THINKING,
                    &json!({ "finish_title": "thinking complete" }),
                );
                let data = self.with_message(message_status::COMPLETED, true, nested);
                Some((event_type::THINKING_COMPLETE, data))
            }

            CanonicalEvent::ToolCall { tool_id, name, args } => {
                let nested = Self::nested(
                    tool_id,
                    content_type::TOOL_CALL,
                    &json!({ "name": name, "args": args }),
                );
                let data = self.with_message(message_status::PENDING, false, nested);
                Some((event_type::TOOL_CALL, data))
            }

            CanonicalEvent::ToolResult {
                tool_id,
                name,
                result,
                cache_hit,
                is_error,
            } => {
                let nested = Self::nested(
                    tool_id,
                    content_type::TOOL_RESULT,
                    &json!({
                        "name": name,
                        "result": result,
                        "cache_hit": cache_hit,
                        "is_error": is_error,
                    }),
                );
                let data = self.with_message(message_status::COMPLETED, false, nested);
                Some((event_type::TOOL_RESULT, data))
            }

            CanonicalEvent::LlmInvocationComplete {
                sequence,
                prompt_tokens,
                completion_tokens,
                total_tokens,
                duration_ms,
                finish_reason,
                session_total_tokens,
                context_usage_percent,
            } => {
                let mut data = self.frame(message_status::PENDING, false);
                data["invocation"] = json!({
                    "sequence": sequence,
                    "tokens": {
                        "prompt": prompt_tokens,
                        "completion": completion_tokens,
                        "total": total_tokens,
                    },
                    "duration_ms": duration_ms,
                    "finish_reason": finish_reason,
                });
                data["session_cumulative_tokens"] = json!(session_total_tokens);
                data["context_usage_percent"] = json!(context_usage_percent);
                Some((event_type::LLM_INVOCATION_COMPLETE, data))
            }

            CanonicalEvent::SessionTitleUpdated { session_id, title } => Some((
                event_type::SESSION_TITLE_UPDATED,
                json!({
                    "session_id": session_id,
                    "conversation_id": session_id,
                    "title": title,
                }),
            )),

            CanonicalEvent::Info { kind } => {
                let nested = Self::nested(
                    &Uuid::new_v4().to_string(),
                    content_type::TEXT,
                    &json!({ "info": kind }),
                );
                let data = self.with_message(message_status::COMPLETED, false, nested);
                Some((event_type::ERROR, data))
            }

            CanonicalEvent::Error { kind, message } => {
                let nested = Self::nested(
                    &Uuid::new_v4().to_string(),
                    content_type::ERROR,
                    &json!({ "kind": kind, "error": message }),
                );
                let data = self.with_message(message_status::ERROR, true, nested);
                Some((event_type::ERROR, data))
            }

            CanonicalEvent::Done {
                message_id,
                status,
                generation_time,
                context_info,
                session_info,
            } => {
                self.message_id = message_id.clone();
                let mut data = self.frame(*status, true);
                data["generation_time"] = json!(generation_time);
                data["context_info"] = json!(context_info);
                data["session_info"] = json!(session_info);
                Some((event_type::MESSAGE_DONE, data))
            }

            // Aggregate usage rides inside the done envelope's
            // session_info; there is no separate wire event for it.
            CanonicalEvent::Usage { .. } => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parley_domain::event::{ContextInfo, SessionInfo};

    fn done_event() -> CanonicalEvent {
        CanonicalEvent::Done {
            message_id: "m1".into(),
            status: message_status::COMPLETED,
            generation_time: 0.5,
            context_info: ContextInfo {
                current_context_tokens: 4,
                max_context_tokens: 32768,
            },
            session_info: SessionInfo {
                session_id: "s1".into(),
                message_count: 2,
                total_prompt_tokens: 3,
                total_completion_tokens: 1,
                total_tokens: 4,
                last_activity_at: None,
            },
        }
    }

    #[test]
    fn sequencer_resets_on_type_change() {
        let mut seq = EventSequencer::new();
        assert_eq!(seq.next(2000), 0);
        assert_eq!(seq.next(2001), 0);
        assert_eq!(seq.next(2001), 1);
        assert_eq!(seq.next(2001), 2);
        assert_eq!(seq.next(3001), 0);
        assert_eq!(seq.next(2001), 0);
    }

    #[test]
    fn sequencer_invariant_over_random_sequence() {
        // Invariant: id == 0 iff the type differs from the previous one.
        let types = [2000, 2001, 2001, 3000, 3001, 3001, 3002, 2001, 2001, 2002];
        let mut seq = EventSequencer::new();
        let mut prev: Option<(i32, u64)> = None;
        for t in types {
            let id = seq.next(t);
            match prev {
                Some((pt, pid)) if pt == t => assert_eq!(id, pid + 1),
                Some(_) | None => assert_eq!(id, 0),
            }
            prev = Some((t, id));
        }
    }

    #[test]
    fn envelope_event_data_is_a_json_string() {
        let mut writer = TurnEnvelopeWriter::new("conv-1");
        let env = writer
            .wrap(&CanonicalEvent::TurnStarted {
                message_id: "m1".into(),
            })
            .unwrap();
        assert_eq!(env.event_type, event_type::MESSAGE_START);
        assert_eq!(env.event_id, "0");

        // event_data must itself parse as JSON carrying the frame.
        let data: Value = serde_json::from_str(&env.event_data).unwrap();
        assert_eq!(data["conversation_id"], "conv-1");
        assert_eq!(data["message_id"], "m1");
        assert_eq!(data["status"], message_status::PENDING);
    }

    #[test]
    fn content_delta_carries_nested_message() {
        let mut writer = TurnEnvelopeWriter::new("conv-1");
        let _ = writer.wrap(&CanonicalEvent::TurnStarted {
            message_id: "m1".into(),
        });
        let env = writer
            .wrap(&CanonicalEvent::ContentDelta { delta: "hi".into() })
            .unwrap();
        assert_eq!(env.event_type, event_type::MESSAGE_CONTENT);

        let data: Value = serde_json::from_str(&env.event_data).unwrap();
        assert_eq!(data["message"]["content_type"], content_type::TEXT);
        assert_eq!(data["is_delta"], true);
        let inner: Value =
            serde_json::from_str(data["message"]["content"].as_str().unwrap()).unwrap();
        assert_eq!(inner["text"], "hi");
    }

    #[test]
    fn consecutive_deltas_increment_event_id() {
        let mut writer = TurnEnvelopeWriter::new("conv");
        let _ = writer.wrap(&CanonicalEvent::TurnStarted {
            message_id: "m".into(),
        });
        let first = writer
            .wrap(&CanonicalEvent::ContentDelta { delta: "a".into() })
            .unwrap();
        let second = writer
            .wrap(&CanonicalEvent::ContentDelta { delta: "b".into() })
            .unwrap();
        assert_eq!(first.event_id, "0");
        assert_eq!(second.event_id, "1");
    }

    #[test]
    fn done_envelope_has_finish_and_stats() {
        let mut writer = TurnEnvelopeWriter::new("s1");
        let env = writer.wrap(&done_event()).unwrap();
        assert_eq!(env.event_type, event_type::MESSAGE_DONE);
        let data: Value = serde_json::from_str(&env.event_data).unwrap();
        assert_eq!(data["is_finish"], true);
        assert_eq!(data["status"], message_status::COMPLETED);
        assert_eq!(data["context_info"]["current_context_tokens"], 4);
        assert_eq!(data["session_info"]["message_count"], 2);
    }

    #[test]
    fn info_and_error_share_the_error_channel_but_differ() {
        let mut writer = TurnEnvelopeWriter::new("s1");
        let info = writer
            .wrap(&CanonicalEvent::Info {
                kind: "cancelled".into(),
            })
            .unwrap();
        let error = writer
            .wrap(&CanonicalEvent::Error {
                kind: "transport".into(),
                message: "connection reset".into(),
            })
            .unwrap();

        assert_eq!(info.event_type, event_type::ERROR);
        assert_eq!(error.event_type, event_type::ERROR);

        let info_data: Value = serde_json::from_str(&info.event_data).unwrap();
        let error_data: Value = serde_json::from_str(&error.event_data).unwrap();
        assert_eq!(info_data["message"]["content_type"], content_type::TEXT);
        assert_eq!(info_data["status"], message_status::COMPLETED);
        assert_eq!(error_data["message"]["content_type"], content_type::ERROR);
        assert_eq!(error_data["status"], message_status::ERROR);
    }

    #[test]
    fn usage_has_no_wire_representation() {
        let mut writer = TurnEnvelopeWriter::new("s1");
        assert!(writer
            .wrap(&CanonicalEvent::Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3
            })
            .is_none());
    }

    #[test]
    fn message_index_increments_per_wrapped_event() {
        let mut writer = TurnEnvelopeWriter::new("s");
        let e0 = writer
            .wrap(&CanonicalEvent::TurnStarted {
                message_id: "m".into(),
            })
            .unwrap();
        let e1 = writer
            .wrap(&CanonicalEvent::ContentDelta { delta: "x".into() })
            .unwrap();
        let d0: Value = serde_json::from_str(&e0.event_data).unwrap();
        let d1: Value = serde_json::from_str(&e1.event_data).unwrap();
        assert_eq!(d0["message_index"], 0);
        assert_eq!(d1["message_index"], 1);
    }
}
