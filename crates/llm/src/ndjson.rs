//! Streaming chat transport for NDJSON chat endpoints (Ollama-compatible
//! `/api/chat`).
//!
//! One HTTP call per LLM invocation; the response body is a sequence of
//! JSON lines. Non-terminal lines carry incremental message deltas and
//! (at most once) the tool-call block; the terminal `done:true` line
//! carries token counters and the finish reason.

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use parley_domain::config::LlmConfig;
use parley_domain::error::{Error, Result};
use parley_domain::message::{PromptMessage, Role, ToolDefinition};
use parley_domain::stream::{BoxStream, RawFrame, RawToolCall, TokenUsage};

use crate::traits::{ChatRequest, ChatResponse, ChatTransport};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat transport bound to one endpoint + model pair.
///
/// Cheap to clone conceptually — instances share the pooled
/// [`reqwest::Client`] passed at construction.
pub struct NdjsonTransport {
    base_url: String,
    model: String,
    client: reqwest::Client,
    deadline: Duration,
}

/// Build the shared pooled HTTP client used by every transport instance.
pub fn build_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_keepalive)
        .build()
        .map_err(from_reqwest)
}

impl NdjsonTransport {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        client: reqwest::Client,
        config: &LlmConfig,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
            deadline: Duration::from_secs(config.request_deadline_secs),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }

        let mut options = serde_json::Map::new();
        if let Some(temp) = req.params.temperature {
            options.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.params.max_tokens {
            options.insert("num_predict".into(), serde_json::json!(max));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(self.chat_url())
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::ModelHttp {
                status: status.as_u16(),
                message: truncate(&message, 500),
            });
        }
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl ChatTransport for NdjsonTransport {
    async fn stream_chat(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<RawFrame>>> {
        let body = self.build_body(&req, true);
        let resp = self.send(&body).await?;
        let deadline = tokio::time::Instant::now() + self.deadline;
        let mut bytes = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buf: Vec<u8> = Vec::new();
            let mut tool_block_seen = false;

            loop {
                let chunk = match tokio::time::timeout_at(deadline, bytes.next()).await {
                    // Deadline expired: error out and drop the body.
                    Err(_) => {
                        yield Err(Error::Transport(
                            "stream wall-clock deadline exceeded".into(),
                        ));
                        return;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        yield Err(Error::Transport(e.to_string()));
                        return;
                    }
                    Ok(Some(Ok(chunk))) => chunk,
                };

                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match parse_line(line) {
                        Ok(frames) => {
                            for frame in frames {
                                if matches!(frame, RawFrame::ToolCallBlock { .. }) {
                                    if tool_block_seen {
                                        tracing::warn!(
                                            "endpoint sent a second tool-call block; ignoring"
                                        );
                                        continue;
                                    }
                                    tool_block_seen = true;
                                }
                                yield Ok(frame);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // A well-formed stream ends with a newline; tolerate a missing one.
            let rest = String::from_utf8_lossy(&buf);
            let rest = rest.trim();
            if !rest.is_empty() {
                match parse_line(rest) {
                    Ok(frames) => {
                        for frame in frames {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => yield Err(e),
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let body = self.build_body(&req, false);
        let resp = self.send(&body).await?;
        let value: WireLine = resp
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;

        Ok(ChatResponse {
            content: value
                .message
                .as_ref()
                .and_then(|m| m.content.clone())
                .unwrap_or_default(),
            usage: value.done.then(|| usage_from_line(&value)),
            finish_reason: value.done_reason,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire structs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WireLine {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Nanoseconds the endpoint spent evaluating the prompt; zero means
    /// the whole prompt was served from its KV cache.
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Line decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode one NDJSON line into zero or more raw frames.
///
/// Frame order within a line: tool-call block before content delta (the
/// wire never mixes them in practice), and `Usage` before `Done` on the
/// terminal line.
fn parse_line(line: &str) -> Result<Vec<RawFrame>> {
    let parsed: WireLine =
        serde_json::from_str(line).map_err(|e| Error::Decode(format!("bad stream line: {e}")))?;

    if let Some(message) = parsed.error {
        return Err(Error::Transport(message));
    }

    let mut frames = Vec::new();

    if let Some(msg) = &parsed.message {
        if let Some(calls) = &msg.tool_calls {
            if !calls.is_empty() {
                frames.push(RawFrame::ToolCallBlock {
                    calls: calls
                        .iter()
                        .map(|tc| RawToolCall {
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        })
                        .collect(),
                });
            }
        }
        if let Some(content) = &msg.content {
            if !content.is_empty() {
                frames.push(RawFrame::MessageDelta {
                    content: content.clone(),
                });
            }
        }
    }

    if parsed.done {
        frames.push(RawFrame::Usage(usage_from_line(&parsed)));
        frames.push(RawFrame::Done {
            finish_reason: parsed.done_reason.clone(),
        });
    }

    Ok(frames)
}

fn usage_from_line(line: &WireLine) -> TokenUsage {
    TokenUsage {
        prompt_tokens: line.prompt_eval_count.unwrap_or(0),
        completion_tokens: line.eval_count.unwrap_or(0),
        prompt_cache_hit: line.prompt_eval_duration == Some(0),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &PromptMessage) -> Value {
    let mut obj = serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    });

    if msg.role == Role::Assistant {
        if let Some(calls) = &msg.tool_calls {
            let wire_calls: Vec<Value> = calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "function": {
                            "name": tc.tool_name,
                            "arguments": tc.arguments,
                        }
                    })
                })
                .collect();
            obj["tool_calls"] = Value::Array(wire_calls);
        }
    }

    if let Some(id) = &msg.tool_call_id {
        obj["tool_call_id"] = Value::String(id.clone());
    }

    obj
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

// ── Small helpers ──────────────────────────────────────────────────

fn from_reqwest(e: reqwest::Error) -> Error {
    Error::Transport(e.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
