//! Turn execution loop — the orchestrator that streams LLM responses,
//! dispatches tool calls, records telemetry, and finalizes the turn.
//!
//! Entry point: [`run_turn`] spawns the async loop and returns a bounded
//! channel of [`CanonicalEvent`]s. The single consumer (the WebSocket
//! pump, or a test) reads events in emission order; a full channel
//! blocks the loop, which paces the LLM stream read.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use parley_domain::error::{Error, Result};
use parley_domain::event::{CanonicalEvent, ContextInfo, SessionInfo};
use parley_domain::message::{PromptMessage, TimelineEntry, ToolCall};
use parley_domain::stream::{RawFrame, TokenUsage};
use parley_domain::wire::message_status;
use parley_llm::{ChatRequest, ChatTransport, ModelParams};
use parley_store::models::{AiModelRow, SessionRow};
use parley_store::TurnRecorder;

use crate::state::AppState;

use super::cancel::CancelToken;
use super::normalizer::ThinkSplitter;
use super::title;
use super::DEFAULT_SYSTEM_PROMPT;

/// Model used when neither the request nor the session names one.
const FALLBACK_MODEL: &str = "qwen3:8b";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
pub struct TurnInput {
    pub session_id: String,
    pub user_id: i64,
    pub user_text: String,
    /// Model override; falls back to the session's model.
    pub model_id: Option<String>,
    /// Id of the already-persisted user message, when the handler
    /// persisted one (it forms the tail of the prompt window).
    pub user_message_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the public entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one agent turn as a background task.
///
/// Registers a cancel token for `user_id:session_id` so `stop_generation`
/// can end the turn cleanly with its partial output.
pub fn run_turn(state: AppState, input: TurnInput) -> mpsc::Receiver<CanonicalEvent> {
    let (tx, rx) = mpsc::channel::<CanonicalEvent>(state.config.agent.event_channel_capacity);

    let span = tracing::info_span!(
        "turn",
        session_id = %input.session_id,
        user_id = input.user_id,
    );

    tokio::spawn(
        async move {
            let cancel = state.cancel_map.register(input.user_id, &input.session_id);
            run_turn_inner(&state, &input, &tx, &cancel).await;
            state.cancel_map.remove(input.user_id, &input.session_id);
        }
        .instrument(span),
    );

    rx
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Accumulated turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the turn accumulates while streaming, owned by the one
/// task driving it and dropped when the task ends.
struct TurnState {
    final_text: String,
    timeline: Vec<TimelineEntry>,
    /// Summed across iterations, for the done envelope's session stats.
    prompt_tokens_sum: u32,
    completion_tokens_sum: u32,
    /// The final iteration's usage: the placeholder's token figures (the
    /// next turn's prompt size equals this call's total).
    last_usage: Option<TokenUsage>,
    started: Instant,
}

impl TurnState {
    fn new() -> Self {
        Self {
            final_text: String::new(),
            timeline: Vec::new(),
            prompt_tokens_sum: 0,
            completion_tokens_sum: 0,
            last_usage: None,
            started: Instant::now(),
        }
    }

    fn generation_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn timeline_json(&self) -> Option<String> {
        if self.timeline.is_empty() {
            return None;
        }
        serde_json::to_string(&serde_json::json!({ "timeline": self.timeline })).ok()
    }
}

enum TurnEnd {
    Completed,
    Cancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inner driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    input: &TurnInput,
    tx: &mpsc::Sender<CanonicalEvent>,
    cancel: &CancelToken,
) {
    // ── INIT ─────────────────────────────────────────────────────
    eprintln!("DEBUG: run_turn_inner start");
    if input.user_text.trim().is_empty() {
        emit_rejection(tx, &input.session_id, &Error::EmptyInput).await;
        return;
    }

    eprintln!("DEBUG: before get_session");
    let session = match state.store.get_session(&input.session_id, input.user_id).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            emit_rejection(
                tx,
                &input.session_id,
                &Error::NotFound(format!("session {}", input.session_id)),
            )
            .await;
            return;
        }
        Err(e) => {
            emit_rejection(tx, &input.session_id, &Error::from(e)).await;
            return;
        }
    };

    let model_id = input
        .model_id
        .clone()
        .or_else(|| session.ai_model.clone())
        .unwrap_or_else(|| FALLBACK_MODEL.to_string());
    let model = match state.store.get_model(&model_id).await {
        Ok(Some(m)) => m,
        Ok(None) => {
            emit_rejection(
                tx,
                &input.session_id,
                &Error::NotFound(format!("model {model_id}")),
            )
            .await;
            return;
        }
        Err(e) => {
            emit_rejection(tx, &input.session_id, &Error::from(e)).await;
            return;
        }
    };

    eprintln!("DEBUG: before recorder begin");
    let mut recorder =
        match TurnRecorder::begin(state.store.database(), &session.session_id, &model.model_id)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                emit_rejection(tx, &input.session_id, &Error::from(e)).await;
                return;
            }
        };
    let message_id = recorder.message_id().to_string();

    send(tx, CanonicalEvent::TurnStarted {
        message_id: message_id.clone(),
    })
    .await;

    let mut turn = TurnState::new();
    let deadline = tokio::time::Instant::now()
        + std::time::Duration::from_secs(state.config.agent.turn_deadline_secs);

    eprintln!("DEBUG: before drive_iterations");
    let result = drive_iterations(
        state,
        input,
        &session,
        &model,
        tx,
        cancel,
        &mut recorder,
        &mut turn,
        deadline,
    )
    .await;

    // ── FINALIZE / ERROR ─────────────────────────────────────────
    match result {
        Ok(TurnEnd::Completed) => {
            finalize_turn(
                state, tx, &session, &model, recorder, &turn, &message_id,
                message_status::COMPLETED,
            )
            .await;
        }
        Ok(TurnEnd::Cancelled) => {
            tracing::info!("turn cancelled by client");
            send(tx, CanonicalEvent::Info {
                kind: "cancelled".into(),
            })
            .await;
            finalize_turn(
                state, tx, &session, &model, recorder, &turn, &message_id,
                message_status::ERROR,
            )
            .await;
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), error = %e, "turn failed");
            send(tx, CanonicalEvent::Error {
                kind: e.kind().into(),
                message: e.to_string(),
            })
            .await;
            finalize_turn(
                state, tx, &session, &model, recorder, &turn, &message_id,
                message_status::ERROR,
            )
            .await;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Iteration loop: ASSEMBLE → (CALL_LLM → STREAM → DISPATCH_TOOLS)*
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[allow(clippy::too_many_arguments)]
async fn drive_iterations(
    state: &AppState,
    input: &TurnInput,
    session: &SessionRow,
    model: &AiModelRow,
    tx: &mpsc::Sender<CanonicalEvent>,
    cancel: &CancelToken,
    recorder: &mut TurnRecorder,
    turn: &mut TurnState,
    deadline: tokio::time::Instant,
) -> Result<TurnEnd> {
    eprintln!("DEBUG: drive_iterations start");
    let transport = state.transports.for_model(&session.session_id, model).await;
    eprintln!("DEBUG: got transport");

    // ── ASSEMBLE ─────────────────────────────────────────────────
    if state.context.should_summarize(session, model) {
        match state
            .context
            .summarize(session, transport.as_ref(), input.user_message_id.as_deref())
            .await
        {
            Ok(_) => {}
            Err(e) if session.current_context_tokens >= model.max_context_length => {
                return Err(Error::ContextOverflow(format!(
                    "session over budget and summarization failed: {e}"
                )));
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed; continuing with full history");
            }
        }
    }

    let mut messages = assemble_messages(state, input, session).await?;
    eprintln!("DEBUG: assembled messages, count={}", messages.len());
    let tool_defs = if model.supports_tools {
        state.hub.tool_definitions()
    } else {
        Vec::new()
    };
    let params = ModelParams {
        temperature: session.temperature,
        max_tokens: session.max_tokens.map(|m| m as u32),
    };

    // ── Iterations ───────────────────────────────────────────────
    let max_iterations = state.config.agent.max_iterations;
    for iteration in 1..=max_iterations {
        eprintln!("DEBUG: iteration {iteration}");
        if cancel.is_cancelled() {
            return Ok(TurnEnd::Cancelled);
        }

        tracing::debug!(iteration, "LLM call");
        let llm_span = tracing::info_span!(
            "llm.call",
            iteration,
            model = %model.model_id,
        );

        let t0 = Instant::now();
        let mut stream = transport
            .stream_chat(ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                params: params.clone(),
            })
            .instrument(llm_span.clone())
            .await?;

        let mut splitter = ThinkSplitter::new();
        let mut thinking_bufs: HashMap<String, String> = HashMap::new();
        let mut iteration_text = String::new();
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut usage: Option<TokenUsage> = None;
        let mut finish_reason: Option<String> = None;

        // ── STREAM ───────────────────────────────────────────────
        loop {
            if cancel.is_cancelled() {
                return Ok(TurnEnd::Cancelled);
            }

            let frame = match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => return Err(Error::Timeout("turn deadline exceeded".into())),
                Ok(None) => break,
                Ok(Some(frame)) => frame?,
            };

            // Sampled again here so a stop that landed while the frame
            // was in flight wins before any of its events go out.
            if cancel.is_cancelled() {
                return Ok(TurnEnd::Cancelled);
            }

            match frame {
                RawFrame::MessageDelta { content } => {
                    for event in splitter.push(&content) {
                        track_split_event(turn, &mut thinking_bufs, &mut iteration_text, &event);
                        send(tx, event).await;
                    }
                }
                RawFrame::ToolCallBlock { calls } => {
                    for raw in calls {
                        let call = ToolCall {
                            tool_id: Uuid::new_v4().to_string(),
                            tool_name: raw.name,
                            arguments: raw.arguments,
                        };
                        send(tx, CanonicalEvent::ToolCall {
                            tool_id: call.tool_id.clone(),
                            name: call.tool_name.clone(),
                            args: call.arguments.clone(),
                        })
                        .await;
                        pending_calls.push(call);
                    }
                }
                RawFrame::Usage(u) => {
                    usage = Some(u);
                }
                RawFrame::Done { finish_reason: fr } => {
                    finish_reason = fr;
                    break;
                }
            }
        }

        // Flush any text the splitter still holds (stream ended early or
        // with a dangling partial tag).
        for event in splitter.finish() {
            track_split_event(turn, &mut thinking_bufs, &mut iteration_text, &event);
            send(tx, event).await;
        }

        // Duration covers call start through receipt of the usage frame.
        let duration_ms = t0.elapsed().as_millis() as i64;
        let u = usage.unwrap_or_default();
        turn.prompt_tokens_sum += u.prompt_tokens;
        turn.completion_tokens_sum += u.completion_tokens;
        turn.last_usage = Some(u);

        let (llm_seq, session_total) = recorder
            .record_llm_invocation(
                u.prompt_tokens as i64,
                u.completion_tokens as i64,
                duration_ms,
                finish_reason.as_deref(),
            )
            .await
            .map_err(Error::from)?;

        let context_usage_percent = if model.max_context_length > 0 {
            (session_total as f64 / model.max_context_length as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };
        send(tx, CanonicalEvent::LlmInvocationComplete {
            sequence: llm_seq,
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens(),
            duration_ms: duration_ms.max(0) as u64,
            finish_reason: finish_reason.clone(),
            session_total_tokens: session_total.max(0) as u64,
            context_usage_percent,
        })
        .await;

        if !iteration_text.is_empty() {
            turn.timeline.push(TimelineEntry::Content {
                text: iteration_text.clone(),
                timestamp: Utc::now(),
            });
        }

        // No tool calls: the iteration produced the final answer.
        if pending_calls.is_empty() {
            return Ok(TurnEnd::Completed);
        }

        // ── DISPATCH_TOOLS ───────────────────────────────────────
        messages.push(PromptMessage::assistant_tool_calls(
            iteration_text.clone(),
            pending_calls.clone(),
        ));

        for call in &pending_calls {
            if cancel.is_cancelled() {
                return Ok(TurnEnd::Cancelled);
            }

            dispatch_one_tool(state, tx, recorder, turn, &mut messages, llm_seq, call).await?;
        }
    }

    Err(Error::MaxIterations(max_iterations))
}

/// Dispatch one tool call: insert the pending row, call the hub, update
/// the row, emit the result event, and extend the in-memory history.
async fn dispatch_one_tool(
    state: &AppState,
    tx: &mpsc::Sender<CanonicalEvent>,
    recorder: &mut TurnRecorder,
    turn: &mut TurnState,
    messages: &mut Vec<PromptMessage>,
    llm_seq: i64,
    call: &ToolCall,
) -> Result<()> {
    let tool_seq = recorder
        .insert_tool_invocation(llm_seq, &call.tool_name, &call.arguments)
        .await
        .map_err(Error::from)?;

    let tool_span = tracing::info_span!("tool.call", tool_name = %call.tool_name);
    let t0 = Instant::now();
    let outcome = state
        .hub
        .call_tool(&call.tool_name, &call.arguments, None)
        .instrument(tool_span)
        .await;
    // Cache hits may legitimately record zero.
    let duration_ms = t0.elapsed().as_millis() as i64;

    let text = outcome.result.joined_text();
    let result_value: Value =
        serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "text": text }));

    if outcome.result.is_error {
        recorder
            .fail_tool_invocation(tool_seq, &text, duration_ms)
            .await
            .map_err(Error::from)?;
    } else {
        recorder
            .complete_tool_invocation(tool_seq, &result_value, outcome.cache_hit, duration_ms)
            .await
            .map_err(Error::from)?;
    }

    turn.timeline.push(TimelineEntry::ToolCall {
        tool_id: call.tool_id.clone(),
        tool_name: call.tool_name.clone(),
        tool_args: call.arguments.clone(),
        status: if outcome.result.is_error {
            "error".into()
        } else {
            "success".into()
        },
        result: Some(result_value.clone()),
        timestamp: Utc::now(),
    });

    send(tx, CanonicalEvent::ToolResult {
        tool_id: call.tool_id.clone(),
        name: call.tool_name.clone(),
        result: result_value,
        cache_hit: outcome.cache_hit,
        is_error: outcome.result.is_error,
    })
    .await;

    // The result is fed back to the LLM even on error so the loop can
    // recover.
    messages.push(PromptMessage::tool_result(&call.tool_id, text));
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the prompt: system prompt, the context window, and the new user
/// text at the tail (unless the persisted user message is already there).
async fn assemble_messages(
    state: &AppState,
    input: &TurnInput,
    session: &SessionRow,
) -> Result<Vec<PromptMessage>> {
    let system_prompt = match state.kv.get_user_pref(input.user_id, "system_prompt") {
        Some(cached) => cached,
        None => {
            let prompt = session
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
            state.kv.save_user_pref(
                input.user_id,
                "system_prompt",
                &prompt,
                std::time::Duration::from_secs(state.config.kv.user_pref_ttl_secs),
            );
            prompt
        }
    };

    let mut messages = vec![PromptMessage::system(system_prompt)];
    let mut saw_user_message = false;

    for row in state.context.build_window(session).await? {
        if input.user_message_id.as_deref() == Some(row.message_id.as_str()) {
            saw_user_message = true;
        }
        let role = row.role.parse().unwrap_or(parley_domain::message::Role::User);
        messages.push(PromptMessage {
            role,
            content: row.content,
            tool_calls: None,
            tool_call_id: None,
        });
    }

    if !saw_user_message {
        messages.push(PromptMessage::user(&input.user_text));
    }
    Ok(messages)
}

/// Fold a normalizer event into the turn accumulators.
fn track_split_event(
    turn: &mut TurnState,
    thinking_bufs: &mut HashMap<String, String>,
    iteration_text: &mut String,
    event: &CanonicalEvent,
) {
    match event {
        CanonicalEvent::ContentDelta { delta } => {
            iteration_text.push_str(delta);
            turn.final_text.push_str(delta);
        }
        CanonicalEvent::ThinkingBegin { thinking_id } => {
            thinking_bufs.insert(thinking_id.clone(), String::new());
        }
        CanonicalEvent::ThinkingDelta { thinking_id, delta } => {
            thinking_bufs
                .entry(thinking_id.clone())
                .or_default()
                .push_str(delta);
        }
        CanonicalEvent::ThinkingEnd { thinking_id } => {
            let content = thinking_bufs.remove(thinking_id).unwrap_or_default();
            turn.timeline.push(TimelineEntry::Thinking {
                thinking_id: thinking_id.clone(),
                content,
                timestamp: Utc::now(),
            });
        }
        _ => {}
    }
}

async fn send(tx: &mpsc::Sender<CanonicalEvent>, event: CanonicalEvent) {
    // A dropped receiver must not abort the turn — persistence still runs.
    let _ = tx.send(event).await;
}

/// Commit the turn (success or failure status) and emit the terminal
/// `done` event. A failed commit becomes a `persistence` error followed
/// by a zeroed `done`.
#[allow(clippy::too_many_arguments)]
async fn finalize_turn(
    state: &AppState,
    tx: &mpsc::Sender<CanonicalEvent>,
    session: &SessionRow,
    model: &AiModelRow,
    recorder: TurnRecorder,
    turn: &TurnState,
    message_id: &str,
    status: i32,
) {
    let usage = turn.last_usage.unwrap_or_default();
    let timeline_json = turn.timeline_json();
    let generation_time = turn.generation_time();

    let committed = if status == message_status::COMPLETED {
        recorder
            .finalize_completed(
                &turn.final_text,
                usage.prompt_tokens as i64,
                usage.completion_tokens as i64,
                generation_time,
                timeline_json.as_deref(),
            )
            .await
    } else {
        recorder
            .finalize_error(
                &turn.final_text,
                usage.prompt_tokens as i64,
                usage.completion_tokens as i64,
                generation_time,
                timeline_json.as_deref(),
            )
            .await
    };

    let totals = match committed {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "turn commit failed; rolling back");
            send(tx, CanonicalEvent::Error {
                kind: "persistence".into(),
                message: e.to_string(),
            })
            .await;
            send(tx, CanonicalEvent::Done {
                message_id: message_id.to_string(),
                status: message_status::ERROR,
                generation_time,
                context_info: ContextInfo {
                    current_context_tokens: session.current_context_tokens.max(0) as u64,
                    max_context_tokens: model.max_context_length.max(0) as u64,
                },
                session_info: SessionInfo {
                    session_id: session.session_id.clone(),
                    message_count: session.message_count,
                    total_prompt_tokens: 0,
                    total_completion_tokens: 0,
                    total_tokens: session.total_tokens.max(0) as u64,
                    last_activity_at: Some(session.last_activity_at),
                },
            })
            .await;
            return;
        }
    };

    // The KV summary mirror is stale once the turn lands.
    state.context.clear_summary_cache(&session.session_id);

    send(tx, CanonicalEvent::Done {
        message_id: message_id.to_string(),
        status,
        generation_time,
        context_info: ContextInfo {
            current_context_tokens: totals.current_context_tokens.max(0) as u64,
            max_context_tokens: model.max_context_length.max(0) as u64,
        },
        session_info: SessionInfo {
            session_id: session.session_id.clone(),
            message_count: totals.message_count,
            total_prompt_tokens: turn.prompt_tokens_sum as u64,
            total_completion_tokens: turn.completion_tokens_sum as u64,
            total_tokens: totals.total_tokens.max(0) as u64,
            last_activity_at: Some(totals.last_activity_at),
        },
    })
    .await;

    // First full exchange in the session: kick off title generation.
    if status == message_status::COMPLETED && totals.message_count == 2 {
        title::spawn_title_job(state.clone(), session.session_id.clone(), session.user_id);
    }
}

/// INIT-stage rejection: no placeholder exists yet, so the error frame
/// uses a fresh id and zeroed statistics.
async fn emit_rejection(tx: &mpsc::Sender<CanonicalEvent>, session_id: &str, error: &Error) {
    tracing::warn!(kind = error.kind(), error = %error, "turn rejected");
    send(tx, CanonicalEvent::Error {
        kind: error.kind().into(),
        message: error.to_string(),
    })
    .await;
    send(tx, CanonicalEvent::Done {
        message_id: Uuid::new_v4().to_string(),
        status: message_status::ERROR,
        generation_time: 0.0,
        context_info: ContextInfo {
            current_context_tokens: 0,
            max_context_tokens: 0,
        },
        session_info: SessionInfo {
            session_id: session_id.to_string(),
            message_count: 0,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            total_tokens: 0,
            last_activity_at: None,
        },
    })
    .await;
}
