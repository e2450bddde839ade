//! End-to-end turn scenarios against a scripted LLM transport: ordering,
//! tool dispatch, cancellation, thinking blocks, and the persisted
//! telemetry each leaves behind.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{collect, delta, done, kinds, tool_block, usage, Harness, ScriptedTransport};
use parley_domain::event::CanonicalEvent;
use parley_domain::wire::message_status;
use parley_store::models::{LlmInvocationRow, ToolInvocationRow};

async fn llm_invocations(harness: &Harness, message_id: &str) -> Vec<LlmInvocationRow> {
    sqlx::query_as::<_, LlmInvocationRow>(
        "SELECT * FROM model_invocations WHERE message_id = ? ORDER BY sequence_number",
    )
    .bind(message_id)
    .fetch_all(harness.state.store.database().pool())
    .await
    .unwrap()
}

async fn tool_invocations(harness: &Harness, message_id: &str) -> Vec<ToolInvocationRow> {
    sqlx::query_as::<_, ToolInvocationRow>(
        "SELECT * FROM tool_invocations WHERE message_id = ? ORDER BY sequence_number",
    )
    .bind(message_id)
    .fetch_all(harness.state.store.database().pool())
    .await
    .unwrap()
}

fn done_of(events: &[CanonicalEvent]) -> (&String, i32, u64) {
    match events.last().expect("no events") {
        CanonicalEvent::Done {
            message_id,
            status,
            context_info,
            ..
        } => (message_id, *status, context_info.current_context_tokens),
        other => panic!("last event is not done: {other:?}"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — single turn, no tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_turn_no_tools() {
    let harness = Harness::new(vec![vec![delta("hi"), usage(3, 1), done("stop")]]).await;
    let session = harness.session().await;

    let events = harness.run_turn_collect(&session.session_id, "hello").await;
    assert_eq!(
        kinds(&events),
        vec![
            "turn_started",
            "content_delta",
            "llm_invocation_complete",
            "done"
        ]
    );

    match &events[2] {
        CanonicalEvent::LlmInvocationComplete {
            sequence,
            total_tokens,
            ..
        } => {
            assert_eq!(*sequence, 1);
            assert_eq!(*total_tokens, 4);
        }
        other => panic!("unexpected: {other:?}"),
    }

    let (message_id, status, context_tokens) = done_of(&events);
    assert_eq!(status, message_status::COMPLETED);
    assert_eq!(context_tokens, 4);

    // Persisted: one LLM invocation, no tool invocations, final message.
    let llm = llm_invocations(&harness, message_id).await;
    assert_eq!(llm.len(), 1);
    assert_eq!(llm[0].sequence_number, 1);
    assert_eq!(llm[0].total_tokens, 4);
    assert!(tool_invocations(&harness, message_id).await.is_empty());

    let message = harness
        .state
        .store
        .get_message(message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.content, "hi");
    assert_eq!(message.status, "completed");

    let session = harness
        .state
        .store
        .get_session(&session.session_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.current_context_tokens, 4);
    // user message + assistant message
    assert_eq!(session.message_count, 2);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — one tool call, then the final answer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn single_tool_call_round_trip() {
    let harness = Harness::new(vec![
        vec![
            tool_block("get_weather", json!({"city": "Beijing"})),
            usage(10, 2),
            done("tool_calls"),
        ],
        vec![delta("20°C"), usage(40, 5), done("stop")],
    ])
    .await;
    let session = harness.session().await;

    let events = harness
        .run_turn_collect(&session.session_id, "weather in Beijing?")
        .await;
    assert_eq!(
        kinds(&events),
        vec![
            "turn_started",
            "tool_call",
            "llm_invocation_complete",
            "tool_result",
            "content_delta",
            "llm_invocation_complete",
            "done"
        ]
    );

    match &events[3] {
        CanonicalEvent::ToolResult {
            name,
            result,
            is_error,
            cache_hit,
            ..
        } => {
            assert_eq!(name, "get_weather");
            assert_eq!(result["temp"], 20);
            assert!(!is_error);
            assert!(!cache_hit);
        }
        other => panic!("unexpected: {other:?}"),
    }

    let (message_id, status, context_tokens) = done_of(&events);
    assert_eq!(status, message_status::COMPLETED);
    // Context figure equals the final call's total, the next prompt size.
    assert_eq!(context_tokens, 45);

    let llm = llm_invocations(&harness, message_id).await;
    assert_eq!(llm.len(), 2);
    assert_eq!(
        llm.iter().map(|r| r.sequence_number).collect::<Vec<_>>(),
        vec![1, 2]
    );

    let tools = tool_invocations(&harness, message_id).await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].sequence_number, 1);
    assert_eq!(tools[0].status, "success");
    assert_eq!(tools[0].triggered_by_llm_sequence, Some(1));
    assert_eq!(tools[0].tool_name, "get_weather");

    // The second LLM call saw the tool result in its history.
    let requests = harness.transport.stream_requests.lock();
    assert_eq!(requests.len(), 2);
    let second = &requests[1];
    assert!(second
        .messages
        .iter()
        .any(|m| m.role == parley_domain::message::Role::Tool && m.content.contains("20")));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — stop_generation mid-stream keeps the partial content
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn stop_mid_stream_finalizes_partial() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![vec![
            delta("20"),
            delta("°C"),
            delta(" and sunny"),
            usage(40, 5),
            done("stop"),
        ]])
        .with_frame_delay(Duration::from_millis(150)),
    );
    let harness = Harness::with_transport(transport).await;
    let session = harness.session().await;

    let message = harness
        .state
        .store
        .create_message(&session.session_id, "user", "weather?", None)
        .await
        .unwrap();

    let mut rx = parley_gateway::runtime::run_turn(
        harness.state.clone(),
        parley_gateway::runtime::TurnInput {
            session_id: session.session_id.clone(),
            user_id: 1,
            user_text: "weather?".into(),
            model_id: None,
            user_message_id: Some(message.message_id),
        },
    );

    // Wait for the first content delta, then send stop_generation.
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let is_first_delta = matches!(&event, CanonicalEvent::ContentDelta { .. });
        events.push(event);
        if is_first_delta {
            assert!(harness.state.cancel_map.cancel(1, &session.session_id));
            break;
        }
    }
    events.extend(collect(rx).await);

    let event_kinds = kinds(&events);
    // No content after the cancellation point; exactly one info, then done.
    assert_eq!(
        event_kinds
            .iter()
            .filter(|k| **k == "content_delta")
            .count(),
        1
    );
    assert_eq!(event_kinds.iter().filter(|k| **k == "info").count(), 1);
    match &events[events.iter().position(|e| e.kind() == "info").unwrap()] {
        CanonicalEvent::Info { kind } => assert_eq!(kind, "cancelled"),
        other => panic!("unexpected: {other:?}"),
    }

    let (message_id, status, _) = done_of(&events);
    assert_eq!(status, message_status::ERROR);

    // Partial text persisted.
    let message = harness
        .state
        .store
        .get_message(message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.content, "20");
    assert_eq!(message.status, "error");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — thinking block split across frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn thinking_block_split_across_frames() {
    let harness = Harness::new(vec![vec![
        delta("<th"),
        delta("ink>plan</think>ans"),
        delta("wer"),
        usage(5, 3),
        done("stop"),
    ]])
    .await;
    let session = harness.session().await;

    let events = harness.run_turn_collect(&session.session_id, "solve it").await;
    assert_eq!(
        kinds(&events),
        vec![
            "turn_started",
            "thinking_begin",
            "thinking_delta",
            "thinking_end",
            "content_delta",
            "content_delta",
            "llm_invocation_complete",
            "done"
        ]
    );

    match &events[2] {
        CanonicalEvent::ThinkingDelta { delta, .. } => assert_eq!(delta, "plan"),
        other => panic!("unexpected: {other:?}"),
    }

    // Only the final-visible text lands in the message.
    let (message_id, _, _) = done_of(&events);
    let message = harness
        .state
        .store
        .get_message(message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.content, "answer");

    // The timeline kept the thinking segment.
    let timeline = message.timeline.expect("timeline");
    assert!(timeline.contains("\"thinking\""));
    assert!(timeline.contains("plan"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Failure paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn empty_input_rejected_at_init() {
    let harness = Harness::new(vec![]).await;
    let session = harness.session().await;

    let events = harness
        .run_existing_collect(&session.session_id, "   ", None)
        .await;
    assert_eq!(kinds(&events), vec!["error", "done"]);
    match &events[0] {
        CanonicalEvent::Error { kind, .. } => assert_eq!(kind, "empty_input"),
        other => panic!("unexpected: {other:?}"),
    }
    let (_, status, _) = done_of(&events);
    assert_eq!(status, message_status::ERROR);
}

#[tokio::test]
async fn unknown_session_rejected_at_init() {
    let harness = Harness::new(vec![]).await;
    let events = harness.run_existing_collect("no-such-session", "hi", None).await;
    assert_eq!(kinds(&events), vec!["error", "done"]);
}

#[tokio::test]
async fn iteration_bound_exhaustion_errors_but_finalizes() {
    // Every call asks for another tool: the loop must stop at the bound.
    let scripts = vec![
        vec![
            tool_block("get_weather", json!({"city": "Beijing"})),
            usage(10, 1),
            done("tool_calls"),
        ],
        vec![
            tool_block("get_weather", json!({"city": "Paris"})),
            usage(20, 1),
            done("tool_calls"),
        ],
    ];
    let harness = Harness::with_config(scripts, |c| c.agent.max_iterations = 2).await;
    let session = harness.session().await;

    let events = harness.run_turn_collect(&session.session_id, "loop forever").await;
    let event_kinds = kinds(&events);
    assert_eq!(event_kinds.last().unwrap(), &"done");
    let error_pos = event_kinds.iter().position(|k| *k == "error").unwrap();
    match &events[error_pos] {
        CanonicalEvent::Error { kind, .. } => assert_eq!(kind, "max_iterations"),
        other => panic!("unexpected: {other:?}"),
    }

    let (message_id, status, _) = done_of(&events);
    assert_eq!(status, message_status::ERROR);

    // Both iterations' rows were still committed.
    assert_eq!(llm_invocations(&harness, message_id).await.len(), 2);
    assert_eq!(tool_invocations(&harness, message_id).await.len(), 2);
}

#[tokio::test]
async fn transport_error_finalizes_in_error_status() {
    // No scripts queued: the first stream_chat fails.
    let harness = Harness::new(vec![]).await;
    let session = harness.session().await;

    let events = harness.run_turn_collect(&session.session_id, "hello").await;
    let event_kinds = kinds(&events);
    assert!(event_kinds.contains(&"error"));
    assert_eq!(event_kinds.last().unwrap(), &"done");

    let (message_id, status, _) = done_of(&events);
    assert_eq!(status, message_status::ERROR);
    let message = harness
        .state
        .store
        .get_message(message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.status, "error");
}

#[tokio::test]
async fn schema_mismatch_is_fed_back_to_the_model() {
    // First call sends bad arguments; the model recovers on re-entry.
    let harness = Harness::new(vec![
        vec![
            tool_block("get_weather", json!({"city": 42})),
            usage(10, 1),
            done("tool_calls"),
        ],
        vec![delta("sorry, retried"), usage(30, 4), done("stop")],
    ])
    .await;
    let session = harness.session().await;

    let events = harness.run_turn_collect(&session.session_id, "weather?").await;
    let (message_id, status, _) = done_of(&events);
    // The turn still completes: the schema error went back to the LLM.
    assert_eq!(status, message_status::COMPLETED);

    let tools = tool_invocations(&harness, message_id).await;
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].status, "error");
    assert!(tools[0].error_message.as_deref().unwrap().contains("invalid arguments"));

    let tool_result = events
        .iter()
        .find_map(|e| match e {
            CanonicalEvent::ToolResult { is_error, .. } => Some(*is_error),
            _ => None,
        })
        .unwrap();
    assert!(tool_result);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Property: event-kind grammar
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Checks the per-turn event grammar:
/// `started (content|thinking-block|tool_call|tool_result|invocation)* done`
/// with thinking blocks well-bracketed and exactly one terminal `done`.
fn assert_grammar(events: &[CanonicalEvent]) {
    let mut in_think = false;
    let mut saw_done = false;
    for (i, event) in events.iter().enumerate() {
        assert!(!saw_done, "event after done: {event:?}");
        match event.kind() {
            "turn_started" => assert_eq!(i, 0, "turn_started must come first"),
            "thinking_begin" => {
                assert!(!in_think, "nested thinking block");
                in_think = true;
            }
            "thinking_delta" => assert!(in_think, "thinking_delta outside block"),
            "thinking_end" => {
                assert!(in_think, "thinking_end without begin");
                in_think = false;
            }
            "done" => saw_done = true,
            _ => {}
        }
    }
    assert!(saw_done, "missing terminal done");
    assert!(!in_think, "unclosed thinking block");
}

#[tokio::test]
async fn event_grammar_holds_across_scenarios() {
    let harness = Harness::new(vec![
        vec![
            delta("<think>consider</think>"),
            tool_block("get_weather", json!({"city": "Oslo"})),
            usage(12, 2),
            done("tool_calls"),
        ],
        vec![delta("cold"), usage(33, 2), done("stop")],
    ])
    .await;
    let session = harness.session().await;

    let events = harness.run_turn_collect(&session.session_id, "Oslo?").await;
    assert_grammar(&events);
}
