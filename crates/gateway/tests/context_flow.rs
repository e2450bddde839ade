//! Context-window management: summarization under pressure, edit
//! provenance, summary idempotence, and title generation.

mod common;

use std::time::Duration;

use common::{delta, done, kinds, usage, Harness};
use parley_domain::message::Role;

/// Seed `n` alternating user/assistant exchanges.
async fn seed_history(harness: &Harness, session_id: &str, exchanges: usize) {
    for i in 0..exchanges {
        harness
            .state
            .store
            .create_message(session_id, "user", &format!("question {i}"), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;
        harness
            .state
            .store
            .create_message(session_id, "assistant", &format!("answer {i}"), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
}

async fn set_context_tokens(harness: &Harness, session_id: &str, tokens: i64) {
    sqlx::query("UPDATE chat_sessions SET current_context_tokens = ? WHERE session_id = ?")
        .bind(tokens)
        .bind(session_id)
        .execute(harness.state.store.database().pool())
        .await
        .unwrap();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — summarization under context pressure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn summarization_triggers_and_shapes_the_prompt() {
    let harness = Harness::new(vec![vec![delta("ok"), usage(100, 5), done("stop")]]).await;
    let session = harness.session().await;

    // Four prior exchanges (8 messages), then pressure the window:
    // 29500 of 32768 is past the 0.9 threshold.
    seed_history(&harness, &session.session_id, 4).await;
    set_context_tokens(&harness, &session.session_id, 29_500).await;
    harness.transport.push_chat_reply("the user asked four questions");

    let events = harness
        .run_turn_collect(&session.session_id, "one more question")
        .await;
    assert_eq!(kinds(&events).last().unwrap(), &"done");

    // One summary message exists, replacing the three oldest messages
    // (8 effective - 5 kept).
    let summary = harness
        .state
        .store
        .latest_summary(&session.session_id)
        .await
        .unwrap()
        .expect("summary created");
    assert_eq!(summary.role, "system");
    assert!(summary.is_summary);
    assert_eq!(summary.content, "the user asked four questions");

    // The streamed prompt is {system, summary, kept 5, new user text}.
    let requests = harness.transport.stream_requests.lock();
    let prompt = &requests[0].messages;
    assert_eq!(prompt[0].role, Role::System);
    assert_eq!(prompt[1].role, Role::System);
    assert_eq!(prompt[1].content, "the user asked four questions");
    let tail: Vec<&str> = prompt[2..].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        tail,
        vec![
            "answer 1",
            "question 2",
            "answer 2",
            "question 3",
            "answer 3",
            "one more question"
        ]
    );
}

#[tokio::test]
async fn no_summarization_below_threshold() {
    let harness = Harness::new(vec![vec![delta("ok"), usage(10, 2), done("stop")]]).await;
    let session = harness.session().await;
    seed_history(&harness, &session.session_id, 4).await;

    harness
        .run_turn_collect(&session.session_id, "hello again")
        .await;

    assert!(harness
        .state
        .store
        .latest_summary(&session.session_id)
        .await
        .unwrap()
        .is_none());
    // The summarizer was never consulted.
    assert!(harness.transport.chat_requests.lock().is_empty());
}

#[tokio::test]
async fn failed_summarization_over_hard_budget_is_context_overflow() {
    // No chat reply scripted: the summarizer call fails. The session is
    // past 100% of the window, so the turn must not reach the LLM.
    let harness = Harness::new(vec![]).await;
    let session = harness.session().await;
    seed_history(&harness, &session.session_id, 4).await;
    set_context_tokens(&harness, &session.session_id, 40_000).await;

    let events = harness
        .run_turn_collect(&session.session_id, "too much history")
        .await;
    let event_kinds = kinds(&events);
    let error = events
        .iter()
        .find_map(|e| match e {
            parley_domain::event::CanonicalEvent::Error { kind, .. } => Some(kind.clone()),
            _ => None,
        })
        .expect("error event");
    assert_eq!(error, "context_overflow");
    assert_eq!(event_kinds.last().unwrap(), &"done");
    // The streaming endpoint was never called.
    assert!(harness.transport.stream_requests.lock().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Property — summary idempotence under concurrency
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn concurrent_summarize_produces_one_summary() {
    let harness = Harness::new(vec![]).await;
    let session = harness.session().await;
    seed_history(&harness, &session.session_id, 5).await;

    // Only one reply available: if both callers reached the LLM the
    // second would fail the whole test.
    harness.transport.push_chat_reply("single summary");

    let ctx = harness.state.context.clone();
    let transport = harness.transport.clone();
    let (a, b) = tokio::join!(
        ctx.summarize(&session, transport.as_ref() as &dyn parley_llm::ChatTransport, None),
        ctx.summarize(&session, transport.as_ref() as &dyn parley_llm::ChatTransport, None),
    );
    let produced = [a.unwrap(), b.unwrap()];
    assert_eq!(produced.iter().flatten().count(), 1);

    // Exactly one summary row.
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM chat_messages WHERE session_id = ? AND is_summary = 1",
    )
    .bind(&session.session_id)
    .fetch_one(harness.state.store.database().pool())
    .await
    .unwrap();
    assert_eq!(count.0, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — edit then resend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn edit_then_resend_rebuilds_history() {
    let harness = Harness::new(vec![vec![delta("fresh answer"), usage(12, 3), done("stop")]]).await;
    let session = harness.session().await;
    let sid = session.session_id.clone();
    let store = &harness.state.store;

    store.create_message(&sid, "user", "u1", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3)).await;
    store.create_message(&sid, "assistant", "a1", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3)).await;
    let u2 = store.create_message(&sid, "user", "u2", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3)).await;
    let a2 = store.create_message(&sid, "assistant", "a2", None).await.unwrap();

    // PATCH /messages/u2 → cascade.
    harness.state.context.edit_message(&u2).await.unwrap();

    let u2_after = store.get_message(&u2.message_id).await.unwrap().unwrap();
    let a2_after = store.get_message(&a2.message_id).await.unwrap().unwrap();
    assert!(u2_after.is_deleted);
    assert!(u2_after.is_edited);
    assert!(a2_after.is_deleted);

    // The client then POSTs the replacement turn with provenance.
    let u2_new = store
        .create_message(&sid, "user", "u2'", Some(&u2.message_id))
        .await
        .unwrap();
    assert_eq!(u2_new.parent_message_id.as_deref(), Some(u2.message_id.as_str()));

    let events = harness
        .run_existing_collect(&sid, "u2'", Some(u2_new.message_id.clone()))
        .await;
    assert_eq!(kinds(&events).last().unwrap(), &"done");

    // The LLM prompt was [system, u1, a1, u2'] — nothing soft-deleted.
    let requests = harness.transport.stream_requests.lock();
    let contents: Vec<&str> = requests[0].messages[1..]
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["u1", "a1", "u2'"]);
}

#[tokio::test]
async fn edit_of_summarized_message_restores_history() {
    let harness = Harness::new(vec![]).await;
    let session = harness.session().await;
    let sid = session.session_id.clone();
    seed_history(&harness, &session.session_id, 5).await;

    harness.transport.push_chat_reply("old summary");
    harness
        .state
        .context
        .summarize(
            &session,
            harness.transport.as_ref() as &dyn parley_llm::ChatTransport,
            None,
        )
        .await
        .unwrap()
        .expect("summary created");

    // Pick one of the folded (summarized) messages and edit it.
    let folded: parley_store::models::MessageRow = sqlx::query_as(
        "SELECT * FROM chat_messages \
         WHERE session_id = ? AND is_summarized = 1 AND role = 'user' \
         ORDER BY created_at LIMIT 1",
    )
    .bind(&sid)
    .fetch_one(harness.state.store.database().pool())
    .await
    .unwrap();

    harness.state.context.edit_message(&folded).await.unwrap();

    // The summary is gone and no message before the edited one is still
    // marked summarized.
    assert!(harness.state.store.latest_summary(&sid).await.unwrap().is_none());
    let still_summarized: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM chat_messages \
         WHERE session_id = ? AND is_summarized = 1 AND created_at <= ?",
    )
    .bind(&sid)
    .bind(folded.created_at)
    .fetch_one(harness.state.store.database().pool())
    .await
    .unwrap();
    assert_eq!(still_summarized.0, 0);

    // Everything from the edited message onward is soft-deleted.
    let window = harness.state.context.build_window(&session).await.unwrap();
    assert!(window
        .iter()
        .all(|m| m.created_at < folded.created_at && !m.is_deleted));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Title generation after the first exchange
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn first_exchange_schedules_title_generation() {
    let harness = Harness::new(vec![vec![delta("hi there"), usage(3, 2), done("stop")]]).await;
    let session = harness.session().await;
    harness.transport.push_chat_reply("Friendly greeting");

    harness.run_turn_collect(&session.session_id, "hello").await;

    // The title job is fire-and-forget; poll briefly.
    let mut title = String::new();
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        title = harness
            .state
            .store
            .get_session(&session.session_id, 1)
            .await
            .unwrap()
            .unwrap()
            .title;
        if title != "New chat" {
            break;
        }
    }
    assert_eq!(title, "Friendly greeting");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Property — context budget across consecutive turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn context_tokens_track_latest_assistant_total() {
    let harness = Harness::new(vec![
        vec![delta("one"), usage(10, 5), done("stop")],
        vec![delta("two"), usage(25, 7), done("stop")],
    ])
    .await;
    let session = harness.session().await;

    harness.run_turn_collect(&session.session_id, "first").await;
    let after_first = harness
        .state
        .store
        .get_session(&session.session_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_first.current_context_tokens, 15);

    harness.run_turn_collect(&session.session_id, "second").await;
    let after_second = harness
        .state
        .store
        .get_session(&session.session_id, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_second.current_context_tokens, 32);
    assert_eq!(
        after_second.current_context_tokens,
        harness
            .state
            .store
            .latest_assistant_total_tokens(&session.session_id)
            .await
            .unwrap()
    );
    // Cumulative figure sums both calls.
    assert_eq!(after_second.total_tokens, 15 + 32);
}
