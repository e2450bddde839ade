//! Fire-and-forget session title generation.
//!
//! After the first full exchange, a one-shot non-streaming LLM call
//! produces a short title; the session row is updated and the client is
//! notified over its WebSocket. Title tokens are recorded nowhere.

use parley_domain::event::CanonicalEvent;
use parley_domain::message::PromptMessage;
use parley_llm::{ChatRequest, ChatTransport, ModelParams};

use crate::state::AppState;
use crate::ws::envelope::TurnEnvelopeWriter;

use super::truncate_chars;

/// Spawn the background title job. Failures are logged, never surfaced.
pub fn spawn_title_job(state: AppState, session_id: String, user_id: i64) {
    tokio::spawn(async move {
        if let Err(e) = generate_title(&state, &session_id, user_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "title generation failed");
        }
    });
}

async fn generate_title(
    state: &AppState,
    session_id: &str,
    user_id: i64,
) -> parley_domain::Result<()> {
    let Some(session) = state.store.get_session(session_id, user_id).await? else {
        return Ok(());
    };
    let model_id = session
        .ai_model
        .clone()
        .unwrap_or_else(|| "qwen3:8b".to_string());
    let Some(model) = state.store.get_model(&model_id).await? else {
        return Ok(());
    };

    // The opening exchange is all the context a title needs.
    let messages = state.store.list_messages(session_id, Some(4)).await?;
    let mut exchange = String::new();
    for msg in &messages {
        exchange.push_str(&msg.role);
        exchange.push_str(": ");
        exchange.push_str(truncate_chars(&msg.content, 500).as_str());
        exchange.push('\n');
    }
    if exchange.is_empty() {
        return Ok(());
    }

    let max_chars = state.config.context.title_max_chars;
    let prompt = format!(
        "Write a title for this conversation in at most {max_chars} characters. \
         Reply with the title only, no quotes, no punctuation at the end.\n\n{exchange}"
    );

    let transport = state.transports.for_model(session_id, &model).await;
    let response = transport
        .chat(ChatRequest {
            messages: vec![PromptMessage::user(prompt)],
            tools: vec![],
            params: ModelParams {
                temperature: Some(0.3),
                max_tokens: Some(64),
            },
        })
        .await?;

    let title = truncate_chars(strip_title(&response.content).as_str(), max_chars);
    if title.is_empty() {
        return Ok(());
    }

    state.store.set_session_title(session_id, &title).await?;
    tracing::info!(session_id = %session_id, title = %title, "session title updated");

    // Standalone notification outside any turn.
    let mut writer = TurnEnvelopeWriter::new(session_id.to_string());
    if let Some(envelope) = writer.wrap(&CanonicalEvent::SessionTitleUpdated {
        session_id: session_id.to_string(),
        title,
    }) {
        state
            .connections
            .deliver(user_id, envelope.to_json())
            .await;
    }
    Ok(())
}

/// Models love wrapping titles in quotes or emitting stray thinking tags.
fn strip_title(raw: &str) -> String {
    let cleaned = raw
        .split("</think>")
        .last()
        .unwrap_or(raw)
        .trim()
        .trim_matches(['"', '\'', '“', '”', '「', '」'])
        .trim();
    cleaned.lines().next().unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_title_removes_quotes_and_thinking() {
        assert_eq!(strip_title("\"Weather chat\""), "Weather chat");
        assert_eq!(
            strip_title("<think>hmm a title</think>\nTrip planning"),
            "Trip planning"
        );
        assert_eq!(strip_title("Line one\nLine two"), "Line one");
        assert_eq!(strip_title("  plain  "), "plain");
    }
}
