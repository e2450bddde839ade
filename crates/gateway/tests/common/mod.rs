//! Shared test harness: an AppState wired to an in-memory database and a
//! scripted LLM transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use parley_domain::config::Config;
use parley_domain::error::{Error, Result};
use parley_domain::event::CanonicalEvent;
use parley_domain::stream::{BoxStream, RawFrame};
use parley_gateway::auth::AuthTokens;
use parley_gateway::runtime::cancel::CancelMap;
use parley_gateway::runtime::context::ContextManager;
use parley_gateway::runtime::transport::TransportFactory;
use parley_gateway::state::AppState;
use parley_gateway::ws::connection::ConnectionMap;
use parley_llm::{ChatRequest, ChatResponse, ChatTransport};
use parley_mcp::protocol::{McpToolDef, ToolCallResult};
use parley_mcp::{ToolHub, ToolServer};
use parley_store::models::{AiModelRow, NewSession, SessionRow};
use parley_store::{Database, KvStore, Store};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A transport that replays pre-scripted frame sequences: the N-th
/// `stream_chat` call yields the N-th script. Non-streaming `chat` pops
/// from a separate reply queue. Requests are captured for assertions.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<RawFrame>>>,
    chat_replies: Mutex<VecDeque<String>>,
    pub stream_requests: Mutex<Vec<ChatRequest>>,
    pub chat_requests: Mutex<Vec<ChatRequest>>,
    /// Pause between frames, so tests can interleave cancellation.
    pub frame_delay: Duration,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Vec<RawFrame>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            chat_replies: Mutex::new(VecDeque::new()),
            stream_requests: Mutex::new(Vec::new()),
            chat_requests: Mutex::new(Vec::new()),
            frame_delay: Duration::from_millis(0),
        }
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn push_chat_reply(&self, reply: &str) {
        self.chat_replies.lock().push_back(reply.to_string());
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn stream_chat(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<RawFrame>>> {
        self.stream_requests.lock().push(req);
        let frames = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Transport("no scripted response left".into()))?;
        let delay = self.frame_delay;

        let stream = async_stream::stream! {
            for frame in frames {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(frame);
            }
        };
        Ok(Box::pin(stream))
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        self.chat_requests.lock().push(req);
        let content = self
            .chat_replies
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Transport("no scripted chat reply left".into()))?;
        Ok(ChatResponse {
            content,
            usage: None,
            finish_reason: Some("stop".into()),
        })
    }

    fn model_id(&self) -> &str {
        "qwen3:8b"
    }
}

pub struct ScriptedFactory {
    pub transport: Arc<ScriptedTransport>,
}

#[async_trait::async_trait]
impl TransportFactory for ScriptedFactory {
    async fn for_model(&self, _session_id: &str, _model: &AiModelRow) -> Arc<dyn ChatTransport> {
        self.transport.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stub tool server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serves a single `get_weather` tool returning a fixed payload.
pub struct WeatherStub;

#[async_trait::async_trait]
impl ToolServer for WeatherStub {
    fn name(&self) -> &str {
        "weather"
    }

    fn get_tools(&self) -> Vec<McpToolDef> {
        vec![McpToolDef {
            name: "get_weather".into(),
            description: "stub weather".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"]
            }),
            cacheable: false,
            cache_ttl_secs: None,
        }]
    }

    async fn call_tool(&self, _name: &str, _args: &Value) -> Result<ToolCallResult> {
        Ok(ToolCallResult::ok(r#"{"temp":20}"#))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: AppState,
    pub transport: Arc<ScriptedTransport>,
}

impl Harness {
    pub async fn new(scripts: Vec<Vec<RawFrame>>) -> Self {
        Self::with_config(scripts, |_| {}).await
    }

    pub async fn with_config(
        scripts: Vec<Vec<RawFrame>>,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        Self::build(Arc::new(ScriptedTransport::new(scripts)), tweak).await
    }

    pub async fn with_transport(transport: Arc<ScriptedTransport>) -> Self {
        Self::build(transport, |_| {}).await
    }

    pub async fn build(
        transport: Arc<ScriptedTransport>,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let mut config = Config::default();
        tweak(&mut config);
        let config = Arc::new(config);

        let db = Database::connect_in_memory().await.expect("in-memory db");
        let store = Store::new(db);
        let kv = Arc::new(KvStore::new());
        let auth = Arc::new(AuthTokens::new(config.auth.clone(), kv.clone()));

        let hub = Arc::new(ToolHub::new(None, true, Duration::from_secs(3600)));
        hub.register_server("weather", Arc::new(WeatherStub))
            .await
            .expect("register stub server");

        let context = Arc::new(ContextManager::new(
            store.clone(),
            kv.clone(),
            config.context.clone(),
        ));

        let state = AppState {
            config,
            store,
            kv,
            auth,
            transports: Arc::new(ScriptedFactory {
                transport: transport.clone(),
            }),
            hub,
            context,
            connections: Arc::new(ConnectionMap::new(Duration::from_secs(10))),
            cancel_map: Arc::new(CancelMap::new()),
        };

        Self { state, transport }
    }

    /// Create a session for the seeded user.
    pub async fn session(&self) -> SessionRow {
        self.state
            .store
            .create_session(
                1,
                NewSession {
                    ai_model: Some("qwen3:8b".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("create session")
    }

    /// Persist a user message and run a full turn, collecting every event.
    pub async fn run_turn_collect(
        &self,
        session_id: &str,
        user_text: &str,
    ) -> Vec<CanonicalEvent> {
        let message = self
            .state
            .store
            .create_message(session_id, "user", user_text, None)
            .await
            .expect("persist user message");
        self.run_existing_collect(session_id, user_text, Some(message.message_id))
            .await
    }

    /// Run a turn without persisting the user message first.
    pub async fn run_existing_collect(
        &self,
        session_id: &str,
        user_text: &str,
        user_message_id: Option<String>,
    ) -> Vec<CanonicalEvent> {
        let rx = parley_gateway::runtime::run_turn(
            self.state.clone(),
            parley_gateway::runtime::TurnInput {
                session_id: session_id.to_string(),
                user_id: 1,
                user_text: user_text.to_string(),
                model_id: None,
                user_message_id,
            },
        );
        collect(rx).await
    }
}

pub async fn collect(mut rx: mpsc::Receiver<CanonicalEvent>) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[CanonicalEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

// ── Frame shorthands ───────────────────────────────────────────────

pub fn delta(text: &str) -> RawFrame {
    RawFrame::MessageDelta {
        content: text.into(),
    }
}

pub fn usage(prompt: u32, completion: u32) -> RawFrame {
    RawFrame::Usage(parley_domain::stream::TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        prompt_cache_hit: false,
    })
}

pub fn done(reason: &str) -> RawFrame {
    RawFrame::Done {
        finish_reason: Some(reason.into()),
    }
}

pub fn tool_block(name: &str, args: Value) -> RawFrame {
    RawFrame::ToolCallBlock {
        calls: vec![parley_domain::stream::RawToolCall {
            name: name.into(),
            arguments: args,
        }],
    }
}
