use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum (LLM call + tool dispatch) iterations per turn.
    #[serde(default = "d_50")]
    pub max_iterations: usize,
    /// Overall wall-clock deadline for one turn.
    #[serde(default = "d_600")]
    pub turn_deadline_secs: u64,
    /// Bound of the canonical-event channel from the loop to the
    /// WebSocket pump. A full channel blocks the producer, which paces
    /// the LLM stream read through the pull-based transport.
    #[serde(default = "d_256")]
    pub event_channel_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            turn_deadline_secs: 600,
            event_channel_capacity: 256,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Heartbeat ping interval per WebSocket connection.
    #[serde(default = "d_30")]
    pub heartbeat_interval_secs: u64,
    /// Close the connection (and error the turn) when a send stalls for
    /// longer than this.
    #[serde(default = "d_10")]
    pub send_stall_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            send_stall_secs: 10,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_50() -> usize {
    50
}
fn d_600() -> u64 {
    600
}
fn d_256() -> usize {
    256
}
fn d_30() -> u64 {
    30
}
fn d_10() -> u64 {
    10
}
