//! The single consumer of a turn's event channel.
//!
//! One pump task per turn pulls canonical events off the bounded channel,
//! wraps them into envelopes (owning the per-turn sequencing state), and
//! writes them to the user's WebSocket. The channel bound plus this
//! single consumer give the turn its ordering and back-pressure.

use tokio::sync::mpsc;

use parley_domain::event::CanonicalEvent;

use crate::state::AppState;

use super::envelope::TurnEnvelopeWriter;

/// Drain a turn's canonical events into the user's WebSocket.
///
/// A user with no live connection simply loses the frames — the
/// persisted message remains the source of truth. A stalled socket is
/// closed by the connection map; the turn keeps running and finalizes
/// normally unless the client also disconnects the session flow.
pub async fn pump_turn(
    state: AppState,
    user_id: i64,
    session_id: String,
    mut events: mpsc::Receiver<CanonicalEvent>,
) {
    let mut writer = TurnEnvelopeWriter::new(session_id.clone());
    let mut dropped: u64 = 0;

    while let Some(event) = events.recv().await {
        let Some(envelope) = writer.wrap(&event) else {
            continue;
        };
        if !state.connections.deliver(user_id, envelope.to_json()).await {
            dropped += 1;
        }
    }

    if dropped > 0 {
        tracing::debug!(
            user_id,
            session_id = %session_id,
            dropped,
            "turn events had no live WebSocket to deliver to"
        );
    }
}
