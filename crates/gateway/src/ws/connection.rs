//! Per-user WebSocket connection registry.
//!
//! One live connection per user: a second connect closes the older one.
//! Senders are bounded channels drained by each connection's writer task;
//! a send that stalls past the configured limit closes the connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Outbound text frame for one connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Close,
}

struct UserConnection {
    conn_id: u64,
    sender: mpsc::Sender<Outbound>,
}

/// Map of `user_id → live connection`, guarded by a single lock around
/// insert/remove; send paths only clone the per-connection sender.
pub struct ConnectionMap {
    inner: Mutex<HashMap<i64, UserConnection>>,
    next_conn_id: AtomicU64,
    send_stall: Duration,
}

impl ConnectionMap {
    pub fn new(send_stall: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            send_stall,
        }
    }

    /// Register a connection, closing any previous one for this user.
    /// Returns the connection id used to guard unregistration.
    pub fn register(&self, user_id: i64, sender: mpsc::Sender<Outbound>) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let old = self
            .inner
            .lock()
            .insert(user_id, UserConnection { conn_id, sender });

        if let Some(old) = old {
            tracing::info!(user_id, "duplicate connection; closing the older one");
            let _ = old.sender.try_send(Outbound::Close);
        }
        conn_id
    }

    /// Remove the connection, but only if it is still the registered one
    /// (a newer connection may have replaced it).
    pub fn unregister(&self, user_id: i64, conn_id: u64) {
        let mut inner = self.inner.lock();
        if inner.get(&user_id).map(|c| c.conn_id) == Some(conn_id) {
            inner.remove(&user_id);
        }
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.inner.lock().contains_key(&user_id)
    }

    fn sender_for(&self, user_id: i64) -> Option<(u64, mpsc::Sender<Outbound>)> {
        self.inner
            .lock()
            .get(&user_id)
            .map(|c| (c.conn_id, c.sender.clone()))
    }

    /// Deliver one text frame to the user's connection.
    ///
    /// Returns false when the user has no connection. A send stalling
    /// past the limit closes the connection and also returns false.
    pub async fn deliver(&self, user_id: i64, text: String) -> bool {
        let Some((conn_id, sender)) = self.sender_for(user_id) else {
            return false;
        };

        match tokio::time::timeout(self.send_stall, sender.send(Outbound::Text(text))).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                // Writer task is gone.
                self.unregister(user_id, conn_id);
                false
            }
            Err(_) => {
                tracing::warn!(user_id, "WebSocket send stalled; closing connection");
                let _ = sender.try_send(Outbound::Close);
                self.unregister(user_id, conn_id);
                false
            }
        }
    }
}
