//! In-process fan-out of support chat messages to connected WebSockets.
//!
//! Messages are persisted first; the hub only delivers what is already
//! stored, so a client that misses a broadcast can reload the history.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::models::SupportMessage;

/// Messages buffered per conversation before slow receivers lag.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct ChatHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<SupportMessage>>>>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a conversation, creating its channel on first use.
    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<SupportMessage> {
        let mut channels = self.channels.lock();
        channels
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver a stored message to current subscribers. Returns how many received it.
    pub fn publish(&self, message: &SupportMessage) -> usize {
        let channels = self.channels.lock();
        match channels.get(&message.conversation_id) {
            Some(tx) => tx.send(message.clone()).unwrap_or(0),
            None => 0,
        }
    }

    /// Drop channels nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }
}
