//! Debounced state fan-out and unicast control messages.
//!
//! The scheduler holds at most one pending deadline. `broadcast()` arms or
//! resets it so a burst of mutations (a token drag, a multi-select sweep)
//! collapses into one wire send per window; `broadcast_immediate()` makes the
//! deadline due now for time-sensitive control events. The event loop selects
//! on [`BroadcastScheduler::deadline`] and calls [`BroadcastScheduler::fire_due`],
//! so the timer only ever triggers a state *read* on the same execution queue
//! as the mutations.

use log::debug;
use shared::ServerMessage;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

use crate::client_manager::ClientManager;

pub const DEFAULT_BROADCAST_WINDOW: Duration = Duration::from_millis(16);

#[derive(Debug)]
pub struct BroadcastScheduler {
    window: Duration,
    deadline: Option<Instant>,
}

impl BroadcastScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Schedules a debounced fan-out; every call resets the single pending
    /// deadline.
    pub fn broadcast(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    /// Makes the pending fan-out due immediately.
    pub fn broadcast_immediate(&mut self) {
        self.deadline = Some(Instant::now());
    }

    /// Cancels the pending fan-out. Idempotent; a deadline that was already
    /// cancelled simply never fires.
    pub fn cleanup(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consumes the deadline if it is due. Returns whether a fan-out should
    /// happen now.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Default for BroadcastScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_WINDOW)
    }
}

/// Unicast path for control messages (heartbeat acks, command acks, signal
/// relays, kicks) through the connection registry.
pub struct DirectMessenger<'a> {
    pub clients: &'a ClientManager,
}

impl<'a> DirectMessenger<'a> {
    pub fn new(clients: &'a ClientManager) -> Self {
        Self { clients }
    }

    /// Serializes and sends one message to one uid. Returns `false` when the
    /// uid has no live socket or serialization fails; both are non-fatal.
    pub fn send(&self, uid: &str, message: &ServerMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.clients.send_to_client(uid, Message::Text(json)),
            Err(err) => {
                debug!("failed to encode message for {}: {}", uid, err);
                false
            }
        }
    }

    /// Serializes and fans a message out to every connected client.
    pub fn fan_out(&self, message: &ServerMessage) -> usize {
        match serde_json::to_string(message) {
            Ok(json) => self.clients.broadcast_to_all(Message::Text(json)),
            Err(err) => {
                debug!("failed to encode broadcast: {}", err);
                0
            }
        }
    }
}
