//! Outbound message discipline: immediate send, buffer, or drop.
//!
//! While the socket is down (or the session is not yet authenticated) the
//! queue absorbs normal traffic into a bounded FIFO and drains it, strictly
//! in order, once sending becomes possible again. Authenticate frames skip
//! every readiness check; heartbeats are never buffered because a stale
//! liveness ping is worthless by the time the socket returns.

use log::{debug, warn};
use shared::{ClientMessage, MessageKind};
use std::collections::VecDeque;
use thiserror::Error;

pub const DEFAULT_QUEUE_CAP: usize = 200;

/// The raw send failed; the socket is gone or the writer is closed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("socket unavailable")]
pub struct SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
    Dropped,
}

#[derive(Debug)]
pub struct OutboundQueue {
    queue: VecDeque<ClientMessage>,
    cap: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Routes one message according to its kind and current sendability.
    pub fn send<F>(
        &mut self,
        message: ClientMessage,
        can_send_now: bool,
        raw_send: &mut F,
    ) -> SendOutcome
    where
        F: FnMut(&ClientMessage) -> Result<(), SendError>,
    {
        match message.kind() {
            MessageKind::Authenticate => {
                // Always attempt immediately, bypassing readiness checks.
                if raw_send(&message).is_ok() {
                    SendOutcome::Sent
                } else {
                    self.enqueue(message);
                    SendOutcome::Queued
                }
            }
            MessageKind::Heartbeat => {
                if !can_send_now {
                    return SendOutcome::Dropped;
                }
                if raw_send(&message).is_ok() {
                    SendOutcome::Sent
                } else {
                    // Never queued; a failed heartbeat is already stale.
                    SendOutcome::Dropped
                }
            }
            MessageKind::Normal => {
                if can_send_now {
                    if raw_send(&message).is_ok() {
                        return SendOutcome::Sent;
                    }
                    debug!("raw send failed, buffering message");
                }
                self.enqueue(message);
                SendOutcome::Queued
            }
        }
    }

    /// Drains the FIFO in order while sendable; a no-op otherwise. Returns
    /// how many messages went out. A mid-drain failure puts the message back
    /// at the front and stops.
    pub fn flush<F>(&mut self, can_send_now: bool, raw_send: &mut F) -> usize
    where
        F: FnMut(&ClientMessage) -> Result<(), SendError>,
    {
        if !can_send_now {
            return 0;
        }

        let mut sent = 0;
        while let Some(message) = self.queue.pop_front() {
            if raw_send(&message).is_ok() {
                sent += 1;
            } else {
                self.queue.push_front(message);
                break;
            }
        }
        sent
    }

    fn enqueue(&mut self, message: ClientMessage) {
        if self.queue.len() >= self.cap {
            self.queue.pop_front();
            warn!("outbound queue full, evicting oldest message");
        }
        self.queue.push_back(message);
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}
