//! Connection lifecycle state machine.
//!
//! One explicit machine with a single transition surface and one owned timer
//! slot, instead of state scattered across callbacks. The async driver polls
//! [`ConnectionLifecycle::next_deadline`] and reports socket events; the
//! machine decides what happens. Cancelling a timer clears the slot, so a
//! stale wakeup that fires after cancellation polls into a no-op.

use log::{debug, info, warn};
use shared::ConnectionState;
use std::time::{Duration, Instant};

/// Fixed budget for a handshake to complete before the attempt is abandoned.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(12);
/// Ceiling for the exponential reconnect backoff.
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Handshake,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The backoff delay elapsed; the driver should start a connection
    /// attempt now.
    RetryNow,
    /// The handshake budget ran out; the driver should abandon the in-flight
    /// attempt and treat it as a close.
    HandshakeExpired,
}

#[derive(Debug, Clone, Copy)]
struct PendingTimer {
    kind: TimerKind,
    deadline: Instant,
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    state: ConnectionState,
    attempts: u32,
    base_delay: Duration,
    /// 0 means unlimited.
    max_reconnect_attempts: u32,
    timer: Option<PendingTimer>,
}

impl ConnectionLifecycle {
    pub fn new(base_delay: Duration, max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            base_delay,
            max_reconnect_attempts,
            timer: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Starts (or restarts) a connection attempt. Arms the handshake guard.
    pub fn connect(&mut self, now: Instant) -> bool {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => false,
            _ => {
                self.state = ConnectionState::Connecting;
                self.timer = Some(PendingTimer {
                    kind: TimerKind::Handshake,
                    deadline: now + HANDSHAKE_TIMEOUT,
                });
                true
            }
        }
    }

    /// The socket opened. Attempts reset only here.
    pub fn on_open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        info!("Connection established");
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.timer = None;
        true
    }

    /// The socket closed or an attempt failed. Attempts increment on every
    /// disconnect; past the cap the machine parks in `Failed`.
    pub fn on_close(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {}
            // Already waiting, failed, or deliberately offline.
            _ => return,
        }

        self.attempts += 1;
        if self.max_reconnect_attempts > 0 && self.attempts > self.max_reconnect_attempts {
            warn!(
                "Giving up after {} reconnect attempts",
                self.max_reconnect_attempts
            );
            self.state = ConnectionState::Failed;
            self.timer = None;
            return;
        }

        let delay = self.reconnect_delay(self.attempts);
        debug!(
            "Connection lost (attempt {}), retrying in {:?}",
            self.attempts, delay
        );
        self.state = ConnectionState::Reconnecting;
        self.timer = Some(PendingTimer {
            kind: TimerKind::Reconnect,
            deadline: now + delay,
        });
    }

    /// Deliberate teardown. Idempotent from any state.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.timer = None;
    }

    /// `min(base * 1.5^(attempts-1), 30s)`
    pub fn reconnect_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(64);
        let millis = self.base_delay.as_millis() as f64 * 1.5_f64.powi(exponent as i32);
        let millis = millis.min(MAX_RECONNECT_DELAY.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.deadline)
    }

    /// Consumes a due timer. A timer that was cancelled (or superseded by a
    /// newer one) simply is not there anymore, so stale wakeups land here and
    /// return `None`.
    pub fn poll_timer(&mut self, now: Instant) -> Option<TimerEvent> {
        let timer = self.timer?;
        if timer.deadline > now {
            return None;
        }
        self.timer = None;

        match (timer.kind, self.state) {
            (TimerKind::Handshake, ConnectionState::Connecting) => {
                warn!("Handshake timed out");
                Some(TimerEvent::HandshakeExpired)
            }
            (TimerKind::Reconnect, ConnectionState::Reconnecting) => Some(TimerEvent::RetryNow),
            // State moved on since the timer was armed.
            _ => None,
        }
    }

    /// The host came back to the foreground. While waiting out a backoff (or
    /// parked in `Failed`), this cancels the pending delay so the driver can
    /// reconnect immediately; attempts reset when recovering from `Failed`.
    pub fn notify_foreground(&mut self, _now: Instant) -> bool {
        match self.state {
            ConnectionState::Reconnecting => {
                self.timer = None;
                self.state = ConnectionState::Disconnected;
                true
            }
            ConnectionState::Failed => {
                self.attempts = 0;
                self.state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }
}
