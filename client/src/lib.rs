//! # Tabletop Client Library
//!
//! Client-side implementation of the tabletop sync protocol: connection
//! resilience, outbound message discipline, and a local view of the
//! replicated room for a presentation layer to consume.
//!
//! ## Architecture Overview
//!
//! ### Connection Lifecycle
//! One socket per session, owned by an explicit state machine
//! (`Disconnected → Connecting → Connected`, with `Reconnecting`/`Failed` on
//! the way back down). Reconnects back off exponentially from a base delay
//! (capped at 30 s), a fixed 12 s guard abandons handshakes that never
//! complete, and a foreground notification short-circuits any pending
//! backoff. Every timer is owned by the machine and cancelled exhaustively
//! on exit transitions, so a stale wakeup is always a no-op.
//!
//! ### Outbound Discipline
//! Messages that cannot be sent right now land in a bounded FIFO (oldest
//! evicted on overflow) and drain in order once the session is connected and
//! authenticated. Two exceptions: authenticate frames always try the wire
//! immediately, and heartbeats are dropped rather than buffered because a
//! stale liveness ping has no value.
//!
//! ### Room View
//! Authoritative snapshots from the server replace the local copy wholesale;
//! the client never merges. The view also tracks authentication, measured
//! ping, and outstanding command acks.
//!
//! ## Module Organization
//!
//! - [`connection`] - the lifecycle state machine and backoff policy
//! - [`outbound`] - the bounded send/buffer/drop queue
//! - [`state`] - the applied room view and view events
//! - [`network`] - the websocket driver wiring it all to a socket
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new(ClientOptions::new("ws://127.0.0.1:8080", "player-1"));
//!     let handle = client.handle();
//!
//!     tokio::spawn(async move {
//!         // The handle feeds commands into the running client.
//!         handle.send(shared::ClientMessage::Heartbeat);
//!     });
//!
//!     client.run().await
//! }
//! ```

pub mod connection;
pub mod network;
pub mod outbound;
pub mod state;
