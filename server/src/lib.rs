//! # Tabletop Server Library
//!
//! This library provides the authoritative server implementation for the
//! shared virtual-tabletop session. It owns the canonical room state,
//! processes client commands, and broadcasts updates so every connected
//! participant converges on the same world.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The server holds the single writable copy of the room: players, tokens,
//! drawings, props, the map background, the staging zone, and the derived
//! scene-object projection. Clients only ever see snapshots; every mutation
//! funnels through a validated, authorized handler here.
//!
//! ### Inbound Message Pipeline
//! Untrusted wire frames pass through a strict sequence of gates before they
//! can touch state: a size guard, JSON parsing, a per-sender token-bucket
//! rate limiter, per-type schema validation, and finally an authority check
//! in the handler itself. The first failing stage drops the frame; handler
//! panics are caught at the pipeline boundary and never take down the loop.
//!
//! ### Scene Reconciliation
//! The scene-object list is a projection of the domain lists, rebuilt after
//! every structural change. Sticky per-object fields (lock state, z-index,
//! the non-positional transform) survive rebuilds by id; everything else is
//! recomputed from its source entity each pass.
//!
//! ### Fan-out
//! Bursty mutations collapse into one state broadcast per debounce window.
//! Control messages (heartbeat acks, command acks, signal relays) go out as
//! unicasts through the connection registry.
//!
//! ## Architecture
//!
//! The server is single-threaded where it matters: connection tasks only
//! shuttle frames into one mpsc channel, and the event loop processes each
//! frame to completion before taking the next. Room mutation is therefore
//! serialized by construction; the broadcast debounce deadline is the only
//! other timer and it only schedules a state read.
//!
//! ## Module Organization
//!
//! - [`room`] - the `RoomState` aggregate and its mutation surface
//! - [`scene`] - scene-graph reconciliation with per-type merge rules
//! - [`authority`] - per-object-type transform write policy
//! - [`selection`] - per-user selection tracking
//! - [`pipeline`] + [`validation`] + [`rate_limit`] - the inbound gauntlet
//! - [`broadcast`] - debounced fan-out and unicast messaging
//! - [`network`] + [`client_manager`] - websocket accept loop, connection
//!   registry and the event loop
//! - [`persistence`] - atomic JSON session snapshots
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", ServerOptions::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod broadcast;
pub mod client_manager;
pub mod network;
pub mod persistence;
pub mod pipeline;
pub mod rate_limit;
pub mod room;
pub mod scene;
pub mod selection;
pub mod utils;
pub mod validation;
