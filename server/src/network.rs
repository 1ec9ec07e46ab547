//! Server network layer: websocket accept loop and the single event loop.
//!
//! Every connection gets a reader task that forwards frames into one mpsc
//! channel and a writer task draining a per-connection sender. The main loop
//! consumes network events strictly in order, so each inbound frame runs to
//! completion (guard, parse, limit, validate, handle, schedule) before the
//! next is taken and room mutation is inherently serialized. The broadcast
//! debounce deadline and a once-a-second maintenance tick are the only other
//! wakeups, and both only read or sweep state between frames.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{BroadcastScheduler, DirectMessenger, DEFAULT_BROADCAST_WINDOW};
use crate::client_manager::{AddOutcome, ClientManager};
use crate::persistence;
use crate::pipeline::{MessagePipeline, PipelineConfig};
use crate::room::RoomState;
use crate::utils::now_ms;
use shared::ServerMessage;

/// Events from connection tasks to the main loop
#[derive(Debug)]
pub enum NetworkEvent {
    Connected {
        uid: String,
        conn_id: u64,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    },
    Frame {
        uid: String,
        text: String,
    },
    Disconnected {
        uid: String,
        conn_id: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub max_clients: usize,
    pub client_timeout: Duration,
    pub pointer_ttl_ms: u64,
    pub session_path: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_clients: 32,
            client_timeout: Duration::from_secs(60),
            pointer_ttl_ms: 10_000,
            session_path: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// The authoritative room server.
pub struct Server {
    listener: Arc<TcpListener>,
    options: ServerOptions,
    room: RoomState,
    pipeline: MessagePipeline,
    clients: ClientManager,
    scheduler: BroadcastScheduler,
    events_tx: mpsc::UnboundedSender<NetworkEvent>,
    events_rx: mpsc::UnboundedReceiver<NetworkEvent>,
    next_conn_id: Arc<AtomicU64>,
    dirty: bool,
}

impl Server {
    pub async fn new(
        addr: &str,
        options: ServerOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = Arc::new(TcpListener::bind(addr).await?);
        info!("Server listening on {}", listener.local_addr()?);

        let mut room = RoomState::new();
        if let Some(path) = &options.session_path {
            if path.exists() {
                match persistence::load(path) {
                    Ok(snapshot) => {
                        info!("Loaded session from {}", path.display());
                        room.apply_snapshot(snapshot);
                    }
                    Err(err) => {
                        warn!(
                            "Could not load session {}; starting empty: {}",
                            path.display(),
                            err
                        );
                    }
                }
            }
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pipeline = MessagePipeline::new(options.pipeline.clone());

        Ok(Server {
            listener,
            clients: ClientManager::new(options.max_clients),
            options,
            room,
            pipeline,
            scheduler: BroadcastScheduler::new(DEFAULT_BROADCAST_WINDOW),
            events_tx,
            events_rx,
            next_conn_id: Arc::new(AtomicU64::new(1)),
            dirty: false,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the accept loop, then drives the event loop until shutdown.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_accept_loop();

        let mut maintenance = tokio::time::interval(Duration::from_secs(1));
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            let deadline = self.scheduler.deadline();

            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },
                _ = wait_until(deadline) => {
                    if self.scheduler.fire_due(Instant::now()) {
                        self.fan_out_state();
                    }
                },
                _ = maintenance.tick() => {
                    self.run_maintenance();
                },
            }
        }

        Ok(())
    }

    fn spawn_accept_loop(&self) {
        let listener = Arc::clone(&self.listener);
        let events = self.events_tx.clone();
        let next_conn_id = Arc::clone(&self.next_conn_id);

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                        let events = events.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, addr, conn_id, events).await;
                        });
                    }
                    Err(err) => {
                        error!("Error accepting connection: {}", err);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Connected {
                uid,
                conn_id,
                addr,
                sender,
            } => match self.clients.add_client(&uid, conn_id, addr, sender) {
                AddOutcome::Full(rejected) => {
                    if let Ok(json) = serde_json::to_string(&ServerMessage::Kicked {
                        reason: "room is full".to_string(),
                    }) {
                        let _ = rejected.send(Message::Text(json));
                    }
                    let _ = rejected.send(Message::Close(None));
                }
                AddOutcome::Replaced(old_sender) => {
                    let _ = old_sender.send(Message::Close(None));
                    self.on_client_joined(&uid);
                }
                AddOutcome::Added => self.on_client_joined(&uid),
            },
            NetworkEvent::Frame { uid, text } => self.handle_frame(&uid, &text),
            NetworkEvent::Disconnected { uid, conn_id } => {
                // Player entity survives for reconnection.
                self.clients.remove_client(&uid, conn_id);
            }
        }
    }

    fn on_client_joined(&mut self, uid: &str) {
        self.room.ensure_player(uid, now_ms());
        self.dirty = true;

        // The newcomer needs the world immediately; everyone else learns of
        // the join through the debounced fan-out.
        let messenger = DirectMessenger::new(&self.clients);
        messenger.send(
            uid,
            &ServerMessage::RoomSnapshot {
                state: self.room.snapshot(true),
            },
        );
        self.scheduler.broadcast();
    }

    fn handle_frame(&mut self, uid: &str, text: &str) {
        self.clients.touch(uid);

        let (result, ack) = self.pipeline.process(&mut self.room, uid, text, now_ms());

        let messenger = DirectMessenger::new(&self.clients);
        if let Some(ack) = ack {
            messenger.send(uid, &ack);
        }

        match result {
            Ok(outcome) => {
                if let Some(reply) = &outcome.reply {
                    messenger.send(uid, reply);
                }
                if let Some((target, message)) = &outcome.forward {
                    if !messenger.send(target, message) {
                        debug!("signal target {} not connected", target);
                    }
                }
                if outcome.persist {
                    self.dirty = true;
                }
                if outcome.broadcast {
                    self.scheduler.broadcast();
                }
            }
            Err(reject) => {
                debug!("rejected frame from {}: {}", uid, reject);
            }
        }
    }

    fn fan_out_state(&self) {
        let messenger = DirectMessenger::new(&self.clients);
        let sent = messenger.fan_out(&ServerMessage::RoomSnapshot {
            state: self.room.snapshot(true),
        });
        debug!("broadcast room state to {} clients", sent);
    }

    fn run_maintenance(&mut self) {
        for uid in self.clients.check_timeouts(self.options.client_timeout) {
            debug!("connection for {} timed out; seat kept for reconnect", uid);
        }

        if self.room.prune_pointers(now_ms(), self.options.pointer_ttl_ms) {
            self.scheduler.broadcast();
        }

        if self.dirty {
            if let Some(path) = &self.options.session_path {
                if let Err(err) = persistence::save(path, &self.room.snapshot(false)) {
                    error!("failed to save session: {}", err);
                }
            }
            self.dirty = false;
        }

        self.pipeline
            .limiter_mut()
            .cleanup_stale(Instant::now(), Duration::from_secs(3600));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending::<()>().await,
    }
}

/// Performs the websocket handshake (pulling the uid out of the request
/// query), then pumps frames until the socket closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: u64,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    let mut uid_holder: Option<String> = None;
    let callback = |request: &Request, response: Response| {
        uid_holder = extract_uid(request.uri().query());
        if uid_holder.is_some() {
            Ok(response)
        } else {
            let mut error = ErrorResponse::new(Some("missing uid query parameter".to_string()));
            *error.status_mut() = StatusCode::BAD_REQUEST;
            Err(error)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!("handshake with {} failed: {}", addr, err);
            return;
        }
    };
    let Some(uid) = uid_holder else {
        return;
    };

    let (mut ws_sink, mut ws_stream) = ws.split();
    let (sender, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    if events
        .send(NetworkEvent::Connected {
            uid: uid.clone(),
            conn_id,
            addr,
            sender,
        })
        .is_err()
    {
        return;
    }

    // Writer task: drains the per-connection queue into the socket.
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sink.send(message).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader loop: text frames feed the pipeline, everything else is
    // transport noise.
    while let Some(frame) = ws_stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if events
                    .send(NetworkEvent::Frame {
                        uid: uid.clone(),
                        text,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!("ignoring binary frame from {}", uid);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!("socket error for {}: {}", uid, err);
                break;
            }
        }
    }

    let _ = events.send(NetworkEvent::Disconnected { uid, conn_id });
}

fn extract_uid(query: Option<&str>) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("uid=") {
            if !value.is_empty() && value.len() <= 256 {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_uid() {
        assert_eq!(extract_uid(Some("uid=u1")), Some("u1".to_string()));
        assert_eq!(
            extract_uid(Some("room=alpha&uid=player-7")),
            Some("player-7".to_string())
        );
        assert_eq!(extract_uid(Some("uid=")), None);
        assert_eq!(extract_uid(Some("name=bob")), None);
        assert_eq!(extract_uid(None), None);
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new("127.0.0.1:0", ServerOptions::default())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }
}
