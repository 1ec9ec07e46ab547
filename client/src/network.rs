//! Websocket driver tying the lifecycle machine, the outbound queue, and the
//! room view together.
//!
//! The driver owns the socket. Connection attempts, the handshake guard, and
//! reconnect backoff are all decided by [`ConnectionLifecycle`]; this module
//! just executes what the machine says and feeds socket events back in. Raw
//! sends go through a writer task, so a dead socket surfaces as a send error
//! and the outbound queue's fallback rules apply.

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connection::{ConnectionLifecycle, TimerEvent, HANDSHAKE_TIMEOUT};
use crate::outbound::{OutboundQueue, SendError};
use crate::state::{ClientRoomView, ViewEvent};
use shared::{ClientMessage, ConnectionState, ServerMessage};

/// Commands the embedding application can feed into a running client.
#[derive(Debug)]
pub enum ClientCommand {
    Send(ClientMessage),
    /// The host application came to the foreground; reconnect immediately if
    /// we are waiting out a backoff.
    Foreground,
    Shutdown,
}

/// Cloneable handle for talking to a running [`Client`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    pub fn send(&self, message: ClientMessage) -> bool {
        self.tx.send(ClientCommand::Send(message)).is_ok()
    }

    pub fn notify_foreground(&self) -> bool {
        self.tx.send(ClientCommand::Foreground).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(ClientCommand::Shutdown).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Websocket origin, e.g. `ws://127.0.0.1:8080`.
    pub origin: String,
    pub uid: String,
    pub dm_secret: Option<String>,
    pub display_name: Option<String>,
    pub base_delay: Duration,
    /// 0 means retry forever.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl ClientOptions {
    pub fn new(origin: &str, uid: &str) -> Self {
        Self {
            origin: origin.to_string(),
            uid: uid.to_string(),
            dm_secret: None,
            display_name: None,
            base_delay: Duration::from_millis(2000),
            max_reconnect_attempts: 0,
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

pub struct Client {
    options: ClientOptions,
    lifecycle: ConnectionLifecycle,
    queue: OutboundQueue,
    view: ClientRoomView,
    commands_tx: mpsc::UnboundedSender<ClientCommand>,
    commands_rx: mpsc::UnboundedReceiver<ClientCommand>,
}

impl Client {
    pub fn new(options: ClientOptions) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            lifecycle: ConnectionLifecycle::new(
                options.base_delay,
                options.max_reconnect_attempts,
            ),
            queue: OutboundQueue::new(),
            view: ClientRoomView::new(&options.uid),
            options,
            commands_tx,
            commands_rx,
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            tx: self.commands_tx.clone(),
        }
    }

    pub fn view(&self) -> &ClientRoomView {
        &self.view
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Drives the connection until an explicit shutdown or the reconnect
    /// budget is exhausted.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.lifecycle.connect(Instant::now());

        loop {
            match self.lifecycle.state() {
                ConnectionState::Connecting => self.connect_once().await,
                ConnectionState::Reconnecting => self.wait_for_retry().await,
                ConnectionState::Connected => {
                    // The session loop exits with a state change; landing
                    // here means it did not, so route through the close path.
                    self.lifecycle.on_close(Instant::now());
                }
                ConnectionState::Disconnected => {
                    info!("Client stopped");
                    return Ok(());
                }
                ConnectionState::Failed => {
                    return Err("exceeded maximum reconnect attempts".into());
                }
            }
        }
    }

    fn can_send_now(&self) -> bool {
        self.lifecycle.state() == ConnectionState::Connected && self.view.authenticated
    }

    async fn connect_once(&mut self) {
        let url = format!(
            "{}/?uid={}",
            self.options.origin.trim_end_matches('/'),
            self.options.uid
        );
        info!("Connecting to {}...", url);

        let deadline = self
            .lifecycle
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + HANDSHAKE_TIMEOUT);

        tokio::select! {
            result = connect_async(url) => match result {
                Ok((ws, _)) => {
                    if self.lifecycle.on_open() {
                        self.run_session(ws).await;
                    }
                }
                Err(err) => {
                    warn!("Connection attempt failed: {}", err);
                    self.lifecycle.on_close(Instant::now());
                }
            },
            _ = tokio::time::sleep_until(deadline.into()) => {
                if let Some(TimerEvent::HandshakeExpired) = self.lifecycle.poll_timer(Instant::now()) {
                    self.lifecycle.on_close(Instant::now());
                }
            }
        }
    }

    /// Waits out the reconnect backoff; a foreground notification cuts the
    /// wait short, an explicit shutdown ends it.
    async fn wait_for_retry(&mut self) {
        let deadline = self.lifecycle.next_deadline();

        tokio::select! {
            _ = wait_until(deadline) => {
                if let Some(TimerEvent::RetryNow) = self.lifecycle.poll_timer(Instant::now()) {
                    self.lifecycle.connect(Instant::now());
                }
            },
            command = self.commands_rx.recv() => match command {
                Some(ClientCommand::Send(message)) => {
                    // Not sendable; the queue decides between buffer and drop.
                    let mut raw = |_: &ClientMessage| Err(SendError);
                    self.queue.send(message, false, &mut raw);
                }
                Some(ClientCommand::Foreground) => {
                    if self.lifecycle.notify_foreground(Instant::now()) {
                        info!("Foregrounded, reconnecting immediately");
                        self.lifecycle.connect(Instant::now());
                    }
                }
                Some(ClientCommand::Shutdown) | None => {
                    self.lifecycle.disconnect();
                }
            },
        }
    }

    async fn run_session(&mut self, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut sink, mut stream) = ws.split();
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = writer_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() {
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let mut raw_send = make_raw_send(writer_tx.clone());

        // Authenticate first; it bypasses every readiness check. Profile
        // updates ride the queue until authentication completes.
        let auth = ClientMessage::Authenticate {
            secret: self.options.dm_secret.clone(),
            room_id: None,
            ack_id: None,
        };
        self.queue.send(auth, false, &mut raw_send);
        if let Some(name) = self.options.display_name.clone() {
            self.queue.send(
                ClientMessage::UpdatePlayer {
                    name: Some(name),
                    hp: None,
                    max_hp: None,
                    portrait: None,
                    mic_level: None,
                    status_effects: None,
                },
                false,
                &mut raw_send,
            );
        }

        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(&text, &mut raw_send);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        self.lifecycle.on_close(Instant::now());
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Socket error: {}", err);
                        self.lifecycle.on_close(Instant::now());
                        break;
                    }
                },
                command = self.commands_rx.recv() => match command {
                    Some(ClientCommand::Send(message)) => {
                        if let Some(ack_id) = message.ack_id() {
                            self.view.register_ack(ack_id);
                        }
                        let can_send = self.can_send_now();
                        self.queue.send(message, can_send, &mut raw_send);
                    }
                    Some(ClientCommand::Foreground) => {}
                    Some(ClientCommand::Shutdown) | None => {
                        let _ = writer_tx.send(Message::Close(None));
                        self.lifecycle.disconnect();
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    // Pre-authentication ticks drop inside the queue.
                    let can_send = self.can_send_now();
                    self.queue.send(ClientMessage::Heartbeat, can_send, &mut raw_send);
                },
            }
        }

        self.view.reset_session();
        writer.abort();
    }

    fn handle_frame<F>(&mut self, text: &str, raw_send: &mut F)
    where
        F: FnMut(&ClientMessage) -> Result<(), SendError>,
    {
        let message: ServerMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                debug!("ignoring unparseable server frame: {}", err);
                return;
            }
        };

        match self.view.apply(message, now_ms()) {
            Some(ViewEvent::Signal { from, .. }) => {
                debug!("signal payload from {}", from);
            }
            Some(ViewEvent::Kicked { reason }) => {
                warn!("kicked by server: {}", reason);
            }
            Some(ViewEvent::CommandRejected { ack_id, reason }) => {
                warn!("command {} rejected: {}", ack_id, reason);
            }
            None => {}
        }

        // Once connected and authorized, buffered traffic drains strictly in
        // FIFO order.
        if self.can_send_now() && !self.queue.is_empty() {
            let drained = self.queue.flush(true, raw_send);
            if drained > 0 {
                debug!("flushed {} queued messages", drained);
            }
        }
    }
}

fn make_raw_send(
    tx: mpsc::UnboundedSender<Message>,
) -> impl FnMut(&ClientMessage) -> Result<(), SendError> {
    move |message| {
        let json = serde_json::to_string(message).map_err(|_| SendError)?;
        tx.send(Message::Text(json)).map_err(|_| SendError)
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending::<()>().await,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
