//! Connection registry for the websocket server.
//!
//! Maps authenticated uids to their live websocket sender handles, tracks
//! last-seen times for timeout sweeping, and enforces the connection cap.
//! Player entities live in the room state and survive disconnects; this
//! registry only tracks live sockets.

use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// A live client connection and its outbound sender.
#[derive(Debug)]
pub struct RemoteClient {
    pub uid: String,
    pub conn_id: u64,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub sender: mpsc::UnboundedSender<Message>,
}

impl RemoteClient {
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Outcome of registering a connection for a uid.
#[derive(Debug)]
pub enum AddOutcome {
    Added,
    /// Same uid reconnected; the previous socket's sender is returned so the
    /// caller can close it.
    Replaced(mpsc::UnboundedSender<Message>),
    /// At capacity; the rejected sender is handed back so the caller can say
    /// goodbye before dropping the socket.
    Full(mpsc::UnboundedSender<Message>),
}

pub struct ClientManager {
    clients: HashMap<String, RemoteClient>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Registers a connection, replacing any previous socket for the uid.
    pub fn add_client(
        &mut self,
        uid: &str,
        conn_id: u64,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Message>,
    ) -> AddOutcome {
        if let Some(previous) = self.clients.remove(uid) {
            info!("Client {} reconnected from {}", uid, addr);
            self.clients.insert(
                uid.to_string(),
                RemoteClient {
                    uid: uid.to_string(),
                    conn_id,
                    addr,
                    last_seen: Instant::now(),
                    sender,
                },
            );
            return AddOutcome::Replaced(previous.sender);
        }

        if self.clients.len() >= self.max_clients {
            warn!("Connection from {} refused: server full", addr);
            return AddOutcome::Full(sender);
        }

        info!("Client {} connected from {}", uid, addr);
        self.clients.insert(
            uid.to_string(),
            RemoteClient {
                uid: uid.to_string(),
                conn_id,
                addr,
                last_seen: Instant::now(),
                sender,
            },
        );
        AddOutcome::Added
    }

    /// Removes a connection, but only if it is still the registered one.
    /// A disconnect event for a socket that was already replaced by a
    /// reconnect must not tear down the new connection.
    pub fn remove_client(&mut self, uid: &str, conn_id: u64) -> bool {
        match self.clients.get(uid) {
            Some(client) if client.conn_id == conn_id => {
                self.clients.remove(uid);
                info!("Client {} disconnected", uid);
                true
            }
            _ => false,
        }
    }

    pub fn touch(&mut self, uid: &str) {
        if let Some(client) = self.clients.get_mut(uid) {
            client.last_seen = Instant::now();
        }
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.clients.contains_key(uid)
    }

    /// Sends a raw websocket message to one client.
    pub fn send_to_client(&self, uid: &str, message: Message) -> bool {
        match self.clients.get(uid) {
            Some(client) => client.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Queues a message for every connected client; returns the fan-out count.
    pub fn broadcast_to_all(&self, message: Message) -> usize {
        let mut sent = 0;
        for client in self.clients.values() {
            if client.sender.send(message.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Collects uids whose sockets have been silent past the timeout and
    /// drops them. The player entities survive for reconnection.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<String> {
        let timed_out: Vec<String> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.uid.clone())
            .collect();

        for uid in &timed_out {
            info!("Client {} timed out", uid);
            self.clients.remove(uid);
        }

        timed_out
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
