//! WebSocket client for the replication relay.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect) scoped to one document
//! - Initial state exchange (`SyncStep1` → `SyncStep2`)
//! - Update send/receive and presence frames
//! - Offline queue for updates produced while the transport is down
//!
//! Sends are synchronous: they push onto an unbounded channel drained by a
//! writer task, so local edits never wait for the network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::presence::AwarenessMessage;
use crate::protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    Connected,
    Disconnected,
    /// Update produced by another peer
    RemoteDelta {
        peer_id: Uuid,
        clock: u64,
        update: Vec<u8>,
    },
    /// Answer to `request_sync`: everything the relay had that we lacked
    StateSynced(Vec<u8>),
    Presence {
        peer_id: Uuid,
        message: AwarenessMessage,
    },
    PeerJoined(PeerInfo),
    PeerLeft(Uuid),
}

/// Updates produced while disconnected, replayed on connect.
pub struct OfflineQueue {
    queue: VecDeque<(u64, Vec<u8>)>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Returns `false` when full.
    pub fn enqueue(&mut self, clock: u64, payload: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back((clock, payload));
        true
    }

    pub fn drain(&mut self) -> Vec<(u64, Vec<u8>)> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|(_, payload)| payload.len()).sum()
    }
}

pub struct RelayClient {
    peer: PeerInfo,
    document_id: String,
    server_url: String,
    auth_token: Option<String>,

    state: Arc<RwLock<ConnectionState>>,
    clock: AtomicU64,
    offline_queue: Mutex<OfflineQueue>,

    outgoing_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    event_tx: mpsc::Sender<RelayEvent>,
    event_rx: Option<mpsc::Receiver<RelayEvent>>,

    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl RelayClient {
    pub fn new(
        peer: PeerInfo,
        document_id: impl Into<String>,
        server_url: impl Into<String>,
        auth_token: Option<String>,
        event_capacity: usize,
        offline_queue_limit: usize,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_capacity.max(1));
        Self {
            peer,
            document_id: document_id.into(),
            server_url: server_url.into(),
            auth_token,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            clock: AtomicU64::new(0),
            offline_queue: Mutex::new(OfflineQueue::new(offline_queue_limit)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
            reader: None,
            writer: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), self.document_id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        read_state(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn clock(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Credential used by the next `connect`.
    pub fn set_auth_token(&mut self, auth_token: Option<String>) {
        self.auth_token = auth_token;
    }

    pub fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Open the connection and spawn the reader/writer tasks.
    ///
    /// May be called again after the connection dropped: the previous tasks
    /// are released and updates queued in between are replayed.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.outgoing_tx = None;
        self.writer = None;
        write_state(&self.state, ConnectionState::Connecting);

        let url = self.url();
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| self.fail(ProtocolError::Handshake(e.to_string())))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| self.fail(ProtocolError::Handshake(e.to_string())))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| self.fail(ProtocolError::Handshake(e.to_string())))?;
        info!("Connected to relay at {}", url);

        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        self.writer = Some(tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        }));

        let join = SyncMessage::peer_joined(&self.document_id, &self.peer)?.encode()?;
        let _ = out_tx.send(join);

        let queued = match self.offline_queue.lock() {
            Ok(mut queue) => queue.drain(),
            Err(poisoned) => poisoned.into_inner().drain(),
        };
        if !queued.is_empty() {
            info!("Replaying {} queued updates", queued.len());
        }
        for (clock, payload) in queued {
            let msg = SyncMessage::delta(self.peer.peer_id, &self.document_id, clock, payload);
            let _ = out_tx.send(msg.encode()?);
        }
        self.outgoing_tx = Some(out_tx);

        write_state(&self.state, ConnectionState::Connected);
        let _ = self.event_tx.send(RelayEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let peer_id = self.peer.peer_id;
        self.reader = Some(tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        let msg = match SyncMessage::decode(&bytes) {
                            Ok(msg) => msg,
                            Err(e) => {
                                warn!("Dropping undecodable frame: {}", e);
                                continue;
                            }
                        };
                        // The relay may echo our own frames back.
                        if msg.peer_id == peer_id {
                            continue;
                        }
                        if let Some(event) = into_event(msg) {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            write_state(&state, ConnectionState::Disconnected);
            let _ = event_tx.send(RelayEvent::Disconnected).await;
            debug!("Relay reader finished");
        }));

        Ok(())
    }

    fn fail(&self, error: ProtocolError) -> ProtocolError {
        write_state(&self.state, ConnectionState::Disconnected);
        warn!("Relay connection to {} failed: {}", self.url(), error);
        error
    }

    fn send_frame(&self, frame: Vec<u8>) -> Result<(), ProtocolError> {
        match &self.outgoing_tx {
            Some(tx) => tx.send(frame).map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Ask the relay for everything missing from `state_vector`.
    pub fn request_sync(&self, state_vector: Vec<u8>) -> Result<(), ProtocolError> {
        let msg = SyncMessage::sync_step1(self.peer.peer_id, &self.document_id, state_vector);
        self.send_frame(msg.encode()?)
    }

    /// Send a local update; queued while not connected.
    pub fn send_update(&self, update: Vec<u8>) -> Result<(), ProtocolError> {
        let clock = self.clock.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.is_connected() {
            let mut queue = self
                .offline_queue
                .lock()
                .map_err(|_| ProtocolError::ConnectionClosed)?;
            if !queue.enqueue(clock, update) {
                return Err(ProtocolError::QueueFull);
            }
            trace!("Queued update {} while offline", clock);
            return Ok(());
        }

        let msg = SyncMessage::delta(self.peer.peer_id, &self.document_id, clock, update);
        self.send_frame(msg.encode()?)
    }

    /// Publish presence. Dropped while offline; the next announce replaces it.
    pub fn send_presence(&self, message: &AwarenessMessage) -> Result<(), ProtocolError> {
        if !self.is_connected() {
            return Ok(());
        }
        let msg = SyncMessage::awareness(self.peer.peer_id, &self.document_id, self.clock(), message)?;
        self.send_frame(msg.encode()?)
    }

    pub fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send_frame(SyncMessage::ping(self.peer.peer_id, &self.document_id).encode()?)
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        // Dropping the sender lets the writer flush and close the socket.
        self.outgoing_tx = None;
        self.writer = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        write_state(&self.state, ConnectionState::Disconnected);
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

fn into_event(msg: SyncMessage) -> Option<RelayEvent> {
    match msg.msg_type {
        MessageType::Delta => Some(RelayEvent::RemoteDelta {
            peer_id: msg.peer_id,
            clock: msg.clock,
            update: msg.payload,
        }),
        MessageType::SyncStep2 => Some(RelayEvent::StateSynced(msg.payload)),
        MessageType::Awareness => match msg.awareness_message() {
            Ok(message) => Some(RelayEvent::Presence {
                peer_id: msg.peer_id,
                message,
            }),
            Err(e) => {
                warn!("Bad awareness payload from {}: {}", msg.peer_id, e);
                None
            }
        },
        MessageType::PeerJoined => msg.peer_info().ok().map(RelayEvent::PeerJoined),
        MessageType::PeerLeft => Some(RelayEvent::PeerLeft(msg.peer_id)),
        MessageType::Pong => {
            trace!("Pong from relay");
            None
        }
        MessageType::SyncStep1 | MessageType::Ping => None,
    }
}

fn read_state(state: &RwLock<ConnectionState>) -> ConnectionState {
    match state.read() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn write_state(state: &RwLock<ConnectionState>, value: ConnectionState) {
    match state.write() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}
