//! In-process relay for integration tests.
//!
//! Speaks the same frames as a production relay: one room per document id
//! taken from the request path, `SyncStep1` answered with the missing
//! state, deltas applied to the room's document and fanned out.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::{ReadTxn, StateVector, Transact, Update};

use formsync_collab::protocol::{MessageType, SyncMessage};
use formsync_collab::{FormSession, SessionConfig};
use formsync_core::{FormDocument, FormSnapshot};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Room {
    doc: yrs::Doc,
    fanout: broadcast::Sender<(Uuid, Arc<Vec<u8>>)>,
}

impl Room {
    fn new() -> Self {
        let (fanout, _) = broadcast::channel(256);
        Self {
            doc: yrs::Doc::new(),
            fanout,
        }
    }
}

#[derive(Default)]
struct RelayState {
    rooms: Mutex<HashMap<String, Room>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    /// Bumped to close every connection opened before it.
    epoch: AtomicU64,
    kick: Notify,
}

pub struct TestRelay {
    pub url: String,
    state: Arc<RelayState>,
}

impl TestRelay {
    pub async fn start() -> Self {
        init_logging();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(RelayState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        log::debug!("Test relay connection ended: {e}");
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}"),
            state,
        }
    }

    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            sync_timeout_ms: 2_000,
            undo_capture_timeout_ms: 0,
            ..SessionConfig::default()
        }
        .with_relay_url(self.url.clone())
    }

    /// Store `update` as the existing content of `doc_id`.
    pub fn seed(&self, doc_id: &str, update: &[u8]) {
        let mut rooms = self.state.rooms.lock().unwrap();
        let room = rooms.entry(doc_id.to_string()).or_insert_with(Room::new);
        let mut txn = room.doc.transact_mut();
        txn.apply_update(Update::decode_v1(update).unwrap()).unwrap();
    }

    /// The relay's copy of `doc_id` as a view model.
    pub fn snapshot(&self, doc_id: &str) -> Option<FormSnapshot> {
        let update = {
            let rooms = self.state.rooms.lock().unwrap();
            let room = rooms.get(doc_id)?;
            let txn = room.doc.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };
        let document = FormDocument::new();
        document.apply_update(&update, None).ok()?;
        Some(document.snapshot())
    }

    /// Poll the relay's copy until `check` holds.
    pub async fn wait_for<F>(&self, doc_id: &str, check: F) -> FormSnapshot
    where
        F: Fn(&FormSnapshot) -> bool,
    {
        for _ in 0..200 {
            if let Some(snapshot) = self.snapshot(doc_id) {
                if check(&snapshot) {
                    return snapshot;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("relay copy of {doc_id} never reached the expected state");
    }

    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth_headers.lock().unwrap().clone()
    }

    /// Close every live connection without a close frame. Rooms and their
    /// documents stay, and new connections are accepted as usual.
    pub fn drop_connections(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.kick.notify_waiters();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<RelayState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let captured: Arc<Mutex<(String, Option<String>)>> = Arc::default();
    let capture = captured.clone();
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let auth = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let path = request.uri().path().trim_start_matches('/').to_string();
            *capture.lock().unwrap() = (path, auth);
            Ok(response)
        },
    )
    .await?;

    let epoch = state.epoch.load(Ordering::SeqCst);
    let (doc_id, auth) = captured.lock().unwrap().clone();
    state.auth_headers.lock().unwrap().push(auth);

    let (fanout, mut fanout_rx) = {
        let mut rooms = state.rooms.lock().unwrap();
        let room = rooms.entry(doc_id.clone()).or_insert_with(Room::new);
        (room.fanout.clone(), room.fanout.subscribe())
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut peer_id: Option<Uuid> = None;

    while state.epoch.load(Ordering::SeqCst) == epoch {
        tokio::select! {
            _ = state.kick.notified() => break,
            frame = ws_receiver.next() => {
                let bytes: Vec<u8> = match frame {
                    Some(Ok(Message::Binary(data))) => data.into(),
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                };
                let msg = SyncMessage::decode(&bytes)?;
                match msg.msg_type {
                    MessageType::PeerJoined => {
                        peer_id = Some(msg.peer_id);
                        let _ = fanout.send((msg.peer_id, Arc::new(bytes)));
                    }
                    MessageType::SyncStep1 => {
                        let diff = {
                            let rooms = state.rooms.lock().unwrap();
                            let room = rooms.get(&doc_id).ok_or("room vanished")?;
                            let sv = StateVector::decode_v1(&msg.payload)?;
                            let txn = room.doc.transact();
                            txn.encode_diff_v1(&sv)
                        };
                        let reply = SyncMessage::sync_step2(Uuid::nil(), &doc_id, diff).encode()?;
                        ws_sender.send(Message::Binary(reply.into())).await?;
                    }
                    MessageType::Delta => {
                        {
                            let rooms = state.rooms.lock().unwrap();
                            if let Some(room) = rooms.get(&doc_id) {
                                let update = Update::decode_v1(&msg.payload)?;
                                let mut txn = room.doc.transact_mut();
                                let _ = txn.apply_update(update);
                            }
                        }
                        let _ = fanout.send((msg.peer_id, Arc::new(bytes)));
                    }
                    MessageType::Awareness => {
                        let _ = fanout.send((msg.peer_id, Arc::new(bytes)));
                    }
                    MessageType::Ping => {
                        let pong = SyncMessage::pong(Uuid::nil(), &doc_id).encode()?;
                        ws_sender.send(Message::Binary(pong.into())).await?;
                    }
                    other => log::debug!("Test relay ignoring {other:?}"),
                }
            }
            shared = fanout_rx.recv() => {
                match shared {
                    Ok((from, bytes)) => {
                        if Some(from) == peer_id {
                            continue;
                        }
                        ws_sender.send(Message::Binary(bytes.as_ref().clone().into())).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(peer_id) = peer_id {
        let left = SyncMessage::peer_left(peer_id, &doc_id).encode()?;
        let _ = fanout.send((peer_id, Arc::new(left)));
    }
    Ok(())
}

/// Accepts WebSocket connections and never answers a frame.
pub async fn start_silent_relay() -> String {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });
    format!("ws://{addr}")
}

/// Handle relay events until `check` holds.
pub async fn pump_until<F>(session: &mut FormSession, check: F)
where
    F: Fn(&FormSession) -> bool,
{
    let result = timeout(Duration::from_secs(3), async {
        while !check(session) {
            if !session.next_event().await {
                sleep(Duration::from_millis(5)).await;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "condition not reached before timeout");
}
