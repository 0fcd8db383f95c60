//! The collaboration engine for one open form.
//!
//! ```text
//! initialize(doc_id) ──► RelayClient::connect ──► SyncStep1 ──► StateSynced
//!                                                                   │
//!          ┌────────────────────────────────────────────────────────┘
//!          ▼
//!   ensure_structure ──► ObserverTree::attach ──► reconstruct ──► SchemaChanged
//!
//! mutation ──► plan (Edits) ──► one origin-tagged txn ──► observers mark
//!          ──► publish update ──► record undo ──► rearm + reconstruct once
//! ```
//!
//! All document work happens synchronously on the caller's task; only
//! `initialize` and `next_event` await.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use formsync_core::{FieldType, FieldUpdate, FormDocument, FormSnapshot, LayoutUpdate};

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::mutations::{self, Edit, PlanResult};
use crate::observers::{ChangeSet, ObserverTree};
use crate::presence::{AwarenessMessage, Collaborator, PresenceRoom, PresenceState};
use crate::protocol::{PeerInfo, ProtocolError};
use crate::relay::{RelayClient, RelayEvent};
use crate::undo::UndoHistory;

/// Origin tag for updates merged from other replicas.
pub const REMOTE_ORIGIN: &str = "remote";
/// Origin tag for the structure installed after the first sync.
const INIT_ORIGIN: &str = "init";

/// Notifications for the application.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SchemaChanged(Arc<FormSnapshot>),
    ConnectionChanged(bool),
    LoadingChanged(bool),
    CollaboratorsChanged(Vec<Collaborator>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
}

enum Link {
    /// Local-only replica; updates collect here for the host to ship.
    Offline { outbox: Vec<Vec<u8>> },
    Relay {
        client: RelayClient,
        events: mpsc::Receiver<RelayEvent>,
    },
}

struct ActiveDocument {
    document_id: String,
    // Declared before `document` so subscriptions drop first.
    observers: ObserverTree,
    changes: Arc<ChangeSet>,
    document: FormDocument,
    link: Link,
    synced: bool,
}

impl ActiveDocument {
    fn publish(&mut self, update: Vec<u8>) {
        match &mut self.link {
            Link::Offline { outbox } => outbox.push(update),
            Link::Relay { client, .. } => {
                if let Err(e) = client.send_update(update) {
                    warn!("Failed to send update for {}: {}", self.document_id, e);
                }
            }
        }
    }

    fn relay(&self) -> Option<&RelayClient> {
        match &self.link {
            Link::Relay { client, .. } => Some(client),
            Link::Offline { .. } => None,
        }
    }
}

pub struct FormSession {
    config: SessionConfig,
    peer_id: Uuid,
    user: Option<LocalUser>,
    active: Option<ActiveDocument>,

    snapshot: Arc<FormSnapshot>,
    selected_page_id: Option<String>,
    focused_field_id: Option<String>,

    undo: UndoHistory,
    presence: PresenceRoom,

    connected: bool,
    loading: bool,

    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

impl FormSession {
    pub fn new(config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let undo = UndoHistory::new(config.undo_capture_timeout(), config.undo_depth);
        Self {
            config,
            peer_id: Uuid::new_v4(),
            user: None,
            active: None,
            snapshot: Arc::new(FormSnapshot::default()),
            selected_page_id: None,
            focused_field_id: None,
            undo,
            presence: PresenceRoom::default(),
            connected: false,
            loading: false,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn document_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.document_id.as_str())
    }

    pub fn snapshot(&self) -> Arc<FormSnapshot> {
        self.snapshot.clone()
    }

    pub fn selected_page_id(&self) -> Option<&str> {
        self.selected_page_id.as_deref()
    }

    pub fn focused_field_id(&self) -> Option<&str> {
        self.focused_field_id.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Initial state is merged and the view model is authoritative.
    pub fn is_ready(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.synced)
    }

    pub fn collaborators(&self) -> Vec<Collaborator> {
        self.presence.collaborators()
    }

    /// Live subscriptions; tracks the document shape.
    pub fn observer_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.observers.observer_count())
    }

    /// Origin that tags this user's transactions and scopes undo.
    pub fn origin(&self) -> String {
        match &self.user {
            Some(user) => user.id.clone(),
            None => format!("peer-{}", self.peer_id),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.emit(SessionEvent::ConnectionChanged(connected));
        }
    }

    fn set_loading(&mut self, loading: bool) {
        if self.loading != loading {
            self.loading = loading;
            self.emit(SessionEvent::LoadingChanged(loading));
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Lifecycle
    // ───────────────────────────────────────────────────────────────

    /// Open `document_id` through the relay and wait for the initial sync.
    ///
    /// Any other open document is released first. Initializing the document
    /// that is already open keeps the local replica and
    /// [`reconnect`](Self::reconnect)s instead, so offline edits survive.
    pub async fn initialize(&mut self, document_id: &str, auth_token: Option<&str>) -> Result<()> {
        let reopening = self.active.as_ref().is_some_and(|a| {
            a.synced && a.document_id == document_id && matches!(a.link, Link::Relay { .. })
        });
        if reopening {
            return self.reconnect(auth_token).await;
        }

        self.disconnect();
        self.set_loading(true);
        info!("Opening form {} via {}", document_id, self.config.relay_url);

        let name = self.user.as_ref().map_or("anonymous", |u| u.name.as_str());
        let mut client = RelayClient::new(
            PeerInfo::with_id(self.peer_id, name),
            document_id,
            self.config.relay_url.clone(),
            auth_token.map(str::to_string),
            self.config.relay_event_capacity,
            self.config.offline_queue_limit,
        );
        let Some(events) = client.take_event_rx() else {
            return Err(self.abort_initialize(SessionError::NotReady));
        };
        if let Err(e) = client.connect().await {
            return Err(self.abort_initialize(e.into()));
        }

        self.open(document_id, Link::Relay { client, events });

        let state_vector = match &self.active {
            Some(active) => active.document.encode_state_vector(),
            None => return Err(self.abort_initialize(SessionError::NotReady)),
        };
        let requested = match self.active.as_ref().and_then(ActiveDocument::relay) {
            Some(client) => client.request_sync(state_vector),
            None => Ok(()),
        };
        if let Err(e) = requested {
            return Err(self.abort_initialize(e.into()));
        }

        let timeout = self.config.sync_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.is_ready() {
            match tokio::time::timeout_at(deadline, self.recv_relay_event()).await {
                Err(_) => return Err(self.abort_initialize(SessionError::SyncTimeout(timeout))),
                Ok(None) => return Err(self.abort_initialize(SessionError::ClosedBeforeSync)),
                Ok(Some(RelayEvent::Disconnected)) => {
                    return Err(self.abort_initialize(SessionError::ClosedBeforeSync));
                }
                Ok(Some(event)) => self.handle_relay_event(event),
            }
        }
        Ok(())
    }

    /// Re-open the relay connection of the current document.
    ///
    /// The replica, its observers and the undo history are kept. Updates
    /// made while disconnected are replayed, then the relay is asked for
    /// everything this replica is missing. On failure the document stays
    /// open for local editing.
    pub async fn reconnect(&mut self, auth_token: Option<&str>) -> Result<()> {
        let has_relay = self
            .active
            .as_ref()
            .is_some_and(|a| a.synced && a.relay().is_some());
        if !has_relay {
            warn!("reconnect ignored: no relay document open");
            return Err(SessionError::NotReady);
        }
        let connected = self
            .active
            .as_ref()
            .and_then(ActiveDocument::relay)
            .is_some_and(RelayClient::is_connected);
        if connected {
            debug!("reconnect: already connected");
            return Ok(());
        }

        // Events from the dropped connection must not end the new one.
        self.process_pending();
        self.set_loading(true);

        let connected = match self.active.as_mut().map(|a| (&mut a.link, &a.document)) {
            Some((Link::Relay { client, .. }, document)) => {
                client.set_auth_token(auth_token.map(str::to_string));
                match client.connect().await {
                    Ok(()) => {
                        info!(
                            "Reconnected to {}, requesting missing state",
                            client.document_id()
                        );
                        client.request_sync(document.encode_state_vector())
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Err(ProtocolError::ConnectionClosed),
        };
        if let Err(e) = connected {
            return Err(self.abort_reconnect(e.into()));
        }

        let timeout = self.config.sync_timeout();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.recv_relay_event()).await {
                Err(_) => return Err(self.abort_reconnect(SessionError::SyncTimeout(timeout))),
                Ok(None) => return Err(self.abort_reconnect(SessionError::ClosedBeforeSync)),
                Ok(Some(RelayEvent::Disconnected)) if self.connected => {
                    return Err(self.abort_reconnect(SessionError::ClosedBeforeSync));
                }
                Ok(Some(RelayEvent::Disconnected)) => debug!("Skipping stale disconnect"),
                Ok(Some(event @ RelayEvent::StateSynced(_))) => {
                    self.handle_relay_event(event);
                    break;
                }
                Ok(Some(event)) => self.handle_relay_event(event),
            }
        }

        self.set_loading(false);
        self.announce_presence();
        Ok(())
    }

    fn abort_reconnect(&mut self, error: SessionError) -> SessionError {
        warn!("Reconnect failed: {}", error);
        if let Some(Link::Relay { client, .. }) = self.active.as_mut().map(|a| &mut a.link) {
            client.disconnect();
        }
        self.set_loading(false);
        self.set_connected(false);
        error
    }

    fn abort_initialize(&mut self, error: SessionError) -> SessionError {
        warn!("Initialization failed: {}", error);
        self.disconnect();
        self.set_loading(false);
        self.set_connected(false);
        error
    }

    /// Open `document_id` as a local replica with no relay.
    ///
    /// `initial_state` is a full update from another replica, if any. The
    /// document is ready immediately; produced updates are collected for
    /// [`take_pending_updates`](Self::take_pending_updates).
    pub fn open_offline(&mut self, document_id: &str, initial_state: Option<&[u8]>) -> Result<()> {
        self.disconnect();
        self.open(document_id, Link::Offline { outbox: Vec::new() });
        if let Some(state) = initial_state {
            if let Err(e) = self.apply_update_inner(state) {
                self.disconnect();
                return Err(e);
            }
        }
        self.complete_sync();
        Ok(())
    }

    fn open(&mut self, document_id: &str, link: Link) {
        let document = FormDocument::new();
        let changes = Arc::new(ChangeSet::default());
        let mut observers = ObserverTree::new(changes.clone());
        observers.attach(&document);
        self.presence = PresenceRoom::new(self.user.as_ref().map(|u| u.id.clone()));
        self.active = Some(ActiveDocument {
            document_id: document_id.to_string(),
            observers,
            changes,
            document,
            link,
            synced: false,
        });
    }

    /// Install missing structure, publish the first view model and start
    /// presence. Runs once per opened document.
    fn complete_sync(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.synced {
            return;
        }
        let update = {
            let mut txn = active.document.transact_mut_with(INIT_ORIGIN);
            active
                .document
                .ensure_structure(&mut txn)
                .then(|| txn.encode_update_v1())
        };
        if let Some(update) = update {
            active.publish(update);
        }
        active.changes.take();
        active.observers.attach(&active.document);
        active.synced = true;
        info!("Form {} ready", active.document_id);

        self.rebuild();
        self.set_loading(false);
        self.announce_presence();
    }

    /// Release the open document. Safe to call at any time, repeatedly.
    ///
    /// Observers are detached before the transport closes, so a late
    /// network event cannot reach a half-released document.
    pub fn disconnect(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        debug!("Releasing form {}", active.document_id);

        active.observers.teardown();
        if let Link::Relay { client, events } = &mut active.link {
            if let Some(user) = &self.user {
                let leave = AwarenessMessage::Leave {
                    user_id: user.id.clone(),
                };
                let _ = client.send_presence(&leave);
            }
            events.close();
            client.disconnect();
        }
        drop(active);

        let had_collaborators = self.presence.peer_count() > 0;
        self.presence.clear();
        self.undo.clear();
        self.selected_page_id = None;
        self.focused_field_id = None;
        self.snapshot = Arc::new(FormSnapshot::default());

        self.emit(SessionEvent::SchemaChanged(self.snapshot.clone()));
        if had_collaborators {
            self.emit(SessionEvent::CollaboratorsChanged(Vec::new()));
        }
        self.set_connected(false);
        self.set_loading(false);
    }

    // ───────────────────────────────────────────────────────────────
    // Relay events
    // ───────────────────────────────────────────────────────────────

    async fn recv_relay_event(&mut self) -> Option<RelayEvent> {
        match self.active.as_mut().map(|a| &mut a.link) {
            Some(Link::Relay { events, .. }) => events.recv().await,
            _ => None,
        }
    }

    /// Wait for and handle one relay event. Returns `false` when there is
    /// no relay to listen to.
    pub async fn next_event(&mut self) -> bool {
        match self.recv_relay_event().await {
            Some(event) => {
                self.handle_relay_event(event);
                true
            }
            None => false,
        }
    }

    /// Handle every relay event already received, without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let event = match self.active.as_mut().map(|a| &mut a.link) {
                Some(Link::Relay { events, .. }) => events.try_recv().ok(),
                _ => None,
            };
            let Some(event) = event else {
                return handled;
            };
            self.handle_relay_event(event);
            handled += 1;
        }
    }

    fn handle_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected => self.set_connected(true),
            RelayEvent::Disconnected => {
                info!("Relay connection lost");
                self.set_connected(false);
                if self.presence.peer_count() > 0 {
                    self.presence.clear();
                    self.emit(SessionEvent::CollaboratorsChanged(Vec::new()));
                }
            }
            RelayEvent::RemoteDelta { peer_id, clock, update } => {
                debug!("Delta {} from {}", clock, peer_id);
                if let Err(e) = self.apply_update_inner(&update) {
                    warn!("Dropping update from {}: {}", peer_id, e);
                }
            }
            RelayEvent::StateSynced(update) => {
                if let Err(e) = self.apply_update_inner(&update) {
                    warn!("Initial state could not be applied: {}", e);
                }
                self.complete_sync();
            }
            RelayEvent::Presence { peer_id, message } => {
                if self.presence.handle_message(peer_id, &message) {
                    self.emit(SessionEvent::CollaboratorsChanged(self.presence.collaborators()));
                }
            }
            RelayEvent::PeerJoined(info) => {
                debug!("Peer {} ({}) joined", info.peer_id, info.name);
                // Newcomers only learn about us from a fresh announce.
                self.announce_presence();
            }
            RelayEvent::PeerLeft(peer_id) => {
                if self.presence.remove_peer(peer_id) {
                    self.emit(SessionEvent::CollaboratorsChanged(self.presence.collaborators()));
                }
            }
        }
    }

    fn apply_update_inner(&mut self, update: &[u8]) -> Result<()> {
        let active = self.active.as_ref().ok_or(SessionError::NotReady)?;
        active.document.apply_update(update, Some(REMOTE_ORIGIN))?;
        self.refresh();
        Ok(())
    }

    /// Merge an update from another replica delivered outside the relay.
    pub fn apply_remote_update(&mut self, update: &[u8]) -> Result<()> {
        self.apply_update_inner(update)
    }

    /// Full document state as a single update.
    pub fn encode_state_as_update(&self) -> Option<Vec<u8>> {
        self.active.as_ref().map(|a| a.document.encode_state_as_update())
    }

    /// Drain updates produced by an offline replica.
    pub fn take_pending_updates(&mut self) -> Vec<Vec<u8>> {
        match self.active.as_mut().map(|a| &mut a.link) {
            Some(Link::Offline { outbox }) => std::mem::take(outbox),
            _ => Vec::new(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // View model
    // ───────────────────────────────────────────────────────────────

    /// Re-arm observers for whatever changed and rebuild once. A refresh
    /// with nothing marked does nothing, so repeated calls are harmless.
    fn refresh(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let marks = active.changes.take();
        if marks.is_empty() {
            return;
        }
        if marks.is_structural() {
            active.observers.rearm(&active.document, &marks);
        }
        self.rebuild();
    }

    fn rebuild(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        // Nothing new can be marked while no transaction is open.
        active.changes.take();
        self.snapshot = Arc::new(active.document.snapshot());

        let selection_valid = self
            .selected_page_id
            .as_deref()
            .is_some_and(|id| self.snapshot.page(id).is_some());
        if !selection_valid {
            self.selected_page_id = self.snapshot.pages.first().map(|p| p.id.clone());
        }
        self.emit(SessionEvent::SchemaChanged(self.snapshot.clone()));
    }

    // ───────────────────────────────────────────────────────────────
    // Mutation API
    // ───────────────────────────────────────────────────────────────

    fn ready_document(&self, operation: &str) -> Option<&FormDocument> {
        match &self.active {
            Some(active) if active.synced => Some(&active.document),
            Some(_) => {
                warn!("{} ignored: initial sync not complete", operation);
                None
            }
            None => {
                warn!("{} ignored: no document open", operation);
                None
            }
        }
    }

    /// Apply `edits` in one transaction tagged with `origin`, publish the
    /// update and rebuild. Returns the inverses of what was applied.
    fn run_edits(&mut self, origin: &str, edits: &[Edit]) -> Vec<Edit> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };
        let (inverses, update) = {
            let mut txn = active.document.transact_mut_with(origin);
            let inverses = mutations::apply_all(&mut txn, &active.document, edits);
            let update = (!inverses.is_empty()).then(|| txn.encode_update_v1());
            (inverses, update)
        };
        if let Some(update) = update {
            active.publish(update);
        }
        self.refresh();
        inverses
    }

    fn commit(&mut self, operation: &str, plan: PlanResult) -> Option<Option<String>> {
        let plan = match plan {
            Ok(plan) => plan,
            Err(skip) => {
                skip.log(operation);
                return None;
            }
        };
        let origin = self.origin();
        let inverses = self.run_edits(&origin, &plan.edits);
        if inverses.is_empty() {
            debug!("{} changed nothing", operation);
            return None;
        }
        self.undo.record(&origin, inverses);
        Some(plan.created)
    }

    fn plan_and_commit<F>(&mut self, operation: &str, plan: F) -> Option<Option<String>>
    where
        F: FnOnce(&FormDocument) -> PlanResult,
    {
        let plan = plan(self.ready_document(operation)?);
        self.commit(operation, plan)
    }

    /// Append a page and select it.
    pub fn add_empty_page(&mut self) -> bool {
        match self.plan_and_commit("add_empty_page", mutations::add_empty_page) {
            Some(created) => {
                if let Some(page_id) = created {
                    self.selected_page_id = Some(page_id);
                }
                self.announce_presence();
                true
            }
            None => false,
        }
    }

    pub fn remove_page(&mut self, page_id: &str) -> bool {
        let index = self.snapshot.page_index(page_id);
        let was_selected = self.selected_page_id.as_deref() == Some(page_id);
        if self
            .plan_and_commit("remove_page", |doc| mutations::remove_page(doc, page_id))
            .is_none()
        {
            return false;
        }
        if was_selected {
            let next = index.unwrap_or(0).saturating_sub(1);
            self.selected_page_id = self.snapshot.pages.get(next).map(|p| p.id.clone());
            self.announce_presence();
        }
        true
    }

    pub fn duplicate_page(&mut self, page_id: &str) -> bool {
        self.plan_and_commit("duplicate_page", |doc| mutations::duplicate_page(doc, page_id))
            .is_some()
    }

    pub fn reorder_pages(&mut self, old_index: usize, new_index: usize) -> bool {
        self.plan_and_commit("reorder_pages", |doc| {
            mutations::reorder_pages(doc, old_index, new_index)
        })
        .is_some()
    }

    pub fn update_page_title(&mut self, page_id: &str, title: &str) -> bool {
        self.plan_and_commit("update_page_title", |doc| {
            mutations::update_page_title(doc, page_id, title)
        })
        .is_some()
    }

    /// Append a field; returns its id.
    pub fn add_field(&mut self, page_id: &str, field_type: FieldType, data: &FieldUpdate) -> Option<String> {
        self.plan_and_commit("add_field", |doc| mutations::add_field(doc, page_id, field_type, data))
            .flatten()
    }

    /// Insert a field at `index`, clamped to the page's field count.
    pub fn add_field_at_index(
        &mut self,
        page_id: &str,
        field_type: FieldType,
        data: &FieldUpdate,
        index: usize,
    ) -> Option<String> {
        self.plan_and_commit("add_field_at_index", |doc| {
            mutations::add_field_at_index(doc, page_id, field_type, data, index)
        })
        .flatten()
    }

    pub fn update_field(&mut self, page_id: &str, field_id: &str, updates: &FieldUpdate) -> bool {
        self.plan_and_commit("update_field", |doc| {
            mutations::update_field(doc, page_id, field_id, updates)
        })
        .is_some()
    }

    pub fn remove_field(&mut self, page_id: &str, field_id: &str) -> bool {
        let removed = self
            .plan_and_commit("remove_field", |doc| mutations::remove_field(doc, page_id, field_id))
            .is_some();
        if removed && self.focused_field_id.as_deref() == Some(field_id) {
            self.focused_field_id = None;
            self.announce_presence();
        }
        removed
    }

    pub fn reorder_fields(&mut self, page_id: &str, old_index: usize, new_index: usize) -> bool {
        self.plan_and_commit("reorder_fields", |doc| {
            mutations::reorder_fields(doc, page_id, old_index, new_index)
        })
        .is_some()
    }

    /// Copy a field right after itself; returns the copy's id.
    pub fn duplicate_field(&mut self, page_id: &str, field_id: &str) -> Option<String> {
        self.plan_and_commit("duplicate_field", |doc| {
            mutations::duplicate_field(doc, page_id, field_id)
        })
        .flatten()
    }

    pub fn move_field_between_pages(
        &mut self,
        src_page_id: &str,
        dst_page_id: &str,
        field_id: &str,
        index: Option<usize>,
    ) -> bool {
        self.plan_and_commit("move_field_between_pages", |doc| {
            mutations::move_field_between_pages(doc, src_page_id, dst_page_id, field_id, index)
        })
        .is_some()
    }

    /// Append a copy to another page; returns the copy's id.
    pub fn copy_field_to_page(
        &mut self,
        src_page_id: &str,
        dst_page_id: &str,
        field_id: &str,
    ) -> Option<String> {
        self.plan_and_commit("copy_field_to_page", |doc| {
            mutations::copy_field_to_page(doc, src_page_id, dst_page_id, field_id)
        })
        .flatten()
    }

    pub fn update_layout(&mut self, update: &LayoutUpdate) -> bool {
        self.plan_and_commit("update_layout", |doc| mutations::update_layout(doc, update))
            .is_some()
    }

    pub fn set_shuffle_enabled(&mut self, enabled: bool) -> bool {
        self.plan_and_commit("set_shuffle_enabled", |doc| {
            mutations::set_shuffle_enabled(doc, enabled)
        })
        .is_some()
    }

    // ───────────────────────────────────────────────────────────────
    // Undo
    // ───────────────────────────────────────────────────────────────

    pub fn can_undo(&self) -> bool {
        self.is_ready() && self.undo.can_undo(&self.origin())
    }

    pub fn can_redo(&self) -> bool {
        self.is_ready() && self.undo.can_redo(&self.origin())
    }

    /// Revert this user's most recent step. Other users' edits are untouched.
    pub fn undo(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let origin = self.origin();
        let Some(step) = self.undo.pop_undo(&origin) else {
            return false;
        };
        let redo = self.run_edits(&origin, &step.edits);
        if redo.is_empty() {
            debug!("Undo step for {} no longer applies", origin);
            return false;
        }
        self.undo.push_redo(&origin, redo);
        true
    }

    pub fn redo(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let origin = self.origin();
        let Some(step) = self.undo.pop_redo(&origin) else {
            return false;
        };
        let undo = self.run_edits(&origin, &step.edits);
        if undo.is_empty() {
            debug!("Redo step for {} no longer applies", origin);
            return false;
        }
        self.undo.push_undo(&origin, undo);
        true
    }

    // ───────────────────────────────────────────────────────────────
    // Identity, selection, presence
    // ───────────────────────────────────────────────────────────────

    /// Set who is editing. A different user id starts a fresh undo history.
    pub fn set_current_user(&mut self, id: &str, name: &str, email: Option<&str>) {
        let user = LocalUser {
            id: id.to_string(),
            name: name.to_string(),
            email: email.map(str::to_string),
        };
        if self.user.as_ref() == Some(&user) {
            return;
        }
        if self.user.as_ref().map(|u| u.id.as_str()) != Some(id) {
            self.undo.clear();
        }
        let before = self.presence.collaborators();
        self.presence.set_local_user(Some(user.id.clone()));
        self.user = Some(user);
        if self.presence.collaborators() != before {
            self.emit(SessionEvent::CollaboratorsChanged(self.presence.collaborators()));
        }
        self.announce_presence();
    }

    pub fn current_user(&self) -> Option<&LocalUser> {
        self.user.as_ref()
    }

    pub fn select_page(&mut self, page_id: &str) -> bool {
        if self.snapshot.page(page_id).is_none() {
            warn!("select_page ignored: page {} not found", page_id);
            return false;
        }
        if self.selected_page_id.as_deref() != Some(page_id) {
            self.selected_page_id = Some(page_id.to_string());
            self.focused_field_id = None;
            self.announce_presence();
        }
        true
    }

    /// Publish where the local user is working.
    pub fn set_focus(&mut self, page_id: Option<&str>, field_id: Option<&str>) {
        if let Some(page_id) = page_id {
            if self.snapshot.page(page_id).is_some() {
                self.selected_page_id = Some(page_id.to_string());
            }
        }
        self.focused_field_id = field_id.map(str::to_string);
        self.announce_presence();
    }

    fn presence_state(&self) -> Option<PresenceState> {
        let user = self.user.as_ref()?;
        Some(
            PresenceState::new(user.id.clone(), user.name.clone())
                .with_email(user.email.clone())
                .with_focus(self.selected_page_id.clone(), self.focused_field_id.clone()),
        )
    }

    fn announce_presence(&self) {
        let Some(active) = self.active.as_ref().filter(|a| a.synced) else {
            return;
        };
        let (Some(client), Some(state)) = (active.relay(), self.presence_state()) else {
            return;
        };
        if let Err(e) = client.send_presence(&AwarenessMessage::Announce(state)) {
            debug!("Presence not sent: {}", e);
        }
    }
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
