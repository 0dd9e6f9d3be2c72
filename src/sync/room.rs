use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    BroadcastDiff, DiffRequest, DocData, DocMeta, RejectCode, SelectionChange, ServerMessage, Step,
};
use crate::store::{DocRecord, DocStore};
use crate::sync::session::SessionHandle;
use crate::sync::{presence, reconciler, recovery, SyncError, SyncSettings};

/// A diff that was accepted and applied, retained for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedDiff {
    /// Room version after these steps were applied
    pub version: u64,
    pub request_id: u64,
    pub client_id: u64,
    pub user_id: String,
    pub steps: Vec<Step>,
    pub title: Option<String>,
}

impl ConfirmedDiff {
    /// The version this diff was applied on top of.
    pub fn base_version(&self) -> u64 {
        self.version - self.steps.len() as u64
    }

    pub fn to_broadcast(&self, server_fix: bool) -> BroadcastDiff {
        BroadcastDiff {
            version: self.version,
            request_id: self.request_id,
            client_id: self.client_id,
            steps: self.steps.clone(),
            title: self.title.clone(),
            server_fix,
        }
    }
}

/// Canonical state of one document room.
///
/// Owned exclusively by the room's worker task; every mutation goes through
/// the reconciler so readers never observe a torn update.
#[derive(Debug)]
pub struct RoomState {
    pub doc_id: Uuid,
    pub content: Value,
    pub version: u64,
    pub title: Option<String>,
    pub updated: DateTime<Utc>,
    /// Confirmed diffs retained for replay, oldest first
    pub history: VecDeque<ConfirmedDiff>,
    pub history_depth: usize,
    pub last_saved_version: u64,
    pub last_editor: Option<String>,
}

impl RoomState {
    pub fn from_record(record: DocRecord, history_depth: usize) -> Self {
        let content = if record.content.is_null() {
            crate::models::empty_doc()
        } else {
            record.content
        };
        Self {
            doc_id: record.id,
            content,
            version: record.version,
            title: record.title,
            updated: record.updated_at,
            history: VecDeque::new(),
            history_depth,
            last_saved_version: record.version,
            last_editor: None,
        }
    }

    /// Full snapshot payload for one session.
    pub fn doc_data(&self, session_id: Uuid) -> DocData {
        DocData {
            content: self.content.clone(),
            version: self.version,
            meta: DocMeta {
                id: self.doc_id,
                session_id,
                updated: self.updated,
                title: self.title.clone(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn record(&self) -> DocRecord {
        DocRecord {
            id: self.doc_id,
            title: self.title.clone(),
            content: self.content.clone(),
            version: self.version,
            updated_at: self.updated,
        }
    }

    pub fn push_history(&mut self, diff: ConfirmedDiff) {
        self.history.push_back(diff);
        while self.history.len() > self.history_depth {
            self.history.pop_front();
        }
    }
}

/// A subscriber as the room sees it.
#[derive(Debug)]
pub struct Subscriber {
    pub session: SessionHandle,
    /// Highest version this client is known to have received
    pub acknowledged_version: u64,
}

/// Commands processed by the room worker, one at a time.
#[derive(Debug)]
pub enum RoomCommand {
    Subscribe {
        session: SessionHandle,
        connection_count: u32,
    },
    Unsubscribe {
        session_id: Uuid,
    },
    Diff {
        session_id: Uuid,
        diff: DiffRequest,
    },
    Selection {
        session_id: Uuid,
        selection: SelectionChange,
    },
    Resend {
        session_id: Uuid,
        from_version: u64,
    },
    GetDocument {
        session_id: Uuid,
    },
    /// Read-only snapshot for the HTTP surface
    Snapshot {
        reply: oneshot::Sender<DocData>,
    },
}

/// Cheap handle to a running room worker.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub doc_id: Uuid,
    pub commands: mpsc::Sender<RoomCommand>,
    pub subscriber_count: Arc<AtomicUsize>,
}

pub type RoomMap = Arc<RwLock<HashMap<Uuid, RoomHandle>>>;

/// The single-writer task owning one room.
pub struct RoomWorker {
    state: RoomState,
    subscribers: HashMap<Uuid, Subscriber>,
    commands: mpsc::Receiver<RoomCommand>,
    store: Arc<dyn DocStore>,
    settings: SyncSettings,
    /// Shared hub map; used only for self-eviction
    rooms: RoomMap,
    subscriber_count: Arc<AtomicUsize>,
}

impl RoomWorker {
    /// Spawn a worker for a freshly loaded document and return its handle.
    pub fn spawn(
        record: DocRecord,
        store: Arc<dyn DocStore>,
        settings: SyncSettings,
        rooms: RoomMap,
    ) -> RoomHandle {
        let (tx, rx) = mpsc::channel(settings.room_channel_capacity);
        let subscriber_count = Arc::new(AtomicUsize::new(0));
        let handle = RoomHandle {
            doc_id: record.id,
            commands: tx,
            subscriber_count: subscriber_count.clone(),
        };
        let worker = RoomWorker {
            state: RoomState::from_record(record, settings.history_depth),
            subscribers: HashMap::new(),
            commands: rx,
            store,
            settings,
            rooms,
            subscriber_count,
        };
        tokio::spawn(worker.run());
        handle
    }

    async fn run(mut self) {
        debug!(doc_id = %self.state.doc_id, "Room worker started");
        while let Some(cmd) = self.commands.recv().await {
            self.handle(cmd).await;
            if self.subscribers.is_empty() && self.try_close().await {
                break;
            }
        }
        debug!(doc_id = %self.state.doc_id, "Room worker stopped");
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Subscribe {
                session,
                connection_count,
            } => self.on_subscribe(session, connection_count),
            RoomCommand::Unsubscribe { session_id } => self.on_unsubscribe(session_id),
            RoomCommand::Diff { session_id, diff } => self.on_diff(session_id, diff).await,
            RoomCommand::Selection {
                session_id,
                selection,
            } => self.on_selection(session_id, selection),
            RoomCommand::Resend {
                session_id,
                from_version,
            } => self.on_resend(session_id, from_version),
            RoomCommand::GetDocument { session_id } => self.send_doc_data(session_id),
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.state.doc_data(Uuid::nil()));
            }
        }
    }

    fn on_subscribe(&mut self, session: SessionHandle, connection_count: u32) {
        let session_id = session.session_id;
        info!(
            doc_id = %self.state.doc_id,
            user = %session.user.id,
            %session_id,
            "Subscriber joined room"
        );
        self.subscribers.insert(
            session_id,
            Subscriber {
                session,
                acknowledged_version: 0,
            },
        );
        self.update_count();
        self.send_to(session_id, ServerMessage::Subscribed, None);
        // A reconnecting client with a cached copy catches up via resend
        // instead of a full retransmit.
        if connection_count < 1 {
            self.send_doc_data(session_id);
        }
        self.broadcast_participants();
    }

    fn on_unsubscribe(&mut self, session_id: Uuid) {
        if self.remove_subscriber(session_id) {
            info!(doc_id = %self.state.doc_id, %session_id, "Subscriber left room");
            self.broadcast_participants();
        }
    }

    async fn on_diff(&mut self, session_id: Uuid, diff: DiffRequest) {
        let Some(sub) = self.subscribers.get(&session_id) else {
            debug!(doc_id = %self.state.doc_id, %session_id, "Ignoring diff from detached session");
            return;
        };
        if !sub.session.can_edit {
            warn!(
                doc_id = %self.state.doc_id,
                user = %sub.session.user.id,
                "Ignoring diff from read-only subscriber"
            );
            return;
        }
        let editor = sub.session.user.id.clone();
        let request_id = diff.request_id;

        match reconciler::apply(&mut self.state, &diff, &editor) {
            reconciler::Outcome::Confirmed(confirmed) => {
                let version = self.state.version;
                self.send_to(
                    session_id,
                    ServerMessage::ConfirmDiff { request_id },
                    Some(version),
                );
                self.broadcast(
                    &ServerMessage::Diff(confirmed.to_broadcast(false)),
                    Some(session_id),
                    Some(version),
                );
                if self.state.version - self.state.last_saved_version
                    >= self.settings.save_every_diffs
                {
                    self.flush().await;
                }
            }
            reconciler::Outcome::Rejected(code) => {
                self.send_to(
                    session_id,
                    ServerMessage::RejectDiff { request_id, code },
                    None,
                );
                if code == RejectCode::InvalidSteps {
                    // Steps were unapplicable against a matching version:
                    // resynchronize the sender from the canonical snapshot.
                    self.send_to(session_id, ServerMessage::PatchError, None);
                    self.send_doc_data(session_id);
                }
            }
        }
    }

    fn on_selection(&mut self, session_id: Uuid, selection: SelectionChange) {
        if !self.subscribers.contains_key(&session_id) {
            return;
        }
        // Fire-and-forget: never versioned, never queued for resend.
        self.broadcast(
            &ServerMessage::SelectionChange(selection),
            Some(session_id),
            None,
        );
    }

    fn on_resend(&mut self, session_id: Uuid, from_version: u64) {
        if !self.subscribers.contains_key(&session_id) {
            return;
        }
        match recovery::replay(&self.state, from_version) {
            Ok(diffs) => {
                debug!(
                    doc_id = %self.state.doc_id,
                    %session_id,
                    from_version,
                    count = diffs.len(),
                    "Replaying missed diffs"
                );
                for diff in diffs {
                    let version = diff.version;
                    self.send_to(
                        session_id,
                        ServerMessage::Diff(diff.to_broadcast(true)),
                        Some(version),
                    );
                }
            }
            Err(e @ SyncError::RetentionExceeded { .. }) => {
                debug!(doc_id = %self.state.doc_id, %session_id, "{}; sending full document", e);
                self.send_doc_data(session_id);
            }
            Err(e) => {
                warn!(doc_id = %self.state.doc_id, %session_id, "{}; sending full document", e);
                self.send_doc_data(session_id);
            }
        }
    }

    fn send_doc_data(&mut self, session_id: Uuid) {
        let version = self.state.version;
        let data = self.state.doc_data(session_id);
        self.send_to(session_id, ServerMessage::DocData(data), Some(version));
    }

    fn broadcast_participants(&mut self) {
        let list = presence::participant_list(&self.subscribers);
        self.broadcast(
            &ServerMessage::Connections {
                participant_list: list,
            },
            None,
            None,
        );
    }

    /// Deliver to one subscriber, updating its acknowledged version on
    /// success and detaching it on failure.
    fn send_to(&mut self, session_id: Uuid, msg: ServerMessage, ack_version: Option<u64>) {
        let Some(sub) = self.subscribers.get_mut(&session_id) else {
            return;
        };
        if try_deliver(&sub.session, msg) {
            if let Some(v) = ack_version {
                sub.acknowledged_version = v;
            }
        } else {
            self.remove_subscriber(session_id);
            self.broadcast_participants();
        }
    }

    /// Fan a message out to every subscriber except `exclude`.
    ///
    /// Recurses into a participant update when a dead subscriber is found;
    /// terminates because every pass removes at least one subscriber.
    fn broadcast(&mut self, msg: &ServerMessage, exclude: Option<Uuid>, ack_version: Option<u64>) {
        let mut dead = Vec::new();
        for (id, sub) in self.subscribers.iter_mut() {
            if Some(*id) == exclude {
                continue;
            }
            if try_deliver(&sub.session, msg.clone()) {
                if let Some(v) = ack_version {
                    sub.acknowledged_version = v;
                }
            } else {
                dead.push(*id);
            }
        }
        if dead.is_empty() {
            return;
        }
        for id in dead {
            self.remove_subscriber(id);
        }
        self.broadcast_participants();
    }

    fn remove_subscriber(&mut self, session_id: Uuid) -> bool {
        let removed = self.subscribers.remove(&session_id).is_some();
        if removed {
            self.update_count();
        }
        removed
    }

    fn update_count(&self) {
        self.subscriber_count
            .store(self.subscribers.len(), Ordering::Relaxed);
    }

    /// Persist the document if it has unsaved confirmed diffs.
    async fn flush(&mut self) {
        if self.state.version == self.state.last_saved_version {
            return;
        }
        let record = self.state.record();
        let editor = self.state.last_editor.clone().unwrap_or_default();
        match self.store.save(&record, &editor).await {
            Ok(()) => {
                debug!(
                    doc_id = %self.state.doc_id,
                    version = self.state.version,
                    "Saved document to store"
                );
                self.state.last_saved_version = self.state.version;
            }
            Err(e) => {
                error!(doc_id = %self.state.doc_id, "Failed to save document: {}", e);
            }
        }
    }

    /// Attempt to evict this room from the hub.
    ///
    /// Takes the hub map lock so no subscribe can race past us; aborts if a
    /// command slipped into the queue first. The flush runs before the
    /// handle disappears so a recreated room never loads stale content.
    async fn try_close(&mut self) -> bool {
        self.flush().await;
        if self.state.version != self.state.last_saved_version {
            // One retry, then give the room up; it can be recreated from
            // whatever the store last accepted.
            self.flush().await;
            if self.state.version != self.state.last_saved_version {
                error!(
                    doc_id = %self.state.doc_id,
                    unsaved = self.state.version - self.state.last_saved_version,
                    "Evicting room with unsaved diffs after failed flush"
                );
            }
        }
        match self.rooms.try_write() {
            Ok(mut rooms) => {
                if self.commands.is_empty() {
                    rooms.remove(&self.state.doc_id);
                    info!(doc_id = %self.state.doc_id, "Room evicted (no subscribers)");
                    true
                } else {
                    false
                }
            }
            // The hub is mid-subscribe; keep running.
            Err(_) => false,
        }
    }
}

fn try_deliver(session: &SessionHandle, msg: ServerMessage) -> bool {
    match session.outbound.try_send(msg) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                session_id = %session.session_id,
                user = %session.user.id,
                "Subscriber cannot keep up; detaching"
            );
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(session_id = %session.session_id, "Subscriber connection closed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session_registry::AuthedUser;
    use crate::models::empty_doc;
    use crate::store::MemoryStore;

    fn record(doc_id: Uuid, version: u64) -> DocRecord {
        DocRecord {
            id: doc_id,
            title: None,
            content: empty_doc(),
            version,
            updated_at: Utc::now(),
        }
    }

    fn session(
        session_id: Uuid,
        user_id: &str,
        can_edit: bool,
    ) -> (SessionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = SessionHandle {
            session_id,
            user: AuthedUser {
                id: user_id.to_string(),
                name: user_id.to_string(),
            },
            can_edit,
            outbound: tx,
        };
        (handle, rx)
    }

    fn diff(request_id: u64, base_version: u64, steps: usize) -> DiffRequest {
        DiffRequest {
            request_id,
            client_id: 1,
            base_version,
            steps: (0..steps)
                .map(|_| Step::Replace {
                    from: 0,
                    to: 0,
                    slice: None,
                })
                .collect(),
            title: None,
        }
    }

    async fn spawn_room(version: u64) -> (RoomHandle, Uuid) {
        let doc_id = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new());
        let rooms: RoomMap = Arc::new(RwLock::new(HashMap::new()));
        let handle = RoomWorker::spawn(
            record(doc_id, version),
            store,
            SyncSettings::default(),
            rooms.clone(),
        );
        rooms.write().await.insert(doc_id, handle.clone());
        (handle, doc_id)
    }

    async fn expect_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn fresh_subscriber_receives_subscribed_then_snapshot() {
        let (handle, _) = spawn_room(5).await;
        let (s, mut rx) = session(Uuid::new_v4(), "alice", true);
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: s,
                connection_count: 0,
            })
            .await
            .unwrap();

        assert!(matches!(expect_message(&mut rx).await, ServerMessage::Subscribed));
        match expect_message(&mut rx).await {
            ServerMessage::DocData(data) => assert_eq!(data.version, 5),
            other => panic!("expected doc_data, got {other:?}"),
        }
        assert!(matches!(
            expect_message(&mut rx).await,
            ServerMessage::Connections { .. }
        ));
    }

    #[tokio::test]
    async fn reconnecting_subscriber_skips_snapshot() {
        let (handle, _) = spawn_room(5).await;
        let (s, mut rx) = session(Uuid::new_v4(), "alice", true);
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: s,
                connection_count: 2,
            })
            .await
            .unwrap();

        assert!(matches!(expect_message(&mut rx).await, ServerMessage::Subscribed));
        // Straight to the participant list, no doc_data in between.
        assert!(matches!(
            expect_message(&mut rx).await,
            ServerMessage::Connections { .. }
        ));
    }

    #[tokio::test]
    async fn confirmed_diff_advances_version_and_reaches_other_subscribers() {
        let (handle, _) = spawn_room(5).await;
        let alice_id = Uuid::new_v4();
        let (alice, mut alice_rx) = session(alice_id, "alice", true);
        let (bob, mut bob_rx) = session(Uuid::new_v4(), "bob", true);
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: alice,
                connection_count: 2,
            })
            .await
            .unwrap();
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: bob,
                connection_count: 2,
            })
            .await
            .unwrap();
        // Drain subscription traffic.
        for _ in 0..2 {
            expect_message(&mut alice_rx).await;
        }
        for _ in 0..2 {
            expect_message(&mut bob_rx).await;
        }

        handle
            .commands
            .send(RoomCommand::Diff {
                session_id: alice_id,
                diff: diff(1, 5, 2),
            })
            .await
            .unwrap();

        match expect_message(&mut alice_rx).await {
            ServerMessage::ConfirmDiff { request_id } => assert_eq!(request_id, 1),
            other => panic!("expected confirm_diff, got {other:?}"),
        }
        match expect_message(&mut bob_rx).await {
            ServerMessage::Diff(b) => {
                assert_eq!(b.version, 7);
                assert_eq!(b.steps.len(), 2);
                assert!(!b.server_fix);
            }
            other => panic!("expected rebroadcast diff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_diff_is_rejected_and_version_unchanged() {
        let (handle, _) = spawn_room(7).await;
        let alice_id = Uuid::new_v4();
        let (alice, mut alice_rx) = session(alice_id, "alice", true);
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: alice,
                connection_count: 2,
            })
            .await
            .unwrap();
        for _ in 0..2 {
            expect_message(&mut alice_rx).await;
        }

        handle
            .commands
            .send(RoomCommand::Diff {
                session_id: alice_id,
                diff: diff(9, 5, 1),
            })
            .await
            .unwrap();

        match expect_message(&mut alice_rx).await {
            ServerMessage::RejectDiff { request_id, code } => {
                assert_eq!(request_id, 9);
                assert_eq!(code, RejectCode::StaleVersion);
            }
            other => panic!("expected reject_diff, got {other:?}"),
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .commands
            .send(RoomCommand::Snapshot { reply: reply_tx })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap().version, 7);
    }

    #[tokio::test]
    async fn read_only_subscriber_diffs_are_ignored() {
        let (handle, _) = spawn_room(0).await;
        let viewer_id = Uuid::new_v4();
        let (viewer, mut viewer_rx) = session(viewer_id, "viewer", false);
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: viewer,
                connection_count: 2,
            })
            .await
            .unwrap();
        for _ in 0..2 {
            expect_message(&mut viewer_rx).await;
        }

        handle
            .commands
            .send(RoomCommand::Diff {
                session_id: viewer_id,
                diff: diff(1, 0, 1),
            })
            .await
            .unwrap();
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .commands
            .send(RoomCommand::Snapshot { reply: reply_tx })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn selection_changes_bypass_versioning_and_reach_others() {
        let (handle, _) = spawn_room(3).await;
        let alice_id = Uuid::new_v4();
        let (alice, mut alice_rx) = session(alice_id, "alice", true);
        let (bob, mut bob_rx) = session(Uuid::new_v4(), "bob", true);
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: alice,
                connection_count: 2,
            })
            .await
            .unwrap();
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session: bob,
                connection_count: 2,
            })
            .await
            .unwrap();
        for _ in 0..2 {
            expect_message(&mut alice_rx).await;
        }
        for _ in 0..2 {
            expect_message(&mut bob_rx).await;
        }

        handle
            .commands
            .send(RoomCommand::Selection {
                session_id: alice_id,
                selection: SelectionChange {
                    id: "alice".to_string(),
                    session_id: alice_id,
                    anchor: 4,
                    head: 9,
                },
            })
            .await
            .unwrap();

        match expect_message(&mut bob_rx).await {
            ServerMessage::SelectionChange(sel) => {
                assert_eq!(sel.anchor, 4);
                assert_eq!(sel.head, 9);
            }
            other => panic!("expected selection_change, got {other:?}"),
        }
    }
}
