use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::DocData;
use crate::store::DocStore;
use crate::sync::room::{RoomCommand, RoomHandle, RoomMap, RoomWorker};
use crate::sync::session::SessionHandle;
use crate::sync::{SyncError, SyncSettings};

/// Hub statistics for the diagnostics endpoint.
#[derive(Debug, Clone, Copy)]
pub struct HubStats {
    pub n_rooms: u32,
    pub n_conn: u32,
}

/// Registry of live rooms, keyed by document id.
///
/// Rooms are materialized lazily on the first subscribe and remove
/// themselves once their last subscriber leaves, so idle documents consume
/// nothing.
pub struct RoomHub {
    rooms: RoomMap,
    store: Arc<dyn DocStore>,
    settings: SyncSettings,
}

impl RoomHub {
    pub fn new(store: Arc<dyn DocStore>, settings: SyncSettings) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            store,
            settings,
        }
    }

    /// Attach a session to the room for `doc_id`, creating the room from
    /// the document store if it is not in memory.
    ///
    /// Holding the map write lock across the subscribe send closes the race
    /// against a room evicting itself: the worker only removes its handle
    /// under this same lock and only while its queue is empty.
    pub async fn subscribe(
        &self,
        doc_id: Uuid,
        session: SessionHandle,
        connection_count: u32,
    ) -> Result<RoomHandle, SyncError> {
        let mut rooms = self.rooms.write().await;
        if let Some(handle) = rooms.get(&doc_id).cloned() {
            debug!(%doc_id, "Joining existing document room");
            match handle
                .commands
                .send(RoomCommand::Subscribe {
                    session,
                    connection_count,
                })
                .await
            {
                Ok(()) => return Ok(handle),
                Err(mpsc::error::SendError(cmd)) => {
                    // The worker shut down between eviction and removal;
                    // recreate the room with the command we got back.
                    rooms.remove(&doc_id);
                    if let RoomCommand::Subscribe {
                        session,
                        connection_count,
                    } = cmd
                    {
                        return self
                            .create_room(&mut rooms, doc_id, session, connection_count)
                            .await;
                    }
                    return Err(SyncError::RoomUnavailable(
                        "room closed during subscribe".to_string(),
                    ));
                }
            }
        }
        self.create_room(&mut rooms, doc_id, session, connection_count)
            .await
    }

    async fn create_room(
        &self,
        rooms: &mut HashMap<Uuid, RoomHandle>,
        doc_id: Uuid,
        session: SessionHandle,
        connection_count: u32,
    ) -> Result<RoomHandle, SyncError> {
        info!(%doc_id, "Opening new document room");
        let record = self
            .store
            .load(doc_id)
            .await
            .map_err(|e| SyncError::RoomUnavailable(e.to_string()))?
            .ok_or_else(|| SyncError::RoomUnavailable(format!("document {} not found", doc_id)))?;

        let handle = RoomWorker::spawn(
            record,
            self.store.clone(),
            self.settings.clone(),
            self.rooms.clone(),
        );
        // The queue is fresh, so this send can only fail if the worker died
        // on startup.
        handle
            .commands
            .send(RoomCommand::Subscribe {
                session,
                connection_count,
            })
            .await
            .map_err(|_| SyncError::RoomUnavailable("room closed during subscribe".to_string()))?;
        rooms.insert(doc_id, handle.clone());
        Ok(handle)
    }

    /// Read-only snapshot of a live room, if one exists.
    pub async fn snapshot(&self, doc_id: Uuid) -> Option<DocData> {
        let handle = self.rooms.read().await.get(&doc_id).cloned()?;
        let (tx, rx) = oneshot::channel();
        handle
            .commands
            .send(RoomCommand::Snapshot { reply: tx })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn stats(&self) -> HubStats {
        let rooms = self.rooms.read().await;
        let n_rooms = rooms.len() as u32;
        let n_conn = rooms
            .values()
            .map(|h| h.subscriber_count.load(Ordering::Relaxed) as u32)
            .sum();
        HubStats { n_rooms, n_conn }
    }
}
