use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::session_registry::AuthedUser;
use crate::models::ServerMessage;

/// One authenticated connection attached to a room.
///
/// The outbound channel is the only way the room reaches this client; the
/// room never touches the socket itself.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub user: AuthedUser,
    /// Computed at subscribe time from the app service; gates diffs
    pub can_edit: bool,
    pub outbound: mpsc::Sender<ServerMessage>,
}
