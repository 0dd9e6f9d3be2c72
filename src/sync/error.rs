/// Failures of the synchronization core.
///
/// None of these are fatal to the process: authentication and availability
/// failures terminate the specific request only, and a room can always be
/// torn down and recreated from the document store.
#[derive(Debug)]
pub enum SyncError {
    /// Bad or expired token; the subscribe is rejected but the connection
    /// stays open for a retry
    AuthFailure(String),
    /// The backing store cannot supply a snapshot; no room state is created
    RoomUnavailable(String),
    /// Diff computed against an older version; the client must rebase
    StaleVersion { base: u64, current: u64 },
    /// Client-bug signal: version ahead of the room, or invalid structure
    MalformedRequest(String),
    /// Resend request older than the retained window; answered with a full
    /// snapshot instead of an error
    RetentionExceeded { from: u64, oldest: u64 },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::AuthFailure(msg) => write!(f, "Authentication failed: {}", msg),
            SyncError::RoomUnavailable(msg) => write!(f, "Room unavailable: {}", msg),
            SyncError::StaleVersion { base, current } => {
                write!(f, "Stale version: diff base {} behind room version {}", base, current)
            }
            SyncError::MalformedRequest(msg) => write!(f, "Malformed request: {}", msg),
            SyncError::RetentionExceeded { from, oldest } => {
                write!(
                    f,
                    "Retention exceeded: version {} precedes retained history starting at {}",
                    from, oldest
                )
            }
        }
    }
}

impl std::error::Error for SyncError {}
