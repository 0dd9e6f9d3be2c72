pub mod connection;
pub mod error;
pub mod hub;
pub mod presence;
pub mod reconciler;
pub mod recovery;
pub mod room;
pub mod session;
pub mod steps;

pub use error::SyncError;

/// Room tuning knobs, derived from the application config.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// How many confirmed diffs a room retains for replay
    pub history_depth: usize,
    /// Flush the document to the store every N confirmed diffs
    pub save_every_diffs: u64,
    /// Capacity of a room's command queue
    pub room_channel_capacity: usize,
    /// Capacity of a connection's outbound queue
    pub outbound_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            history_depth: 1000,
            save_every_diffs: 20,
            room_channel_capacity: 64,
            outbound_capacity: 256,
        }
    }
}
