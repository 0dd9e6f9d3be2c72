use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Aggregated runtime diagnostics
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Active WebSocket subscribers across all rooms
    pub n_conn: u32,
    /// Rooms currently materialized in memory
    pub n_rooms: u32,
    /// Cached user contexts
    pub n_user_ctx: u32,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
