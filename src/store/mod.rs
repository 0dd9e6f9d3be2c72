pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// A document as the store hands it to a room.
#[derive(Debug, Clone)]
pub struct DocRecord {
    pub id: Uuid,
    pub title: Option<String>,
    pub content: Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub enum StoreError {
    Unavailable(String),
    Query(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Query(e) => write!(f, "Store query failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Query(e)
    }
}

/// Persistence collaborator for rooms.
///
/// Rooms load a snapshot once on first subscribe and write back on a
/// cadence, never synchronously per confirmed diff.
#[async_trait]
pub trait DocStore: Send + Sync {
    async fn load(&self, doc_id: Uuid) -> Result<Option<DocRecord>, StoreError>;

    async fn save(&self, record: &DocRecord, updated_by: &str) -> Result<(), StoreError>;
}
