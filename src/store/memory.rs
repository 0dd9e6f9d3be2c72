use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{DocRecord, DocStore, StoreError};

/// In-memory document store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<Uuid, DocRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document directly, bypassing the save path.
    pub async fn seed(&self, record: DocRecord) {
        self.docs.write().await.insert(record.id, record);
    }

    pub async fn get(&self, doc_id: Uuid) -> Option<DocRecord> {
        self.docs.read().await.get(&doc_id).cloned()
    }
}

#[async_trait]
impl DocStore for MemoryStore {
    async fn load(&self, doc_id: Uuid) -> Result<Option<DocRecord>, StoreError> {
        Ok(self.docs.read().await.get(&doc_id).cloned())
    }

    async fn save(&self, record: &DocRecord, _updated_by: &str) -> Result<(), StoreError> {
        self.docs.write().await.insert(record.id, record.clone());
        Ok(())
    }
}
