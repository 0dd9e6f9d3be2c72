use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::info;
use uuid::Uuid;

use crate::store::{DocRecord, DocStore, StoreError};

/// Document row from the database
#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    title: Option<String>,
    content: Option<Json<Value>>,
    version: i64,
    updated_at: DateTime<Utc>,
}

/// PostgreSQL-backed document store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }
}

#[async_trait]
impl DocStore for PgStore {
    async fn load(&self, doc_id: Uuid) -> Result<Option<DocRecord>, StoreError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, title, content, version, updated_at
            FROM documents
            WHERE id = $1 AND deleted = false
            "#,
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| DocRecord {
            id: row.id,
            title: row.title,
            content: row
                .content
                .map(|json| json.0)
                .unwrap_or_else(crate::models::empty_doc),
            version: row.version.max(0) as u64,
            updated_at: row.updated_at,
        }))
    }

    async fn save(&self, record: &DocRecord, updated_by: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET content = $2, version = $3, title = $4, updated_at = $5, updated_by = $6
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(Json(&record.content))
        .bind(record.version as i64)
        .bind(&record.title)
        .bind(record.updated_at)
        .bind(updated_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Unavailable(format!(
                "document {} no longer exists",
                record.id
            )));
        }
        Ok(())
    }
}
