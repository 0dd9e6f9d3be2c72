use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::models::{DocData, DocMeta, ErrorResponse};
use crate::AppState;

/// Current snapshot of a document: live room state when the room is
/// active, the stored record otherwise.
pub async fn doc_snapshot(
    State(app): State<Arc<AppState>>,
    Path(doc_id): Path<Uuid>,
    Extension(user_id): Extension<String>,
) -> Result<Json<DocData>, (StatusCode, Json<ErrorResponse>)> {
    let access = app.registry.document_access(&user_id, doc_id).await;
    if !access.can_view() {
        let status = StatusCode::FORBIDDEN;
        return Err((
            status,
            Json(ErrorResponse {
                code: status.as_u16(),
                status: status.to_string(),
                error: "No access to this document".to_string(),
            }),
        ));
    }

    if let Some(data) = app.hub.snapshot(doc_id).await {
        debug!(%doc_id, "Serving snapshot from live room");
        return Ok(Json(data));
    }

    match app.store.load(doc_id).await {
        Ok(Some(record)) => Ok(Json(DocData {
            content: record.content,
            version: record.version,
            meta: DocMeta {
                id: record.id,
                session_id: Uuid::nil(),
                updated: record.updated_at,
                title: record.title,
            },
            timestamp: Utc::now(),
        })),
        Ok(None) => {
            let status = StatusCode::NOT_FOUND;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: format!("Document {} not found", doc_id),
                }),
            ))
        }
        Err(e) => {
            let status = StatusCode::SERVICE_UNAVAILABLE;
            Err((
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    status: status.to_string(),
                    error: e.to_string(),
                }),
            ))
        }
    }
}
