use chrono::Utc;
use tracing::{debug, warn};

use crate::models::{DiffRequest, RejectCode};
use crate::sync::room::{ConfirmedDiff, RoomState};
use crate::sync::{steps, SyncError};

/// The reconciler's verdict on one diff request. Exactly one of
/// confirm/reject is emitted per request.
#[derive(Debug)]
pub enum Outcome {
    Confirmed(ConfirmedDiff),
    Rejected(RejectCode),
}

/// Validate a diff against the room's current version and apply it.
///
/// Runs on the room worker, so no other diff can interleave; the version
/// increment and the content mutation are one atomic change from every
/// reader's point of view.
pub fn apply(state: &mut RoomState, diff: &DiffRequest, editor: &str) -> Outcome {
    let current = state.version;

    if diff.base_version > current {
        // A correct client can never be ahead of the room it syncs from.
        warn!(
            doc_id = %state.doc_id,
            "{}",
            SyncError::MalformedRequest(format!(
                "diff base version {} ahead of room version {}",
                diff.base_version, current
            ))
        );
        return Outcome::Rejected(RejectCode::BaseAhead);
    }

    if diff.base_version < current {
        // Steps were computed against stale state. Never merged silently;
        // the client rebases against the current version and resubmits.
        debug!(
            doc_id = %state.doc_id,
            "{}",
            SyncError::StaleVersion {
                base: diff.base_version,
                current,
            }
        );
        return Outcome::Rejected(RejectCode::StaleVersion);
    }

    let content = match steps::apply_all(&state.content, &diff.steps) {
        Ok(content) => content,
        Err(e) => {
            warn!(
                doc_id = %state.doc_id,
                "{}",
                SyncError::MalformedRequest(format!("unapplicable steps: {}", e))
            );
            return Outcome::Rejected(RejectCode::InvalidSteps);
        }
    };

    state.content = content;
    state.version += diff.steps.len() as u64;
    state.updated = Utc::now();
    state.last_editor = Some(editor.to_string());
    // Title overrides apply unconditionally alongside content.
    if let Some(title) = &diff.title {
        state.title = Some(title.clone());
    }

    let confirmed = ConfirmedDiff {
        version: state.version,
        request_id: diff.request_id,
        client_id: diff.client_id,
        user_id: editor.to_string(),
        steps: diff.steps.clone(),
        title: diff.title.clone(),
    };
    if !confirmed.steps.is_empty() {
        state.push_history(confirmed.clone());
    }
    Outcome::Confirmed(confirmed)
}
