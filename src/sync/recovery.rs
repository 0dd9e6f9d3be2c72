use crate::sync::room::{ConfirmedDiff, RoomState};
use crate::sync::SyncError;

/// Collect the confirmed diffs a client at `from_version` has missed.
///
/// Errors mean the window cannot be served from history: the caller answers
/// with a full snapshot instead. Replays are read-only over the retained
/// history, so requesting the same window twice yields identical payloads.
pub fn replay(state: &RoomState, from_version: u64) -> Result<Vec<ConfirmedDiff>, SyncError> {
    if from_version > state.version {
        return Err(SyncError::MalformedRequest(format!(
            "resend from version {} ahead of room version {}",
            from_version, state.version
        )));
    }
    if from_version == state.version {
        return Ok(Vec::new());
    }
    let oldest = match state.history.front() {
        Some(diff) => diff.base_version(),
        // History is empty but versions are missing: everything predates
        // the retained window.
        None => state.version,
    };
    if from_version < oldest {
        return Err(SyncError::RetentionExceeded {
            from: from_version,
            oldest,
        });
    }
    Ok(state
        .history
        .iter()
        .filter(|diff| diff.version > from_version)
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{empty_doc, Slice, Step};
    use crate::store::DocRecord;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn step() -> Step {
        Step::Replace {
            from: 0,
            to: 0,
            slice: Some(Slice {
                content: vec![json!({ "type": "paragraph" })],
            }),
        }
    }

    fn confirmed(version: u64, steps: usize) -> ConfirmedDiff {
        ConfirmedDiff {
            version,
            request_id: version,
            client_id: 1,
            user_id: "alice".to_string(),
            steps: (0..steps).map(|_| step()).collect(),
            title: None,
        }
    }

    /// A room at `version` whose history covers diffs back to `oldest_base`.
    fn state_with_history(version: u64, diffs: &[(u64, usize)]) -> RoomState {
        let mut state = RoomState::from_record(
            DocRecord {
                id: Uuid::new_v4(),
                title: None,
                content: empty_doc(),
                version,
                updated_at: Utc::now(),
            },
            1000,
        );
        for (v, n) in diffs {
            state.history.push_back(confirmed(*v, *n));
        }
        state
    }

    #[test]
    fn client_at_current_version_gets_nothing() {
        let state = state_with_history(7, &[(6, 1), (7, 1)]);
        assert!(replay(&state, 7).unwrap().is_empty());
    }

    #[test]
    fn missed_diffs_are_returned_in_order() {
        let state = state_with_history(7, &[(5, 1), (7, 2)]);
        let diffs = replay(&state, 4).unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[0].version, 5);
        assert_eq!(diffs[1].version, 7);
    }

    #[test]
    fn window_start_is_respected() {
        // Retention starts at base version 4: the diff to version 5 was
        // applied on top of 4.
        let state = state_with_history(7, &[(5, 1), (7, 2)]);
        let err = replay(&state, 3).unwrap_err();
        assert!(matches!(
            err,
            SyncError::RetentionExceeded { from: 3, oldest: 4 }
        ));
    }

    #[test]
    fn empty_history_behind_version_exceeds_retention() {
        let state = state_with_history(9, &[]);
        assert!(matches!(
            replay(&state, 2).unwrap_err(),
            SyncError::RetentionExceeded { .. }
        ));
    }

    #[test]
    fn resend_from_ahead_of_room_is_malformed() {
        let state = state_with_history(3, &[(3, 1)]);
        assert!(matches!(
            replay(&state, 8).unwrap_err(),
            SyncError::MalformedRequest(_)
        ));
    }

    #[test]
    fn replay_is_idempotent() {
        let state = state_with_history(7, &[(5, 1), (7, 2)]);
        let first = replay(&state, 4).unwrap();
        let second = replay(&state, 4).unwrap();
        assert_eq!(first, second);
        let a = serde_json::to_string(
            &first.iter().map(|d| d.to_broadcast(true)).collect::<Vec<_>>(),
        )
        .unwrap();
        let b = serde_json::to_string(
            &second.iter().map(|d| d.to_broadcast(true)).collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(a, b);
    }
}
