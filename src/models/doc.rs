use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A position-addressed edit against the document's top-level child list.
///
/// The node tree itself is opaque to this service; steps only splice the
/// `content` array of the root node. Unknown step kinds fail to
/// deserialize, which surfaces as a malformed request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "stepType", rename_all = "camelCase")]
pub enum Step {
    Replace {
        from: usize,
        to: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slice: Option<Slice>,
    },
}

/// Replacement payload of a `replace` step. Nodes pass through unmodified.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Slice {
    #[serde(default)]
    pub content: Vec<Value>,
}

/// One entry of the participant list broadcast on membership changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// User id
    pub id: String,
    pub name: String,
    /// The session this entry describes
    pub session_id: Uuid,
    /// All sessions currently open for the same user
    pub session_ids: Vec<Uuid>,
}

/// Metadata accompanying a full document snapshot.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocMeta {
    pub id: Uuid,
    /// Session the snapshot was produced for
    pub session_id: Uuid,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The empty document a room falls back to when the store holds no content.
pub fn empty_doc() -> Value {
    serde_json::json!({ "type": "doc", "content": [] })
}
