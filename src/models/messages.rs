use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, TimestampMilliSeconds};
use uuid::Uuid;

use crate::models::{DocMeta, Participant, Step};

/// Application-level protocol version carried in every envelope.
pub const PROTOCOL_VERSION: u16 = 1;

/// Envelope around every message on the wire.
///
/// `c` and `s` are per-connection client/server sequence counters; the
/// transport is ordered within one connection, so the counters only serve
/// to drop duplicates after client-side retries.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WrappedMessage<M> {
    #[serde(flatten)]
    pub message: M,
    /// Client sequence number
    #[serde(default)]
    pub c: u64,
    /// Server sequence number
    #[serde(default)]
    pub s: u64,
    /// Protocol version
    #[serde(default = "default_protocol_version")]
    pub v: u16,
}

fn default_protocol_version() -> u16 {
    PROTOCOL_VERSION
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub room_id: Uuid,
    pub auth_token: String,
    /// How many times this client has connected before. A value >= 1 means
    /// the client still holds a cached copy and the full snapshot is skipped.
    #[serde(default)]
    pub connection: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    pub room_id: Uuid,
}

/// A client-submitted bundle of steps computed against `base_version`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    /// Client-scoped id used for confirm/reject correlation
    pub request_id: u64,
    /// Distinguishes a client's own future resends
    pub client_id: u64,
    /// The room version the steps were computed against
    pub base_version: u64,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionChange {
    /// User id
    pub id: String,
    pub session_id: Uuid,
    pub anchor: u64,
    pub head: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequest {
    pub from_version: u64,
}

/// Messages a client sends to the server.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Diff(DiffRequest),
    SelectionChange(SelectionChange),
    RequestResend(ResendRequest),
    GetDocument,
}

/// Why a diff was rejected.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// Steps were computed against an older version; rebase and resubmit
    StaleVersion,
    /// Client claims a version ahead of the room; client bug
    BaseAhead,
    /// Steps could not be applied to the current document
    InvalidSteps,
}

/// Full document snapshot.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DocData {
    pub content: Value,
    pub version: u64,
    pub meta: DocMeta,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timestamp: DateTime<Utc>,
}

/// A confirmed diff fanned out to the other subscribers, tagged with the
/// room version after it was applied.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastDiff {
    /// Room version after these steps were applied
    pub version: u64,
    pub request_id: u64,
    pub client_id: u64,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Set on recovery replays so clients can tell them from live traffic
    #[serde(default, skip_serializing_if = "is_false")]
    pub server_fix: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Messages the server sends to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once when the connection is established
    Welcome,
    /// Sent after a successful subscribe
    Subscribed,
    DocData(DocData),
    #[serde(rename_all = "camelCase")]
    ConfirmDiff { request_id: u64 },
    #[serde(rename_all = "camelCase")]
    RejectDiff { request_id: u64, code: RejectCode },
    Diff(BroadcastDiff),
    /// Another subscriber's selection, relayed as-is
    SelectionChange(SelectionChange),
    #[serde(rename_all = "camelCase")]
    Connections { participant_list: Vec<Participant> },
    /// Steps could not be applied; the sender should resynchronize
    PatchError,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_parses_with_and_without_connection_count() {
        let raw = r#"{"type":"subscribe","roomId":"6a80a68f-3a32-4db5-a6b7-538e5e8efbad","authToken":"t","c":1,"s":0}"#;
        let msg: WrappedMessage<ClientMessage> = serde_json::from_str(raw).unwrap();
        match msg.message {
            ClientMessage::Subscribe(sub) => {
                assert_eq!(sub.connection, 0);
                assert_eq!(sub.auth_token, "t");
            }
            other => panic!("expected subscribe, got {other:?}"),
        }
        assert_eq!(msg.c, 1);
        assert_eq!(msg.v, PROTOCOL_VERSION);
    }

    #[test]
    fn confirm_diff_uses_camel_case_fields() {
        let wrapped = WrappedMessage {
            message: ServerMessage::ConfirmDiff { request_id: 7 },
            c: 3,
            s: 4,
            v: PROTOCOL_VERSION,
        };
        let json = serde_json::to_value(&wrapped).unwrap();
        assert_eq!(json["type"], "confirm_diff");
        assert_eq!(json["requestId"], 7);
        assert_eq!(json["s"], 4);
    }

    #[test]
    fn unknown_step_kind_is_rejected_at_parse_time() {
        let raw = r#"{"type":"diff","requestId":1,"clientId":2,"baseVersion":0,
            "steps":[{"stepType":"addMark","from":0,"to":1}]}"#;
        let parsed: Result<ClientMessage, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn reject_codes_serialize_snake_case() {
        let msg = ServerMessage::RejectDiff {
            request_id: 9,
            code: RejectCode::StaleVersion,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["code"], "stale_version");
    }
}
