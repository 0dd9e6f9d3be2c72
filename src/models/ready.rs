use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for the readiness check endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ReadyResponse {
    pub status: String,
    pub message: String,
}
