use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::future::Cache;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::clients::app_service_client::AppServiceClient;
use crate::config::Config;
use crate::sync::SyncError;

/// The identity a sealed token resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthedUser {
    pub id: String,
    pub name: String,
}

/// What a user may do with a document, resolved at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    None,
    View,
    Edit,
}

impl AccessLevel {
    pub fn can_view(self) -> bool {
        self != AccessLevel::None
    }

    pub fn can_edit(self) -> bool {
        self == AccessLevel::Edit
    }
}

#[derive(Debug, Clone)]
struct UserProfile {
    name: String,
}

/// Verifies sealed tokens into user identities.
///
/// Login state itself is owned by the app service; this registry only
/// unseals tokens and resolves display metadata and document access. It is
/// consulted once per subscribe, never per diff.
pub struct SessionRegistry {
    jwt_secret: Option<String>,
    app_service: Option<Arc<AppServiceClient>>,
    user_cache: Cache<String, UserProfile>,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        let app_service = match (&config.app_service_url, &config.auth_jwt_secret) {
            (Some(url), Some(secret)) => Some(Arc::new(AppServiceClient::new(
                url.clone(),
                secret.clone(),
                config.service_name.clone(),
            ))),
            _ => {
                info!("No app service configured; user metadata and access checks are local");
                None
            }
        };
        Self {
            jwt_secret: config.auth_jwt_secret.clone(),
            app_service,
            user_cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(Duration::from_secs(5 * 60))
                .build(),
        }
    }

    /// Unseal a token into an authenticated user.
    pub async fn authenticate(&self, sealed_token: &str) -> Result<AuthedUser, SyncError> {
        let secret = self
            .jwt_secret
            .as_ref()
            .ok_or_else(|| SyncError::AuthFailure("no JWT secret configured".to_string()))?;

        let token_data = validate_jwt(sealed_token, secret)
            .map_err(|e| SyncError::AuthFailure(format!("token validation failed: {}", e)))?;

        let token_type = token_data
            .claims
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("user");
        if token_type != "user" {
            return Err(SyncError::AuthFailure(format!(
                "token type '{}' cannot subscribe",
                token_type
            )));
        }

        let uid = token_data
            .claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SyncError::AuthFailure("token has no subject".to_string()))?;

        let profile = self.get_or_fetch_profile(uid).await;
        Ok(AuthedUser {
            id: uid.to_string(),
            name: profile.name,
        })
    }

    async fn get_or_fetch_profile(&self, uid: &str) -> UserProfile {
        if let Some(profile) = self.user_cache.get(uid).await {
            return profile;
        }
        debug!(uid, "User profile cache miss");
        let profile = match &self.app_service {
            Some(client) => match client.get_user(uid).await {
                Ok(user) => UserProfile { name: user.name },
                Err(e) => {
                    error!(uid, "Failed to fetch user profile: {}", e);
                    UserProfile {
                        name: uid.to_string(),
                    }
                }
            },
            None => UserProfile {
                name: uid.to_string(),
            },
        };
        self.user_cache
            .insert(uid.to_string(), profile.clone())
            .await;
        profile
    }

    /// Resolve what `uid` may do with `doc_id`.
    ///
    /// Denies on app service errors; without an app service (dev mode)
    /// everyone edits.
    pub async fn document_access(&self, uid: &str, doc_id: Uuid) -> AccessLevel {
        match &self.app_service {
            Some(client) => match client.get_document_access(uid, doc_id).await {
                Ok(access) if access.edit => AccessLevel::Edit,
                Ok(access) if access.view => AccessLevel::View,
                Ok(_) => AccessLevel::None,
                Err(e) => {
                    error!(uid, %doc_id, "Failed to resolve document access: {}", e);
                    AccessLevel::None
                }
            },
            None => AccessLevel::Edit,
        }
    }

    /// Cached user profiles, for diagnostics.
    pub fn cached_users(&self) -> u64 {
        self.user_cache.entry_count()
    }
}

/// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}
