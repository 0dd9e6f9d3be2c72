use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// HTTP client for the app service that owns users and document access.
#[derive(Debug)]
pub struct AppServiceClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

/// User record as the app service reports it.
#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub name: String,
}

/// What the app service grants a user on one document.
#[derive(Debug, Deserialize)]
pub struct DocumentAccessResponse {
    #[serde(default)]
    pub view: bool,
    #[serde(default)]
    pub edit: bool,
}

impl AppServiceClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            jwt_secret,
            service_name,
        }
    }

    fn generate_token(&self) -> String {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(60)) // 1 minute expiration
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .expect("Failed to generate JWT")
    }

    /// Fetch a user's profile
    pub async fn get_user(&self, uid: &str) -> Result<UserResponse, reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/users/{}", self.base_url, uid);
        self.client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Fetch what a user may do with a document
    pub async fn get_document_access(
        &self,
        uid: &str,
        doc_id: Uuid,
    ) -> Result<DocumentAccessResponse, reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/users/{}/documents/{}/access", self.base_url, uid, doc_id);
        self.client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
