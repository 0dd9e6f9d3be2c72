use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::sync::SyncSettings;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Secret used to verify user tokens and mint service tokens
    pub auth_jwt_secret: Option<String>,

    /// Base URL of the app service that owns users and document access
    pub app_service_url: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    /// How many confirmed diffs a room retains for replay
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,

    /// Flush the document to the store every N confirmed diffs
    #[serde(default = "default_save_every_diffs")]
    pub save_every_diffs: u64,

    /// Capacity of a room's command queue
    #[serde(default = "default_room_channel_capacity")]
    pub room_channel_capacity: usize,

    /// Capacity of a connection's outbound queue
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    /// The room tuning knobs handed to the hub
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            history_depth: self.history_depth,
            save_every_diffs: self.save_every_diffs,
            room_channel_capacity: self.room_channel_capacity,
            outbound_capacity: self.outbound_capacity,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            service_name: default_service_name(),
            auth_jwt_secret: None,
            app_service_url: None,
            db_url: None,
            history_depth: default_history_depth(),
            save_every_diffs: default_save_every_diffs(),
            room_channel_capacity: default_room_channel_capacity(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "pagesync-doc".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_history_depth() -> usize {
    1000
}

fn default_save_every_diffs() -> u64 {
    20
}

fn default_room_channel_capacity() -> usize {
    64
}

fn default_outbound_capacity() -> usize {
    256
}
