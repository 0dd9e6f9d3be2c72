pub mod auth;
pub mod clients;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod store;
pub mod sync;

use std::sync::Arc;

use crate::auth::session_registry::SessionRegistry;
use crate::config::Config;
use crate::store::DocStore;
use crate::sync::hub::RoomHub;

/// Shared application state handed to every handler and the WebSocket loop.
pub struct AppState {
    pub config: Config,
    pub hub: RoomHub,
    pub registry: SessionRegistry,
    pub store: Arc<dyn DocStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocStore>, registry: SessionRegistry) -> Self {
        let hub = RoomHub::new(store.clone(), config.sync_settings());
        Self {
            config,
            hub,
            registry,
            store,
        }
    }
}
