use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{middleware, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::docs::ApiDoc;
use crate::handlers::{diagnostics, doc_snapshot, health_check, ready_check};
use crate::routes::auth_middleware::auth_middleware;
use crate::sync::connection;
use crate::AppState;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/documents/:doc_id/snapshot", get(doc_snapshot))
        // Applies to all routes added above
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route("/v1/health", get(health_check))
        .route("/v1/ready", get(ready_check))
        .with_state(state)
}

/// Assemble the full application: API routes, the collaboration WebSocket,
/// and the Swagger UI.
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    let ws_route = Router::new()
        .route("/ws", get(connection::ws_handler))
        .with_state(state.clone());

    Router::new()
        .nest("/api", create_api_routes(state))
        .merge(ws_route)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let list: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(list)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    }
}
