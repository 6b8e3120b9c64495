pub mod config;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Cli, ConfigError, ServerConfig, SourceKind};
pub use websocket::{handle_dashboard, handle_stream, health_check, AppState};

/// Build the HTTP router. `/` is kept as an alias of `/stream` for existing
/// live-stream clients.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_stream))
        .route("/stream", get(handle_stream))
        .route("/dashboard", get(handle_dashboard))
        .route("/health", get(health_check))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
