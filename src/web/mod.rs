//! JSON API server.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
}

/// API server for device management and status.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<Store>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

pub(crate) fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/health", get(handlers::handle_health))
        .route(
            "/api/devices",
            get(handlers::handle_get_devices).post(handlers::handle_create_device),
        )
        .route(
            "/api/devices/{id}",
            get(handlers::handle_get_device)
                .put(handlers::handle_update_device)
                .delete(handlers::handle_delete_device),
        )
        .route("/api/devices/{id}/events", get(handlers::handle_get_events))
        .route(
            "/api/settings/{name}",
            get(handlers::handle_get_setting).put(handlers::handle_put_setting),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .with_state(state)
}
