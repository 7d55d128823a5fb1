//! HTTP surface for the playground

mod error;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::TokenLifecycle;

/// Path of the authorization callback served by this router.
pub const CALLBACK_PATH: &str = "/api/auth/callback";

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<TokenLifecycle>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let token_routes = Router::new()
        .route("/:id/test", post(handlers::test_token))
        .route("/:id/revoke", post(handlers::revoke_token))
        .route("/:id/refresh", post(handlers::refresh_token))
        .route("/:id/usage", get(handlers::token_usage));

    Router::new()
        .route("/", get(handlers::dashboard))
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::save_config),
        )
        .route("/api/auth/login", get(handlers::login))
        .route(CALLBACK_PATH, get(handlers::callback))
        .nest("/api/token", token_routes)
        .route("/api/stats", get(handlers::stats))
        .route("/api/test-request", post(handlers::test_request))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Default redirect URI for a server listening on `port`.
pub fn local_redirect_uri(port: u16) -> String {
    format!("http://localhost:{}{}", port, CALLBACK_PATH)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(lifecycle: Arc<TokenLifecycle>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Graph playground listening on http://{}", addr);

    let app = create_router(AppState { lifecycle });
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
