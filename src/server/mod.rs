//! HTTP surface
//!
//! axum router over an explicit application context. Handlers live in
//! [`handlers`]; this module owns wiring, serving and shutdown.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cache::Caches;
use crate::error::Result;
use crate::graph::GraphStore;
use crate::probe::UrlProbe;
use crate::writer::BatchWriter;

use handlers::{
    create_identity, create_page, get_hates, get_likes, hate_page, health, like_page, stats,
};

/// Everything a request handler needs, threaded through axum state instead
/// of living in globals.
pub struct AppContext<S: GraphStore> {
    pub store: Arc<S>,
    pub caches: Arc<Caches>,
    pub writer: Arc<BatchWriter>,
    pub probe: Arc<dyn UrlProbe>,
    pub url_prefix: String,
    pub default_region: String,
}

pub type AppState<S> = Arc<AppContext<S>>;

pub fn build_router<S: GraphStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/stats", get(stats::<S>))
        .route("/v1/identities", post(create_identity::<S>))
        .route("/v1/pages", post(create_page::<S>))
        .route(
            "/v1/identities/:identity/likes",
            get(get_likes::<S>).post(like_page::<S>),
        )
        .route(
            "/v1/identities/:identity/hates",
            get(get_hates::<S>).post(hate_page::<S>),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve until ctrl-c. The writer keeps running; the binary shuts it down
/// after this returns so queued writes drain.
pub async fn serve<S: GraphStore>(bind: SocketAddr, state: AppState<S>) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => tracing::error!(?err, "failed to listen for shutdown signal"),
    }
}

pub fn install_tracing_subscriber() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = fmt().with_env_filter(filter).try_init();
    });
}
