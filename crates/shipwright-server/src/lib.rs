pub mod error;
pub mod routes;
pub mod state;
pub mod update;

use std::path::PathBuf;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Update
        .route("/api/update", post(routes::update::perform_update))
        .route("/api/update/status", get(routes::update::get_status))
        // Audit trail
        .route("/api/update/audits", get(routes::audits::list_audits))
        .route(
            "/api/update/audits/latest",
            get(routes::audits::latest_audit),
        )
        .route("/api/update/audits/{id}", get(routes::audits::get_audit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the update controller's HTTP server.
pub async fn serve(root: PathBuf, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(root, listener).await
}

/// Start the server on a pre-bound listener.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on(root: PathBuf, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app_state = AppState::open(root)?;
    if !app_state.orchestrator.is_enabled() {
        tracing::warn!(
            flag = %app_state.orchestrator.config().feature_flag,
            "updates are disabled until the feature flag is set"
        );
    }
    let app = build_router(app_state);

    tracing::info!("shipwright listening on http://localhost:{actual_port}");
    axum::serve(listener, app).await?;
    Ok(())
}
