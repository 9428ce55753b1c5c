//! Axum router configuration with middleware.
//!
//! All API routes are under `/api/v1/`. Deployed sites are served from the
//! data dir's `sites/` folder at `/sites/{project_id}/`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use pagewright_infra::config::sites_dir;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Projects
        .route(
            "/projects",
            post(handlers::project::create_project).get(handlers::project::list_projects),
        )
        .route("/projects/{id}", get(handlers::project::get_project))
        // Build session
        .route(
            "/projects/{id}/build",
            get(handlers::build::get_build).delete(handlers::build::reset_build),
        )
        .route(
            "/projects/{id}/build/stream",
            post(handlers::build::stream_build),
        )
        .route(
            "/projects/{id}/build/history",
            get(handlers::build::get_history),
        )
        // Deploy stage poll target
        .route(
            "/projects/{id}/deployment",
            get(handlers::build::get_deployment),
        );

    let sites = sites_dir(&state.data_dir);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .nest_service("/sites", ServeDir::new(sites))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
