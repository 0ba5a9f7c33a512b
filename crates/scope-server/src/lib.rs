pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;

use axum::routing::{get, post};
use axum::Router;
use scope_core::Agent;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(agent: Agent) -> Router {
    let app_state = state::AppState::new(agent);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Status
        .route("/api/status", get(routes::status::get_status))
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Actions
        .route("/api/actions", get(routes::actions::list_actions))
        .route("/api/actions/{name}", get(routes::actions::get_action))
        // Assignations
        .route(
            "/api/assignations",
            get(routes::assignations::list_assignations)
                .post(routes::assignations::submit_assignation),
        )
        .route(
            "/api/assignations/{id}",
            get(routes::assignations::get_assignation)
                .delete(routes::assignations::evict_assignation),
        )
        .route(
            "/api/assignations/{id}/cancel",
            post(routes::assignations::cancel_assignation),
        )
        // State
        .route(
            "/api/state",
            get(routes::state::get_state)
                .put(routes::state::put_state)
                .patch(routes::state::patch_state)
                .delete(routes::state::clear_state),
        )
        .route(
            "/api/state/{*path}",
            axum::routing::delete(routes::state::delete_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the agent and serve its API on `host:port` until `shutdown`
/// resolves, then shut the agent down.
pub async fn serve(
    agent: Agent,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(agent, listener, shutdown).await
}

/// Like `serve`, on a pre-bound listener so the caller can read the actual
/// port first (useful when `port = 0` and the OS picks a free port).
pub async fn serve_on(
    agent: Agent,
    listener: tokio::net::TcpListener,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    agent.start();
    let app = build_router(agent.clone());

    tracing::info!(
        actions = agent.registry().len(),
        "scopehub listening on http://localhost:{actual_port}"
    );

    // Open SSE streams would hold graceful shutdown forever; ending every
    // subscription closes them.
    let connections = agent.connections().clone();
    let shutdown = async move {
        shutdown.await;
        connections.disconnect_all().await;
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    agent.shutdown().await;
    Ok(())
}
