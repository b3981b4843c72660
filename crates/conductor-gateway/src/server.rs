//! Router assembly and the serve loop.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use conductor_agent::executions::ExecutionRegistry;

use crate::routes;
use crate::state::GatewayState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the HTTP router over `state`.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let cors = cors_layer(state.config.cors_origins());
    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/sessions",
            post(routes::create_session).get(routes::list_sessions),
        )
        .route(
            "/api/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/api/sessions/{id}/chat", post(routes::chat))
        .route("/api/executions", get(routes::list_executions))
        .route("/api/executions/{id}/cancel", post(routes::cancel_execution))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Serve the gateway until ctrl-c, then cancel every running execution.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.bind_address();
    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    let executions = state.executions.clone();
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(ctrl_c(), executions))
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}

/// Resolves after `signal`, once every running execution has been told to
/// cancel. Open chat streams then end on their own and the drain completes.
async fn shutdown_on(signal: impl Future<Output = ()>, executions: ExecutionRegistry) {
    signal.await;
    info!("Shutdown signal received");
    executions.cancel_all().await;
}
