//! Router assembly and HTTP serving.

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{
    AppState, healthz, list_field_alerts, resolve_alert, trigger_bulk_task, trigger_field_task,
};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/fields/{id}/tasks/{task}", post(trigger_field_task))
        .route("/tasks/{task}/bulk", post(trigger_bulk_task))
        .route("/fields/{id}/alerts", get(list_field_alerts))
        .route("/alerts/{id}/resolve", post(resolve_alert))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(
    addr: std::net::SocketAddr,
    router: Router,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}
