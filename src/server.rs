/// HTTP server setup and routing
use crate::{
    context::AppContext,
    error::{PayflowError, PayflowResult},
};
use axum::{http::StatusCode, response::Json, Router};
use serde_json::json;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the application router.
/// Returns Router<()> because state is already provided.
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .merge(crate::api::routes())
        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .fallback(not_found)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Start the HTTP server, running until the shutdown signal flips.
pub async fn serve(ctx: AppContext, mut shutdown: watch::Receiver<bool>) -> PayflowResult<()> {
    let addr = format!("{}:{}", ctx.config.api.host, ctx.config.api.port);
    info!(addr = %addr, "PayFlow API listening");

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PayflowError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| PayflowError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
