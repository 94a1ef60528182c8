// HTTP boundary for the probe engine
//
// Routes:
// - POST /verify   run one probe, answer with the outcome or {"detail": ...}
// - GET  /health   liveness of this service (not of the verifier)
// - GET  /metrics  Prometheus text format, when enabled

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::metrics;
use crate::probe::{ProbeEngine, ProbeError, ProbeRequest};

/// Build the router around a shared engine
pub fn router(engine: Arc<ProbeEngine>, metrics_enabled: bool) -> Router {
    let mut app = Router::new()
        .route("/verify", post(verify_handler))
        .route("/health", get(health_handler));

    if metrics_enabled {
        metrics::init();
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http()).with_state(engine)
}

/// Start the probe HTTP server and serve until the process is stopped
pub async fn start_server(config: &Config) -> Result<()> {
    let engine = Arc::new(ProbeEngine::from_config(&config.probe));
    let policy = engine.policy();
    let app = router(engine, config.metrics.enabled);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.bind, config.server.port
            )
        })?;

    info!(
        "Starting probe server on {} (policy: {})",
        addr,
        policy.as_str()
    );

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind probe server")?;

    axum::serve(listener, app)
        .await
        .context("Probe server error")?;

    Ok(())
}

async fn verify_handler(
    State(engine): State<Arc<ProbeEngine>>,
    payload: Result<Json<ProbeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            return detail_response(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text());
        }
    };

    match engine.verify(request).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(e: &ProbeError) -> Response {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    detail_response(status, e.detail())
}

fn detail_response(status: StatusCode, detail: String) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

/// Metrics endpoint handler
async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}
