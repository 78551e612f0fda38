//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqtrace::{HandlerError, TracingInterceptor};
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::ServerConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub interceptor: Arc<TracingInterceptor>,
}

/// Build the router with every route behind the tracing interceptor.
pub fn router(state: AppState) -> Router {
    let interceptor = state.interceptor.clone();
    Router::new()
        .route("/echo", post(handle_echo))
        .route("/fail", get(handle_fail))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .with_state(Arc::new(state))
        .layer(axum::middleware::from_fn_with_state(
            interceptor,
            reqtrace::trace_request,
        ))
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "reqtrace server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("reqtrace server shut down gracefully");
    Ok(())
}

/// POST /echo: returns the request body unchanged.
///
/// The interceptor has already buffered the body for its span event; this
/// handler reads the restored stream.
async fn handle_echo(request: Request) -> Result<Response, HandlerError> {
    let span = reqtrace::handler_span!("echo", request.uri().path());
    if let Err(e) = span.set_parent(reqtrace::request_context(&request)) {
        tracing::debug!(error = %e, "Failed to parent handler span on request context");
    }

    async {
        let content_type = request.headers().get("content-type").cloned();
        let body = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .context("reading echo body")
            .map_err(|e| HandlerError::new(e).with_status(StatusCode::BAD_REQUEST))?;
        tracing::Span::current().record("body_bytes", body.len() as u64);
        tracing::Span::current().record("status", StatusCode::OK.as_u16());

        let mut response = body.into_response();
        if let Some(content_type) = content_type {
            response.headers_mut().insert("content-type", content_type);
        }
        Ok::<_, HandlerError>(response)
    }
    .instrument(span)
    .await
}

/// GET /fail: always fails, to show error status on the server span.
async fn handle_fail() -> Result<Response, HandlerError> {
    let err = anyhow::anyhow!("simulated upstream outage").context("handling /fail");
    tracing::warn!(error = ?err, "Returning simulated failure");
    Err(HandlerError::new(err).with_status(StatusCode::BAD_GATEWAY))
}

/// GET /stats: interceptor counters.
async fn handle_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.interceptor.stats().snapshot())
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
