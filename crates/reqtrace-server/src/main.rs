//! reqtrace server: a small axum service with every request traced by the
//! reqtrace interceptor.

mod config;
mod server;

use std::sync::Arc;

use config::ServerConfig;
use opentelemetry::trace::noop::NoopTracerProvider;
use reqtrace::TracingInterceptor;
use server::AppState;

fn main() -> anyhow::Result<()> {
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("REQTRACE_CONFIG").ok())
            .unwrap_or_else(|| "reqtrace.toml".to_string())
    };

    let config = ServerConfig::load(&config_path)?;

    // The tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = reqtrace::init_tracing(&config.tracing);

        // Without an exporter the interceptor runs its fast path
        let interceptor = match tracing_guard.provider() {
            Some(provider) => TracingInterceptor::new(provider, config.interceptor.clone()),
            None => TracingInterceptor::new(&NoopTracerProvider::new(), config.interceptor.clone()),
        };

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            otlp_endpoint = ?config.tracing.otlp_endpoint,
            full_capture = !interceptor.is_default_provider(),
            max_content_log_size = config.interceptor.max_content_log_size,
            "Starting reqtrace server"
        );

        let state = AppState {
            config,
            interceptor: Arc::new(interceptor),
        };

        server::run(state).await
    })
}
