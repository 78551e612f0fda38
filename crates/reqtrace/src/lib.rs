//! Server-side OpenTelemetry request tracing for axum services.
//!
//! [`TracingInterceptor`] continues or starts a trace for every inbound
//! request, records headers, baggage and bodies as span events, and reports
//! handler errors as span status. It is installed with
//! `axum::middleware::from_fn_with_state(interceptor, trace_request)`.

pub mod capture;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod otlp;
pub mod propagation;
pub mod spans;
pub mod stats;

pub use config::{InterceptorConfig, OtlpProtocol, TracingConfig};
pub use error::{CaptureError, HandlerError};
pub use interceptor::{request_context, trace_request, TracingInterceptor};
pub use otlp::{init_tracing, TracingGuard};
pub use propagation::TraceContextExtractor;
pub use stats::{InterceptorStats, StatsSnapshot};
