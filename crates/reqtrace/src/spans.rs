//! Span builder helpers for handler-level instrumentation.

/// Create a `tracing` span for work done inside a route handler.
///
/// Usage: `let span = reqtrace::handler_span!("echo", route);`
///
/// Parent it on the interceptor's server span with
/// `OpenTelemetrySpanExt::set_parent(&span, reqtrace::request_context(&request))`.
///
/// Fields recorded later by the handler:
/// - `body_bytes`: size of the body the handler read
/// - `status`: HTTP status the handler produced
#[macro_export]
macro_rules! handler_span {
    ($handler:expr, $route:expr) => {
        tracing::info_span!(
            "handler",
            handler = %$handler,
            route = %$route,
            body_bytes = tracing::field::Empty,
            status = tracing::field::Empty,
        )
    };
}
