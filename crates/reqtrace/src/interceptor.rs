//! Server tracing interceptor.
//!
//! Runs once per inbound request: continues or starts a trace, records the
//! request and response as span events, marks the span failed when the
//! handler recorded an error, and always ends the span.
//!
//! With full capture the span stays open until the response body has been
//! streamed to the client (or dropped), so it covers the whole exchange.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global::BoxedTracer;
use opentelemetry::trace::noop::NoopTracerProvider;
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, InstrumentationScope, KeyValue};

use crate::capture;
use crate::config::InterceptorConfig;
use crate::error::HandlerError;
use crate::propagation::TraceContextExtractor;
use crate::stats::InterceptorStats;

/// Instrumentation scope name of the server tracer.
pub const INSTRUMENTATION_NAME: &str = "reqtrace.server";

pub const EVENT_HTTP_REQUEST: &str = "http.request";
pub const EVENT_HTTP_REQUEST_HEADERS: &str = "http.request.headers";
pub const EVENT_HTTP_REQUEST_BAGGAGE: &str = "http.request.baggage";
pub const EVENT_HTTP_REQUEST_BODY: &str = "http.request.body";
pub const EVENT_HTTP_RESPONSE: &str = "http.response";
pub const EVENT_HTTP_RESPONSE_HEADERS: &str = "http.response.headers";
pub const EVENT_HTTP_RESPONSE_BODY: &str = "http.response.body";

/// Context value marking a request as already traced by this interceptor.
#[derive(Debug, Clone, Copy)]
struct TracingHandled;

/// Ends the server span when dropped.
///
/// Covers normal return, panics unwinding through the handler, the request
/// future being dropped mid-flight, and a response body dropped mid-stream.
struct SpanGuard(Context);

impl Drop for SpanGuard {
    fn drop(&mut self) {
        self.0.span().end();
    }
}

/// The context carried by `request`, or an empty one.
pub fn request_context(request: &Request) -> Context {
    request
        .extensions()
        .get::<Context>()
        .cloned()
        .unwrap_or_else(Context::new)
}

/// Server-side request tracing interceptor.
pub struct TracingInterceptor {
    tracer: BoxedTracer,
    extractor: TraceContextExtractor,
    common_attributes: Vec<KeyValue>,
    max_content_log_size: usize,
    max_request_body_size: usize,
    default_provider: bool,
    stats: InterceptorStats,
}

impl TracingInterceptor {
    /// Build an interceptor creating spans through `provider`.
    ///
    /// A [`NoopTracerProvider`] is treated as the default provider: spans are
    /// still started and ended, but headers and bodies are not captured.
    pub fn new<P>(provider: &P, config: InterceptorConfig) -> Self
    where
        P: TracerProvider + 'static,
        P::Tracer: Send + Sync + 'static,
        <P::Tracer as Tracer>::Span: Send + Sync + 'static,
    {
        let scope = InstrumentationScope::builder(INSTRUMENTATION_NAME)
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        let tracer = BoxedTracer::new(Box::new(provider.tracer_with_scope(scope)));
        let default_provider = (provider as &dyn Any).is::<NoopTracerProvider>();

        let stats = InterceptorStats::new();
        let extractor = TraceContextExtractor::new(config.trace_id_header.clone(), stats.clone());

        Self {
            tracer,
            extractor,
            common_attributes: config.common_attributes(),
            max_content_log_size: config.max_content_log_size,
            max_request_body_size: config.max_request_body_size,
            default_provider,
            stats,
        }
    }

    /// Override default-provider detection.
    pub fn with_default_provider(mut self, default_provider: bool) -> Self {
        self.default_provider = default_provider;
        self
    }

    /// Replace the parent context extractor.
    pub fn with_extractor(mut self, extractor: TraceContextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn is_default_provider(&self) -> bool {
        self.default_provider
    }

    pub fn stats(&self) -> &InterceptorStats {
        &self.stats
    }

    /// Trace `request` around the rest of the chain, `next`.
    pub async fn process<F, Fut>(&self, mut request: Request, next: F) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let cx = request_context(&request);
        if cx.get::<TracingHandled>().is_some() {
            self.stats.inc_short_circuited();
            return next(request).await;
        }
        let cx = cx.with_value(TracingHandled);

        let parent = self.extractor.extract(&cx, request.headers());
        let span = self
            .tracer
            .span_builder(request.uri().to_string())
            .with_kind(SpanKind::Server)
            .with_attributes(self.common_attributes.clone())
            .start_with_context(&self.tracer, &parent);
        let cx = parent.with_span(span);
        let guard = SpanGuard(cx.clone());
        self.stats.inc_traced();

        request.extensions_mut().insert(cx.clone());

        if self.default_provider {
            let response = next(request).await;
            drop(guard);
            return response;
        }

        let request = self.record_request(&cx, request).await;
        let response = next(request).await;
        self.record_response(guard, response)
    }

    async fn record_request(&self, cx: &Context, request: Request) -> Request {
        let mut attributes = vec![
            KeyValue::new(
                EVENT_HTTP_REQUEST_HEADERS,
                capture::headers_to_string(request.headers()),
            ),
            KeyValue::new(EVENT_HTTP_REQUEST_BAGGAGE, capture::baggage_to_string(cx)),
        ];

        let request = if capture::is_encoded(request.headers()) {
            request
        } else {
            let (request, captured) =
                capture::capture_request_body(request, self.max_request_body_size).await;
            match captured {
                Ok(body) => attributes.push(KeyValue::new(
                    EVENT_HTTP_REQUEST_BODY,
                    capture::truncate_content(&body, self.max_content_log_size),
                )),
                Err(e) => {
                    self.stats.inc_body_read_failures();
                    tracing::debug!(error = %e, "Skipping request body capture");
                }
            }
            request
        };

        cx.span().add_event(EVENT_HTTP_REQUEST, attributes);
        request
    }

    /// Set the error status now and hand the span to the response body.
    ///
    /// The `http.response` event is added, and the span ended, once the body
    /// stream completes, fails or is dropped. Chunks reach the client as they
    /// are produced; only `max_content_log_size + 1` bytes are kept.
    fn record_response(&self, guard: SpanGuard, response: Response) -> Response {
        if let Some(err) = response.extensions().get::<HandlerError>() {
            guard.0.span().set_status(Status::error(err.message()));
        }

        let headers = capture::headers_to_string(response.headers());
        let capture_body = !capture::is_encoded(response.headers());
        let limit = self.max_content_log_size;
        let keep = if capture_body {
            limit.saturating_add(1)
        } else {
            0
        };

        capture::TeeBody::wrap_response(response, keep, move |captured| {
            let mut attributes = vec![KeyValue::new(EVENT_HTTP_RESPONSE_HEADERS, headers)];
            if capture_body {
                match captured {
                    Ok(body) => attributes.push(KeyValue::new(
                        EVENT_HTTP_RESPONSE_BODY,
                        capture::truncate_content(&body, limit),
                    )),
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping response body capture");
                    }
                }
            }
            guard.0.span().add_event(EVENT_HTTP_RESPONSE, attributes);
            drop(guard);
        })
    }
}

/// Axum middleware entry point.
///
/// ```ignore
/// let interceptor = Arc::new(TracingInterceptor::new(&provider, config));
/// let app = Router::new()
///     .route("/echo", post(echo))
///     .layer(axum::middleware::from_fn_with_state(interceptor, reqtrace::trace_request));
/// ```
pub async fn trace_request(
    State(interceptor): State<Arc<TracingInterceptor>>,
    request: Request,
    next: Next,
) -> Response {
    interceptor
        .process(request, |request| next.run(request))
        .await
}
