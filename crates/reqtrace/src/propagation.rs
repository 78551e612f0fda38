//! Parent trace context extraction from inbound headers.
//!
//! A bare trace ID in a vendor header seeds a new lineage; everything else
//! goes through the standard W3C Trace Context and Baggage propagators.

use http::HeaderMap;
use opentelemetry::propagation::{Extractor, TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};

use crate::error::CaptureError;
use crate::stats::InterceptorStats;

/// Read-only view of an `http::HeaderMap` for text map propagators.
pub struct HeaderCarrier<'a>(pub &'a HeaderMap);

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Derives the parent context for a server span.
pub struct TraceContextExtractor {
    trace_id_header: String,
    propagator: Box<dyn TextMapPropagator + Send + Sync>,
    id_generator: RandomIdGenerator,
    stats: InterceptorStats,
}

impl TraceContextExtractor {
    /// Extractor reading bare trace IDs from `trace_id_header`, with W3C
    /// Trace Context and Baggage as the standard propagation format.
    pub fn new(trace_id_header: impl Into<String>, stats: InterceptorStats) -> Self {
        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        Self {
            trace_id_header: trace_id_header.into(),
            propagator: Box::new(propagator),
            id_generator: RandomIdGenerator::default(),
            stats,
        }
    }

    /// Replace the standard propagation format.
    pub fn with_propagator(
        mut self,
        propagator: impl TextMapPropagator + Send + Sync + 'static,
    ) -> Self {
        self.propagator = Box::new(propagator);
        self
    }

    /// Return `cx` extended with the parent span reference found in `headers`.
    ///
    /// Never fails: a malformed vendor header falls back to the standard
    /// propagator, and no parent at all yields a context from which the
    /// tracer starts a new root trace.
    pub fn extract(&self, cx: &Context, headers: &HeaderMap) -> Context {
        let raw = match headers.get(self.trace_id_header.as_str()) {
            Some(value) if !value.is_empty() => value,
            _ => return self.extract_standard(cx, headers),
        };

        let parsed = raw
            .to_str()
            .map_err(|_| {
                CaptureError::TraceId(String::from_utf8_lossy(raw.as_bytes()).into_owned())
            })
            .and_then(parse_trace_id);

        match parsed {
            Ok(trace_id) => {
                let span_context = SpanContext::new(
                    trace_id,
                    self.id_generator.new_span_id(),
                    TraceFlags::SAMPLED,
                    true,
                    TraceState::default(),
                );
                cx.with_remote_span_context(span_context)
            }
            Err(e) => {
                self.stats.inc_malformed_trace_headers();
                tracing::debug!(
                    error = %e,
                    header = %self.trace_id_header,
                    "Ignoring malformed trace id header"
                );
                self.extract_standard(cx, headers)
            }
        }
    }

    fn extract_standard(&self, cx: &Context, headers: &HeaderMap) -> Context {
        self.propagator.extract_with_context(cx, &HeaderCarrier(headers))
    }
}

/// Parse a canonical trace ID: 32 lowercase hex characters, not all zero.
pub fn parse_trace_id(value: &str) -> Result<TraceId, CaptureError> {
    let canonical = value.len() == 32
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !canonical {
        return Err(CaptureError::TraceId(value.to_string()));
    }

    match TraceId::from_hex(value) {
        Ok(trace_id) if trace_id != TraceId::INVALID => Ok(trace_id),
        _ => Err(CaptureError::TraceId(value.to_string())),
    }
}
