//! Atomic interceptor counters.
//!
//! All atomics use `Relaxed` ordering: these are monotonic display counters
//! with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
struct StatsInner {
    requests_traced: AtomicU64,
    requests_short_circuited: AtomicU64,
    body_read_failures: AtomicU64,
    malformed_trace_headers: AtomicU64,
}

/// Thread-safe interceptor statistics. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct InterceptorStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests_traced: u64,
    pub requests_short_circuited: u64,
    pub body_read_failures: u64,
    pub malformed_trace_headers: u64,
}

impl InterceptorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_traced(&self) {
        self.inner.requests_traced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_short_circuited(&self) {
        self.inner
            .requests_short_circuited
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_body_read_failures(&self) {
        self.inner.body_read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_malformed_trace_headers(&self) {
        self.inner
            .malformed_trace_headers
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_traced: self.inner.requests_traced.load(Ordering::Relaxed),
            requests_short_circuited: self.inner.requests_short_circuited.load(Ordering::Relaxed),
            body_read_failures: self.inner.body_read_failures.load(Ordering::Relaxed),
            malformed_trace_headers: self.inner.malformed_trace_headers.load(Ordering::Relaxed),
        }
    }
}
