//! Capture errors and the per-request handler error slot.

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Failure of a best-effort capture step. Never surfaced to the client.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("failed to buffer response body: {0}")]
    ResponseBody(String),

    #[error("malformed trace id header value {0:?}")]
    TraceId(String),
}

/// An error recorded by a handler for the current request.
///
/// Handlers return it (or insert it into the response extensions) and the
/// interceptor marks the server span as failed with [`HandlerError::message`].
///
/// ```ignore
/// async fn load(Path(id): Path<u64>) -> Result<Json<User>, HandlerError> {
///     let user = db::find(id).context("loading user")?;
///     Ok(Json(user))
/// }
/// ```
#[derive(Clone)]
pub struct HandlerError {
    inner: Arc<anyhow::Error>,
    status: StatusCode,
}

impl HandlerError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: Arc::new(err.into()),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Override the status returned to the client (default 500).
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The full error chain, outermost context first.
    pub fn message(&self) -> String {
        format!("{:#}", self.inner)
    }

    /// Record this error on an already built response.
    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("status", &self.status)
            .field("error", &self.message())
            .finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.inner)
    }
}

impl<E> From<E> for HandlerError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.inner.to_string()).into_response();
        self.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_includes_context_chain() {
        let err = HandlerError::from(anyhow::anyhow!("connection refused").context("loading user"));
        assert_eq!(err.message(), "loading user: connection refused");
    }

    #[test]
    fn test_into_response_carries_error() {
        let response = HandlerError::new(anyhow::anyhow!("boom"))
            .with_status(StatusCode::BAD_GATEWAY)
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let recorded = response
            .extensions()
            .get::<HandlerError>()
            .expect("error should be recorded in extensions");
        assert_eq!(recorded.message(), "boom");
    }
}
