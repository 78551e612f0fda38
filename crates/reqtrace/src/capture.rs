//! Request/response content capture for span events.
//!
//! Request bodies are buffered into `Bytes` (up to a configured bound) and
//! handed back inside a fresh body so downstream readers see exactly the
//! bytes the client sent. Response bodies are never buffered: [`TeeBody`]
//! forwards each chunk as it arrives and keeps a bounded copy on the side.

use std::pin::Pin;
use std::task::{self, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use http::header::CONTENT_ENCODING;
use http::HeaderMap;
use opentelemetry::baggage::BaggageExt;
use opentelemetry::Context;
use serde_json::{Map, Value};

use crate::error::CaptureError;

/// Suffix appended to a body cut at the configured limit.
pub const TRUNCATION_MARKER: &str = "...";

/// Returns true when the message carries a non-empty `Content-Encoding`.
///
/// Encoded bodies are opaque binary and are never logged.
pub fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .is_some_and(|value| !value.is_empty())
}

/// Render headers as a JSON object string.
///
/// Single-valued headers map to a string, repeated headers to an array of
/// strings in arrival order.
pub fn headers_to_string(headers: &HeaderMap) -> String {
    let mut map = Map::new();
    for name in headers.keys() {
        let mut values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        let value = if values.len() == 1 {
            Value::String(values.remove(0))
        } else {
            Value::from(values)
        };
        map.insert(name.as_str().to_string(), value);
    }
    Value::Object(map).to_string()
}

/// Render the baggage carried by `cx` as a JSON object string.
pub fn baggage_to_string(cx: &Context) -> String {
    let mut map = Map::new();
    for (key, (value, _metadata)) in cx.baggage() {
        map.insert(key.as_str().to_string(), Value::String(value.to_string()));
    }
    Value::Object(map).to_string()
}

/// The logged form of a body: verbatim up to `limit` bytes, otherwise the
/// first `limit` bytes followed by [`TRUNCATION_MARKER`].
pub fn truncate_content(body: &[u8], limit: usize) -> String {
    if body.len() <= limit {
        return String::from_utf8_lossy(body).into_owned();
    }
    let mut content = String::from_utf8_lossy(&body[..limit]).into_owned();
    content.push_str(TRUNCATION_MARKER);
    content
}

/// Buffer the request body and put an identical body back on the request.
///
/// At most `limit` bytes are read. On a read failure, including a body
/// longer than `limit`, the returned request carries a body that yields the
/// same error, so the handler fails the way it would have without capture.
pub async fn capture_request_body(
    request: Request,
    limit: usize,
) -> (Request, Result<Bytes, CaptureError>) {
    let (parts, body) = request.into_parts();
    match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => (
            Request::from_parts(parts, Body::from(bytes.clone())),
            Ok(bytes),
        ),
        Err(e) => {
            let message = e.to_string();
            (
                Request::from_parts(parts, failed_body(e)),
                Err(CaptureError::RequestBody(message)),
            )
        }
    }
}

/// Called once with the captured prefix of a response body.
type OnFinish = Box<dyn FnOnce(Result<Bytes, CaptureError>) + Send>;

/// A stream wrapper that passes response chunks through unchanged while
/// keeping a copy of the first `keep` bytes.
///
/// `on_finish` runs exactly once: with the kept bytes when the inner stream
/// completes, or with an error when the stream fails or the body is dropped
/// before completion (client disconnect, cancelled request).
pub struct TeeBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, axum::Error>> + Send>>,
    buffer: Vec<u8>,
    keep: usize,
    on_finish: Option<OnFinish>,
}

impl TeeBody {
    pub fn new<F>(body: Body, keep: usize, on_finish: F) -> Self
    where
        F: FnOnce(Result<Bytes, CaptureError>) + Send + 'static,
    {
        Self {
            inner: Box::pin(body.into_data_stream()),
            buffer: Vec::new(),
            keep,
            on_finish: Some(Box::new(on_finish)),
        }
    }

    /// Wrap a response so its body is teed through a [`TeeBody`].
    pub fn wrap_response<F>(response: Response, keep: usize, on_finish: F) -> Response
    where
        F: FnOnce(Result<Bytes, CaptureError>) + Send + 'static,
    {
        let (parts, body) = response.into_parts();
        let tee = Self::new(body, keep, on_finish);
        Response::from_parts(parts, Body::from_stream(tee))
    }

    fn finish(&mut self, outcome: Result<Bytes, CaptureError>) {
        if let Some(on_finish) = self.on_finish.take() {
            on_finish(outcome);
        }
    }
}

impl Stream for TeeBody {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let room = self.keep.saturating_sub(self.buffer.len());
                let take = room.min(chunk.len());
                self.buffer.extend_from_slice(&chunk[..take]);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finish(Err(CaptureError::ResponseBody(e.to_string())));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                let captured = Bytes::from(std::mem::take(&mut self.buffer));
                self.finish(Ok(captured));
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        self.finish(Err(CaptureError::ResponseBody(
            "body dropped before completion".to_string(),
        )));
    }
}

fn failed_body(err: axum::Error) -> Body {
    Body::from_stream(futures_util::stream::once(async move {
        Err::<Bytes, axum::Error>(err)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use futures_util::StreamExt;
    use http::HeaderValue;
    use opentelemetry::propagation::TextMapPropagator;
    use opentelemetry_sdk::propagation::BaggagePropagator;

    #[test]
    fn test_truncate_under_limit_is_verbatim() {
        assert_eq!(truncate_content(b"hello", 5), "hello");
        assert_eq!(truncate_content(b"", 5), "");
    }

    #[test]
    fn test_truncate_over_limit_appends_marker() {
        assert_eq!(truncate_content(b"hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_zero_limit() {
        assert_eq!(truncate_content(b"abc", 0), "...");
    }

    #[test]
    fn test_is_encoded() {
        let mut headers = HeaderMap::new();
        assert!(!is_encoded(&headers));

        headers.insert(CONTENT_ENCODING, HeaderValue::from_static(""));
        assert!(!is_encoded(&headers));

        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        assert!(is_encoded(&headers));
    }

    #[test]
    fn test_headers_to_string_single_and_repeated() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/xml"));

        let rendered: Value = serde_json::from_str(&headers_to_string(&headers)).unwrap();
        assert_eq!(rendered["content-type"], "application/json");
        assert_eq!(
            rendered["accept"],
            serde_json::json!(["text/html", "application/xml"])
        );
    }

    #[test]
    fn test_empty_baggage_renders_empty_object() {
        assert_eq!(baggage_to_string(&Context::new()), "{}");
    }

    #[test]
    fn test_baggage_to_string() {
        let carrier = HashMap::from([("baggage".to_string(), "tenant=acme".to_string())]);
        let cx = BaggagePropagator::new().extract(&carrier);
        let rendered: Value = serde_json::from_str(&baggage_to_string(&cx)).unwrap();
        assert_eq!(rendered, serde_json::json!({"tenant": "acme"}));
    }

    #[tokio::test]
    async fn test_capture_request_body_restores_stream() {
        let request = Request::builder()
            .uri("/echo")
            .body(Body::from("original payload"))
            .unwrap();

        let (request, captured) = capture_request_body(request, 1024).await;
        assert_eq!(captured.unwrap(), Bytes::from_static(b"original payload"));

        let downstream = axum::body::to_bytes(request.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(downstream, Bytes::from_static(b"original payload"));
    }

    fn recorder() -> (
        Arc<Mutex<Option<Result<Bytes, CaptureError>>>>,
        impl FnOnce(Result<Bytes, CaptureError>) + Send + 'static,
    ) {
        let slot = Arc::new(Mutex::new(None));
        let writer = slot.clone();
        (slot, move |outcome: Result<Bytes, CaptureError>| {
            *writer.lock().unwrap() = Some(outcome)
        })
    }

    #[tokio::test]
    async fn test_tee_body_passes_chunks_and_keeps_prefix() {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"defgh"))];
        let (slot, on_finish) = recorder();
        let response = Response::new(Body::from_stream(futures_util::stream::iter(chunks)));

        let response = TeeBody::wrap_response(response, 5, on_finish);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(body, Bytes::from_static(b"abcdefgh"));
        let captured = slot.lock().unwrap().take().unwrap().unwrap();
        assert_eq!(captured, Bytes::from_static(b"abcde"));
    }

    #[tokio::test]
    async fn test_tee_body_yields_first_chunk_of_endless_stream() {
        let endless = futures_util::stream::once(async {
            Ok::<_, std::io::Error>(Bytes::from_static(b"data: 1\n\n"))
        })
        .chain(futures_util::stream::pending());
        let (slot, on_finish) = recorder();

        let mut tee = TeeBody::new(Body::from_stream(endless), 64, on_finish);
        let first = tee.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"data: 1\n\n"));
        assert!(slot.lock().unwrap().is_none());

        drop(tee);
        let outcome = slot.lock().unwrap().take().unwrap();
        assert!(matches!(outcome, Err(CaptureError::ResponseBody(_))));
    }

    #[tokio::test]
    async fn test_tee_body_reports_stream_error() {
        let broken = Body::from_stream(futures_util::stream::once(async {
            Err::<Bytes, std::io::Error>(std::io::Error::other("upstream closed"))
        }));
        let (slot, on_finish) = recorder();

        let mut tee = TeeBody::new(broken, 64, on_finish);
        assert!(tee.next().await.unwrap().is_err());
        let outcome = slot.lock().unwrap().take().unwrap();
        assert!(matches!(outcome, Err(CaptureError::ResponseBody(_))));
    }

    #[tokio::test]
    async fn test_capture_request_body_read_failure_is_replayed() {
        let broken = Body::from_stream(futures_util::stream::once(async {
            Err::<Bytes, std::io::Error>(std::io::Error::other("connection reset"))
        }));
        let request = Request::builder().uri("/echo").body(broken).unwrap();

        let (request, captured) = capture_request_body(request, 1024).await;
        assert!(matches!(captured, Err(CaptureError::RequestBody(_))));

        let downstream = axum::body::to_bytes(request.into_body(), usize::MAX).await;
        assert!(downstream.is_err());
    }

    #[tokio::test]
    async fn test_capture_request_body_over_limit_is_replayed_as_error() {
        let request = Request::builder()
            .uri("/echo")
            .body(Body::from(vec![b'x'; 4096]))
            .unwrap();

        let (request, captured) = capture_request_body(request, 1024).await;
        assert!(matches!(captured, Err(CaptureError::RequestBody(_))));

        let downstream = axum::body::to_bytes(request.into_body(), usize::MAX).await;
        assert!(downstream.is_err());
    }
}
