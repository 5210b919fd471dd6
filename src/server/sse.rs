use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::protocol::{Event, EventEncoder, SSE_CONTENT_TYPE};

/// Encode a run's events as SSE frames.
///
/// `guard` lives as long as the body: when the client disconnects and the
/// body is dropped, the run is cancelled.
pub fn sse_body_stream(
    mut rx: mpsc::Receiver<Event>,
    encoder: EventEncoder,
    guard: DropGuard,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            match encoder.encode(&event) {
                Ok(chunk) => yield Ok::<Bytes, Infallible>(chunk),
                Err(e) => tracing::error!(error = %e, "dropping unencodable event"),
            }
        }
    }
}

pub fn sse_response<S>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(SSE_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
