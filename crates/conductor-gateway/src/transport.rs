//! Binds an encoded frame stream to a streaming HTTP response.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES, HeaderName, PRAGMA};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures::{Stream, StreamExt};

use conductor_stream::StreamProtocol;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const DATA_STREAM_HEADER: HeaderName = HeaderName::from_static("x-vercel-ai-data-stream");
const UI_MESSAGE_STREAM_HEADER: HeaderName =
    HeaderName::from_static("x-vercel-ai-ui-message-stream");

/// Stream `frames` as the response body, one body chunk per frame.
///
/// Frames are never batched, so each is flushed as soon as the encoder
/// yields it. Dropping the body (client disconnect) drops `frames`.
pub fn stream_response<S>(protocol: StreamProtocol, frames: S) -> Response
where
    S: Stream<Item = String> + Send + 'static,
{
    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(protocol.media_type()));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(X_ACCEL_BUFFERING, HeaderValue::from_static("no"));
    match protocol {
        StreamProtocol::DataStream => {
            headers.insert(DATA_STREAM_HEADER, HeaderValue::from_static("v1"));
        }
        StreamProtocol::UiMessage => {
            headers.insert(UI_MESSAGE_STREAM_HEADER, HeaderValue::from_static("v1"));
        }
    }
    response
}
