//! SSE (Server-Sent Events) formatting.
//!
//! Every frame is `data: <payload>\n\n`; no `event:` or `id:` fields.

use axum::http::{header, HeaderName};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;

/// Error text sent to clients when a stream fails.
pub const STREAM_ERROR_MESSAGE: &str = "An error occurred";

/// Response headers that commit a response to SSE mode.
pub fn sse_headers() -> [(HeaderName, &'static str); 4] {
    [
        (header::CONTENT_TYPE, "text/event-stream"),
        (header::CACHE_CONTROL, "no-cache"),
        (header::CONNECTION, "keep-alive"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ]
}

#[derive(Serialize)]
struct ContentEvent<'a> {
    content: &'a str,
}

/// Format a content fragment as an SSE event.
pub fn format_sse_chunk(content: &str) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_string(&ContentEvent { content })?;
    Ok(format!("data: {}\n\n", data).into())
}

/// Format the done marker as an SSE event.
pub fn format_sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Format an error as an SSE event.
pub fn format_sse_error(error: &str) -> Bytes {
    let data = json!({ "error": error });
    format!("data: {}\n\n", data).into()
}
