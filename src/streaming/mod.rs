//! SSE framing and the chat relay.

mod relay;
mod sse;

pub use relay::{ChatRelay, RelaySettings};
pub use sse::{
    format_sse_chunk, format_sse_done, format_sse_error, sse_headers, STREAM_ERROR_MESSAGE,
};
