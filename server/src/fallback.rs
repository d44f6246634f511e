//! Terminal handler for unclassifiable traffic.
//!
//! Registered last so it claims anything the protocol handlers declined.
//! It waits until enough bytes are buffered to rule out a slow-arriving
//! method token, then answers with a fixed 400 and closes.

use reactor::conn::{Connection, ParseResult, TaskType};
use reactor::dispatch::ProtocolHandler;

use crate::http::emit_response;
use crate::metrics::FRAMING_ERRORS;

/// Bytes that must be buffered before garbage is condemned; the longest
/// recognized method prefix ("OPTIONS ") is eight bytes.
const MIN_CLASSIFIABLE: usize = 8;

pub struct FallbackHandler;

impl ProtocolHandler for FallbackHandler {
    fn name(&self) -> TaskType {
        TaskType::Unknown
    }

    fn can_claim(&self, conn: &Connection) -> bool {
        conn.buffered_len() >= MIN_CLASSIFIABLE
    }

    fn is_frame_complete(&self, conn: &mut Connection) -> bool {
        conn.parse_result = ParseResult::Complete;
        conn.bytes_pending = 0;
        true
    }

    fn handle(&self, conn: &mut Connection) {
        FRAMING_ERRORS.increment();
        tracing::debug!("rejecting unclassifiable connection with 400");
        emit_response(
            conn,
            400,
            "Bad Request",
            "text/html; charset=utf-8",
            b"<html><body><h1>400 Bad Request</h1></body></html>",
        );
        conn.close_after_write = true;
    }
}
