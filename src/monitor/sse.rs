use std::io::{self, Write};

// ---------------------------------------------------------------------------
// SSE framing helpers
// ---------------------------------------------------------------------------

/// Raw response head for an event stream. tiny_http's `into_writer` hands
/// over the socket, so the status line and headers are written by hand.
pub const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
                            Content-Type: text/event-stream\r\n\
                            Cache-Control: no-cache\r\n\
                            Connection: keep-alive\r\n\
                            X-Accel-Buffering: no\r\n\
                            \r\n";

/// Formats a named SSE event with a JSON data payload.
///
/// Output format:
/// ```text
/// event: <name>\n
/// data: <json>\n
/// \n
/// ```
pub fn format_sse_event(event_name: &str, json_data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", event_name, json_data)
}

/// SSE comments start with `:` and are ignored by EventSource clients,
/// but keep idle connections open.
pub fn format_sse_keepalive() -> &'static str {
    ": ping\n\n"
}

/// Writes all bytes and flushes, so each frame reaches the client immediately.
pub fn write_frame<W: Write + ?Sized>(w: &mut W, frame: &str) -> io::Result<()> {
    w.write_all(frame.as_bytes())?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_framing() {
        assert_eq!(format_sse_event("iteration", "{\"a\":1}"), "event: iteration\ndata: {\"a\":1}\n\n");
        assert!(SSE_HEAD.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_write_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, format_sse_keepalive()).unwrap();
        assert_eq!(buf, b": ping\n\n");
    }
}
