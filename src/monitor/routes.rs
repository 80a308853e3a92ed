use std::io::Cursor;
use std::time::Duration;

use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::debug;

use crate::monitor::sse::{format_sse_event, format_sse_keepalive, write_frame, SSE_HEAD};
use crate::monitor::SharedHistory;

const KEEPALIVE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(request: Request, history: SharedHistory) {
    let path = request.url().split('?').next().unwrap_or("").to_owned();
    debug!(method = %request.method(), path = %path, "monitor request");
    match (request.method(), path.as_str()) {
        (Method::Get, "/stats") => handle_stats(request, &history),
        (Method::Get, "/events") => handle_events(request, &history),
        _ => {
            let _ = request.respond(not_found());
        }
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

fn json_response(body: String) -> Response<Cursor<Vec<u8>>> {
    let bytes = body.into_bytes();
    let len = bytes.len();
    Response::new(
        StatusCode(200),
        header("Content-Type", "application/json").into_iter().collect(),
        Cursor::new(bytes),
        Some(len),
        None,
    )
}

fn not_found() -> Response<Cursor<Vec<u8>>> {
    let body = b"404 Not Found".to_vec();
    let len = body.len();
    Response::new(
        StatusCode(404),
        header("Content-Type", "text/plain").into_iter().collect(),
        Cursor::new(body),
        Some(len),
        None,
    )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /stats` — every report so far as a JSON array.
fn handle_stats(request: Request, history: &SharedHistory) {
    let body = {
        let (lock, _) = &**history;
        match lock.lock() {
            Ok(h) => serde_json::to_string(&h.stats).unwrap_or_else(|_| "[]".to_owned()),
            Err(_) => "[]".to_owned(),
        }
    };
    let _ = request.respond(json_response(body));
}

/// `GET /events` — Server-Sent Events.
///
/// Replays the history, then streams each new report as an
/// `event: iteration` frame. While idle a `: ping` comment is written every
/// 500 ms. When the training channel closes an `event: done` frame ends the
/// stream.
fn handle_events(request: Request, history: &SharedHistory) {
    let mut writer = request.into_writer();
    if write_frame(&mut writer, SSE_HEAD).is_err() {
        return;
    }

    let (lock, cvar) = &**history;
    let mut sent = 0;
    loop {
        // Collect pending frames without holding the lock while writing.
        let (frames, done) = {
            let Ok(mut h) = lock.lock() else { return };
            if sent == h.stats.len() && !h.done {
                h = match cvar.wait_timeout(h, KEEPALIVE) {
                    Ok((h, _)) => h,
                    Err(_) => return,
                };
            }
            let frames: Vec<String> = h.stats[sent..]
                .iter()
                .filter_map(|s| serde_json::to_string(s).ok())
                .map(|json| format_sse_event("iteration", &json))
                .collect();
            sent = h.stats.len();
            (frames, h.done)
        };

        if frames.is_empty() && !done {
            if write_frame(&mut writer, format_sse_keepalive()).is_err() {
                return;
            }
            continue;
        }
        for frame in &frames {
            if write_frame(&mut writer, frame).is_err() {
                return;
            }
        }
        if done {
            let payload = format!("{{\"reports\":{}}}", sent);
            let _ = write_frame(&mut writer, &format_sse_event("done", &payload));
            return;
        }
    }
}
