//! Live training monitor.
//!
//! A small `tiny_http` server that records every [`IterationStats`] the
//! training loop reports and serves them as JSON (`GET /stats`) and as a
//! Server-Sent Events stream (`GET /events`).

pub mod sse;
pub mod routes;

use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tiny_http::Server;
use tracing::info;

use crate::error::{NeutorchError, Result};
use crate::train::IterationStats;

/// Reports received so far and whether the training channel has closed.
#[derive(Debug, Default)]
pub struct History {
    pub stats: Vec<IterationStats>,
    pub done: bool,
}

pub type SharedHistory = Arc<(Mutex<History>, Condvar)>;

pub struct Monitor {
    server: Arc<Server>,
    history: SharedHistory,
    collector: Option<JoinHandle<()>>,
    acceptor: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Binds `addr` and starts serving reports received on `rx`.
    pub fn spawn(addr: &str, rx: mpsc::Receiver<IterationStats>) -> Result<Monitor> {
        let server = Server::http(addr)
            .map_err(|e| NeutorchError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
        let server = Arc::new(server);
        let history: SharedHistory = Arc::new((Mutex::new(History::default()), Condvar::new()));

        let collector = {
            let history = Arc::clone(&history);
            thread::spawn(move || {
                let (lock, cvar) = &*history;
                for stats in rx {
                    if let Ok(mut h) = lock.lock() {
                        h.stats.push(stats);
                    }
                    cvar.notify_all();
                }
                if let Ok(mut h) = lock.lock() {
                    h.done = true;
                }
                cvar.notify_all();
            })
        };

        // One thread per request: an SSE stream blocks for the whole run.
        let acceptor = {
            let server = Arc::clone(&server);
            let history = Arc::clone(&history);
            thread::spawn(move || {
                for request in server.incoming_requests() {
                    let history = Arc::clone(&history);
                    thread::spawn(move || routes::dispatch(request, history));
                }
            })
        };

        let monitor = Monitor {
            server,
            history,
            collector: Some(collector),
            acceptor: Some(acceptor),
        };
        if let Some(addr) = monitor.local_addr() {
            info!(%addr, "monitor listening");
        }
        Ok(monitor)
    }

    /// The bound address; useful when spawned on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn history(&self) -> Vec<IterationStats> {
        let (lock, _) = &*self.history;
        lock.lock().map(|h| h.stats.clone()).unwrap_or_default()
    }

    /// Waits for the training channel to close, then stops accepting requests.
    pub fn shutdown(mut self) {
        if let Some(c) = self.collector.take() {
            let _ = c.join();
        }
        self.server.unblock();
        if let Some(a) = self.acceptor.take() {
            let _ = a.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::Duration;

    fn stats(iteration: usize) -> IterationStats {
        IterationStats {
            iteration,
            total_iterations: 20,
            train_loss: 0.5,
            val_loss: None,
            learning_rate: 1e-3,
            elapsed_ms: 3,
        }
    }

    /// Sends a GET and reads until `needle` shows up or the server closes.
    fn get_until(addr: SocketAddr, path: &str, needle: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path).unwrap();
        let mut out = String::new();
        let mut buf = [0u8; 1024];
        while !out.contains(needle) {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
        out
    }

    #[test]
    fn test_stats_events_and_404() {
        let (tx, rx) = mpsc::channel();
        let monitor = Monitor::spawn("127.0.0.1:0", rx).unwrap();
        let addr = monitor.local_addr().unwrap();

        tx.send(stats(10)).unwrap();
        tx.send(stats(20)).unwrap();
        drop(tx);
        while monitor.history().len() < 2 {
            thread::sleep(Duration::from_millis(10));
        }

        let body = get_until(addr, "/stats", "\"iteration\":20");
        assert!(body.starts_with("HTTP/1.1 200"));
        assert!(body.contains("\"iteration\":10"));

        let events = get_until(addr, "/events", "event: done");
        assert!(events.starts_with("HTTP/1.1 200"));
        assert!(events.contains("text/event-stream"));
        assert_eq!(events.matches("event: iteration").count(), 2);
        assert!(events.contains("event: done"));

        let missing = get_until(addr, "/nope", "404");
        assert!(missing.starts_with("HTTP/1.1 404"));

        monitor.shutdown();
    }

    #[test]
    fn test_idle_stream_sends_keepalive() {
        let (tx, rx) = mpsc::channel();
        let monitor = Monitor::spawn("127.0.0.1:0", rx).unwrap();
        let addr = monitor.local_addr().unwrap();
        tx.send(stats(5)).unwrap();
        while monitor.history().is_empty() {
            thread::sleep(Duration::from_millis(10));
        }

        // The sender stays open, so the stream idles after the replay.
        let events = get_until(addr, "/events", ": ping");
        assert!(events.contains("event: iteration"));
        assert!(events.contains(": ping"));
        assert!(!events.contains("event: done"));

        drop(tx);
        monitor.shutdown();
    }
}

