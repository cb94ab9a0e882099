//! Per-connection request loop.
//!
//! # Responsibilities
//! - Read and parse one request head at a time (no pipelining)
//! - Hand each request to the application bridge
//! - Decide whether the connection is reused, drain unread body bytes
//! - Turn parse failures and timeouts into error responses
//!
//! # Connection States
//! ```text
//! Idle ──bytes──▶ ReadingHead ──head──▶ Exchange ──keep-alive──▶ Idle
//!   │                 │                    │
//!   └─ idle timeout,  └─ EOF (discard),    └─ close, abort ──▶ Closed
//!      draining          408, 4xx/505
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::app::Application;
use crate::http::bridge::{self, Exchange, ExchangeOutcome};
use crate::http::codec::{HeadParser, ParseError};
use crate::http::request::{BodyDecoder, RequestHead};
use crate::http::response::error_response;
use crate::lifecycle::shutdown::{ShutdownListener, ShutdownPhase};
use crate::net::connection::{Connection, ConnectionGuard};
use crate::net::listener::ConnectionPermit;
use crate::observability::metrics;

/// Settings and collaborators shared by every session of a server.
pub struct SessionContext {
    pub app: Arc<dyn Application>,
    pub parser: HeadParser,
    pub idle_timeout: Duration,
    pub request_timeout: Duration,
    pub max_requests: u32,
}

/// Result of waiting for the next request head.
enum HeadRead {
    Head(RequestHead),
    /// Nothing more to serve: EOF, idle timeout, draining or I/O error.
    Closed,
    Invalid(ParseError),
    TimedOut,
}

/// Drives one connection from accept to close.
pub struct Session<S> {
    conn: Connection<S>,
    context: Arc<SessionContext>,
    shutdown: ShutdownListener,
    _guard: ConnectionGuard,
    _permit: Option<ConnectionPermit>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        conn: Connection<S>,
        context: Arc<SessionContext>,
        shutdown: ShutdownListener,
        guard: ConnectionGuard,
        permit: Option<ConnectionPermit>,
    ) -> Self {
        Self {
            conn,
            context,
            shutdown,
            _guard: guard,
            _permit: permit,
        }
    }

    pub async fn run(mut self) {
        let id = self.conn.id();
        tracing::debug!(connection_id = %id, peer_addr = ?self.conn.peer_addr(), "Connection opened");

        let mut served: u32 = 0;
        loop {
            let head = match self.read_head().await {
                HeadRead::Head(head) => head,
                HeadRead::Closed => break,
                HeadRead::Invalid(e) => {
                    tracing::info!(connection_id = %id, error = %e, status = e.status(), "Rejected request");
                    metrics::record_parse_error(e.status());
                    self.reject(e.status()).await;
                    break;
                }
                HeadRead::TimedOut => {
                    tracing::info!(connection_id = %id, "Request head timed out");
                    metrics::record_parse_error(408);
                    self.reject(408).await;
                    break;
                }
            };

            served += 1;
            let keep_alive = head.keep_alive()
                && !self.shutdown.is_draining()
                && served < self.context.max_requests;

            let started = Instant::now();
            let mut decoder = BodyDecoder::new(head.body, self.context.parser.max_body_bytes());
            let outcome = bridge::run_exchange(
                self.context.app.as_ref(),
                Exchange {
                    conn: &mut self.conn,
                    head: &head,
                    decoder: &mut decoder,
                    shutdown: &mut self.shutdown,
                    request_timeout: self.context.request_timeout,
                    keep_alive,
                },
            )
            .await;

            match outcome {
                ExchangeOutcome::Completed { status, keep_alive } => {
                    metrics::record_request(&head.method, status, started);
                    tracing::info!(
                        connection_id = %id,
                        method = %head.method,
                        path = %head.path,
                        status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Request completed"
                    );
                    if !keep_alive || !self.drain_body(&mut decoder).await {
                        break;
                    }
                }
                ExchangeOutcome::Aborted => {
                    tracing::debug!(connection_id = %id, method = %head.method, path = %head.path, "Exchange aborted");
                    break;
                }
            }
        }

        self.conn.close().await;
        tracing::debug!(connection_id = %id, requests = served, "Connection finished");
    }

    async fn read_head(&mut self) -> HeadRead {
        let mut deadline: Option<tokio::time::Instant> = None;
        loop {
            match self.context.parser.parse(&mut self.conn.buf) {
                Ok(Some(head)) => return HeadRead::Head(head),
                Ok(None) => {}
                Err(e) => return HeadRead::Invalid(e),
            }

            // Between requests only the idle timeout applies and draining closes
            // the connection; once a head has started, only a forced close does.
            let idle = self.conn.buf.is_empty() && deadline.is_none();
            let (until, interrupt) = if idle {
                (
                    tokio::time::Instant::now() + self.context.idle_timeout,
                    ShutdownPhase::Draining,
                )
            } else {
                let until = *deadline
                    .get_or_insert_with(|| tokio::time::Instant::now() + self.context.request_timeout);
                (until, ShutdownPhase::ForceClosing)
            };

            tokio::select! {
                biased;
                _ = self.shutdown.reached(interrupt) => return HeadRead::Closed,
                read = tokio::time::timeout_at(until, self.conn.fill_buf()) => match read {
                    Ok(Ok(0)) => {
                        if !self.conn.buf.is_empty() {
                            tracing::debug!(connection_id = %self.conn.id(), "Client closed mid-request, discarding");
                        }
                        return HeadRead::Closed;
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(connection_id = %self.conn.id(), error = %e, "Read failed");
                        return HeadRead::Closed;
                    }
                    Err(_) if idle => {
                        tracing::debug!(connection_id = %self.conn.id(), "Idle timeout");
                        return HeadRead::Closed;
                    }
                    Err(_) => return HeadRead::TimedOut,
                },
            }
        }
    }

    /// Write a canned error response; the connection closes afterwards.
    async fn reject(&mut self, status: u16) {
        let response = error_response(status);
        let write = self.conn.write_all(&response);
        if let Ok(Err(e)) = tokio::time::timeout(self.context.request_timeout, write).await {
            tracing::debug!(connection_id = %self.conn.id(), error = %e, "Failed to write error response");
        }
    }

    /// Consume whatever the application left unread of the request body.
    async fn drain_body(&mut self, decoder: &mut BodyDecoder) -> bool {
        while !decoder.is_done() {
            match decoder.decode(&mut self.conn.buf) {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(connection_id = %self.conn.id(), error = %e, "Unread body is malformed");
                    return false;
                }
            }
            let read = tokio::select! {
                biased;
                _ = self.shutdown.reached(ShutdownPhase::ForceClosing) => return false,
                read = tokio::time::timeout(self.context.request_timeout, self.conn.fill_buf()) => read,
            };
            if !matches!(read, Ok(Ok(n)) if n > 0) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{AppError, Inbox, Outbox, Scope};
    use crate::lifecycle::shutdown::Shutdown;
    use crate::net::connection::{ConnectionId, ConnectionTracker};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn context(app: Arc<dyn Application>, max_requests: u32) -> Arc<SessionContext> {
        Arc::new(SessionContext {
            app,
            parser: HeadParser::new(4096, 20, 1024),
            idle_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
            max_requests,
        })
    }

    fn hello() -> Arc<dyn Application> {
        Arc::new(|_scope: Scope, _inbox: Inbox, outbox: Outbox| async move {
            outbox.start(200, [("content-type", "text/plain")]).await?;
            outbox.body("hi", false).await?;
            Ok::<(), AppError>(())
        })
    }

    fn spawn_session(
        app: Arc<dyn Application>,
        max_requests: u32,
        shutdown: &Shutdown,
    ) -> (DuplexStream, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let tracker = ConnectionTracker::new();
        let conn = Connection::new(ConnectionId::new(), server, None, None);
        let session = Session::new(conn, context(app, max_requests), shutdown.subscribe(), tracker.track(), None);
        (client, tokio::spawn(session.run()))
    }

    async fn read_all(client: &mut DuplexStream) -> String {
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn last_permitted_request_closes() {
        let shutdown = Shutdown::new();
        let (mut client, task) = spawn_session(hello(), 2, &shutdown);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\nGET / HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();
        let text = read_all(&mut client).await;
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
        assert_eq!(text.matches("connection: keep-alive").count(), 1);
        assert!(text.ends_with("connection: close\r\n\r\nhi"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_head_gets_400_without_calling_app() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let app: Arc<dyn Application> = Arc::new(move |_scope: Scope, _inbox: Inbox, _outbox: Outbox| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            async { Ok::<(), AppError>(()) }
        });
        let shutdown = Shutdown::new();
        let (mut client, task) = spawn_session(app, 10, &shutdown);
        client.write_all(b"NONSENSE\r\n\r\n").await.unwrap();
        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("connection: close"));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn idle_connection_closes_silently() {
        let shutdown = Shutdown::new();
        let (mut client, task) = spawn_session(hello(), 10, &shutdown);
        assert_eq!(read_all(&mut client).await, "");
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stalled_head_gets_408() {
        let shutdown = Shutdown::new();
        let (mut client, task) = spawn_session(hello(), 10, &shutdown);
        client.write_all(b"GET / HTTP/1.1\r\nHost:").await.unwrap();
        let text = read_all(&mut client).await;
        assert!(text.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unread_body_is_drained_before_next_request() {
        let shutdown = Shutdown::new();
        let (mut client, task) = spawn_session(hello(), 2, &shutdown);
        client
            .write_all(b"POST / HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nabcdeGET / HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();
        let text = read_all(&mut client).await;
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn draining_closes_idle_session() {
        let shutdown = Shutdown::new();
        let (mut client, task) = spawn_session(hello(), 10, &shutdown);
        client.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n").await.unwrap();
        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).contains("connection: keep-alive"));

        shutdown.begin_drain();
        tokio::time::timeout(Duration::from_millis(100), task)
            .await
            .unwrap()
            .unwrap();
    }
}
