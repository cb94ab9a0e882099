//! Runs one request/response exchange against the application.
//!
//! # Data Flow
//! ```text
//! socket ──BodyDecoder──▶ pending chunk ──in_tx──▶ Inbox::recv()      (application)
//! socket ◀──write_all── ResponseEncoder ◀──Envelope── Outbox::send()  (application)
//! ```
//!
//! # Design Decisions
//! - The application future is polled inline by the session task, next to the
//!   socket reads and writes, in one `select!` loop
//! - Body bytes are read only after the application first waits for them, so
//!   `100 Continue` goes out exactly when it is needed
//! - An `Outbox::send` resolves after its bytes reached the socket

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};

use crate::app::channel::{self, Envelope};
use crate::app::{AppResult, Application, HttpScope, InboundEvent, Scope, ScopeKind, SendError};
use crate::http::codec::ParseError;
use crate::http::request::{BodyChunk, BodyDecoder, RequestHead};
use crate::http::response::{error_response, ResponseEncoder, CONTINUE};
use crate::lifecycle::shutdown::{ShutdownListener, ShutdownPhase};
use crate::net::connection::Connection;
use crate::observability::metrics;

/// Everything one exchange needs from its session.
pub struct Exchange<'a, S> {
    pub conn: &'a mut Connection<S>,
    pub head: &'a RequestHead,
    pub decoder: &'a mut BodyDecoder,
    pub shutdown: &'a mut ShutdownListener,
    pub request_timeout: Duration,
    /// Whether the session would reuse the connection after this exchange.
    pub keep_alive: bool,
}

/// How an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A complete response (possibly synthesized) was written.
    Completed { status: u16, keep_alive: bool },
    /// The connection must be closed without writing anything else.
    Aborted,
}

#[derive(Debug)]
enum BodyError {
    Parse(ParseError),
    Timeout,
    /// Peer closed or reset the connection.
    Disconnected,
}

/// Serve one request with `app`.
pub async fn run_exchange<S>(app: &dyn Application, exchange: Exchange<'_, S>) -> ExchangeOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let Exchange {
        conn,
        head,
        decoder,
        shutdown,
        request_timeout,
        keep_alive,
    } = exchange;
    let id = conn.id();

    let scope = Scope::Http(HttpScope::new(head, conn.peer_addr(), conn.local_addr()));
    let (in_tx, inbox, mut out_rx, outbox) = channel::pair(ScopeKind::Http, 1);
    let mut engaged = inbox.engaged();
    let call = AssertUnwindSafe(app.call(scope, inbox, outbox)).catch_unwind();
    tokio::pin!(call);

    let mut in_tx = Some(in_tx);
    let mut encoder = ResponseEncoder::new(head.version, head.is_head(), keep_alive);
    let mut wire = BytesMut::new();
    let mut pending: Option<BodyChunk> = None;
    let mut feeding = true;
    let mut continue_due = head.expects_continue();
    let mut peer_gone = false;

    loop {
        let may_continue = !encoder.started();
        tokio::select! {
            biased;
            _ = shutdown.reached(ShutdownPhase::ForceClosing) => {
                tracing::debug!(connection_id = %id, "Exchange cancelled by forced shutdown");
                return ExchangeOutcome::Aborted;
            }
            Some(envelope) = out_rx.recv() => {
                let Envelope { event, ack } = envelope;
                // An unread `Expect: 100-continue` body may never arrive, so it cannot be drained.
                if shutdown.is_draining() || (continue_due && !decoder.is_done()) {
                    encoder.disable_keep_alive();
                }
                if let Err(violation) = encoder.encode(event, &mut wire) {
                    tracing::error!(connection_id = %id, error = %violation, "Application broke the response protocol");
                    let _ = ack.send(Err(SendError::Protocol(violation)));
                    return fail(conn, &encoder, 500).await;
                }
                if !wire.is_empty() {
                    let written = write_or_cancel(conn, &wire, shutdown).await;
                    wire.clear();
                    if let Err(e) = written {
                        tracing::debug!(connection_id = %id, error = %e, "Response write failed");
                        let _ = ack.send(Err(SendError::Disconnected));
                        return ExchangeOutcome::Aborted;
                    }
                }
                let _ = ack.send(Ok(()));
                if encoder.is_complete() {
                    // Further receives see `http.disconnect`.
                    in_tx = None;
                    pending = None;
                    feeding = false;
                }
            }
            outcome = &mut call => {
                return finish(outcome, conn, &encoder, peer_gone).await;
            }
            permit = reserve(in_tx.clone()), if pending.is_some() => {
                match (permit, pending.take()) {
                    (Some(permit), Some(chunk)) => {
                        feeding = !chunk.last;
                        permit.send(InboundEvent::HttpRequest {
                            body: chunk.data,
                            more_body: !chunk.last,
                        });
                    }
                    // The application dropped its inbox.
                    _ => feeding = false,
                }
            }
            read = next_chunk(conn, decoder, &mut engaged, &mut continue_due, may_continue, request_timeout),
                if feeding && pending.is_none() =>
            {
                match read {
                    Ok(chunk) => pending = Some(chunk),
                    Err(BodyError::Parse(e)) => {
                        tracing::info!(connection_id = %id, error = %e, "Rejected request body");
                        metrics::record_parse_error(e.status());
                        return fail(conn, &encoder, e.status()).await;
                    }
                    Err(BodyError::Timeout) => {
                        tracing::info!(connection_id = %id, "Request body timed out");
                        return fail(conn, &encoder, 408).await;
                    }
                    Err(BodyError::Disconnected) => {
                        tracing::debug!(connection_id = %id, "Client disconnected mid-body");
                        peer_gone = true;
                        feeding = false;
                        in_tx = None;
                    }
                }
            }
        }
    }
}

/// Reserve a slot in the inbound channel; never resolves without a sender.
async fn reserve(tx: Option<mpsc::Sender<InboundEvent>>) -> Option<mpsc::OwnedPermit<InboundEvent>> {
    match tx {
        Some(tx) => tx.reserve_owned().await.ok(),
        None => std::future::pending().await,
    }
}

/// Produce the next body chunk, reading from the socket as needed.
///
/// Waits until the application first asks for the body. Cancel safe.
async fn next_chunk<S>(
    conn: &mut Connection<S>,
    decoder: &mut BodyDecoder,
    engaged: &mut watch::Receiver<bool>,
    continue_due: &mut bool,
    may_continue: bool,
    request_timeout: Duration,
) -> Result<BodyChunk, BodyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let inbox_gone = engaged.wait_for(|engaged| *engaged).await.is_err();
    if inbox_gone {
        std::future::pending::<()>().await;
    }
    loop {
        if let Some(chunk) = decoder.decode(&mut conn.buf).map_err(BodyError::Parse)? {
            return Ok(chunk);
        }
        if std::mem::take(continue_due) && may_continue {
            conn.write_all(CONTINUE).await.map_err(|_| BodyError::Disconnected)?;
        }
        match tokio::time::timeout(request_timeout, conn.fill_buf()).await {
            Err(_) => return Err(BodyError::Timeout),
            Ok(Ok(0)) | Ok(Err(_)) => return Err(BodyError::Disconnected),
            Ok(Ok(_)) => {}
        }
    }
}

async fn write_or_cancel<S>(
    conn: &mut Connection<S>,
    bytes: &[u8],
    shutdown: &mut ShutdownListener,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    tokio::select! {
        written = conn.write_all(bytes) => written,
        _ = shutdown.reached(ShutdownPhase::ForceClosing) => {
            Err(io::Error::new(io::ErrorKind::Interrupted, "forced shutdown"))
        }
    }
}

/// Map the end of the application call to an outcome.
async fn finish<S>(
    outcome: Result<AppResult, Box<dyn Any + Send>>,
    conn: &mut Connection<S>,
    encoder: &ResponseEncoder,
    peer_gone: bool,
) -> ExchangeOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let id = conn.id();
    let failure = match outcome {
        Ok(Ok(())) if encoder.is_complete() => None,
        Ok(Ok(())) => Some("returned without completing the response".to_string()),
        Ok(Err(e)) => Some(e.to_string()),
        Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
    };

    match (failure, encoder.status()) {
        (None, Some(status)) => ExchangeOutcome::Completed {
            status,
            keep_alive: encoder.keep_alive() && !peer_gone,
        },
        (Some(reason), Some(status)) if encoder.is_complete() => {
            tracing::warn!(connection_id = %id, error = %reason, "Application failed after responding");
            ExchangeOutcome::Completed {
                status,
                keep_alive: encoder.keep_alive() && !peer_gone,
            }
        }
        (reason, _) => {
            tracing::error!(
                connection_id = %id,
                error = %reason.unwrap_or_default(),
                "Application failed"
            );
            fail(conn, encoder, 500).await
        }
    }
}

/// Answer with `status` if nothing was written yet, otherwise abort.
async fn fail<S>(conn: &mut Connection<S>, encoder: &ResponseEncoder, status: u16) -> ExchangeOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    if encoder.head_written() {
        return ExchangeOutcome::Aborted;
    }
    match conn.write_all(&error_response(status)).await {
        Ok(()) => ExchangeOutcome::Completed {
            status,
            keep_alive: false,
        },
        Err(_) => ExchangeOutcome::Aborted,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
