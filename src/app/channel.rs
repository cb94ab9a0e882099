//! The receive and send halves handed to an application call.
//!
//! Both halves are plain tokio mpsc channels. Every outbound event travels with a
//! oneshot acknowledgement, so [`Outbox::send`] resolves only once the server has
//! accepted (and, for HTTP, written) the event.

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot, watch};

use super::{InboundEvent, OutboundEvent, ScopeKind, SendError};

/// An outbound event paired with the channel its verdict is reported on.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub event: OutboundEvent,
    pub ack: oneshot::Sender<Result<(), SendError>>,
}

impl Envelope {
    pub fn reply(self, result: Result<(), SendError>) {
        // The application may have given up waiting; nothing to do then.
        let _ = self.ack.send(result);
    }
}

/// Receive half: yields inbound events for one scope.
#[derive(Debug)]
pub struct Inbox {
    kind: ScopeKind,
    rx: mpsc::Receiver<InboundEvent>,
    engaged: watch::Sender<bool>,
}

impl Inbox {
    pub(crate) fn new(kind: ScopeKind, rx: mpsc::Receiver<InboundEvent>) -> Self {
        Self {
            kind,
            rx,
            engaged: watch::channel(false).0,
        }
    }

    /// Flips to `true` the first time the application waits on this inbox.
    pub(crate) fn engaged(&self) -> watch::Receiver<bool> {
        self.engaged.subscribe()
    }

    /// Wait for the next event.
    ///
    /// Once the server side is gone this keeps returning the terminal event of the
    /// scope: `http.disconnect` for HTTP, `lifespan.shutdown` for lifespan.
    pub async fn recv(&mut self) -> InboundEvent {
        self.engaged.send_if_modified(|engaged| !std::mem::replace(engaged, true));
        match self.rx.recv().await {
            Some(event) => event,
            None => match self.kind {
                ScopeKind::Http => InboundEvent::HttpDisconnect,
                ScopeKind::Lifespan => InboundEvent::LifespanShutdown,
            },
        }
    }

    /// Collect the whole request body. Returns `None` if the client disconnected first.
    pub async fn read_body(&mut self) -> Option<Bytes> {
        let mut body = BytesMut::new();
        loop {
            match self.recv().await {
                InboundEvent::HttpRequest { body: chunk, more_body } => {
                    body.extend_from_slice(&chunk);
                    if !more_body {
                        return Some(body.freeze());
                    }
                }
                _ => return None,
            }
        }
    }
}

/// Send half: accepts outbound events for one scope.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Envelope>,
}

impl Outbox {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Hand one event to the server and wait for its verdict.
    pub async fn send(&self, event: OutboundEvent) -> Result<(), SendError> {
        let (ack, verdict) = oneshot::channel();
        self.tx
            .send(Envelope { event, ack })
            .await
            .map_err(|_| SendError::Disconnected)?;
        verdict.await.map_err(|_| SendError::Disconnected)?
    }

    /// Send `http.response.start`.
    pub async fn start<I, K, V>(&self, status: u16, headers: I) -> Result<(), SendError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.send(OutboundEvent::start(status, headers)).await
    }

    /// Send `http.response.body`.
    pub async fn body(&self, body: impl Into<Bytes>, more_body: bool) -> Result<(), SendError> {
        self.send(OutboundEvent::body(body, more_body)).await
    }
}

/// Create a connected inbox/outbox pair plus the server-side ends.
pub(crate) fn pair(
    kind: ScopeKind,
    inbound_capacity: usize,
) -> (
    mpsc::Sender<InboundEvent>,
    Inbox,
    mpsc::Receiver<Envelope>,
    Outbox,
) {
    let (in_tx, in_rx) = mpsc::channel(inbound_capacity);
    let (out_tx, out_rx) = mpsc::channel(1);
    (in_tx, Inbox::new(kind, in_rx), out_rx, Outbox::new(out_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_inbox_yields_terminal_event() {
        let (in_tx, mut inbox, _out_rx, _outbox) = pair(ScopeKind::Http, 1);
        drop(in_tx);
        assert_eq!(inbox.recv().await, InboundEvent::HttpDisconnect);
        assert_eq!(inbox.recv().await, InboundEvent::HttpDisconnect);

        let (in_tx, mut inbox, _out_rx, _outbox) = pair(ScopeKind::Lifespan, 1);
        drop(in_tx);
        assert_eq!(inbox.recv().await, InboundEvent::LifespanShutdown);
    }

    #[tokio::test]
    async fn read_body_concatenates_chunks() {
        let (in_tx, mut inbox, _out_rx, _outbox) = pair(ScopeKind::Http, 4);
        let engaged = inbox.engaged();
        in_tx
            .send(InboundEvent::HttpRequest { body: Bytes::from_static(b"Hello, "), more_body: true })
            .await
            .unwrap();
        in_tx
            .send(InboundEvent::HttpRequest { body: Bytes::from_static(b"World"), more_body: false })
            .await
            .unwrap();
        assert!(!*engaged.borrow());
        assert_eq!(inbox.read_body().await.unwrap(), Bytes::from_static(b"Hello, World"));
        assert!(*engaged.borrow());
    }

    #[tokio::test]
    async fn send_waits_for_verdict() {
        let (_in_tx, _inbox, mut out_rx, outbox) = pair(ScopeKind::Http, 1);
        let server = tokio::spawn(async move {
            let envelope = out_rx.recv().await.unwrap();
            assert_eq!(envelope.event.kind(), "http.response.body");
            envelope.reply(Err(SendError::Protocol(
                crate::app::ProtocolViolation::BodyBeforeStart,
            )));
        });
        let result = outbox.body("x", false).await;
        assert!(matches!(result, Err(SendError::Protocol(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn send_on_dropped_server_is_disconnected() {
        let (_in_tx, _inbox, out_rx, outbox) = pair(ScopeKind::Http, 1);
        drop(out_rx);
        assert_eq!(outbox.start(200, Vec::<(String, String)>::new()).await, Err(SendError::Disconnected));
    }
}
