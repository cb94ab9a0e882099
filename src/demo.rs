//! Built-in demo application served by the `lodge` binary.
//!
//! | Path     | Response                                   |
//! |----------|--------------------------------------------|
//! | `/`      | `Hello, World!` as `text/plain`            |
//! | `/scope` | the request scope as JSON                  |
//! | `/echo`  | the request body, with its content type    |
//! | other    | 404                                        |

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::app::{
    AppError, AppResult, Application, HttpScope, InboundEvent, Inbox, OutboundEvent, Outbox, Scope,
};

/// Demo application; also acknowledges the lifespan protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoApp;

impl Application for DemoApp {
    fn call(&self, scope: Scope, inbox: Inbox, outbox: Outbox) -> BoxFuture<'static, AppResult> {
        match scope {
            Scope::Http(scope) => serve(scope, inbox, outbox).boxed(),
            Scope::Lifespan(_) => lifespan(inbox, outbox).boxed(),
        }
    }
}

async fn lifespan(mut inbox: Inbox, outbox: Outbox) -> AppResult {
    loop {
        match inbox.recv().await {
            InboundEvent::LifespanStartup => {
                tracing::debug!("Demo application ready");
                outbox.send(OutboundEvent::LifespanStartupComplete).await?;
            }
            InboundEvent::LifespanShutdown => {
                outbox.send(OutboundEvent::LifespanShutdownComplete).await?;
                return Ok(());
            }
            _ => {}
        }
    }
}

async fn serve(scope: HttpScope, mut inbox: Inbox, outbox: Outbox) -> AppResult {
    let path = scope.path.clone();
    match path.as_str() {
        "/" => {
            outbox.start(200, [("content-type", "text/plain")]).await?;
            outbox.body("Hello, World!", false).await?;
        }
        "/scope" => {
            let json = serde_json::to_vec_pretty(&Scope::Http(scope))
                .map_err(|e| AppError::failed(format!("scope serialization: {e}")))?;
            outbox.start(200, [("content-type", "application/json")]).await?;
            outbox.body(json, false).await?;
        }
        "/echo" => {
            let content_type = scope
                .header("content-type")
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = inbox.read_body().await.unwrap_or_default();
            outbox.start(200, [("content-type", content_type)]).await?;
            outbox.body(body, false).await?;
        }
        _ => {
            outbox.start(404, [("content-type", "text/plain")]).await?;
            outbox.body("Not Found", false).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::channel::{self, Envelope};
    use crate::app::ScopeKind;
    use crate::http::codec::HeadParser;
    use bytes::{Bytes, BytesMut};
    use tokio::sync::mpsc;

    /// Collect outbound events, acknowledging each.
    async fn collect(mut out_rx: mpsc::Receiver<Envelope>) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Some(envelope) = out_rx.recv().await {
            events.push(envelope.event.clone());
            envelope.reply(Ok(()));
        }
        events
    }

    fn http_scope(raw: &[u8]) -> Scope {
        let mut buf = BytesMut::from(raw);
        let head = HeadParser::default().parse(&mut buf).unwrap().unwrap();
        Scope::Http(HttpScope::new(&head, None, None))
    }

    #[tokio::test]
    async fn hello_on_root() {
        let (_in_tx, inbox, out_rx, outbox) = channel::pair(ScopeKind::Http, 1);
        let scope = http_scope(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
        let (result, events) = tokio::join!(DemoApp.call(scope, inbox, outbox), collect(out_rx));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                OutboundEvent::start(200, [("content-type", "text/plain")]),
                OutboundEvent::body("Hello, World!", false),
            ]
        );
    }

    #[tokio::test]
    async fn echo_returns_body() {
        let (in_tx, inbox, out_rx, outbox) = channel::pair(ScopeKind::Http, 2);
        in_tx
            .send(InboundEvent::HttpRequest { body: Bytes::from_static(b"ab"), more_body: true })
            .await
            .unwrap();
        in_tx
            .send(InboundEvent::HttpRequest { body: Bytes::from_static(b"c"), more_body: false })
            .await
            .unwrap();
        let scope = http_scope(b"POST /echo HTTP/1.1\r\nHost: a\r\nContent-Type: text/csv\r\nContent-Length: 3\r\n\r\n");
        let (result, events) = tokio::join!(DemoApp.call(scope, inbox, outbox), collect(out_rx));
        result.unwrap();
        assert_eq!(events[0], OutboundEvent::start(200, [("content-type", "text/csv")]));
        assert_eq!(events[1], OutboundEvent::body("abc", false));
    }

    #[tokio::test]
    async fn lifespan_acknowledges_both_phases() {
        let (in_tx, inbox, out_rx, outbox) = channel::pair(ScopeKind::Lifespan, 2);
        in_tx.send(InboundEvent::LifespanStartup).await.unwrap();
        in_tx.send(InboundEvent::LifespanShutdown).await.unwrap();
        let scope = Scope::Lifespan(Default::default());
        let (result, events) = tokio::join!(DemoApp.call(scope, inbox, outbox), collect(out_rx));
        result.unwrap();
        assert_eq!(
            events,
            vec![
                OutboundEvent::LifespanStartupComplete,
                OutboundEvent::LifespanShutdownComplete,
            ]
        );
    }
}
