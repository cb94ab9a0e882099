//! Graceful and forced shutdown tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use lodge::app::{
    AppError, AppResult, Application, InboundEvent, Inbox, OutboundEvent, Outbox, Scope, ScopeKind,
};
use lodge::demo::DemoApp;
use lodge::ExitStatus;

mod common;

use common::{is_closed, read_response, test_config, TestServer};

/// Signals `entered` on each request, then waits `delay` before answering.
struct SlowApp {
    entered: Arc<Notify>,
    delay: Duration,
}

impl SlowApp {
    fn new(delay: Duration) -> (Self, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        (
            Self {
                entered: Arc::clone(&entered),
                delay,
            },
            entered,
        )
    }
}

impl Application for SlowApp {
    fn call(&self, scope: Scope, _inbox: Inbox, outbox: Outbox) -> BoxFuture<'static, AppResult> {
        let entered = Arc::clone(&self.entered);
        let delay = self.delay;
        Box::pin(async move {
            if let Scope::Lifespan(_) = scope {
                return Err(AppError::UnsupportedScope(ScopeKind::Lifespan));
            }
            entered.notify_one();
            tokio::time::sleep(delay).await;
            outbox.start(200, [("content-type", "text/plain")]).await?;
            outbox.body("done", false).await?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn signal_mid_exchange_finishes_the_response() {
    let (app, entered) = SlowApp::new(Duration::from_millis(300));
    let server = TestServer::start(test_config(), app).await.unwrap();
    let addr = server.addr;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /slow HTTP/1.1\r\nHost: a\r\n\r\n")
        .await
        .unwrap();
    entered.notified().await;
    server.signal();

    let response = read_response(&mut stream).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, b"done");
    // Draining turns the would-be keep-alive into a close.
    assert_eq!(response.header("connection"), Some("close"));
    assert!(is_closed(&mut stream).await);

    assert_eq!(server.join().await, ExitStatus::Clean);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn idle_connections_are_closed_on_drain() {
    let server = TestServer::start(test_config(), DemoApp).await.unwrap();
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .await
        .unwrap();
    assert_eq!(read_response(&mut stream).await.status, 200);

    server.signal();
    assert!(is_closed(&mut stream).await);
    assert_eq!(server.join().await, ExitStatus::Clean);
}

#[tokio::test]
async fn grace_expiry_closes_stuck_exchanges() {
    let mut config = test_config();
    config.timeouts.shutdown_grace_period = 0.2;
    let (app, entered) = SlowApp::new(Duration::from_secs(60));
    let server = TestServer::start(config, app).await.unwrap();

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .await
        .unwrap();
    entered.notified().await;
    server.signal();

    assert!(is_closed(&mut stream).await);
    assert_eq!(server.join().await, ExitStatus::Clean);
}

#[tokio::test]
async fn second_signal_forces_exit() {
    let (app, entered) = SlowApp::new(Duration::from_secs(60));
    let server = TestServer::start(test_config(), app).await.unwrap();

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")
        .await
        .unwrap();
    entered.notified().await;
    server.signal();
    tokio::time::sleep(Duration::from_millis(50)).await;
    server.signal();

    assert_eq!(server.join().await, ExitStatus::Forced);
    assert!(is_closed(&mut stream).await);
}

#[tokio::test]
async fn second_signal_cuts_lifespan_shutdown_short() {
    let stuck = Arc::new(Notify::new());
    let reached = Arc::clone(&stuck);
    let app = move |scope: Scope, mut inbox: Inbox, outbox: Outbox| {
        let reached = Arc::clone(&reached);
        async move {
            if let Scope::Http(_) = scope {
                return Err::<(), _>(AppError::UnsupportedScope(ScopeKind::Http));
            }
            loop {
                match inbox.recv().await {
                    InboundEvent::LifespanStartup => {
                        outbox.send(OutboundEvent::LifespanStartupComplete).await?;
                    }
                    InboundEvent::LifespanShutdown => {
                        reached.notify_one();
                        std::future::pending::<()>().await;
                    }
                    _ => {}
                }
            }
        }
    };
    let mut config = test_config();
    config.lifespan.shutdown_timeout = 5.0;
    let server = TestServer::start(config, app).await.unwrap();

    server.signal();
    stuck.notified().await;
    let second = Instant::now();
    server.signal();

    assert_eq!(server.join().await, ExitStatus::Forced);
    assert!(second.elapsed() < Duration::from_secs(2));
}
