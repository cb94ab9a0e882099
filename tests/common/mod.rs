//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use lodge::app::Application;
use lodge::lifecycle::LifespanState;
use lodge::{ExitStatus, Server, ServerConfig, ServerError, Signal, SignalTrigger, Signals};

/// Config bound to an ephemeral local port with short timeouts.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.timeouts.idle_timeout = 2.0;
    config.timeouts.request_timeout = 2.0;
    config.timeouts.shutdown_grace_period = 2.0;
    config.lifespan.startup_timeout = Some(1.0);
    config.lifespan.shutdown_timeout = 1.0;
    config
}

/// A running server driven by manual signals.
pub struct TestServer {
    pub addr: SocketAddr,
    pub trigger: SignalTrigger,
    pub lifespan: watch::Receiver<LifespanState>,
    handle: JoinHandle<ExitStatus>,
}

impl TestServer {
    pub async fn start(config: ServerConfig, app: impl Application) -> Result<Self, ServerError> {
        let running = Server::new(config, app).start().await?;
        let addr = running.local_addr();
        let lifespan = running.lifespan_state();
        let (trigger, mut signals) = Signals::manual();
        let handle = tokio::spawn(async move { running.wait(&mut signals).await });
        Ok(Self {
            addr,
            trigger,
            lifespan,
            handle,
        })
    }

    pub fn signal(&self) {
        self.trigger.send(Signal::Terminate);
    }

    /// Wait for the server to finish after a signal was sent.
    pub async fn join(self) -> ExitStatus {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }

    pub async fn stop(self) -> ExitStatus {
        self.signal();
        self.join().await
    }
}

/// Write `request` on a fresh connection and read until the server closes it.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

/// A response read off a raw socket.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one `content-length` framed response, leaving the connection open.
pub async fn read_response(stream: &mut TcpStream) -> RawResponse {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 1024];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .expect("response head timed out")
            .unwrap();
        assert!(n > 0, "connection closed before response head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status = status_line.split(' ').nth(1).unwrap().parse().unwrap();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.to_string(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);
    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let mut chunk = [0u8; 1024];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed mid-body");
        body.extend_from_slice(&chunk[..n]);
    }

    RawResponse {
        status,
        headers,
        body,
    }
}

/// True if the peer closed the connection (EOF) within a second.
pub async fn is_closed(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(
        tokio::time::timeout(Duration::from_secs(1), stream.read(&mut byte)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}
