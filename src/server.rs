//! Server entry points.
//!
//! # Responsibilities
//! - Run lifespan startup before anything binds
//! - Bind the listener and spawn the acceptor
//! - Hand the running server to the shutdown coordinator
//!
//! # Startup Order
//! ```text
//! lifespan.startup ──ok──▶ bind ──ok──▶ accept loop ──signal──▶ drain ──▶ lifespan.shutdown
//!        │                   │
//!        └─ error: abort     └─ error: lifespan.shutdown, abort
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::Application;
use crate::config::ServerConfig;
use crate::http::codec::HeadParser;
use crate::lifecycle::lifespan::{LifespanError, LifespanManager, LifespanState};
use crate::lifecycle::shutdown::{ExitStatus, Shutdown, ShutdownCoordinator};
use crate::lifecycle::signals::Signals;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Acceptor, Listener, ListenerError};
use crate::net::session::SessionContext;

/// Error type for server startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("lifespan startup failed: {0}")]
    Lifespan(#[from] LifespanError),
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

/// An HTTP/1.1 server bound to one application.
pub struct Server {
    config: ServerConfig,
    app: Arc<dyn Application>,
}

impl Server {
    pub fn new(config: ServerConfig, app: impl Application) -> Self {
        Self::with_shared(config, Arc::new(app))
    }

    /// Like [`Server::new`] for an application that is already shared.
    pub fn with_shared(config: ServerConfig, app: Arc<dyn Application>) -> Self {
        Self { config, app }
    }

    /// Start, then serve until SIGTERM/SIGINT.
    pub async fn run(self) -> Result<ExitStatus, ServerError> {
        let mut signals = Signals::os().map_err(ServerError::Signals)?;
        let running = self.start().await?;
        Ok(running.wait(&mut signals).await)
    }

    /// Run lifespan startup, bind, and start accepting connections.
    pub async fn start(self) -> Result<RunningServer, ServerError> {
        let Server { config, app } = self;

        let mut lifespan = LifespanManager::new(Arc::clone(&app), config.lifespan.clone());
        lifespan.startup().await?;

        let listener = match Listener::bind(&config.server).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, "Bind failed, shutting the application down");
                lifespan.shutdown().await;
                return Err(e.into());
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                lifespan.shutdown().await;
                return Err(ListenerError::Bind {
                    address: format!("{}:{}", config.server.host, config.server.port),
                    source,
                }
                .into());
            }
        };

        let context = Arc::new(SessionContext {
            app,
            parser: HeadParser::new(
                config.limits.max_head_bytes,
                config.limits.max_headers,
                config.limits.max_body_bytes,
            ),
            idle_timeout: config.timeouts.idle(),
            request_timeout: config.timeouts.request(),
            max_requests: config.limits.max_requests_per_connection,
        });

        let shutdown = Shutdown::new();
        let tracker = ConnectionTracker::new();
        let acceptor = Acceptor {
            listener,
            tracker: tracker.clone(),
            shutdown: shutdown.subscribe(),
            context,
        };
        let acceptor = tokio::spawn(acceptor.run());

        tracing::info!(address = %local_addr, "Server started");

        Ok(RunningServer {
            local_addr,
            acceptor,
            lifespan,
            coordinator: ShutdownCoordinator {
                shutdown,
                tracker,
                grace_period: config.timeouts.shutdown_grace(),
            },
        })
    }
}

/// A server that is accepting connections.
pub struct RunningServer {
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
    lifespan: LifespanManager,
    coordinator: ShutdownCoordinator,
}

impl RunningServer {
    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Observe the lifespan state.
    pub fn lifespan_state(&self) -> watch::Receiver<LifespanState> {
        self.lifespan.subscribe()
    }

    /// Number of open connections.
    pub fn active_connections(&self) -> usize {
        self.coordinator.tracker.active_count()
    }

    /// Serve until `signals` delivers a termination request, then shut down.
    pub async fn wait(self, signals: &mut Signals) -> ExitStatus {
        let RunningServer {
            acceptor,
            mut lifespan,
            coordinator,
            ..
        } = self;
        coordinator.run(signals, acceptor, &mut lifespan).await
    }
}
