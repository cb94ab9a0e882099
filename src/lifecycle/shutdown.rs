//! Shutdown coordination.
//!
//! # Responsibilities
//! - Broadcast the shutdown phase to the acceptor and every session
//! - Sequence a graceful stop: stop accepting, drain, close, lifespan shutdown
//! - Escalate to a forced stop on grace expiry or a second signal

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::lifecycle::lifespan::LifespanManager;
use crate::lifecycle::signals::Signals;
use crate::net::connection::ConnectionTracker;

/// How long force-closed sessions get to unwind before the process moves on.
const FORCE_CLOSE_WAIT: Duration = Duration::from_secs(1);

/// Shutdown progress, advancing forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    /// Stop accepting; finish in-flight exchanges, close idle connections.
    Draining,
    /// Abandon in-flight exchanges and close every connection now.
    ForceClosing,
}

/// Process exit classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    /// A second signal cut the drain short.
    Forced,
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        match status {
            ExitStatus::Clean => std::process::ExitCode::SUCCESS,
            ExitStatus::Forced => std::process::ExitCode::from(1),
        }
    }
}

/// Owner side of the shutdown phase broadcast.
///
/// All long-running tasks hold a [`ShutdownListener`] obtained from [`Shutdown::subscribe`].
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<ShutdownPhase>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ShutdownPhase::Running);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }

    pub fn begin_drain(&self) {
        self.advance(ShutdownPhase::Draining);
    }

    pub fn force_close(&self) {
        self.advance(ShutdownPhase::ForceClosing);
    }

    pub fn phase(&self) -> ShutdownPhase {
        *self.tx.borrow()
    }

    /// Number of live listeners (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn advance(&self, to: ShutdownPhase) {
        self.tx.send_if_modified(|phase| {
            if *phase < to {
                *phase = to;
                true
            } else {
                false
            }
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side of the shutdown phase broadcast.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<ShutdownPhase>,
}

impl ShutdownListener {
    /// Resolve once the phase is at least `phase`.
    ///
    /// Never resolves if the [`Shutdown`] owner is dropped first.
    pub async fn reached(&mut self, phase: ShutdownPhase) {
        let owner_gone = self.rx.wait_for(|current| *current >= phase).await.is_err();
        if owner_gone {
            std::future::pending::<()>().await;
        }
    }

    pub fn is_draining(&self) -> bool {
        *self.rx.borrow() >= ShutdownPhase::Draining
    }
}

/// Drives one graceful (or forced) stop of a running server.
pub(crate) struct ShutdownCoordinator {
    pub shutdown: Shutdown,
    pub tracker: ConnectionTracker,
    pub grace_period: Duration,
}

impl ShutdownCoordinator {
    pub async fn run(
        self,
        signals: &mut Signals,
        acceptor: JoinHandle<()>,
        lifespan: &mut LifespanManager,
    ) -> ExitStatus {
        match signals.recv().await {
            Some(signal) => tracing::info!(?signal, "Shutdown signal received, draining connections"),
            None => tracing::info!("Signal source closed, draining connections"),
        }

        self.shutdown.begin_drain();
        lifespan.begin_shutdown();
        if let Err(e) = acceptor.await {
            tracing::error!(error = %e, "Acceptor task failed");
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            grace_period_secs = self.grace_period.as_secs_f64(),
            "Listener closed, waiting for sessions"
        );

        let forced = tokio::select! {
            _ = self.tracker.wait_idle() => {
                tracing::info!("All connections drained");
                false
            }
            _ = tokio::time::sleep(self.grace_period) => {
                tracing::warn!(
                    remaining = self.tracker.active_count(),
                    "Grace period expired, closing remaining connections"
                );
                interrupted(signals, self.force_close()).await
            }
            Some(signal) = signals.recv() => {
                tracing::warn!(?signal, "Second signal received, forcing shutdown");
                self.force_close().await;
                true
            }
        };

        if forced || interrupted(signals, lifespan.shutdown()).await {
            self.shutdown.force_close();
            lifespan.force_stop();
            return ExitStatus::Forced;
        }
        tracing::info!("Shutdown complete");
        ExitStatus::Clean
    }

    async fn force_close(&self) {
        self.shutdown.force_close();
        if tokio::time::timeout(FORCE_CLOSE_WAIT, self.tracker.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Connections still open after forced close"
            );
        }
    }
}

/// Run `step` to completion unless another signal arrives first.
///
/// Returns `true` when cut short.
async fn interrupted(signals: &mut Signals, step: impl Future<Output = ()>) -> bool {
    tokio::select! {
        _ = step => false,
        Some(signal) = signals.recv() => {
            tracing::warn!(?signal, "Second signal received, forcing shutdown");
            true
        }
    }
}
