//! Application startup and shutdown protocol.
//!
//! # Responsibilities
//! - Own the single [`LifespanState`] of a server run
//! - Deliver `lifespan.startup` / `lifespan.shutdown` exactly once each
//! - Wait (bounded) for the application's acknowledgements
//!
//! # Design Decisions
//! - The application runs as its own task for the whole run; the manager talks
//!   to it through the same inbox/outbox contract as HTTP exchanges
//! - Whether silence or an early error means "unsupported" or "fatal" is
//!   decided by [`LifespanMode`]

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::app::channel::{self, Envelope};
use crate::app::{
    AppError, AppResult, Application, InboundEvent, LifespanScope, OutboundEvent,
    ProtocolViolation, Scope, ScopeKind, SendError,
};
use crate::config::{LifespanConfig, LifespanMode};

/// Startup/shutdown progress of one server run. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifespanState {
    NotStarted,
    Starting,
    Started,
    ShuttingDown,
    Stopped,
}

/// Why startup did not complete.
#[derive(Debug, Error)]
pub enum LifespanError {
    #[error("application reported startup failure: {0}")]
    StartupFailed(String),
    #[error("application failed during startup: {0}")]
    AppFailed(String),
    #[error("application does not support the lifespan protocol")]
    Unsupported,
    #[error("startup was not acknowledged within {0:?}")]
    StartupTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Startup,
    Shutdown,
}

/// What ended a wait for an acknowledgement.
enum Ack {
    Complete,
    Failed(String),
    Exited(Result<AppResult, JoinError>),
    TimedOut,
}

/// The live application task and the server ends of its channels.
struct LifespanSession {
    in_tx: mpsc::Sender<InboundEvent>,
    out_rx: mpsc::Receiver<Envelope>,
    engaged: watch::Receiver<bool>,
    task: JoinHandle<AppResult>,
}

impl LifespanSession {
    async fn wait_for(&mut self, phase: Phase, deadline: Option<Duration>) -> Ack {
        let expired = async {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;
                Some(envelope) = self.out_rx.recv() => {
                    match acknowledgement(phase, &envelope.event) {
                        Ok(ack) => {
                            envelope.reply(Ok(()));
                            return ack;
                        }
                        Err(violation) => {
                            tracing::warn!(error = %violation, "Rejected lifespan event");
                            envelope.reply(Err(SendError::Protocol(violation)));
                        }
                    }
                }
                result = &mut self.task => return Ack::Exited(result),
                _ = &mut expired => return Ack::TimedOut,
            }
        }
    }
}

impl Drop for LifespanSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Map an outbound event to the acknowledgement it represents in `phase`.
fn acknowledgement(phase: Phase, event: &OutboundEvent) -> Result<Ack, ProtocolViolation> {
    match (phase, event) {
        (Phase::Startup, OutboundEvent::LifespanStartupComplete) => Ok(Ack::Complete),
        (Phase::Startup, OutboundEvent::LifespanStartupFailed { message }) => {
            Ok(Ack::Failed(message.clone()))
        }
        (Phase::Shutdown, OutboundEvent::LifespanShutdownComplete) => Ok(Ack::Complete),
        (Phase::Shutdown, OutboundEvent::LifespanShutdownFailed { message }) => {
            Ok(Ack::Failed(message.clone()))
        }
        (_, other) => Err(ProtocolViolation::UnexpectedEvent {
            event: other.kind(),
            scope: ScopeKind::Lifespan,
        }),
    }
}

/// Runs the lifespan protocol against the application.
pub struct LifespanManager {
    app: Arc<dyn Application>,
    config: LifespanConfig,
    state: watch::Sender<LifespanState>,
    session: Option<LifespanSession>,
}

impl LifespanManager {
    pub fn new(app: Arc<dyn Application>, config: LifespanConfig) -> Self {
        Self {
            app,
            config,
            state: watch::channel(LifespanState::NotStarted).0,
            session: None,
        }
    }

    pub fn state(&self) -> LifespanState {
        *self.state.borrow()
    }

    /// Read-only view of the state as it changes.
    pub fn subscribe(&self) -> watch::Receiver<LifespanState> {
        self.state.subscribe()
    }

    fn advance(&self, to: LifespanState) {
        self.state.send_if_modified(|state| {
            if *state < to {
                tracing::debug!(from = ?*state, to = ?to, "Lifespan state changed");
                *state = to;
                true
            } else {
                false
            }
        });
    }

    /// Deliver `lifespan.startup` and wait for the verdict.
    ///
    /// On error the state is [`LifespanState::Stopped`] and the server must not
    /// accept connections.
    pub async fn startup(&mut self) -> Result<(), LifespanError> {
        if self.state() != LifespanState::NotStarted {
            return Ok(());
        }
        self.advance(LifespanState::Starting);
        if self.config.mode == LifespanMode::Off {
            self.advance(LifespanState::Started);
            return Ok(());
        }

        let (in_tx, inbox, out_rx, outbox) = channel::pair(ScopeKind::Lifespan, 2);
        let engaged = inbox.engaged();
        // Capacity 2 holds both lifecycle events without waiting on the application.
        if in_tx.try_send(InboundEvent::LifespanStartup).is_err() {
            self.advance(LifespanState::Stopped);
            return Err(LifespanError::AppFailed("lifespan channel closed".into()));
        }
        let task = tokio::spawn(self.app.call(
            Scope::Lifespan(LifespanScope::default()),
            inbox,
            outbox,
        ));
        let mut session = LifespanSession {
            in_tx,
            out_rx,
            engaged,
            task,
        };

        match session.wait_for(Phase::Startup, self.config.startup()).await {
            Ack::Complete => {
                tracing::info!("Application startup complete");
                self.session = Some(session);
                self.advance(LifespanState::Started);
                Ok(())
            }
            Ack::Failed(message) => self.fail(LifespanError::StartupFailed(message)),
            Ack::TimedOut => {
                let limit = self.config.startup().unwrap_or_default();
                tracing::warn!(timeout = ?limit, "No lifespan startup acknowledgement");
                self.unsupported(LifespanError::StartupTimeout(limit))
            }
            Ack::Exited(Ok(Ok(()))) => {
                tracing::warn!("Application returned without acknowledging lifespan startup");
                self.advance(LifespanState::Started);
                Ok(())
            }
            Ack::Exited(Ok(Err(AppError::UnsupportedScope(_)))) => {
                self.unsupported(LifespanError::Unsupported)
            }
            Ack::Exited(result) => {
                let message = exit_message(result);
                if *session.engaged.borrow() {
                    self.fail(LifespanError::AppFailed(message))
                } else {
                    tracing::debug!(error = %message, "Lifespan call failed before receiving");
                    self.unsupported(LifespanError::Unsupported)
                }
            }
        }
    }

    /// The application does not take part in the lifespan protocol.
    fn unsupported(&self, strict_error: LifespanError) -> Result<(), LifespanError> {
        match self.config.mode {
            LifespanMode::On => self.fail(strict_error),
            LifespanMode::Auto | LifespanMode::Off => {
                tracing::info!("Lifespan protocol unsupported by application, continuing without it");
                self.advance(LifespanState::Started);
                Ok(())
            }
        }
    }

    fn fail(&self, error: LifespanError) -> Result<(), LifespanError> {
        tracing::error!(error = %error, "Application startup failed");
        self.advance(LifespanState::Stopped);
        Err(error)
    }

    /// Mark the start of shutdown. No event is sent yet.
    pub fn begin_shutdown(&self) {
        self.advance(LifespanState::ShuttingDown);
    }

    /// Deliver `lifespan.shutdown`, wait (bounded) for the acknowledgement, then stop.
    pub async fn shutdown(&mut self) {
        self.advance(LifespanState::ShuttingDown);
        if let Some(mut session) = self.session.take() {
            if session.in_tx.try_send(InboundEvent::LifespanShutdown).is_ok() {
                let limit = self.config.shutdown();
                match session.wait_for(Phase::Shutdown, Some(limit)).await {
                    Ack::Complete => tracing::info!("Application shutdown complete"),
                    Ack::Failed(message) => {
                        tracing::error!(error = %message, "Application reported shutdown failure")
                    }
                    Ack::TimedOut => {
                        tracing::warn!(timeout = ?limit, "No lifespan shutdown acknowledgement")
                    }
                    Ack::Exited(Ok(Ok(()))) => {
                        tracing::debug!("Lifespan call returned during shutdown")
                    }
                    Ack::Exited(result) => {
                        tracing::error!(error = %exit_message(result), "Application failed during shutdown")
                    }
                }
            }
        }
        self.advance(LifespanState::Stopped);
    }

    /// Skip the shutdown exchange and stop immediately.
    pub fn force_stop(&mut self) {
        self.session = None;
        self.advance(LifespanState::Stopped);
    }
}

fn exit_message(result: Result<AppResult, JoinError>) -> String {
    match result {
        Ok(Ok(())) => "returned".to_string(),
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => "panicked".to_string(),
        Err(e) => e.to_string(),
    }
}
