//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT; Ctrl-C off Unix)
//! - Translate signals into a stream the shutdown coordinator consumes
//! - Offer a manual source for embedding and tests
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - The first signal drains, a second one forces shutdown

use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM.
    Terminate,
    /// SIGINT / Ctrl-C.
    Interrupt,
}

/// Stream of termination requests.
#[derive(Debug)]
pub struct Signals {
    rx: mpsc::UnboundedReceiver<Signal>,
    forwarder: Option<JoinHandle<()>>,
}

impl Signals {
    /// Listen for process signals. Must be called inside a tokio runtime.
    #[cfg(unix)]
    pub fn os() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = terminate.recv() => Signal::Terminate,
                    Some(()) = interrupt.recv() => Signal::Interrupt,
                    else => break,
                };
                if tx.send(received).is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            rx,
            forwarder: Some(forwarder),
        })
    }

    /// Listen for Ctrl-C. Must be called inside a tokio runtime.
    #[cfg(not(unix))]
    pub fn os() -> io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if tx.send(Signal::Interrupt).is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            rx,
            forwarder: Some(forwarder),
        })
    }

    /// A signal source driven by the returned trigger.
    pub fn manual() -> (SignalTrigger, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SignalTrigger { tx },
            Self {
                rx,
                forwarder: None,
            },
        )
    }

    /// Next signal; `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.rx.recv().await
    }
}

impl Drop for Signals {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Sender half of [`Signals::manual`].
#[derive(Debug, Clone)]
pub struct SignalTrigger {
    tx: mpsc::UnboundedSender<Signal>,
}

impl SignalTrigger {
    /// Deliver `signal`; ignored if the server already finished.
    pub fn send(&self, signal: Signal) {
        let _ = self.tx.send(signal);
    }
}
