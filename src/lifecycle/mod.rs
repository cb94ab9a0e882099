//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (lifespan.rs):
//!     lifespan.startup → application ready → bind listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → lifespan.shutdown → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown; a second one forces it
//! ```
//!
//! # Design Decisions
//! - The application is started before the listener binds
//! - Shutdown has timeout: forced close after the grace period

pub mod lifespan;
pub mod shutdown;
pub mod signals;

pub use lifespan::{LifespanError, LifespanManager, LifespanState};
pub use shutdown::{ExitStatus, Shutdown, ShutdownListener, ShutdownPhase};
pub use signals::{Signal, SignalTrigger, Signals};
