//! Application contract.
//!
//! # Data Flow
//! ```text
//! server ──scope──▶ Application::call(scope, inbox, outbox)
//!        ──InboundEvent──▶ inbox.recv()
//!        ◀──OutboundEvent── outbox.send(..)
//! ```
//!
//! # Design Decisions
//! - The application is a single-method capability; closures qualify
//! - Each call gets its own channel pair, so events of different exchanges never mix
//! - `send` is acknowledged, so ordering violations surface at the call site

pub mod channel;
pub mod error;
pub mod event;
pub mod scope;

use std::future::Future;

use futures_util::future::BoxFuture;

pub use channel::{Inbox, Outbox};
pub use error::{AppError, ProtocolViolation, SendError};
pub use event::{InboundEvent, OutboundEvent};
pub use scope::{Endpoint, HttpScope, InterfaceVersion, LifespanScope, Scope, ScopeKind};

/// Result of one application call.
pub type AppResult = Result<(), AppError>;

/// Anything that can serve a scope given its receive and send halves.
pub trait Application: Send + Sync + 'static {
    fn call(&self, scope: Scope, inbox: Inbox, outbox: Outbox) -> BoxFuture<'static, AppResult>;
}

impl<F, Fut> Application for F
where
    F: Fn(Scope, Inbox, Outbox) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult> + Send + 'static,
{
    fn call(&self, scope: Scope, inbox: Inbox, outbox: Outbox) -> BoxFuture<'static, AppResult> {
        Box::pin((self)(scope, inbox, outbox))
    }
}
