//! Lodge: a small HTTP/1.1 server for scope/receive/send applications.

pub mod app;
pub mod config;
pub mod demo;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;

pub use app::{AppError, AppResult, Application, InboundEvent, Inbox, OutboundEvent, Outbox, Scope};
pub use config::ServerConfig;
pub use lifecycle::{ExitStatus, Signal, SignalTrigger, Signals};
pub use server::{RunningServer, Server, ServerError};
