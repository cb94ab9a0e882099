//! Per-exchange metadata handed to the application.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

use crate::http::RequestHead;

/// Version of the interface contract this server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceVersion {
    pub version: &'static str,
    pub spec_version: &'static str,
}

impl InterfaceVersion {
    pub const CURRENT: InterfaceVersion = InterfaceVersion {
        version: "3.0",
        spec_version: "2.3",
    };
}

/// Discriminant of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Http,
    Lifespan,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Http => "http",
            ScopeKind::Lifespan => "lifespan",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host/port pair of one end of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Immutable description of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpScope {
    #[serde(rename = "asgi")]
    pub interface: InterfaceVersion,
    pub http_version: &'static str,
    pub method: String,
    pub scheme: &'static str,
    pub path: String,
    pub raw_path: String,
    pub query_string: String,
    pub root_path: String,
    /// Lowercased names, wire order, duplicates kept.
    pub headers: Vec<(String, String)>,
    pub client: Option<Endpoint>,
    pub server: Option<Endpoint>,
}

impl HttpScope {
    /// Build the scope for a parsed request head.
    pub fn new(head: &RequestHead, client: Option<SocketAddr>, server: Option<SocketAddr>) -> Self {
        Self {
            interface: InterfaceVersion::CURRENT,
            http_version: head.version.as_str(),
            method: head.method.clone(),
            scheme: "http",
            path: head.path.clone(),
            raw_path: head.raw_path.clone(),
            query_string: head.query.clone(),
            root_path: String::new(),
            headers: head.headers.clone(),
            client: client.map(Endpoint::from),
            server: server.map(Endpoint::from),
        }
    }

    /// First header value with the given (lowercase) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Scope of the lifecycle protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifespanScope {
    #[serde(rename = "asgi")]
    pub interface: InterfaceVersion,
}

impl Default for LifespanScope {
    fn default() -> Self {
        Self {
            interface: InterfaceVersion::CURRENT,
        }
    }
}

/// Connection- and request-derived metadata, read-only to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Scope {
    Http(HttpScope),
    Lifespan(LifespanScope),
}

impl Scope {
    pub fn kind(&self) -> ScopeKind {
        match self {
            Scope::Http(_) => ScopeKind::Http,
            Scope::Lifespan(_) => ScopeKind::Lifespan,
        }
    }
}
