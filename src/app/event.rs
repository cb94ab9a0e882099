//! Events exchanged between the server and an application.
//!
//! Inbound events flow from the server to the application through an
//! [`Inbox`](super::Inbox); outbound events flow back through an
//! [`Outbox`](super::Outbox). Every event carries its protocol tag, see
//! [`InboundEvent::kind`] and [`OutboundEvent::kind`].

use bytes::Bytes;

/// An event delivered to the application by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A piece of the request body. `more_body == false` marks the end of the body.
    HttpRequest { body: Bytes, more_body: bool },
    /// The client went away, or the exchange is over.
    HttpDisconnect,
    /// The server is booting and waits for the application to get ready.
    LifespanStartup,
    /// The server has drained its connections and is about to exit.
    LifespanShutdown,
}

impl InboundEvent {
    /// Protocol tag of the event, e.g. `"http.request"`.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::HttpRequest { .. } => "http.request",
            InboundEvent::HttpDisconnect => "http.disconnect",
            InboundEvent::LifespanStartup => "lifespan.startup",
            InboundEvent::LifespanShutdown => "lifespan.shutdown",
        }
    }
}

/// An event emitted by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    /// Status line and headers. Must precede every body event, at most once.
    HttpResponseStart {
        status: u16,
        headers: Vec<(String, String)>,
    },
    /// A piece of the response body. `more_body == false` completes the response.
    HttpResponseBody { body: Bytes, more_body: bool },
    LifespanStartupComplete,
    LifespanStartupFailed { message: String },
    LifespanShutdownComplete,
    LifespanShutdownFailed { message: String },
}

impl OutboundEvent {
    /// Protocol tag of the event, e.g. `"http.response.start"`.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::HttpResponseStart { .. } => "http.response.start",
            OutboundEvent::HttpResponseBody { .. } => "http.response.body",
            OutboundEvent::LifespanStartupComplete => "lifespan.startup.complete",
            OutboundEvent::LifespanStartupFailed { .. } => "lifespan.startup.failed",
            OutboundEvent::LifespanShutdownComplete => "lifespan.shutdown.complete",
            OutboundEvent::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
        }
    }

    /// Convenience constructor for a response start event.
    pub fn start<I, K, V>(status: u16, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        OutboundEvent::HttpResponseStart {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Convenience constructor for a response body event.
    pub fn body(body: impl Into<Bytes>, more_body: bool) -> Self {
        OutboundEvent::HttpResponseBody {
            body: body.into(),
            more_body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kinds() {
        assert_eq!(InboundEvent::HttpDisconnect.kind(), "http.disconnect");
        assert_eq!(
            OutboundEvent::start(200, [("content-type", "text/plain")]).kind(),
            "http.response.start"
        );
        assert_eq!(
            OutboundEvent::LifespanShutdownFailed { message: "x".into() }.kind(),
            "lifespan.shutdown.failed"
        );
    }

    #[test]
    fn start_collects_headers_in_order() {
        let event = OutboundEvent::start(204, [("a", "1"), ("b", "2"), ("a", "3")]);
        match event {
            OutboundEvent::HttpResponseStart { status, headers } => {
                assert_eq!(status, 204);
                assert_eq!(
                    headers,
                    vec![
                        ("a".to_string(), "1".to_string()),
                        ("b".to_string(), "2".to_string()),
                        ("a".to_string(), "3".to_string()),
                    ]
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
