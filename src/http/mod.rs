//! HTTP/1.1 protocol handling.
//!
//! # Data Flow
//! ```text
//! bytes from the socket
//!     → codec.rs (request head: line, headers, framing)
//!     → request.rs (body decoding: length or chunked)
//!     → bridge.rs (scope + receive/send channels, drives the application)
//!     → response.rs (status line, framing, error responses)
//!     → bytes to the socket
//! ```

pub mod bridge;
pub mod codec;
pub mod request;
pub mod response;

pub use codec::{HeadParser, ParseError};
pub use request::{BodyDecoder, BodyKind, RequestHead, Version};
pub use response::ResponseEncoder;
