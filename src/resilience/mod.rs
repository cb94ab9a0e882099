//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! accept() fails (EMFILE, ECONNABORTED, ...)
//!     → backoff.rs (exponential delay with jitter)
//!     → accept() retried; the counter resets on the next success
//! ```

pub mod backoff;
