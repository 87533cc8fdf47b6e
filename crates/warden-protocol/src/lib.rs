//! # warden-protocol
//!
//! The fixed vocabulary spoken across the privilege boundary.
//!
//! - [`message`]: the four request kinds and the `(value, error)` reply.
//! - [`frame`]: length-prefixed JSON framing over any byte stream.
//! - [`transport`]: client and server transport traits and the
//!   [`FramedStream`](transport::FramedStream) implementation.
//!
//! There is no versioning and no authentication. The channel is assumed to
//! be reachable only by the trusted client/server pair.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod frame;
pub mod message;
pub mod transport;

pub use message::{RemoteError, Reply, Request, RequestKind};
pub use transport::{FramedStream, ServerTransport, Transport};
