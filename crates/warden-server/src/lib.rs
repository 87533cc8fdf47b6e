//! # warden-server
//!
//! The privileged side of Warden. A [`PrivilegedServer`] owns its
//! configuration and bookkeeping in a [`ServerContext`], receives requests
//! from a [`ServerTransport`](warden_protocol::ServerTransport), and runs
//! each one against the root-only primitives in `warden-core`.
//!
//! The process is expected to already run with root rights; how it got
//! them is outside this crate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod context;
pub mod listener;
pub mod server;

pub use context::ServerContext;
pub use server::PrivilegedServer;
