//! # warden-core
//!
//! Root-only primitives executed by the Warden privileged helper.
//!
//! This crate provides safe abstractions over:
//! - **Credentials**: scoped `setfsuid(2)` elevation confined to one thread.
//! - **Loop devices**: free-slot scanning, on-demand node creation, and
//!   `LOOP_SET_FD` / `LOOP_SET_STATUS64`.
//! - **Filesystem**: transparent `mount(2)` forwarding and the
//!   `pivot_root(2)` root-switch sequence.
//!
//! Every syscall goes through the [`syscalls::Syscalls`] or
//! [`loopdev::LoopControl`] seam so the sequencing can be exercised
//! without root. All unsafe calls carry `// SAFETY:` notes.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod creds;
pub mod filesystem;
pub mod loopdev;
pub mod syscalls;
