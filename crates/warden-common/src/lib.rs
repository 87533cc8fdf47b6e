//! # warden-common
//!
//! Shared error definitions, configuration model, constants, and the
//! fixed-layout kernel record types used across the Warden workspace.
//!
//! This crate is the leaf of the dependency graph: both sides of the
//! privilege boundary depend on it, so it carries no privileged code.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
