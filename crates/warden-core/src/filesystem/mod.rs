//! Filesystem operations performed on behalf of the unprivileged side.
//!
//! Provides the transparent `mount(2)` forward and the `pivot_root(2)`
//! root-switch sequence.

pub mod mount;
pub mod pivot_root;
