//! Per-instance server state.
//!
//! Everything the helper remembers between requests lives here and is
//! owned by one server, so independent servers can share a process.

use std::collections::BTreeMap;
use std::path::PathBuf;

use warden_common::config::ServerConfig;
use warden_protocol::RequestKind;

/// Outcome counters for one request kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    /// Requests that completed successfully.
    pub succeeded: u64,
    /// Requests that returned an error.
    pub failed: u64,
}

/// State owned by a single [`PrivilegedServer`](crate::PrivilegedServer).
///
/// Loop devices are not tracked; releasing them is up to the client.
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    mkdir_requests: Vec<PathBuf>,
    stats: BTreeMap<RequestKind, RequestStats>,
}

impl ServerContext {
    /// Creates an empty context for `config`.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self {
            config,
            mkdir_requests: Vec::new(),
            stats: BTreeMap::new(),
        }
    }

    /// Configuration the server was started with.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Directory requests seen while running in record-only mode.
    #[must_use]
    pub fn mkdir_requests(&self) -> &[PathBuf] {
        &self.mkdir_requests
    }

    /// Counters for `kind`.
    #[must_use]
    pub fn stats(&self, kind: RequestKind) -> RequestStats {
        self.stats.get(&kind).copied().unwrap_or_default()
    }

    pub(crate) fn record_mkdir(&mut self, path: PathBuf) {
        self.mkdir_requests.push(path);
    }

    pub(crate) fn record_outcome(&mut self, kind: RequestKind, ok: bool) {
        let entry = self.stats.entry(kind).or_default();
        if ok {
            entry.succeeded += 1;
        } else {
            entry.failed += 1;
        }
    }
}
