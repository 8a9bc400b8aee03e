//! Remote server endpoint.

use serde::{Deserialize, Serialize};

/// A normalized `(host, port)` pair.
///
/// Hosts are stored lowercased without a trailing dot, so two endpoints are
/// equal exactly when their [`Display`](std::fmt::Display) strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Build an endpoint, normalizing the host.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.trim_end_matches('.').to_ascii_lowercase(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
