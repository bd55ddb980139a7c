//! Configuration for the replication engine.

use std::time::Duration;

/// Tunables shared by replication instances.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a cached remote-ID snapshot stays fresh before the next
    /// audit refetches it.
    pub remote_id_ttl: Duration,
    /// Local page size used when auditing the full collection.
    pub audit_page_size: usize,
    /// Page size requested from the server during pulls.
    pub pull_page_size: i64,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            remote_id_ttl: Duration::from_secs(10 * 60),
            audit_page_size: 1000,
            pull_page_size: 10,
        }
    }

    /// Sets the remote-ID snapshot TTL.
    pub fn with_remote_id_ttl(mut self, ttl: Duration) -> Self {
        self.remote_id_ttl = ttl;
        self
    }

    /// Sets the local audit page size.
    pub fn with_audit_page_size(mut self, size: usize) -> Self {
        self.audit_page_size = size;
        self
    }

    /// Sets the server pull page size.
    pub fn with_pull_page_size(mut self, size: i64) -> Self {
        self.pull_page_size = size;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.remote_id_ttl, Duration::from_secs(600));
        assert_eq!(config.audit_page_size, 1000);
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_remote_id_ttl(Duration::from_secs(5))
            .with_audit_page_size(100)
            .with_pull_page_size(25);
        assert_eq!(config.remote_id_ttl, Duration::from_secs(5));
        assert_eq!(config.audit_page_size, 100);
        assert_eq!(config.pull_page_size, 25);
    }
}
