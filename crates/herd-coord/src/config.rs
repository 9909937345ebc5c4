use std::{path::PathBuf, time::Duration};

use herd_model::BackoffStrategy;

use crate::error::CoordError;

/// Endpoint scheme selecting the in-process [`MemoryBackend`](crate::MemoryBackend).
pub const MEMORY_ENDPOINT: &str = "memory://";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `http://host:2379` style URLs, or a single `memory://` entry.
    pub endpoints: Vec<String>,
    /// Namespace prepended to every key.
    pub prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// PEM encoded CA used to verify the store.
    pub ca_cert: Option<PathBuf>,
    /// Name expected in the store's TLS certificate.
    pub server_name: Option<String>,
    /// Deadline of a single store request.
    pub op_timeout: Duration,
    /// Retry policy for non-conditional reads and writes.
    pub op_retry: BackoffStrategy,
    /// Retry policy for establishing the connection.
    pub connect_retry: BackoffStrategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            prefix: String::new(),
            username: None,
            password: None,
            ca_cert: None,
            server_name: None,
            op_timeout: Duration::from_secs(10),
            op_retry: BackoffStrategy::fixed(5_000, 2),
            connect_retry: BackoffStrategy::exponential(500, 10_000, 60_000),
        }
    }
}

impl StoreConfig {
    /// Comma separated endpoints, as found in `ETCD_ENDPOINTS`.
    pub fn with_endpoints(mut self, endpoints: &str) -> Self {
        self.endpoints = endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn is_memory(&self) -> bool {
        self.endpoints
            .first()
            .is_some_and(|e| e.starts_with(MEMORY_ENDPOINT))
    }

    pub fn validate(&self) -> Result<(), CoordError> {
        if self.endpoints.is_empty() {
            return Err(CoordError::Config("no store endpoints configured".into()));
        }
        if self.is_memory() && self.endpoints.len() > 1 {
            return Err(CoordError::Config(
                "memory:// cannot be combined with other endpoints".into(),
            ));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(CoordError::Config(
                "username and password must be set together".into(),
            ));
        }
        if self.server_name.is_some() && self.ca_cert.is_none() {
            return Err(CoordError::Config("server name requires a CA certificate".into()));
        }
        if self.op_timeout.is_zero() {
            return Err(CoordError::Config("operation timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_are_split_and_trimmed() {
        let cfg = StoreConfig::default().with_endpoints("http://a:2379, http://b:2379,,");
        assert_eq!(cfg.endpoints, vec!["http://a:2379", "http://b:2379"]);
        assert!(!cfg.is_memory());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn memory_endpoint() {
        let cfg = StoreConfig::default().with_endpoints("memory://");
        assert!(cfg.is_memory());
        assert!(cfg.validate().is_ok());

        let cfg = StoreConfig::default().with_endpoints("memory://,http://a:2379");
        assert!(matches!(cfg.validate(), Err(CoordError::Config(_))));
    }

    #[test]
    fn invalid_combinations() {
        assert!(StoreConfig::default().validate().is_err());

        let mut cfg = StoreConfig::default().with_endpoints("http://a:2379");
        cfg.username = Some("root".into());
        assert!(cfg.validate().is_err());

        cfg.password = Some("secret".into());
        assert!(cfg.validate().is_ok());

        cfg.server_name = Some("etcd".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn defaults_match_store_policy() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.op_timeout, Duration::from_secs(10));
        assert_eq!(cfg.op_retry.max_attempts, Some(2));
        assert_eq!(cfg.op_retry.base_delay_ms(0), 5_000);
        assert_eq!(cfg.connect_retry.max_elapsed_ms, Some(60_000));
    }
}
