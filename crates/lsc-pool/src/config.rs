//! Worker pool and proxy configuration.

use lsc_error::{LscError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Threads started with the server.
    /// Default: 4.
    pub init_worker_count: usize,
    /// Upper bound on live worker threads.
    /// Default: 16.
    pub max_worker_count: usize,
    /// Worker threads are named `{prefix}-{n}`.
    pub thread_name_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            init_worker_count: 4,
            max_worker_count: 16,
            thread_name_prefix: "lsc-worker".to_owned(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_worker_count == 0 {
            return Err(LscError::InvalidConfig(
                "max_worker_count must be > 0".to_owned(),
            ));
        }
        if self.init_worker_count > self.max_worker_count {
            return Err(LscError::InvalidConfig(format!(
                "init_worker_count={} exceeds max_worker_count={}",
                self.init_worker_count, self.max_worker_count
            )));
        }
        Ok(())
    }
}

/// Per-stream proxy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// I/O granularity for background loads; a power of two. Forced to 1
    /// for unseekable streams.
    /// Default: 4096.
    pub align: u64,
    /// Sleep before each load. Testing hook for deterministic scheduling.
    pub load_delay_ms: Option<u64>,
    /// Pre-seed the cache with this many uncached bytes instead of asking
    /// the stream for its length.
    pub assume_size: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            align: 4096,
            load_delay_ms: None,
            assume_size: None,
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<()> {
        if !lsc_types::is_power_of_two(self.align) {
            return Err(LscError::InvalidConfig(format!(
                "align={} must be a power of two",
                self.align
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn load_delay(&self) -> Option<Duration> {
        self.load_delay_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ServerConfig::default().validate().expect("server");
        ProxyConfig::default().validate().expect("proxy");
        assert_eq!(ProxyConfig::default().load_delay(), None);
    }

    #[test]
    fn worker_bounds_are_checked() {
        let zero = ServerConfig {
            max_worker_count: 0,
            init_worker_count: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(zero.validate(), Err(LscError::InvalidConfig(_))));

        let inverted = ServerConfig {
            init_worker_count: 8,
            max_worker_count: 2,
            ..ServerConfig::default()
        };
        assert!(inverted.validate().is_err());

        let lazy = ServerConfig {
            init_worker_count: 0,
            max_worker_count: 1,
            ..ServerConfig::default()
        };
        lazy.validate().expect("lazy start");
    }

    #[test]
    fn alignment_must_be_power_of_two() {
        for align in [0, 3, 4095] {
            let config = ProxyConfig {
                align,
                ..ProxyConfig::default()
            };
            assert!(config.validate().is_err(), "align={align}");
        }
        let config = ProxyConfig {
            align: 1,
            ..ProxyConfig::default()
        };
        config.validate().expect("byte granularity");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ProxyConfig = serde_json::from_str(r#"{"align": 512}"#).expect("parse");
        assert_eq!(config.align, 512);
        assert_eq!(config.assume_size, None);

        let server: ServerConfig =
            serde_json::from_str(r#"{"max_worker_count": 2, "init_worker_count": 1}"#)
                .expect("parse");
        assert_eq!(server.thread_name_prefix, "lsc-worker");
        server.validate().expect("valid");

        let delayed: ProxyConfig = serde_json::from_str(r#"{"load_delay_ms": 5}"#).expect("parse");
        assert_eq!(delayed.load_delay(), Some(Duration::from_millis(5)));
    }
}
