//! Service configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use cmpsvc_core::config::ServiceConfig;
//!
//! // Defaults with env overrides
//! let config = ServiceConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ServiceConfig::new().pool_size(8).segment("/cmpsvc-test");
//! ```

use std::time::Duration;

use crate::constants::{DEFAULT_POOL_SIZE, DEFAULT_PORT, MAX_POOL_SIZE};
use crate::env::{env_get, env_get_bool, env_get_str};
use crate::error::{CmpError, Result};

/// Library defaults
pub mod defaults {
    pub const BIND_ADDR: &str = "0.0.0.0";
    pub const TCP_NODELAY: bool = true;
    pub const SEGMENT: &str = "/cmpsvc";
    pub const QUEUE_DEPTH: usize = 8;
    pub const SPIN_MAX_DELAYS: u32 = 1000;
    pub const REPORT_ENABLED: bool = true;
    pub const REPORT_FLUSH_EVERY: u64 = 1000;
    pub const REPORT_SAMPLE_EVERY: u64 = 10_000;
    pub const REPORT_INTERVAL_MS: u64 = 1000;
}

/// Throughput sampling parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReporterConfig {
    /// Emit throughput lines at all
    pub enabled: bool,
    /// Worker folds its local count into the shared sample this often
    pub flush_every: u64,
    /// Shared count boundary at which the clock is read
    pub sample_every: u64,
    /// Minimum time between two emitted lines
    pub min_interval: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::REPORT_ENABLED,
            flush_every: defaults::REPORT_FLUSH_EVERY,
            sample_every: defaults::REPORT_SAMPLE_EVERY,
            min_interval: Duration::from_millis(defaults::REPORT_INTERVAL_MS),
        }
    }
}

impl ReporterConfig {
    /// Sampling turned off: workers skip counting and nothing is emitted
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

/// Configuration for both transports
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Listen address of the connection-oriented transport
    pub bind_addr: String,
    /// Listen port of the connection-oriented transport
    pub port: u16,
    /// Set TCP_NODELAY on accepted sockets
    pub tcp_nodelay: bool,
    /// Number of channel slots (and slot workers)
    pub pool_size: usize,
    /// Shared-memory segment name; also prefixes the queue names
    pub segment: String,
    /// Max queued messages per channel
    pub queue_depth: usize,
    /// Sleeps a spinlock waiter tolerates before declaring it stuck
    pub spin_max_delays: u32,
    /// Throughput reporting
    pub reporter: ReporterConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServiceConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `CMPSVC_BIND_ADDR` - Listen address
    /// - `CMPSVC_PORT` - Listen port
    /// - `CMPSVC_TCP_NODELAY` - Disable Nagle on accepted sockets (0/1)
    /// - `CMPSVC_POOL_SIZE` - Number of slots
    /// - `CMPSVC_SEGMENT` - Shared-memory segment name
    /// - `CMPSVC_QUEUE_DEPTH` - Messages per channel
    /// - `CMPSVC_SPIN_MAX_DELAYS` - Stuck-lock threshold
    /// - `CMPSVC_REPORT` - Enable throughput lines (0/1)
    /// - `CMPSVC_REPORT_FLUSH_EVERY` - Local batch size
    /// - `CMPSVC_REPORT_SAMPLE_EVERY` - Shared batch size
    /// - `CMPSVC_REPORT_INTERVAL_MS` - Minimum time between lines
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_get_str("BIND_ADDR", defaults::BIND_ADDR),
            port: env_get("PORT", DEFAULT_PORT),
            tcp_nodelay: env_get_bool("TCP_NODELAY", defaults::TCP_NODELAY),
            pool_size: env_get("POOL_SIZE", DEFAULT_POOL_SIZE),
            segment: env_get_str("SEGMENT", defaults::SEGMENT),
            queue_depth: env_get("QUEUE_DEPTH", defaults::QUEUE_DEPTH),
            spin_max_delays: env_get("SPIN_MAX_DELAYS", defaults::SPIN_MAX_DELAYS),
            reporter: ReporterConfig {
                enabled: env_get_bool("REPORT", defaults::REPORT_ENABLED),
                flush_every: env_get("REPORT_FLUSH_EVERY", defaults::REPORT_FLUSH_EVERY),
                sample_every: env_get("REPORT_SAMPLE_EVERY", defaults::REPORT_SAMPLE_EVERY),
                min_interval: Duration::from_millis(env_get(
                    "REPORT_INTERVAL_MS",
                    defaults::REPORT_INTERVAL_MS,
                )),
            },
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            bind_addr: defaults::BIND_ADDR.to_string(),
            port: DEFAULT_PORT,
            tcp_nodelay: defaults::TCP_NODELAY,
            pool_size: DEFAULT_POOL_SIZE,
            segment: defaults::SEGMENT.to_string(),
            queue_depth: defaults::QUEUE_DEPTH,
            spin_max_delays: defaults::SPIN_MAX_DELAYS,
            reporter: ReporterConfig::default(),
        }
    }

    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.pool_size = n;
        self
    }

    pub fn segment(mut self, name: impl Into<String>) -> Self {
        self.segment = name.into();
        self
    }

    pub fn queue_depth(mut self, n: usize) -> Self {
        self.queue_depth = n;
        self
    }

    pub fn spin_max_delays(mut self, n: u32) -> Self {
        self.spin_max_delays = n;
        self
    }

    pub fn reporter(mut self, reporter: ReporterConfig) -> Self {
        self.reporter = reporter;
        self
    }

    /// Reject values the transports cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(CmpError::Config(format!(
                "pool_size must be in 1..={}, got {}",
                MAX_POOL_SIZE, self.pool_size
            )));
        }
        if self.queue_depth == 0 {
            return Err(CmpError::Config("queue_depth must be at least 1".into()));
        }
        if !self.segment.starts_with('/') || self.segment[1..].contains('/') {
            return Err(CmpError::Config(format!(
                "segment name must be '/name' with no other slash, got {:?}",
                self.segment
            )));
        }
        let r = &self.reporter;
        if r.flush_every == 0 || r.sample_every < r.flush_every {
            return Err(CmpError::Config(format!(
                "report batches must satisfy 0 < flush_every ({}) <= sample_every ({})",
                r.flush_every, r.sample_every
            )));
        }
        Ok(())
    }
}
