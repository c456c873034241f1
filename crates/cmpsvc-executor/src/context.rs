//! Service context: everything a worker needs, built once at startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cmpsvc_core::config::ServiceConfig;
use cmpsvc_core::error::Result;
use cmpsvc_core::key::SecretKey;
use cmpsvc_module::reporter::ThroughputReporter;
use cmpsvc_module::spinlock::SpinPolicy;

use crate::comparator::Comparator;

/// Process-wide stop flag shared by every worker
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true for the first caller only.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Shared, read-mostly service state
pub struct ServiceContext {
    key: Arc<SecretKey>,
    reporter: Arc<ThroughputReporter>,
    policy: SpinPolicy,
    config: ServiceConfig,
    shutdown: ShutdownHandle,
}

impl ServiceContext {
    /// Validate `config` and build the context around `key`
    pub fn new(key: SecretKey, config: ServiceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let policy = SpinPolicy::with_max_delays(config.spin_max_delays);
        let reporter = Arc::new(ThroughputReporter::new(config.reporter.clone(), policy));
        Ok(Arc::new(Self {
            key: Arc::new(key),
            reporter,
            policy,
            config,
            shutdown: ShutdownHandle::new(),
        }))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn policy(&self) -> &SpinPolicy {
        &self.policy
    }

    pub fn reporter(&self) -> &Arc<ThroughputReporter> {
        &self.reporter
    }

    pub fn shutdown(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    /// Fresh per-worker comparator (own buffers and local counter)
    pub fn comparator(&self) -> Comparator {
        Comparator::new(&self.key, Arc::clone(&self.reporter))
    }
}
