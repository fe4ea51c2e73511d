// SPDX-License-Identifier: MIT OR Apache-2.0

//! Failover event hooks.
//!
//! A [`DeploymentListener`] is handed to the deployment at construction and
//! is told about every node failover, datacenter switch, exhaustion and
//! reinstatement. Callbacks run after the deployment lock is released.
//!
//! # Example
//!
//! ```
//! use dc_failover_rs::runtime::{ListenerConfig, LogLevel, LoggingListener};
//!
//! let listener = LoggingListener::with_config(
//!     ListenerConfig::new()
//!         .with_failover_level(LogLevel::Info)
//!         .with_exhausted_level(LogLevel::Error),
//! );
//! assert_eq!(listener.counters().node_failovers(), 0);
//! ```

use crate::deployment::ResourceHandle;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

const TARGET: &str = "dc_failover::deployment";

/// Receives failover events from a managed deployment.
///
/// Every method has an empty default so implementors only override what
/// they care about.
pub trait DeploymentListener: Send + Sync {
    /// A node was flagged unavailable.
    fn on_node_failover(&self, _resource: &ResourceHandle, _cause: &str) {}

    /// The current datacenter changed because the previous one failed.
    fn on_datacenter_failover(&self, _from: &str, _to: &str) {}

    /// The current datacenter was changed explicitly.
    fn on_datacenter_selected(&self, _from: &str, _to: &str) {}

    /// No datacenter has an available node left.
    fn on_exhausted(&self, _last_datacenter: &str) {}

    /// A node was flagged available again.
    fn on_reinstated(&self, _resource: &ResourceHandle) {}
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl DeploymentListener for NoopListener {}

/// Log level for listener output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Trace level - most verbose.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warn level.
    Warn,
    /// Error level - only errors.
    Error,
    /// Disabled - no logging.
    Off,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Off => write!(f, "OFF"),
        }
    }
}

/// Levels used by [`LoggingListener`] per event kind.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Level for node and datacenter failovers.
    pub failover_level: LogLevel,
    /// Level for explicit datacenter selection.
    pub selection_level: LogLevel,
    /// Level for deployment exhaustion.
    pub exhausted_level: LogLevel,
    /// Level for reinstated nodes.
    pub reinstated_level: LogLevel,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            failover_level: LogLevel::Warn,
            selection_level: LogLevel::Debug,
            exhausted_level: LogLevel::Error,
            reinstated_level: LogLevel::Info,
        }
    }
}

impl ListenerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_failover_level(mut self, level: LogLevel) -> Self {
        self.failover_level = level;
        self
    }

    #[must_use]
    pub fn with_selection_level(mut self, level: LogLevel) -> Self {
        self.selection_level = level;
        self
    }

    #[must_use]
    pub fn with_exhausted_level(mut self, level: LogLevel) -> Self {
        self.exhausted_level = level;
        self
    }

    #[must_use]
    pub fn with_reinstated_level(mut self, level: LogLevel) -> Self {
        self.reinstated_level = level;
        self
    }

    /// Silence everything except exhaustion.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            failover_level: LogLevel::Off,
            selection_level: LogLevel::Off,
            exhausted_level: LogLevel::Error,
            reinstated_level: LogLevel::Off,
        }
    }
}

/// Counters maintained by [`LoggingListener`].
#[derive(Debug, Default)]
pub struct FailoverCounters {
    node_failovers: AtomicU64,
    datacenter_failovers: AtomicU64,
    exhaustions: AtomicU64,
    reinstatements: AtomicU64,
}

impl FailoverCounters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn node_failovers(&self) -> u64 {
        self.node_failovers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn datacenter_failovers(&self) -> u64 {
        self.datacenter_failovers.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn exhaustions(&self) -> u64 {
        self.exhaustions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn reinstatements(&self) -> u64 {
        self.reinstatements.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.node_failovers.store(0, Ordering::Relaxed);
        self.datacenter_failovers.store(0, Ordering::Relaxed);
        self.exhaustions.store(0, Ordering::Relaxed);
        self.reinstatements.store(0, Ordering::Relaxed);
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => trace!(target: TARGET, $($arg)+),
            LogLevel::Debug => debug!(target: TARGET, $($arg)+),
            LogLevel::Info => info!(target: TARGET, $($arg)+),
            LogLevel::Warn => warn!(target: TARGET, $($arg)+),
            LogLevel::Error => error!(target: TARGET, $($arg)+),
            LogLevel::Off => {}
        }
    };
}

/// Default listener: structured `tracing` output plus event counters.
#[derive(Debug, Default)]
pub struct LoggingListener {
    config: ListenerConfig,
    counters: FailoverCounters,
}

impl LoggingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(config: ListenerConfig) -> Self {
        Self {
            config,
            counters: FailoverCounters::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    #[must_use]
    pub fn counters(&self) -> &FailoverCounters {
        &self.counters
    }
}

impl DeploymentListener for LoggingListener {
    fn on_node_failover(&self, resource: &ResourceHandle, cause: &str) {
        self.counters.node_failovers.fetch_add(1, Ordering::Relaxed);
        log_at!(
            self.config.failover_level,
            datacenter = resource.datacenter(),
            resource = resource.id(),
            endpoint = %resource.endpoint(),
            cause,
            "node marked unavailable"
        );
    }

    fn on_datacenter_failover(&self, from: &str, to: &str) {
        self.counters
            .datacenter_failovers
            .fetch_add(1, Ordering::Relaxed);
        log_at!(self.config.failover_level, from, to, "datacenter failover");
    }

    fn on_datacenter_selected(&self, from: &str, to: &str) {
        log_at!(self.config.selection_level, from, to, "datacenter selected");
    }

    fn on_exhausted(&self, last_datacenter: &str) {
        self.counters.exhaustions.fetch_add(1, Ordering::Relaxed);
        log_at!(
            self.config.exhausted_level,
            last_datacenter,
            "deployment exhausted: no datacenter has an available node"
        );
    }

    fn on_reinstated(&self, resource: &ResourceHandle) {
        self.counters.reinstatements.fetch_add(1, Ordering::Relaxed);
        log_at!(
            self.config.reinstated_level,
            datacenter = resource.datacenter(),
            resource = resource.id(),
            "node reinstated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{ResourcePool, Service};
    use std::sync::Arc;

    fn handle() -> ResourceHandle {
        let service = Arc::new(
            Service::http("n1", "http://n1.test:8080", "http://n1.test:8080/health").unwrap(),
        );
        ResourcePool::new("dc1", [&service]).handles().remove(0)
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "TRACE");
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
        assert_eq!(LogLevel::Off.to_string(), "OFF");
    }

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::default();
        assert_eq!(config.failover_level, LogLevel::Warn);
        assert_eq!(config.selection_level, LogLevel::Debug);
        assert_eq!(config.exhausted_level, LogLevel::Error);
        assert_eq!(config.reinstated_level, LogLevel::Info);
    }

    #[test]
    fn test_listener_config_builder() {
        let config = ListenerConfig::new()
            .with_failover_level(LogLevel::Info)
            .with_selection_level(LogLevel::Trace)
            .with_exhausted_level(LogLevel::Warn)
            .with_reinstated_level(LogLevel::Off);

        assert_eq!(config.failover_level, LogLevel::Info);
        assert_eq!(config.selection_level, LogLevel::Trace);
        assert_eq!(config.exhausted_level, LogLevel::Warn);
        assert_eq!(config.reinstated_level, LogLevel::Off);
    }

    #[test]
    fn test_listener_config_quiet() {
        let config = ListenerConfig::quiet();
        assert_eq!(config.failover_level, LogLevel::Off);
        assert_eq!(config.exhausted_level, LogLevel::Error);
    }

    #[test]
    fn test_logging_listener_counts_events() {
        let listener = LoggingListener::with_config(ListenerConfig::quiet());
        let resource = handle();

        listener.on_node_failover(&resource, "connection refused");
        listener.on_node_failover(&resource, "connection refused");
        listener.on_datacenter_failover("dc1", "dc2");
        listener.on_datacenter_selected("dc2", "dc1");
        listener.on_exhausted("dc2");
        listener.on_reinstated(&resource);

        let counters = listener.counters();
        assert_eq!(counters.node_failovers(), 2);
        assert_eq!(counters.datacenter_failovers(), 1);
        assert_eq!(counters.exhaustions(), 1);
        assert_eq!(counters.reinstatements(), 1);

        counters.reset();
        assert_eq!(counters.node_failovers(), 0);
    }
}
