// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-node availability state and node selection within one datacenter.
//!
//! This module provides:
//! - [`LoadBalancingResource`]: a service plus its availability flag
//! - [`ResourceHandle`]: what callers hold while a call is in flight
//! - [`ResourcePool`]: the resources of one datacenter and the selection cursor
//! - [`LoadBalancer`]: strategies for picking among available resources

use crate::deployment::service::Service;
use crate::error::{FailoverError, Result};
use std::sync::Arc;
use std::time::Instant;
use url::Url;

/// Load balancing strategy for selecting a node inside a datacenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancer {
    /// Round-robin selection across available nodes.
    #[default]
    RoundRobin,
    /// Always prefer the first available node in id order.
    Failover,
    /// Random selection among available nodes.
    Random,
}

/// A service wrapped with its runtime availability.
#[derive(Debug, Clone)]
pub struct LoadBalancingResource {
    service: Arc<Service>,
    available: bool,
    last_failure_cause: Option<String>,
    last_failure: Option<Instant>,
    failure_count: u64,
}

impl LoadBalancingResource {
    #[must_use]
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            available: true,
            last_failure_cause: None,
            last_failure: None,
            failure_count: 0,
        }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.service.id()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Cause recorded by the most recent failover, cleared on reinstatement.
    #[must_use]
    pub fn last_failure_cause(&self) -> Option<&str> {
        self.last_failure_cause.as_deref()
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<Instant> {
        self.last_failure
    }

    /// Number of times this resource has been failed over.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Returns `true` if the flag was flipped by this call.
    fn mark_unavailable(&mut self, cause: String) -> bool {
        let flipped = self.available;
        self.available = false;
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        self.last_failure_cause = Some(cause);
        flipped
    }

    fn reinstate(&mut self) -> bool {
        let flipped = !self.available;
        self.available = true;
        self.last_failure_cause = None;
        flipped
    }
}

/// Reference to a node handed out by a lookup.
///
/// Callers report failures by passing the handle back to the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHandle {
    datacenter: Arc<str>,
    service: Arc<Service>,
}

impl ResourceHandle {
    pub(crate) fn new(datacenter: Arc<str>, service: Arc<Service>) -> Self {
        Self {
            datacenter,
            service,
        }
    }

    /// Datacenter the node belongs to.
    #[must_use]
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.service.id()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        self.service.endpoint()
    }

    #[must_use]
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }
}

/// The resources of one datacenter.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    datacenter: Arc<str>,
    resources: Vec<LoadBalancingResource>,
    cursor: usize,
}

impl ResourcePool {
    /// Build a pool; resources keep the order of `services`.
    pub fn new<'a>(
        datacenter: &str,
        services: impl IntoIterator<Item = &'a Arc<Service>>,
    ) -> Self {
        Self {
            datacenter: Arc::from(datacenter),
            resources: services
                .into_iter()
                .map(|s| LoadBalancingResource::new(Arc::clone(s)))
                .collect(),
            cursor: 0,
        }
    }

    #[must_use]
    pub fn datacenter(&self) -> &str {
        &self.datacenter
    }

    #[must_use]
    pub fn resources(&self) -> &[LoadBalancingResource] {
        &self.resources
    }

    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&LoadBalancingResource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    #[must_use]
    pub fn has_available(&self) -> bool {
        self.resources.iter().any(LoadBalancingResource::is_available)
    }

    #[must_use]
    pub fn available_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_available()).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Pick the next node to try.
    ///
    /// Only resources flagged available are ever returned.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::NoResourceAvailable` if every resource of the
    /// datacenter is flagged unavailable (or the datacenter has none).
    #[allow(clippy::result_large_err)]
    pub fn next_available(&mut self, strategy: LoadBalancer) -> Result<ResourceHandle> {
        let available: Vec<usize> = self
            .resources
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_available())
            .map(|(i, _)| i)
            .collect();

        if available.is_empty() {
            return Err(FailoverError::NoResourceAvailable(
                self.datacenter.to_string(),
            ));
        }

        let idx = match strategy {
            LoadBalancer::RoundRobin => {
                let idx = available[self.cursor % available.len()];
                self.cursor = self.cursor.wrapping_add(1);
                idx
            }
            LoadBalancer::Failover => available[0],
            LoadBalancer::Random => available[rand::random_range(0..available.len())],
        };

        Ok(self.handle(idx))
    }

    /// Handles for every resource, available or not.
    #[must_use]
    pub fn handles(&self) -> Vec<ResourceHandle> {
        (0..self.resources.len()).map(|i| self.handle(i)).collect()
    }

    fn handle(&self, idx: usize) -> ResourceHandle {
        ResourceHandle::new(
            Arc::clone(&self.datacenter),
            Arc::clone(self.resources[idx].service()),
        )
    }

    /// Flag one resource unavailable and record the cause.
    ///
    /// Returns `None` if the id is unknown, otherwise whether the flag flipped.
    pub fn mark_unavailable(&mut self, id: &str, cause: impl Into<String>) -> Option<bool> {
        self.resources
            .iter_mut()
            .find(|r| r.id() == id)
            .map(|r| r.mark_unavailable(cause.into()))
    }

    /// Flag every resource unavailable. Returns how many flags flipped.
    pub fn mark_all_unavailable(&mut self, cause: &str) -> usize {
        self.resources
            .iter_mut()
            .filter(|r| r.is_available())
            .map(|r| r.mark_unavailable(cause.to_string()))
            .filter(|flipped| *flipped)
            .count()
    }

    /// Flag one resource available again.
    ///
    /// Returns `None` if the id is unknown, otherwise whether the flag flipped.
    pub fn reinstate(&mut self, id: &str) -> Option<bool> {
        self.resources
            .iter_mut()
            .find(|r| r.id() == id)
            .map(LoadBalancingResource::reinstate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services(ids: &[&str]) -> Vec<Arc<Service>> {
        ids.iter()
            .map(|id| {
                Arc::new(
                    Service::http(
                        *id,
                        &format!("http://{id}.test:8080"),
                        &format!("http://{id}.test:8080/health"),
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    fn pool(ids: &[&str]) -> ResourcePool {
        ResourcePool::new("dc1", services(ids).iter())
    }

    #[test]
    fn test_load_balancer_default() {
        assert_eq!(LoadBalancer::default(), LoadBalancer::RoundRobin);
    }

    #[test]
    fn test_new_resources_are_available() {
        let pool = pool(&["n1", "n2"]);
        assert_eq!(pool.available_count(), 2);
        assert!(pool.has_available());
        assert!(pool.resource("n1").unwrap().last_failure_cause().is_none());
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let mut pool = pool(&["n1", "n2", "n3"]);

        let picks: Vec<String> = (0..6)
            .map(|_| {
                pool.next_available(LoadBalancer::RoundRobin)
                    .unwrap()
                    .id()
                    .to_string()
            })
            .collect();

        assert_eq!(picks, vec!["n1", "n2", "n3", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_round_robin_skips_unavailable() {
        let mut pool = pool(&["n1", "n2", "n3"]);
        pool.mark_unavailable("n2", "connection refused");

        for _ in 0..10 {
            let handle = pool.next_available(LoadBalancer::RoundRobin).unwrap();
            assert_ne!(handle.id(), "n2");
        }
    }

    #[test]
    fn test_failover_strategy_prefers_first_available() {
        let mut pool = pool(&["n1", "n2", "n3"]);
        assert_eq!(pool.next_available(LoadBalancer::Failover).unwrap().id(), "n1");
        assert_eq!(pool.next_available(LoadBalancer::Failover).unwrap().id(), "n1");

        pool.mark_unavailable("n1", "timeout");
        assert_eq!(pool.next_available(LoadBalancer::Failover).unwrap().id(), "n2");
    }

    #[test]
    fn test_random_strategy_only_returns_available() {
        let mut pool = pool(&["n1", "n2", "n3"]);
        pool.mark_unavailable("n1", "timeout");
        pool.mark_unavailable("n3", "timeout");

        for _ in 0..20 {
            assert_eq!(pool.next_available(LoadBalancer::Random).unwrap().id(), "n2");
        }
    }

    #[test]
    fn test_random_strategy_stays_in_bounds() {
        let mut pool = pool(&["n1", "n2", "n3", "n4"]);
        pool.mark_unavailable("n4", "timeout");

        let mut picked = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let handle = pool.next_available(LoadBalancer::Random).unwrap();
            picked.insert(handle.id().to_string());
        }

        assert!(!picked.contains("n4"));
        assert!(picked.len() > 1, "random selection never varied: {picked:?}");
    }

    #[test]
    fn test_no_resource_available() {
        let mut pool = pool(&["n1"]);
        pool.mark_unavailable("n1", "boom");

        match pool.next_available(LoadBalancer::RoundRobin) {
            Err(FailoverError::NoResourceAvailable(dc)) => assert_eq!(dc, "dc1"),
            other => panic!("Expected NoResourceAvailable, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_pool_has_nothing_available() {
        let mut pool = pool(&[]);
        assert!(pool.is_empty());
        assert!(pool.next_available(LoadBalancer::RoundRobin).is_err());
    }

    #[test]
    fn test_mark_unavailable_records_cause() {
        let mut pool = pool(&["n1", "n2"]);

        assert_eq!(pool.mark_unavailable("n1", "connection reset"), Some(true));
        assert_eq!(pool.mark_unavailable("n1", "second report"), Some(false));
        assert_eq!(pool.mark_unavailable("n9", "unknown"), None);

        let n1 = pool.resource("n1").unwrap();
        assert!(!n1.is_available());
        assert_eq!(n1.last_failure_cause(), Some("second report"));
        assert_eq!(n1.failure_count(), 2);
        assert!(n1.last_failure().is_some());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_mark_all_unavailable() {
        let mut pool = pool(&["n1", "n2", "n3"]);
        pool.mark_unavailable("n2", "timeout");

        assert_eq!(pool.mark_all_unavailable("datacenter failover"), 2);
        assert!(!pool.has_available());
        assert_eq!(
            pool.resource("n2").unwrap().last_failure_cause(),
            Some("timeout")
        );
    }

    #[test]
    fn test_reinstate() {
        let mut pool = pool(&["n1"]);
        pool.mark_unavailable("n1", "timeout");

        assert_eq!(pool.reinstate("n1"), Some(true));
        assert_eq!(pool.reinstate("n1"), Some(false));
        assert_eq!(pool.reinstate("n9"), None);

        let n1 = pool.resource("n1").unwrap();
        assert!(n1.is_available());
        assert!(n1.last_failure_cause().is_none());
        assert_eq!(n1.failure_count(), 1);
    }

    #[test]
    fn test_handle_exposes_endpoint_and_datacenter() {
        let mut pool = pool(&["n1"]);
        let handle = pool.next_available(LoadBalancer::RoundRobin).unwrap();

        assert_eq!(handle.datacenter(), "dc1");
        assert_eq!(handle.endpoint().host_str(), Some("n1.test"));
        assert_eq!(pool.handles(), vec![handle]);
    }
}
