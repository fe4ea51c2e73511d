// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static description of every datacenter and node a client may use.

use crate::deployment::datacenter::ServiceDatacenter;
use crate::deployment::service::Service;
use crate::error::{FailoverError, Result};
use std::collections::BTreeMap;

/// Topology of a deployment: datacenters keyed by id plus an optional
/// preferred ("local") datacenter.
///
/// The topology is assembled once and handed to
/// [`ManagedServiceDeployment`](crate::deployment::ManagedServiceDeployment),
/// which never mutates it.
#[derive(Debug, Clone, Default)]
pub struct ServiceDeployment {
    datacenters: BTreeMap<String, ServiceDatacenter>,
    local_datacenter: Option<String>,
}

impl ServiceDeployment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datacenter, replacing any datacenter with the same id.
    pub fn add_datacenter(&mut self, datacenter: ServiceDatacenter) {
        self.datacenters
            .insert(datacenter.id().to_string(), datacenter);
    }

    /// Builder-style variant of [`add_datacenter`](Self::add_datacenter).
    #[must_use]
    pub fn datacenter_added(mut self, datacenter: ServiceDatacenter) -> Self {
        self.add_datacenter(datacenter);
        self
    }

    /// Add a service to an already registered datacenter.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if the datacenter is unknown.
    #[allow(clippy::result_large_err)]
    pub fn add_service(&mut self, datacenter_id: &str, service: Service) -> Result<()> {
        let datacenter = self.datacenters.get_mut(datacenter_id).ok_or_else(|| {
            FailoverError::Config(format!("Unknown datacenter: {datacenter_id}"))
        })?;
        datacenter.add_service(service);
        Ok(())
    }

    /// Set the preferred datacenter.
    ///
    /// The id is validated when the runtime is built, so the local
    /// datacenter may be named before it is added.
    pub fn set_local_datacenter(&mut self, id: impl Into<String>) {
        self.local_datacenter = Some(id.into());
    }

    /// Builder-style variant of [`set_local_datacenter`](Self::set_local_datacenter).
    #[must_use]
    pub fn with_local_datacenter(mut self, id: impl Into<String>) -> Self {
        self.set_local_datacenter(id);
        self
    }

    #[must_use]
    pub fn local_datacenter(&self) -> Option<&str> {
        self.local_datacenter.as_deref()
    }

    #[must_use]
    pub fn datacenter(&self, id: &str) -> Option<&ServiceDatacenter> {
        self.datacenters.get(id)
    }

    /// Datacenters ordered by id.
    pub fn datacenters(&self) -> impl Iterator<Item = &ServiceDatacenter> {
        self.datacenters.values()
    }

    /// Datacenter ids in ascending order.
    pub fn datacenter_ids(&self) -> impl Iterator<Item = &str> {
        self.datacenters.keys().map(String::as_str)
    }

    #[must_use]
    pub fn contains_datacenter(&self, id: &str) -> bool {
        self.datacenters.contains_key(id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datacenters.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datacenters.len()
    }

    /// Resolve the datacenter a fresh runtime starts in.
    ///
    /// The local datacenter wins when set; otherwise the smallest id is
    /// chosen so that the choice is reproducible.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if the topology is empty or the local
    /// datacenter is not part of it.
    #[allow(clippy::result_large_err)]
    pub fn initial_datacenter(&self) -> Result<&str> {
        match &self.local_datacenter {
            Some(local) if self.datacenters.contains_key(local) => Ok(local.as_str()),
            Some(local) => Err(FailoverError::Config(format!(
                "Local datacenter {local} is not part of the deployment"
            ))),
            None => self.datacenter_ids().next().ok_or_else(|| {
                FailoverError::Config("Deployment has no datacenters".to_string())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Service {
        Service::http(id, "http://127.0.0.1:8080", "http://127.0.0.1:8080/health").unwrap()
    }

    #[test]
    fn test_empty_topology() {
        let topology = ServiceDeployment::new();
        assert!(topology.is_empty());
        assert!(matches!(
            topology.initial_datacenter(),
            Err(FailoverError::Config(_))
        ));
    }

    #[test]
    fn test_add_service_to_known_datacenter() {
        let mut topology = ServiceDeployment::new()
            .datacenter_added(ServiceDatacenter::with_static_token("dc1", "t1"));

        topology.add_service("dc1", node("n1")).unwrap();
        assert_eq!(topology.datacenter("dc1").unwrap().service_count(), 1);
    }

    #[test]
    fn test_add_service_to_unknown_datacenter() {
        let mut topology = ServiceDeployment::new();
        let result = topology.add_service("dc9", node("n1"));
        assert!(matches!(result, Err(FailoverError::Config(_))));
    }

    #[test]
    fn test_initial_datacenter_prefers_local() {
        let topology = ServiceDeployment::new()
            .datacenter_added(ServiceDatacenter::with_static_token("dc1", "t1"))
            .datacenter_added(ServiceDatacenter::with_static_token("dc2", "t2"))
            .with_local_datacenter("dc2");

        assert_eq!(topology.initial_datacenter().unwrap(), "dc2");
    }

    #[test]
    fn test_initial_datacenter_defaults_to_smallest_id() {
        let topology = ServiceDeployment::new()
            .datacenter_added(ServiceDatacenter::with_static_token("us-west", "t1"))
            .datacenter_added(ServiceDatacenter::with_static_token("eu-central", "t2"))
            .datacenter_added(ServiceDatacenter::with_static_token("us-east", "t3"));

        assert_eq!(topology.initial_datacenter().unwrap(), "eu-central");
    }

    #[test]
    fn test_unknown_local_datacenter() {
        let topology = ServiceDeployment::new()
            .datacenter_added(ServiceDatacenter::with_static_token("dc1", "t1"))
            .with_local_datacenter("dc7");

        match topology.initial_datacenter() {
            Err(FailoverError::Config(msg)) => assert!(msg.contains("dc7")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }
}
