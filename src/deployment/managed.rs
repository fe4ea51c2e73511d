// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime orchestrator for a multi-datacenter deployment.
//!
//! [`ManagedServiceDeployment`] owns the mutable side of a topology: the
//! current datacenter pointer and the availability flag of every node.
//! Both live behind a single mutex, so a failover decision is always taken
//! against one consistent snapshot and concurrent callers observe flag
//! flips immediately.
//!
//! # Example
//!
//! ```
//! use dc_failover_rs::deployment::{
//!     ManagedServiceDeployment, Service, ServiceDatacenter, ServiceDeployment,
//! };
//!
//! # fn main() -> Result<(), dc_failover_rs::FailoverError> {
//! let topology = ServiceDeployment::new()
//!     .datacenter_added(
//!         ServiceDatacenter::with_static_token("dc1", "token-1")
//!             .service_added(Service::http("n1", "http://10.0.0.1:8082", "http://10.0.0.1:8082/health")?),
//!     )
//!     .datacenter_added(
//!         ServiceDatacenter::with_static_token("dc2", "token-2")
//!             .service_added(Service::http("n2", "http://10.1.0.1:8082", "http://10.1.0.1:8082/health")?),
//!     )
//!     .with_local_datacenter("dc1");
//!
//! let deployment = ManagedServiceDeployment::new(topology)?;
//! let node = deployment.lookup_resource()?;
//! assert_eq!(node.datacenter(), "dc1");
//!
//! deployment.failover_node(&node, "connection refused");
//! assert_eq!(deployment.failover_datacenter()?, "dc2");
//! assert_eq!(deployment.lookup_token()?, "token-2");
//! # Ok(())
//! # }
//! ```

use crate::deployment::datacenter::TokenProvider;
use crate::deployment::resource::{LoadBalancer, LoadBalancingResource, ResourceHandle, ResourcePool};
use crate::deployment::topology::ServiceDeployment;
use crate::error::{FailoverError, Result};
use crate::runtime::{CallContext, DeploymentListener, LoggingListener, RetryConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, trace};

const DATACENTER_FAILOVER_CAUSE: &str = "datacenter failover";

/// Construction-time settings of a managed deployment.
#[derive(Clone)]
pub struct DeploymentConfig {
    /// Retry policy used by [`ManagedServiceDeployment::execute`].
    pub retry: RetryConfig,
    /// Receives failover events.
    pub listener: Arc<dyn DeploymentListener>,
    /// Node selection strategy inside a datacenter.
    pub load_balancer: LoadBalancer,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            listener: Arc::new(LoggingListener::default()),
            load_balancer: LoadBalancer::RoundRobin,
        }
    }
}

impl DeploymentConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn DeploymentListener>) -> Self {
        self.listener = listener;
        self
    }

    #[must_use]
    pub fn with_load_balancer(mut self, lb: LoadBalancer) -> Self {
        self.load_balancer = lb;
        self
    }
}

impl fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("retry", &self.retry)
            .field("load_balancer", &self.load_balancer)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the current datacenter: its token provider and the
/// availability of each of its nodes at the time of the call.
#[derive(Clone)]
pub struct DatacenterClient {
    id: String,
    token_provider: Arc<dyn TokenProvider>,
    resources: Vec<LoadBalancingResource>,
}

impl DatacenterClient {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fetch a token from the datacenter's provider.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Token` if the provider fails.
    #[allow(clippy::result_large_err)]
    pub fn token(&self) -> Result<String> {
        self.token_provider
            .token()
            .map_err(|e| FailoverError::Token {
                datacenter: self.id.clone(),
                message: e.to_string(),
            })
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
    pub fn available_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_available()).count()
    }
}

impl fmt::Debug for DatacenterClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatacenterClient")
            .field("id", &self.id)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct DeploymentState {
    current: String,
    pools: BTreeMap<String, ResourcePool>,
    /// Datacenter abandoned by the failover that selected `current`. Cleared
    /// once a failure is reported against `current` or it is changed by hand.
    settled_from: Option<String>,
}

impl DeploymentState {
    /// Flag every node of `from` unavailable and move to the first
    /// datacenter (by id) that still has an available node.
    fn fail_over_from(&mut self, from: &str) -> Option<String> {
        if let Some(pool) = self.pools.get_mut(from) {
            pool.mark_all_unavailable(DATACENTER_FAILOVER_CAUSE);
        }

        let next = self
            .pools
            .iter()
            .find(|(_, pool)| pool.has_available())
            .map(|(id, _)| id.clone())?;

        self.current.clone_from(&next);
        self.settled_from = Some(from.to_string());
        Some(next)
    }
}

enum Event {
    NodeFailover(ResourceHandle, String),
    DatacenterFailover(String, String),
    DatacenterSelected(String, String),
    Exhausted(String),
    Reinstated(ResourceHandle),
}

/// Runtime view of a [`ServiceDeployment`].
///
/// Created once per client and shared (usually through an `Arc`) by every
/// concurrent call the client issues.
pub struct ManagedServiceDeployment {
    topology: ServiceDeployment,
    config: DeploymentConfig,
    state: Mutex<DeploymentState>,
}

impl ManagedServiceDeployment {
    /// Create a runtime with default configuration.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if the topology is empty or its local
    /// datacenter is unknown.
    #[allow(clippy::result_large_err)]
    pub fn new(topology: ServiceDeployment) -> Result<Self> {
        Self::with_config(topology, DeploymentConfig::default())
    }

    /// Create a runtime with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if the topology is empty or its local
    /// datacenter is unknown.
    #[allow(clippy::result_large_err)]
    pub fn with_config(topology: ServiceDeployment, config: DeploymentConfig) -> Result<Self> {
        let current = topology.initial_datacenter()?.to_string();
        let pools = topology
            .datacenters()
            .map(|dc| (dc.id().to_string(), ResourcePool::new(dc.id(), dc.services())))
            .collect();

        debug!(
            datacenter = %current,
            datacenters = topology.len(),
            "managed deployment created"
        );

        Ok(Self {
            topology,
            config,
            state: Mutex::new(DeploymentState {
                current,
                pools,
                settled_from: None,
            }),
        })
    }

    #[must_use]
    pub fn topology(&self) -> &ServiceDeployment {
        &self.topology
    }

    #[must_use]
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DeploymentState> {
        // A panicking listener never runs under the lock, so the state is
        // still consistent after poisoning.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<Event>) {
        let listener = &self.config.listener;
        for event in events {
            match event {
                Event::NodeFailover(resource, cause) => listener.on_node_failover(&resource, &cause),
                Event::DatacenterFailover(from, to) => listener.on_datacenter_failover(&from, &to),
                Event::DatacenterSelected(from, to) => listener.on_datacenter_selected(&from, &to),
                Event::Exhausted(last) => listener.on_exhausted(&last),
                Event::Reinstated(resource) => listener.on_reinstated(&resource),
            }
        }
    }

    /// Id of the datacenter calls are currently routed to.
    #[must_use]
    pub fn current_datacenter(&self) -> String {
        self.lock().current.clone()
    }

    /// Route subsequent calls to `id`.
    ///
    /// Selecting the current datacenter is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if `id` is not part of the topology;
    /// the current datacenter is left unchanged.
    #[allow(clippy::result_large_err)]
    pub fn use_datacenter(&self, id: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.pools.contains_key(id) {
            return Err(FailoverError::Config(format!("Unknown datacenter: {id}")));
        }
        if state.current == id {
            return Ok(());
        }

        let previous = std::mem::replace(&mut state.current, id.to_string());
        state.settled_from = None;
        drop(state);

        debug!(from = %previous, to = id, "datacenter selected");
        self.emit(vec![Event::DatacenterSelected(previous, id.to_string())]);
        Ok(())
    }

    /// Snapshot of the current datacenter.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Unknown` if the current datacenter is missing
    /// from the topology, which would mean an internal invariant was broken.
    #[allow(clippy::result_large_err)]
    pub fn local_datacenter_client(&self) -> Result<DatacenterClient> {
        let state = self.lock();
        let datacenter = self.topology.datacenter(&state.current);
        let pool = state.pools.get(&state.current);

        match (datacenter, pool) {
            (Some(datacenter), Some(pool)) => Ok(DatacenterClient {
                id: state.current.clone(),
                token_provider: Arc::clone(datacenter.token_provider()),
                resources: pool.resources().to_vec(),
            }),
            _ => Err(FailoverError::Unknown(format!(
                "current datacenter {} is not part of the topology",
                state.current
            ))),
        }
    }

    /// Token for the current datacenter.
    ///
    /// The provider is called outside the deployment lock.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Token` if the provider fails.
    #[allow(clippy::result_large_err)]
    pub fn lookup_token(&self) -> Result<String> {
        let current = self.current_datacenter();
        self.token_for(&current)
    }

    /// Token for a specific datacenter.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` for an unknown datacenter and
    /// `FailoverError::Token` if the provider fails.
    #[allow(clippy::result_large_err)]
    pub fn token_for(&self, datacenter_id: &str) -> Result<String> {
        self.topology
            .datacenter(datacenter_id)
            .ok_or_else(|| FailoverError::Config(format!("Unknown datacenter: {datacenter_id}")))?
            .token()
    }

    /// Pick a node of the current datacenter.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::NoResourceAvailable` if every node of the
    /// current datacenter is flagged unavailable.
    #[allow(clippy::result_large_err)]
    pub fn lookup_resource(&self) -> Result<ResourceHandle> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let pool = state.pools.get_mut(&state.current).ok_or_else(|| {
            FailoverError::Unknown(format!(
                "current datacenter {} is not part of the topology",
                state.current
            ))
        })?;

        let resource = pool.next_available(self.config.load_balancer)?;
        trace!(
            datacenter = resource.datacenter(),
            resource = resource.id(),
            "resource selected"
        );
        Ok(resource)
    }

    /// Whether the node behind `resource` is currently flagged available.
    #[must_use]
    pub fn is_available(&self, resource: &ResourceHandle) -> bool {
        self.lock()
            .pools
            .get(resource.datacenter())
            .and_then(|pool| pool.resource(resource.id()))
            .is_some_and(LoadBalancingResource::is_available)
    }

    /// Flag a node unavailable after a failed call.
    ///
    /// The caller retries by looking up another resource. Reporting the
    /// same node twice only updates the recorded cause.
    pub fn failover_node(&self, resource: &ResourceHandle, cause: &str) {
        let flipped = {
            let mut state = self.lock();
            let flipped = state
                .pools
                .get_mut(resource.datacenter())
                .and_then(|pool| pool.mark_unavailable(resource.id(), cause));
            if flipped.is_some() && state.current == resource.datacenter() {
                state.settled_from = None;
            }
            flipped
        };

        match flipped {
            Some(true) => {
                debug!(
                    datacenter = resource.datacenter(),
                    resource = resource.id(),
                    cause,
                    "resource marked unavailable"
                );
                self.emit(vec![Event::NodeFailover(resource.clone(), cause.to_string())]);
            }
            Some(false) => {}
            None => debug!(
                datacenter = resource.datacenter(),
                resource = resource.id(),
                "failover reported for a resource outside this deployment"
            ),
        }
    }

    /// Abandon the current datacenter.
    ///
    /// Every node of the current datacenter is flagged unavailable and calls
    /// move to the first datacenter (by id) that still has an available node.
    /// Returns the new current datacenter.
    ///
    /// When the current datacenter was itself reached through a failover and
    /// no failure has been reported against it since, the call changes
    /// nothing and returns its id. Callers racing on one outage therefore
    /// produce a single switch. Use [`failover_datacenter_from`] to name the
    /// datacenter explicitly.
    ///
    /// [`failover_datacenter_from`]: Self::failover_datacenter_from
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::DeploymentExhausted` if no datacenter has an
    /// available node left. The current datacenter is left unchanged.
    #[allow(clippy::result_large_err)]
    pub fn failover_datacenter(&self) -> Result<String> {
        let state = self.lock();
        if let Some(abandoned) = &state.settled_from {
            trace!(
                abandoned = %abandoned,
                current = %state.current,
                "datacenter failover already applied"
            );
            return Ok(state.current.clone());
        }
        let from = state.current.clone();
        self.fail_over_locked(state, from)
    }

    /// Abandon `observed_id` if calls are still routed to it.
    ///
    /// Callers that saw a datacenter fail pass its id; when several of them
    /// race, the first one switches and the others find the pointer already
    /// moved and return the new current datacenter without side effects.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::DeploymentExhausted` if no datacenter has an
    /// available node left.
    #[allow(clippy::result_large_err)]
    pub fn failover_datacenter_from(&self, observed_id: &str) -> Result<String> {
        let state = self.lock();
        if state.current != observed_id {
            trace!(
                observed = observed_id,
                current = %state.current,
                "datacenter already failed over"
            );
            return Ok(state.current.clone());
        }
        self.fail_over_locked(state, observed_id.to_string())
    }

    #[allow(clippy::result_large_err)]
    fn fail_over_locked(
        &self,
        mut state: MutexGuard<'_, DeploymentState>,
        from: String,
    ) -> Result<String> {
        let outcome = state.fail_over_from(&from);
        drop(state);

        match outcome {
            Some(to) => {
                debug!(from = %from, to = %to, "datacenter failover");
                self.emit(vec![Event::DatacenterFailover(from, to.clone())]);
                Ok(to)
            }
            None => {
                debug!(last = %from, "deployment exhausted");
                self.emit(vec![Event::Exhausted(from)]);
                Err(FailoverError::DeploymentExhausted)
            }
        }
    }

    /// Datacenters with at least one available node.
    #[must_use]
    pub fn available_datacenters(&self) -> BTreeSet<String> {
        self.lock()
            .pools
            .iter()
            .filter(|(_, pool)| pool.has_available())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Datacenters without any available node.
    #[must_use]
    pub fn unavailable_datacenters(&self) -> BTreeSet<String> {
        self.lock()
            .pools
            .iter()
            .filter(|(_, pool)| !pool.has_available())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Flag a node available again.
    ///
    /// Nothing in this crate calls this on its own; an external health-check
    /// scheduler decides when a node has recovered.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if the datacenter or node is unknown.
    #[allow(clippy::result_large_err)]
    pub fn reinstate_resource(&self, datacenter_id: &str, resource_id: &str) -> Result<()> {
        let mut state = self.lock();
        let pool = state.pools.get_mut(datacenter_id).ok_or_else(|| {
            FailoverError::Config(format!("Unknown datacenter: {datacenter_id}"))
        })?;
        let flipped = pool.reinstate(resource_id).ok_or_else(|| {
            FailoverError::Config(format!(
                "Unknown resource {resource_id} in datacenter {datacenter_id}"
            ))
        })?;
        let handle = pool
            .handles()
            .into_iter()
            .find(|h| h.id() == resource_id);
        drop(state);

        if let (true, Some(handle)) = (flipped, handle) {
            debug!(datacenter = datacenter_id, resource = resource_id, "resource reinstated");
            self.emit(vec![Event::Reinstated(handle)]);
        }
        Ok(())
    }

    /// Probe every unavailable node once and reinstate those that answer.
    ///
    /// Probes run concurrently and outside the deployment lock. Returns the
    /// reinstated nodes.
    pub async fn probe_unavailable(&self) -> Vec<ResourceHandle> {
        let candidates: Vec<ResourceHandle> = {
            let state = self.lock();
            state
                .pools
                .values()
                .flat_map(|pool| {
                    pool.handles()
                        .into_iter()
                        .zip(pool.resources())
                        .filter(|(_, r)| !r.is_available())
                        .map(|(h, _)| h)
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        let mut probes = JoinSet::new();
        for handle in candidates {
            probes.spawn(async move {
                let alive = handle.service().is_alive().await;
                (handle, alive)
            });
        }

        let mut reinstated = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((handle, true)) => {
                    if self
                        .reinstate_resource(handle.datacenter(), handle.id())
                        .is_ok()
                    {
                        reinstated.push(handle);
                    }
                }
                Ok((_, false)) => {}
                Err(e) => debug!(error = %e, "health probe task failed"),
            }
        }

        reinstated.sort_by(|a, b| (a.datacenter(), a.id()).cmp(&(b.datacenter(), b.id())));
        reinstated
    }

    /// Run one logical call with the configured retry policy.
    ///
    /// See [`RetryConfig::execute`].
    ///
    /// # Errors
    ///
    /// Returns the error chosen by the retry policy, or
    /// `FailoverError::DeploymentExhausted`.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.config.retry.execute(self, operation).await
    }
}

impl fmt::Debug for ManagedServiceDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedServiceDeployment")
            .field("topology", &self.topology)
            .field("config", &self.config)
            .field("state", &*self.lock())
            .finish()
    }
}
