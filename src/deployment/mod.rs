// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deployment topology and the runtime that routes calls across it.
//!
//! Leaves first:
//! - [`Service`]: one endpoint and its liveness probe
//! - [`ServiceDatacenter`]: services sharing a token provider
//! - [`ServiceDeployment`]: the immutable topology
//! - [`ResourcePool`]: per-datacenter availability and node selection
//! - [`ManagedServiceDeployment`]: current datacenter, failover, lookups

mod datacenter;
mod managed;
mod resource;
mod service;
mod topology;

pub use datacenter::{EnvTokenProvider, ServiceDatacenter, StaticTokenProvider, TokenProvider};
pub use managed::{DatacenterClient, DeploymentConfig, ManagedServiceDeployment};
pub use resource::{LoadBalancer, LoadBalancingResource, ResourceHandle, ResourcePool};
pub use service::{Service, ServiceKind, DEFAULT_PROBE_TIMEOUT};
pub use topology::ServiceDeployment;
