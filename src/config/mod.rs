// SPDX-License-Identifier: MIT OR Apache-2.0

//! Topology configuration for managed deployments.
//!
//! This module turns a YAML description of datacenters, nodes and token
//! sources into a [`ServiceDeployment`](crate::deployment::ServiceDeployment).
//!
//! # Environment Variables
//!
//! The following environment variables are supported:
//!
//! - `DCFAILOVER_CONFIG` - Path to the topology file (default: `~/.dcfailover/topology.yaml`)
//! - `DCFAILOVER_LOCAL_DATACENTER` - Override the preferred datacenter
//!
//! # Example
//!
//! ```no_run
//! use dc_failover_rs::config::TopologyConfig;
//! use dc_failover_rs::ManagedServiceDeployment;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TopologyConfig::load_with_env()?;
//! let deployment = ManagedServiceDeployment::new(config.into_deployment()?)?;
//! println!("Routing to {}", deployment.current_datacenter());
//! # Ok(())
//! # }
//! ```

mod topology;

pub use topology::{
    DatacenterConfig, ServiceConfig, TopologyConfig, ENV_CONFIG, ENV_LOCAL_DATACENTER,
};
