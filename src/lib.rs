// SPDX-License-Identifier: MIT OR Apache-2.0

pub mod config;
pub mod deployment;
pub mod error;
pub mod runtime;
pub mod testkit;

pub use config::TopologyConfig;
pub use deployment::{
    DeploymentConfig, ManagedServiceDeployment, ResourceHandle, Service, ServiceDatacenter,
    ServiceDeployment,
};
pub use error::FailoverError;
