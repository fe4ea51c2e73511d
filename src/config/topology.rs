// SPDX-License-Identifier: MIT OR Apache-2.0

//! YAML topology file parser
//!
//! A topology file lists datacenters, the nodes of each datacenter and
//! where each datacenter's token comes from.
//!
//! # Example
//!
//! ```
//! use dc_failover_rs::config::TopologyConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TopologyConfig::from_yaml(r#"
//! local_datacenter: dc1
//! datacenters:
//!   dc1:
//!     token: secret
//!     services:
//!       - id: n1
//!         endpoint: http://10.0.0.1:8082
//! "#)?;
//!
//! let topology = config.into_deployment()?;
//! assert_eq!(topology.local_datacenter(), Some("dc1"));
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::deployment::{
    EnvTokenProvider, Service, ServiceDatacenter, ServiceDeployment, ServiceKind,
    StaticTokenProvider, TokenProvider,
};
use crate::error::{FailoverError, Result};

/// Environment variable overriding the topology file path.
pub const ENV_CONFIG: &str = "DCFAILOVER_CONFIG";

/// Environment variable overriding the preferred datacenter.
pub const ENV_LOCAL_DATACENTER: &str = "DCFAILOVER_LOCAL_DATACENTER";

/// Represents the entire topology file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologyConfig {
    /// Preferred datacenter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_datacenter: Option<String>,

    /// Health probe timeout applied to every service, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_timeout_ms: Option<u64>,

    /// Map of datacenter ids to their configuration
    pub datacenters: BTreeMap<String, DatacenterConfig>,
}

/// Configuration for a single datacenter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatacenterConfig {
    /// Static token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Name of an environment variable holding the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Nodes of the datacenter
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Configuration for a single node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub id: String,

    #[serde(default)]
    pub kind: ServiceKind,

    pub endpoint: String,

    /// Health-check URL; defaults to the endpoint itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
}

impl TopologyConfig {
    /// Load the topology from the default location (~/.dcfailover/topology.yaml)
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined or the
    /// file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn load_default() -> Result<Self> {
        Self::load_from_path(Self::default_path()?)
    }

    /// Load the topology from `DCFAILOVER_CONFIG` (or the default path) and
    /// apply `DCFAILOVER_LOCAL_DATACENTER` if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be located, read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn load_with_env() -> Result<Self> {
        let config = Self::load_from_path(Self::config_path()?)?;
        Ok(config.with_local_override(std::env::var(ENV_LOCAL_DATACENTER).ok()))
    }

    /// Load the topology from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is malformed YAML.
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            FailoverError::Config(format!(
                "Failed to read topology file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse the topology from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FailoverError::Config(format!("Failed to parse topology YAML: {}", e)))
    }

    /// Get the default topology path (~/.dcfailover/topology.yaml)
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined
    #[allow(clippy::result_large_err)]
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            FailoverError::Config("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".dcfailover").join("topology.yaml"))
    }

    /// Get the topology path, respecting the `DCFAILOVER_CONFIG` environment variable
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined when the
    /// variable is not set
    #[allow(clippy::result_large_err)]
    pub fn config_path() -> Result<PathBuf> {
        match std::env::var(ENV_CONFIG) {
            Ok(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Self::default_path(),
        }
    }

    /// Replace the preferred datacenter when `local` is a non-empty id.
    #[must_use]
    pub fn with_local_override(mut self, local: Option<String>) -> Self {
        if let Some(local) = local.filter(|l| !l.is_empty()) {
            self.local_datacenter = Some(local);
        }
        self
    }

    /// List all datacenter ids in ascending order
    pub fn datacenter_ids(&self) -> Vec<&String> {
        self.datacenters.keys().collect()
    }

    /// Build the topology described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if a datacenter names no token source
    /// or both, a service id repeats within a datacenter, or a URL is invalid.
    #[allow(clippy::result_large_err)]
    pub fn into_deployment(&self) -> Result<ServiceDeployment> {
        let mut topology = ServiceDeployment::new();

        for (id, dc) in &self.datacenters {
            let mut datacenter = ServiceDatacenter::new(id.clone(), dc.token_provider(id)?);
            let mut seen = BTreeSet::new();

            for service in &dc.services {
                if !seen.insert(service.id.as_str()) {
                    return Err(FailoverError::Config(format!(
                        "Duplicate service {} in datacenter {}",
                        service.id, id
                    )));
                }
                let mut built = service.build()?;
                if let Some(ms) = self.probe_timeout_ms {
                    built = built.with_probe_timeout(Duration::from_millis(ms));
                }
                datacenter.add_service(built);
            }

            topology.add_datacenter(datacenter);
        }

        if let Some(local) = &self.local_datacenter {
            topology.set_local_datacenter(local.clone());
        }

        Ok(topology)
    }
}

impl DatacenterConfig {
    #[allow(clippy::result_large_err)]
    fn token_provider(&self, datacenter: &str) -> Result<Arc<dyn TokenProvider>> {
        match (&self.token, &self.token_env) {
            (Some(token), None) => Ok(Arc::new(StaticTokenProvider::new(token.clone()))),
            (None, Some(variable)) => Ok(Arc::new(EnvTokenProvider::new(variable.clone()))),
            (Some(_), Some(_)) => Err(FailoverError::Config(format!(
                "Datacenter {datacenter} sets both token and token_env"
            ))),
            (None, None) => Err(FailoverError::Config(format!(
                "Datacenter {datacenter} has no token or token_env"
            ))),
        }
    }
}

impl ServiceConfig {
    #[allow(clippy::result_large_err)]
    fn build(&self) -> Result<Service> {
        let health_check = self.health_check.as_deref().unwrap_or(&self.endpoint);
        match self.kind {
            ServiceKind::Http => Service::http(self.id.clone(), &self.endpoint, health_check),
            ServiceKind::Grpc => Service::grpc(self.id.clone(), &self.endpoint, health_check),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str = r#"
local_datacenter: eu-west
probe_timeout_ms: 750
datacenters:
  eu-west:
    token: AstraCS:eu-west-token
    services:
      - id: n1
        endpoint: https://n1.eu-west.example.com/api/rest
        health_check: https://n1.eu-west.example.com/health
      - id: n2
        kind: grpc
        endpoint: https://n2.eu-west.example.com:8090
  us-east:
    token_env: US_EAST_TOKEN
    services:
      - id: n3
        endpoint: https://n3.us-east.example.com/api/rest
"#;

    #[test]
    fn test_parse_basic_config() {
        let config = TopologyConfig::from_yaml(SAMPLE_CONFIG).unwrap();

        assert_eq!(config.local_datacenter, Some("eu-west".to_string()));
        assert_eq!(config.probe_timeout_ms, Some(750));
        assert_eq!(config.datacenters.len(), 2);
        assert_eq!(config.datacenter_ids(), vec!["eu-west", "us-east"]);

        let eu = &config.datacenters["eu-west"];
        assert_eq!(eu.services[0].kind, ServiceKind::Http);
        assert_eq!(eu.services[1].kind, ServiceKind::Grpc);
        assert!(eu.services[1].health_check.is_none());
    }

    #[test]
    fn test_into_deployment() {
        let topology = TopologyConfig::from_yaml(SAMPLE_CONFIG)
            .unwrap()
            .into_deployment()
            .unwrap();

        assert_eq!(topology.local_datacenter(), Some("eu-west"));
        let eu = topology.datacenter("eu-west").unwrap();
        assert_eq!(eu.token().unwrap(), "AstraCS:eu-west-token");

        let n2 = eu.service("n2").unwrap();
        assert_eq!(n2.kind(), ServiceKind::Grpc);
        assert_eq!(n2.health_check_endpoint(), n2.endpoint());
        assert_eq!(n2.probe_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_missing_token_source() {
        let yaml = r#"
datacenters:
  dc1:
    services:
      - id: n1
        endpoint: http://127.0.0.1:8082
"#;
        let result = TopologyConfig::from_yaml(yaml).unwrap().into_deployment();
        match result {
            Err(FailoverError::Config(msg)) => assert!(msg.contains("dc1")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_token_sources() {
        let yaml = r#"
datacenters:
  dc1:
    token: a
    token_env: B
"#;
        let result = TopologyConfig::from_yaml(yaml).unwrap().into_deployment();
        assert!(matches!(result, Err(FailoverError::Config(_))));
    }

    #[test]
    fn test_duplicate_service_ids() {
        let yaml = r#"
datacenters:
  dc1:
    token: a
    services:
      - id: n1
        endpoint: http://127.0.0.1:8082
      - id: n1
        endpoint: http://127.0.0.1:8083
"#;
        let result = TopologyConfig::from_yaml(yaml).unwrap().into_deployment();
        match result {
            Err(FailoverError::Config(msg)) => assert!(msg.contains("Duplicate service n1")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_endpoint() {
        let yaml = r#"
datacenters:
  dc1:
    token: a
    services:
      - id: n1
        endpoint: "::not a url::"
"#;
        let result = TopologyConfig::from_yaml(yaml).unwrap().into_deployment();
        assert!(matches!(result, Err(FailoverError::Config(_))));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = TopologyConfig::from_yaml("datacenters: [unterminated");
        assert!(matches!(result, Err(FailoverError::Config(_))));
    }

    #[test]
    fn test_local_override() {
        let config = TopologyConfig::from_yaml(SAMPLE_CONFIG).unwrap();

        let unchanged = config.clone().with_local_override(Some(String::new()));
        assert_eq!(unchanged.local_datacenter, Some("eu-west".to_string()));

        let overridden = config.with_local_override(Some("us-east".to_string()));
        assert_eq!(overridden.local_datacenter, Some("us-east".to_string()));
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.yaml");
        std::fs::write(&path, SAMPLE_CONFIG).unwrap();

        let config = TopologyConfig::load_from_path(&path).unwrap();
        assert_eq!(config.datacenters.len(), 2);
    }

    #[test]
    fn test_load_from_missing_path() {
        let result = TopologyConfig::load_from_path("/nonexistent/dcfailover/topology.yaml");
        match result {
            Err(FailoverError::Config(msg)) => assert!(msg.contains("Failed to read topology file")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_yaml_round_trip_keeps_optional_fields_out() {
        let config = TopologyConfig::from_yaml(SAMPLE_CONFIG).unwrap();
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("token_env: null"));
        assert_eq!(TopologyConfig::from_yaml(&yaml).unwrap(), config);
    }
}
