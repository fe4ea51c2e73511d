// SPDX-License-Identifier: MIT OR Apache-2.0

//! A single reachable endpoint and its liveness probe.

use crate::error::{FailoverError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tonic::transport::{ClientTlsConfig, Endpoint};
use tracing::{debug, trace};
use url::Url;

/// Default upper bound for a single health probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Protocol spoken by a service endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Plain HTTP(S); probed with a `GET` on the health-check URL.
    #[default]
    Http,
    /// gRPC over HTTP/2; probed by establishing a channel.
    Grpc,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Grpc => write!(f, "grpc"),
        }
    }
}

/// One node of a datacenter.
///
/// A service is immutable once built. Its identity is the `id`, which is
/// unique within the owning datacenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    id: String,
    kind: ServiceKind,
    endpoint: Url,
    health_check_endpoint: Url,
    probe_timeout: Duration,
}

impl Service {
    /// Create a service from already parsed URLs.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: ServiceKind,
        endpoint: Url,
        health_check_endpoint: Url,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            endpoint,
            health_check_endpoint,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Create an HTTP-backed service.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if either URL is malformed.
    #[allow(clippy::result_large_err)]
    pub fn http(id: impl Into<String>, endpoint: &str, health_check: &str) -> Result<Self> {
        Self::parse(id.into(), ServiceKind::Http, endpoint, health_check)
    }

    /// Create a gRPC-backed service.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Config` if either URL is malformed.
    #[allow(clippy::result_large_err)]
    pub fn grpc(id: impl Into<String>, endpoint: &str, health_check: &str) -> Result<Self> {
        Self::parse(id.into(), ServiceKind::Grpc, endpoint, health_check)
    }

    #[allow(clippy::result_large_err)]
    fn parse(id: String, kind: ServiceKind, endpoint: &str, health_check: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            FailoverError::Config(format!("Invalid endpoint URL for service {id}: {e}"))
        })?;
        let health_check_endpoint = Url::parse(health_check).map_err(|e| {
            FailoverError::Config(format!("Invalid health check URL for service {id}: {e}"))
        })?;
        Ok(Self::new(id, kind, endpoint, health_check_endpoint))
    }

    /// Set the probe timeout.
    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// URL calls are sent to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn health_check_endpoint(&self) -> &Url {
        &self.health_check_endpoint
    }

    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probe the health-check endpoint.
    ///
    /// Any transport error, timeout or non-success status yields `false`.
    /// The probe never fails and never outlives the probe timeout by more
    /// than scheduling noise.
    pub async fn is_alive(&self) -> bool {
        let outcome = match self.kind {
            ServiceKind::Http => self.probe_http().await,
            ServiceKind::Grpc => self.probe_grpc().await,
        };

        match outcome {
            Ok(()) => {
                trace!(service = %self.id, kind = %self.kind, "health probe succeeded");
                true
            }
            Err(e) => {
                debug!(service = %self.id, kind = %self.kind, error = %e, "health probe failed");
                false
            }
        }
    }

    async fn probe_http(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(self.probe_timeout)
            .connect_timeout(self.probe_timeout)
            .build()?;

        let response = client
            .get(self.health_check_endpoint.clone())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(FailoverError::Status {
                status: status.as_u16(),
                message: "health check rejected".to_string(),
            })
        }
    }

    async fn probe_grpc(&self) -> Result<()> {
        let mut endpoint = Endpoint::from_shared(self.health_check_endpoint.to_string())
            .map_err(|e| FailoverError::Config(e.to_string()))?
            .connect_timeout(self.probe_timeout)
            .timeout(self.probe_timeout);

        if self.health_check_endpoint.scheme() == "https" {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_webpki_roots())?;
        }

        tokio::time::timeout(self.probe_timeout, endpoint.connect())
            .await
            .map_err(|_| FailoverError::Timeout(self.probe_timeout))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_service_parses_urls() {
        let service = Service::http(
            "n1",
            "https://n1.example.com/api/rest",
            "https://n1.example.com/health",
        )
        .unwrap();

        assert_eq!(service.id(), "n1");
        assert_eq!(service.kind(), ServiceKind::Http);
        assert_eq!(service.endpoint().host_str(), Some("n1.example.com"));
        assert_eq!(service.health_check_endpoint().path(), "/health");
        assert_eq!(service.probe_timeout(), DEFAULT_PROBE_TIMEOUT);
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let result = Service::grpc("n1", "not a url", "http://127.0.0.1:8080");
        match result {
            Err(FailoverError::Config(msg)) => assert!(msg.contains("n1")),
            other => panic!("Expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn test_service_kind_display() {
        assert_eq!(ServiceKind::Http.to_string(), "http");
        assert_eq!(ServiceKind::Grpc.to_string(), "grpc");
        assert_eq!(ServiceKind::default(), ServiceKind::Http);
    }

    #[tokio::test]
    async fn test_unreachable_http_service_is_not_alive() {
        let service = Service::http("n1", "http://127.0.0.1:1/", "http://127.0.0.1:1/health")
            .unwrap()
            .with_probe_timeout(Duration::from_millis(500));

        assert!(!service.is_alive().await);
    }

    #[tokio::test]
    async fn test_unreachable_grpc_service_is_not_alive() {
        let service = Service::grpc("n1", "http://127.0.0.1:1", "http://127.0.0.1:1")
            .unwrap()
            .with_probe_timeout(Duration::from_millis(500));

        assert!(!service.is_alive().await);
    }
}
