// SPDX-License-Identifier: MIT OR Apache-2.0

//! Datacenters and the token providers attached to them.

use crate::deployment::service::Service;
use crate::error::{FailoverError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Supplies the credential used for calls into one datacenter.
///
/// Caching and refresh are the provider's concern.
pub trait TokenProvider: Send + Sync {
    /// Return the current token.
    #[allow(clippy::result_large_err)]
    fn token(&self) -> Result<String>;
}

/// A token that never changes.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Reads the token from an environment variable on every lookup.
#[derive(Debug, Clone)]
pub struct EnvTokenProvider {
    variable: String,
}

impl EnvTokenProvider {
    #[must_use]
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    /// Name of the environment variable.
    #[must_use]
    pub fn variable(&self) -> &str {
        &self.variable
    }
}

impl TokenProvider for EnvTokenProvider {
    fn token(&self) -> Result<String> {
        match std::env::var(&self.variable) {
            Ok(token) if !token.is_empty() => Ok(token),
            Ok(_) => Err(FailoverError::Token {
                datacenter: String::new(),
                message: format!("environment variable {} is empty", self.variable),
            }),
            Err(e) => Err(FailoverError::Token {
                datacenter: String::new(),
                message: format!("environment variable {}: {e}", self.variable),
            }),
        }
    }
}

/// A named group of services sharing one token provider.
#[derive(Clone)]
pub struct ServiceDatacenter {
    id: String,
    token_provider: Arc<dyn TokenProvider>,
    services: BTreeMap<String, Arc<Service>>,
}

impl ServiceDatacenter {
    /// Create an empty datacenter.
    #[must_use]
    pub fn new(id: impl Into<String>, token_provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            id: id.into(),
            token_provider,
            services: BTreeMap::new(),
        }
    }

    /// Create an empty datacenter authenticated with a static token.
    #[must_use]
    pub fn with_static_token(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(id, Arc::new(StaticTokenProvider::new(token)))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a service, replacing any service with the same id.
    pub fn add_service(&mut self, service: Service) {
        self.services
            .insert(service.id().to_string(), Arc::new(service));
    }

    /// Builder-style variant of [`add_service`](Self::add_service).
    #[must_use]
    pub fn service_added(mut self, service: Service) -> Self {
        self.add_service(service);
        self
    }

    #[must_use]
    pub fn service(&self, id: &str) -> Option<&Arc<Service>> {
        self.services.get(id)
    }

    /// Services ordered by id.
    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn token_provider(&self) -> &Arc<dyn TokenProvider> {
        &self.token_provider
    }

    /// Fetch the current token, tagging failures with this datacenter's id.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::Token` if the provider cannot supply a token.
    #[allow(clippy::result_large_err)]
    pub fn token(&self) -> Result<String> {
        self.token_provider.token().map_err(|e| match e {
            FailoverError::Token { message, .. } => FailoverError::Token {
                datacenter: self.id.clone(),
                message,
            },
            other => FailoverError::Token {
                datacenter: self.id.clone(),
                message: other.to_string(),
            },
        })
    }
}

impl fmt::Debug for ServiceDatacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDatacenter")
            .field("id", &self.id)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Service {
        Service::http(
            id,
            &format!("http://{id}.test:8080"),
            &format!("http://{id}.test:8080/health"),
        )
        .unwrap()
    }

    #[test]
    fn test_add_service_is_upsert() {
        let mut dc = ServiceDatacenter::with_static_token("dc1", "secret");
        dc.add_service(node("n1"));
        dc.add_service(node("n2"));
        assert_eq!(dc.service_count(), 2);

        let replacement = Service::http("n1", "http://other.test:9090", "http://other.test:9090")
            .unwrap();
        dc.add_service(replacement);

        assert_eq!(dc.service_count(), 2);
        assert_eq!(
            dc.service("n1").unwrap().endpoint().host_str(),
            Some("other.test")
        );
    }

    #[test]
    fn test_missing_service() {
        let dc = ServiceDatacenter::with_static_token("dc1", "secret").service_added(node("n1"));
        assert!(dc.service("n9").is_none());
    }

    #[test]
    fn test_services_ordered_by_id() {
        let dc = ServiceDatacenter::with_static_token("dc1", "secret")
            .service_added(node("n3"))
            .service_added(node("n1"))
            .service_added(node("n2"));

        let ids: Vec<&str> = dc.services().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["n1", "n2", "n3"]);
    }

    #[test]
    fn test_static_token() {
        let dc = ServiceDatacenter::with_static_token("dc1", "secret");
        assert_eq!(dc.token().unwrap(), "secret");
    }

    #[test]
    fn test_static_token_debug_is_redacted() {
        let provider = StaticTokenProvider::new("secret");
        let debug = format!("{provider:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_env_token_missing_is_tagged_with_datacenter() {
        let dc = ServiceDatacenter::new(
            "dc-east",
            Arc::new(EnvTokenProvider::new("DCFAILOVER_TEST_TOKEN_THAT_IS_NEVER_SET")),
        );

        match dc.token() {
            Err(FailoverError::Token { datacenter, message }) => {
                assert_eq!(datacenter, "dc-east");
                assert!(message.contains("DCFAILOVER_TEST_TOKEN_THAT_IS_NEVER_SET"));
            }
            other => panic!("Expected Token error, got {other:?}"),
        }
    }
}
