// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;
use thiserror::Error;

#[allow(clippy::result_large_err)]
#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A single node failed during a call.
    #[error("Resource {resource} in datacenter {datacenter} is unavailable: {cause}")]
    ResourceUnavailable {
        datacenter: String,
        resource: String,
        cause: String,
    },

    /// Every node of one datacenter is flagged unavailable.
    #[error("No resource available in datacenter {0}")]
    NoResourceAvailable(String),

    /// No datacenter of the deployment has an available node left.
    #[error("Deployment exhausted: no datacenter has an available resource")]
    DeploymentExhausted,

    #[error("Token lookup failed for datacenter {datacenter}: {message}")]
    Token { datacenter: String, message: String },

    #[error("API request failed: {0}")]
    Api(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl FailoverError {
    /// Returns `true` for errors after which the deployment can no longer serve calls.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, FailoverError::DeploymentExhausted)
    }
}

pub type Result<T> = std::result::Result<T, FailoverError>;
