// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry policies, outcome classification and the failover executor.
//!
//! A failed call is first reduced to a [`CallOutcome`], then a
//! [`RetryPolicy`] maps that outcome to a [`FailoverAction`]. Client
//! errors are never retried blindly: only outcomes the policy names as
//! transient lead to another attempt.
//!
//! # Example
//!
//! ```
//! use dc_failover_rs::runtime::{ExponentialBackoff, RetryConfig};
//! use std::time::Duration;
//!
//! let retry = RetryConfig::builder()
//!     .max_attempts(5)
//!     .backoff(ExponentialBackoff::new(Duration::from_millis(50)))
//!     .build();
//! assert_eq!(retry.max_attempts, 5);
//! ```

use crate::deployment::{ManagedServiceDeployment, ResourceHandle};
use crate::error::{FailoverError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Defines a backoff strategy for retry delays.
pub trait BackoffStrategy: Clone + Send + Sync + 'static {
    /// Calculate the delay before the next retry attempt.
    ///
    /// # Arguments
    /// * `attempt` - The current retry number (0-indexed)
    fn delay(&self, attempt: u32) -> Duration;
}

// =============================================================================
// Backoff strategies
// =============================================================================

/// No delay between retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl NoBackoff {
    /// Create a new no-backoff strategy.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BackoffStrategy for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Fixed delay between retries.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    /// Create a new fixed backoff strategy.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Create a fixed backoff with delay in milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl BackoffStrategy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential backoff: `initial_delay * multiplier^attempt`, capped.
///
/// Jitter is off by default so delays are reproducible; when enabled, up to
/// 25% of the capped delay is added at random.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy (multiplier 2, cap 30 s).
    #[must_use]
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Set the maximum delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the multiplier for exponential growth.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            capped_delay + rand::random_range(0.0..=capped_delay * 0.25)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

// =============================================================================
// Outcome classification
// =============================================================================

/// What went wrong with a call, independent of the protocol client's error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The connection could not be established or broke mid-call.
    Transport,
    /// The call did not complete in time.
    Timeout,
    /// An HTTP response with a non-success status.
    HttpStatus(u16),
    /// A gRPC status other than `Ok`.
    Grpc(tonic::Code),
    /// The caller judged the node unusable.
    NodeUnavailable,
    /// The caller judged the whole datacenter unusable.
    DatacenterUnavailable,
    /// Anything else; never retried by the default policy.
    Other,
}

/// The step to take after a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverAction {
    /// Try the same node again after the backoff delay.
    Retry,
    /// Flag the node unavailable and try another one.
    FailoverNode,
    /// Abandon the current datacenter.
    FailoverDatacenter,
    /// Give up and surface the error.
    Fatal,
}

/// Reduces an error to a [`CallOutcome`].
pub trait AsCallOutcome {
    fn call_outcome(&self) -> CallOutcome;
}

impl AsCallOutcome for tonic::Status {
    fn call_outcome(&self) -> CallOutcome {
        CallOutcome::Grpc(self.code())
    }
}

impl AsCallOutcome for http::StatusCode {
    fn call_outcome(&self) -> CallOutcome {
        CallOutcome::HttpStatus(self.as_u16())
    }
}

impl AsCallOutcome for reqwest::Error {
    fn call_outcome(&self) -> CallOutcome {
        if self.is_timeout() {
            CallOutcome::Timeout
        } else if let Some(status) = self.status() {
            CallOutcome::HttpStatus(status.as_u16())
        } else if self.is_connect() || self.is_request() {
            CallOutcome::Transport
        } else {
            CallOutcome::Other
        }
    }
}

impl AsCallOutcome for FailoverError {
    fn call_outcome(&self) -> CallOutcome {
        match self {
            FailoverError::ResourceUnavailable { .. } => CallOutcome::NodeUnavailable,
            FailoverError::NoResourceAvailable(_) => CallOutcome::DatacenterUnavailable,
            FailoverError::Api(status) => status.call_outcome(),
            FailoverError::Transport(_) => CallOutcome::Transport,
            FailoverError::Http(e) => e.call_outcome(),
            FailoverError::Status { status, .. } => CallOutcome::HttpStatus(*status),
            FailoverError::Timeout(_) => CallOutcome::Timeout,
            FailoverError::Config(_)
            | FailoverError::DeploymentExhausted
            | FailoverError::Token { .. }
            | FailoverError::Unknown(_) => CallOutcome::Other,
        }
    }
}

/// Maps a call outcome to the failover action to take.
pub trait RetryPolicy: Clone + Send + Sync + 'static {
    fn classify(&self, outcome: &CallOutcome) -> FailoverAction;
}

/// Default policy: retry transient errors, fail over unreachable nodes,
/// never retry client errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn classify(&self, outcome: &CallOutcome) -> FailoverAction {
        match outcome {
            CallOutcome::Transport | CallOutcome::NodeUnavailable => FailoverAction::FailoverNode,
            CallOutcome::Timeout => FailoverAction::Retry,
            CallOutcome::HttpStatus(429 | 500) => FailoverAction::Retry,
            CallOutcome::HttpStatus(502..=504) => FailoverAction::FailoverNode,
            CallOutcome::HttpStatus(_) => FailoverAction::Fatal,
            CallOutcome::Grpc(tonic::Code::Unavailable) => FailoverAction::FailoverNode,
            CallOutcome::Grpc(
                tonic::Code::DeadlineExceeded
                | tonic::Code::ResourceExhausted
                | tonic::Code::Aborted
                | tonic::Code::Unknown,
            ) => FailoverAction::Retry,
            CallOutcome::Grpc(_) => FailoverAction::Fatal,
            CallOutcome::DatacenterUnavailable => FailoverAction::FailoverDatacenter,
            CallOutcome::Other => FailoverAction::Fatal,
        }
    }
}

/// Never retry - fail immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn classify(&self, _outcome: &CallOutcome) -> FailoverAction {
        FailoverAction::Fatal
    }
}

/// Policy backed by an explicit outcome table.
#[derive(Debug, Clone)]
pub struct CustomRetryPolicy {
    rules: Vec<(CallOutcome, FailoverAction)>,
    fallback: FailoverAction,
}

impl CustomRetryPolicy {
    /// Create an empty table; unmatched outcomes map to `fallback`.
    #[must_use]
    pub fn new(fallback: FailoverAction) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Map `outcome` to `action`. Later rules for the same outcome win.
    #[must_use]
    pub fn on(mut self, outcome: CallOutcome, action: FailoverAction) -> Self {
        self.rules.retain(|(o, _)| *o != outcome);
        self.rules.push((outcome, action));
        self
    }

    /// Fail over on connection-level errors only.
    #[must_use]
    pub fn network_errors() -> Self {
        Self::new(FailoverAction::Fatal)
            .on(CallOutcome::Transport, FailoverAction::FailoverNode)
            .on(
                CallOutcome::Grpc(tonic::Code::Unavailable),
                FailoverAction::FailoverNode,
            )
            .on(CallOutcome::HttpStatus(503), FailoverAction::FailoverNode)
    }
}

impl RetryPolicy for CustomRetryPolicy {
    fn classify(&self, outcome: &CallOutcome) -> FailoverAction {
        self.rules
            .iter()
            .find(|(o, _)| o == outcome)
            .map_or(self.fallback, |(_, action)| *action)
    }
}

// =============================================================================
// Retry configuration and executor
// =============================================================================

/// Everything a protocol client needs for one attempt.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Token for the datacenter of `resource`.
    pub token: String,
    /// Node to send the call to.
    pub resource: ResourceHandle,
    /// Attempt number, starting at 1.
    pub attempt: u32,
}

/// Complete retry configuration combining policy and backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig<P: RetryPolicy = DefaultRetryPolicy, B: BackoffStrategy = ExponentialBackoff>
{
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Policy classifying failed calls.
    pub policy: P,
    /// Backoff applied before retrying on the same node.
    pub backoff: B,
    /// Maximum total time for all attempts.
    pub total_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            policy: DefaultRetryPolicy,
            backoff: ExponentialBackoff::default(),
            total_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> RetryConfigBuilder<DefaultRetryPolicy, ExponentialBackoff> {
        RetryConfigBuilder::new()
    }

    /// A single attempt, no retries.
    #[must_use]
    pub fn disabled() -> RetryConfig<NoRetryPolicy, NoBackoff> {
        RetryConfig {
            max_attempts: 1,
            policy: NoRetryPolicy,
            backoff: NoBackoff,
            total_timeout: None,
        }
    }
}

impl<P: RetryPolicy, B: BackoffStrategy> RetryConfig<P, B> {
    /// Run one logical call against `deployment`.
    ///
    /// Each attempt looks up a node and its datacenter's token, invokes
    /// `operation`, and on failure applies the action chosen by the policy.
    /// Node failovers retry immediately on another node; plain retries wait
    /// for the backoff and reuse the node while it stays available. A retry
    /// whose backoff would end past `total_timeout` is not attempted.
    ///
    /// # Errors
    ///
    /// Returns `FailoverError::DeploymentExhausted` once no datacenter has an
    /// available node, or the last call error when the policy deems it fatal
    /// or the attempt/time budget runs out.
    pub async fn execute<T, F, Fut>(
        &self,
        deployment: &ManagedServiceDeployment,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        let mut retries: u32 = 0;
        let mut pinned: Option<ResourceHandle> = None;

        loop {
            attempt += 1;

            let resource = match pinned.take() {
                Some(resource) if deployment.is_available(&resource) => resource,
                _ => acquire(deployment)?,
            };
            let token = deployment.token_for(resource.datacenter())?;

            let context = CallContext {
                token,
                resource: resource.clone(),
                attempt,
            };

            let error = match operation(context).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let outcome = error.call_outcome();
            let action = self.policy.classify(&outcome);
            debug!(
                attempt,
                datacenter = resource.datacenter(),
                resource = resource.id(),
                ?outcome,
                ?action,
                error = %error,
                "call failed"
            );

            // The deployment learns about the failure even when no attempt is left.
            match action {
                FailoverAction::Fatal => return Err(error),
                FailoverAction::FailoverNode => {
                    deployment.failover_node(&resource, &error.to_string());
                }
                FailoverAction::FailoverDatacenter => {
                    deployment.failover_datacenter_from(resource.datacenter())?;
                }
                FailoverAction::Retry => {}
            }

            if attempt >= self.max_attempts.max(1) {
                return Err(error);
            }

            let delay = match action {
                FailoverAction::Retry => self.backoff.delay(retries),
                _ => Duration::ZERO,
            };
            if let Some(timeout) = self.total_timeout {
                if start.elapsed() + delay >= timeout {
                    debug!(attempt, ?delay, ?timeout, "retry budget exhausted");
                    return Err(error);
                }
            }

            if action == FailoverAction::Retry {
                tokio::time::sleep(delay).await;
                retries += 1;
                pinned = Some(resource);
            }
        }
    }
}

/// Look up a node, failing over datacenters while the current one is empty.
#[allow(clippy::result_large_err)]
fn acquire(deployment: &ManagedServiceDeployment) -> Result<ResourceHandle> {
    let mut last = None;
    for _ in 0..=deployment.topology().len() {
        match deployment.lookup_resource() {
            Ok(resource) => return Ok(resource),
            Err(FailoverError::NoResourceAvailable(datacenter)) => {
                deployment.failover_datacenter_from(&datacenter)?;
                last = Some(FailoverError::NoResourceAvailable(datacenter));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(FailoverError::DeploymentExhausted))
}

/// Builder for `RetryConfig`.
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder<P: RetryPolicy, B: BackoffStrategy> {
    max_attempts: u32,
    policy: P,
    backoff: B,
    total_timeout: Option<Duration>,
}

impl RetryConfigBuilder<DefaultRetryPolicy, ExponentialBackoff> {
    /// Create a new builder with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            policy: DefaultRetryPolicy,
            backoff: ExponentialBackoff::default(),
            total_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl Default for RetryConfigBuilder<DefaultRetryPolicy, ExponentialBackoff> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: RetryPolicy, B: BackoffStrategy> RetryConfigBuilder<P, B> {
    /// Set the maximum number of attempts (at least one is always made).
    #[must_use]
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn policy<P2: RetryPolicy>(self, policy: P2) -> RetryConfigBuilder<P2, B> {
        RetryConfigBuilder {
            max_attempts: self.max_attempts,
            policy,
            backoff: self.backoff,
            total_timeout: self.total_timeout,
        }
    }

    /// Set the backoff strategy.
    #[must_use]
    pub fn backoff<B2: BackoffStrategy>(self, backoff: B2) -> RetryConfigBuilder<P, B2> {
        RetryConfigBuilder {
            max_attempts: self.max_attempts,
            policy: self.policy,
            backoff,
            total_timeout: self.total_timeout,
        }
    }

    /// Set the total timeout across all attempts, backoff included.
    #[must_use]
    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = Some(timeout);
        self
    }

    /// Remove the total timeout.
    #[must_use]
    pub fn no_total_timeout(mut self) -> Self {
        self.total_timeout = None;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> RetryConfig<P, B> {
        RetryConfig {
            max_attempts: self.max_attempts,
            policy: self.policy,
            backoff: self.backoff,
            total_timeout: self.total_timeout,
        }
    }
}
