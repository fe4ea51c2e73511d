// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runtime policies around a managed deployment.
//!
//! This module provides the retry policy and outcome classification that
//! drive failover, and the listener hooks that report failover decisions.

mod listener;
mod retry;

pub use listener::{
    DeploymentListener, FailoverCounters, ListenerConfig, LogLevel, LoggingListener, NoopListener,
};
pub use retry::{
    AsCallOutcome, BackoffStrategy, CallContext, CallOutcome, CustomRetryPolicy,
    DefaultRetryPolicy, ExponentialBackoff, FailoverAction, FixedBackoff, NoBackoff,
    NoRetryPolicy, RetryConfig, RetryConfigBuilder, RetryPolicy,
};
