//! Endpoint rotation policies
//!
//! This module provides the strategies for selecting an endpoint from the pool.

mod random;
mod round_robin;

pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::models::Endpoint;

/// Policy types for endpoint rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    #[default]
    Random,
    RoundRobin,
}

impl SelectionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "roundrobin",
        }
    }
}

impl std::str::FromStr for SelectionPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "roundrobin" | "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown selection policy '{}' (expected random or roundrobin)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trait for endpoint selection policies
///
/// Implementations hold a snapshot of the pool that is only replaced by
/// `refresh`; `select` never mutates it.
#[async_trait]
pub trait EndpointSelector: Send + Sync {
    /// Select an endpoint from the current pool
    ///
    /// Returns `NoEndpointsAvailable` if the pool is empty
    async fn select(&self) -> Result<Arc<Endpoint>>;

    /// Replace the pool snapshot
    async fn refresh(&self, endpoints: Vec<Endpoint>) -> Result<()>;

    /// Get the number of endpoints in the pool
    fn available_count(&self) -> usize;

    /// Get the policy name
    fn policy_name(&self) -> &'static str;
}

/// Create an endpoint selector for the given policy
pub fn create_selector(policy: SelectionPolicy) -> Box<dyn EndpointSelector> {
    match policy {
        SelectionPolicy::Random => Box::new(RandomSelector::new()),
        SelectionPolicy::RoundRobin => Box::new(RoundRobinSelector::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_policy_from_str() {
        assert_eq!(
            "random".parse::<SelectionPolicy>().unwrap(),
            SelectionPolicy::Random
        );
        assert_eq!(
            "roundrobin".parse::<SelectionPolicy>().unwrap(),
            SelectionPolicy::RoundRobin
        );
        assert_eq!(
            "Round-Robin".parse::<SelectionPolicy>().unwrap(),
            SelectionPolicy::RoundRobin
        );
        assert!(matches!(
            "least_conn".parse::<SelectionPolicy>(),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_selection_policy_as_str_round_trips() {
        for policy in [SelectionPolicy::Random, SelectionPolicy::RoundRobin] {
            assert_eq!(policy.as_str().parse::<SelectionPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_create_selector_policy_name() {
        assert_eq!(
            create_selector(SelectionPolicy::Random).policy_name(),
            "random"
        );
        assert_eq!(
            create_selector(SelectionPolicy::RoundRobin).policy_name(),
            "roundrobin"
        );
    }
}
