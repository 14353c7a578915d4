//! Random endpoint selection policy

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::sync::Arc;

use super::EndpointSelector;
use crate::error::{RelayError, Result};
use crate::models::Endpoint;

/// Selects a uniformly random endpoint on every call
pub struct RandomSelector {
    endpoints: RwLock<Vec<Arc<Endpoint>>>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(Vec::new()),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointSelector for RandomSelector {
    async fn select(&self) -> Result<Arc<Endpoint>> {
        let endpoints = self.endpoints.read();

        let mut rng = rand::thread_rng();
        endpoints
            .choose(&mut rng)
            .cloned()
            .ok_or(RelayError::NoEndpointsAvailable)
    }

    async fn refresh(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        let mut guard = self.endpoints.write();
        *guard = endpoints.into_iter().map(Arc::new).collect();
        Ok(())
    }

    fn available_count(&self) -> usize {
        self.endpoints.read().len()
    }

    fn policy_name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn create_test_endpoint(host: &str) -> Endpoint {
        Endpoint::parse(&format!("https://{}", host)).unwrap()
    }

    #[tokio::test]
    async fn test_random_selector_empty() {
        let selector = RandomSelector::new();
        let result = selector.select().await;
        assert!(matches!(result, Err(RelayError::NoEndpointsAvailable)));
    }

    #[tokio::test]
    async fn test_random_selector_single_endpoint() {
        let selector = RandomSelector::new();
        selector
            .refresh(vec![create_test_endpoint("w1.example")])
            .await
            .unwrap();

        for _ in 0..20 {
            let selected = selector.select().await.unwrap();
            assert_eq!(selected.base(), "https://w1.example");
        }
    }

    #[tokio::test]
    async fn test_random_selector_multiple_endpoints() {
        let selector = RandomSelector::new();
        let endpoints = vec![
            create_test_endpoint("w1.example"),
            create_test_endpoint("w2.example"),
            create_test_endpoint("w3.example"),
        ];
        let bases: HashSet<String> = endpoints.iter().map(|e| e.base().to_string()).collect();
        selector.refresh(endpoints).await.unwrap();
        assert_eq!(selector.available_count(), 3);

        // Every pick comes from the pool
        for _ in 0..30 {
            let selected = selector.select().await.unwrap();
            assert!(bases.contains(selected.base()));
        }
    }

    #[tokio::test]
    async fn test_random_selector_refresh_to_empty() {
        let selector = RandomSelector::new();
        selector
            .refresh(vec![create_test_endpoint("w1.example")])
            .await
            .unwrap();
        selector.refresh(Vec::new()).await.unwrap();

        assert!(matches!(
            selector.select().await,
            Err(RelayError::NoEndpointsAvailable)
        ));
    }
}
