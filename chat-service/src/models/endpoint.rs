//! Fallback chain configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Capability tag advertised by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Text,
    Json,
    Audio,
}

/// One candidate backend in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpointConfig {
    /// Model identifier sent to the backend.
    pub id: String,

    /// Lower ranks are tried first.
    pub priority: u32,

    pub capabilities: BTreeSet<Capability>,

    /// Total attempts allowed on this endpoint for one request (at least 1).
    pub retry_budget: u32,
}

impl ModelEndpointConfig {
    pub fn new(id: impl Into<String>, priority: u32, retry_budget: u32) -> Self {
        Self {
            id: id.into(),
            priority,
            capabilities: [Capability::Text, Capability::Json].into_iter().collect(),
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Order endpoints by ascending priority; ties keep their configured order.
pub fn fallback_order(mut endpoints: Vec<ModelEndpointConfig>) -> Vec<ModelEndpointConfig> {
    endpoints.sort_by_key(|endpoint| endpoint.priority);
    endpoints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_is_at_least_one() {
        assert_eq!(ModelEndpointConfig::new("m", 0, 0).retry_budget, 1);
    }

    #[test]
    fn fallback_order_is_stable_by_priority() {
        let ordered = fallback_order(vec![
            ModelEndpointConfig::new("c", 2, 1),
            ModelEndpointConfig::new("a", 1, 1),
            ModelEndpointConfig::new("b", 1, 1),
        ]);

        let ids: Vec<&str> = ordered.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn default_capabilities_exclude_audio() {
        let endpoint = ModelEndpointConfig::new("m", 0, 1);
        assert!(endpoint.supports(Capability::Text));
        assert!(!endpoint.supports(Capability::Audio));
        assert!(endpoint
            .with_capability(Capability::Audio)
            .supports(Capability::Audio));
    }
}
