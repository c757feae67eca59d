//! Provider registry.
//!
//! Factory-based: each provider kind registers a factory at startup, then
//! one instance per configured provider is created from `config.providers`.

use super::{ProviderAdapter, ProviderError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type ProviderFactory =
    Box<dyn Fn(&str, Value) -> Result<Arc<dyn ProviderAdapter>, ProviderError> + Send + Sync>;

/// Holds every configured provider instance, keyed by name.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
    instances: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            instances: HashMap::new(),
        }
    }

    pub fn register_factory(&mut self, provider_kind: &str, factory: ProviderFactory) {
        self.factories.insert(provider_kind.to_string(), factory);
    }

    pub fn create_instance(
        &mut self,
        provider_kind: &str,
        instance_name: &str,
        config: Value,
    ) -> Result<(), ProviderError> {
        let factory = self
            .factories
            .get(provider_kind)
            .ok_or_else(|| ProviderError::InvalidConfig(format!("no factory registered for {provider_kind}")))?;

        let instance = factory(instance_name, config)?;
        self.instances.insert(instance_name.to_string(), instance);
        Ok(())
    }

    #[must_use]
    pub fn get_instance(&self, instance_name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.instances.get(instance_name).cloned()
    }

    #[must_use]
    pub fn list_instances(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    #[must_use]
    pub fn all_instances(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.instances.values().cloned().collect()
    }

    pub fn remove_instance(&mut self, instance_name: &str) -> bool {
        self.instances.remove(instance_name).is_some()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::models::ContentRef;
    use crate::provider::{ProviderContext, SearchResult};
    use async_trait::async_trait;
    use std::time::Duration;

    struct MockProvider {
        name: String,
    }

    #[async_trait]
    impl ProviderAdapter for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn search(
            &self,
            _content_ref: &ContentRef,
            _user_cfg: &ProviderConfig,
            _ctx: &ProviderContext,
        ) -> Result<SearchResult, ProviderError> {
            Ok(SearchResult::default())
        }
    }

    #[test]
    fn register_create_and_fetch_instance() {
        let mut registry = ProviderRegistry::new();
        registry.register_factory(
            "mock",
            Box::new(|name, _config| {
                Ok(Arc::new(MockProvider {
                    name: name.to_string(),
                }))
            }),
        );

        registry
            .create_instance("mock", "mock_main", serde_json::json!({}))
            .unwrap();

        let instance = registry.get_instance("mock_main").unwrap();
        assert_eq!(instance.name(), "mock_main");
        assert_eq!(registry.list_instances(), vec!["mock_main".to_string()]);
    }

    #[test]
    fn unknown_factory_errors() {
        let mut registry = ProviderRegistry::new();
        let err = registry.create_instance("missing", "x", serde_json::json!({}));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn mock_provider_search_returns_empty() {
        let provider = MockProvider {
            name: "mock".to_string(),
        };
        let content_ref = ContentRef::Movie {
            imdb_id: "tt1".to_string(),
            meta: Default::default(),
        };
        let cfg = ProviderConfig::default();
        let ctx = ProviderContext::new(Duration::from_secs(1));
        let result = provider.search(&content_ref, &cfg, &ctx).await.unwrap();
        assert!(result.is_empty());
    }
}
