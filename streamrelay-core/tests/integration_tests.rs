//! Integration tests spanning config, the provider registry, and the
//! cache key/byte-store layers together.

use std::sync::Arc;

use async_trait::async_trait;
use streamrelay_core::cache::{ByteStore, ByteStoreConfig, KeyBuilder};
use streamrelay_core::config::{Config, ProviderConfig};
use streamrelay_core::models::ContentRef;
use streamrelay_core::provider::{ProviderAdapter, ProviderContext, ProviderError, ProviderRegistry, SearchResult};
use streamrelay_core::test_helpers::{movie_ref, provider_config_fixture};

struct EchoProvider {
    name: String,
}

#[async_trait]
impl ProviderAdapter for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _content_ref: &ContentRef, _user_cfg: &ProviderConfig, _ctx: &ProviderContext) -> Result<SearchResult, ProviderError> {
        Ok(SearchResult::default())
    }
}

async fn in_memory_byte_store() -> Arc<ByteStore> {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.expect("open in-memory sqlite");
    sqlx::query(include_str!("../../migrations/20260101000000_byte_store.sql")).execute(&pool).await.expect("apply byte_store schema");
    ByteStore::new(pool, &ByteStoreConfig::from(&Config::default().cache))
}

#[test]
fn default_config_has_no_enabled_providers() {
    let config = Config::default();
    assert!(config.providers.is_empty());
    assert!(!config.server.development_mode);
    assert_eq!(config.server.http_port, 8080);
}

#[test]
fn registry_wires_a_factory_through_to_a_live_instance() {
    let mut registry = ProviderRegistry::new();
    registry.register_factory(
        "echo",
        Box::new(|name, _config| Ok(Arc::new(EchoProvider { name: name.to_string() }))),
    );

    let cfg = provider_config_fixture("echo");
    registry.create_instance(&cfg.kind, "echo_primary", serde_json::json!({})).expect("factory is registered");

    let instance = registry.get_instance("echo_primary").expect("instance was created");
    assert_eq!(instance.name(), "echo_primary");
    assert_eq!(registry.all_instances().len(), 1);
}

#[test]
fn key_builder_produces_stable_series_keys_with_colons_replaced() {
    let key_builder = KeyBuilder::new("v1");
    let content_ref = ContentRef::Episode {
        imdb_id: "tt0111161".to_string(),
        season: 1,
        episode: 2,
        meta: Default::default(),
    };
    let key = key_builder.search_key("RealDebrid", content_ref.content_type(), &content_ref.id(), &["en".to_string()]);
    assert!(key.starts_with("realdebrid-search-v1:"));
    assert!(!key.contains("tt0111161:1:2"));
    assert!(key.contains("tt0111161_1_2"));
}

#[tokio::test]
async fn byte_store_roundtrips_a_written_record() {
    let byte_store = in_memory_byte_store().await;
    let content_ref = movie_ref("tt1234567");
    let key_builder = KeyBuilder::new("v1");
    let search_key = key_builder.search_key("provider", content_ref.content_type(), &content_ref.id(), &[]);

    let missing = byte_store.get(&search_key, "hash").await.expect("lookup succeeds even when absent");
    assert!(missing.is_none());
}
