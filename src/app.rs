//! Assembles stores, clients and services from a [`ServerConfig`].
use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::{
    adapters::{
        http_client::HttpRecommendationClient,
        http_handler::AppState,
        memory_store::MemoryCatalogStore,
        seed::{apply_seed, load_seed_file},
        sqlite_store::SqliteCatalogStore,
    },
    config::models::{ServerConfig, StorageBackend},
    core::{
        AccountService, AuthGate, CacheNotifier, GatewayOptions, RatingMutationCoordinator,
        RecommendationGateway, TokenCodec,
    },
    ports::{catalog_store::CatalogStore, recommendation_client::RecommendationClient},
};

/// Open the configured backend and apply the seed file, if any.
pub async fn open_store(config: &ServerConfig) -> Result<Arc<dyn CatalogStore>> {
    let store: Arc<dyn CatalogStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryCatalogStore::new()),
        StorageBackend::Sqlite => {
            let path = config
                .storage
                .path
                .as_deref()
                .ok_or_else(|| eyre::eyre!("storage.path is required for the sqlite backend"))?;
            Arc::new(
                SqliteCatalogStore::open(path)
                    .wrap_err_with(|| format!("Failed to open sqlite store at {path}"))?,
            )
        }
    };

    if let Some(seed_path) = config.storage.seed_path.as_deref() {
        let seed = load_seed_file(seed_path).await?;
        apply_seed(store.as_ref(), seed)
            .await
            .wrap_err_with(|| format!("Failed to apply seed file {seed_path}"))?;
    }

    tracing::info!(backend = ?config.storage.backend, "catalog store ready");
    Ok(store)
}

/// Full application state talking to the configured recommendation service over HTTP.
pub async fn build_state(config: &ServerConfig) -> Result<AppState> {
    let client = HttpRecommendationClient::new(
        &config.recommendation.base_url,
        config.recommendation.timeout(),
    )?;
    let store = open_store(config).await?;
    Ok(assemble(config, store, Arc::new(client)))
}

/// Wire the services around an existing store and recommendation client.
pub fn assemble(
    config: &ServerConfig,
    store: Arc<dyn CatalogStore>,
    client: Arc<dyn RecommendationClient>,
) -> AppState {
    let codec = Arc::new(TokenCodec::new(
        config.auth.secret.as_bytes(),
        config.auth.token_ttl(),
    ));
    let options = GatewayOptions::from_config(config);

    AppState {
        gateway: Arc::new(RecommendationGateway::new(
            client.clone(),
            store.clone(),
            options,
        )),
        ratings: Arc::new(RatingMutationCoordinator::new(
            store.clone(),
            CacheNotifier::new(client, options.call_timeout),
        )),
        accounts: AccountService::new(store.clone(), codec.clone()),
        auth: AuthGate::new(codec),
        store,
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[tokio::test]
    async fn test_memory_store_with_seed() {
        let dir = TempDir::new().unwrap();
        let seed_path = dir.path().join("seed.json");
        std::fs::write(
            &seed_path,
            r#"{"books": [{"bookId": "b1", "title": "Dune", "author": "Frank Herbert"}]}"#,
        )
        .unwrap();

        let config = ServerConfig::builder()
            .secret(SECRET)
            .seed_path(seed_path.to_string_lossy())
            .build();
        let store = open_store(&config).await.unwrap();
        assert!(store.find_book("b1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sqlite_store_requires_path() {
        let mut config = ServerConfig::builder().secret(SECRET).build();
        config.storage.backend = StorageBackend::Sqlite;
        assert!(open_store(&config).await.is_err());

        let dir = TempDir::new().unwrap();
        let config = ServerConfig::builder()
            .secret(SECRET)
            .sqlite(dir.path().join("lectern.db").to_string_lossy())
            .build();
        assert!(open_store(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_build_state_issues_verifiable_tokens() {
        let config = ServerConfig::builder().secret(SECRET).build();
        let state = build_state(&config).await.unwrap();
        let token = state.auth.codec().issue(1, "ada").unwrap();
        assert!(state.auth.resolve(Some(&format!("Bearer {token}"))).identity().is_some());
    }
}
