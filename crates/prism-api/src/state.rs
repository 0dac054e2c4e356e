//! Application state shared across all request handlers.

use crate::config::ApiConfig;
use prism_adapters::AdapterRegistry;
use prism_core::auth::{TokenConfig, TokenValidator};
use prism_core::cache::RedisCache;
use prism_core::crypto::TokenVault;
use prism_core::llm::{LlmClient, LlmConfig};
use prism_core::pubsub::EventPublisher;
use prism_core::vector::VectorStore;
use prism_core::websocket::WsHub;
use prism_db::DatabaseConnection;
use prism_engine::{EnrichmentPipeline, SyncEngine};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppStateError {
    #[error("Failed to establish database connection: {0}")]
    Database(#[from] prism_db::DatabaseError),
    #[error("Failed to initialize component: {0}")]
    Component(String),
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<ApiConfig>,
    pub cache: RedisCache,
    pub publisher: EventPublisher,
    pub hub: Arc<WsHub>,
    pub vault: TokenVault,
    pub tokens: TokenValidator,
    pub llm: Arc<LlmClient>,
    pub registry: Arc<AdapterRegistry>,
    pub pipeline: Arc<EnrichmentPipeline>,
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub async fn new(config: ApiConfig) -> Result<Self, AppStateError> {
        let db = Arc::new(prism_db::establish_connection(&config.database_url).await?);

        let cache = RedisCache::connect(&config.redis_url)
            .await
            .map_err(|e| AppStateError::Component(format!("redis cache: {e}")))?;
        let publisher = EventPublisher::connect(&config.redis_url)
            .await
            .map_err(|e| AppStateError::Component(format!("pub/sub publisher: {e}")))?;

        let vault = TokenVault::new(&config.encryption_key);
        let tokens = TokenValidator::new(
            TokenConfig::new(
                &config.auth.jwt_secret,
                &config.auth.jwt_algorithm,
                config.auth.jwt_expiry_hours,
            )
            .map_err(|e| AppStateError::Component(format!("jwt config: {e}")))?,
        );

        let llm = Arc::new(
            LlmClient::new(LlmConfig::new(&config.llm_api_key))
                .map_err(|e| AppStateError::Component(format!("llm client: {e}")))?,
        );

        let vector = Arc::new(
            VectorStore::new(&config.vector_store_url)
                .map_err(|e| AppStateError::Component(format!("vector store: {e}")))?,
        );

        let registry = Arc::new(
            AdapterRegistry::new(config.adapters.clone())
                .map_err(|e| AppStateError::Component(format!("adapter registry: {e}")))?,
        );

        let pipeline = Arc::new(
            EnrichmentPipeline::new(Arc::clone(&db), Arc::clone(&llm))
                .with_cache(cache.clone())
                .with_publisher(publisher.clone())
                .with_vector_store(vector),
        );

        let engine = Arc::new(
            SyncEngine::new(
                Arc::clone(&db),
                Arc::clone(&registry),
                Arc::clone(&pipeline),
                vault.clone(),
            )
            .with_publisher(publisher.clone()),
        );

        Ok(Self {
            db,
            config: Arc::new(config),
            cache,
            publisher,
            hub: WsHub::new(),
            vault,
            tokens,
            llm,
            registry,
            pipeline,
            engine,
        })
    }
}
