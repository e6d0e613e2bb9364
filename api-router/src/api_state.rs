use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};

use common::{
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use ingestion_pipeline::IngestionPipeline;
use retrieval_pipeline::DatasetCatalog;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub openai: Arc<Client<OpenAIConfig>>,
    pub embedder: Arc<EmbeddingProvider>,
    pub catalog: Arc<DatasetCatalog>,
    pub config: AppConfig,
}

impl ApiState {
    pub async fn new(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );
        db.ensure_initialized().await?;

        let openai = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));
        let embedder = Arc::new(EmbeddingProvider::from_config(config, Some(openai.clone()))?);

        Ok(Self::with_resources(db, openai, embedder, config.clone()))
    }

    /// Assembles the state from already-built resources; the dataset
    /// catalog is wired to the ingestion pipeline so a missing corpus gets
    /// built on first use.
    pub fn with_resources(
        db: Arc<SurrealDbClient>,
        openai: Arc<Client<OpenAIConfig>>,
        embedder: Arc<EmbeddingProvider>,
        config: AppConfig,
    ) -> Self {
        let pipeline = Arc::new(IngestionPipeline::new(
            db.clone(),
            embedder.clone(),
            config.clone(),
        ));
        let catalog = Arc::new(DatasetCatalog::new(config.clone(), Some(pipeline)));

        Self {
            db,
            openai,
            embedder,
            catalog,
            config,
        }
    }
}
