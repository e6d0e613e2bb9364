use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAi,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAi
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f32,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f32,
    #[serde(default = "default_max_context_length")]
    pub max_context_length: usize,
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_embedding_batch_size() -> usize {
    8
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_artifact_dir() -> String {
    "./artifacts".to_string()
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    120
}

fn default_hybrid_alpha() -> f32 {
    0.4
}

fn default_top_k() -> usize {
    5
}

fn default_recency_weight() -> f32 {
    0.2
}

fn default_max_context_length() -> usize {
    8000
}

fn default_max_history_messages() -> usize {
    10
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Config for tests: in-memory database, hashed embeddings, and
    /// caller-provided data/artifact directories.
    pub fn for_tests(data_dir: &str, artifact_dir: &str) -> Self {
        Self {
            openai_api_key: "sk-test".to_string(),
            openai_base_url: default_base_url(),
            openai_model: default_openai_model(),
            embedding_backend: EmbeddingBackend::Hashed,
            embedding_model: default_embedding_model(),
            embedding_dimensions: 64,
            embedding_batch_size: 4,
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "campus_test".to_string(),
            surrealdb_database: "campus_test".to_string(),
            http_port: 0,
            data_dir: data_dir.to_string(),
            artifact_dir: artifact_dir.to_string(),
            chunk_size: 200,
            chunk_overlap: 40,
            hybrid_alpha: 0.4,
            default_top_k: 5,
            recency_weight: 0.2,
            max_context_length: 4000,
            max_history_messages: 10,
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
