//! Bulk indexer CLI: builds (or rebuilds) the per-corpus indices outside
//! the request path.
//!
//! Usage:
//!   ingest                 ingest every corpus from its raw sources
//!   ingest <corpus>        ingest a single corpus
//!   ingest --from-db       rebuild indices from the relational store
//!   ingest --from-db <corpus>

use std::sync::Arc;

use anyhow::{bail, Context};
use async_openai::{config::OpenAIConfig, Client};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::corpus::CorpusKey;
use common::storage::db::SurrealDbClient;
use common::utils::config::get_config;
use common::utils::embedding::EmbeddingProvider;
use ingestion_pipeline::IngestionPipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let mut from_db = false;
    let mut target: Option<CorpusKey> = None;
    for arg in std::env::args().skip(1) {
        if arg == "--from-db" {
            from_db = true;
        } else {
            match arg.parse() {
                Ok(key) => target = Some(key),
                Err(()) => bail!("unknown corpus '{arg}' (expected one of notices, rules, schedule, courses, staff)"),
            }
        }
    }

    let config = get_config().context("loading configuration")?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("connecting to the database")?,
    );
    db.ensure_initialized()
        .await
        .context("initializing the database schema")?;

    let openai = Arc::new(Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let embedder = Arc::new(
        EmbeddingProvider::from_config(&config, Some(openai)).context("building the embedder")?,
    );
    info!(
        backend = embedder.backend_label(),
        dimension = embedder.dimension(),
        "Embedding provider initialized"
    );

    let pipeline = IngestionPipeline::new(db, embedder, config);

    if from_db {
        let targets: Vec<CorpusKey> = match target {
            Some(key) => vec![key],
            None => CorpusKey::ALL.to_vec(),
        };
        for key in targets {
            let count = pipeline
                .reindex_corpus(key)
                .await
                .with_context(|| format!("reindexing corpus '{key}'"))?;
            info!(corpus = %key, chunks = count, "Corpus reindexed from the database");
        }
        return Ok(());
    }

    match target {
        Some(key) => {
            let records = pipeline
                .ingest_corpus(key)
                .await
                .with_context(|| format!("ingesting corpus '{key}'"))?;
            info!(corpus = %key, chunks = records.len(), "Corpus indexed");
        }
        None => {
            for (key, outcome) in pipeline.ingest_all().await {
                match outcome {
                    Ok(count) => info!(corpus = %key, chunks = count, "Corpus indexed"),
                    Err(error) => warn!(corpus = %key, %error, "Corpus skipped"),
                }
            }
        }
    }

    Ok(())
}
