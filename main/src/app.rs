use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::{corpus_stats, CorpusStats, Stores},
    },
    utils::{
        config::{AppConfig, PipelineSettings, StorageKind},
        embedding::{Embedder, EmbeddingProvider},
        generation::{Generator, OpenAiGenerator},
    },
};
use ingestion_pipeline::{FolderSource, IngestionCoordinator, IngestionJobTracker, IngestionReport, JobSnapshot};
use retrieval_pipeline::{
    orchestrator::AnswerTuning, reranking::capability_from_config, AnswerOrchestrator,
    QueryExpander, Reranker, ResponseCache, Retriever,
};
use serde::Serialize;
use tracing::{info, warn};

/// Everything one process needs to ingest and answer.
pub struct App {
    pub config: AppConfig,
    pub settings: PipelineSettings,
    pub stores: Stores,
    pub coordinator: IngestionCoordinator,
    pub jobs: IngestionJobTracker,
    pub orchestrator: AnswerOrchestrator,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub corpus: CorpusStats,
    pub ingestion: JobSnapshot,
}

impl App {
    pub async fn from_config(config: AppConfig) -> Result<Self, AppError> {
        let settings = config.pipeline_settings()?;

        let openai_client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        let embedder: Arc<dyn Embedder> =
            Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone()).await?);

        let stores = match config.storage {
            StorageKind::Memory => Stores::in_memory(),
            StorageKind::Surrealdb => {
                let address = config.database_address();
                if let Some(path) = address.strip_prefix("surrealkv://") {
                    tokio::fs::create_dir_all(path).await?;
                }
                info!(address = %address, "connecting to surrealdb");
                let db = SurrealDbClient::new(
                    &address,
                    &config.surrealdb_username,
                    &config.surrealdb_password,
                    &config.surrealdb_namespace,
                    &config.surrealdb_database,
                )
                .await?;
                db.ensure_schema(embedder.dimension()).await?;
                Stores::surreal(Arc::new(db))
            }
        };

        let cache = Arc::new(ResponseCache::new(
            stores.cache.clone(),
            stores.catalog.clone(),
            settings.cache_ttl,
            settings.config_version(),
            settings.retry.clone(),
        ));

        let generator: Arc<dyn Generator> = Arc::new(OpenAiGenerator::new(
            openai_client,
            config.generation_model.clone(),
        ));

        let expander = if settings.query_expansion_enabled {
            QueryExpander::new(generator.clone(), settings.retry.clone())
        } else {
            QueryExpander::disabled()
        };

        let capability = match capability_from_config(&config) {
            Ok(capability) => capability,
            Err(err) => {
                warn!(error = %err, "reranker could not start; using similarity ordering");
                None
            }
        };
        let reranker = Reranker::new(capability, settings.retry.clone());

        let retriever = Retriever::new(
            embedder.clone(),
            stores.vectors.clone(),
            settings.retry.clone(),
        );

        let coordinator =
            IngestionCoordinator::new(stores.clone(), embedder, Some(cache.clone()), &settings)?;

        let orchestrator = AnswerOrchestrator::new(
            AnswerTuning::from(&settings),
            cache,
            expander,
            retriever,
            reranker,
            generator,
        );

        info!(
            storage = ?config.storage,
            config_version = %settings.config_version(),
            expansion = settings.query_expansion_enabled,
            reranking = settings.reranking_enabled,
            "pipeline ready"
        );

        Ok(Self {
            config,
            settings,
            stores,
            coordinator,
            jobs: IngestionJobTracker::new(),
            orchestrator,
        })
    }

    pub async fn ingest(&self) -> Result<IngestionReport, AppError> {
        let source = FolderSource::new(&self.config.data_dir);
        self.jobs.run(&self.coordinator, &source).await
    }

    pub async fn status(&self) -> Result<StatusReport, AppError> {
        let corpus = corpus_stats(self.stores.catalog.as_ref(), self.stores.vectors.as_ref()).await?;
        Ok(StatusReport {
            corpus,
            ingestion: self.jobs.snapshot().await,
        })
    }
}
