use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{error::AppError, utils::retry::RetryPolicy};

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Surrealdb,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Surrealdb
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RerankingBackend {
    Fastembed,
    Cohere,
}

fn default_reranking_backend() -> RerankingBackend {
    RerankingBackend::Fastembed
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    /// Unset means an embedded on-disk store, see [`AppConfig::database_address`].
    #[serde(default)]
    pub surrealdb_address: Option<String>,
    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,
    #[serde(default)]
    pub fastembed_max_length: Option<usize>,

    #[serde(default = "default_reranking_backend")]
    pub reranking_backend: RerankingBackend,
    #[serde(default)]
    pub reranking_pool_size: Option<usize>,
    #[serde(default)]
    pub cohere_api_key: Option<String>,
    #[serde(default = "default_cohere_rerank_model")]
    pub cohere_rerank_model: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_query_variants")]
    pub query_variants: usize,
    #[serde(default = "default_candidates_per_variant")]
    pub candidates_per_variant: usize,
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_true")]
    pub query_expansion_enabled: bool,
    #[serde(default = "default_true")]
    pub reranking_enabled: bool,
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_generation_model() -> String {
    "gpt-4o".to_string()
}

fn default_surrealdb_namespace() -> String {
    "ragline".to_string()
}

fn default_surrealdb_database() -> String {
    "corpus".to_string()
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_cohere_rerank_model() -> String {
    "rerank-multilingual-v3.0".to_string()
}

const fn default_chunk_size() -> usize {
    500
}

const fn default_chunk_overlap() -> usize {
    100
}

const fn default_query_variants() -> usize {
    3
}

const fn default_candidates_per_variant() -> usize {
    10
}

const fn default_rerank_top_n() -> usize {
    8
}

const fn default_cache_ttl_secs() -> u64 {
    3600
}

const fn default_true() -> bool {
    true
}

const fn default_ingest_concurrency() -> usize {
    4
}

const fn default_embedding_batch_size() -> usize {
    32
}

const fn default_capability_timeout_secs() -> u64 {
    30
}

const fn default_retry_attempts() -> usize {
    3
}

const fn default_retry_base_delay_ms() -> u64 {
    100
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

/// Directory under `data_dir` holding the embedded database. Hidden, so
/// folder scans never pick it up as a document.
const EMBEDDED_STORE_DIR: &str = ".ragline";

impl AppConfig {
    /// The configured SurrealDB address, or an embedded SurrealKV store under
    /// the document folder so the index and cached answers survive restarts.
    pub fn database_address(&self) -> String {
        match self.surrealdb_address.as_deref().map(str::trim) {
            Some(address) if !address.is_empty() => address.to_string(),
            _ => format!(
                "surrealkv://{}",
                Path::new(&self.data_dir).join(EMBEDDED_STORE_DIR).display()
            ),
        }
    }

    /// Builds the validated pipeline settings. Bad chunking or retrieval
    /// parameters are rejected here, never at request time.
    pub fn pipeline_settings(&self) -> Result<PipelineSettings, AppError> {
        let settings = PipelineSettings {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            query_variants: self.query_variants,
            candidates_per_variant: self.candidates_per_variant,
            rerank_top_n: self.rerank_top_n,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            query_expansion_enabled: self.query_expansion_enabled,
            reranking_enabled: self.reranking_enabled,
            ingest_concurrency: self.ingest_concurrency,
            embedding_batch_size: self.embedding_batch_size,
            embedding_model: self
                .embedding_model
                .clone()
                .unwrap_or_else(|| self.embedding_backend.clone()),
            retry: RetryPolicy {
                attempts: self.retry_attempts,
                base_delay_ms: self.retry_base_delay_ms,
                timeout: Duration::from_secs(self.capability_timeout_secs),
                ..RetryPolicy::default()
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Options that shape chunking, retrieval and caching.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub query_variants: usize,
    pub candidates_per_variant: usize,
    pub rerank_top_n: usize,
    pub cache_ttl: Duration,
    pub query_expansion_enabled: bool,
    pub reranking_enabled: bool,
    pub ingest_concurrency: usize,
    pub embedding_batch_size: usize,
    pub embedding_model: String,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            query_variants: default_query_variants(),
            candidates_per_variant: default_candidates_per_variant(),
            rerank_top_n: default_rerank_top_n(),
            cache_ttl: Duration::from_secs(default_cache_ttl_secs()),
            query_expansion_enabled: true,
            reranking_enabled: true,
            ingest_concurrency: default_ingest_concurrency(),
            embedding_batch_size: default_embedding_batch_size(),
            embedding_model: default_embedding_backend(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size == 0 {
            return Err(AppError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.query_variants == 0 {
            return Err(AppError::InvalidConfig(
                "query_variants must be at least 1".into(),
            ));
        }
        if self.candidates_per_variant == 0 {
            return Err(AppError::InvalidConfig(
                "candidates_per_variant must be at least 1".into(),
            ));
        }
        if self.rerank_top_n == 0 {
            return Err(AppError::InvalidConfig(
                "rerank_top_n must be at least 1".into(),
            ));
        }
        if self.ingest_concurrency == 0 || self.embedding_batch_size == 0 {
            return Err(AppError::InvalidConfig(
                "ingest_concurrency and embedding_batch_size must be at least 1".into(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(AppError::InvalidConfig(
                "retry_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Stable identifier over every option that changes what a question retrieves.
    /// Part of the response cache fingerprint.
    pub fn config_version(&self) -> String {
        let descriptor = format!(
            "chunk_size={};chunk_overlap={};variants={};k={};top_n={};expansion={};rerank={};embedding={}",
            self.chunk_size,
            self.chunk_overlap,
            self.query_variants,
            self.candidates_per_variant,
            self.rerank_top_n,
            self.query_expansion_enabled,
            self.reranking_enabled,
            self.embedding_model,
        );
        let digest = Sha256::digest(descriptor.as_bytes());
        digest
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(overrides: &[(&str, &str)]) -> AppConfig {
        let mut builder = Config::builder();
        for (key, value) in overrides {
            builder = builder
                .set_override(*key, *value)
                .expect("override accepted");
        }
        builder
            .build()
            .expect("config builds")
            .try_deserialize()
            .expect("config deserializes")
    }

    #[test]
    fn default_storage_persists_under_data_dir() {
        let config = config_with(&[("data_dir", "/srv/docs")]);

        assert_eq!(config.storage, StorageKind::Surrealdb);
        assert_eq!(config.database_address(), "surrealkv:///srv/docs/.ragline");
        assert!(!config.database_address().starts_with("mem://"));
    }

    #[test]
    fn explicit_database_address_wins() {
        let config = config_with(&[("surrealdb_address", "ws://db:8000")]);
        assert_eq!(config.database_address(), "ws://db:8000");

        let blank = config_with(&[("surrealdb_address", "  ")]);
        assert!(blank.database_address().starts_with("surrealkv://"));
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let settings = PipelineSettings {
            chunk_size: 100,
            chunk_overlap: 100,
            ..PipelineSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(AppError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_zero_retrieval_parameters() {
        for settings in [
            PipelineSettings {
                query_variants: 0,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                candidates_per_variant: 0,
                ..PipelineSettings::default()
            },
            PipelineSettings {
                rerank_top_n: 0,
                ..PipelineSettings::default()
            },
        ] {
            assert!(matches!(
                settings.validate(),
                Err(AppError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineSettings::default().validate().is_ok());
    }

    #[test]
    fn config_version_tracks_retrieval_options() {
        let base = PipelineSettings::default();
        let same = PipelineSettings::default();
        assert_eq!(base.config_version(), same.config_version());

        let bigger_chunks = PipelineSettings {
            chunk_size: 800,
            ..PipelineSettings::default()
        };
        let more_candidates = PipelineSettings {
            candidates_per_variant: 20,
            ..PipelineSettings::default()
        };
        assert_ne!(base.config_version(), bigger_chunks.config_version());
        assert_ne!(base.config_version(), more_candidates.config_version());
    }

    #[test]
    fn config_version_ignores_operational_knobs() {
        let base = PipelineSettings::default();
        let busier = PipelineSettings {
            ingest_concurrency: 16,
            cache_ttl: Duration::from_secs(5),
            ..PipelineSettings::default()
        };
        assert_eq!(base.config_version(), busier.config_version());
    }
}
