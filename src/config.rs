use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },
}

/// Runtime configuration for the DocChat server and CLI.
///
/// Built once in `main` and handed to [`crate::service::DocChatService::from_config`]; nothing
/// reads it through a global.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend storing uploaded PDF blobs.
    pub storage_backend: StorageBackend,
    /// Bucket holding uploads when the S3 backend is active.
    pub s3_bucket_name: Option<String>,
    /// Region of the S3 bucket.
    pub s3_region: Option<String>,
    /// Root directory used by the local storage backend.
    pub local_storage_dir: PathBuf,
    /// Directory receiving temporary PDF downloads (system temp dir when unset).
    pub download_tmp_dir: Option<PathBuf>,
    /// Backend holding vector namespaces.
    pub vector_backend: VectorBackend,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Prefix applied to every document namespace.
    pub namespace_prefix: String,
    /// Number of records sent per upsert request.
    pub upsert_batch_size: usize,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// API key for OpenAI-compatible endpoints (embeddings and chat).
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Attempts made per chunk embedding during ingestion.
    pub embedding_max_attempts: usize,
    /// Backoff schedule between embedding attempts, in milliseconds.
    pub embedding_backoff_ms: Vec<u64>,
    /// Number of chunk embeddings in flight per ingestion.
    pub embedding_concurrency: usize,
    /// Splitter chunk size in characters.
    pub text_splitter_chunk_size: usize,
    /// Splitter overlap in characters.
    pub text_splitter_chunk_overlap: usize,
    /// Nearest neighbours fetched per context query.
    pub context_top_k: usize,
    /// Matches must score strictly above this value to become context.
    pub context_score_threshold: f32,
    /// Hard cap on the context handed to the language model, in characters.
    pub context_max_chars: usize,
    /// Chat completion model.
    pub chat_model: String,
    /// Timeout applied to outbound HTTP requests.
    pub http_timeout_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported blob storage backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Amazon S3 (or a compatible service).
    S3,
    /// Directory on the local filesystem.
    Local,
}

/// Supported vector index backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Qdrant over its HTTP API.
    Qdrant,
    /// Process-local index; contents are lost on restart.
    Memory,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::S3,
            s3_bucket_name: None,
            s3_region: None,
            local_storage_dir: PathBuf::from("./data/blobs"),
            download_tmp_dir: None,
            vector_backend: VectorBackend::Qdrant,
            qdrant_url: "http://127.0.0.1:6333".to_string(),
            qdrant_api_key: None,
            namespace_prefix: "docchat-".to_string(),
            upsert_batch_size: 100,
            embedding_provider: EmbeddingProvider::OpenAI,
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_dimension: 1536,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com".to_string(),
            ollama_url: "http://127.0.0.1:11434".to_string(),
            embedding_max_attempts: 3,
            embedding_backoff_ms: vec![200, 500, 1000],
            embedding_concurrency: 8,
            text_splitter_chunk_size: 1000,
            text_splitter_chunk_overlap: 200,
            context_top_k: 5,
            context_score_threshold: 0.7,
            context_max_chars: 3000,
            chat_model: "gpt-3.5-turbo".to_string(),
            http_timeout_secs: 60,
            server_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    ///
    /// A `.env` file in the working directory is honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let storage_backend = parse_or(&get, "STORAGE_BACKEND", defaults.storage_backend)?;
        let s3_bucket_name = get("S3_BUCKET_NAME");
        let s3_region = get("S3_REGION");
        if storage_backend == StorageBackend::S3 {
            if s3_bucket_name.is_none() {
                return Err(ConfigError::MissingVariable("S3_BUCKET_NAME".into()));
            }
            if s3_region.is_none() {
                return Err(ConfigError::MissingVariable("S3_REGION".into()));
            }
        }

        let embedding_backoff_ms = match get("EMBEDDING_BACKOFF_MS") {
            Some(raw) => parse_backoff(&raw)?,
            None => defaults.embedding_backoff_ms,
        };

        let config = Self {
            storage_backend,
            s3_bucket_name,
            s3_region,
            local_storage_dir: get("LOCAL_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_storage_dir),
            download_tmp_dir: get("DOWNLOAD_TMP_DIR").map(PathBuf::from),
            vector_backend: parse_or(&get, "VECTOR_BACKEND", defaults.vector_backend)?,
            qdrant_url: get("QDRANT_URL").unwrap_or(defaults.qdrant_url),
            qdrant_api_key: get("QDRANT_API_KEY"),
            namespace_prefix: lookup("NAMESPACE_PREFIX").unwrap_or(defaults.namespace_prefix),
            upsert_batch_size: parse_or(&get, "UPSERT_BATCH_SIZE", defaults.upsert_batch_size)?,
            embedding_provider: parse_or(
                &get,
                "EMBEDDING_PROVIDER",
                defaults.embedding_provider,
            )?,
            embedding_model: get("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_dimension: parse_or(
                &get,
                "EMBEDDING_DIMENSION",
                defaults.embedding_dimension,
            )?,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            ollama_url: get("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            embedding_max_attempts: parse_or(
                &get,
                "EMBEDDING_MAX_ATTEMPTS",
                defaults.embedding_max_attempts,
            )?,
            embedding_backoff_ms,
            embedding_concurrency: parse_or(
                &get,
                "EMBEDDING_CONCURRENCY",
                defaults.embedding_concurrency,
            )?,
            text_splitter_chunk_size: parse_or(
                &get,
                "TEXT_SPLITTER_CHUNK_SIZE",
                defaults.text_splitter_chunk_size,
            )?,
            text_splitter_chunk_overlap: parse_or(
                &get,
                "TEXT_SPLITTER_CHUNK_OVERLAP",
                defaults.text_splitter_chunk_overlap,
            )?,
            context_top_k: parse_or(&get, "CONTEXT_TOP_K", defaults.context_top_k)?,
            context_score_threshold: parse_or(
                &get,
                "CONTEXT_SCORE_THRESHOLD",
                defaults.context_score_threshold,
            )?,
            context_max_chars: parse_or(&get, "CONTEXT_MAX_CHARS", defaults.context_max_chars)?,
            chat_model: get("CHAT_MODEL").unwrap_or(defaults.chat_model),
            http_timeout_secs: parse_or(&get, "HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            server_port: get("SERVER_PORT")
                .map(|value| parse_value("SERVER_PORT", &value))
                .transpose()?,
        };

        if config.upsert_batch_size == 0 {
            return Err(invalid("UPSERT_BATCH_SIZE", "0"));
        }
        if config.embedding_max_attempts == 0 {
            return Err(invalid("EMBEDDING_MAX_ATTEMPTS", "0"));
        }
        if config.text_splitter_chunk_size == 0 {
            return Err(invalid("TEXT_SPLITTER_CHUNK_SIZE", "0"));
        }

        Ok(config)
    }

    /// Timeout applied to outbound HTTP clients.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_backoff(raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_value("EMBEDDING_BACKOFF_MS", part))
        .collect()
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "local" => Ok(Self::Local),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}
