//! Configuration management for ragline
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.ragline/config.toml
//!
//! Credentials never live in the file; they are read from the process
//! environment once at startup into [`Credentials`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{RagError, Result};
use crate::types::{IndexSpec, SimilarityMetric};

/// Environment variable holding the OpenAI API key
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable holding the Pinecone API key
pub const PINECONE_API_KEY_ENV: &str = "PINECONE_API_KEY";
/// Optional Qdrant API key
pub const QDRANT_API_KEY_ENV: &str = "QDRANT_API_KEY";

/// Complete configuration for ragline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
    pub ingest: IngestConfig,
    pub network: NetworkConfig,
    pub paths: PathsConfig,
}

/// Which embedder produces vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Openai,
    /// Deterministic offline embedder
    Hashing,
}

/// Which vector index backend stores entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Pinecone,
    Qdrant,
    Memory,
}

impl std::str::FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pinecone" => Ok(IndexBackend::Pinecone),
            "qdrant" => Ok(IndexBackend::Qdrant),
            "memory" => Ok(IndexBackend::Memory),
            other => Err(format!("unknown index backend: {}", other)),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    pub max_input_chars: usize,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    pub name: String,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub cloud: String,
    pub region: String,
    /// Qdrant endpoint, or Pinecone control plane override
    pub url: Option<String>,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

/// Answer synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub enabled: bool,
    pub model: String,
    pub base_url: String,
    pub max_context_chars: usize,
    pub system_prompt: String,
}

/// Dataset ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// CSV path or http(s) URL; built-in samples when unset
    pub source: Option<String>,
    pub concurrency: usize,
}

/// Remote call budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

/// File system paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub state_dir: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Openai,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            base_url: "https://api.openai.com/v1".to_string(),
            max_input_chars: 30_000,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Pinecone,
            name: "fabric-rag-demo".to_string(),
            dimension: 1536,
            metric: SimilarityMetric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
            url: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_context_chars: 6_000,
            system_prompt: "You answer questions using only the provided context. \
                If the context does not contain the answer, say that you do not know."
                .to_string(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: None,
            concurrency: 1,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: "~/.ragline".to_string(),
        }
    }
}

/// API keys loaded once from the environment, read-only afterwards
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub qdrant_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("pinecone_api_key", &mask(&self.pinecone_api_key))
            .field("qdrant_api_key", &mask(&self.qdrant_api_key))
            .finish()
    }
}

impl Credentials {
    /// Read API keys from the process environment
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: read(OPENAI_API_KEY_ENV),
            pinecone_api_key: read(PINECONE_API_KEY_ENV),
            qdrant_api_key: read(QDRANT_API_KEY_ENV),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(config_path) = path {
            Self::load_from_file(&config_path)?
        } else {
            Self::load_default()?
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RagError::ConfigError(format!("Failed to read config: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| RagError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(Config::default())
    }

    /// `~/.ragline/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ragline").join("config.toml"))
    }

    /// Write this config as a starting file, keeping an existing one unless `force`
    pub fn init(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(RagError::ConfigError(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        self.save(path)
    }

    /// Environment overrides for the index name and backend
    pub fn apply_env_overrides(&mut self) {
        let name = std::env::var("RAGLINE_INDEX_NAME")
            .or_else(|_| std::env::var("PINECONE_INDEX"))
            .ok()
            .filter(|v| !v.trim().is_empty());
        if let Some(name) = name {
            self.index.name = name;
        }

        if let Some(backend) = std::env::var("RAGLINE_INDEX_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.index.backend = backend;
        }
    }

    /// Switch to the in-process embedder and index with synthesis off
    pub fn offline(mut self) -> Self {
        self.embedding.provider = EmbeddingProvider::Hashing;
        self.index.backend = IndexBackend::Memory;
        self.synthesis.enabled = false;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.index.name.trim().is_empty() {
            return Err(RagError::ConfigError("index.name must not be empty".to_string()));
        }

        if self.index.dimension == 0 || self.embedding.dimension == 0 {
            return Err(RagError::ConfigError(
                "embedding and index dimensions must be greater than 0".to_string(),
            ));
        }

        if self.embedding.dimension != self.index.dimension {
            return Err(RagError::ConfigError(format!(
                "embedding.dimension ({}) must equal index.dimension ({})",
                self.embedding.dimension, self.index.dimension
            )));
        }

        if self.retrieval.top_k == 0 {
            return Err(RagError::ConfigError(
                "retrieval.top_k must be greater than 0".to_string(),
            ));
        }

        if self.ingest.concurrency == 0 {
            return Err(RagError::ConfigError(
                "ingest.concurrency must be greater than 0".to_string(),
            ));
        }

        if self.network.timeout_secs == 0 {
            return Err(RagError::ConfigError(
                "network.timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.embedding.max_input_chars == 0 {
            return Err(RagError::ConfigError(
                "embedding.max_input_chars must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Check that every remote provider in use has its credential
    pub fn validate_credentials(&self, credentials: &Credentials) -> Result<()> {
        let needs_openai = self.embedding.provider == EmbeddingProvider::Openai
            || self.synthesis.enabled;

        if needs_openai && credentials.openai_api_key.is_none() {
            return Err(RagError::ConfigError(format!(
                "{} is not set (required by the embedding or synthesis provider)",
                OPENAI_API_KEY_ENV
            )));
        }

        if self.index.backend == IndexBackend::Pinecone && credentials.pinecone_api_key.is_none() {
            return Err(RagError::ConfigError(format!(
                "{} is not set (required by the pinecone backend)",
                PINECONE_API_KEY_ENV
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RagError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::ConfigError(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| RagError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Index creation parameters derived from the config
    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            name: self.index.name.clone(),
            dimension: self.index.dimension,
            metric: self.index.metric,
            cloud: self.index.cloud.clone(),
            region: self.index.region.clone(),
        }
    }

    /// Per-call timeout for remote services
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    /// Expand tilde in paths
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    /// Get state directory path
    pub fn state_dir(&self) -> PathBuf {
        Self::expand_path(&self.paths.state_dir)
    }

    /// REPL history file
    pub fn history_path(&self) -> PathBuf {
        self.state_dir().join("history")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.index.dimension, 1536);
        assert_eq!(config.index.metric, SimilarityMetric::Cosine);
        assert_eq!(config.index.cloud, "aws");
        assert_eq!(config.index.region, "us-east-1");
        assert_eq!(config.retrieval.top_k, 3);
    }

    #[test]
    fn test_config_validation_success() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_index_name() {
        let mut config = Config::default();
        config.index.name = "  ".to_string();
        assert!(matches!(config.validate(), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn test_config_validation_dimension_mismatch() {
        let mut config = Config::default();
        config.index.dimension = 768;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_top_k() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_concurrency() {
        let mut config = Config::default();
        config.ingest.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = Config::default();
        let err = config.validate_credentials(&Credentials::default()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains(OPENAI_API_KEY_ENV));
    }

    #[test]
    fn test_missing_pinecone_key_rejected() {
        let config = Config::default();
        let credentials = Credentials {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let err = config.validate_credentials(&credentials).unwrap_err();
        assert!(err.to_string().contains(PINECONE_API_KEY_ENV));
    }

    #[test]
    fn test_offline_needs_no_credentials() {
        let config = Config::default().offline();
        assert_eq!(config.index.backend, IndexBackend::Memory);
        assert!(!config.synthesis.enabled);
        assert!(config.validate_credentials(&Credentials::default()).is_ok());
    }

    #[test]
    fn test_credentials_debug_masks_keys() {
        let credentials = Credentials {
            openai_api_key: Some("sk-secret".to_string()),
            ..Default::default()
        };
        let printed = format!("{:?}", credentials);
        assert!(!printed.contains("sk-secret"));
        assert!(printed.contains("<set>"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [index]
            backend = "qdrant"
            name = "docs"
            metric = "dotproduct"

            [retrieval]
            top_k = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.index.backend, IndexBackend::Qdrant);
        assert_eq!(config.index.name, "docs");
        assert_eq!(config.index.metric, SimilarityMetric::Dotproduct);
        assert_eq!(config.index.dimension, 1536);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Openai);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.index.name = "saved-index".to_string();
        config.save(&path).unwrap();

        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.index.name, "saved-index");
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        Config::default().init(&path, false).unwrap();
        assert!(Config::load_from_file(&path).is_ok());

        let mut changed = Config::default();
        changed.index.name = "other".to_string();
        assert!(matches!(changed.init(&path, false), Err(RagError::ConfigError(_))));
        assert_eq!(Config::load_from_file(&path).unwrap().index.name, "fabric-rag-demo");

        changed.init(&path, true).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap().index.name, "other");
    }

    #[test]
    fn test_index_spec() {
        let spec = Config::default().index_spec();
        assert_eq!(spec.name, "fabric-rag-demo");
        assert_eq!(spec.dimension, 1536);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = Config::expand_path("~/.ragline");
        assert!(!expanded.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = "/absolute/path";
        let expanded = Config::expand_path(path);
        assert_eq!(expanded.to_string_lossy(), path);
    }
}
