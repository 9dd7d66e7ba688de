//! Configuration management for the index host
//!
//! Handles loading, saving, and validating configuration from TOML files,
//! with environment-variable overrides for the backend knobs.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable overriding the vector backend base URL
pub const ENV_QDRANT_URL: &str = "MOVESIA_QDRANT_URL";
/// Environment variable overriding the collection name
pub const ENV_COLLECTION: &str = "MOVESIA_COLLECTION";
/// Environment variable overriding the embedding dimension
pub const ENV_EMBED_DIM: &str = "MOVESIA_EMBED_DIM";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant REST base URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Qdrant collection name
    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    /// Readiness probe deadline in seconds
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Embedding backend configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Session resolution configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding backend base URL
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

/// Line-window chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Token budget per script chunk
    #[serde(default = "default_script_target_tokens")]
    pub script_target_tokens: usize,

    /// Overlap lines between script chunks
    #[serde(default = "default_script_overlap_lines")]
    pub script_overlap_lines: usize,

    /// Token budget per scene chunk
    #[serde(default = "default_scene_target_tokens")]
    pub scene_target_tokens: usize,

    /// Overlap lines between scene chunks
    #[serde(default = "default_scene_overlap_lines")]
    pub scene_overlap_lines: usize,
}

/// Session resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Extra project roots scanned during productGUID resolution,
    /// in addition to whatever recent-project list the host supplies.
    #[serde(default)]
    pub extra_roots: Vec<PathBuf>,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for host data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite catalog
    pub db_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection_name: default_collection_name(),
            ready_timeout_secs: default_ready_timeout_secs(),
            embedding: EmbeddingConfig::default(),
            chunk: ChunkConfig::default(),
            session: SessionConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            script_target_tokens: default_script_target_tokens(),
            script_overlap_lines: default_script_overlap_lines(),
            scene_target_tokens: default_scene_target_tokens(),
            scene_overlap_lines: default_scene_overlap_lines(),
        }
    }
}

impl Config {
    /// Get the default base directory (per-user application data)
    pub fn default_base_dir() -> PathBuf {
        dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("movesia")
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            db_file: base.join("catalog.db"),
            base_dir: base,
        };
    }

    /// Load configuration from a specific base directory, falling back to
    /// defaults when no config file exists yet.
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Apply environment-variable overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_QDRANT_URL) {
            self.qdrant_url = url;
        }
        if let Ok(name) = std::env::var(ENV_COLLECTION) {
            self.collection_name = name;
        }
        if let Ok(dim) = std::env::var(ENV_EMBED_DIM) {
            if let Ok(parsed) = dim.parse::<usize>() {
                self.embedding.dimension = parsed;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.chunk.script_target_tokens == 0 || self.chunk.scene_target_tokens == 0 {
            return Err(Error::Config(
                "chunk token budgets must be positive".to_string(),
            ));
        }

        if self.collection_name.is_empty() {
            return Err(Error::Config(
                "collection_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.qdrant_url, "http://127.0.0.1:6333");
        assert_eq!(config.collection_name, "movesia");
        assert_eq!(config.embedding.dimension, 384);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.collection_name = "test_collection".to_string();

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.collection_name, "test_collection");
        assert_eq!(loaded.paths.db_file, tmp.path().join("catalog.db"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.embedding.dimension = 0;
        assert!(config.validate().is_err());

        config.embedding.dimension = 384;
        assert!(config.validate().is_ok());

        config.collection_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_defaults_match_profiles() {
        let config = Config::default();
        assert_eq!(config.chunk.script_target_tokens, 500);
        assert_eq!(config.chunk.script_overlap_lines, 20);
        assert_eq!(config.chunk.scene_target_tokens, 700);
        assert_eq!(config.chunk.scene_overlap_lines, 30);
    }
}
