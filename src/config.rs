use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::records::types::EmbeddingKind;
use crate::search::index::IndexBackend;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TomeConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"` (ONNX Runtime) or `"hash"` (feature hashing, no model files).
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dimension: usize,
    /// Which per-record embedding the search engine ranks over.
    pub kind: EmbeddingKind,
}

/// Knobs for the semantic search engine: cache sizing, model idling, and
/// which vector index backend to use.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub cache_max_size: usize,
    pub cache_ttl_seconds: u64,
    pub model_idle_timeout_minutes: u64,
    pub vector_index_backend: IndexBackend,
    pub default_k: usize,
}

impl Default for TomeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 7411,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_tome_dir()
            .join("tome.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_tome_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
            dimension: crate::embedding::EMBEDDING_DIM,
            kind: EmbeddingKind::Content,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_max_size: 1000,
            cache_ttl_seconds: 600,
            model_idle_timeout_minutes: 10,
            vector_index_backend: IndexBackend::Auto,
            default_k: 5,
        }
    }
}

impl SearchConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn model_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.model_idle_timeout_minutes.saturating_mul(60))
    }
}

/// Returns `~/.tome/`
pub fn default_tome_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tome")
}

/// Returns the default config file path: `~/.tome/config.toml`
pub fn default_config_path() -> PathBuf {
    default_tome_dir().join("config.toml")
}

impl TomeConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TomeConfig::default()
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides (TOME_DB, TOME_LOG_LEVEL, TOME_INDEX_BACKEND).
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("TOME_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("TOME_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("TOME_INDEX_BACKEND") {
            self.search.vector_index_backend = val
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("invalid TOME_INDEX_BACKEND")?;
        }
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TomeConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.search.cache_max_size, 1000);
        assert_eq!(config.search.cache_ttl_seconds, 600);
        assert_eq!(config.search.model_idle_timeout_minutes, 10);
        assert_eq!(config.search.vector_index_backend, IndexBackend::Auto);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.embedding.kind, EmbeddingKind::Content);
        assert!(config.storage.db_path.ends_with("tome.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"

[storage]
db_path = "/tmp/test.db"

[embedding]
provider = "hash"
kind = "summary"

[search]
cache_max_size = 64
vector_index_backend = "fallback"
"#;
        let config: TomeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.kind, EmbeddingKind::Summary);
        assert_eq!(config.search.cache_max_size, 64);
        assert_eq!(config.search.vector_index_backend, IndexBackend::Fallback);
        // defaults still apply for unset fields
        assert_eq!(config.search.cache_ttl_seconds, 600);
        assert_eq!(config.embedding.dimension, 384);
    }

    #[test]
    fn rejects_unknown_backend() {
        let toml_str = r#"
[search]
vector_index_backend = "faiss"
"#;
        assert!(toml::from_str::<TomeConfig>(toml_str).is_err());
    }

    #[test]
    fn durations_follow_config_units() {
        let search = SearchConfig {
            cache_ttl_seconds: 30,
            model_idle_timeout_minutes: 2,
            ..SearchConfig::default()
        };
        assert_eq!(search.cache_ttl(), Duration::from_secs(30));
        assert_eq!(search.model_idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn huge_idle_timeout_saturates() {
        let search = SearchConfig {
            model_idle_timeout_minutes: u64::MAX,
            ..SearchConfig::default()
        };
        assert_eq!(search.model_idle_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = TomeConfig::default();
        std::env::set_var("TOME_DB", "/tmp/override.db");
        std::env::set_var("TOME_LOG_LEVEL", "trace");
        std::env::set_var("TOME_INDEX_BACKEND", "native");

        config.apply_env_overrides().unwrap();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.search.vector_index_backend, IndexBackend::Native);

        // Clean up
        std::env::remove_var("TOME_DB");
        std::env::remove_var("TOME_LOG_LEVEL");
        std::env::remove_var("TOME_INDEX_BACKEND");
    }
}
