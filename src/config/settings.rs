use crate::config::source_registry::{Capability, SourceRegistry};
use directories::ProjectDirs;
use log::debug;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_PARALLEL_SOURCES: usize = 4;
const DEFAULT_WRITE_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error(
        "Store write queue ({queue}) must be at least worker pool size + 2 ({required}); \
         workers would deadlock waiting for store capacity"
    )]
    PoolMisaligned { queue: usize, required: usize },
}

/// Runtime settings, read once from the environment at process start. No
/// hot reload.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path of the redb database file.
    pub database_path: PathBuf,
    /// Root directory of the on-disk bulk-file cache.
    pub bulk_cache_dir: PathBuf,
    pub log_level: String,
    /// Opaque NCBI key, forwarded to eutils/PubTator requests when set.
    pub ncbi_api_key: Option<String>,
    /// Optional newline-separated list of panel gene symbols.
    pub panel_path: Option<PathBuf>,
    /// Optional source-registry config file replacing the built-in roster.
    pub registry_path: Option<PathBuf>,
    pub max_parallel_sources: usize,
    /// Depth of the serialized store-writer queue; stands in for a SQL
    /// connection pool in the co-sizing check.
    pub store_write_queue: usize,
    pub l1_cache_capacity: usize,
}

/// Platform cache directory, falling back to a relative path when no
/// home directory exists (containers, CI).
fn default_bulk_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", env!("CARGO_PKG_NAME"))
        .map(|dirs| dirs.cache_dir().join("bulk"))
        .unwrap_or_else(|| PathBuf::from("bulk-cache"))
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_path: PathBuf::from("nephrogene.redb"),
            bulk_cache_dir: default_bulk_cache_dir(),
            log_level: "info".to_string(),
            ncbi_api_key: None,
            panel_path: None,
            registry_path: None,
            max_parallel_sources: DEFAULT_PARALLEL_SOURCES,
            store_write_queue: DEFAULT_WRITE_QUEUE,
            l1_cache_capacity: crate::caching::DEFAULT_L1_CAPACITY,
        }
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name).ok().map(PathBuf::from)
}

fn env_usize(name: &str, fallback: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl Settings {
    pub fn from_env() -> Self {
        // Values from a .env file fill in anything the environment leaves
        // unset; real environment variables win.
        dotenvy::dotenv().ok();
        let defaults = Settings::default();
        let settings = Settings {
            database_path: env_path("DATABASE_PATH").unwrap_or(defaults.database_path),
            bulk_cache_dir: env_path("BULK_CACHE_DIR").unwrap_or(defaults.bulk_cache_dir),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            ncbi_api_key: env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty()),
            panel_path: env_path("PANEL_GENES_PATH"),
            registry_path: env_path("SOURCE_REGISTRY_PATH"),
            max_parallel_sources: env_usize("MAX_PARALLEL_SOURCES", defaults.max_parallel_sources),
            store_write_queue: env_usize("STORE_WRITE_QUEUE", defaults.store_write_queue),
            l1_cache_capacity: env_usize("L1_CACHE_CAPACITY", defaults.l1_cache_capacity),
        };
        debug!("Settings loaded: {settings:?}");
        settings
    }

    /// Largest per-driver worker pool the registry can demand:
    /// `max(2, rate_limit)` over the per-gene sources.
    pub fn max_workers(&self, registry: &SourceRegistry) -> usize {
        registry
            .iter()
            .filter(|s| s.has_capability(Capability::SupportsPerGene))
            .map(|s| (s.rate_limit_per_sec as usize).max(2))
            .max()
            .unwrap_or(2)
    }

    /// Startup check. Aborting here beats deadlocking workers against the
    /// store-writer queue mid-run.
    pub fn validate(&self, registry: &SourceRegistry) -> Result<(), SettingsError> {
        if self.max_parallel_sources == 0 {
            return Err(SettingsError::Invalid {
                name: "MAX_PARALLEL_SOURCES".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.l1_cache_capacity == 0 {
            return Err(SettingsError::Invalid {
                name: "L1_CACHE_CAPACITY".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let required = self.max_workers(registry) + 2;
        if self.store_write_queue < required {
            return Err(SettingsError::PoolMisaligned {
                queue: self.store_write_queue,
                required,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_defaults_pass_validation() {
        let settings = Settings::default();
        settings.validate(&SourceRegistry::builtin()).unwrap();
    }

    #[rstest]
    fn test_pool_misalignment_rejected() {
        let settings = Settings {
            store_write_queue: 2,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(&SourceRegistry::builtin()),
            Err(SettingsError::PoolMisaligned { .. })
        ));
    }

    #[rstest]
    fn test_zero_parallelism_rejected() {
        let settings = Settings {
            max_parallel_sources: 0,
            ..Settings::default()
        };
        assert!(settings.validate(&SourceRegistry::builtin()).is_err());
    }

    #[rstest]
    fn test_max_workers_tracks_rate_limits() {
        let registry = SourceRegistry::builtin();
        let settings = Settings::default();
        // hpo runs at 4 req/s, the fastest per-gene source in the roster.
        assert_eq!(settings.max_workers(&registry), 4);
    }
}
