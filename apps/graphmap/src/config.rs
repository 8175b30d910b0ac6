//! # Configuration
//!
//! `graphmap.toml` layout:
//!
//! ```toml
//! [store]
//! backend = "redb"        # or "memory"
//! path = "graphmap.db"    # redb file
//! blob = "graph/default"  # blob path inside the store
//!
//! [lease]
//! duration_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 50
//! max_backoff_ms = 1000
//! ```
//!
//! Every field has a default. The file is taken from `--config`, then from
//! `GRAPHMAP_CONFIG`, then from `./graphmap.toml` if present.

use crate::error::AppError;
use graphmap_core::{DEFAULT_LEASE_DURATION, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "GRAPHMAP_CONFIG";

/// File looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "graphmap.toml";

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    /// Process-local; nothing survives the command.
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redb => "redb",
            Self::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: Backend,
    pub path: PathBuf,
    pub blob: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Redb,
            path: PathBuf::from("graphmap.db"),
            blob: "graph/default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaseConfig {
    pub duration_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_LEASE_DURATION.as_secs(),
        }
    }
}

impl LeaseConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub lease: LeaseConfig,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_toml(source: &str, origin: &Path) -> Result<Self, AppError> {
        let config: Self = toml::from_str(source).map_err(|e| AppError::Config {
            path: origin.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate(origin)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let source = std::fs::read_to_string(path).map_err(|e| AppError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&source, path)
    }

    /// Resolve the configuration file and load it. An explicit or
    /// environment-named file must exist; the working-directory default
    /// is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, AppError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match named {
            Some(path) => Self::from_file(&path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `--database` / `--blob` overrides.
    pub fn with_overrides(mut self, database: Option<PathBuf>, blob: Option<String>) -> Self {
        if let Some(path) = database {
            self.store.path = path;
        }
        if let Some(blob) = blob {
            self.store.blob = blob;
        }
        self
    }

    fn validate(&self, origin: &Path) -> Result<(), AppError> {
        let invalid = |message: &str| AppError::Config {
            path: origin.display().to_string(),
            message: message.to_string(),
        };
        if self.store.blob.trim().is_empty() {
            return Err(invalid("store.blob must not be empty"));
        }
        if self.lease.duration_secs == 0 {
            return Err(invalid("lease.duration_secs must be positive"));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn origin() -> &'static Path {
        Path::new("test.toml")
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml("", origin()).expect("parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.store.backend, Backend::Redb);
        assert_eq!(config.lease.duration(), DEFAULT_LEASE_DURATION);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn full_file() {
        let config = Config::from_toml(
            r#"
            [store]
            backend = "memory"
            path = "other.db"
            blob = "graphs/main"

            [lease]
            duration_secs = 5

            [retry]
            max_attempts = 7
            initial_backoff_ms = 10
            max_backoff_ms = 200
            "#,
            origin(),
        )
        .expect("parse");

        assert_eq!(config.store.backend, Backend::Memory);
        assert_eq!(config.store.path, PathBuf::from("other.db"));
        assert_eq!(config.store.blob, "graphs/main");
        assert_eq!(config.lease.duration(), Duration::from_secs(5));
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_millis(200));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = Config::from_toml("[retry]\nmax_attempts = 1\n", origin()).expect("parse");
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.store, StoreConfig::default());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        for source in [
            "[store]\nbackend = \"postgres\"\n",
            "[store]\ncolour = \"blue\"\n",
            "[lease]\nduration_secs = 0\n",
            "[store]\nblob = \"  \"\n",
            "[retry]\ninitial_backoff_ms = 500\nmax_backoff_ms = 100\n",
        ] {
            match Config::from_toml(source, origin()) {
                Err(AppError::Config { path, .. }) => assert_eq!(path, "test.toml"),
                other => panic!("{source:?} should be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn overrides_replace_store_fields() {
        let config = Config::default()
            .with_overrides(Some(PathBuf::from("x.db")), Some("g/other".into()));
        assert_eq!(config.store.path, PathBuf::from("x.db"));
        assert_eq!(config.store.blob, "g/other");

        let untouched = Config::default().with_overrides(None, None);
        assert_eq!(untouched, Config::default());
    }

    #[test]
    fn explicit_file_is_loaded_and_must_exist() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("graphmap.toml");
        std::fs::write(&path, "[store]\nblob = \"from/file\"\n").expect("write");

        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.store.blob, "from/file");

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(AppError::Config { .. })
        ));
    }
}
