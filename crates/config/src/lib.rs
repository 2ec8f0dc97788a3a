//! Configuration loading and validation.
//!
//! Configuration is merged, later sources winning, from:
//! 1. built-in defaults,
//! 2. an optional TOML, YAML or JSON file (picked by extension),
//! 3. environment variables prefixed with `FOLIO_` (for example
//!    `FOLIO_LOW_MEMORY_MODE=true`).

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

const ENV_PREFIX: &str = "FOLIO_";
/// File name of the index database inside the data directory.
const DATABASE_FILE: &str = "index.sqlite";

/// Settings that control how the index is built and served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the index database.
    pub data_dir: PathBuf,
    /// Optional filter file deciding which records are indexed.
    pub filter_file: Option<PathBuf>,
    /// Trade build speed for a smaller memory footprint.
    pub low_memory_mode: bool,
    /// Cache search results in memory and in the store.
    pub query_cache_enabled: bool,
    /// Minutes a cached result may go unused before it is swept. `0`
    /// disables sweeping.
    pub cache_clean_interval: u64,
    /// Allow the filter file to carry a custom record predicate.
    pub unsafe_filter: bool,
    /// Record chunks between memory reclamation checkpoints while ingesting.
    /// Low memory mode checkpoints after every chunk regardless.
    pub reclaim_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            filter_file: None,
            low_memory_mode: false,
            query_cache_enabled: true,
            cache_clean_interval: 60,
            unsafe_filter: false,
            reclaim_every: 10,
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "folio", "folio")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl Config {
    /// Load configuration from defaults, an optional file, and the
    /// environment.
    #[instrument(level = "debug")]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let figment = Self::figment(file)?.merge(Env::prefixed(ENV_PREFIX));
        Self::extract(figment)
    }

    /// Defaults plus the optional file, without the environment.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        let Some(path) = file else {
            return Ok(figment);
        };
        if !path.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        debug!(path = %path.display(), "merging configuration file");
        let extension = path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
        })
    }

    /// Extract and validate a configuration from any figment.
    pub fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reclaim_every == 0 {
            exn::bail!(ErrorKind::Invalid("reclaim_every must be at least 1".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("data_dir must not be empty".to_string()));
        }
        Ok(())
    }

    /// Path of the index database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// How long a cached result may go unused, `None` when sweeping is off.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_clean_interval > 0).then(|| Duration::from_secs(self.cache_clean_interval.saturating_mul(60)))
    }
}
