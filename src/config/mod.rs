//! Configuration management.
//!
//! Settings come from three layers, highest priority first:
//! 1. Explicit overrides (CLI flags such as `--data-dir`)
//! 2. Environment variables (`FKB_*`, `GOOGLE_API_KEY`, `OLLAMA_*`, ...)
//! 3. `~/.feynkb/config.json`
//!
//! Anything left unset falls back to a built-in default. Resolution is a
//! pure function of the parsed file and an environment lookup so it can be
//! exercised without touching the process environment.
//!
//! # Data directory layout
//!
//! ```text
//! <data_dir>/
//!   feynman_kb.db            SQLite record store
//!   feynman_kb.ann           vector index blob
//!   feynman_kb_id_map.json   ordered identifier list for the blob
//!   feynman_kb_user.json     write-back delta log
//! ```

use crate::embeddings::{EmbedderConfig, EmbeddingSettings};
use crate::error::{Error, Result};
use crate::index::ForestParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Embedding dimension used when nothing else is configured.
pub const DEFAULT_DIMENSION: usize = 768;

/// Interval between background delta-log flushes.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 600;

/// Timeout applied to the remote semantic-search tier.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

pub const DB_FILE: &str = "feynman_kb.db";
pub const INDEX_FILE: &str = "feynman_kb.ann";
pub const ID_MAP_FILE: &str = "feynman_kb_id_map.json";
pub const DELTA_FILE: &str = "feynman_kb_user.json";

/// Environment lookup used during resolution.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Read a process environment variable, treating empty values as unset.
#[must_use]
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Parse a boolean-ish flag value (`false`/`0`/`no`/`off` are false).
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

/// Get the global FeynKB directory location (`~/.feynkb`).
#[must_use]
pub fn global_feynkb_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".feynkb"))
}

/// Get the config file path.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_path() -> Result<PathBuf> {
    global_feynkb_dir()
        .map(|dir| dir.join("config.json"))
        .ok_or_else(|| Error::Config("Could not determine home directory".into()))
}

// ── Config file ───────────────────────────────────────────────

/// Vector index settings in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSettings {
    pub n_trees: Option<usize>,
    pub leaf_size: Option<usize>,
    pub seed: Option<u64>,
    pub search_k: Option<usize>,
}

/// Remote semantic-search tier settings in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Write-back queue settings in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutosaveSettings {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
}

/// FeynKB configuration file structure.
///
/// Stored at `~/.feynkb/config.json`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbSettings {
    pub data_dir: Option<PathBuf>,
    pub dimension: Option<usize>,
    pub embeddings: Option<EmbeddingSettings>,
    pub index: Option<IndexSettings>,
    pub remote: Option<RemoteSettings>,
    pub autosave: Option<AutosaveSettings>,
}

/// Load a configuration file, returning defaults if it doesn't exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from(path: &Path) -> Result<KbSettings> {
    if !path.exists() {
        return Ok(KbSettings::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {e}")))
}

/// Load the user's configuration file.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config() -> Result<KbSettings> {
    load_config_from(&config_path()?)
}

// ── Resolved configuration ────────────────────────────────────

/// Resolved remote-tier configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Search endpoint; the tier is disabled when unset.
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Resolved write-back queue configuration.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub interval: Duration,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct KbConfig {
    pub data_dir: PathBuf,
    /// Embedding dimension D shared by the store, index and providers.
    pub dimension: usize,
    pub embeddings: EmbedderConfig,
    pub index: ForestParams,
    pub remote: RemoteConfig,
    pub autosave: AutosaveConfig,
}

impl KbConfig {
    /// Resolve the runtime configuration from the user's config file and
    /// the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file is malformed, an environment
    /// override does not parse, or no data directory can be determined.
    pub fn load(data_dir_override: Option<&Path>) -> Result<Self> {
        let settings = load_config()?;
        Self::resolve(&settings, data_dir_override, &process_env)
    }

    /// Resolve a configuration from parsed settings and an env lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if an override does not parse or no data directory
    /// can be determined.
    pub fn resolve(
        settings: &KbSettings,
        data_dir_override: Option<&Path>,
        env: EnvLookup<'_>,
    ) -> Result<Self> {
        let data_dir = match data_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => env("FKB_DATA_DIR")
                .map(PathBuf::from)
                .or_else(|| settings.data_dir.clone())
                .or_else(|| global_feynkb_dir().map(|d| d.join("data")))
                .ok_or_else(|| Error::Config("Could not determine data directory".into()))?,
        };

        let dimension = match env("FKB_EMBEDDING_DIM") {
            Some(raw) => parse_number("FKB_EMBEDDING_DIM", &raw)?,
            None => settings.dimension.unwrap_or(DEFAULT_DIMENSION),
        };
        if dimension == 0 {
            return Err(Error::Config("Embedding dimension must be positive".into()));
        }

        let embeddings = EmbedderConfig::resolve(settings.embeddings.as_ref(), env)?;

        let index_settings = settings.index.clone().unwrap_or_default();
        let defaults = ForestParams::default();
        let index = ForestParams {
            n_trees: index_settings.n_trees.unwrap_or(defaults.n_trees).max(1),
            leaf_size: index_settings.leaf_size.unwrap_or(defaults.leaf_size).max(1),
            seed: index_settings.seed.unwrap_or(defaults.seed),
            search_k: index_settings.search_k,
        };

        let remote_settings = settings.remote.clone().unwrap_or_default();
        let remote = RemoteConfig {
            endpoint: env("FKB_REMOTE_ENDPOINT").or(remote_settings.endpoint),
            token: env("FKB_REMOTE_TOKEN").or(remote_settings.token),
            timeout: Duration::from_secs(
                remote_settings
                    .timeout_secs
                    .unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS),
            ),
        };

        let autosave_settings = settings.autosave.clone().unwrap_or_default();
        let interval_secs = match env("FKB_AUTOSAVE_INTERVAL_SECS") {
            Some(raw) => parse_number("FKB_AUTOSAVE_INTERVAL_SECS", &raw)?,
            None => autosave_settings
                .interval_secs
                .unwrap_or(DEFAULT_AUTOSAVE_INTERVAL_SECS),
        };
        let autosave = AutosaveConfig {
            enabled: autosave_settings.enabled.unwrap_or(true),
            interval: Duration::from_secs(interval_secs.max(1)),
        };

        Ok(Self {
            data_dir,
            dimension,
            embeddings,
            index,
            remote,
            autosave,
        })
    }

    /// Defaults rooted at `data_dir`, ignoring the config file and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Never fails in practice; shares the fallible resolution path.
    pub fn for_data_dir(data_dir: &Path) -> Result<Self> {
        Self::resolve(&KbSettings::default(), Some(data_dir), &|_| None)
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    #[must_use]
    pub fn id_map_path(&self) -> PathBuf {
        self.data_dir.join(ID_MAP_FILE)
    }

    #[must_use]
    pub fn delta_path(&self) -> PathBuf {
        self.data_dir.join(DELTA_FILE)
    }
}

/// Parse a numeric override, naming the variable on failure.
pub(crate) fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a number, got '{raw}'")))
}
