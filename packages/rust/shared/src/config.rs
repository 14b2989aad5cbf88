//! Application configuration for SpaceCraft.
//!
//! User config lives at `~/.spacecraft/spacecraft.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpaceCraftError};
use crate::types::{Collection, validate_collection_id};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "spacecraft.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".spacecraft";

// ---------------------------------------------------------------------------
// Config structs (matching spacecraft.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// archive.org client settings.
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Export filters applied to every collection.
    #[serde(default)]
    pub filters: FiltersConfig,

    /// Registered collections.
    #[serde(default)]
    pub collections: Vec<CollectionRegistryEntry>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Local cache of imported collections.
    #[serde(default = "default_content_dir")]
    pub content_dir: String,

    /// Unity-consumable export tree.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            content_dir: default_content_dir(),
            export_dir: default_export_dir(),
        }
    }
}

fn default_content_dir() -> String {
    "Content".into()
}
fn default_export_dir() -> String {
    "Unity/SpaceCraft/Assets/StreamingAssets/Content".into()
}

/// `[archive]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the archive.org API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Minimum ms between consecutive requests.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Largest cover image accepted, in bytes.
    #[serde(default = "default_max_cover_bytes")]
    pub max_cover_bytes: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            rate_limit_ms: default_rate_limit(),
            max_cover_bytes: default_max_cover_bytes(),
        }
    }
}

fn default_base_url() -> String {
    "https://archive.org".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_rate_limit() -> u64 {
    250
}
fn default_max_cover_bytes() -> u64 {
    10 * 1024 * 1024
}

/// `[filters]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// Item-id include patterns.
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// Item-id exclude patterns.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

/// `[[collections]]` entry: a collection registered for import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRegistryEntry {
    /// Stable collection id (directory name).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// archive.org advanced-search query.
    pub query: String,
    /// Optional search sort, e.g. `downloads desc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// Maximum number of items to import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl CollectionRegistryEntry {
    /// A fresh `collection.json` document for this registry entry.
    pub fn to_collection(&self) -> Collection {
        let mut collection = Collection::new(&self.id, &self.name, &self.query);
        collection.sort = self.sort.clone();
        collection.limit = self.limit;
        collection
    }
}

// ---------------------------------------------------------------------------
// Pipeline config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline configuration: merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub content_dir: PathBuf,
    pub export_dir: PathBuf,
    pub archive: ArchiveConfig,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Enabled collections, in registry order.
    pub collections: Vec<CollectionRegistryEntry>,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            content_dir: PathBuf::from(&config.defaults.content_dir),
            export_dir: PathBuf::from(&config.defaults.export_dir),
            archive: config.archive.clone(),
            include_patterns: config.filters.include_patterns.clone(),
            exclude_patterns: config.filters.exclude_patterns.clone(),
            collections: config
                .collections
                .iter()
                .filter(|c| c.enabled)
                .cloned()
                .collect(),
        }
    }
}

impl PipelineConfig {
    /// Look up an enabled collection by id.
    pub fn collection(&self, id: &str) -> Result<&CollectionRegistryEntry> {
        self.collections
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| SpaceCraftError::not_found(format!("collection '{id}' in config")))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.spacecraft/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SpaceCraftError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.spacecraft/spacecraft.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SpaceCraftError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        SpaceCraftError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Reject registries that would collide on disk.
fn validate_config(config: &AppConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for entry in &config.collections {
        validate_collection_id(&entry.id)
            .map_err(|_| SpaceCraftError::config(format!("invalid collection id '{}'", entry.id)))?;
        if !seen.insert(entry.id.as_str()) {
            return Err(SpaceCraftError::config(format!(
                "duplicate collection id '{}'",
                entry.id
            )));
        }
    }

    url::Url::parse(&config.archive.base_url).map_err(|e| {
        SpaceCraftError::config(format!("invalid archive.base_url '{}': {e}", config.archive.base_url))
    })?;

    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`. Fails if it already exists.
pub fn init_config_at(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(SpaceCraftError::config(format!(
            "{} already exists",
            path.display()
        )));
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| SpaceCraftError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SpaceCraftError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| SpaceCraftError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(())
}
