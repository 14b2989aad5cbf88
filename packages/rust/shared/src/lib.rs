//! Shared types, error model, and configuration for SpaceCraft.
//!
//! This crate is the foundation depended on by all other SpaceCraft crates.
//! It provides:
//! - [`SpaceCraftError`] — the unified error type
//! - Domain types ([`Item`], [`Collection`], [`IndexDeep`], [`ExportId`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArchiveConfig, CollectionRegistryEntry, DefaultsConfig, FiltersConfig,
    PipelineConfig, config_dir, config_file_path, init_config, init_config_at, load_config,
    load_config_from,
};
pub use error::{Result, SpaceCraftError};
pub use types::{
    CURRENT_SCHEMA_VERSION, Collection, CollectionEntry, CoverImage, ExportId, IndexDeep, Item,
    ItemsIndex, validate_collection_id,
};
