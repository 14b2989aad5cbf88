//! Core domain types for SpaceCraft content documents.
//!
//! Every document here is written to disk as JSON and read back by the Unity
//! application, so field names are camelCase on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Result, SpaceCraftError};

/// Current schema version for `index-deep.json`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// An ordered list of item identifiers (`items-index.json`).
pub type ItemsIndex = Vec<String>;

// ---------------------------------------------------------------------------
// ExportId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one export run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportId(pub Uuid);

impl ExportId {
    /// Generate a new time-sortable export identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ExportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExportId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// CoverImage
// ---------------------------------------------------------------------------

/// Cached cover image facts recorded on an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverImage {
    /// File name inside the item directory (e.g. `cover.jpg`).
    pub file: String,
    pub width: u32,
    pub height: u32,
    /// Image format extension (`jpg`, `png`, `gif`).
    pub format: String,
    /// SHA-256 of the image bytes.
    pub sha256: String,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A single archive.org item, normalized (`item.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// archive.org identifier.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Plain-text description (HTML stripped).
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mediatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// archive.org collections this item belongs to (favorites lists removed).
    #[serde(default)]
    pub collections: Vec<String>,
    /// Number of user favorites lists containing this item.
    #[serde(default)]
    pub favorite_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloads: Option<u64>,
    /// Canonical `details` page URL.
    #[serde(default)]
    pub archive_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<CoverImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
    /// SHA-256 of the upstream metadata, used to detect changes.
    #[serde(default)]
    pub metadata_hash: String,
    /// Fields contributed by custom overlays that have no typed slot.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// A named group of archive.org items (`collection.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// archive.org advanced-search query selecting the items.
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Item-id glob patterns to keep on export.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,
    /// Item-id glob patterns to drop on export.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
    /// Exclusion list: item ids never exported.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_items: Vec<String>,
    #[serde(default)]
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_imported: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Collection {
    /// A bare collection with only identity and query set.
    pub fn new(id: impl Into<String>, name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            query: query.into(),
            sort: None,
            limit: None,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            excluded_items: Vec::new(),
            item_count: 0,
            last_imported: None,
            extra: Map::new(),
        }
    }
}

/// Check that a collection id is usable as a single directory name.
pub fn validate_collection_id(cid: &str) -> Result<()> {
    if cid.is_empty() || cid.contains(['/', '\\']) || cid.starts_with('.') {
        return Err(SpaceCraftError::validation(format!(
            "invalid collection id '{cid}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// IndexDeep
// ---------------------------------------------------------------------------

/// One collection inside `index-deep.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    pub collection: Collection,
    pub items_index: ItemsIndex,
}

/// The consolidated export index consumed by Unity (`index-deep.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDeep {
    pub schema_version: u32,
    pub export_id: ExportId,
    pub generated_at: DateTime<Utc>,
    /// Collection ids in export order.
    pub collections_index: Vec<String>,
    pub collections: BTreeMap<String, CollectionEntry>,
    pub items: BTreeMap<String, Item>,
}

impl IndexDeep {
    pub fn new(export_id: ExportId) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            export_id,
            generated_at: Utc::now(),
            collections_index: Vec::new(),
            collections: BTreeMap::new(),
            items: BTreeMap::new(),
        }
    }
}
