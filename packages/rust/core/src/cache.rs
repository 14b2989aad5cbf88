//! On-disk content trees.
//!
//! The local cache and the Unity export directory share one layout:
//!
//! ```text
//! <root>/
//! ├── index-deep.json            (export only)
//! ├── collections-index.json     (export only)
//! ├── collections/
//! │   └── <cid>/
//! │       ├── collection.json
//! │       ├── items-index.json
//! │       └── items/
//! │           └── <id>/
//! │               ├── item.json
//! │               └── cover.jpg
//! └── custom/                    (cache only, hand-edited overlays)
//!     └── collections/<cid>/
//!         ├── collection.json
//!         └── items/<id>.json
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use spacecraft_archive::validate_identifier;
use spacecraft_shared::{
    Collection, IndexDeep, Item, ItemsIndex, Result, SpaceCraftError, validate_collection_id,
};

const COLLECTIONS_DIR: &str = "collections";
const CUSTOM_DIR: &str = "custom";
const ITEMS_DIR: &str = "items";
const COLLECTION_FILE: &str = "collection.json";
const INDEX_FILE: &str = "items-index.json";
const ITEM_FILE: &str = "item.json";
const INDEX_DEEP_FILE: &str = "index-deep.json";
const COLLECTIONS_INDEX_FILE: &str = "collections-index.json";

/// A content directory tree (local cache or Unity export).
#[derive(Debug, Clone)]
pub struct ContentTree {
    root: PathBuf,
}

impl ContentTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    pub fn collections_dir(&self) -> PathBuf {
        self.root.join(COLLECTIONS_DIR)
    }

    pub fn collection_dir(&self, cid: &str) -> PathBuf {
        self.collections_dir().join(cid)
    }

    pub fn collection_path(&self, cid: &str) -> PathBuf {
        self.collection_dir(cid).join(COLLECTION_FILE)
    }

    pub fn index_path(&self, cid: &str) -> PathBuf {
        self.collection_dir(cid).join(INDEX_FILE)
    }

    pub fn item_dir(&self, cid: &str, id: &str) -> PathBuf {
        self.collection_dir(cid).join(ITEMS_DIR).join(id)
    }

    pub fn item_path(&self, cid: &str, id: &str) -> PathBuf {
        self.item_dir(cid, id).join(ITEM_FILE)
    }

    pub fn index_deep_path(&self) -> PathBuf {
        self.root.join(INDEX_DEEP_FILE)
    }

    pub fn collections_index_path(&self) -> PathBuf {
        self.root.join(COLLECTIONS_INDEX_FILE)
    }

    pub fn custom_collection_path(&self, cid: &str) -> PathBuf {
        self.root
            .join(CUSTOM_DIR)
            .join(COLLECTIONS_DIR)
            .join(cid)
            .join(COLLECTION_FILE)
    }

    pub fn custom_item_path(&self, cid: &str, id: &str) -> PathBuf {
        self.root
            .join(CUSTOM_DIR)
            .join(COLLECTIONS_DIR)
            .join(cid)
            .join(ITEMS_DIR)
            .join(format!("{id}.json"))
    }

    // -----------------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------------

    pub fn has_collection(&self, cid: &str) -> bool {
        self.collection_path(cid).is_file()
    }

    pub fn read_collection(&self, cid: &str) -> Result<Collection> {
        validate_collection_id(cid)?;
        read_json(&self.collection_path(cid))
    }

    pub fn write_collection(&self, collection: &Collection) -> Result<()> {
        validate_collection_id(&collection.id)?;
        write_json(&self.collection_path(&collection.id), collection)
    }

    /// Ids of every collection directory holding a `collection.json`, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let dir = self.collections_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(|e| SpaceCraftError::io(&dir, e))? {
            let entry = entry.map_err(|e| SpaceCraftError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.path().join(COLLECTION_FILE).is_file() {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn remove_collection(&self, cid: &str) -> Result<()> {
        validate_collection_id(cid)?;
        let dir = self.collection_dir(cid);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| SpaceCraftError::io(&dir, e))?;
            debug!(path = %dir.display(), "removed collection directory");
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Items index
    // -----------------------------------------------------------------------

    pub fn has_index(&self, cid: &str) -> bool {
        self.index_path(cid).is_file()
    }

    pub fn read_index(&self, cid: &str) -> Result<ItemsIndex> {
        validate_collection_id(cid)?;
        read_json(&self.index_path(cid))
    }

    pub fn write_index(&self, cid: &str, index: &ItemsIndex) -> Result<()> {
        validate_collection_id(cid)?;
        write_json(&self.index_path(cid), index)
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    pub fn has_item(&self, cid: &str, id: &str) -> bool {
        self.item_path(cid, id).is_file()
    }

    pub fn read_item(&self, cid: &str, id: &str) -> Result<Item> {
        validate_collection_id(cid)?;
        validate_identifier(id)?;
        read_json(&self.item_path(cid, id))
    }

    pub fn write_item(&self, cid: &str, item: &Item) -> Result<()> {
        validate_collection_id(cid)?;
        validate_identifier(&item.id)?;
        write_json(&self.item_path(cid, &item.id), item)
    }

    /// Delete an item directory with its cover.
    pub fn remove_item(&self, cid: &str, id: &str) -> Result<()> {
        validate_collection_id(cid)?;
        validate_identifier(id)?;
        let dir = self.item_dir(cid, id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| SpaceCraftError::io(&dir, e))?;
            debug!(path = %dir.display(), "removed item");
        }
        Ok(())
    }

    /// Path of the cover file recorded on `item`, if it exists on disk.
    pub fn cover_path(&self, cid: &str, item: &Item) -> Option<PathBuf> {
        let cover = item.cover_image.as_ref()?;
        let path = self.item_dir(cid, &item.id).join(&cover.file);
        path.is_file().then_some(path)
    }

    pub fn has_cover(&self, cid: &str, item: &Item) -> bool {
        self.cover_path(cid, item).is_some()
    }

    /// Write cover bytes as `cover.<ext>`; returns the file name.
    pub fn write_cover(&self, cid: &str, id: &str, ext: &str, bytes: &[u8]) -> Result<String> {
        validate_collection_id(cid)?;
        validate_identifier(id)?;
        let file = format!("cover.{ext}");
        let path = self.item_dir(cid, id).join(&file);
        write_atomic(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote cover");
        Ok(file)
    }

    // -----------------------------------------------------------------------
    // Export indexes and overlays
    // -----------------------------------------------------------------------

    pub fn read_index_deep(&self) -> Result<IndexDeep> {
        read_json(&self.index_deep_path())
    }

    pub fn write_index_deep(&self, index: &IndexDeep) -> Result<()> {
        write_json(&self.index_deep_path(), index)
    }

    pub fn write_collections_index(&self, ids: &[String]) -> Result<()> {
        write_json(&self.collections_index_path(), &ids)
    }

    /// Read an optional overlay document. Missing files yield `None`.
    pub fn read_overlay(&self, path: &Path) -> Result<Option<Value>> {
        if !path.is_file() {
            return Ok(None);
        }
        read_json(path).map(Some)
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Read and parse a JSON file. A missing file is `NotFound`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SpaceCraftError::not_found(path.display().to_string()));
        }
        Err(e) => return Err(SpaceCraftError::io(path, e)),
    };

    serde_json::from_str(&content)
        .map_err(|e| SpaceCraftError::parse(format!("{}: {e}", path.display())))
}

/// Write a JSON file (pretty-printed, atomically).
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(data).map_err(|e| {
        SpaceCraftError::validation(format!("JSON serialization failed: {e}"))
    })?;
    json.push('\n');
    write_atomic(path, json.as_bytes())?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| SpaceCraftError::validation(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| SpaceCraftError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, bytes).map_err(|e| SpaceCraftError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| SpaceCraftError::io(path, e))?;
    Ok(())
}
