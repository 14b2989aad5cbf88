//! Structural checks of a cache or export tree.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, instrument};

use spacecraft_archive::validate_identifier;
use spacecraft_shared::{CURRENT_SCHEMA_VERSION, IndexDeep, Result, SpaceCraftError};

use crate::cache::{ContentTree, read_json};

/// Findings of a validation pass. Problems are collected, not fatal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub root: PathBuf,
    pub collections: usize,
    pub items: usize,
    /// Index entries without an `item.json`.
    pub missing_items: usize,
    pub problems: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    fn problem(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(%message, "validation problem");
        self.problems.push(message);
    }
}

/// Validate the local content cache.
#[instrument]
pub fn validate_cache(root: &Path) -> Result<ValidationReport> {
    let tree = open(root)?;
    let mut report = ValidationReport {
        root: root.to_path_buf(),
        ..ValidationReport::default()
    };

    for cid in tree.list_collections()? {
        check_collection(&tree, &cid, &mut report);
    }
    if report.collections == 0 {
        report.problem("no collections found");
    }
    Ok(report)
}

/// Validate a Unity export tree, including `index-deep.json`.
#[instrument]
pub fn validate_export(root: &Path) -> Result<ValidationReport> {
    let tree = open(root)?;
    let mut report = ValidationReport {
        root: root.to_path_buf(),
        ..ValidationReport::default()
    };

    let listed: Vec<String> = match read_json(&tree.collections_index_path()) {
        Ok(listed) => listed,
        Err(e) => {
            report.problem(format!("collections-index.json: {e}"));
            Vec::new()
        }
    };

    let deep: Option<IndexDeep> = match tree.read_index_deep() {
        Ok(deep) => Some(deep),
        Err(e) => {
            report.problem(format!("index-deep.json: {e}"));
            None
        }
    };

    if let Some(deep) = &deep {
        if deep.schema_version != CURRENT_SCHEMA_VERSION {
            report.problem(format!(
                "unsupported schemaVersion: {} (expected {CURRENT_SCHEMA_VERSION})",
                deep.schema_version
            ));
        }
        if !listed.is_empty() && deep.collections_index != listed {
            report.problem("collections-index.json disagrees with index-deep.json");
        }
        for cid in &deep.collections_index {
            match deep.collections.get(cid) {
                Some(entry) => {
                    for id in &entry.items_index {
                        if !deep.items.contains_key(id) {
                            report.problem(format!("index-deep: item '{id}' of '{cid}' has no entry"));
                        }
                    }
                }
                None => report.problem(format!("index-deep: collection '{cid}' has no entry")),
            }
        }
    }

    for cid in &listed {
        if !tree.has_collection(cid) {
            report.problem(format!("collection '{cid}' listed but missing on disk"));
            continue;
        }
        check_collection(&tree, cid, &mut report);
    }
    if listed.is_empty() && deep.is_some() {
        report.problem("no collections exported");
    }
    Ok(report)
}

fn open(root: &Path) -> Result<ContentTree> {
    if !root.is_dir() {
        return Err(SpaceCraftError::not_found(format!(
            "content directory {}",
            root.display()
        )));
    }
    Ok(ContentTree::new(root))
}

fn check_collection(tree: &ContentTree, cid: &str, report: &mut ValidationReport) {
    let collection = match tree.read_collection(cid) {
        Ok(collection) => collection,
        Err(e) => {
            report.problem(format!("collection '{cid}': {e}"));
            return;
        }
    };
    report.collections += 1;

    if collection.id != cid {
        report.problem(format!(
            "collection '{cid}': id field is '{}'",
            collection.id
        ));
    }

    let index = match tree.read_index(cid) {
        Ok(index) => index,
        Err(e) => {
            report.problem(format!("collection '{cid}': items-index.json: {e}"));
            return;
        }
    };

    for id in &index {
        if let Err(e) = validate_identifier(id) {
            report.problem(format!("collection '{cid}': {e}"));
            continue;
        }
        if !tree.has_item(cid, id) {
            debug!(collection = cid, id = %id, "index entry without item.json");
            report.missing_items += 1;
            continue;
        }
        match tree.read_item(cid, id) {
            Ok(item) => {
                report.items += 1;
                if item.id != *id {
                    report.problem(format!("item '{cid}/{id}': id field is '{}'", item.id));
                }
                if item.cover_image.is_some() && tree.cover_path(cid, &item).is_none() {
                    report.problem(format!("item '{cid}/{id}': cover file missing"));
                }
            }
            Err(e) => report.problem(format!("item '{cid}/{id}': {e}")),
        }
    }
}
