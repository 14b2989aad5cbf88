//! Export phase: local content cache → Unity StreamingAssets tree.
//!
//! Custom overlays are merged and item filters applied here, so the cache
//! always mirrors archive.org and the export is what Unity loads.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use spacecraft_shared::{
    Collection, CollectionEntry, ExportId, IndexDeep, Item, Result, SpaceCraftError,
    validate_collection_id,
};

use crate::cache::{ContentTree, write_atomic};
use crate::cover::sha256_file;
use crate::filter::ItemFilter;
use crate::overlay::{apply_collection_overlay, apply_item_overlay};
use crate::pipeline::ProgressReporter;

/// Configuration for an export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Root of the Unity content tree.
    pub export_dir: PathBuf,
    /// Collections to export. Empty means every cached collection.
    pub collection_ids: Vec<String>,
    /// Global include patterns, combined with each collection's own.
    pub include_patterns: Vec<String>,
    /// Global exclude patterns, combined with each collection's own.
    pub exclude_patterns: Vec<String>,
    /// Remove exported collection directories before writing.
    pub clean: bool,
}

/// Per-collection export counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionExport {
    pub collection_id: String,
    pub exported: usize,
    pub filtered: usize,
    pub missing: usize,
    /// Items skipped because their cached document or overlay was unusable.
    pub errors: Vec<(String, String)>,
}

/// Result of an export run.
#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub export_id: ExportId,
    pub export_dir: PathBuf,
    pub collections: Vec<CollectionExport>,
    /// Items written across all collections.
    pub exported: usize,
    /// Items dropped by patterns or the exclusion list.
    pub filtered: usize,
    /// Indexed items with no cached `item.json`.
    pub missing: usize,
    /// `(collection/id, message)` for every skipped item.
    pub errors: Vec<(String, String)>,
    /// Collections kept in the indexes from the previous export, untouched.
    pub carried_over: Vec<String>,
    pub covers_copied: usize,
    pub covers_unchanged: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct CoverStats {
    copied: usize,
    unchanged: usize,
}

/// Export cached collections into the Unity content tree.
#[instrument(skip_all, fields(export_dir = %config.export_dir.display()))]
pub fn export_collections(
    config: &ExportConfig,
    cache: &ContentTree,
    progress: &dyn ProgressReporter,
) -> Result<ExportResult> {
    let start = Instant::now();
    let export_id = ExportId::new();
    let out = ContentTree::new(&config.export_dir);

    let ids = selected_collections(config, cache)?;
    info!(%export_id, collections = ids.len(), "starting export");

    if config.clean {
        progress.phase("Cleaning export directory");
        for cid in &ids {
            out.remove_collection(cid)?;
        }
    }

    let mut deep = IndexDeep::new(export_id.clone());
    let carried_over = if config.collection_ids.is_empty() {
        Vec::new()
    } else {
        previous_export(&out)
            .map(|previous| carry_over(previous, &ids, &out, &mut deep))
            .unwrap_or_default()
    };

    let mut covers = CoverStats::default();
    let mut stats = Vec::with_capacity(ids.len());

    for cid in &ids {
        progress.phase(&format!("Exporting '{cid}'"));
        let (entry, items, counts) =
            export_collection(config, cache, &out, cid, &mut covers, progress)?;

        for item in items {
            if deep.items.contains_key(&item.id) {
                debug!(id = %item.id, collection = %cid, "item exported by several collections");
            }
            deep.items.insert(item.id.clone(), item);
        }
        if !deep.collections_index.contains(cid) {
            deep.collections_index.push(cid.clone());
        }
        deep.collections.insert(cid.clone(), entry);
        stats.push(counts);
    }

    out.write_index_deep(&deep)?;
    out.write_collections_index(&deep.collections_index)?;

    let result = ExportResult {
        export_id,
        export_dir: config.export_dir.clone(),
        exported: stats.iter().map(|s| s.exported).sum(),
        filtered: stats.iter().map(|s| s.filtered).sum(),
        missing: stats.iter().map(|s| s.missing).sum(),
        errors: stats
            .iter()
            .flat_map(|s| {
                s.errors
                    .iter()
                    .map(|(id, e)| (format!("{}/{id}", s.collection_id), e.clone()))
            })
            .collect(),
        carried_over,
        collections: stats,
        covers_copied: covers.copied,
        covers_unchanged: covers.unchanged,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        exported = result.exported,
        filtered = result.filtered,
        missing = result.missing,
        errors = result.errors.len(),
        carried_over = result.carried_over.len(),
        covers_copied = result.covers_copied,
        covers_unchanged = result.covers_unchanged,
        elapsed_ms = result.elapsed_ms,
        "export complete"
    );

    Ok(result)
}

/// The existing export index, if there is a readable one.
fn previous_export(out: &ContentTree) -> Option<IndexDeep> {
    match out.read_index_deep() {
        Ok(previous) => Some(previous),
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            warn!(error = %e, "previous index-deep.json unreadable; indexing this run only");
            None
        }
    }
}

/// Seed `deep` with the previous export's collections that this run does not
/// touch, keeping their order. Selected collections keep their previous slot.
/// Returns the ids carried over.
fn carry_over(
    previous: IndexDeep,
    selected: &[String],
    out: &ContentTree,
    deep: &mut IndexDeep,
) -> Vec<String> {
    let IndexDeep {
        collections_index,
        mut collections,
        items,
        ..
    } = previous;

    let mut carried = Vec::new();
    for cid in collections_index {
        if selected.contains(&cid) {
            deep.collections_index.push(cid);
            continue;
        }
        if validate_collection_id(&cid).is_err() || !out.has_collection(&cid) {
            debug!(collection = %cid, "dropping collection no longer on disk");
            continue;
        }
        let Some(entry) = collections.remove(&cid) else {
            warn!(collection = %cid, "previous index lists collection without entry");
            continue;
        };

        for id in &entry.items_index {
            if let Some(item) = items.get(id) {
                deep.items.insert(id.clone(), item.clone());
            }
        }
        debug!(collection = %cid, items = entry.items_index.len(), "carried over");
        deep.collections.insert(cid.clone(), entry);
        deep.collections_index.push(cid.clone());
        carried.push(cid);
    }
    carried
}

fn selected_collections(config: &ExportConfig, cache: &ContentTree) -> Result<Vec<String>> {
    let ids = if config.collection_ids.is_empty() {
        cache.list_collections()?
    } else {
        for cid in &config.collection_ids {
            validate_collection_id(cid)?;
            if !cache.has_collection(cid) {
                return Err(SpaceCraftError::not_found(format!(
                    "collection '{cid}' in cache; run import first"
                )));
            }
        }
        config.collection_ids.clone()
    };

    if ids.is_empty() {
        return Err(SpaceCraftError::validation(format!(
            "no cached collections under {}",
            cache.root().display()
        )));
    }
    Ok(ids)
}

fn export_collection(
    config: &ExportConfig,
    cache: &ContentTree,
    out: &ContentTree,
    cid: &str,
    covers: &mut CoverStats,
    progress: &dyn ProgressReporter,
) -> Result<(CollectionEntry, Vec<Item>, CollectionExport)> {
    let mut collection: Collection = cache.read_collection(cid)?;
    if let Some(patch) = cache.read_overlay(&cache.custom_collection_path(cid))? {
        collection = apply_collection_overlay(collection, &patch)?;
        debug!(collection = cid, "applied collection overlay");
    }

    let index = if cache.has_index(cid) {
        cache.read_index(cid)?
    } else {
        warn!(collection = cid, "no items index in cache");
        Vec::new()
    };

    let include: Vec<String> = config
        .include_patterns
        .iter()
        .chain(&collection.include_patterns)
        .cloned()
        .collect();
    let exclude: Vec<String> = config
        .exclude_patterns
        .iter()
        .chain(&collection.exclude_patterns)
        .cloned()
        .collect();
    let filter = ItemFilter::new(&include, &exclude, &collection.excluded_items)?;
    let (accepted, rejected) = filter.partition(&index);

    let mut counts = CollectionExport {
        collection_id: cid.to_string(),
        filtered: rejected.len(),
        ..CollectionExport::default()
    };
    let mut items = Vec::with_capacity(accepted.len());
    let mut exported_ids = Vec::with_capacity(accepted.len());

    for (i, id) in accepted.iter().enumerate() {
        progress.item_progress(cid, id, i + 1, accepted.len());

        if !cache.has_item(cid, id) {
            warn!(collection = cid, id, "indexed item missing from cache");
            counts.missing += 1;
            continue;
        }

        let mut item = match load_item(cache, cid, id) {
            Ok(item) => item,
            Err(e) => {
                warn!(collection = cid, id, error = %e, "skipping item");
                counts.errors.push((id.to_string(), e.to_string()));
                continue;
            }
        };

        match cache.cover_path(cid, &item) {
            Some(src) => {
                let dest = out.item_dir(cid, id).join(src.file_name().unwrap_or_default());
                if copy_cover(&src, &dest)? {
                    covers.copied += 1;
                } else {
                    covers.unchanged += 1;
                }
            }
            None if item.cover_image.is_some() => {
                warn!(collection = cid, id, "cover file missing; exporting without cover");
                item.cover_image = None;
            }
            None => {}
        }

        out.write_item(cid, &item)?;
        exported_ids.push(id.to_string());
        items.push(item);
    }

    counts.exported = exported_ids.len();
    collection.item_count = exported_ids.len();

    out.write_collection(&collection)?;
    out.write_index(cid, &exported_ids)?;

    info!(
        collection = cid,
        exported = counts.exported,
        filtered = counts.filtered,
        missing = counts.missing,
        errors = counts.errors.len(),
        "collection exported"
    );

    let entry = CollectionEntry {
        collection,
        items_index: exported_ids,
    };
    Ok((entry, items, counts))
}

/// Cached item with its custom overlay applied.
fn load_item(cache: &ContentTree, cid: &str, id: &str) -> Result<Item> {
    let item = cache.read_item(cid, id)?;
    match cache.read_overlay(&cache.custom_item_path(cid, id))? {
        Some(patch) => {
            debug!(collection = cid, id, "applied item overlay");
            apply_item_overlay(item, &patch)
        }
        None => Ok(item),
    }
}

/// Copy `src` to `dest` unless `dest` already has the same content.
/// Returns whether a copy happened.
fn copy_cover(src: &Path, dest: &Path) -> Result<bool> {
    if dest.is_file() && sha256_file(src)? == sha256_file(dest)? {
        return Ok(false);
    }
    let bytes = std::fs::read(src).map_err(|e| SpaceCraftError::io(src, e))?;
    write_atomic(dest, &bytes)?;
    debug!(dest = %dest.display(), "copied cover");
    Ok(true)
}
