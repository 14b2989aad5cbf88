//! Import phase: archive.org → local content cache.
//!
//! Resolves the identifiers of a collection, diffs them against the cached
//! index, fetches metadata and covers for new or forced items, and rewrites
//! the collection's `items-index.json` and `collection.json`.

use std::collections::HashSet;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use spacecraft_archive::{ArchiveClient, validate_identifier};
use spacecraft_shared::{
    Collection, CollectionRegistryEntry, CoverImage, Item, ItemsIndex, Result, SpaceCraftError,
    validate_collection_id,
};

use crate::cache::ContentTree;
use crate::cover::inspect_cover;
use crate::normalize::normalize_item;
use crate::pipeline::ProgressReporter;

/// Rows requested from advanced search when a collection sets no limit.
pub const DEFAULT_SEARCH_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Import config & result
// ---------------------------------------------------------------------------

/// Configuration for importing one collection.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Registry entry describing the collection.
    pub collection: CollectionRegistryEntry,
    /// Re-fetch metadata and covers even when cached.
    pub force: bool,
    /// Delete cached items no longer returned by the search.
    pub prune: bool,
    /// Use the cached index instead of searching; never touch the network.
    pub offline: bool,
}

/// Result of importing one collection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportResult {
    pub collection_id: String,
    /// Identifiers resolved for the collection.
    pub items_total: usize,
    /// Items whose metadata was fetched and was new or changed.
    pub items_fetched: usize,
    /// Items re-fetched whose metadata hash did not change.
    pub items_unchanged: usize,
    /// Items served from the cache without a request.
    pub items_cached: usize,
    pub items_removed: usize,
    pub covers_fetched: usize,
    /// Failures as (identifier, message).
    pub errors: Vec<(String, String)>,
    pub elapsed_ms: u64,
}

// ---------------------------------------------------------------------------
// Index diff
// ---------------------------------------------------------------------------

/// Diff between the cached index and freshly resolved identifiers.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct IndexDiff {
    /// Identifiers not previously in the index.
    pub new_ids: Vec<String>,
    /// Identifiers present in both.
    pub kept_ids: Vec<String>,
    /// Identifiers in the old index but not in the new one.
    pub removed_ids: Vec<String>,
}

pub(crate) fn diff_index(existing: &[String], resolved: &[String]) -> IndexDiff {
    let existing_set: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let resolved_set: HashSet<&str> = resolved.iter().map(String::as_str).collect();

    let mut diff = IndexDiff::default();
    for id in resolved {
        if existing_set.contains(id.as_str()) {
            diff.kept_ids.push(id.clone());
        } else {
            diff.new_ids.push(id.clone());
        }
    }
    for id in existing {
        if !resolved_set.contains(id.as_str()) {
            diff.removed_ids.push(id.clone());
        }
    }
    diff
}

// ---------------------------------------------------------------------------
// Collection import
// ---------------------------------------------------------------------------

/// Import one collection into the cache.
#[instrument(skip_all, fields(collection = %config.collection.id, force = config.force))]
pub async fn import_collection(
    config: &ImportConfig,
    client: &ArchiveClient,
    cache: &ContentTree,
    progress: &dyn ProgressReporter,
) -> Result<ImportResult> {
    let start = Instant::now();
    let entry = &config.collection;
    let cid = entry.id.as_str();
    let now = Utc::now();

    let existing_index: ItemsIndex = if cache.has_index(cid) {
        cache.read_index(cid)?
    } else {
        Vec::new()
    };

    // --- Resolve identifiers ---
    let resolved = if config.offline {
        if !cache.has_index(cid) {
            return Err(SpaceCraftError::not_found(format!(
                "cached index for collection '{cid}' (offline import)"
            )));
        }
        existing_index.clone()
    } else {
        progress.phase(&format!("Searching archive.org for '{cid}'"));
        let limit = entry.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        client
            .search_identifiers(&entry.query, entry.sort.as_deref(), limit)
            .await?
    };

    let diff = diff_index(&existing_index, &resolved);
    info!(
        resolved = resolved.len(),
        new = diff.new_ids.len(),
        kept = diff.kept_ids.len(),
        removed = diff.removed_ids.len(),
        "index diff computed"
    );

    // --- Fetch items ---
    progress.phase(&format!("Importing items for '{cid}'"));
    let mut result = ImportResult {
        collection_id: cid.to_string(),
        items_total: resolved.len(),
        ..ImportResult::default()
    };
    let mut index: ItemsIndex = Vec::with_capacity(resolved.len());

    for (i, id) in resolved.iter().enumerate() {
        progress.item_progress(cid, id, i + 1, resolved.len());

        match import_one(client, cache, cid, id, config.force, config.offline, now).await {
            Ok(outcome) => {
                match outcome.fetch {
                    FetchOutcome::Cached => result.items_cached += 1,
                    FetchOutcome::Fetched => result.items_fetched += 1,
                    FetchOutcome::Unchanged => result.items_unchanged += 1,
                }
                if outcome.cover_fetched {
                    result.covers_fetched += 1;
                }
                index.push(id.clone());
            }
            Err(e) => {
                warn!(id = %id, error = %e, "item import failed");
                result.errors.push((id.clone(), e.to_string()));
                if cache.read_item(cid, id).is_ok() {
                    debug!(id = %id, "keeping previously cached copy in index");
                    index.push(id.clone());
                }
            }
        }
    }

    if index.is_empty() {
        return Err(SpaceCraftError::validation(format!(
            "no items could be imported for collection '{cid}'"
        )));
    }

    // --- Prune ---
    if config.prune {
        for id in &diff.removed_ids {
            match cache.remove_item(cid, id) {
                Ok(()) => result.items_removed += 1,
                Err(e) => warn!(id = %id, error = %e, "failed to prune item"),
            }
        }
    }

    // --- Write index and collection ---
    cache.write_index(cid, &index)?;
    let collection = updated_collection(cache, entry, index.len(), now)?;
    cache.write_collection(&collection)?;

    result.elapsed_ms = start.elapsed().as_millis() as u64;

    info!(
        total = result.items_total,
        fetched = result.items_fetched,
        unchanged = result.items_unchanged,
        cached = result.items_cached,
        covers = result.covers_fetched,
        removed = result.items_removed,
        errors = result.errors.len(),
        elapsed_ms = result.elapsed_ms,
        "collection import complete"
    );

    Ok(result)
}

/// Import (or re-import) a single identifier into a collection and append it
/// to the collection index if missing.
#[instrument(skip(client, cache))]
pub async fn import_item(
    client: &ArchiveClient,
    cache: &ContentTree,
    cid: &str,
    id: &str,
    force: bool,
) -> Result<Item> {
    validate_collection_id(cid)?;
    validate_identifier(id)?;
    if !cache.has_collection(cid) {
        return Err(SpaceCraftError::not_found(format!(
            "collection '{cid}' in cache; import the collection first"
        )));
    }

    import_one(client, cache, cid, id, force, false, Utc::now()).await?;

    let mut index = if cache.has_index(cid) {
        cache.read_index(cid)?
    } else {
        Vec::new()
    };
    if !index.iter().any(|existing| existing == id) {
        index.push(id.to_string());
        cache.write_index(cid, &index)?;

        let mut collection = cache.read_collection(cid)?;
        collection.item_count = index.len();
        cache.write_collection(&collection)?;
        debug!(id, "appended to collection index");
    }

    cache.read_item(cid, id)
}

// ---------------------------------------------------------------------------
// Single item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum FetchOutcome {
    Cached,
    Fetched,
    Unchanged,
}

#[derive(Debug)]
struct ItemOutcome {
    fetch: FetchOutcome,
    cover_fetched: bool,
}

async fn import_one(
    client: &ArchiveClient,
    cache: &ContentTree,
    cid: &str,
    id: &str,
    force: bool,
    offline: bool,
    now: DateTime<Utc>,
) -> Result<ItemOutcome> {
    validate_identifier(id)?;

    let cached = if cache.has_item(cid, id) {
        match cache.read_item(cid, id) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(id, error = %e, "cached item unreadable, refetching");
                None
            }
        }
    } else {
        None
    };

    let (mut item, fetch) = match cached {
        Some(item) if !force || offline => (item, FetchOutcome::Cached),
        previous => {
            if offline {
                return Err(SpaceCraftError::not_found(format!(
                    "item '{id}' in cache (offline import)"
                )));
            }
            let meta = client.fetch_metadata(id).await?;
            let mut fresh = normalize_item(id, &meta);
            fresh.fetched_at = Some(now);

            let outcome = match previous {
                Some(previous) => {
                    // Covers and overlay-free extras survive a metadata refresh.
                    fresh.cover_image = previous.cover_image;
                    fresh.extra = previous.extra;
                    if previous.metadata_hash == fresh.metadata_hash {
                        FetchOutcome::Unchanged
                    } else {
                        FetchOutcome::Fetched
                    }
                }
                None => FetchOutcome::Fetched,
            };
            (fresh, outcome)
        }
    };

    let mut cover_fetched = false;
    let needs_cover = !offline && (force || !cache.has_cover(cid, &item));
    if needs_cover {
        match fetch_cover(client, cache, cid, id).await {
            Ok(cover) => {
                item.cover_image = Some(cover);
                cover_fetched = true;
            }
            Err(e) => warn!(id, error = %e, "cover unavailable"),
        }
    }

    if fetch != FetchOutcome::Cached || cover_fetched {
        cache.write_item(cid, &item)?;
    }

    Ok(ItemOutcome {
        fetch,
        cover_fetched,
    })
}

async fn fetch_cover(
    client: &ArchiveClient,
    cache: &ContentTree,
    cid: &str,
    id: &str,
) -> Result<CoverImage> {
    let bytes = client.fetch_cover(id).await?;
    let facts = inspect_cover(&bytes)?;
    let file = cache.write_cover(cid, id, facts.format, &bytes)?;
    debug!(id, width = facts.width, height = facts.height, "cover stored");
    Ok(facts.to_cover_image(file))
}

/// The cached collection document refreshed from its registry entry.
fn updated_collection(
    cache: &ContentTree,
    entry: &CollectionRegistryEntry,
    item_count: usize,
    now: DateTime<Utc>,
) -> Result<Collection> {
    let mut collection = if cache.has_collection(&entry.id) {
        cache.read_collection(&entry.id)?
    } else {
        entry.to_collection()
    };

    collection.name = entry.name.clone();
    collection.query = entry.query.clone();
    collection.sort = entry.sort.clone();
    collection.limit = entry.limit;
    collection.item_count = item_count;
    collection.last_imported = Some(now);
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::test_support::{mock_item, mock_search, png_bytes, temp_dir, test_client};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry_entry() -> CollectionRegistryEntry {
        CollectionRegistryEntry {
            id: "pulps".into(),
            name: "Pulp Magazines".into(),
            query: "collection:pulpmagazinearchive".into(),
            sort: None,
            limit: Some(10),
            enabled: true,
        }
    }

    fn import_config() -> ImportConfig {
        ImportConfig {
            collection: registry_entry(),
            force: false,
            prune: false,
            offline: false,
        }
    }

    #[test]
    fn test_diff_index() {
        let existing = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let resolved = vec!["c".to_string(), "d".to_string(), "a".to_string()];
        let diff = diff_index(&existing, &resolved);
        assert_eq!(diff.new_ids, vec!["d"]);
        assert_eq!(diff.kept_ids, vec!["c", "a"]);
        assert_eq!(diff.removed_ids, vec!["b"]);
    }

    #[tokio::test]
    async fn imports_collection_into_cache() {
        let server = MockServer::start().await;
        mock_search(&server, &["amazing_1926_04", "weird_tales_1923"]).await;
        mock_item(&server, "amazing_1926_04", "Amazing Stories", Some(png_bytes(6, 9))).await;
        mock_item(&server, "weird_tales_1923", "Weird Tales", None).await;

        let tmp = temp_dir("import");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        let result = import_collection(&import_config(), &client, &cache, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.items_total, 2);
        assert_eq!(result.items_fetched, 2);
        assert_eq!(result.covers_fetched, 1);
        assert!(result.errors.is_empty());

        let index = cache.read_index("pulps").unwrap();
        assert_eq!(index, vec!["amazing_1926_04", "weird_tales_1923"]);

        let collection = cache.read_collection("pulps").unwrap();
        assert_eq!(collection.item_count, 2);
        assert!(collection.last_imported.is_some());

        let item = cache.read_item("pulps", "amazing_1926_04").unwrap();
        assert_eq!(item.title, "Amazing Stories");
        assert_eq!(item.favorite_count, 1);
        assert!(cache.cover_path("pulps", &item).is_some());
        let cover = item.cover_image.expect("cover recorded");
        assert_eq!((cover.width, cover.height), (6, 9));

        let no_cover = cache.read_item("pulps", "weird_tales_1923").unwrap();
        assert!(no_cover.cover_image.is_none());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn second_import_serves_from_cache() {
        let server = MockServer::start().await;
        mock_search(&server, &["amazing_1926_04"]).await;
        mock_item(&server, "amazing_1926_04", "Amazing Stories", Some(png_bytes(2, 2))).await;

        let tmp = temp_dir("import-cached");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        import_collection(&import_config(), &client, &cache, &SilentProgress)
            .await
            .unwrap();
        let first = cache.read_item("pulps", "amazing_1926_04").unwrap();
        let second = import_collection(&import_config(), &client, &cache, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(second.items_cached, 1);
        assert_eq!(second.items_fetched, 0);
        assert_eq!(second.covers_fetched, 0);
        let cached = cache.read_item("pulps", "amazing_1926_04").unwrap();
        assert_eq!(cached.fetched_at, first.fetched_at);

        let mut forced_config = import_config();
        forced_config.force = true;
        let forced = import_collection(&forced_config, &client, &cache, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(forced.items_unchanged, 1);
        assert_eq!(forced.covers_fetched, 1);

        // Unchanged metadata still records when it was last checked.
        let refreshed = cache.read_item("pulps", "amazing_1926_04").unwrap();
        assert_eq!(refreshed.metadata_hash, first.metadata_hash);
        assert!(refreshed.fetched_at > first.fetched_at);
        assert!(refreshed.cover_image.is_some());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failed_items_are_collected_not_fatal() {
        let server = MockServer::start().await;
        mock_search(&server, &["good_item", "missing_item"]).await;
        mock_item(&server, "good_item", "Good", None).await;
        Mock::given(method("GET"))
            .and(path("/metadata/missing_item"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let tmp = temp_dir("import-errors");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        let result = import_collection(&import_config(), &client, &cache, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.items_fetched, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, "missing_item");
        assert_eq!(cache.read_index("pulps").unwrap(), vec!["good_item"]);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failed_refetch_keeps_cached_item_indexed() {
        let server = MockServer::start().await;
        mock_search(&server, &["cached_one", "fresh_one"]).await;
        mock_item(&server, "fresh_one", "Fresh", None).await;
        Mock::given(method("GET"))
            .and(path("/metadata/cached_one"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let tmp = temp_dir("import-refetch");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);
        let cached = crate::test_support::sample_item("cached_one");
        cache.write_item("pulps", &cached).unwrap();
        cache
            .write_index("pulps", &vec!["cached_one".to_string()])
            .unwrap();

        let mut config = import_config();
        config.force = true;
        let result = import_collection(&config, &client, &cache, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.items_fetched, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].0, "cached_one");
        assert!(result.errors[0].1.contains("503"));
        assert_eq!(cache.read_index("pulps").unwrap(), vec!["cached_one", "fresh_one"]);
        assert_eq!(cache.read_item("pulps", "cached_one").unwrap(), cached);
        assert_eq!(cache.read_collection("pulps").unwrap().item_count, 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn empty_search_fails() {
        let server = MockServer::start().await;
        mock_search(&server, &[]).await;

        let tmp = temp_dir("import-empty");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        let err = import_collection(&import_config(), &client, &cache, &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no items could be imported"));
        assert!(!cache.has_index("pulps"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn prune_removes_dropped_items() {
        let server = MockServer::start().await;
        mock_search(&server, &["keep_me"]).await;
        mock_item(&server, "keep_me", "Keep", None).await;

        let tmp = temp_dir("import-prune");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        // Seed a stale item the search no longer returns.
        let stale = crate::test_support::sample_item("stale_item");
        cache.write_item("pulps", &stale).unwrap();
        cache
            .write_index("pulps", &vec!["stale_item".to_string()])
            .unwrap();

        let mut config = import_config();
        config.prune = true;
        let result = import_collection(&config, &client, &cache, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.items_removed, 1);
        assert!(!cache.has_item("pulps", "stale_item"));
        assert!(cache.has_item("pulps", "keep_me"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn offline_import_uses_cached_index_only() {
        let server = MockServer::start().await;

        let tmp = temp_dir("import-offline");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        let mut config = import_config();
        config.offline = true;

        let err = import_collection(&config, &client, &cache, &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        cache
            .write_item("pulps", &crate::test_support::sample_item("cached_one"))
            .unwrap();
        cache
            .write_index("pulps", &vec!["cached_one".to_string(), "not_cached".to_string()])
            .unwrap();

        let result = import_collection(&config, &client, &cache, &SilentProgress)
            .await
            .unwrap();
        assert_eq!(result.items_cached, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(server.received_requests().await.unwrap().is_empty());

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn import_single_item_appends_to_index() {
        let server = MockServer::start().await;
        mock_item(&server, "late_addition", "Late Addition", None).await;

        let tmp = temp_dir("import-item");
        let cache = ContentTree::new(&tmp);
        let client = test_client(&server);

        let err = import_item(&client, &cache, "pulps", "late_addition", false)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        cache.write_collection(&registry_entry().to_collection()).unwrap();
        let item = import_item(&client, &cache, "pulps", "late_addition", false)
            .await
            .unwrap();

        assert_eq!(item.title, "Late Addition");
        assert_eq!(cache.read_index("pulps").unwrap(), vec!["late_addition"]);
        assert_eq!(cache.read_collection("pulps").unwrap().item_count, 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
