//! End-to-end `run` pipeline: import every enabled collection, then export.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, instrument, warn};

use spacecraft_archive::ArchiveClient;
use spacecraft_shared::{PipelineConfig, Result, SpaceCraftError};

use crate::cache::ContentTree;
use crate::export::{ExportConfig, ExportResult, export_collections};
use crate::import::{ImportConfig, ImportResult, import_collection};

/// Options for a full pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub force: bool,
    pub prune: bool,
    pub clean: bool,
}

/// Result of the full pipeline.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub imports: Vec<ImportResult>,
    /// Collections whose import failed outright, as (id, message).
    pub failed_collections: Vec<(String, String)>,
    pub export: ExportResult,
    pub elapsed_ms: u64,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called for each item handled during import or export.
    fn item_progress(&self, collection: &str, id: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &PipelineResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_progress(&self, _collection: &str, _id: &str, _current: usize, _total: usize) {}
    fn done(&self, _result: &PipelineResult) {}
}

/// Run the full pipeline.
///
/// 1. Import each enabled collection (failures are recorded, not fatal)
/// 2. Export every imported collection, plus failed ones still in the cache
#[instrument(skip_all, fields(collections = config.collections.len()))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    options: &RunOptions,
    client: &ArchiveClient,
    progress: &dyn ProgressReporter,
) -> Result<PipelineResult> {
    let start = Instant::now();

    if config.collections.is_empty() {
        return Err(SpaceCraftError::config(
            "no enabled collections; add [[collections]] entries to the config",
        ));
    }

    let cache = ContentTree::new(&config.content_dir);
    info!(content_dir = %config.content_dir.display(), "starting pipeline");

    // --- Phase 1: Import ---
    let mut imports = Vec::with_capacity(config.collections.len());
    let mut failed_collections = Vec::new();

    for entry in &config.collections {
        let import_config = ImportConfig {
            collection: entry.clone(),
            force: options.force,
            prune: options.prune,
            offline: false,
        };
        match import_collection(&import_config, client, &cache, progress).await {
            Ok(result) => imports.push(result),
            Err(e) => {
                warn!(collection = %entry.id, error = %e, "collection import failed");
                failed_collections.push((entry.id.clone(), e.to_string()));
            }
        }
    }

    if imports.is_empty() {
        return Err(SpaceCraftError::validation(format!(
            "all {} collection imports failed",
            failed_collections.len()
        )));
    }

    // --- Phase 2: Export ---
    progress.phase("Exporting to Unity");
    let collection_ids: Vec<String> = config
        .collections
        .iter()
        .filter(|entry| {
            imports.iter().any(|r| r.collection_id == entry.id) || cache.has_collection(&entry.id)
        })
        .map(|entry| entry.id.clone())
        .collect();
    for (cid, _) in &failed_collections {
        if collection_ids.contains(cid) {
            info!(collection = %cid, "import failed; exporting cached copy");
        }
    }
    let export_config = ExportConfig {
        export_dir: config.export_dir.clone(),
        collection_ids,
        include_patterns: config.include_patterns.clone(),
        exclude_patterns: config.exclude_patterns.clone(),
        clean: options.clean,
    };
    let export = export_collections(&export_config, &cache, progress)?;

    let result = PipelineResult {
        imports,
        failed_collections,
        export,
        elapsed_ms: start.elapsed().as_millis() as u64,
    };

    info!(
        imported = result.imports.len(),
        failed = result.failed_collections.len(),
        exported = result.export.exported,
        elapsed_ms = result.elapsed_ms,
        "pipeline complete"
    );

    progress.done(&result);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{mock_item, mock_search, png_bytes, temp_dir, test_client};
    use crate::validate::validate_export;
    use spacecraft_shared::{ArchiveConfig, CollectionRegistryEntry};
    use std::sync::Mutex;
    use wiremock::MockServer;

    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        items: Mutex<usize>,
        done: Mutex<bool>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn item_progress(&self, _collection: &str, _id: &str, _current: usize, _total: usize) {
            *self.items.lock().unwrap() += 1;
        }
        fn done(&self, _result: &PipelineResult) {
            *self.done.lock().unwrap() = true;
        }
    }

    fn pipeline_config(server: &MockServer, root: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            content_dir: root.join("Content"),
            export_dir: root.join("Unity"),
            archive: ArchiveConfig {
                base_url: server.uri(),
                timeout_secs: 5,
                rate_limit_ms: 0,
                ..ArchiveConfig::default()
            },
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            collections: vec![CollectionRegistryEntry {
                id: "pulps".into(),
                name: "Pulps".into(),
                query: "collection:pulpmagazinearchive".into(),
                sort: Some("downloads desc".into()),
                limit: Some(5),
                enabled: true,
            }],
        }
    }

    #[tokio::test]
    async fn run_imports_and_exports() {
        let server = MockServer::start().await;
        mock_search(&server, &["amazing_1926_04", "weird_tales_1923"]).await;
        mock_item(&server, "amazing_1926_04", "Amazing Stories", Some(png_bytes(4, 6))).await;
        mock_item(&server, "weird_tales_1923", "Weird Tales", Some(png_bytes(4, 6))).await;

        let tmp = temp_dir("pipeline");
        let config = pipeline_config(&server, &tmp);
        let client = test_client(&server);
        let progress = RecordingProgress::default();

        let result = run_pipeline(&config, &RunOptions::default(), &client, &progress)
            .await
            .unwrap();

        assert_eq!(result.imports.len(), 1);
        assert!(result.failed_collections.is_empty());
        assert_eq!(result.export.exported, 2);
        assert_eq!(result.export.covers_copied, 2);

        assert!(*progress.done.lock().unwrap());
        // Two items imported, two exported.
        assert_eq!(*progress.items.lock().unwrap(), 4);
        assert!(progress.phases.lock().unwrap().iter().any(|p| p == "Exporting to Unity"));

        let report = validate_export(&config.export_dir).unwrap();
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.items, 2);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failing_collection_is_recorded() {
        let server = MockServer::start().await;
        mock_search(&server, &["amazing_1926_04"]).await;
        mock_item(&server, "amazing_1926_04", "Amazing Stories", None).await;

        let tmp = temp_dir("pipeline-partial");
        let mut config = pipeline_config(&server, &tmp);
        config.collections.push(CollectionRegistryEntry {
            id: "broken".into(),
            name: "Broken".into(),
            query: "   ".into(),
            sort: None,
            limit: None,
            enabled: true,
        });
        let client = test_client(&server);

        let result = run_pipeline(&config, &RunOptions::default(), &client, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.imports.len(), 1);
        assert_eq!(result.failed_collections.len(), 1);
        assert_eq!(result.failed_collections[0].0, "broken");
        assert_eq!(result.export.collections.len(), 1);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn failed_import_still_exports_cached_collection() {
        let server = MockServer::start().await;
        mock_search(&server, &["amazing_1926_04"]).await;
        mock_item(&server, "amazing_1926_04", "Amazing Stories", None).await;

        let tmp = temp_dir("pipeline-cached");
        let mut config = pipeline_config(&server, &tmp);
        config.collections.push(CollectionRegistryEntry {
            id: "weird".into(),
            name: "Weird".into(),
            query: "   ".into(),
            sort: None,
            limit: None,
            enabled: true,
        });

        // A previous run cached `weird`; this run's import of it fails.
        let cache = ContentTree::new(&config.content_dir);
        cache
            .write_collection(&spacecraft_shared::Collection::new("weird", "Weird", "q"))
            .unwrap();
        cache
            .write_item("weird", &crate::test_support::sample_item("weird_tales_1923"))
            .unwrap();
        cache
            .write_index("weird", &vec!["weird_tales_1923".to_string()])
            .unwrap();

        let client = test_client(&server);
        let result = run_pipeline(&config, &RunOptions::default(), &client, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.failed_collections.len(), 1);
        assert_eq!(result.export.collections.len(), 2);
        assert_eq!(result.export.exported, 2);

        let deep = ContentTree::new(&config.export_dir).read_index_deep().unwrap();
        assert_eq!(deep.collections_index, vec!["pulps", "weird"]);
        assert!(deep.items.contains_key("weird_tales_1923"));

        let report = validate_export(&config.export_dir).unwrap();
        assert!(report.is_ok(), "{:?}", report.problems);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[tokio::test]
    async fn no_collections_is_config_error() {
        let server = MockServer::start().await;
        let tmp = temp_dir("pipeline-empty");
        let mut config = pipeline_config(&server, &tmp);
        config.collections.clear();
        let client = test_client(&server);

        let err = run_pipeline(&config, &RunOptions::default(), &client, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SpaceCraftError::Config { .. }));
    }
}
