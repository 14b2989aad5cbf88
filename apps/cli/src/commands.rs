//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use spacecraft_archive::ArchiveClient;
use spacecraft_core::cache::ContentTree;
use spacecraft_core::export::{ExportConfig, export_collections};
use spacecraft_core::import::{ImportConfig, ImportResult, import_collection, import_item};
use spacecraft_core::overlay::apply_item_overlay;
use spacecraft_core::pipeline::{PipelineResult, ProgressReporter, RunOptions, run_pipeline};
use spacecraft_core::validate::{ValidationReport, validate_cache, validate_export};
use spacecraft_shared::{
    AppConfig, PipelineConfig, config_file_path, init_config, init_config_at, load_config,
    load_config_from, validate_collection_id,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// SpaceCraft: archive.org collections for the SpaceCraft Unity app.
#[derive(Parser)]
#[command(
    name = "spacecraft",
    version,
    about = "Import archive.org collections and export them to SpaceCraft's Unity content tree.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Print machine-readable JSON results on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.spacecraft/spacecraft.toml).
    #[arg(long, global = true, env = "SPACECRAFT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import collections from archive.org into the local cache.
    Import {
        /// Collection id to import (repeatable). Defaults to all enabled.
        #[arg(short, long = "collection", value_parser = parse_collection_id)]
        collections: Vec<String>,

        /// Re-fetch metadata and covers even when cached.
        #[arg(long)]
        force: bool,

        /// Remove cached items no longer returned by archive.org.
        #[arg(long)]
        prune: bool,

        /// Rebuild from the cached index without network access.
        #[arg(long, conflicts_with = "force")]
        offline: bool,
    },

    /// Export cached collections to the Unity content tree.
    Export {
        /// Collection id to export (repeatable). Defaults to all cached.
        #[arg(short, long = "collection", value_parser = parse_collection_id)]
        collections: Vec<String>,

        /// Remove exported collection directories first.
        #[arg(long)]
        clean: bool,

        /// Export directory (overrides `defaults.export_dir`).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Import every enabled collection, then export.
    Run {
        /// Re-fetch metadata and covers even when cached.
        #[arg(long)]
        force: bool,

        /// Remove cached items no longer returned by archive.org.
        #[arg(long)]
        prune: bool,

        /// Remove exported collection directories first.
        #[arg(long)]
        clean: bool,
    },

    /// Single-item operations.
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },

    /// Collection registry and cache status.
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },

    /// Check the cache or export tree for structural problems.
    Validate {
        /// Validate the local cache (default).
        #[arg(long, conflicts_with = "export")]
        cache: bool,

        /// Validate the Unity export tree.
        #[arg(long)]
        export: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Item subcommands.
#[derive(Subcommand)]
pub(crate) enum ItemAction {
    /// Import one archive.org identifier into a cached collection.
    Import {
        #[arg(value_parser = parse_collection_id)]
        collection: String,
        id: String,

        #[arg(long)]
        force: bool,
    },
    /// Show an item as it will be exported (overlay applied).
    Show {
        #[arg(value_parser = parse_collection_id)]
        collection: String,
        id: String,

        /// Show the cached document without its overlay.
        #[arg(long)]
        raw: bool,
    },
}

/// Collections subcommands.
#[derive(Subcommand)]
pub(crate) enum CollectionsAction {
    /// List registered and cached collections.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

/// Reject collection ids that would not name a single directory.
fn parse_collection_id(s: &str) -> std::result::Result<String, String> {
    validate_collection_id(s).map_err(|e| e.to_string())?;
    Ok(s.to_string())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so `--json`
/// output on stdout stays clean.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "spacecraft=info",
        1 => "spacecraft=debug",
        _ => "spacecraft=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let ctx = Context {
        json: cli.json,
        config_path: cli.config,
    };

    match cli.command {
        Command::Import {
            collections,
            force,
            prune,
            offline,
        } => cmd_import(&ctx, &collections, force, prune, offline).await,
        Command::Export {
            collections,
            clean,
            out,
        } => cmd_export(&ctx, &collections, clean, out),
        Command::Run {
            force,
            prune,
            clean,
        } => cmd_run(&ctx, RunOptions { force, prune, clean }).await,
        Command::Item { action } => match action {
            ItemAction::Import {
                collection,
                id,
                force,
            } => cmd_item_import(&ctx, &collection, &id, force).await,
            ItemAction::Show {
                collection,
                id,
                raw,
            } => cmd_item_show(&ctx, &collection, &id, raw),
        },
        Command::Collections { action } => match action {
            CollectionsAction::List => cmd_collections_list(&ctx),
        },
        Command::Validate { cache: _, export } => cmd_validate(&ctx, export),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(&ctx),
            ConfigAction::Show => cmd_config_show(&ctx),
        },
    }
}

/// Global flags every command needs.
struct Context {
    json: bool,
    config_path: Option<PathBuf>,
}

impl Context {
    fn app_config(&self) -> Result<AppConfig> {
        Ok(match &self.config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        })
    }

    fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig::from(&self.app_config()?))
    }

    fn progress(&self) -> CliProgress {
        if self.json {
            CliProgress::hidden()
        } else {
            CliProgress::new()
        }
    }

    /// Print `value` as JSON in `--json` mode, otherwise run `text`.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text(value);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(
    ctx: &Context,
    ids: &[String],
    force: bool,
    prune: bool,
    offline: bool,
) -> Result<()> {
    let config = ctx.pipeline_config()?;
    let entries = if ids.is_empty() {
        config.collections.clone()
    } else {
        ids.iter()
            .map(|id| config.collection(id).cloned())
            .collect::<spacecraft_shared::Result<Vec<_>>>()?
    };
    if entries.is_empty() {
        return Err(eyre!(
            "no enabled collections; add [[collections]] entries to the config"
        ));
    }

    let client = ArchiveClient::new(&config.archive)?;
    let cache = ContentTree::new(&config.content_dir);
    let reporter = ctx.progress();

    info!(collections = entries.len(), force, prune, offline, "importing");

    let mut results: Vec<ImportResult> = Vec::new();
    let mut failures: Vec<(String, String)> = Vec::new();
    for entry in entries {
        let id = entry.id.clone();
        let import_config = ImportConfig {
            collection: entry,
            force,
            prune,
            offline,
        };
        match import_collection(&import_config, &client, &cache, &reporter).await {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(collection = %id, error = %e, "import failed");
                failures.push((id, e.to_string()));
            }
        }
    }
    reporter.finish();

    ctx.emit(&results, |results| {
        println!();
        for r in results {
            print_import(r);
        }
    })?;

    if !failures.is_empty() {
        let detail: Vec<String> = failures
            .iter()
            .map(|(id, e)| format!("{id}: {e}"))
            .collect();
        return Err(eyre!(
            "{} collection import(s) failed:\n  {}",
            failures.len(),
            detail.join("\n  ")
        ));
    }
    Ok(())
}

fn cmd_export(ctx: &Context, ids: &[String], clean: bool, out: Option<PathBuf>) -> Result<()> {
    let config = ctx.pipeline_config()?;
    let cache = ContentTree::new(&config.content_dir);
    let export_config = ExportConfig {
        export_dir: out.unwrap_or(config.export_dir),
        collection_ids: ids.to_vec(),
        include_patterns: config.include_patterns,
        exclude_patterns: config.exclude_patterns,
        clean,
    };

    let reporter = ctx.progress();
    let result = export_collections(&export_config, &cache, &reporter)?;
    reporter.finish();

    ctx.emit(&result, |r| {
        println!();
        println!("  Export complete!");
        println!("  ID:          {}", r.export_id);
        println!("  Path:        {}", r.export_dir.display());
        println!("  Collections: {}", r.collections.len());
        println!("  Items:       {}", r.exported);
        println!("  Filtered:    {}", r.filtered);
        println!("  Missing:     {}", r.missing);
        if !r.carried_over.is_empty() {
            println!("  Kept:        {} (not re-exported)", r.carried_over.join(", "));
        }
        print_export_errors(&r.errors);
        println!(
            "  Covers:      {} copied, {} unchanged",
            r.covers_copied, r.covers_unchanged
        );
        println!("  Time:        {:.1}s", r.elapsed_ms as f64 / 1000.0);
        println!();
    })
}

async fn cmd_run(ctx: &Context, options: RunOptions) -> Result<()> {
    let config = ctx.pipeline_config()?;
    let client = ArchiveClient::new(&config.archive)?;
    let reporter = ctx.progress();

    info!(
        force = options.force,
        prune = options.prune,
        clean = options.clean,
        "running pipeline"
    );
    let result = run_pipeline(&config, &options, &client, &reporter).await?;

    ctx.emit(&result, |r| {
        println!();
        for import in &r.imports {
            print_import(import);
        }
        for (id, error) in &r.failed_collections {
            println!("  Collection '{id}' failed: {error}");
        }
        println!("  Exported {} items to {}", r.export.exported, r.export.export_dir.display());
        print_export_errors(&r.export.errors);
        println!("  Time: {:.1}s", r.elapsed_ms as f64 / 1000.0);
        println!();
    })
}

async fn cmd_item_import(ctx: &Context, cid: &str, id: &str, force: bool) -> Result<()> {
    let config = ctx.pipeline_config()?;
    let client = ArchiveClient::new(&config.archive)?;
    let cache = ContentTree::new(&config.content_dir);

    let item = import_item(&client, &cache, cid, id, force).await?;
    ctx.emit(&item, |item| {
        println!("Imported '{}' into '{cid}': {}", item.id, item.title);
    })
}

fn cmd_item_show(ctx: &Context, cid: &str, id: &str, raw: bool) -> Result<()> {
    let config = ctx.pipeline_config()?;
    let cache = ContentTree::new(&config.content_dir);

    let mut item = cache.read_item(cid, id)?;
    if !raw {
        if let Some(patch) = cache.read_overlay(&cache.custom_item_path(cid, id))? {
            item = apply_item_overlay(item, &patch)?;
        }
    }

    // Items are JSON documents; print them as such in both modes.
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

/// One row of `collections list`.
#[derive(Serialize)]
struct CollectionStatus {
    id: String,
    name: String,
    registered: bool,
    enabled: bool,
    cached_items: Option<usize>,
    last_imported: Option<String>,
}

fn cmd_collections_list(ctx: &Context) -> Result<()> {
    let config = ctx.app_config()?;
    let cache = ContentTree::new(&config.defaults.content_dir);

    let mut rows: Vec<CollectionStatus> = config
        .collections
        .iter()
        .map(|entry| CollectionStatus {
            id: entry.id.clone(),
            name: entry.name.clone(),
            registered: true,
            enabled: entry.enabled,
            cached_items: None,
            last_imported: None,
        })
        .collect();

    for cid in cache.list_collections()? {
        let cached = cache.read_collection(&cid)?;
        let idx = match rows.iter().position(|r| r.id == cid) {
            Some(idx) => idx,
            None => {
                rows.push(CollectionStatus {
                    id: cid.clone(),
                    name: cached.name.clone(),
                    registered: false,
                    enabled: false,
                    cached_items: None,
                    last_imported: None,
                });
                rows.len() - 1
            }
        };
        let row = &mut rows[idx];
        row.cached_items = Some(cached.item_count);
        row.last_imported = cached.last_imported.map(|t| t.to_rfc3339());
    }

    ctx.emit(&rows, |rows| {
        if rows.is_empty() {
            println!("No collections registered or cached.");
            return;
        }
        for r in rows {
            let state = match (r.registered, r.enabled) {
                (true, true) => "enabled",
                (true, false) => "disabled",
                _ => "unregistered",
            };
            let cached = r
                .cached_items
                .map(|n| format!("{n} items cached"))
                .unwrap_or_else(|| "not cached".into());
            println!("  {:<24} {:<12} {:<18} {}", r.id, state, cached, r.name);
        }
    })
}

fn cmd_validate(ctx: &Context, export: bool) -> Result<()> {
    let config = ctx.app_config()?;
    let report: ValidationReport = if export {
        validate_export(Path::new(&config.defaults.export_dir))?
    } else {
        validate_cache(Path::new(&config.defaults.content_dir))?
    };

    ctx.emit(&report, |r| {
        println!(
            "  {}: {} collections, {} items, {} missing",
            r.root.display(),
            r.collections,
            r.items,
            r.missing_items
        );
        for problem in &r.problems {
            println!("  - {problem}");
        }
    })?;

    if !report.is_ok() {
        return Err(eyre!("validation found {} problem(s)", report.problems.len()));
    }
    Ok(())
}

fn cmd_config_init(ctx: &Context) -> Result<()> {
    let path = match &ctx.config_path {
        Some(path) => {
            init_config_at(path)?;
            path.clone()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(ctx: &Context) -> Result<()> {
    let config: AppConfig = ctx.app_config()?;
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    let path = match &ctx.config_path {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn print_import(r: &ImportResult) {
    println!("  Collection '{}' imported", r.collection_id);
    println!("    Items:     {}", r.items_total);
    println!("    Fetched:   {}", r.items_fetched);
    println!("    Unchanged: {}", r.items_unchanged);
    println!("    Cached:    {}", r.items_cached);
    println!("    Removed:   {}", r.items_removed);
    println!("    Covers:    {}", r.covers_fetched);
    if !r.errors.is_empty() {
        println!("    Errors:    {}", r.errors.len());
        for (id, error) in &r.errors {
            println!("      {id}: {error}");
        }
    }
    println!("    Time:      {:.1}s", r.elapsed_ms as f64 / 1000.0);
    println!();
}

fn print_export_errors(errors: &[(String, String)]) {
    if errors.is_empty() {
        return;
    }
    println!("  Skipped:     {}", errors.len());
    for (id, error) in errors {
        println!("    {id}: {error}");
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn hidden() -> Self {
        Self {
            spinner: ProgressBar::hidden(),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_progress(&self, collection: &str, id: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("{collection} [{current}/{total}] {id}"));
    }

    fn done(&self, _result: &PipelineResult) {
        self.finish();
    }
}
