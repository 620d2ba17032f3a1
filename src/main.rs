use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sweeprs::core::catalog::PhotoCatalog;
use sweeprs::core::ingest::{IngestReport, Ingestor};
use sweeprs::core::trash::FsDeleter;
use sweeprs::history::{HistoryAction, HistoryLog, HistoryRecord, RestoreSelection};
use sweeprs::server::{self, GatewayConfig, ServerState};
use sweeprs::settings::{
    JsonFileStore, Notice, NoticeLevel, Notifier, ProviderKind, ScanPreferencesPatch,
    SettingsService, mask_key,
};
use sweeprs::vision::{HttpTransport, Provider, VisionClient};
use sweeprs::{AnalysisOrchestrator, AnalysisPhase, AnalysisProgress, AppConfig, PhotoItem};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser, Debug)]
#[command(name = "sweeprs", version, about = "Find photos worth deleting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze photos and clean up the suggested ones
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR", required_unless_present = "archive")]
        path: Option<PathBuf>,
        /// Zip archive of photos to analyze
        #[arg(long, value_name = "FILE")]
        archive: Option<PathBuf>,
        /// Only show the suggestions
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Delete files instead of moving them
        #[arg(long)]
        permanent: bool,
        /// Directory to move suggested photos into (default: `<dir>/cleanup`)
        #[arg(long, value_name = "DIR", conflicts_with = "permanent")]
        target_dir: Option<PathBuf>,
    },

    /// Show or change which suggestions are made
    Prefs {
        #[command(subcommand)]
        command: PrefsCmd,
    },

    /// Manage provider API keys
    Keys {
        #[command(subcommand)]
        command: KeysCmd,
    },

    /// Work with cleanup history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },

    /// Run the photo analysis endpoint
    Serve {
        #[arg(long, default_value_t = server::DEFAULT_PORT)]
        port: u16,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsCmd {
    Show,
    Set {
        #[arg(long)]
        screenshots: Option<bool>,
        #[arg(long)]
        blurry: Option<bool>,
        #[arg(long)]
        duplicates: Option<bool>,
        #[arg(long)]
        no_people: Option<bool>,
    },
}

#[derive(Subcommand, Debug)]
enum KeysCmd {
    Show,
    Set { provider: ProviderKind, key: String },
    Remove { provider: ProviderKind },
    /// Remove every stored key
    Clear,
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all cleanup history records
    List {
        /// Directory containing the photos
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Restore moved files from history
    Restore {
        /// Directory containing the photos
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

/// Prints notices the way the rest of the CLI prints status lines.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Success => println!("✅ {}", notice.message),
            NoticeLevel::Info => println!("ℹ️  {}", notice.message),
            NoticeLevel::Error => eprintln!("⚠️  {}", notice.message),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Scan {
            path,
            archive,
            dry_run,
            yes,
            permanent,
            target_dir,
        } => {
            let options = ScanOptions {
                dry_run,
                yes,
                permanent,
                target_dir,
            };
            scan(&config, path.as_deref(), archive.as_deref(), options).await?;
        }

        Commands::Prefs { command } => {
            let mut settings = load_settings(&config).await;
            match command {
                PrefsCmd::Show => {}
                PrefsCmd::Set {
                    screenshots,
                    blurry,
                    duplicates,
                    no_people,
                } => {
                    settings
                        .update_preferences(ScanPreferencesPatch {
                            scan_screenshots: screenshots,
                            scan_blurry: blurry,
                            scan_duplicates: duplicates,
                            scan_no_people: no_people,
                        })
                        .await?;
                    println!("✅ Preferences saved");
                }
            }

            let prefs = settings.preferences();
            println!("🗂️  Scan preferences:");
            println!("   screenshots: {}", prefs.scan_screenshots);
            println!("   blurry:      {}", prefs.scan_blurry);
            println!("   duplicates:  {}", prefs.scan_duplicates);
            println!("   no people:   {}", prefs.scan_no_people);
        }

        Commands::Keys { command } => {
            let mut settings = load_settings(&config).await;
            match command {
                KeysCmd::Show => {}
                KeysCmd::Set { provider, key } => {
                    settings.update_api_key(provider, key).await?;
                    println!("✅ Saved {} key", provider);
                }
                KeysCmd::Remove { provider } => {
                    settings.remove_api_key(provider).await?;
                    println!("🗑️  Removed {} key", provider);
                }
                KeysCmd::Clear => {
                    settings.clear_api_keys().await?;
                    println!("🧹 Cleared all API keys");
                }
            }

            let credentials = settings.credentials();
            println!("🔑 API keys:");
            for kind in ProviderKind::ALL {
                let shown = credentials
                    .get(kind)
                    .map(mask_key)
                    .unwrap_or_else(|| "(not set)".to_string());
                println!("   {:<10} {}", kind, shown);
            }
            println!("   ▶ analysis uses: {}", Provider::select(credentials).name());
        }

        Commands::History { command } => match command {
            HistoryCmd::List { path } => {
                let log = HistoryLog::for_dir(&path);
                let records = log
                    .list()
                    .with_context(|| format!("Could not read history file {:?}", log.path()))?;

                println!("🗂️  Cleanup History:");
                if records.is_empty() {
                    println!("   (empty)");
                }
                for (i, rec) in records {
                    println!("[{}] {} ({:?})", i, rec.timestamp, rec.action);
                    for entry in &rec.removed {
                        let reasons: Vec<&str> = entry.reasons.iter().map(|r| r.label()).collect();
                        println!("     {} [{}]", entry.original.display(), reasons.join(", "));
                    }
                }
            }

            HistoryCmd::Restore { path, record, all } => {
                let selection = match (record, all) {
                    (_, true) => RestoreSelection::All,
                    (Some(index), false) => RestoreSelection::Index(index),
                    (None, false) => RestoreSelection::Latest,
                };
                let log = HistoryLog::for_dir(&path);
                let report = log.restore(selection)?;

                for (src, dest) in &report.restored {
                    println!("🔄 Restored {:?} → {:?}", src, dest);
                }
                for (file, why) in &report.skipped {
                    eprintln!("⚠️  Skipped {:?}: {}", file, why);
                }
                println!("🧹 Updated history, removed {} record(s)", report.records);
            }
        },

        Commands::Serve { port } => {
            let state = ServerState::new(
                &config,
                GatewayConfig::from_env(&config),
                Arc::new(HttpTransport::new()),
            );
            let addr = SocketAddr::from(([127, 0, 0, 1], port));
            println!("▶ Serving photo analysis on http://{}/analyze-photo", addr);
            server::serve(addr, state).await?;
        }
    }

    Ok(())
}

struct ScanOptions {
    dry_run: bool,
    yes: bool,
    permanent: bool,
    target_dir: Option<PathBuf>,
}

async fn load_settings(config: &AppConfig) -> SettingsService<JsonFileStore> {
    let store = JsonFileStore::new(config.preferences_path());
    SettingsService::load(store, Arc::new(ConsoleNotifier)).await
}

async fn scan(
    config: &AppConfig,
    path: Option<&Path>,
    archive: Option<&Path>,
    options: ScanOptions,
) -> Result<()> {
    let settings = load_settings(config).await;
    let cleanup_dir = path.map(|dir| {
        options
            .target_dir
            .clone()
            .unwrap_or_else(|| dir.join("cleanup"))
    });

    let report = collect_uploads(config, path, archive, cleanup_dir.as_deref())?;
    if !report.rejected.is_empty() {
        println!("⚠️  Skipped {} file(s):", report.rejected.len());
        for rejected in &report.rejected {
            println!("   {} ({:?})", rejected.name, rejected.reason);
        }
    }
    if report.accepted.is_empty() {
        println!("No photos found.");
        return Ok(());
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<AnalysisProgress>();
    let orchestrator = AnalysisOrchestrator::new(config, VisionClient::with_http(config))
        .with_progress_sender(progress_tx);

    let bar = ProgressBar::new(report.accepted.len() as u64);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )?);
    let bar_handle = bar.clone();
    let progress_task = tokio::spawn(async move {
        let mut finished_before = 0;
        while let Some(progress) = progress_rx.recv().await {
            match progress.phase {
                AnalysisPhase::Analyzing if progress.items_done > 0 => {
                    bar_handle.set_position((finished_before + progress.items_done) as u64);
                    bar_handle.set_message(progress.current_item);
                }
                AnalysisPhase::Complete => finished_before += progress.total_items,
                _ => bar_handle.set_message(progress.current_item),
            }
        }
    });

    let start = Instant::now();
    let mut catalog = PhotoCatalog::new();
    let ingestor = Ingestor::new(config.limits.clone());
    for batch in ingestor.into_batches(report.accepted) {
        ingestor.check_batch(&batch)?;
        orchestrator
            .process_batch(
                &mut catalog,
                batch,
                &settings.preferences(),
                settings.credentials(),
            )
            .await;
    }
    drop(orchestrator);
    join_progress(progress_task).await;
    bar.finish_with_message(format!("Analysis complete in {:.2?}", start.elapsed()));

    let suggested: Vec<&PhotoItem> = catalog.suggested();
    let kept = catalog.kept();

    println!("\n🗑️  Suggested Deletion ({}):", suggested.len());
    for item in &suggested {
        let reasons: Vec<&str> = item.reasons().iter().map(|r| r.label()).collect();
        println!(
            "   ▶ {} ({:.2} MB) [{}]",
            item.display_name(),
            item.size_mb(),
            reasons.join(", ")
        );
    }
    println!("\n🏆 Keep ({}):", kept.len());
    for item in &kept {
        println!("   ▶ {}", item.display_name());
    }

    if suggested.is_empty() {
        println!("\nNothing to clean up.");
        return Ok(());
    }
    let selection: HashSet<_> = suggested.iter().map(|item| item.id().clone()).collect();

    if options.dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
        return Ok(());
    }

    let verb = if options.permanent { "Delete" } else { "Move" };
    if !options.yes
        && !Confirm::new()
            .with_prompt(format!("{} {} suggested photo(s)?", verb, selection.len()))
            .default(false)
            .interact()?
    {
        println!("Cancelled.");
        return Ok(());
    }

    let (deleter, action) = match (&cleanup_dir, options.permanent) {
        (_, true) => (FsDeleter::Permanent, HistoryAction::Deleted),
        (Some(dir), false) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
            (FsDeleter::MoveTo(dir.clone()), HistoryAction::Moved)
        }
        (None, false) => (FsDeleter::Permanent, HistoryAction::Deleted),
    };

    let report = catalog.delete(&selection, Some(&deleter))?;
    for (id, error) in &report.native_failures {
        let name = catalog.get(id).map(PhotoItem::display_name).unwrap_or_default();
        eprintln!("⚠️  Could not remove {}: {}", name, error);
    }
    println!(
        "\n✅ Removed {} photo(s), {} file(s) {}",
        report.removed.len(),
        report.native_deleted,
        if action == HistoryAction::Moved { "moved" } else { "deleted" }
    );

    if let Some(dir) = path {
        let record = HistoryRecord::from_removed(&report.removed, action);
        if !record.removed.is_empty() {
            let log = HistoryLog::for_dir(dir);
            log.append(&record)
                .with_context(|| format!("Failed to write history file {:?}", log.path()))?;
            println!("✅ Recorded cleanup history in {}", log.path().display());
        }
    }

    Ok(())
}

fn collect_uploads(
    config: &AppConfig,
    path: Option<&Path>,
    archive: Option<&Path>,
    cleanup_dir: Option<&Path>,
) -> Result<IngestReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message("Collecting photos…");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let ingestor = Ingestor::new(config.limits.clone());
    let mut report = IngestReport::default();

    if let Some(dir) = path {
        let mut found = ingestor
            .from_directory(dir)
            .with_context(|| format!("Failed to scan {}", dir.display()))?;
        // Photos already moved aside by an earlier run are not rescanned.
        if let Some(cleanup) = cleanup_dir {
            found.accepted.retain(|upload| {
                upload
                    .native_location
                    .as_ref()
                    .is_none_or(|location| !location.starts_with(cleanup))
            });
        }
        report.accepted.extend(found.accepted);
        report.rejected.extend(found.rejected);
    }

    if let Some(archive) = archive {
        let found = ingestor
            .from_archive(archive)
            .with_context(|| format!("Failed to read archive {}", archive.display()))?;
        report.accepted.extend(found.accepted);
        report.rejected.extend(found.rejected);
    }

    spinner.finish_with_message(format!("Found {} photo(s)", report.accepted.len()));
    Ok(report)
}

/// Wait for the progress display to drain. A panic in it only costs the
/// progress bar, so it is logged and the scan carries on.
async fn join_progress(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Progress display stopped early: {}", e);
            false
        }
    }
}
