use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use media_deduper_core::config::LogLevel;
use media_deduper_core::discovery::discover_media;
use media_deduper_core::logging::init_logger;
use media_deduper_core::{
    find_exact_duplicates, CancelToken, ColorfulBias, Config, DuplicateFinder, ImportEvent,
    ImportSource, ImportStatus, ImporterThread, ItemId, ItemPair, ItemStore, SearchOutcome,
    SqliteItemStore,
};

#[derive(Parser)]
#[command(name = "media-deduper")]
#[command(about = "Import media into a library and find duplicate items")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import files, directories or http(s) URLs into the library
    Import {
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Find similar items across the whole library
    Find {
        /// Similarity threshold in (0, 1]
        #[arg(long)]
        confidence: Option<f64>,

        /// Also match pairs of black-and-white images
        #[arg(long)]
        compare_bw: bool,

        /// Require both sides to be colourful for the relaxed threshold
        #[arg(long)]
        both_colorful: bool,

        /// Only report byte-identical items
        #[arg(long)]
        exact: bool,
    },

    /// Recompute every item's "no similar items" flag
    RebuildCache,

    /// Mark two items as not being duplicates of each other
    Ignore { a: u64, b: u64 },

    /// Undo `ignore` for a pair of items
    Unignore { a: u64, b: u64 },

    /// Generate default configuration file
    GenerateConfig {
        /// Path to save configuration file
        #[arg(default_value = "media-deduper.json")]
        path: PathBuf,
    },
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    if let Commands::GenerateConfig { path } = &cli.command {
        Config::default().save_to_file(path)?;
        println!("Configuration file generated at: {}", path.display());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    config.log_level = match cli.verbose {
        0 => config.log_level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };
    config.validate()?;

    if let Err(e) = init_logger(&config.log_dir, config.log_level.to_level_filter()) {
        env_logger::Builder::new()
            .filter_level(config.log_level.to_level_filter())
            .init();
        warn!("File logging unavailable ({}), logging to stderr", e);
    }

    let store = Arc::new(open_store(&config)?);

    match cli.command {
        Commands::Import { sources } => import(&config, store, &sources),
        Commands::Find {
            confidence,
            compare_bw,
            both_colorful,
            exact,
        } => {
            if exact {
                return report_exact(store.as_ref());
            }
            let mut policy = config.similarity;
            if let Some(confidence) = confidence {
                policy.confidence = confidence;
            }
            policy.compare_black_and_white |= compare_bw;
            if both_colorful {
                policy.colorful_bias = ColorfulBias::BothSides;
            }
            find(store.as_ref(), &policy)
        }
        Commands::RebuildCache => rebuild_cache(store.as_ref()),
        Commands::Ignore { a, b } => {
            let pair = item_pair(store.as_ref(), a, b)?;
            if store.non_duplicates().add(pair)? {
                println!("Items {} and {} will no longer be reported together", a, b);
            } else {
                println!("Items {} and {} were already ignored", a, b);
            }
            Ok(())
        }
        Commands::Unignore { a, b } => {
            let pair = ItemPair::new(ItemId(a), ItemId(b));
            if store.non_duplicates().remove(pair)? {
                println!("Items {} and {} can be reported again", a, b);
            } else {
                println!("Items {} and {} were not ignored", a, b);
            }
            Ok(())
        }
        Commands::GenerateConfig { .. } => Ok(()),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SqliteItemStore> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    SqliteItemStore::open(&config.database_path, config.allowed_extensions.clone())
        .with_context(|| format!("Failed to open {}", config.database_path.display()))
}

fn progress_bar(len: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{eta}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    bar.set_message(message);
    bar
}

/// Cancel token tripped by Ctrl-C
fn interrupt_token() -> anyhow::Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .context("Failed to install Ctrl-C handler")?;
    Ok(token)
}

fn describe(store: &dyn ItemStore, id: ItemId) -> String {
    match store.get(id).as_ref().and_then(|item| item.path().map(Path::to_path_buf)) {
        Some(path) => format!("{} ({})", id, path.display()),
        None => id.to_string(),
    }
}

fn import(config: &Config, store: Arc<SqliteItemStore>, sources: &[String]) -> anyhow::Result<()> {
    let mut expanded = Vec::new();
    for source in sources {
        match ImportSource::parse(source) {
            ImportSource::Local(path) => {
                for file in discover_media(&[&path], &config.allowed_extensions)? {
                    expanded.push(ImportSource::Local(file));
                }
            }
            remote => expanded.push(remote),
        }
    }
    if expanded.is_empty() {
        println!("Nothing to import");
        return Ok(());
    }

    let interrupted = interrupt_token()?;
    let importer = ImporterThread::new(
        store.clone(),
        config.similarity,
        config.download_dir.clone(),
    )?;
    let events = importer.subscribe();
    let jobs: Vec<_> = expanded
        .into_iter()
        .map(|source| importer.import(source))
        .collect();
    info!("Importing {} sources", jobs.len());

    let bar = progress_bar(jobs.len() as u64, "Importing...");
    let mut remaining = jobs.len();
    let mut cancelled = false;
    while remaining > 0 {
        if interrupted.is_cancelled() && !cancelled {
            cancelled = true;
            let dropped = importer
                .pending()
                .iter()
                .filter(|job| importer.cancel(job))
                .count();
            remaining -= dropped;
            bar.println(format!("Interrupted, {} queued imports cancelled", dropped));
            continue;
        }

        let event = match events.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => event,
            Err(e) if e.is_timeout() => continue,
            Err(_) => break,
        };
        let ImportEvent::StatusChanged { job, status } = event else {
            continue;
        };
        if !status.is_terminal() {
            continue;
        }
        remaining -= 1;
        bar.inc(1);

        match status {
            ImportStatus::FailedDuplicate => bar.println(format!(
                "{}: duplicate of {}",
                job.source(),
                job.duplicate_of()
                    .map(|id| describe(store.as_ref(), id))
                    .unwrap_or_default()
            )),
            ImportStatus::FailedImport => bar.println(format!(
                "{}: failed ({})",
                job.source(),
                job.failure().unwrap_or_default()
            )),
            ImportStatus::SucceededSimilar => {
                let new_id = job.item_id();
                for pair in job.similar_to() {
                    let other = new_id.and_then(|id| pair.other(id));
                    if let Some(other) = other {
                        bar.println(format!(
                            "{}: similar to {} ({:.3})",
                            job.source(),
                            describe(store.as_ref(), other),
                            pair.similarity
                        ));
                    }
                }
            }
            _ => {}
        }
    }
    bar.finish_with_message("Import complete");

    let succeeded = jobs.iter().filter(|job| job.status().is_success()).count();
    println!("Imported {} of {} sources", succeeded, jobs.len());
    Ok(())
}

fn find(
    store: &SqliteItemStore,
    policy: &media_deduper_core::SimilarityPolicy,
) -> anyhow::Result<()> {
    let interrupted = interrupt_token()?;
    let items = store.items_snapshot();
    let bar = progress_bar(0, "Comparing items...");

    let outcome = DuplicateFinder::new(store).find(
        &items,
        &items,
        policy,
        |progress| {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.done as u64);
        },
        &interrupted,
    )?;
    bar.finish_and_clear();

    let cancelled = outcome.is_cancelled();
    let mut pairs = match outcome {
        SearchOutcome::Completed(pairs) => pairs,
        SearchOutcome::Cancelled { partial } => partial,
    };
    pairs.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    for pair in &pairs {
        let key = pair.key();
        println!(
            "{:.3}  {}  <->  {}",
            pair.similarity,
            describe(store, key.first()),
            describe(store, key.second())
        );
    }
    if cancelled {
        println!("Search interrupted, {} pairs found so far", pairs.len());
    } else {
        println!("{} similar pairs", pairs.len());
    }
    Ok(())
}

fn report_exact(store: &SqliteItemStore) -> anyhow::Result<()> {
    let groups = find_exact_duplicates(&store.items_snapshot());
    for group in &groups {
        let hash = group
            .first()
            .and_then(|item| item.content_hash())
            .map(|hash| hash.to_string())
            .unwrap_or_default();
        println!("{}", hash);
        for item in group {
            println!("  {}", describe(store, item.id()));
        }
    }
    println!("{} groups of identical items", groups.len());
    Ok(())
}

fn rebuild_cache(store: &SqliteItemStore) -> anyhow::Result<()> {
    let interrupted = interrupt_token()?;
    let bar = progress_bar(0, "Rebuilding similarity cache...");
    let flagged = DuplicateFinder::new(store).rebuild_similarity_cache(
        |progress| {
            bar.set_length(progress.total as u64);
            bar.set_position(progress.done as u64);
        },
        &interrupted,
    )?;
    bar.finish_and_clear();

    match flagged {
        Some(count) => println!("{} items have no similar items", count),
        None => println!("Rebuild interrupted, flags left unchanged"),
    }
    Ok(())
}

fn item_pair(store: &dyn ItemStore, a: u64, b: u64) -> anyhow::Result<ItemPair> {
    for id in [a, b] {
        if store.get(ItemId(id)).is_none() {
            bail!("No item with id {}", id);
        }
    }
    if a == b {
        bail!("An item can not be paired with itself");
    }
    Ok(ItemPair::new(ItemId(a), ItemId(b)))
}
