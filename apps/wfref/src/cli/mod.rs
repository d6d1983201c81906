//! CLI command handling for wfref

mod report;
mod watch;

use crate::extract::YamlReferenceExtractor;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use report::{DocumentReport, RecordView};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wfref_cache::{
    ActionCache, CacheSettings, ChangeTrigger, ReferenceExtractor, SnapshotStore, TriggerSettings,
};
use wfref_config::AppConfig;
use wfref_foundation::ActionIdentity;
use wfref_resolver::{FetchSettings, FsLocalResolver, HttpFetcher, HttpVersionFetcher};

/// The main CLI struct.
#[derive(Parser)]
#[command(name = "wfref")]
#[command(about = "Resolve and cache the actions referenced by GitHub Actions workflows")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: wfref.toml or .wfref/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository root that local references are relative to
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Cache snapshot file, overriding the configured location
    #[arg(long, global = true)]
    pub snapshot: Option<PathBuf>,

    /// The command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// The available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Scan workflow files and resolve every stale or unresolved reference
    Resolve {
        /// Workflow or composite action files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,

        /// Exit with an error if a reference stays unresolved (for CI/CD)
        #[arg(long)]
        fail_on_unresolved: bool,
    },
    /// Look a reference up again, ignoring what is cached for it
    Reload {
        /// Reference as written after `uses:`
        reference: String,

        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Drop cached data for a reference, or for everything with --all
    Clear {
        /// Reference as written after `uses:`
        #[arg(required_unless_present = "all")]
        reference: Option<String>,

        /// Clear every cached record
        #[arg(long, conflicts_with = "reference")]
        all: bool,
    },
    /// Silence unresolved-reference warnings for a reference
    Suppress {
        /// Reference as written after `uses:`
        reference: String,

        /// Remove the suppression instead
        #[arg(long)]
        off: bool,
    },
    /// Accept an undeclared input or output name for a reference
    Ignore {
        /// Reference as written after `uses:`
        reference: String,

        /// Input name to ignore
        #[arg(long, required_unless_present = "output", conflicts_with = "output")]
        input: Option<String>,

        /// Output name to ignore
        #[arg(long)]
        output: Option<String>,

        /// Stop ignoring the name
        #[arg(long)]
        off: bool,
    },
    /// Show cached records
    Show {
        /// Only this reference
        reference: Option<String>,

        /// Output format (text or json)
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },
    /// Watch workflow files and resolve references as they change
    Watch {
        /// Workflow or composite action files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the effective configuration, or save it to a file
    Config {
        /// Write to this file instead of stdout (.toml or .json)
        #[arg(long)]
        save: Option<PathBuf>,

        /// Output format when printing (toml or json)
        #[arg(long, default_value = "toml", value_parser = ["toml", "json"])]
        format: String,
    },
}

/// Cache wired to its collaborators plus the snapshot it persists to
pub struct Session {
    pub config: AppConfig,
    pub cache: ActionCache,
    store: Option<SnapshotStore>,
}

impl Session {
    /// Build the cache and restore the persisted snapshot, if any.
    ///
    /// An unreadable snapshot is logged and the session starts empty.
    pub fn open(config: AppConfig, root: &Path, snapshot: Option<PathBuf>) -> Result<Self> {
        let settings = FetchSettings::from(&config.fetch);
        let fetcher = Arc::new(
            HttpFetcher::new(settings.clone()).context("Failed to create descriptor fetcher")?,
        );
        let local = Arc::new(FsLocalResolver::new(root));
        let cache_settings = CacheSettings::from(&config.cache);
        let cache = if config.fetch.check_versions {
            let versions = HttpVersionFetcher::new(&settings)
                .context("Failed to create release lookup")?;
            ActionCache::with_versions(fetcher, local, Arc::new(versions), cache_settings)?
        } else {
            ActionCache::new(fetcher, local, cache_settings)?
        };

        let store = snapshot
            .or_else(|| config.cache.resolved_snapshot_path())
            .map(SnapshotStore::new);

        if let Some(store) = &store {
            match store.load() {
                Ok(snapshot) => {
                    let summary = cache.import_snapshot(snapshot);
                    debug!(
                        inserted = summary.inserted,
                        invalid = summary.invalid,
                        "Restored cache snapshot"
                    );
                }
                Err(e) => {
                    warn!(
                        path = %store.path().display(),
                        error = %e,
                        "Ignoring unreadable cache snapshot"
                    );
                }
            }
        }

        Ok(Self {
            config,
            cache,
            store,
        })
    }

    pub fn trigger(&self, extractor: Arc<dyn ReferenceExtractor>) -> Result<ChangeTrigger> {
        Ok(ChangeTrigger::new(
            self.cache.clone(),
            extractor,
            TriggerSettings::from(&self.config.trigger),
        )?)
    }

    /// Write the snapshot back, when persistence is on
    pub fn persist(&self) -> Result<()> {
        if let Some(store) = &self.store {
            store
                .save(&self.cache.export_snapshot())
                .with_context(|| {
                    format!("Failed to save cache snapshot to {}", store.path().display())
                })?;
        }
        Ok(())
    }
}

/// Main CLI entry point
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config =
        AppConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    wfref_config::logging::initialize(&config);

    let session = Session::open(config, &cli.root, cli.snapshot)?;
    let read_only = matches!(cli.command, Commands::Show { .. } | Commands::Config { .. });

    let outcome = execute(&session, cli.command).await;

    // Failed lookups are recorded on their records, so save either way
    if !read_only {
        session.persist()?;
    }
    outcome
}

async fn execute(session: &Session, command: Commands) -> Result<()> {
    match command {
        Commands::Resolve {
            files,
            format,
            fail_on_unresolved,
        } => handle_resolve(session, &files, &format, fail_on_unresolved).await,
        Commands::Reload { reference, format } => {
            handle_reload(session, &reference, &format).await
        }
        Commands::Clear { reference, all } => handle_clear(session, reference.as_deref(), all),
        Commands::Suppress { reference, off } => handle_suppress(session, &reference, !off),
        Commands::Ignore {
            reference,
            input,
            output,
            off,
        } => handle_ignore(session, &reference, input, output, !off),
        Commands::Show { reference, format } => {
            handle_show(session, reference.as_deref(), &format)
        }
        Commands::Watch { files } => watch::run(session, &files).await,
        Commands::Config { save, format } => {
            handle_config(&session.config, save.as_deref(), &format)
        }
    }
}

fn handle_config(config: &AppConfig, save: Option<&Path>, format: &str) -> Result<()> {
    match save {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", config.render(format == "toml")?),
    }
    Ok(())
}

fn parse_reference(raw: &str) -> Result<ActionIdentity> {
    ActionIdentity::parse(raw).with_context(|| format!("Invalid reference '{}'", raw))
}

/// Startup scan: every document is triggered at once, then reported
async fn handle_resolve(
    session: &Session,
    files: &[PathBuf],
    format: &str,
    fail_on_unresolved: bool,
) -> Result<()> {
    let extractor = Arc::new(YamlReferenceExtractor::new());
    let trigger = session.trigger(extractor.clone())?;

    let scans: Vec<_> = files.iter().map(|file| trigger.on_open(file)).collect();
    for scan in scans {
        scan.await.context("Document scan task failed")?.wait().await;
    }

    let now = Utc::now();
    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let references = extractor
            .extract(file)
            .await
            .with_context(|| format!("Failed to read references from {}", file.display()))?;
        reports.push(DocumentReport::new(file, &references, &session.cache, now));
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            report::print_document(report);
        }
    }

    let unresolved: usize = reports.iter().map(DocumentReport::unresolved).sum();
    info!(documents = reports.len(), unresolved, "Resolution finished");
    if fail_on_unresolved && unresolved > 0 {
        bail!("{} reference(s) could not be resolved", unresolved);
    }
    Ok(())
}

async fn handle_reload(session: &Session, reference: &str, format: &str) -> Result<()> {
    let identity = parse_reference(reference)?;
    let record = session
        .cache
        .reload(&identity)
        .await
        .with_context(|| format!("Failed to reload {}", identity))?;

    let view = RecordView::new(&record, Utc::now());
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        report::print_record(&view);
    }
    Ok(())
}

fn handle_clear(session: &Session, reference: Option<&str>, all: bool) -> Result<()> {
    if all {
        let cleared = session.cache.len();
        session.cache.clear();
        println!("🧹 Cleared {} cached record(s)", cleared);
        return Ok(());
    }

    let Some(reference) = reference else {
        bail!("Either a reference or --all is required");
    };
    let identity = parse_reference(reference)?;
    session.cache.invalidate(&identity);
    println!("🧹 Cleared {}", identity);
    Ok(())
}

fn handle_suppress(session: &Session, reference: &str, suppressed: bool) -> Result<()> {
    let identity = parse_reference(reference)?;
    let changed = session.cache.set_suppressed(&identity, suppressed);
    let state = if suppressed { "suppressed" } else { "unsuppressed" };
    if changed {
        println!("{} is now {}", identity, state);
    } else {
        println!("{} was already {}", identity, state);
    }
    Ok(())
}

fn handle_ignore(
    session: &Session,
    reference: &str,
    input: Option<String>,
    output: Option<String>,
    ignored: bool,
) -> Result<()> {
    let identity = parse_reference(reference)?;
    let (side, name, changed) = match (input, output) {
        (Some(name), _) => {
            let changed = session.cache.set_input_ignored(&identity, &name, ignored);
            ("input", name, changed)
        }
        (None, Some(name)) => {
            let changed = session.cache.set_output_ignored(&identity, &name, ignored);
            ("output", name, changed)
        }
        (None, None) => bail!("Either --input or --output is required"),
    };

    let state = if ignored { "ignored" } else { "not ignored" };
    if changed {
        println!("{} '{}' of {} is now {}", side, name, identity, state);
    } else {
        println!("{} '{}' of {} was already {}", side, name, identity, state);
    }
    Ok(())
}

fn handle_show(session: &Session, reference: Option<&str>, format: &str) -> Result<()> {
    let now = Utc::now();
    let records = match reference {
        Some(raw) => {
            let identity = parse_reference(raw)?;
            match session.cache.peek(&identity) {
                Some(record) => vec![record],
                None => bail!("{} is not cached", identity),
            }
        }
        None => session.cache.records(),
    };
    let views: Vec<RecordView> = records
        .iter()
        .map(|record| RecordView::new(record, now))
        .collect();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for view in &views {
        report::print_record(view);
    }
    if reference.is_none() {
        report::print_stats(&session.cache.stats());
    }
    Ok(())
}
