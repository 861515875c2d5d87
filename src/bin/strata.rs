//! # Strata CLI - Incremental backups from the command line
//!
//! Runs one backup of a source directory into a backup root and exits with
//! status 0 on success, 1 otherwise.
//!
//! ## Usage
//! ```bash
//! # Back up ~/documents into /mnt/backup
//! strata -s ~/documents -b /mnt/backup
//!
//! # Show every processed file
//! strata -s ~/documents -b /mnt/backup --verbose
//!
//! # Take settings from a JSON file, overriding the worker count
//! strata --config backup.json -j 2
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use strata::{BackupConfig, BackupReport, BackupRunner, ProgressInfo};
use tracing_subscriber::EnvFilter;

/// Strata CLI - incremental content-hashed backups
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version)]
#[command(about = "Incremental backup keeping a live mirror and timestamped history")]
#[command(long_about = None)]
struct Cli {
    /// Source directory to back up
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Backup root (holds backup/, deleted/ and backup.db)
    #[arg(short, long)]
    backup: Option<PathBuf>,

    /// Accepted for compatibility; the run is performed normally
    #[arg(short, long)]
    dry_run: bool,

    /// Print every processed file and enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file; flags given on the command line win
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker threads (defaults to the number of CPUs)
    #[arg(short = 'j', long)]
    workers: Option<usize>,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Resolve the configuration, run the backup and print the summary
///
/// Returns whether the backup succeeded.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = resolve_config(&cli)?;
    let verbose = config.verbose;

    let spinner = (!verbose && std::io::stderr().is_terminal()).then(|| {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Scanning files...");
        pb
    });

    let config = if verbose {
        config.with_progress(|info: ProgressInfo| {
            println!(
                "[{}] {}/{} : {}",
                info.stage,
                info.processed,
                info.total,
                info.file.display()
            );
        })
    } else if let Some(pb) = spinner.clone() {
        config.with_progress(move |info: ProgressInfo| {
            pb.set_message(format!("{} {} files", info.stage, info.processed));
        })
    } else {
        config
    };

    let report = BackupRunner::new(config).run();

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let report = report.context("backup could not start")?;
    print_summary(&report, verbose);
    Ok(report.success)
}

/// Merge the optional config file with command-line flags and validate paths
fn resolve_config(cli: &Cli) -> anyhow::Result<BackupConfig> {
    let file_config = match &cli.config {
        Some(path) => Some(
            BackupConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
        ),
        None => None,
    };

    let source = cli
        .source
        .clone()
        .or_else(|| file_config.as_ref().map(|c| c.source_dir.clone()))
        .context("no source directory given (use --source or --config)")?;
    let backup_root = cli
        .backup
        .clone()
        .or_else(|| file_config.as_ref().map(|c| c.backup_root.clone()))
        .context("no backup directory given (use --backup or --config)")?;

    let source = source
        .canonicalize()
        .with_context(|| format!("source {} does not exist", source.display()))?;
    if !source.is_dir() {
        bail!("source {} is not a directory", source.display());
    }

    std::fs::create_dir_all(&backup_root)
        .with_context(|| format!("cannot create backup directory {}", backup_root.display()))?;

    let mut config = match file_config {
        Some(mut file_config) => {
            if cli.backup.is_some() {
                file_config.database_file = backup_root.join(strata::types::DEFAULT_DATABASE_FILE);
            }
            file_config.source_dir = source;
            file_config.backup_root = backup_root;
            file_config
        }
        None => BackupConfig::with_default_database(source, backup_root),
    };
    config.dry_run |= cli.dry_run;
    config.verbose |= cli.verbose;
    if cli.workers.is_some() {
        config.workers = cli.workers;
    }

    Ok(config)
}

fn print_summary(report: &BackupReport, verbose: bool) {
    if report.success {
        println!("{} Backup completed successfully", "✓".green().bold());
    } else {
        println!("{} Backup failed", "✗".red().bold());
    }

    println!("  Processed: {}", report.files_processed.to_string().cyan());
    println!(
        "  Added: {}  Modified: {}  Unchanged: {}  Deleted: {}",
        report.files_added.to_string().green(),
        report.files_modified.to_string().yellow(),
        report.files_unchanged.to_string().cyan(),
        report.files_deleted.to_string().red()
    );
    if report.deletions_deferred > 0 {
        println!(
            "  Deletions deferred to the next run: {}",
            report.deletions_deferred.to_string().yellow()
        );
    }
    if let Some(snapshot) = &report.snapshot_dir {
        println!("  Snapshot: {}", snapshot.display().to_string().cyan());
    }
    println!("  Time: {}", format_duration(report.duration).to_string().cyan());

    if !report.failures.is_empty() {
        println!("  Failures: {}", report.failures.len().to_string().red().bold());
        let shown = if verbose { report.failures.len() } else { 10 };
        for failure in report.failures.iter().take(shown) {
            println!(
                "    {} {}: {}",
                failure.kind.to_string().red(),
                failure.path.display(),
                failure.message
            );
        }
        if report.failures.len() > shown {
            println!("    ... and {} more", report.failures.len() - shown);
        }
    }
}
