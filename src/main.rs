//! repowalk - inspect and export repository block exports
//!
//! This is the main entry point for the repowalk command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use repowalk::export::{
    DateWindow, ErrorPolicy, ExportConfig, ExportMode, Exporter, DEFAULT_MAX_OPEN_FILES,
};
use repowalk::records::Collection;
use repowalk::storage::{
    latest_commit, scan_commits, BlockId, CommitInfo, HistoryWalker, RecordCache, RepoExport,
    TreeWalker, WalkOptions,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Walk the commit history of a repository export
#[derive(Parser, Debug)]
#[command(name = "repowalk", version)]
#[command(about = "Walk and export the record trees of a repository export")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Deepest subtree level a walk may reach
    #[arg(long, global = true, default_value_t = WalkOptions::default().max_depth)]
    max_depth: usize,

    /// Accept trees whose keys are out of order
    #[arg(long, global = true)]
    no_verify_order: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the record keys of one commit (default: the latest)
    Keys {
        input: PathBuf,
        #[arg(long)]
        commit: Option<String>,
    },
    /// Print each commit, oldest first, with what it created and deleted
    History {
        input: PathBuf,
        /// Print every changed key
        #[arg(long)]
        changes: bool,
    },
    /// Count the blocks in an export
    Stats { input: PathBuf },
    /// Write records as day-partitioned JSON Lines
    Export {
        input: PathBuf,
        /// Repository DID (default: taken from the latest commit)
        #[arg(long)]
        did: Option<String>,
        #[arg(short, long, default_value = "stream")]
        out: PathBuf,
        /// Write one event per create/delete instead of the latest snapshot
        #[arg(long)]
        events: bool,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Collection NSID to export, repeatable
        #[arg(long = "collection")]
        collections: Vec<Collection>,
        /// Remove the output directory first
        #[arg(long)]
        clean: bool,
        /// Stop at the first commit that cannot be read
        #[arg(long)]
        abort_on_error: bool,
        /// Account creation time; writes a profile line for the account first
        #[arg(long)]
        actor_created_at: Option<String>,
        /// Day files kept open at once
        #[arg(long, default_value_t = DEFAULT_MAX_OPEN_FILES)]
        max_open_files: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "repowalk=debug" } else { "repowalk=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let walk = WalkOptions::default()
        .max_depth(cli.max_depth)
        .verify_order(!cli.no_verify_order);

    match cli.command {
        Command::Keys { input, commit } => print_keys(&RepoExport::open(input)?, commit, walk),
        Command::History { input, changes } => {
            print_history(&RepoExport::open(input)?, changes, walk)
        }
        Command::Stats { input } => {
            let export = RepoExport::open(input)?;
            let stats = export.store.stats();
            println!("blocks\t{}", stats.total());
            println!("commits\t{}", stats.commits);
            println!("nodes\t{}", stats.nodes);
            println!("records\t{}", stats.records);
            println!("roots\t{}", export.roots.len());
            Ok(())
        }
        Command::Export {
            input,
            did,
            out,
            events,
            start,
            end,
            collections,
            clean,
            abort_on_error,
            actor_created_at,
            max_open_files,
        } => {
            let export = RepoExport::open(input)?;
            let did = match did {
                Some(did) => did,
                None => scan_commits(&export.store)
                    .commits
                    .pop()
                    .and_then(|c| c.did)
                    .ok_or("no --did given and the latest commit names none")?,
            };

            let defaults = DateWindow::default();
            let mut config = ExportConfig::new(out)
                .window(start.unwrap_or(defaults.start), end.unwrap_or(defaults.end))
                .clean(clean)
                .max_open_files(max_open_files)
                .walk_options(walk);
            if !collections.is_empty() {
                config = config.collections(collections);
            }
            if abort_on_error {
                config = config.error_policy(ErrorPolicy::Abort);
            }

            let exporter = Exporter::open(config)?;
            let mode = if events { ExportMode::Events } else { ExportMode::Snapshot };
            let stats =
                exporter.export_repo(&did, &export, mode, actor_created_at.as_deref())?;
            exporter.finish()?;

            info!(
                written = stats.written,
                filtered = stats.filtered,
                errors = stats.errors,
                skipped_commits = stats.skipped_commits,
                "export finished"
            );
            Ok(())
        }
    }
}

fn print_keys(export: &RepoExport, commit: Option<String>, walk: WalkOptions) -> CliResult<()> {
    let commit = match commit {
        Some(id) => CommitInfo::from_store(&export.store, &BlockId::new(id)?)?,
        None => latest_commit(&export.store)?.ok_or("export has no commits")?,
    };

    let mut cache = RecordCache::new();
    let keys = TreeWalker::with_options(&export.store, walk).enumerate(&commit.data, &mut cache)?;
    for key in keys {
        println!("{}", key);
    }
    Ok(())
}

fn print_history(export: &RepoExport, changes: bool, walk: WalkOptions) -> CliResult<()> {
    let mut cache = RecordCache::new();
    for step in HistoryWalker::with_options(&export.store, &mut cache, walk) {
        let step = match step {
            Ok(step) => step,
            Err(e) => {
                println!("! {}", e);
                continue;
            }
        };

        println!(
            "{}\t{}\t{} keys\t+{} -{}",
            step.commit.rev,
            step.commit.id.short(),
            step.keys.len(),
            step.diff.created.len(),
            step.diff.deleted.len()
        );
        if changes {
            for change in step.diff.changes() {
                println!("  {}\t{}", change.status, change.key);
            }
        }
    }
    Ok(())
}
