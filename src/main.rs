//! Harrow main entry point
//!
//! This is the command-line interface for the Harrow scraping framework.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use harrow::config::{
    load_config_with_hash, parse_config, validate, EngineKind, RunConfig, SourceConfig,
};
use harrow::fetch::check_browser;
use harrow::jobs::{source_recipe, EngineSlot, PhaseContext, RecipeOptions};
use harrow::state::{StateManager, LAST_ERROR_KEY};
use harrow::storage::open_state_store;
use harrow::{ConfigError, Orchestrator, RunReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Harrow: a resilient multi-source scraper
///
/// Harrow fetches listing and detail pages for every configured source,
/// escalating to a headless browser when needed, and writes raw dumps,
/// links, items and a run report under the results root.
#[derive(Parser, Debug)]
#[command(name = "harrow")]
#[command(version)]
#[command(about = "A resilient multi-source scraper", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the configured sources
    Run {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Only run this source (repeatable)
        #[arg(long = "source", value_name = "ID")]
        sources: Vec<String>,

        /// Validate and write run metadata without fetching anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a configuration and check that required engines are usable
    Check {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Run one source as a resumable discover/detail/summary job
    Job {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Source to scrape
        #[arg(long, value_name = "ID")]
        source: String,

        /// State file (.json, or .sqlite/.db for SQLite)
        #[arg(long, value_name = "FILE")]
        state: PathBuf,

        /// Directory receiving items.jsonl and summary.json
        #[arg(long, value_name = "DIR", default_value = "./job-output")]
        out: PathBuf,

        /// Save progress every N detail pages
        #[arg(long, default_value_t = 25)]
        checkpoint_every: u64,

        /// Restart the engine every N detail pages (0 never)
        #[arg(long, default_value_t = 0)]
        recycle_every: u64,
    },

    /// Show the jobs recorded in a state file
    JobStatus {
        #[arg(value_name = "STATE_FILE")]
        state: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            config,
            sources,
            dry_run,
        } => handle_run(&config, sources, dry_run).await,
        Command::Check { config } => handle_check(&config).await,
        Command::Job {
            config,
            source,
            state,
            out,
            checkpoint_every,
            recycle_every,
        } => {
            let options = RecipeOptions {
                checkpoint_every,
                recycle_every,
            };
            handle_job(&config, &source, &state, out, options).await
        }
        Command::JobStatus { state } => handle_job_status(&state),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harrow=info,warn"),
            1 => EnvFilter::new("harrow=debug,info"),
            2 => EnvFilter::new("harrow=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn load(path: &Path) -> anyhow::Result<(RunConfig, String)> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = load_config_with_hash(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);
    Ok((config, hash))
}

/// Handles `run`: executes the orchestrator and prints the summary
async fn handle_run(
    config_path: &Path,
    sources: Vec<String>,
    dry_run: bool,
) -> anyhow::Result<ExitCode> {
    let (config, hash) = load(config_path)?;

    let report = Orchestrator::new(config)
        .with_config_hash(hash)
        .with_config_path(config_path)
        .source_filter(sources)
        .dry_run(dry_run)
        .run()
        .await?;

    print_summary(&report);

    Ok(if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(report: &RunReport) {
    println!("=== Harrow Run {} ===\n", report.run_id);
    if report.dry_run {
        println!("Dry run: configuration is valid, nothing fetched");
        return;
    }

    for source in &report.sources {
        let mark = if source.ok { "✓" } else { "✗" };
        println!(
            "{} {:<20} pages {}/{}  links {}  items {} saved / {} dropped",
            mark,
            source.source_id,
            source.pages_succeeded,
            source.pages_attempted,
            source.links_found,
            source.items_saved,
            source.items_dropped
        );
        if let Some(error) = &source.error {
            println!("    error: {}", error);
        }
        for hint in &source.diagnosis {
            println!("    - {}", hint);
        }
    }

    println!(
        "\n{}/{} source(s) ok, {} item(s) saved in {} ms",
        report.sources_ok, report.sources_total, report.totals.items_saved, report.elapsed_ms
    );
}

/// Handles `check`: validation plus environment readiness
async fn handle_check(config_path: &Path) -> anyhow::Result<ExitCode> {
    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let config = parse_config(&content)?;
    let validation = validate(&config);

    println!("=== Harrow Check ===\n");
    println!("Configuration: {}", config_path.display());
    println!("Sources: {}", config.sources.len());

    for warning in &validation.warnings {
        println!("  ! {}", warning);
    }
    for error in &validation.errors {
        println!("  ✗ {}", error);
    }

    let mut ready = validation.is_ok();

    for source in config.sources.iter().filter(|s| s.enabled) {
        if !needs_browser(source) {
            continue;
        }
        match check_browser(&source.engine).await {
            Ok(()) => println!("✓ Browser available for source '{}'", source.id),
            Err(e) => {
                ready = false;
                println!("✗ Browser unavailable for source '{}': {}", source.id, e);
            }
        }
    }

    if ready {
        println!("\n✓ Ready to run");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("\n✗ Not ready");
        Ok(ExitCode::FAILURE)
    }
}

fn needs_browser(source: &SourceConfig) -> bool {
    matches!(
        source.engine.engine_kind(),
        Ok(EngineKind::Browser) | Ok(EngineKind::Hybrid)
    )
}

/// Handles `job`: runs or resumes the phased job of one source
async fn handle_job(
    config_path: &Path,
    source_id: &str,
    state_path: &Path,
    out: PathBuf,
    options: RecipeOptions,
) -> anyhow::Result<ExitCode> {
    let (config, _hash) = load(config_path)?;
    let source = config
        .source(source_id)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownSource(source_id.to_string()))?;

    let store = open_state_store(state_path)?;
    let state = StateManager::load(&source.id, store)?;
    let mut ctx = PhaseContext::new(
        EngineSlot::from_settings(source.engine.clone()),
        state,
        serde_json::to_value(&source)?,
    );

    let runner = source_recipe(source, out, options)?;
    let outcome = runner.run(&mut ctx).await?;

    for (phase, result) in &outcome.results {
        let counts: Vec<String> = result
            .counts
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        println!(
            "{} {:<10} {}",
            if result.ok { "✓" } else { "✗" },
            phase,
            counts.join(" ")
        );
    }

    if let Some(phase) = &outcome.failed_phase {
        bail!("job stopped in phase '{}'; rerun to resume", phase);
    }
    println!("Job {} is {}", source_id, outcome.status.to_db_string());
    Ok(ExitCode::SUCCESS)
}

/// Handles `job-status`: lists saved jobs
fn handle_job_status(state_path: &Path) -> anyhow::Result<ExitCode> {
    if !state_path.exists() {
        bail!("state file {} does not exist", state_path.display());
    }
    let store = open_state_store(state_path)?;
    let jobs = store.list()?;

    if jobs.is_empty() {
        println!("No jobs in {}", store.location());
        return Ok(ExitCode::SUCCESS);
    }

    for job in jobs {
        println!("{}", job.job_id);
        println!("  Status: {}", job.status.to_db_string());
        println!("  Phase: {}", job.phase.as_deref().unwrap_or("-"));
        println!("  Current page: {}", job.current_page);
        println!("  Processed: {}", job.processed.len());
        println!("  Updated: {}", job.updated_at.to_rfc3339());
        if let Some(error) = job.metadata.get(LAST_ERROR_KEY).and_then(|v| v.as_str()) {
            println!("  Last error: {}", error);
        }
    }

    Ok(ExitCode::SUCCESS)
}
