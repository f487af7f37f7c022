//! Harvester CLI
//!
//! Usage:
//!   harvester run                 # process every instrument not yet done
//!   harvester status              # checkpoint counts and failed instruments
//!   harvester validate            # compare the input list with the output sheet
//!   harvester forget 123 456      # force instruments to be processed again
//!   harvester forget --failed     # ... or every failed one
//!   harvester check               # is the browser reachable, which page would be used

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use harvester::config::duration::parse_duration;
use harvester::session::cdp::launch_instructions;
use harvester::session::CdpEndpoint;
use harvester::sheets::{read_instruments, OutputSheet};
use harvester::{CheckpointStore, HarvestConfig, Orchestrator, Portal};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE: &str = "harvest.yaml";

#[derive(Parser)]
#[command(name = "harvester")]
#[command(about = "Resumable record extraction from the instrument portal")]
#[command(
    long_about = "Attaches to a logged-in Chromium browser through its DevTools endpoint, looks up every instrument of the input sheet in the portal and appends what it finds to the output sheet. Progress is checkpointed, so rerunning after an interruption continues where it stopped."
)]
struct Cli {
    /// YAML configuration file (defaults to ./harvest.yaml when present)
    #[arg(long, short = 'c', global = true, env = "HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true, env = "HARVEST_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Values that take precedence over the configuration file
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Input spreadsheet (.xlsx, .xls, .ods or .csv)
    #[arg(long, global = true, env = "HARVEST_INPUT")]
    input: Option<PathBuf>,

    /// Output spreadsheet (.xlsx or .csv)
    #[arg(long, global = true, env = "HARVEST_OUTPUT")]
    output: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long, global = true, env = "HARVEST_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Input column holding the instrument identifiers
    #[arg(long, global = true)]
    identifier_column: Option<String>,

    /// DevTools endpoint of the running browser (host:port or URL)
    #[arg(long, global = true, env = "HARVEST_DEVTOOLS_ENDPOINT")]
    endpoint: Option<String>,

    /// Only attach to a page whose URL contains this
    #[arg(long, global = true, env = "HARVEST_PAGE_URL")]
    page_url: Option<String>,

    /// Per-element wait budget, e.g. 3s or 1500ms
    #[arg(long, global = true, value_parser = parse_wait)]
    wait_timeout: Option<Duration>,

    /// Budget for the search result to appear
    #[arg(long, global = true, value_parser = parse_wait)]
    search_timeout: Option<Duration>,

    /// Write the output sheet after this many instruments
    #[arg(long, global = true)]
    flush_every: Option<usize>,

    /// Extra passes over instruments that failed during the run
    #[arg(long, global = true)]
    retry_passes: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every instrument that is not done yet
    Run,
    /// Show checkpoint progress
    Status {
        /// List every failed instrument with its last error
        #[arg(long)]
        failed: bool,
    },
    /// Report input instruments missing from the output sheet
    Validate,
    /// Drop checkpoint entries so the instruments are processed again
    Forget(ForgetArgs),
    /// Check that the browser is reachable and show the page that would be used
    Check,
}

#[derive(Args, Debug)]
struct ForgetArgs {
    /// Instrument identifiers
    #[arg(required_unless_present = "failed")]
    ids: Vec<String>,

    /// Forget every instrument currently marked failed
    #[arg(long, conflicts_with = "ids")]
    failed: bool,
}

fn parse_wait(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn init_logging(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let name = path
                .file_name()
                .context("--log-file must name a file")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(
            // Respect RUST_LOG if provided, else default to info
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    Ok(guard)
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<HarvestConfig> {
    let mut config = match path {
        Some(p) => HarvestConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            HarvestConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => HarvestConfig::default(),
    };

    if let Some(v) = &overrides.input {
        config.input_path = v.clone();
    }
    if let Some(v) = &overrides.output {
        config.output_path = v.clone();
    }
    if let Some(v) = &overrides.checkpoint {
        config.checkpoint_path = v.clone();
    }
    if let Some(v) = &overrides.identifier_column {
        config.identifier_column = v.clone();
    }
    if let Some(v) = &overrides.endpoint {
        config.devtools_endpoint = v.clone();
    }
    if let Some(v) = &overrides.page_url {
        config.page_url_pattern = Some(v.clone());
    }
    if let Some(v) = overrides.wait_timeout {
        config.wait_timeout = v;
    }
    if let Some(v) = overrides.search_timeout {
        config.search_timeout = v;
    }
    if let Some(v) = overrides.flush_every {
        config.flush_every = v;
    }
    if let Some(v) = overrides.retry_passes {
        config.retry_passes = v;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(config: HarvestConfig) -> Result<()> {
    let records = read_instruments(&config.input_path, &config.identifier_column)
        .with_context(|| format!("failed to read input {}", config.input_path.display()))?;
    info!("{} instruments in {}", records.len(), config.input_path.display());

    let portal = Portal::connect(&config).await.with_context(|| {
        format!(
            "could not attach to the browser at {}\n\n{}",
            config.devtools_endpoint,
            launch_instructions()
        )
    })?;
    let mut orchestrator = Orchestrator::new(config, portal.session())?;
    let summary = orchestrator.run(&records).await?;

    println!(
        "{} processed {}, succeeded {}, partial {}, failed {}, skipped {} in {:.1?}",
        "Done:".green().bold(),
        summary.processed,
        summary.succeeded,
        summary.partial,
        summary.failed,
        summary.skipped,
        summary.elapsed
    );
    if summary.failed > 0 {
        println!(
            "{} failed instruments will be retried on the next run",
            summary.failed.to_string().yellow()
        );
    }
    Ok(())
}

fn status(config: &HarvestConfig, list_failed: bool) -> Result<()> {
    let store = CheckpointStore::open(&config.checkpoint_path)?;
    let summary = store.summary();
    println!("Checkpoint: {}", config.checkpoint_path.display());
    println!("  {:<8} {}", "done".green(), summary.done);
    println!("  {:<8} {}", "failed".red(), summary.failed);
    println!("  {:<8} {}", "pending".yellow(), summary.pending);

    if list_failed {
        for (id, entry) in store.failed() {
            println!(
                "  {} {} (attempts: {}, last: {})",
                id.bold(),
                entry.detail.as_deref().unwrap_or("-"),
                entry.attempts,
                entry.last_attempt.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

fn validate(config: &HarvestConfig) -> Result<()> {
    let records = read_instruments(&config.input_path, &config.identifier_column)?;
    let report = Orchestrator::validate_output(&OutputSheet::new(&config.output_path), &records)?;

    println!(
        "{} of {} instruments have output rows",
        report.expected - report.missing.len(),
        report.expected
    );
    if !report.missing.is_empty() {
        println!("{} {}", "Missing:".red().bold(), report.missing.join(", "));
    }
    if !report.error_only.is_empty() {
        println!("{} {}", "Only errors:".yellow().bold(), report.error_only.join(", "));
    }
    if !report.is_complete() {
        bail!(
            "{} instruments missing, {} with only error rows",
            report.missing.len(),
            report.error_only.len()
        );
    }
    println!("{}", "Output is complete".green());
    Ok(())
}

fn forget(config: &HarvestConfig, args: ForgetArgs) -> Result<()> {
    let mut store = CheckpointStore::open(&config.checkpoint_path)?;
    let ids: Vec<String> = if args.failed {
        store.failed().map(|(id, _)| id.to_string()).collect()
    } else {
        args.ids
    };
    let removed = store.forget(ids.as_slice())?;
    if removed < ids.len() {
        warn!("{} of the given instruments were not in the checkpoint", ids.len() - removed);
    }
    println!("Forgot {removed} instrument(s)");
    Ok(())
}

async fn check(config: &HarvestConfig) -> Result<()> {
    let endpoint = CdpEndpoint::new(&config.devtools_endpoint);
    if !endpoint.is_available().await {
        bail!(
            "no DevTools endpoint at {}\n\n{}",
            endpoint.base_url(),
            launch_instructions()
        );
    }
    let targets = endpoint.targets().await?;
    println!("{} {}", "Browser reachable at".green(), endpoint.base_url());
    for target in targets.iter().filter(|t| t.kind == "page") {
        println!("  [{}] {} {}", target.id, target.title, target.url.dimmed());
    }

    let portal = Portal::connect(config).await?;
    println!(
        "{} {}",
        "Would harvest from:".bold(),
        portal.current_url().await?
    );
    if let Some(first) = config.layout.menu_path.first() {
        match portal.locator(first.clone()).wait(None).await? {
            Some(_) => println!("{}", "Portal menu found; the session looks logged in".green()),
            None => println!(
                "{}",
                "Portal menu not found; log in and open the portal home page first".yellow()
            ),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_logging(cli.log_file.as_deref())?;
    let config = load_config(cli.config.as_deref(), &cli.overrides)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Status { failed } => status(&config, failed),
        Commands::Validate => validate(&config),
        Commands::Forget(args) => forget(&config, args),
        Commands::Check => check(&config).await,
    }
}
