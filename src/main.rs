mod config;
mod interchange;
mod pr;
mod report;
mod stats;

use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, info_span, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::interchange::PrDataset;
use crate::pr::filter::LabelFilter;
use crate::pr::fetch::FetchSummary;
use crate::pr::github::GitHubClient;
use crate::pr::{FetchOptions, Fetcher, NormalizedPullRequest, StateFilter};
use crate::stats::{AggregateOptions, Aggregator};

type BoxError = Box<dyn std::error::Error>;

/// PR Stats: fetches GitHub Pull Requests and aggregates them into
/// monthly productivity statistics (merge counts, time to merge, PR size,
/// contributors).
#[derive(Parser, Debug)]
#[command(name = "pr-stats", version, about)]
struct Cli {
    /// Config file (defaults to .pr-stats.toml in the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch PR data from GitHub into a JSON dataset
    Fetch(FetchArgs),
    /// Compute monthly statistics from a previously fetched dataset
    Analyze(AnalyzeArgs),
    /// Fetch and analyze in one go
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct FetchFlags {
    /// Repository in format "owner/repo"
    #[arg(long)]
    repo: String,

    /// Only include PRs carrying this label
    #[arg(long)]
    label: Option<String>,

    /// Label to exclude (repeatable, default: dependencies)
    #[arg(long = "exclude-label")]
    exclude_labels: Vec<String>,

    /// Exclude nothing, overriding the default exclusion
    #[arg(long, conflicts_with = "exclude_labels")]
    no_exclude: bool,

    /// Skip diff statistics (additions, deletions, changed files)
    #[arg(long)]
    no_diff: bool,

    /// Fetch diff statistics even when the config file disables them
    #[arg(long, conflicts_with = "no_diff")]
    diff: bool,

    /// Maximum number of PRs to fetch (default: 10000)
    #[arg(long)]
    limit: Option<usize>,

    /// PR state to fetch (default: merged)
    #[arg(long, value_enum)]
    state: Option<StateFilter>,

    /// Overall timeout for remote calls in seconds (default: 600)
    #[arg(long)]
    timeout: Option<u64>,

    /// Concurrent diff requests (default: 8)
    #[arg(long)]
    concurrency: Option<usize>,
}

#[derive(Args, Debug)]
struct WindowFlags {
    /// Keep PRs created on or after this date (YYYY-MM-DD)
    #[arg(long)]
    cutoff_date: Option<NaiveDate>,

    /// Keep PRs created on or before this date (YYYY-MM-DD)
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// UTC offset in hours for dates and months. Defaults to 0 (UTC), not JST;
    /// pass 9 to bucket by Japan Standard Time
    #[arg(long, allow_negative_numbers = true)]
    timezone: Option<i32>,

    /// Also write a markdown report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Analyze a dataset from an incomplete fetch; outputs are marked .partial
    #[arg(long)]
    allow_partial: bool,
}

#[derive(Args, Debug)]
struct FetchArgs {
    #[command(flatten)]
    fetch: FetchFlags,

    /// Output JSON file (default: pr_data_with_diff.json, or pr_data_raw.json without diff stats)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Dataset written by `fetch`
    #[arg(short, long)]
    input: PathBuf,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(flatten)]
    window: WindowFlags,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    fetch: FetchFlags,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(flatten)]
    window: WindowFlags,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Fetch(args) => {
            let options = fetch_options(&config, &args.fetch);
            let output = args
                .output
                .unwrap_or_else(|| PathBuf::from(default_dataset_name(&options)));
            let fetched = fetch(&config, &args.fetch.repo, options, &output).await?;
            if !fetched.dataset.complete {
                return Err(incomplete_error(&fetched));
            }
            println!("✓ Success! Data saved to: {}", output.display());
        }
        Command::Analyze(args) => {
            info!(input = %args.input.display(), "loading dataset");
            let dataset = interchange::read_dataset(&args.input)?;
            analyze(&config, &dataset, &args.output_dir, &args.window)?;
        }
        Command::Run(args) => {
            std::fs::create_dir_all(&args.output_dir)?;
            let options = fetch_options(&config, &args.fetch);
            let output = args.output_dir.join(default_dataset_name(&options));
            let fetched = fetch(&config, &args.fetch.repo, options, &output).await?;
            if !fetched.dataset.complete && !args.window.allow_partial {
                return Err(incomplete_error(&fetched));
            }
            analyze(&config, &fetched.dataset, &args.output_dir, &args.window)?;
        }
    }

    Ok(())
}

struct Fetched {
    dataset: PrDataset,
    summary: FetchSummary,
    path: PathBuf,
}

fn default_dataset_name(options: &FetchOptions) -> &'static str {
    if options.include_diff_stats {
        "pr_data_with_diff.json"
    } else {
        "pr_data_raw.json"
    }
}

/// CLI flags layered over the config file and built-in defaults.
fn fetch_options(config: &Config, flags: &FetchFlags) -> FetchOptions {
    let base = config.fetch_options();
    let excluded: Vec<String> = if flags.no_exclude {
        Vec::new()
    } else if !flags.exclude_labels.is_empty() {
        flags.exclude_labels.clone()
    } else {
        base.labels.excluded().map(str::to_string).collect()
    };

    FetchOptions {
        labels: LabelFilter::new(flags.label.clone(), excluded),
        include_diff_stats: (base.include_diff_stats || flags.diff) && !flags.no_diff,
        limit: flags.limit.unwrap_or(base.limit),
        state: flags.state.unwrap_or(base.state),
        timeout: flags.timeout.map(Duration::from_secs).unwrap_or(base.timeout),
        diff_concurrency: flags.concurrency.unwrap_or(base.diff_concurrency),
        page_size: base.page_size,
    }
}

fn aggregate_options(config: &Config, window: &WindowFlags) -> Result<AggregateOptions, BoxError> {
    let mut options = config.aggregate_options()?;
    if let Some(hours) = window.timezone {
        options.utc_offset = config::utc_offset(hours)?;
    }
    options.cutoff_date = window.cutoff_date;
    options.end_date = window.end_date;
    if let (Some(cutoff), Some(end)) = (options.cutoff_date, options.end_date) {
        if cutoff > end {
            return Err(format!("cutoff date {} is after end date {}", cutoff, end).into());
        }
    }
    Ok(options)
}

/// Fetch, report and persist. The dataset is written even when incomplete.
#[instrument(skip_all, fields(repo = %repo_name))]
async fn fetch(
    config: &Config,
    repo_name: &str,
    options: FetchOptions,
    output: &Path,
) -> Result<Fetched, BoxError> {
    let repo = pr::parse_repo(repo_name)?;
    info!(
        state = %options.state,
        limit = options.limit,
        label = ?options.labels.required(),
        excluded = ?options.labels.excluded().collect::<Vec<_>>(),
        diff = options.include_diff_stats,
        "fetching pull requests from GitHub"
    );

    let token = config.github_token().ok_or(pr::PrError::MissingToken)?;
    let client = GitHubClient::new(config.api_url(), token);
    let outcome = Fetcher::new(&client, options).fetch(&repo).await;
    report::print_fetch_summary(&repo, &outcome);

    let dataset = PrDataset::from_outcome(&repo, &outcome, Utc::now());
    interchange::write_dataset(output, &dataset)?;
    info!(path = %output.display(), records = dataset.pull_requests.len(), complete = dataset.complete, "saved dataset");

    Ok(Fetched {
        dataset,
        summary: *outcome.summary(),
        path: output.to_path_buf(),
    })
}

fn incomplete_error(fetched: &Fetched) -> BoxError {
    format!(
        "fetch of {} incomplete: {}; {} records seen, {} normalized; partial data saved to {}",
        fetched.dataset.repository,
        fetched.dataset.interruption.as_deref().unwrap_or("unknown reason"),
        fetched.summary.seen,
        fetched.dataset.pull_requests.len(),
        fetched.path.display()
    )
    .into()
}

fn analyze(
    config: &Config,
    dataset: &PrDataset,
    output_dir: &Path,
    window: &WindowFlags,
) -> Result<(), BoxError> {
    let _span = info_span!("analyze", repo = %dataset.repository).entered();

    let partial = !dataset.complete;
    if partial {
        let reason = dataset.interruption.as_deref().unwrap_or("unknown reason");
        if !window.allow_partial {
            return Err(format!(
                "dataset for {} is incomplete ({}); rerun the fetch or pass --allow-partial",
                dataset.repository, reason
            )
            .into());
        }
        warn!(reason, "analyzing an incomplete dataset, outputs will be marked partial");
    }

    let aggregator = Aggregator::new(aggregate_options(config, window)?);
    let details: Vec<&NormalizedPullRequest> = aggregator.filter(&dataset.pull_requests);
    info!(
        loaded = dataset.pull_requests.len(),
        in_window = details.len(),
        cutoff = ?aggregator.options().cutoff_date,
        end = ?aggregator.options().end_date,
        "filtered pull requests"
    );

    let monthly = aggregator.aggregate(&dataset.pull_requests);
    info!(months = monthly.len(), "calculated monthly statistics");

    let files = interchange::save_statistics(output_dir, &monthly, &details, partial)?;
    println!("✓ Saved statistics:");
    for path in files.all() {
        println!("  - {}", path.display());
    }

    let built = report::build(monthly, details.len(), Some(dataset.repository.clone()), partial);
    report::output(&built, None)?;
    if let Some(path) = &window.report {
        report::output(&built, Some(path))?;
        println!("✓ Report written to: {}", path.display());
    }
    Ok(())
}
