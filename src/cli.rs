//! Command line interface

use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::config::{self, ResolverConfig};
use crate::logging::LogFormat;
use crate::tags::bulk::{BulkOutcome, Statistics, resolve_all};
use crate::tags::filter::FilterPolicy;
use crate::tags::registries::create_default_clients;
use crate::tags::resolver::{HistoricalResolver, Resolution, ResolutionResult, ResolveRequest};
use crate::tags::types::{RegistryKind, Repository, Tag, TimeOffset};

#[derive(Debug, Parser)]
#[command(name = "tag-history")]
#[command(
    version,
    about = "Resolve which container image tag was current at points in the past"
)]
pub struct Cli {
    /// Log record format
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Human)]
    pub log_format: LogFormat,

    /// Write logs to a file instead of stderr (default location when no path is given)
    #[arg(long, global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Minimum interval between requests to one registry, for every registry
    #[arg(long, global = true)]
    pub rate_limit_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.log_file
            .clone()
            .map(|path| path.unwrap_or_else(config::log_path))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the tags of a repository in candidate order
    ListTags(ListTagsArgs),
    /// Find the tags that were current at the given periods
    FindHistorical(FindHistoricalArgs),
    /// Resolve every target of a configuration file
    Resolve(ResolveArgs),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Args)]
pub struct RepositoryArgs {
    /// Repository name (e.g. python, dotnet/runtime)
    pub repository: String,

    /// Registry to query (docker_hub, mcr, chainguard)
    #[arg(long, default_value = "docker_hub")]
    pub registry: RegistryKind,

    /// Repository namespace
    #[arg(long)]
    pub namespace: Option<String>,

    /// Regular expression tag names must match
    #[arg(long)]
    pub pattern: Option<String>,
}

impl RepositoryArgs {
    fn repository(&self) -> Repository {
        let repository = Repository::new(self.registry, &self.repository);
        match &self.namespace {
            Some(ns) => repository.with_namespace(ns),
            None => repository,
        }
    }
}

#[derive(Debug, Args)]
pub struct ListTagsArgs {
    #[command(flatten)]
    pub target: RepositoryArgs,

    /// Only show semantic version tags
    #[arg(long)]
    pub only_semver: bool,

    /// Exclude dev, preview and floating tags
    #[arg(long)]
    pub exclude_dev: bool,

    /// Stop listing after this many tags
    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct FindHistoricalArgs {
    #[command(flatten)]
    pub target: RepositoryArgs,

    /// Also consider dev, preview and floating tags
    #[arg(long)]
    pub include_dev: bool,

    /// Also consider tags that are not semantic versions
    #[arg(long)]
    pub all_tags: bool,

    /// JSON array of periods, e.g. [{"name":"current","offset_days":0}]
    #[arg(long)]
    pub periods: Option<Periods>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Configuration file (JSON)
    #[arg(long)]
    pub config: PathBuf,

    /// Write the report to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// Periods given on the command line as a JSON array
#[derive(Debug, Clone, PartialEq)]
pub struct Periods(pub Vec<TimeOffset>);

impl FromStr for Periods {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
            .map(Periods)
            .map_err(|e| format!("invalid periods JSON: {e}"))
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::ListTags(args) => list_tags(args, cli.rate_limit_ms).await,
        Command::FindHistorical(args) => find_historical(args, cli.rate_limit_ms).await,
        Command::Resolve(args) => resolve(args, cli.rate_limit_ms).await,
    }
}

fn build_resolver(config: &ResolverConfig) -> HistoricalResolver {
    HistoricalResolver::new(create_default_clients(config))
        .with_missing_timestamps(config.missing_timestamps)
}

fn with_rate_limit(mut config: ResolverConfig, rate_limit_ms: Option<u64>) -> ResolverConfig {
    if let Some(interval_ms) = rate_limit_ms {
        config.registries.override_min_interval_ms(interval_ms);
    }
    config
}

async fn list_tags(args: ListTagsArgs, rate_limit_ms: Option<u64>) -> anyhow::Result<()> {
    let config = with_rate_limit(ResolverConfig::default(), rate_limit_ms);
    let repository = args.target.repository();
    let policy = FilterPolicy {
        only_semver: args.only_semver,
        exclude_dev: args.exclude_dev,
        name_pattern: args.target.pattern.clone(),
    };

    info!("Fetching tags for {}", repository);
    let tags = build_resolver(&config)
        .candidates(&repository, &policy, args.limit)
        .await?;

    let mut out = io::stdout().lock();
    match args.format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&tags)?)?,
        OutputFormat::Table => write_tags_table(&mut out, &tags)?,
    }
    Ok(())
}

async fn find_historical(args: FindHistoricalArgs, rate_limit_ms: Option<u64>) -> anyhow::Result<()> {
    let config = with_rate_limit(ResolverConfig::default(), rate_limit_ms);
    let periods = args
        .periods
        .map(|p| p.0)
        .unwrap_or_else(config::default_periods);
    let request = ResolveRequest::new(args.target.repository(), periods).with_filter(FilterPolicy {
        only_semver: !args.all_tags,
        exclude_dev: !args.include_dev,
        name_pattern: args.target.pattern.clone(),
    });

    let result = build_resolver(&config).resolve(&request).await?;

    let mut out = io::stdout().lock();
    match args.format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&result)?)?,
        OutputFormat::Table => write_resolution_table(&mut out, &result)?,
    }
    Ok(())
}

async fn resolve(args: ResolveArgs, rate_limit_ms: Option<u64>) -> anyhow::Result<()> {
    let config = with_rate_limit(ResolverConfig::load(&args.config)?, rate_limit_ms);
    let requests = config.requests();

    let outcome = resolve_all(&build_resolver(&config), requests, config.workers).await;
    let report = BulkReport::new(&outcome, Utc::now());
    info!(
        "Resolved {}/{} repositories ({} failed)",
        report.statistics.resolved, report.statistics.total, report.statistics.failed
    );

    let json = serde_json::to_string_pretty(&report)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, json + "\n")?;
            info!("Wrote report to {}", path.display());
        }
        None => writeln!(io::stdout().lock(), "{}", json)?,
    }
    Ok(())
}

/// Outcome of one repository in a bulk report
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetReport {
    Ok { offsets: IndexMap<String, Resolution> },
    Error { error: String },
}

/// JSON report of a bulk resolution
#[derive(Debug, Serialize)]
pub struct BulkReport {
    pub generated_at: DateTime<Utc>,
    pub statistics: Statistics,
    pub results: IndexMap<String, TargetReport>,
}

impl BulkReport {
    pub fn new(outcome: &BulkOutcome, generated_at: DateTime<Utc>) -> Self {
        let results = outcome
            .iter()
            .map(|(repository, result)| {
                let report = match result {
                    Ok(resolution) => TargetReport::Ok {
                        offsets: resolution.offsets.clone(),
                    },
                    Err(e) => TargetReport::Error {
                        error: e.to_string(),
                    },
                };
                (repository.to_string(), report)
            })
            .collect();

        Self {
            generated_at,
            statistics: Statistics::from_outcome(outcome),
            results,
        }
    }
}

fn format_created(tag: &Tag) -> String {
    tag.created_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

fn write_tags_table(out: &mut impl Write, tags: &[Tag]) -> io::Result<()> {
    writeln!(out, "{:<30} {:<27} {:>12}  DIGEST", "TAG", "CREATED", "SIZE")?;
    for tag in tags {
        writeln!(
            out,
            "{:<30} {:<27} {:>12}  {}",
            tag.name,
            format_created(tag),
            tag.size_bytes.map_or_else(|| "-".to_string(), |s| s.to_string()),
            tag.digest.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

fn write_resolution_table(out: &mut impl Write, result: &ResolutionResult) -> io::Result<()> {
    writeln!(out, "{:<20} {:<30} {:<30}", "PERIOD", "TAG", "CREATED")?;
    writeln!(out, "{}", "-".repeat(80))?;
    for (label, resolution) in &result.offsets {
        let (name, created) = match resolution {
            Resolution::Found(tag) => (tag.name.clone(), format_created(tag)),
            Resolution::Substituted(tag) => (format!("{} (current)", tag.name), format_created(tag)),
            Resolution::Absent => ("not found".to_string(), "-".to_string()),
        };
        writeln!(out, "{:<20} {:<30} {:<30}", label, name, created)?;
    }
    Ok(())
}
