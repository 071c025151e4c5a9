//! Shardcheck CLI - find unique keys duplicated across Solr shards.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use shardcheck::{CheckOutcome, DuplicateCheck, FileSink, SolrClientFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CONFIG_FILE_NAME};

/// Duplicates printed before the list is cut short.
const MAX_PRINTED_DUPLICATES: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "shardcheck")]
#[command(author, version, about = "Shardcheck - find unique keys duplicated across Solr shards", long_about = None)]
struct Cli {
    /// Core URL of one shard (repeat for every shard)
    #[arg(short = 's', long = "solr-url", value_name = "URL")]
    solr_url: Vec<String>,

    /// Unique key field [default: id]
    #[arg(short = 'k', long = "unique-key", visible_alias = "uk", value_name = "FIELD")]
    unique_key: Option<String>,

    /// Filter query, ANDed with the others (repeatable)
    #[arg(short = 'f', long = "filter", visible_alias = "fq", value_name = "FQ")]
    filter: Vec<String>,

    /// Rows requested per page [default: 25000]
    #[arg(short = 'b', long = "batch-size", value_name = "N")]
    batch_size: Option<usize>,

    /// Basic-auth user
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// Basic-auth password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Talk HTTP/2 instead of HTTP/1.1
    #[arg(short = '2', long)]
    http2: bool,

    /// Directory for the idlist_<n>.txt key dumps [default: .]
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Also write the duplicate report as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Config file (default: shardcheck.toml in this or a parent directory)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Flags given on the command line win over the config file.
    fn apply(&self, config: &mut Config) {
        if !self.solr_url.is_empty() {
            config.shards.urls = self.solr_url.clone();
        }
        if let Some(ref unique_key) = self.unique_key {
            config.check.unique_key = unique_key.clone();
        }
        if !self.filter.is_empty() {
            config.check.filters = self.filter.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.check.batch_size = batch_size;
        }
        if self.http2 {
            config.connection.http2 = true;
        }
        if self.user.is_some() {
            config.connection.user = self.user.clone();
        }
        if self.password.is_some() {
            config.connection.password = self.password.clone();
        }
        if let Some(ref dir) = self.output_dir {
            config.output.dir = dir.clone();
        }
        if self.report.is_some() {
            config.output.report = self.report.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match cli.config.as_deref() {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);

    if config.shards.urls.is_empty() {
        bail!(
            "No shard to check. Pass {} or list [shards] urls in {}",
            "--solr-url".cyan(),
            CONFIG_FILE_NAME
        );
    }

    let rt = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    rt.block_on(check(config))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,shardcheck=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("Warning: Failed to set up logging: {}", e);
    }
}

async fn check(config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping shard scans");
            token.cancel();
        }
    });

    let factory =
        SolrClientFactory::new(config.http_version()).with_credentials(config.credentials());
    let sink = FileSink::new(config.output.dir.clone()).with_report(config.output.report.clone());
    let check = DuplicateCheck::new(config.check_options(), Arc::new(factory), Arc::new(sink));

    println!(
        "{} Checking {} shards for duplicate {} values ({})...",
        "→".blue(),
        config.shards.urls.len().to_string().cyan(),
        config.check.unique_key.cyan(),
        config.http_version()
    );

    let started = Instant::now();
    let outcome = check
        .run_with_cancel(config.shards.urls.as_slice(), &cancel)
        .await
        .context("Duplicate check failed")?;

    print_summary(&outcome, &config, started.elapsed());
    Ok(())
}

fn print_summary(outcome: &CheckOutcome, config: &Config, elapsed: Duration) {
    println!();
    println!(
        "{} Scanned {} shards in {:.2?}",
        "✓".green().bold(),
        outcome.shards.len(),
        elapsed
    );
    for scan in &outcome.shards {
        println!(
            "  {}: {} keys, {} requests, avg {:?}",
            scan.core_name.cyan(),
            scan.key_set.len().to_string().yellow(),
            scan.stats.request_count,
            scan.stats.average_latency
        );
    }
    println!(
        "  Key lists written to {}",
        config.output.dir.display().to_string().cyan()
    );
    if let Some(ref report) = config.output.report {
        println!("  Report written to {}", report.display().to_string().cyan());
    }

    println!();
    let summary = &outcome.summary;
    if summary.is_empty() {
        println!("{} No duplicated keys", "✓".green().bold());
        return;
    }

    println!(
        "{} {} duplicated keys",
        "!".red().bold(),
        summary.total.to_string().red().bold()
    );
    for record in summary.records().take(MAX_PRINTED_DUPLICATES) {
        println!("  {}: {}", record.key.yellow(), record.shards.join(", "));
    }
    if summary.total > MAX_PRINTED_DUPLICATES {
        println!("  ... and {} more", summary.total - MAX_PRINTED_DUPLICATES);
    }
}
