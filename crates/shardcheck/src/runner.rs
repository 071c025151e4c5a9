//! Check orchestration.
//!
//! Fans out one [`ShardScanner`] per configured core, runs them all in
//! parallel on the tokio runtime, and waits for every one of them to reach
//! a terminal state before anything reads their key sets.
//!
//! # Flow
//!
//! 1. **Resolve**: validate options and parse every shard URL
//! 2. **Register**: key endpoints by core name in a fresh [`RunContext`]
//! 3. **Scan**: spawn one task per scanner, then join them all
//! 4. **Persist**: hand each collected key set to the sink
//! 5. **Correlate**: on a clean run, detect duplicates and emit the report

use crate::client::ClientFactory;
use crate::context::RunContext;
use crate::detector::find_duplicates;
use crate::endpoint::resolve_all;
use crate::scanner::ShardScanner;
use crate::sink::ResultSink;
use crate::types::*;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Result of a clean check run.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// Every shard scan, in scan order.
    pub shards: Vec<ShardScan>,
    /// Duplicates across shards.
    pub summary: DuplicateSummary,
}

impl CheckOutcome {
    /// `(core name, key set)` pairs in scan order.
    pub fn key_sets(&self) -> impl Iterator<Item = (&str, &HashSet<String>)> {
        self.shards
            .iter()
            .map(|scan| (scan.core_name.as_str(), &scan.key_set))
    }

    /// Total keys read across all shards.
    pub fn total_keys(&self) -> usize {
        self.shards.iter().map(|scan| scan.key_set.len()).sum()
    }
}

/// A configured duplicate check, reusable across runs.
///
/// # Example
///
/// ```rust,ignore
/// use shardcheck::{DuplicateCheck, FileSink, SolrClientFactory};
///
/// let check = DuplicateCheck::new(
///     CheckOptions::default(),
///     Arc::new(SolrClientFactory::new(HttpVersion::Http1)),
///     Arc::new(FileSink::new(".")),
/// );
///
/// let outcome = check
///     .run(&["http://solr1:8983/solr/core1", "http://solr2:8983/solr/core2"])
///     .await?;
/// println!("{} duplicated keys", outcome.summary.total);
/// ```
pub struct DuplicateCheck {
    options: CheckOptions,
    factory: Arc<dyn ClientFactory>,
    sink: Arc<dyn ResultSink>,
}

impl DuplicateCheck {
    /// Create a check with the given options, client factory and sink.
    pub fn new(
        options: CheckOptions,
        factory: Arc<dyn ClientFactory>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            options,
            factory,
            sink,
        }
    }

    /// Options applied to every shard.
    pub fn options(&self) -> &CheckOptions {
        &self.options
    }

    /// Run the check over the given core URLs.
    pub async fn run<S: AsRef<str>>(&self, addresses: &[S]) -> CheckResult<CheckOutcome> {
        self.run_with_cancel(addresses, &CancellationToken::new())
            .await
    }

    /// Run the check, stopping early if `cancel` is cancelled.
    pub async fn run_with_cancel<S: AsRef<str>>(
        &self,
        addresses: &[S],
        cancel: &CancellationToken,
    ) -> CheckResult<CheckOutcome> {
        run_check(
            addresses,
            &self.options,
            self.factory.as_ref(),
            self.sink.as_ref(),
            cancel,
        )
        .await
    }
}

/// Scan every shard and report keys held by more than one of them.
///
/// # Errors
///
/// * `CheckError::Config` - bad options or shard URL, or a client could
///   not be built. No scan has started.
/// * `CheckError::ShardFailed` - a page request failed. Sibling scans were
///   cancelled and no duplicate report was produced.
/// * `CheckError::WorkerPanicked` - a scan task panicked. Sibling scans were
///   cancelled.
/// * `CheckError::Cancelled` - `cancel` fired before every scan finished.
pub async fn run_check<S: AsRef<str>>(
    addresses: &[S],
    options: &CheckOptions,
    factory: &dyn ClientFactory,
    sink: &dyn ResultSink,
    cancel: &CancellationToken,
) -> CheckResult<CheckOutcome> {
    options.validate()?;
    let endpoints = resolve_all(addresses)?;

    let mut ctx = RunContext::with_parent(cancel);
    for endpoint in endpoints {
        ctx.register(endpoint);
    }

    info!(
        shards = ctx.shard_count(),
        unique_key = %options.unique_key,
        batch_size = options.batch_size,
        "Starting duplicate check"
    );
    for filter in &options.filters {
        info!(filter = %filter, "Filter added");
    }

    // Every client is built before any scan starts.
    let mut scanners = Vec::with_capacity(ctx.shard_count());
    for endpoint in ctx.shards() {
        let client = factory.connect(endpoint)?;
        scanners.push(ShardScanner::new(
            endpoint.core_name.clone(),
            options,
            client,
            ctx.cancel_token(),
        ));
    }

    let (cores, handles): (Vec<String>, Vec<_>) = scanners
        .into_iter()
        .map(|scanner| {
            let core = scanner.core_name().to_string();
            (core, tokio::spawn(scanner.run()))
        })
        .unzip();

    // A panicked scan stops its siblings the same way a failed one does.
    let watched = handles.into_iter().map(|handle| {
        let cancel = ctx.cancel_token();
        async move {
            let result = handle.await;
            if result.is_err() {
                cancel.cancel();
            }
            result
        }
    });
    let joined = join_all(watched).await;
    let results: Vec<(String, Result<ShardScan, JoinError>)> =
        cores.into_iter().zip(joined).collect();

    let clean = results
        .iter()
        .all(|(_, r)| matches!(r, Ok(scan) if scan.state == ScanState::Completed));

    persist_key_sets(&results, clean, sink);

    let mut scans = Vec::with_capacity(results.len());
    for (core, result) in results {
        match result {
            Ok(scan) => scans.push(scan),
            Err(e) => {
                error!(core = %core, error = %e, "Scan task did not finish");
                return Err(CheckError::WorkerPanicked { core });
            }
        }
    }

    if let Some(failed) = scans.iter().find(|s| s.state == ScanState::Failed) {
        let source = failed.error.clone().unwrap_or_else(|| {
            ScanError::Transport("scan failed without a recorded error".to_string())
        });
        error!(core = %failed.core_name, error = %source, "Duplicate check aborted");
        return Err(CheckError::ShardFailed {
            core: failed.core_name.clone(),
            source,
        });
    }
    if !clean {
        warn!("Duplicate check cancelled before all shards were scanned");
        return Err(CheckError::Cancelled);
    }

    let pairs: Vec<(&str, &HashSet<String>)> = scans
        .iter()
        .map(|scan| (scan.core_name.as_str(), &scan.key_set))
        .collect();
    let summary = find_duplicates(&pairs);

    if let Err(e) = sink.emit_report(&summary) {
        error!(error = %e, "Failed to emit duplicate report");
    }

    Ok(CheckOutcome {
        shards: scans,
        summary,
    })
}

/// Hand key sets to the sink, best effort.
///
/// On a clean run every shard is persisted; otherwise only shards that
/// collected at least one key.
fn persist_key_sets(
    results: &[(String, Result<ShardScan, JoinError>)],
    clean: bool,
    sink: &dyn ResultSink,
) {
    for (index, (core, result)) in results.iter().enumerate() {
        let Ok(scan) = result else {
            continue;
        };
        if !clean && scan.key_set.is_empty() {
            continue;
        }
        if let Err(e) = sink.persist_key_set(index, core, &scan.key_set) {
            error!(core = %core, index, error = %e, "Error writing key list");
        }
    }
}
