//! End-to-end tests for the duplicate check.
//!
//! Runs the full orchestrator against in-process scripted shard clients:
//! parallel scans, the join barrier, cooperative cancellation, artifact
//! persistence and the final correlation.

use async_trait::async_trait;
use shardcheck::client::{ClientFactory, ShardClient};
use shardcheck::endpoint::ShardEndpoint;
use shardcheck::runner::run_check;
use shardcheck::sink::{read_key_set, FileSink, MemorySink};
use shardcheck::types::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Upper bound for any single run; a hung barrier fails the test instead.
const RUN_TIMEOUT: Duration = Duration::from_secs(10);

enum Behavior {
    /// Replay these pages, then report the cursor as exhausted.
    Scripted(Mutex<VecDeque<ScanResult<Page>>>),
    /// Never run out of keys.
    Endless,
    /// Panic on the first request.
    Panics,
}

struct MockClient {
    core: String,
    behavior: Behavior,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ShardClient for MockClient {
    async fn fetch_page(&self, request: &PageRequest) -> ScanResult<Page> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Scripted(pages) => pages.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(Page {
                    keys: vec![],
                    next_cursor: request.cursor.clone(),
                    num_found: None,
                })
            }),
            Behavior::Endless => Ok(Page {
                keys: vec![format!("{}-{}", self.core, n)],
                next_cursor: format!("c{}", n + 1),
                num_found: None,
            }),
            Behavior::Panics => panic!("client for {} blew up", self.core),
        }
    }
}

/// Hands out one scripted client per core name.
#[derive(Default)]
struct MockFactory {
    shards: Mutex<HashMap<String, (Behavior, Duration)>>,
    connects: AtomicUsize,
    calls: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl MockFactory {
    fn shard(self, core: &str, behavior: Behavior, delay: Duration) -> Self {
        self.shards
            .lock()
            .unwrap()
            .insert(core.to_string(), (behavior, delay));
        self
    }

    fn calls(&self, core: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(core)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl ClientFactory for MockFactory {
    fn connect(&self, endpoint: &ShardEndpoint) -> CheckResult<Box<dyn ShardClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (behavior, delay) = self
            .shards
            .lock()
            .unwrap()
            .remove(&endpoint.core_name)
            .ok_or_else(|| CheckError::Config(format!("no script for {}", endpoint.core_name)))?;
        let calls = Arc::new(AtomicUsize::new(0));
        self.calls
            .lock()
            .unwrap()
            .insert(endpoint.core_name.clone(), calls.clone());
        Ok(Box::new(MockClient {
            core: endpoint.core_name.clone(),
            behavior,
            delay,
            calls,
        }))
    }
}

/// Pages of keys with cursors c1, c2, ... followed by the exhausted page.
fn pages(batches: &[&[&str]]) -> Behavior {
    let pages: VecDeque<ScanResult<Page>> = batches
        .iter()
        .enumerate()
        .map(|(i, keys)| {
            Ok(Page {
                keys: keys.iter().map(|k| k.to_string()).collect(),
                next_cursor: format!("c{}", i + 1),
                num_found: None,
            })
        })
        .collect();
    Behavior::Scripted(Mutex::new(pages))
}

fn failing_after(batches: &[&[&str]], error: ScanError) -> Behavior {
    let Behavior::Scripted(script) = pages(batches) else {
        unreachable!()
    };
    script.lock().unwrap().push_back(Err(error));
    Behavior::Scripted(script)
}

fn set(keys: &[&str]) -> HashSet<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn url(core: &str) -> String {
    format!("http://127.0.0.1:8983/solr/{}", core)
}

fn options() -> CheckOptions {
    CheckOptions {
        batch_size: 2,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clean_run_reports_duplicates() {
    let factory = MockFactory::default()
        .shard("alpha", pages(&[&["1", "2"], &["3"]]), Duration::ZERO)
        .shard("beta", pages(&[&["3", "4"]]), Duration::ZERO)
        .shard("gamma", pages(&[&["1", "5"], &["9"]]), Duration::ZERO);
    let sink = MemorySink::new();

    // Configured out of order; scan order is by core name.
    let addresses = [url("gamma"), url("alpha"), url("beta")];
    let outcome = tokio::time::timeout(
        RUN_TIMEOUT,
        run_check(&addresses, &options(), &factory, &sink, &CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    let names: Vec<_> = outcome.key_sets().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert!(outcome
        .shards
        .iter()
        .all(|s| s.state == ScanState::Completed));
    assert_eq!(outcome.total_keys(), 3 + 2 + 3);

    let expected = BTreeMap::from([
        ("1".to_string(), vec!["alpha".to_string(), "gamma".to_string()]),
        ("3".to_string(), vec!["alpha".to_string(), "beta".to_string()]),
    ]);
    assert_eq!(outcome.summary.duplicates, expected);
    assert_eq!(outcome.summary.total, 2);

    assert_eq!(sink.report(), Some(outcome.summary.clone()));
    assert_eq!(sink.key_set_count(), 3);
    assert_eq!(sink.key_set(0).unwrap(), ("alpha".to_string(), set(&["1", "2", "3"])));
    assert_eq!(sink.key_set(2).unwrap().0, "gamma");

    // Two pages of keys plus the page that repeated the cursor.
    assert_eq!(factory.calls("alpha"), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clean_run_without_duplicates_still_reports() {
    let factory = MockFactory::default()
        .shard("a", pages(&[&["1"]]), Duration::ZERO)
        .shard("b", pages(&[&["2"]]), Duration::ZERO);
    let sink = MemorySink::new();

    let outcome = run_check(
        &[url("a"), url("b")],
        &options(),
        &factory,
        &sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(outcome.summary.is_empty());
    assert_eq!(sink.report(), Some(DuplicateSummary::default()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_cancels_siblings() {
    let factory = MockFactory::default()
        .shard(
            "a_failing",
            failing_after(
                &[&["k1", "k2"]],
                ScanError::RemoteQuery {
                    status: 500,
                    message: "boom".to_string(),
                },
            ),
            Duration::from_millis(50),
        )
        .shard("b_endless", Behavior::Endless, Duration::from_millis(2));
    let sink = MemorySink::new();

    let result = tokio::time::timeout(
        RUN_TIMEOUT,
        run_check(
            &[url("a_failing"), url("b_endless")],
            &options(),
            &factory,
            &sink,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("endless scan was not cancelled");

    match result {
        Err(CheckError::ShardFailed { core, source }) => {
            assert_eq!(core, "a_failing");
            assert_eq!(
                source,
                ScanError::RemoteQuery {
                    status: 500,
                    message: "boom".to_string()
                }
            );
        }
        other => panic!("expected ShardFailed, got {:?}", other),
    }

    // No duplicate report on a failed run, partial key sets still persisted.
    assert!(sink.report().is_none());
    assert_eq!(sink.key_set(0).unwrap(), ("a_failing".to_string(), set(&["k1", "k2"])));
    let (core, partial) = sink.key_set(1).unwrap();
    assert_eq!(core, "b_endless");
    assert!(!partial.is_empty());
    assert!(factory.calls("b_endless") > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicked_scan_cancels_siblings() {
    let factory = MockFactory::default()
        .shard("a_panicking", Behavior::Panics, Duration::from_millis(20))
        .shard("b_endless", Behavior::Endless, Duration::from_millis(2));
    let sink = MemorySink::new();

    let result = tokio::time::timeout(
        RUN_TIMEOUT,
        run_check(
            &[url("a_panicking"), url("b_endless")],
            &options(),
            &factory,
            &sink,
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("endless scan was not cancelled after a panic");

    assert_eq!(
        result.unwrap_err(),
        CheckError::WorkerPanicked {
            core: "a_panicking".to_string()
        }
    );
    assert!(sink.report().is_none());
    assert!(factory.calls("b_endless") > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_external_cancellation() {
    let factory = MockFactory::default()
        .shard("a", Behavior::Endless, Duration::from_millis(2))
        .shard("b", Behavior::Endless, Duration::from_millis(2));
    let sink = MemorySink::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        RUN_TIMEOUT,
        run_check(&[url("a"), url("b")], &options(), &factory, &sink, &cancel),
    )
    .await
    .unwrap();

    assert_eq!(result.unwrap_err(), CheckError::Cancelled);
    assert!(sink.report().is_none());
}

#[tokio::test]
async fn test_config_errors_start_no_scan() {
    let factory = MockFactory::default().shard("a", pages(&[&["1"]]), Duration::ZERO);
    let sink = MemorySink::new();
    let cancel = CancellationToken::new();

    let result = run_check(
        &[url("a"), "http://127.0.0.1:8983/".to_string()],
        &options(),
        &factory,
        &sink,
        &cancel,
    )
    .await;
    assert!(matches!(result, Err(CheckError::Config(_))));

    let empty: [&str; 0] = [];
    let result = run_check(&empty, &options(), &factory, &sink, &cancel).await;
    assert!(matches!(result, Err(CheckError::Config(_))));

    let bad_batch = CheckOptions {
        batch_size: 0,
        ..Default::default()
    };
    let result = run_check(&[url("a")], &bad_batch, &factory, &sink, &cancel).await;
    assert!(matches!(result, Err(CheckError::Config(_))));

    assert_eq!(factory.connects.load(Ordering::SeqCst), 0);
    assert_eq!(sink.key_set_count(), 0);
}

#[tokio::test]
async fn test_colliding_core_names_scan_once() {
    let factory = MockFactory::default().shard("core1", pages(&[&["1"]]), Duration::ZERO);
    let sink = MemorySink::new();

    let outcome = run_check(
        &[
            "http://host-a:8983/solr/core1",
            "http://host-b:8983/solr/core1/",
        ],
        &options(),
        &factory,
        &sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.shards.len(), 1);
    assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_artifacts_match_correlated_sets() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("report.json");
    let sink = FileSink::new(dir.path()).with_report(Some(report.clone()));
    let factory = MockFactory::default()
        .shard("s1", pages(&[&["a", "b"], &["c"]]), Duration::ZERO)
        .shard("s2", pages(&[&["c", "d"]]), Duration::ZERO);

    let outcome = run_check(
        &[url("s1"), url("s2")],
        &options(),
        &factory,
        &sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    for (index, (_, keys)) in outcome.key_sets().enumerate() {
        let from_disk = read_key_set(&sink.key_set_path(index)).unwrap();
        assert_eq!(from_disk.len(), keys.len());
        assert_eq!(&from_disk, keys);
    }

    let written: DuplicateSummary =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(written, outcome.summary);
    assert_eq!(written.duplicates["c"], vec!["s1", "s2"]);
}
