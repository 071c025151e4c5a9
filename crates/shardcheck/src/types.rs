//! Core types for the cross-shard unique key check.
//!
//! This module defines the data structures shared across the crate:
//! run options, per-scan state and statistics, page requests/responses
//! exchanged with a shard, the duplicate summary, and the error types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;

/// Cursor value that asks Solr for the first page of a deep-paging walk.
pub const CURSOR_MARK_START: &str = "*";

/// Unique key field used when none is configured.
pub const DEFAULT_UNIQUE_KEY: &str = "id";

/// Rows per page used when no batch size is configured.
pub const DEFAULT_BATCH_SIZE: usize = 25_000;

/// HTTP protocol version used to talk to every shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpVersion {
    /// HTTP/1.1 only.
    #[default]
    Http1,
    /// HTTP/2 with prior knowledge.
    Http2,
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpVersion::Http1 => write!(f, "HTTP/1.1"),
            HttpVersion::Http2 => write!(f, "HTTP/2"),
        }
    }
}

/// Basic-auth credentials forwarded unchanged to every shard.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password, if any.
    pub password: Option<String>,
}

impl Credentials {
    /// Create credentials from a user name and optional password.
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Options applied identically to every shard scan of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Field whose values must be unique across the collection.
    pub unique_key: String,
    /// Filter queries, ANDed together.
    pub filters: Vec<String>,
    /// Rows requested per page.
    pub batch_size: usize,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            unique_key: DEFAULT_UNIQUE_KEY.to_string(),
            filters: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl CheckOptions {
    /// Reject options no scan could run with.
    pub fn validate(&self) -> CheckResult<()> {
        if self.unique_key.trim().is_empty() {
            return Err(CheckError::Config("unique key field must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(CheckError::Config("batch size must be at least 1".into()));
        }
        Ok(())
    }
}

/// A single page request sent to one core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Field to return and sort on.
    pub unique_key: String,
    /// Maximum rows in the page.
    pub rows: usize,
    /// Filter queries.
    pub filters: Vec<String>,
    /// Cursor echoed from the previous response.
    pub cursor: String,
}

/// One page of keys returned by a core.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    /// Unique key values in this page.
    pub keys: Vec<String>,
    /// Cursor for the next request. Equal to the request cursor once exhausted.
    pub next_cursor: String,
    /// Total matching documents reported by the core.
    pub num_found: Option<u64>,
}

/// Lifecycle state of a shard scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanState {
    /// The scan is still paging.
    Running,
    /// The cursor stopped advancing; every key was read.
    Completed,
    /// A page request failed.
    Failed,
    /// The run was cancelled before this scan finished.
    Cancelled,
}

impl ScanState {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanState::Running)
    }
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Running => write!(f, "Running"),
            ScanState::Completed => write!(f, "Completed"),
            ScanState::Failed => write!(f, "Failed"),
            ScanState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Request and latency statistics for one shard scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Successful page requests.
    pub request_count: u32,
    /// Sum of all request latencies.
    pub cumulative_latency: Duration,
    /// `cumulative_latency / request_count`.
    pub average_latency: Duration,
    /// Latency of the most recent request.
    pub last_latency: Duration,
    /// `numFound` reported by the first page.
    pub num_found_first: Option<u64>,
    /// `numFound` reported by the latest page.
    pub num_found_last: Option<u64>,
    /// Keys seen more than once within this shard.
    pub anomalies: u64,
}

impl ScanStats {
    /// Record one successful request.
    pub fn record_request(&mut self, elapsed: Duration, num_found: Option<u64>) {
        self.request_count += 1;
        self.cumulative_latency += elapsed;
        self.average_latency = self.cumulative_latency / self.request_count;
        self.last_latency = elapsed;
        if self.num_found_first.is_none() {
            self.num_found_first = num_found;
        }
        if num_found.is_some() {
            self.num_found_last = num_found;
        }
    }

    /// True when the first and last page disagree about the shard size.
    pub fn num_found_drifted(&self) -> bool {
        matches!(
            (self.num_found_first, self.num_found_last),
            (Some(first), Some(last)) if first != last
        )
    }
}

/// Terminal result of one shard scan, handed back through the barrier.
#[derive(Debug, Clone)]
pub struct ShardScan {
    /// Core this scan walked.
    pub core_name: String,
    /// Terminal state.
    pub state: ScanState,
    /// Every key read before the scan stopped.
    pub key_set: HashSet<String>,
    /// Request statistics.
    pub stats: ScanStats,
    /// The failure, when `state` is `Failed`.
    pub error: Option<ScanError>,
}

/// A key present in more than one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    /// The duplicated unique key value.
    pub key: String,
    /// Sorted names of the cores that hold it.
    pub shards: Vec<String>,
}

/// Result of correlating all shard key sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSummary {
    /// Number of duplicated keys.
    pub total: usize,
    /// Duplicated key to the cores that hold it.
    pub duplicates: BTreeMap<String, Vec<String>>,
}

impl DuplicateSummary {
    /// True when no duplicate was found.
    pub fn is_empty(&self) -> bool {
        self.duplicates.is_empty()
    }

    /// Iterate over the duplicates as records, in key order.
    pub fn records(&self) -> impl Iterator<Item = DuplicateRecord> + '_ {
        self.duplicates.iter().map(|(key, shards)| DuplicateRecord {
            key: key.clone(),
            shards: shards.clone(),
        })
    }
}

/// Errors raised while fetching a page from a shard.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote query failed with status {status}: {message}")]
    RemoteQuery { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Result type for page fetches.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that abort a check run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scan of core {core} failed: {source}")]
    ShardFailed { core: String, source: ScanError },

    #[error("Scan task for core {core} panicked")]
    WorkerPanicked { core: String },

    #[error("Check cancelled before every shard was scanned")]
    Cancelled,
}

/// Result type for check runs.
pub type CheckResult<T> = Result<T, CheckError>;

/// Errors raised while persisting results.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Serialization(e.to_string())
    }
}
