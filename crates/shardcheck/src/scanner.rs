//! Per-shard key enumeration.
//!
//! A [`ShardScanner`] walks one core's entire key space with cursor deep
//! paging. It owns its client and its key set; nothing else touches either
//! until [`ShardScanner::run`] returns the finished [`ShardScan`].
//!
//! # Protocol
//!
//! 1. Check the shared cancellation signal; stop if it is set.
//! 2. Request `batch_size` keys sorted ascending, echoing the last cursor.
//! 3. Add the keys to the set and update latency statistics.
//! 4. Stop once the returned cursor equals the one that was sent.
//!
//! A failed request ends the scan and cancels the run so sibling scanners
//! stop before their next request.

use crate::client::ShardClient;
use crate::types::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Enumerates every unique key of one core.
pub struct ShardScanner {
    core_name: String,
    unique_key: String,
    batch_size: usize,
    filters: Arc<[String]>,
    client: Box<dyn ShardClient>,
    cancel: CancellationToken,
    key_set: HashSet<String>,
    stats: ScanStats,
    state: ScanState,
}

impl ShardScanner {
    /// Create a scanner for one core.
    ///
    /// # Arguments
    ///
    /// * `core_name` - Name of the core, used in logs and results
    /// * `options` - Unique key, filters and page size for the run
    /// * `client` - Client owned by this scanner until it finishes
    /// * `cancel` - The run's shared cancellation signal
    pub fn new(
        core_name: impl Into<String>,
        options: &CheckOptions,
        client: Box<dyn ShardClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            core_name: core_name.into(),
            unique_key: options.unique_key.clone(),
            batch_size: options.batch_size,
            filters: options.filters.clone().into(),
            client,
            cancel,
            key_set: HashSet::new(),
            stats: ScanStats::default(),
            state: ScanState::Running,
        }
    }

    /// Name of the core being scanned.
    pub fn core_name(&self) -> &str {
        &self.core_name
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Walk the core until the cursor stops moving, a request fails, or
    /// the run is cancelled.
    ///
    /// The client is dropped when this returns, whichever way the scan
    /// ended.
    pub async fn run(mut self) -> ShardScan {
        info!(core = %self.core_name, batch_size = self.batch_size, "Starting shard scan");

        let mut cursor = CURSOR_MARK_START.to_string();
        let mut error = None;

        while self.state == ScanState::Running {
            if self.cancel.is_cancelled() {
                warn!(
                    core = %self.core_name,
                    keys = self.key_set.len(),
                    "Run cancelled, stopping shard scan"
                );
                self.state = ScanState::Cancelled;
                break;
            }

            let request = PageRequest {
                unique_key: self.unique_key.clone(),
                rows: self.batch_size,
                filters: self.filters.to_vec(),
                cursor: cursor.clone(),
            };

            let started = Instant::now();
            let page = match self.client.fetch_page(&request).await {
                Ok(page) => page,
                Err(e) => {
                    error!(
                        core = %self.core_name,
                        cursor = %cursor,
                        error = %e,
                        "Query failed, aborting shard scan"
                    );
                    self.state = ScanState::Failed;
                    self.cancel.cancel();
                    error = Some(e);
                    break;
                }
            };

            self.add_keys(page.keys);
            self.stats.record_request(started.elapsed(), page.num_found);

            debug!(
                core = %self.core_name,
                cursor = %cursor,
                requests = self.stats.request_count,
                last_ms = self.stats.last_latency.as_millis() as u64,
                avg_ms = self.stats.average_latency.as_millis() as u64,
                keys = self.key_set.len(),
                "Query info"
            );

            if page.next_cursor == cursor {
                self.state = ScanState::Completed;
            } else {
                cursor = page.next_cursor;
            }
        }

        self.finish(error)
    }

    fn add_keys(&mut self, keys: Vec<String>) {
        for key in keys {
            if self.key_set.contains(&key) {
                self.stats.anomalies += 1;
                error!(
                    core = %self.core_name,
                    key = %key,
                    "Key is already in this shard's set, index may be inconsistent"
                );
            } else {
                self.key_set.insert(key);
            }
        }
    }

    fn finish(self, error: Option<ScanError>) -> ShardScan {
        let ShardScanner {
            core_name,
            client,
            key_set,
            stats,
            state,
            ..
        } = self;

        drop(client);
        debug!(core = %core_name, "Closed shard client");

        if state == ScanState::Completed {
            if stats.num_found_drifted() {
                warn!(
                    core = %core_name,
                    first = ?stats.num_found_first,
                    last = ?stats.num_found_last,
                    "numFound changed during the scan, the core was modified"
                );
            }
            if let Some(num_found) = stats.num_found_last {
                if num_found != key_set.len() as u64 {
                    warn!(
                        core = %core_name,
                        num_found,
                        keys = key_set.len(),
                        "Collected key count differs from numFound"
                    );
                }
            }
        }

        info!(
            core = %core_name,
            state = %state,
            keys = key_set.len(),
            requests = stats.request_count,
            avg_ms = stats.average_latency.as_millis() as u64,
            anomalies = stats.anomalies,
            "Shard scan ended"
        );

        ShardScan {
            core_name,
            state,
            key_set,
            stats,
            error,
        }
    }
}
