//! # Shardcheck
//!
//! Verifies that a Solr collection's unique key really is unique across
//! its physical shards. Every core is walked independently with cursor
//! deep paging, all scans run in parallel, and once every scan has reached
//! a terminal state the per-core key sets are correlated into a duplicate
//! report.

pub mod client;
pub mod context;
pub mod detector;
pub mod endpoint;
pub mod runner;
pub mod scanner;
pub mod sink;
pub mod types;

pub use client::{ClientFactory, ShardClient, SolrClient, SolrClientFactory};
pub use context::RunContext;
pub use detector::find_duplicates;
pub use endpoint::ShardEndpoint;
pub use runner::{run_check, CheckOutcome, DuplicateCheck};
pub use scanner::ShardScanner;
pub use sink::{read_key_set, FileSink, MemorySink, ResultSink};
pub use types::*;
