//! Per-run shared state.
//!
//! A [`RunContext`] is created by the orchestrator for one check run. It
//! holds the cancellation signal every scanner watches and the registry of
//! shards keyed by core name. Nothing here is process-global, so several
//! runs can coexist in one process and each can be tested in isolation.

use crate::endpoint::ShardEndpoint;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation signal and shard registry for one run.
#[derive(Debug, Default)]
pub struct RunContext {
    cancel: CancellationToken,
    registry: BTreeMap<String, ShardEndpoint>,
}

impl RunContext {
    /// Create an empty context with a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context that stops when `cancel` is cancelled.
    ///
    /// The run gets a child token: a failing shard cancels its own run
    /// without cancelling the caller's token.
    pub fn with_parent(cancel: &CancellationToken) -> Self {
        Self {
            cancel: cancel.child_token(),
            registry: BTreeMap::new(),
        }
    }

    /// Register a shard under its core name.
    ///
    /// A second endpoint with the same core name replaces the first one.
    /// Returns the replaced endpoint, if any.
    pub fn register(&mut self, endpoint: ShardEndpoint) -> Option<ShardEndpoint> {
        let replaced = self.registry.insert(endpoint.core_name.clone(), endpoint);
        if let Some(ref old) = replaced {
            debug!(core = %old.core_name, url = %old.raw, "Core name registered twice, keeping the later URL");
        }
        replaced
    }

    /// Registered shards in scan order (lexicographic by core name).
    pub fn shards(&self) -> impl Iterator<Item = &ShardEndpoint> {
        self.registry.values()
    }

    /// Look up a shard by core name.
    pub fn get(&self, core_name: &str) -> Option<&ShardEndpoint> {
        self.registry.get(core_name)
    }

    /// Number of registered shards.
    pub fn shard_count(&self) -> usize {
        self.registry.len()
    }

    /// A handle on the run's cancellation signal for one scanner.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask every scanner to stop before its next request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
