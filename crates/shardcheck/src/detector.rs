//! Cross-shard duplicate detection.
//!
//! The first shard in scan order is the baseline and its key set is the
//! reference. Every later shard is intersected with the reference only, so
//! a key that two non-baseline shards share but the baseline lacks is not
//! reported. For each key that does hit the reference, every shard holding
//! it is listed.

use crate::types::DuplicateSummary;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Correlate per-shard key sets, given in scan order.
pub fn find_duplicates<S: AsRef<str>>(shards: &[(S, &HashSet<String>)]) -> DuplicateSummary {
    let Some(((baseline_name, reference), rest)) = shards.split_first() else {
        return DuplicateSummary::default();
    };
    let baseline: &str = baseline_name.as_ref();
    debug!(
        baseline,
        keys = reference.len(),
        "Using first shard as reference set"
    );

    let mut found: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
    for (_, key_set) in rest {
        for key in key_set.iter().filter(|k| reference.contains(*k)) {
            let holders = found.entry(key.clone()).or_default();
            for (name, other) in shards {
                if other.contains(key) {
                    holders.insert(name.as_ref());
                }
            }
        }
    }

    let duplicates: BTreeMap<String, Vec<String>> = found
        .into_iter()
        .filter(|(_, holders)| holders.len() >= 2)
        .map(|(key, holders)| (key, holders.into_iter().map(String::from).collect()))
        .collect();

    DuplicateSummary {
        total: duplicates.len(),
        duplicates,
    }
}
