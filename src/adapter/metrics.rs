//! Metrics aggregation
//!
//! Variant-local counters merge with externally supplied conversation
//! statistics. External statistics are authoritative: on key conflict they
//! overwrite local values (last-writer-wins). Local counters under the
//! `switchyard.` prefix are not used by external stats and survive the
//! merge in practice.

use std::collections::HashMap;

use serde_json::Value;

/// Merge local counters with external statistics, external winning on
/// conflicting keys.
pub fn merge_metrics(
    local: &HashMap<String, Value>,
    external: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut merged = local.clone();
    for (key, value) in external {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
