//! Exponential half-life decay for node scores and edge weights.

use std::cmp::Ordering;

use crate::types::{Edge, Millis, Node};

/// Decay `value` by `age` elapsed time units with the given `half_life`.
///
/// Returns `value` unchanged when `age <= 0` or `half_life <= 0`.
pub fn decay(value: f64, age: f64, half_life: f64) -> f64 {
    if age <= 0.0 || half_life <= 0.0 {
        return value;
    }
    value * 0.5f64.powf(age / half_life)
}

/// Effective (decayed) value of a raw accumulator last updated at `updated_at`.
///
/// Ages saturate, so timestamps anywhere in the `i64` range are accepted.
pub fn effective(raw: f64, updated_at: Millis, now: Millis, half_life_ms: f64) -> f64 {
    decay(raw.max(0.0), now.saturating_sub(updated_at) as f64, half_life_ms)
}

pub fn node_effective_score(node: &Node, now: Millis, half_life_ms: f64) -> f64 {
    effective(node.score, node.updated_at, now, half_life_ms)
}

pub fn edge_effective_weight(edge: &Edge, now: Millis, half_life_ms: f64) -> f64 {
    effective(edge.weight, edge.updated_at, now, half_life_ms)
}

/// Descending order on `(effective value, updated_at)`.
pub(crate) fn rank_desc(a: (f64, Millis), b: (f64, Millis)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| b.1.cmp(&a.1))
}
