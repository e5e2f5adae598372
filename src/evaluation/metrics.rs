//! Information retrieval metrics.
//!
//! All functions are pure and work on the ordered list of retrieved ids and
//! the set of relevant ids for one query.

use std::collections::BTreeSet;

fn hits_in_top_k(retrieved: &[String], relevant: &BTreeSet<String>, k: usize) -> usize {
    retrieved
        .iter()
        .take(k)
        .filter(|id| relevant.contains(id.as_str()))
        .count()
}

/// |retrieved_top_K ∩ relevant| / K. Zero when `k == 0`.
pub fn precision_at_k(retrieved: &[String], relevant: &BTreeSet<String>, k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / k as f64
}

/// |retrieved_top_K ∩ relevant| / |relevant|. Zero when nothing is relevant.
pub fn recall_at_k(retrieved: &[String], relevant: &BTreeSet<String>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    hits_in_top_k(retrieved, relevant, k) as f64 / relevant.len() as f64
}

/// 1 / rank of the first relevant id (1-indexed), or 0 if none appears.
pub fn reciprocal_rank(retrieved: &[String], relevant: &BTreeSet<String>) -> f64 {
    retrieved
        .iter()
        .position(|id| relevant.contains(id.as_str()))
        .map_or(0.0, |index| 1.0 / (index + 1) as f64)
}

/// Arithmetic mean, 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Nearest-rank percentile of an ascending slice. No interpolation: the
/// result is always one of the inputs. Zero for an empty slice.
pub fn percentile_nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

/// p50/p95/p99 over a set of latencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyPercentiles {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencyPercentiles {
    pub fn from_latencies(latencies: &[u64]) -> Self {
        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();
        Self {
            p50_ms: percentile_nearest_rank(&sorted, 50.0),
            p95_ms: percentile_nearest_rank(&sorted, 95.0),
            p99_ms: percentile_nearest_rank(&sorted, 99.0),
        }
    }
}
