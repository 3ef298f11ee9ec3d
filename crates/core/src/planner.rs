#![forbid(unsafe_code)]

//! Shard planning: how many workers a job needs and how many points each one gets.
//!
//! Per-measurement cost is modelled as `(E + 3) / 3` core-seconds for `E` elements, so a job of
//! `M` measurements wants `M * (E + 3) / (3 * R)` cores to finish in `R` seconds, spread over
//! workers of `P` cores each.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardPlanRequest {
    /// Point count, already doubled when detectors are quantified separately.
    pub measurement_count: usize,
    pub element_count: usize,
    pub runtime_sec: u32,
    pub cores_per_worker: u32,
    pub max_workers: u32,
    /// Non-zero replaces the estimate (still clamped to `max_workers`).
    pub worker_count_override: u32,
    pub map_command: bool,
    pub combined_detectors: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardPlan {
    pub shard_count: usize,
    /// Measurements per shard.
    pub spectra_per_shard: usize,
    /// Points per shard: equal to `spectra_per_shard` for combined detectors, half otherwise.
    pub points_per_shard: usize,
}

/// `round(M * (E + 3) / (3 * R * P))` clamped to `[1, N]`.
pub fn estimate_shard_count(
    measurement_count: usize,
    element_count: usize,
    runtime_sec: u32,
    cores_per_worker: u32,
    max_workers: u32,
) -> usize {
    let max_workers = max_workers.max(1) as usize;
    let denominator = 3.0 * f64::from(runtime_sec.max(1)) * f64::from(cores_per_worker.max(1));
    let core_seconds = measurement_count as f64 * (element_count as f64 + 3.0);
    let estimate = (core_seconds / denominator).round();
    if !estimate.is_finite() || estimate < 1.0 {
        return 1;
    }
    (estimate as usize).clamp(1, max_workers)
}

/// `ceil(M / S) + 1`.
pub fn spectra_per_shard(measurement_count: usize, shard_count: usize) -> usize {
    measurement_count.div_ceil(shard_count.max(1)) + 1
}

pub fn plan_shards(request: &ShardPlanRequest) -> ShardPlan {
    let mut shard_count = estimate_shard_count(
        request.measurement_count,
        request.element_count,
        request.runtime_sec,
        request.cores_per_worker,
        request.max_workers,
    );
    if request.worker_count_override > 0 {
        let max_workers = request.max_workers.max(1) as usize;
        shard_count = (request.worker_count_override as usize).clamp(1, max_workers);
    }
    if !request.map_command {
        shard_count = 1;
    }

    let spectra = spectra_per_shard(request.measurement_count, shard_count);
    let points_per_shard = if request.combined_detectors {
        spectra
    } else {
        (spectra / 2).max(1)
    };

    ShardPlan {
        shard_count,
        spectra_per_shard: spectra,
        points_per_shard,
    }
}

/// Cuts `points` into consecutive chunks of at most `points_per_shard`, preserving order.
pub fn split_points(points: &[i32], points_per_shard: usize) -> Vec<Vec<i32>> {
    points
        .chunks(points_per_shard.max(1))
        .map(<[i32]>::to_vec)
        .collect()
}
