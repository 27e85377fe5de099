//! Shared health state for the /health endpoint. Updated by the pair
//! evaluation loops; per-venue connectivity comes from the feeds directly.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    /// Epoch ms of the most recent completed scoring pass (0 = none yet).
    last_scoring_pass_ms: AtomicI64,
    /// Total scoring passes across all pairs since process start.
    scoring_passes: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_scoring_pass(&self, now_ms: i64) {
        self.last_scoring_pass_ms.store(now_ms, Ordering::Relaxed);
        self.scoring_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_scoring_pass_ms(&self) -> i64 {
        self.last_scoring_pass_ms.load(Ordering::Relaxed)
    }

    pub fn scoring_passes(&self) -> u64 {
        self.scoring_passes.load(Ordering::Relaxed)
    }
}
