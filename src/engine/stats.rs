// Loader counters: work started, finished, failed and deduplicated.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderStatsSnapshot {
    pub loads_started: u64,
    pub loads_completed: u64,
    pub loads_failed: u64,
    pub jobs_submitted: u64,
    pub dedup_hits: u64,
    pub placeholder_fallbacks: u64,
    pub active_workers: u32,
    pub pending: usize,
    pub uptime_secs: u64,
    /// Completed / (completed + failed), 0 when nothing finished yet.
    pub success_rate: f64,
}

pub struct LoaderStats {
    started_at: Instant,
    loads_started: AtomicU64,
    loads_completed: AtomicU64,
    loads_failed: AtomicU64,
    jobs_submitted: AtomicU64,
    dedup_hits: AtomicU64,
    placeholder_fallbacks: AtomicU64,
    active_workers: AtomicU32,
}

impl LoaderStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            loads_started: AtomicU64::new(0),
            loads_completed: AtomicU64::new(0),
            loads_failed: AtomicU64::new(0),
            jobs_submitted: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
            placeholder_fallbacks: AtomicU64::new(0),
            active_workers: AtomicU32::new(0),
        }
    }

    pub fn record_started(&self) {
        self.loads_started.fetch_add(1, Ordering::Relaxed);
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self, ok: bool) {
        if ok {
            self.loads_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.loads_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_hit(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.placeholder_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending: usize) -> LoaderStatsSnapshot {
        let completed = self.loads_completed.load(Ordering::Relaxed);
        let failed = self.loads_failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        let success_rate = if finished > 0 {
            completed as f64 / finished as f64
        } else {
            0.0
        };

        LoaderStatsSnapshot {
            loads_started: self.loads_started.load(Ordering::Relaxed),
            loads_completed: completed,
            loads_failed: failed,
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.load(Ordering::Relaxed),
            placeholder_fallbacks: self.placeholder_fallbacks.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            pending,
            uptime_secs: self.started_at.elapsed().as_secs(),
            success_rate,
        }
    }
}

impl Default for LoaderStats {
    fn default() -> Self {
        Self::new()
    }
}
