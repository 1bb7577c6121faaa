// Engine counters for administrative reporting.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub joined: u64,
    pub fetches_started: u64,
    pub fetches_failed: u64,
    pub deliveries: u64,
    pub busy_rejections: u64,
    pub join_timeouts: u64,
    pub refunds_issued: u64,
    pub refunds_failed: u64,
    pub active_workers: u32,
    pub cache_hit_rate: f64,
}

#[derive(Default)]
pub struct StatsCollector {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    joined: AtomicU64,
    fetches_started: AtomicU64,
    fetches_failed: AtomicU64,
    deliveries: AtomicU64,
    busy_rejections: AtomicU64,
    join_timeouts: AtomicU64,
    refunds_issued: AtomicU64,
    refunds_failed: AtomicU64,
    active_workers: AtomicU32,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_joined(&self) {
        self.joined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_join_timeout(&self) {
        self.join_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refund_issued(&self) {
        self.refunds_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refund_failed(&self) {
        self.refunds_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetch worker started running the external tool.
    pub fn increment_workers(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_workers(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_workers(&self) -> u32 {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_hit_rate = if requests > 0 {
            cache_hits as f64 / requests as f64
        } else {
            0.0
        };

        StatsSnapshot {
            requests,
            cache_hits,
            joined: self.joined.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            join_timeouts: self.join_timeouts.load(Ordering::Relaxed),
            refunds_issued: self.refunds_issued.load(Ordering::Relaxed),
            refunds_failed: self.refunds_failed.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = StatsCollector::new();
        for _ in 0..4 {
            stats.record_request();
        }
        stats.record_cache_hit();

        stats.increment_workers();
        stats.increment_workers();
        stats.decrement_workers();
        stats.record_refund_issued();

        let snap = stats.snapshot();
        assert_eq!(snap.requests, 4);
        assert_eq!(snap.fetches_started, 2);
        assert_eq!(snap.active_workers, 1);
        assert_eq!(snap.refunds_issued, 1);
        assert!((snap.cache_hit_rate - 0.25).abs() < f64::EPSILON);
    }
}
