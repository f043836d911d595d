use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Clone, Default)]
pub struct NetMetrics {
    requests: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
    timeouts: Arc<AtomicU64>,
}

impl NetMetrics {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetMetricsSnapshot {
        NetMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct NetMetricsSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub timeouts: u64,
}
