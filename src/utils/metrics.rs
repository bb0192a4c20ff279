//! Request and connection counters.
//!
//! Process-wide atomic counters shared by every listener and dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for directory operations
#[derive(Debug)]
pub struct Metrics {
    /// Requests decoded successfully
    pub requests_total: AtomicU64,
    /// Requests dropped because they did not decode
    pub requests_malformed: AtomicU64,
    /// Requests rejected by the code / access code check
    pub access_denied: AtomicU64,
    /// Store calls that returned an error
    pub backend_errors: AtomicU64,
    /// List responses that lost records to the capacity limit
    pub lists_truncated: AtomicU64,
    /// Responses dropped because they did not fit the capacity
    pub responses_dropped: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total TCP connections accepted
    pub connections_total: AtomicU64,
    /// Currently open TCP connections
    pub connections_active: AtomicU64,
    /// Transport failures (send, recv, accept)
    pub transport_errors: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_malformed: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            lists_truncated: AtomicU64::new(0),
            responses_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed(&self) {
        self.requests_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn denied(&self) {
        self.access_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn list_truncated(&self) {
        self.lists_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_dropped(&self) {
        self.responses_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_in(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn bytes_out(&self, byte_count: u64) {
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_malformed: self.requests_malformed.load(Ordering::Relaxed),
            access_denied: self.access_denied.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            lists_truncated: self.lists_truncated.load(Ordering::Relaxed),
            responses_dropped: self.responses_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            requests_total = snapshot.requests_total,
            requests_malformed = snapshot.requests_malformed,
            access_denied = snapshot.access_denied,
            backend_errors = snapshot.backend_errors,
            lists_truncated = snapshot.lists_truncated,
            responses_dropped = snapshot.responses_dropped,
            bytes_sent = snapshot.bytes_sent,
            bytes_received = snapshot.bytes_received,
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            transport_errors = snapshot.transport_errors,
            uptime_seconds = snapshot.uptime_seconds,
            "Directory metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_malformed: u64,
    pub access_denied: u64,
    pub backend_errors: u64,
    pub lists_truncated: u64,
    pub responses_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connections_total: u64,
    pub connections_active: u64,
    pub transport_errors: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Force creation of the global collector (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Logs the elapsed time of an operation when dropped
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.request();
        metrics.request();
        metrics.malformed();
        metrics.bytes_in(18);
        metrics.connection_opened();
        metrics.connection_closed();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_total, 2);
        assert_eq!(snap.requests_malformed, 1);
        assert_eq!(snap.bytes_received, 18);
        assert_eq!(snap.connections_total, 1);
        assert_eq!(snap.connections_active, 0);
    }
}
