// SPDX-License-Identifier: MIT
//
// Pollen: Network Entropy Exchange
// Copyright (c) 2025 Pollen Contributors

//! Metrics collection and reporting

use crate::sink::SinkStats;
use crate::Error;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Most recent exchange latencies kept for percentiles
const LATENCY_WINDOW: usize = 4096;

/// Exchange counters shared by every request handler
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

struct Counters {
    started: Instant,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    bytes_served: AtomicU64,
    source_failures: AtomicU64,
    encoding_failures: AtomicU64,
    internal_failures: AtomicU64,
    // microseconds, oldest first
    latencies: RwLock<VecDeque<u64>>,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
            source_failures: AtomicU64::new(0),
            encoding_failures: AtomicU64::new(0),
            internal_failures: AtomicU64::new(0),
            latencies: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
        }
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a served exchange of `bytes` response bytes
    pub fn record_request(&self, bytes: usize, latency_micros: u64) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_served
            .fetch_add(bytes as u64, Ordering::Relaxed);

        let mut latencies = self.inner.latencies.write();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(latency_micros);
    }

    /// Count an aborted exchange, broken down by cause
    pub fn record_request_failure(&self, error: &Error) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        let cause = match error {
            Error::EntropySourceUnavailable(_) => &self.inner.source_failures,
            Error::EncodingFailed(_) => &self.inner.encoding_failures,
            Error::Internal(_) => &self.inner.internal_failures,
            _ => return,
        };
        cause.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.inner.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.inner.requests_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_served(&self) -> u64 {
        self.inner.bytes_served.load(Ordering::Relaxed)
    }

    pub fn source_failures(&self) -> u64 {
        self.inner.source_failures.load(Ordering::Relaxed)
    }

    pub fn encoding_failures(&self) -> u64 {
        self.inner.encoding_failures.load(Ordering::Relaxed)
    }

    pub fn internal_failures(&self) -> u64 {
        self.inner.internal_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.started.elapsed().as_secs()
    }

    /// Latency at `quantile` (0.0..=1.0) over the recent window
    pub fn latency_quantile(&self, quantile: f64) -> Option<u64> {
        let mut sorted: Vec<u64> = self.inner.latencies.read().iter().copied().collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();

        // Nearest rank: the smallest value with at least `quantile` of samples at or below it
        let rank = (sorted.len() as f64 * quantile).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_quantile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_quantile(0.99)
    }

    /// Render all counters in Prometheus text format
    pub fn prometheus_format(&self, feedback: Option<&SinkStats>) -> String {
        let mut output = String::new();

        counter(&mut output, "pollen_requests_total", "Total number of exchanges served", self.requests_total());
        counter(&mut output, "pollen_requests_failed", "Total number of failed exchanges", self.requests_failed());
        counter(&mut output, "pollen_source_failures", "Exchanges aborted because the entropy source was unavailable", self.source_failures());
        counter(&mut output, "pollen_encoding_failures", "Exchanges aborted because the response could not be framed", self.encoding_failures());
        counter(&mut output, "pollen_internal_failures", "Exchanges aborted because the exchange task panicked", self.internal_failures());
        counter(&mut output, "pollen_bytes_served", "Total response bytes served", self.bytes_served());

        if let Some(stats) = feedback {
            counter(&mut output, "pollen_pool_feed_events", "Pool feedback events written", stats.events());
            counter(&mut output, "pollen_pool_feed_bytes", "Pool feedback bytes written", stats.bytes_written());
            counter(&mut output, "pollen_pool_feed_failures", "Pool feedback events lost to I/O errors", stats.failures());
            counter(&mut output, "pollen_pool_feed_dropped", "Pool feedback events dropped on a full queue", stats.dropped());
        }

        gauge(&mut output, "pollen_uptime_seconds", "Service uptime in seconds", self.uptime_seconds());
        if let Some(p50) = self.latency_p50() {
            gauge(&mut output, "pollen_latency_p50_microseconds", "Exchange latency 50th percentile", p50);
        }
        if let Some(p99) = self.latency_p99() {
            gauge(&mut output, "pollen_latency_p99_microseconds", "Exchange latency 99th percentile", p99);
        }

        output
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    metric(output, "counter", name, help, value);
}

fn gauge(output: &mut String, name: &str, help: &str, value: u64) {
    metric(output, "gauge", name, help, value);
}

fn metric(output: &mut String, kind: &str, name: &str, help: &str, value: u64) {
    output.push_str(&format!("# HELP {} {}\n# TYPE {} {}\n{} {}\n", name, help, name, kind, name, value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = Metrics::new();

        metrics.record_request(129, 100);
        metrics.record_request(258, 200);
        metrics.record_request_failure(&Error::EntropySourceUnavailable("gone".to_string()));
        metrics.record_request_failure(&Error::EncodingFailed("bad".to_string()));
        metrics.record_request_failure(&Error::Internal("panicked".to_string()));

        assert_eq!(metrics.requests_total(), 2);
        assert_eq!(metrics.requests_failed(), 3);
        assert_eq!(metrics.source_failures(), 1);
        assert_eq!(metrics.encoding_failures(), 1);
        assert_eq!(metrics.internal_failures(), 1);
        assert_eq!(metrics.bytes_served(), 387);
    }

    #[test]
    fn test_latency_percentiles() {
        let metrics = Metrics::new();

        for i in 1..=100 {
            metrics.record_request(100, i);
        }

        assert_eq!(metrics.latency_p50(), Some(50));
        assert_eq!(metrics.latency_p99(), Some(99));
        assert_eq!(metrics.latency_quantile(1.0), Some(100));
        assert_eq!(metrics.latency_quantile(0.0), Some(1));
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = Metrics::new();

        for _ in 0..LATENCY_WINDOW {
            metrics.record_request(1, 1_000_000);
        }
        for _ in 0..LATENCY_WINDOW {
            metrics.record_request(1, 7);
        }

        assert_eq!(metrics.latency_p99(), Some(7));
        assert_eq!(metrics.inner.latencies.read().len(), LATENCY_WINDOW);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.record_request(10, 5);

        let text = metrics.prometheus_format(Some(&SinkStats::default()));
        assert!(text.contains("pollen_requests_total 1\n"));
        assert!(text.contains("pollen_pool_feed_failures 0\n"));
        assert!(text.contains("# TYPE pollen_latency_p50_microseconds gauge"));

        let text = metrics.prometheus_format(None);
        assert!(!text.contains("pollen_pool_feed_events"));
    }
}
