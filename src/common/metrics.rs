//! Metrics collection
//!
//! Prometheus-compatible counters, gauges and latency histograms for the
//! coordinator: request counts per endpoint, shard transfer outcomes,
//! liveness transitions and degraded files.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Histogram bucket boundaries for latency measurements (in milliseconds)
const LATENCY_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// A simple histogram implementation for latency tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    boundaries: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::with_buckets(&LATENCY_BUCKETS)
    }

    pub fn with_buckets(boundaries: &[f64]) -> Self {
        let buckets = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            boundaries: boundaries.to_vec(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a value in the histogram
    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .boundaries
            .iter()
            .position(|&boundary| value <= boundary)
            .unwrap_or(self.boundaries.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        // Stored as microseconds for precision
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Cumulative bucket counts, ending with the +Inf bucket
    pub fn get_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = 0u64;
        let mut result = Vec::with_capacity(self.boundaries.len() + 1);

        for (i, &boundary) in self.boundaries.iter().enumerate() {
            cumulative += self.buckets[i].load(Ordering::Relaxed);
            result.push((boundary, cumulative));
        }

        cumulative += self.buckets[self.boundaries.len()].load(Ordering::Relaxed);
        result.push((f64::INFINITY, cumulative));

        result
    }

    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Endpoint metrics
#[derive(Debug, Default)]
pub struct EndpointMetrics {
    pub requests_total: Counter,
    pub requests_error: Counter,
    pub latency: Histogram,
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    endpoints: Mutex<HashMap<String, Arc<EndpointMetrics>>>,

    pub uploads_total: Counter,
    pub upload_rollbacks: Counter,
    pub downloads_total: Counter,
    pub download_failures: Counter,
    pub shard_retries: Counter,
    pub shard_failovers: Counter,
    pub bytes_uploaded: Counter,
    pub bytes_downloaded: Counter,
    pub renters_suspected: Counter,
    pub renters_evicted: Counter,
    pub shards_rereplicated: Counter,
    pub files_expired: Counter,

    pub active_renters: Gauge,
    pub degraded_files: Gauge,

    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            uploads_total: Counter::new(),
            upload_rollbacks: Counter::new(),
            downloads_total: Counter::new(),
            download_failures: Counter::new(),
            shard_retries: Counter::new(),
            shard_failovers: Counter::new(),
            bytes_uploaded: Counter::new(),
            bytes_downloaded: Counter::new(),
            renters_suspected: Counter::new(),
            renters_evicted: Counter::new(),
            shards_rereplicated: Counter::new(),
            files_expired: Counter::new(),
            active_renters: Gauge::new(),
            degraded_files: Gauge::new(),
            start_time: Instant::now(),
        }
    }

    /// Get or create metrics for an endpoint
    pub fn endpoint(&self, path: &str) -> Arc<EndpointMetrics> {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        endpoints
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(EndpointMetrics::default()))
            .clone()
    }

    pub fn record_request(&self, path: &str, duration: Duration, success: bool) {
        let endpoint = self.endpoint(path);
        endpoint.requests_total.inc();
        endpoint.latency.observe(duration.as_secs_f64() * 1000.0);
        if !success {
            endpoint.requests_error.inc();
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, &Counter); 12] = [
            ("uploads_total", "Committed uploads", &self.uploads_total),
            ("upload_rollbacks_total", "Uploads rolled back", &self.upload_rollbacks),
            ("downloads_total", "Completed downloads", &self.downloads_total),
            ("download_failures_total", "Downloads that failed", &self.download_failures),
            ("shard_retries_total", "Shard transfers retried", &self.shard_retries),
            ("shard_failovers_total", "Shards moved to a fallback renter", &self.shard_failovers),
            ("bytes_uploaded_total", "File bytes accepted", &self.bytes_uploaded),
            ("bytes_downloaded_total", "File bytes served", &self.bytes_downloaded),
            ("renters_suspected_total", "Active to suspected transitions", &self.renters_suspected),
            ("renters_evicted_total", "Renters evicted", &self.renters_evicted),
            ("shards_rereplicated_total", "Shard replicas rebuilt after eviction", &self.shards_rereplicated),
            ("files_expired_total", "Files removed after their TTL", &self.files_expired),
        ];
        for (name, help, counter) in counters {
            let _ = writeln!(out, "# HELP shardfs_{} {}", name, help);
            let _ = writeln!(out, "# TYPE shardfs_{} counter", name);
            let _ = writeln!(out, "shardfs_{} {}", name, counter.get());
        }

        let gauges: [(&str, &str, u64); 3] = [
            ("active_renters", "Renters currently active", self.active_renters.get()),
            ("degraded_files", "Files with an unrecoverable shard", self.degraded_files.get()),
            ("uptime_seconds", "Server uptime in seconds", self.uptime_seconds()),
        ];
        for (name, help, value) in gauges {
            let _ = writeln!(out, "# HELP shardfs_{} {}", name, help);
            let _ = writeln!(out, "# TYPE shardfs_{} gauge", name);
            let _ = writeln!(out, "shardfs_{} {}", name, value);
        }

        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        out.push_str("# HELP shardfs_endpoint_requests_total Requests per endpoint\n");
        out.push_str("# TYPE shardfs_endpoint_requests_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "shardfs_endpoint_requests_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_total.get()
            );
        }

        out.push_str("# HELP shardfs_endpoint_errors_total Errors per endpoint\n");
        out.push_str("# TYPE shardfs_endpoint_errors_total counter\n");
        for (path, metrics) in endpoints.iter() {
            let _ = writeln!(
                out,
                "shardfs_endpoint_errors_total{{path=\"{}\"}} {}",
                path,
                metrics.requests_error.get()
            );
        }

        out.push_str("# HELP shardfs_request_duration_ms Request duration in milliseconds\n");
        out.push_str("# TYPE shardfs_request_duration_ms histogram\n");
        for (path, metrics) in endpoints.iter() {
            for (le, count) in metrics.latency.get_buckets() {
                let le = if le.is_infinite() {
                    "+Inf".to_string()
                } else {
                    le.to_string()
                };
                let _ = writeln!(
                    out,
                    "shardfs_request_duration_ms_bucket{{path=\"{}\",le=\"{}\"}} {}",
                    path, le, count
                );
            }
            let _ = writeln!(
                out,
                "shardfs_request_duration_ms_sum{{path=\"{}\"}} {}",
                path,
                metrics.latency.sum()
            );
            let _ = writeln!(
                out,
                "shardfs_request_duration_ms_count{{path=\"{}\"}} {}",
                path,
                metrics.latency.count()
            );
        }

        out
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<MetricsRegistry> =
    once_cell::sync::Lazy::new(MetricsRegistry::new);
