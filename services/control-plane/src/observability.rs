//! Observability: in-process metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Metrics collector shared by the engine components
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    histograms: HashMap<String, Histogram>,
    start_time: Instant,
}

/// Running summary, raw samples are not kept
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Histogram {
    pub count: u64,
    pub sum: f64,
    pub max: f64,
}

impl Histogram {
    fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if value > self.max {
            self.max = value;
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner {
                counters: HashMap::new(),
                gauges: HashMap::new(),
                histograms: HashMap::new(),
                start_time: Instant::now(),
            })),
        }
    }

    pub async fn increment(&self, name: &str, value: u64) {
        let mut inner = self.inner.write().await;
        let counter = inner.counters.entry(name.to_string()).or_insert(0);
        *counter += value;
    }

    pub async fn gauge(&self, name: &str, value: f64) {
        let mut inner = self.inner.write().await;
        inner.gauges.insert(name.to_string(), value);
    }

    pub async fn histogram(&self, name: &str, value: f64) {
        let mut inner = self.inner.write().await;
        inner
            .histograms
            .entry(name.to_string())
            .or_default()
            .record(value);
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges: inner.gauges.clone(),
            histograms: inner.histograms.clone(),
            uptime_secs: inner.start_time.elapsed().as_secs(),
        }
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        let inner = self.inner.read().await;
        inner.counters.get(name).copied().unwrap_or(0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, Histogram>,
    pub uptime_secs: u64,
}

/// Predefined metric names
pub mod metrics {
    // Executions
    pub const EXECUTION_STARTED: &str = "execution_started_total";
    pub const EXECUTION_REJECTED: &str = "execution_rejected_total";
    pub const EXECUTION_COMPLETED: &str = "execution_completed_total";
    pub const EXECUTION_FAILED: &str = "execution_failed_total";
    pub const EXECUTION_CANCELLED: &str = "execution_cancelled_total";
    pub const EXECUTION_DURATION_MS: &str = "execution_duration_ms";
    pub const ACTIVE_EXECUTIONS: &str = "active_executions";

    // Cycles
    pub const CYCLE_SUCCEEDED: &str = "cycle_succeeded_total";
    pub const CYCLE_FAILED: &str = "cycle_failed_total";
    pub const CYCLE_PANICKED: &str = "cycle_panicked_total";

    // Transactions
    pub const DRAFT_CREATED: &str = "draft_created_total";
    pub const FEE_ESTIMATE_FALLBACK: &str = "fee_estimate_fallback_total";
    pub const TRANSACTION_CONFIRMED: &str = "transaction_confirmed_total";
    pub const TRANSACTION_FAILED: &str = "transaction_failed_total";
    pub const SEND_RETRIES: &str = "send_retries_total";
}
