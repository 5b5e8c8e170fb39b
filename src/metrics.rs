// flowlink — Metrics and observability.
//
// In-process counters for workflow runs, per-service connector calls and
// failure kinds. Exposed through `report()` for the CLI and the web API.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Global metrics collector.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<RwLock<MetricsInner>>,
    start_time: Instant,
}

#[derive(Default)]
struct MetricsInner {
    /// Workflow runs started.
    runs_started: u64,
    /// Workflow runs that returned a cache.
    runs_completed: u64,
    /// Runs that finished with at least one failed step.
    runs_with_failures: u64,
    /// Cumulative run time in milliseconds.
    run_total_ms: u64,
    /// Per-service connector calls.
    service_calls: HashMap<String, u64>,
    /// Per-service connector errors.
    service_errors: HashMap<String, u64>,
    /// Per-service cumulative duration in ms.
    service_duration_ms: HashMap<String, u64>,
    /// Step failures keyed by error kind.
    failure_kinds: HashMap<String, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            start_time: Instant::now(),
        }
    }

    pub async fn record_run_started(&self) {
        self.inner.write().await.runs_started += 1;
    }

    pub async fn record_run_finished(&self, failed_steps: usize, duration: Duration) {
        let mut m = self.inner.write().await;
        m.runs_completed += 1;
        m.run_total_ms += duration.as_millis() as u64;
        if failed_steps > 0 {
            m.runs_with_failures += 1;
        }
    }

    /// Record one connector `execute_action` call.
    pub async fn record_action(&self, service: &str, success: bool, duration: Duration) {
        let mut m = self.inner.write().await;
        *m.service_calls.entry(service.to_string()).or_insert(0) += 1;
        *m.service_duration_ms.entry(service.to_string()).or_insert(0) +=
            duration.as_millis() as u64;
        if !success {
            *m.service_errors.entry(service.to_string()).or_insert(0) += 1;
        }
    }

    pub async fn record_failure(&self, kind: &str) {
        let mut m = self.inner.write().await;
        *m.failure_kinds.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub async fn report(&self) -> MetricsReport {
        let m = self.inner.read().await;

        let total_action_calls: u64 = m.service_calls.values().sum();
        let total_action_errors: u64 = m.service_errors.values().sum();
        let avg_run_ms = if m.runs_completed > 0 {
            m.run_total_ms / m.runs_completed
        } else {
            0
        };

        let mut service_stats: Vec<ServiceStat> = m
            .service_calls
            .iter()
            .map(|(name, &count)| {
                let errors = m.service_errors.get(name).copied().unwrap_or(0);
                let total_ms = m.service_duration_ms.get(name).copied().unwrap_or(0);
                ServiceStat {
                    name: name.clone(),
                    calls: count,
                    errors,
                    avg_ms: if count > 0 { total_ms / count } else { 0 },
                }
            })
            .collect();
        service_stats.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.name.cmp(&b.name)));

        MetricsReport {
            uptime_secs: self.uptime().as_secs(),
            runs_started: m.runs_started,
            runs_completed: m.runs_completed,
            runs_with_failures: m.runs_with_failures,
            avg_run_ms,
            total_action_calls,
            total_action_errors,
            service_stats,
            failure_kinds: m.failure_kinds.clone(),
        }
    }

    /// Format report as a displayable string.
    pub async fn format_report(&self) -> String {
        let r = self.report().await;
        let mut out = String::new();

        let hours = r.uptime_secs / 3600;
        let mins = (r.uptime_secs % 3600) / 60;
        let secs = r.uptime_secs % 60;

        out.push_str(&format!(
            "═══ flowlink Metrics ═══\n\
             Uptime:       {:02}:{:02}:{:02}\n\
             Runs:         {} started, {} completed ({} with failures)\n\
             Avg Run:      {}ms\n\
             Actions:      {} ({} errors)\n",
            hours,
            mins,
            secs,
            r.runs_started,
            r.runs_completed,
            r.runs_with_failures,
            r.avg_run_ms,
            r.total_action_calls,
            r.total_action_errors,
        ));

        if !r.service_stats.is_empty() {
            out.push_str("\n─── Services ───\n");
            for s in &r.service_stats {
                out.push_str(&format!(
                    "  {:<20} {:>4} calls  {:>3} err  {:>4}ms avg\n",
                    s.name, s.calls, s.errors, s.avg_ms,
                ));
            }
        }

        if !r.failure_kinds.is_empty() {
            out.push_str("\n─── Failures ───\n");
            let mut kinds: Vec<_> = r.failure_kinds.iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                out.push_str(&format!("  {:<30} {:>4}\n", kind, count));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Structured metrics report.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub uptime_secs: u64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_with_failures: u64,
    pub avg_run_ms: u64,
    pub total_action_calls: u64,
    pub total_action_errors: u64,
    pub service_stats: Vec<ServiceStat>,
    pub failure_kinds: HashMap<String, u64>,
}

/// Per-service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStat {
    pub name: String,
    pub calls: u64,
    pub errors: u64,
    pub avg_ms: u64,
}
