//! Observability infrastructure for the scheduler
//!
//! Provides:
//! - Prometheus metrics (task outcomes and durations, intervals, health score,
//!   predictions, repairs)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter_vec,
    register_int_gauge, Gauge, GaugeVec, HistogramVec, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for task durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<SchedulerMetricsInner> = OnceLock::new();

struct SchedulerMetricsInner {
    task_executions: IntCounterVec,
    task_duration_seconds: HistogramVec,
    task_interval_minutes: GaugeVec,
    tasks_enabled: IntGauge,
    health_score: Gauge,
    predictions: IntCounterVec,
    repairs: IntCounterVec,
}

impl SchedulerMetricsInner {
    fn new() -> Self {
        Self {
            task_executions: register_int_counter_vec!(
                "autopilot_task_executions_total",
                "Task dispatches by outcome (completed, failed, skipped)",
                &["task", "outcome"]
            )
            .expect("Failed to register task_executions_total"),

            task_duration_seconds: register_histogram_vec!(
                "autopilot_task_duration_seconds",
                "Wall-clock time spent in a task's work unit",
                &["task"],
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register task_duration_seconds"),

            task_interval_minutes: register_gauge_vec!(
                "autopilot_task_interval_minutes",
                "Current (possibly adapted) interval of each task",
                &["task"]
            )
            .expect("Failed to register task_interval_minutes"),

            tasks_enabled: register_int_gauge!(
                "autopilot_tasks_enabled",
                "Number of tasks currently enabled"
            )
            .expect("Failed to register tasks_enabled"),

            health_score: register_gauge!(
                "autopilot_health_score",
                "Most recent composite health score (0-100)"
            )
            .expect("Failed to register health_score"),

            predictions: register_int_counter_vec!(
                "autopilot_predictions_total",
                "Predictions emitted by kind",
                &["kind"]
            )
            .expect("Failed to register predictions_total"),

            repairs: register_int_counter_vec!(
                "autopilot_repairs_total",
                "Auto-repair actions by action and status",
                &["action", "status"]
            )
            .expect("Failed to register repairs_total"),
        }
    }
}

/// Scheduler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct SchedulerMetrics {
    _private: (),
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    /// Create a metrics handle (registers global metrics on first call)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &SchedulerMetricsInner {
        GLOBAL_METRICS.get_or_init(SchedulerMetricsInner::new)
    }

    /// Count one dispatch of `task` with the given outcome label
    pub fn inc_task_execution(&self, task: &str, outcome: &str) {
        self.inner()
            .task_executions
            .with_label_values(&[task, outcome])
            .inc();
    }

    pub fn observe_task_duration(&self, task: &str, duration_secs: f64) {
        self.inner()
            .task_duration_seconds
            .with_label_values(&[task])
            .observe(duration_secs);
    }

    pub fn set_task_interval(&self, task: &str, minutes: f64) {
        self.inner()
            .task_interval_minutes
            .with_label_values(&[task])
            .set(minutes);
    }

    pub fn set_tasks_enabled(&self, count: i64) {
        self.inner().tasks_enabled.set(count);
    }

    pub fn set_health_score(&self, score: f64) {
        self.inner().health_score.set(score);
    }

    pub fn inc_prediction(&self, kind: &str) {
        self.inner().predictions.with_label_values(&[kind]).inc();
    }

    pub fn inc_repair(&self, action: &str, status: &str) {
        self.inner()
            .repairs
            .with_label_values(&[action, status])
            .inc();
    }
}

/// Structured logger for scheduler events
///
/// Consistent, event-tagged records for task dispatches, circuit breaks,
/// predictions and repairs.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Log scheduler startup
    pub fn log_startup(&self, version: &str, tier: &str, tasks: usize) {
        info!(
            event = "scheduler_started",
            host = %self.host,
            version = %version,
            tier = %tier,
            tasks = tasks,
            "Scheduler started"
        );
    }

    /// Log scheduler shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scheduler_stopped",
            host = %self.host,
            reason = %reason,
            "Scheduler stopped"
        );
    }

    pub fn log_task_completed(&self, task: &str, duration_secs: f64, interval_minutes: f64) {
        info!(
            event = "task_executed",
            host = %self.host,
            task = %task,
            duration_secs = duration_secs,
            interval_minutes = interval_minutes,
            "Task completed"
        );
    }

    pub fn log_task_failed(&self, task: &str, error: &str, failures: u64, interval_minutes: f64) {
        warn!(
            event = "task_failed",
            host = %self.host,
            task = %task,
            error = %error,
            failures = failures,
            interval_minutes = interval_minutes,
            "Task failed"
        );
    }

    pub fn log_task_skipped(&self, task: &str, reason: &str) {
        info!(
            event = "task_skipped",
            host = %self.host,
            task = %task,
            reason = %reason,
            "Task skipped"
        );
    }

    /// Log a task being disabled by its circuit breaker
    pub fn log_circuit_open(&self, task: &str, failures: u64, threshold: u32) {
        warn!(
            event = "task_circuit_open",
            host = %self.host,
            task = %task,
            failures = failures,
            threshold = threshold,
            "Task disabled after repeated failures"
        );
    }

    pub fn log_prediction(&self, kind: &str, severity: &str, value: f64, confidence: f64) {
        match severity {
            "critical" => {
                warn!(
                    event = "prediction_emitted",
                    host = %self.host,
                    kind = %kind,
                    severity = %severity,
                    value = value,
                    confidence = confidence,
                    "Critical system issue predicted"
                );
            }
            _ => {
                info!(
                    event = "prediction_emitted",
                    host = %self.host,
                    kind = %kind,
                    severity = %severity,
                    value = value,
                    confidence = confidence,
                    "System issue predicted"
                );
            }
        }
    }

    pub fn log_repair(&self, action: &str, success: bool, description: &str) {
        if success {
            info!(
                event = "repair_completed",
                host = %self.host,
                action = %action,
                description = %description,
                "Repair action succeeded"
            );
        } else {
            warn!(
                event = "repair_completed",
                host = %self.host,
                action = %action,
                description = %description,
                "Repair action failed"
            );
        }
    }
}

/// Hostname used to tag log records
pub fn host_name() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_metrics_observations() {
        // Registration is process-global; repeated handles share it.
        let metrics = SchedulerMetrics::new();
        let again = SchedulerMetrics::new();

        metrics.inc_task_execution("health_check", "completed");
        metrics.observe_task_duration("health_check", 0.02);
        metrics.set_task_interval("health_check", 5.5);
        again.set_tasks_enabled(4);
        again.set_health_score(80.0);
        again.inc_prediction("high_cpu_usage");
        again.inc_repair("temp_cleanup", "success");
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-host");
        assert_eq!(logger.host, "test-host");
    }
}
