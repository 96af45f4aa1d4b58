//! Scheduled unit of work with adaptive interval and circuit breaker
//!
//! A [`Task`] wraps one [`Runnable`] together with its execution history.
//! Successful runs of an adaptive task stretch its interval (up to twice the
//! declared value) once its success rate is above 90%; failures shrink it
//! (down to half). Reaching the failure threshold disables the task until
//! it is explicitly re-enabled.

mod condition;
mod result;

pub use condition::{Condition, ConditionCheck, ConditionKind, HealthOracle};
pub use result::{ExecutionResult, SkipReason, TaskStats};

use crate::config::BreakerPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Lower bound on any declared interval (one second)
const MIN_INTERVAL_MINUTES: f64 = 1.0 / 60.0;

/// Success rate above which an adaptive interval grows
const STRETCH_SUCCESS_RATE: f64 = 0.9;
const STRETCH_FACTOR: f64 = 1.1;
const SHRINK_FACTOR: f64 = 0.8;

/// What a work unit reports on success
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub summary: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl TaskOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// A schedulable unit of work
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn run(&self) -> anyhow::Result<TaskOutput>;
}

pub struct Task {
    name: String,
    description: String,
    work: Arc<dyn Runnable>,
    declared_interval: f64,
    current_interval: f64,
    adaptive: bool,
    max_failures: u32,
    breaker: BreakerPolicy,
    enabled: bool,
    conditions: Vec<Condition>,

    executions: u64,
    successes: u64,
    failures: u64,
    consecutive_failures: u64,
    avg_duration_secs: f64,
    last_execution: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("current_interval", &self.current_interval)
            .field("executions", &self.executions)
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Enabled, non-adaptive task with a failure threshold of 5
    pub fn new(
        name: impl Into<String>,
        interval_minutes: f64,
        work: Arc<dyn Runnable>,
    ) -> Self {
        let declared = interval_minutes.max(MIN_INTERVAL_MINUTES);
        Self {
            name: name.into(),
            description: String::new(),
            work,
            declared_interval: declared,
            current_interval: declared,
            adaptive: false,
            max_failures: 5,
            breaker: BreakerPolicy::default(),
            enabled: true,
            conditions: Vec::new(),
            executions: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            avg_duration_secs: 0.0,
            last_execution: None,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerPolicy) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    pub fn declared_interval(&self) -> f64 {
        self.declared_interval
    }

    pub fn current_interval(&self) -> f64 {
        self.current_interval
    }

    /// Delay until the next dispatch: the adapted interval for adaptive
    /// tasks, the declared one otherwise
    pub fn next_delay(&self) -> Duration {
        let minutes = if self.adaptive {
            self.current_interval
        } else {
            self.declared_interval
        };
        Duration::from_secs_f64(minutes * 60.0)
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.executions > 0).then(|| self.successes as f64 / self.executions as f64)
    }

    /// Re-enable after a manual or breaker disable. Counters are kept.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub async fn should_execute(&self, oracle: &dyn HealthOracle) -> bool {
        self.gate(oracle).await.is_none()
    }

    /// First reason this task may not run right now.
    ///
    /// A condition whose live value cannot be read counts as satisfied.
    async fn gate(&self, oracle: &dyn HealthOracle) -> Option<SkipReason> {
        if !self.enabled {
            return Some(SkipReason::Disabled);
        }

        for condition in &self.conditions {
            match condition.check(oracle).await {
                ConditionCheck::Met => {}
                ConditionCheck::Blocked { observed } => {
                    return Some(SkipReason::ConditionNotMet {
                        condition: condition.kind,
                        threshold: condition.threshold,
                        observed,
                    });
                }
                ConditionCheck::Unavailable(e) => {
                    warn!(
                        task = %self.name,
                        condition = %condition.kind,
                        error = %e,
                        "Condition could not be evaluated, treating as satisfied"
                    );
                }
            }
        }

        None
    }

    /// Run the work unit if the gate allows it and fold the outcome into the
    /// task's statistics.
    ///
    /// Dropping the returned future mid-run leaves the work unit running
    /// detached with its execution counted but no outcome recorded. Callers
    /// that may be cancelled go through [`Scheduler::execute_now`], which
    /// drives this to completion on its own task.
    ///
    /// [`Scheduler::execute_now`]: crate::scheduler::Scheduler::execute_now
    pub async fn execute(&mut self, oracle: &dyn HealthOracle) -> ExecutionResult {
        if let Some(reason) = self.gate(oracle).await {
            debug!(task = %self.name, reason = %reason, "Task skipped");
            return ExecutionResult::Skipped {
                task: self.name.clone(),
                reason,
            };
        }

        self.executions += 1;
        self.last_execution = Some(Utc::now());

        let started = tokio::time::Instant::now();
        let work = Arc::clone(&self.work);
        // A panicking work unit surfaces as a join error instead of unwinding
        // through the dispatch loop.
        let outcome = match tokio::spawn(async move { work.run().await }).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("work unit panicked: {e}")),
        };
        let duration_secs = started.elapsed().as_secs_f64();

        match outcome {
            Ok(output) => {
                self.record_success(duration_secs);
                ExecutionResult::Completed {
                    task: self.name.clone(),
                    output,
                    duration_secs,
                }
            }
            Err(e) => {
                let error = format!("{e:#}");
                let circuit_open = self.record_failure(&error);
                ExecutionResult::Failed {
                    task: self.name.clone(),
                    error,
                    duration_secs,
                    circuit_open,
                }
            }
        }
    }

    fn record_success(&mut self, duration_secs: f64) {
        self.successes += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
        let n = self.successes as f64;
        self.avg_duration_secs = (self.avg_duration_secs * (n - 1.0) + duration_secs) / n;
        self.adjust_interval(true);
    }

    /// Returns true when this failure tripped the breaker
    fn record_failure(&mut self, error: &str) -> bool {
        self.failures += 1;
        self.consecutive_failures += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());
        self.adjust_interval(false);

        let counted = match self.breaker {
            BreakerPolicy::Lifetime => self.failures,
            BreakerPolicy::Consecutive => self.consecutive_failures,
        };
        if counted >= u64::from(self.max_failures) {
            self.enabled = false;
            true
        } else {
            false
        }
    }

    /// Stretch or shrink the current interval within
    /// `[0.5, 2.0] x declared`. No-op for non-adaptive tasks.
    pub fn adjust_interval(&mut self, success: bool) {
        if !self.adaptive {
            return;
        }

        let floor = self.declared_interval * 0.5;
        let cap = self.declared_interval * 2.0;

        if success {
            if self.success_rate().unwrap_or(0.0) > STRETCH_SUCCESS_RATE {
                self.current_interval = (self.current_interval * STRETCH_FACTOR).min(cap);
            }
        } else {
            self.current_interval = (self.current_interval * SHRINK_FACTOR).max(floor);
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            adaptive: self.adaptive,
            declared_interval_minutes: self.declared_interval,
            current_interval_minutes: self.current_interval,
            max_failures: self.max_failures,
            executions: self.executions,
            successes: self.successes,
            failures: self.failures,
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate(),
            avg_duration_secs: self.avg_duration_secs,
            last_execution: self.last_execution,
            last_success: self.last_success,
            last_failure: self.last_failure,
            last_error: self.last_error.clone(),
            conditions: self.conditions.clone(),
            next_run_in_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Succeeds or fails according to a switch, counting invocations
    struct Switch {
        fail: AtomicBool,
        runs: AtomicUsize,
    }

    impl Switch {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(fail),
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Runnable for Switch {
        async fn run(&self) -> anyhow::Result<TaskOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("boom");
            }
            Ok(TaskOutput::new("ok"))
        }
    }

    struct Panics;

    #[async_trait]
    impl Runnable for Panics {
        async fn run(&self) -> anyhow::Result<TaskOutput> {
            panic!("work unit exploded");
        }
    }

    struct Oracle {
        score: Option<f64>,
        cpu: Option<f64>,
    }

    impl Oracle {
        fn calm() -> Self {
            Self {
                score: Some(100.0),
                cpu: Some(5.0),
            }
        }
    }

    #[async_trait]
    impl HealthOracle for Oracle {
        async fn health_score(&self) -> Result<f64, ProbeError> {
            self.score.ok_or_else(|| ProbeError::Cpu("probe down".into()))
        }

        async fn cpu_usage(&self) -> Result<f64, ProbeError> {
            self.cpu.ok_or_else(|| ProbeError::Cpu("probe down".into()))
        }
    }

    #[tokio::test]
    async fn test_non_adaptive_interval_is_fixed() {
        let work = Switch::new(false);
        let mut task = Task::new("retention", 60.0, work.clone());

        for _ in 0..10 {
            assert!(task.execute(&Oracle::calm()).await.is_success());
        }

        assert_eq!(task.current_interval(), 60.0);
        assert_eq!(task.successes(), 10);
        assert_eq!(work.runs.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_adaptive_interval_stretches_on_success() {
        let mut task = Task::new("analysis", 30.0, Switch::new(false)).with_adaptive(true);

        for _ in 0..5 {
            task.execute(&Oracle::calm()).await;
        }

        let expected = 30.0 * 1.1_f64.powi(5);
        assert!((task.current_interval() - expected).abs() < 1e-9);
        assert!((task.current_interval() - 48.3).abs() < 0.05);

        for _ in 0..10 {
            task.execute(&Oracle::calm()).await;
        }
        assert_eq!(task.current_interval(), 60.0);
    }

    #[tokio::test]
    async fn test_breaker_disables_after_threshold() {
        let work = Switch::new(true);
        let mut task = Task::new("repair", 100.0, work.clone())
            .with_adaptive(true)
            .with_max_failures(3);

        let results = [
            task.execute(&Oracle::calm()).await,
            task.execute(&Oracle::calm()).await,
            task.execute(&Oracle::calm()).await,
        ];
        assert!(matches!(
            results[2],
            ExecutionResult::Failed { circuit_open: true, .. }
        ));
        assert!(matches!(
            results[1],
            ExecutionResult::Failed { circuit_open: false, .. }
        ));
        assert!(!task.is_enabled());

        let fourth = task.execute(&Oracle::calm()).await;
        assert_eq!(
            fourth,
            ExecutionResult::Skipped {
                task: "repair".to_string(),
                reason: SkipReason::Disabled,
            }
        );
        assert_eq!(task.executions(), 3);
        assert_eq!(work.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failures_shrink_to_floor() {
        let mut task = Task::new("flaky", 100.0, Switch::new(true))
            .with_adaptive(true)
            .with_max_failures(100);

        for _ in 0..10 {
            task.execute(&Oracle::calm()).await;
        }
        assert_eq!(task.current_interval(), 50.0);
    }

    #[tokio::test]
    async fn test_reenabled_task_at_threshold_trips_on_next_failure() {
        let work = Switch::new(true);
        let mut task = Task::new("repair", 10.0, work.clone()).with_max_failures(2);

        task.execute(&Oracle::calm()).await;
        task.execute(&Oracle::calm()).await;
        assert!(!task.is_enabled());

        task.enable();
        assert_eq!(task.failures(), 2);
        let result = task.execute(&Oracle::calm()).await;
        assert!(matches!(
            result,
            ExecutionResult::Failed { circuit_open: true, .. }
        ));
        assert!(!task.is_enabled());
    }

    #[tokio::test]
    async fn test_consecutive_policy_resets_on_success() {
        let work = Switch::new(true);
        let mut task = Task::new("flaky", 10.0, work.clone())
            .with_max_failures(2)
            .with_breaker(BreakerPolicy::Consecutive);

        task.execute(&Oracle::calm()).await;
        work.fail.store(false, Ordering::SeqCst);
        task.execute(&Oracle::calm()).await;
        work.fail.store(true, Ordering::SeqCst);
        task.execute(&Oracle::calm()).await;

        assert_eq!(task.failures(), 2);
        assert_eq!(task.consecutive_failures(), 1);
        assert!(task.is_enabled());

        task.execute(&Oracle::calm()).await;
        assert!(!task.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_task_never_executes() {
        let oracle = Oracle {
            score: Some(0.0),
            cpu: Some(0.0),
        };
        let task = Task::new("idle", 5.0, Switch::new(false))
            .with_condition(Condition::min_health_score(70.0))
            .with_enabled(false);

        assert!(!task.should_execute(&oracle).await);
    }

    #[tokio::test]
    async fn test_unmet_condition_skips_without_side_effects() {
        let work = Switch::new(false);
        let mut task = Task::new("repair", 60.0, work.clone())
            .with_adaptive(true)
            .with_condition(Condition::min_health_score(70.0));

        let result = task.execute(&Oracle::calm()).await;
        match result {
            ExecutionResult::Skipped {
                reason:
                    SkipReason::ConditionNotMet {
                        condition,
                        observed,
                        ..
                    },
                ..
            } => {
                assert_eq!(condition, ConditionKind::MinHealthScore);
                assert_eq!(observed, 100.0);
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(task.executions(), 0);
        assert_eq!(task.current_interval(), 60.0);
        assert_eq!(work.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreadable_condition_fails_open() {
        let oracle = Oracle {
            score: None,
            cpu: None,
        };
        let mut task = Task::new("analysis", 15.0, Switch::new(false))
            .with_condition(Condition::max_cpu_usage(10.0))
            .with_condition(Condition::min_health_score(70.0));

        assert!(task.should_execute(&oracle).await);
        assert!(task.execute(&oracle).await.is_success());
    }

    #[tokio::test]
    async fn test_panicking_work_unit_is_a_failure() {
        let mut task = Task::new("bad", 5.0, Arc::new(Panics));
        let result = task.execute(&Oracle::calm()).await;

        match result {
            ExecutionResult::Failed { error, .. } => assert!(error.contains("panicked")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(task.failures(), 1);
    }

    #[tokio::test]
    async fn test_interval_bounds_hold_under_mixed_outcomes() {
        let work = Switch::new(false);
        let mut task = Task::new("mixed", 20.0, work.clone())
            .with_adaptive(true)
            .with_max_failures(u32::MAX);

        for i in 0..200u32 {
            work.fail.store(i % 7 == 0 || i % 11 == 0, Ordering::SeqCst);
            task.execute(&Oracle::calm()).await;
            assert!(task.current_interval() >= 10.0);
            assert!(task.current_interval() <= 40.0);
            let rate = task.success_rate().unwrap();
            assert!((0.0..=1.0).contains(&rate));
        }
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let mut task = Task::new("health_check", 5.0, Switch::new(false))
            .with_description("Score host health")
            .with_adaptive(true);
        task.execute(&Oracle::calm()).await;

        let stats = task.stats();
        assert_eq!(stats.name, "health_check");
        assert_eq!(stats.description, "Score host health");
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.success_rate, Some(1.0));
        assert!(stats.last_success.is_some());
        assert!(stats.last_failure.is_none());
        assert!(stats.next_run_in_secs.is_none());
    }
}
