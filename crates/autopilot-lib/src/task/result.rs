//! Execution results and stats snapshots

use super::condition::{Condition, ConditionKind};
use super::TaskOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a dispatch did not run the work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    ConditionNotMet {
        condition: ConditionKind,
        threshold: f64,
        observed: f64,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "disabled"),
            SkipReason::ConditionNotMet {
                condition,
                threshold,
                observed,
            } => write!(f, "{condition} not met (observed {observed:.1}, threshold {threshold:.1})"),
        }
    }
}

/// Outcome of one `Task::execute` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Completed {
        task: String,
        output: TaskOutput,
        duration_secs: f64,
    },
    Failed {
        task: String,
        error: String,
        duration_secs: f64,
        /// The failure tripped the circuit breaker
        circuit_open: bool,
    },
    Skipped {
        task: String,
        reason: SkipReason,
    },
}

impl ExecutionResult {
    pub fn task(&self) -> &str {
        match self {
            ExecutionResult::Completed { task, .. }
            | ExecutionResult::Failed { task, .. }
            | ExecutionResult::Skipped { task, .. } => task,
        }
    }

    /// Metric label for this outcome
    pub fn outcome(&self) -> &'static str {
        match self {
            ExecutionResult::Completed { .. } => "completed",
            ExecutionResult::Failed { .. } => "failed",
            ExecutionResult::Skipped { .. } => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Completed { .. })
    }

    pub fn duration_secs(&self) -> Option<f64> {
        match self {
            ExecutionResult::Completed { duration_secs, .. }
            | ExecutionResult::Failed { duration_secs, .. } => Some(*duration_secs),
            ExecutionResult::Skipped { .. } => None,
        }
    }
}

/// Read-only snapshot of a task's counters and timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub adaptive: bool,
    pub declared_interval_minutes: f64,
    pub current_interval_minutes: f64,
    pub max_failures: u32,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    /// `successes / executions`, absent before the first run
    pub success_rate: Option<f64>,
    pub avg_duration_secs: f64,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub conditions: Vec<Condition>,
    /// Seconds until the next scheduled dispatch, when one is pending
    #[serde(default)]
    pub next_run_in_secs: Option<f64>,
}
