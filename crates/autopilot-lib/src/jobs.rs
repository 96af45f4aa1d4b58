//! Built-in maintenance and analysis jobs
//!
//! Each job is a [`Runnable`] over the shared [`HealthEngine`]. The static
//! registry in [`builtin_tasks`] turns them into tasks with tier-scaled
//! intervals, then applies per-task overrides from configuration.

use crate::config::{AppConfig, HardwareTier};
use crate::engine::HealthEngine;
use crate::error::SchedulerError;
use crate::health::components;
use crate::models::Metric;
use crate::scheduler::Scheduler;
use crate::task::{Condition, Runnable, Task, TaskOutput};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

pub const HEALTH_CHECK: &str = "health_check";
pub const PREDICTIVE_ANALYSIS: &str = "predictive_analysis";
pub const AUTO_REPAIR: &str = "auto_repair";
pub const PATTERN_ANALYSIS: &str = "pattern_analysis";
pub const METRICS_RETENTION: &str = "metrics_retention";

/// Patterns seen at least this often with a success rate below
/// [`WEAK_SUCCESS_RATE`] are reported as weak
const WEAK_MIN_FREQUENCY: u64 = 3;
const WEAK_SUCCESS_RATE: f64 = 0.5;

/// Scores host health and reports probe liveness
pub struct HealthCheckJob {
    engine: Arc<HealthEngine>,
}

#[async_trait]
impl Runnable for HealthCheckJob {
    async fn run(&self) -> anyhow::Result<TaskOutput> {
        let registry = self.engine.registry();
        match self.engine.assess().await {
            Ok(breakdown) => {
                if let Some(registry) = registry {
                    registry.set_healthy(components::METRICS_PROBE).await;
                }
                Ok(
                    TaskOutput::new(format!("health score {:.1}", breakdown.score))
                        .with_details(serde_json::to_value(breakdown)?),
                )
            }
            Err(e) => {
                if let Some(registry) = registry {
                    registry
                        .set_unhealthy(components::METRICS_PROBE, e.to_string())
                        .await;
                }
                Err(e.into())
            }
        }
    }
}

pub struct PredictiveAnalysisJob {
    engine: Arc<HealthEngine>,
}

#[async_trait]
impl Runnable for PredictiveAnalysisJob {
    async fn run(&self) -> anyhow::Result<TaskOutput> {
        let predictions = self.engine.predict_system_issues().await?;
        Ok(
            TaskOutput::new(format!("{} issues predicted", predictions.len()))
                .with_details(serde_json::to_value(&predictions)?),
        )
    }
}

/// Fails only when every repair action failed
pub struct AutoRepairJob {
    engine: Arc<HealthEngine>,
}

#[async_trait]
impl Runnable for AutoRepairJob {
    async fn run(&self) -> anyhow::Result<TaskOutput> {
        let outcomes = self.engine.auto_repair_system().await;
        let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();

        if succeeded == 0 && !outcomes.is_empty() {
            let reasons: Vec<_> = outcomes.iter().map(|o| o.description.as_str()).collect();
            anyhow::bail!("all repair actions failed: {}", reasons.join("; "));
        }

        Ok(
            TaskOutput::new(format!("{succeeded}/{} repair actions succeeded", outcomes.len()))
                .with_details(serde_json::to_value(&outcomes)?),
        )
    }
}

/// Summarises stored patterns and flags the ones that mostly fail
pub struct PatternAnalysisJob {
    engine: Arc<HealthEngine>,
}

#[async_trait]
impl Runnable for PatternAnalysisJob {
    async fn run(&self) -> anyhow::Result<TaskOutput> {
        let patterns = self.engine.store().patterns(None)?;
        let weak: Vec<_> = patterns
            .iter()
            .filter(|p| p.frequency >= WEAK_MIN_FREQUENCY && p.success_rate < WEAK_SUCCESS_RATE)
            .collect();

        self.engine
            .record_metric(Metric::new("pattern_count", patterns.len() as f64))
            .await;
        self.engine
            .record_metric(Metric::new("weak_pattern_count", weak.len() as f64))
            .await;

        let details = json!({
            "patterns": patterns.len(),
            "weak": weak
                .iter()
                .map(|p| json!({
                    "kind": p.kind,
                    "payload": p.payload,
                    "frequency": p.frequency,
                    "success_rate": p.success_rate,
                }))
                .collect::<Vec<_>>(),
        });

        Ok(TaskOutput::new(format!(
            "{} patterns, {} weak",
            patterns.len(),
            weak.len()
        ))
        .with_details(details))
    }
}

pub struct MetricsRetentionJob {
    engine: Arc<HealthEngine>,
}

#[async_trait]
impl Runnable for MetricsRetentionJob {
    async fn run(&self) -> anyhow::Result<TaskOutput> {
        // A retention reaching past the earliest timestamp prunes nothing
        let cutoff = Utc::now()
            .checked_sub_signed(self.engine.repair_config().metric_retention())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.engine.store().prune_metrics_before(cutoff)?;
        Ok(TaskOutput::new(format!("pruned {removed} metrics"))
            .with_details(json!({ "removed": removed, "cutoff": cutoff })))
    }
}

struct JobDefinition {
    name: &'static str,
    description: &'static str,
    /// Interval on a standard-tier host
    base_minutes: f64,
    adaptive: bool,
    conditions: Vec<Condition>,
    work: Arc<dyn Runnable>,
}

fn definitions(engine: &Arc<HealthEngine>) -> Vec<JobDefinition> {
    vec![
        JobDefinition {
            name: HEALTH_CHECK,
            description: "Score host health and record resource metrics",
            base_minutes: 5.0,
            adaptive: true,
            conditions: vec![],
            work: Arc::new(HealthCheckJob {
                engine: Arc::clone(engine),
            }),
        },
        JobDefinition {
            name: PREDICTIVE_ANALYSIS,
            description: "Predict resource exhaustion from threshold rules",
            base_minutes: 15.0,
            adaptive: true,
            conditions: vec![Condition::max_cpu_usage(90.0)],
            work: Arc::new(PredictiveAnalysisJob {
                engine: Arc::clone(engine),
            }),
        },
        JobDefinition {
            name: AUTO_REPAIR,
            description: "Clean temp files and compact the knowledge store",
            base_minutes: 60.0,
            adaptive: true,
            conditions: vec![Condition::min_health_score(70.0)],
            work: Arc::new(AutoRepairJob {
                engine: Arc::clone(engine),
            }),
        },
        JobDefinition {
            name: PATTERN_ANALYSIS,
            description: "Summarise recorded patterns and flag weak ones",
            base_minutes: 30.0,
            adaptive: true,
            conditions: vec![Condition::max_cpu_usage(70.0)],
            work: Arc::new(PatternAnalysisJob {
                engine: Arc::clone(engine),
            }),
        },
        JobDefinition {
            name: METRICS_RETENTION,
            description: "Prune metrics past the retention window",
            base_minutes: 1440.0,
            adaptive: false,
            conditions: vec![Condition::max_cpu_usage(50.0)],
            work: Arc::new(MetricsRetentionJob {
                engine: Arc::clone(engine),
            }),
        },
    ]
}

/// Built-in tasks in registration order, seeded from the hardware tier and
/// adjusted by per-task overrides
pub fn builtin_tasks(config: &AppConfig, tier: HardwareTier, engine: &Arc<HealthEngine>) -> Vec<Task> {
    let profile = tier.profile();

    definitions(engine)
        .into_iter()
        .map(|def| {
            let overrides = config.tasks.get(def.name).cloned().unwrap_or_default();
            let interval = overrides
                .interval_minutes
                .unwrap_or(def.base_minutes * profile.interval_scale);

            Task::new(def.name, interval, def.work)
                .with_description(def.description)
                .with_adaptive(overrides.adaptive.unwrap_or(def.adaptive))
                .with_max_failures(overrides.max_failures.unwrap_or(profile.max_failures))
                .with_breaker(config.scheduler.breaker)
                .with_enabled(overrides.enabled.unwrap_or(true))
                .with_conditions(overrides.conditions.unwrap_or(def.conditions))
        })
        .collect()
}

/// Register every built-in task with `scheduler`
pub async fn register_builtin_tasks(
    scheduler: &Scheduler,
    config: &AppConfig,
    tier: HardwareTier,
    engine: &Arc<HealthEngine>,
) -> Result<usize, SchedulerError> {
    let tasks = builtin_tasks(config, tier, engine);
    let count = tasks.len();
    for task in tasks {
        scheduler.register_task(task).await?;
    }
    info!(tier = %tier, tasks = count, "Registered built-in tasks");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerPolicy, TaskOverride};
    use crate::probe::StaticProbe;
    use crate::store::KnowledgeStore;

    fn engine(probe: StaticProbe) -> Arc<HealthEngine> {
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        Arc::new(HealthEngine::new(Arc::new(probe), store, &AppConfig::default()))
    }

    #[test]
    fn test_registry_order_and_standard_intervals() {
        let tasks = builtin_tasks(
            &AppConfig::default(),
            HardwareTier::Standard,
            &engine(StaticProbe::healthy()),
        );
        let summary: Vec<_> = tasks
            .iter()
            .map(|t| (t.name(), t.declared_interval(), t.is_adaptive()))
            .collect();

        assert_eq!(
            summary,
            [
                (HEALTH_CHECK, 5.0, true),
                (PREDICTIVE_ANALYSIS, 15.0, true),
                (AUTO_REPAIR, 60.0, true),
                (PATTERN_ANALYSIS, 30.0, true),
                (METRICS_RETENTION, 1440.0, false),
            ]
        );
        assert!(tasks.iter().all(|t| t.max_failures() == 5));
    }

    #[test]
    fn test_low_tier_scales_and_overrides_win() {
        let mut config = AppConfig::default();
        config.scheduler.breaker = BreakerPolicy::Consecutive;
        config.tasks.insert(
            AUTO_REPAIR.to_string(),
            TaskOverride {
                interval_minutes: Some(10.0),
                enabled: Some(false),
                max_failures: Some(9),
                conditions: Some(vec![]),
                ..TaskOverride::default()
            },
        );

        let tasks = builtin_tasks(&config, HardwareTier::Low, &engine(StaticProbe::healthy()));

        assert_eq!(tasks[0].declared_interval(), 10.0);
        assert_eq!(tasks[0].max_failures(), 3);
        let repair = &tasks[2];
        assert_eq!(repair.declared_interval(), 10.0);
        assert_eq!(repair.max_failures(), 9);
        assert!(!repair.is_enabled());
        assert!(repair.stats().conditions.is_empty());
    }

    #[tokio::test]
    async fn test_health_check_job_reports_score() {
        let output = HealthCheckJob {
            engine: engine(StaticProbe::new(85.0, 50.0, 50.0, true)),
        }
        .run()
        .await
        .unwrap();

        assert_eq!(output.summary, "health score 80.0");
        assert_eq!(output.details["cpu_penalty"], 20.0);
    }

    #[tokio::test]
    async fn test_health_check_job_fails_on_probe_error() {
        let job = HealthCheckJob {
            engine: engine(StaticProbe::failing()),
        };
        assert!(job.run().await.is_err());
    }

    #[tokio::test]
    async fn test_pattern_analysis_flags_weak_patterns() {
        let engine = engine(StaticProbe::healthy());
        let flaky = json!({"task": "auto_repair"});
        for _ in 0..3 {
            engine.record_pattern("task_outcome", &flaky, false).unwrap();
        }
        engine
            .record_pattern("task_outcome", &json!({"task": "health_check"}), true)
            .unwrap();

        let output = PatternAnalysisJob {
            engine: Arc::clone(&engine),
        }
        .run()
        .await
        .unwrap();

        assert_eq!(output.summary, "2 patterns, 1 weak");
        assert_eq!(output.details["weak"][0]["payload"], flaky);
        let weak = engine.store().recent_metrics("weak_pattern_count", 1).unwrap();
        assert_eq!(weak[0].value, 1.0);
    }

    #[tokio::test]
    async fn test_metrics_retention_prunes_old_rows() {
        let engine = engine(StaticProbe::healthy());
        let mut old = Metric::new("cpu_percent", 10.0);
        old.timestamp = Utc::now() - chrono::Duration::days(90);
        engine.store().insert_metric(&old).unwrap();
        engine
            .store()
            .insert_metric(&Metric::new("cpu_percent", 20.0))
            .unwrap();

        let output = MetricsRetentionJob {
            engine: Arc::clone(&engine),
        }
        .run()
        .await
        .unwrap();

        assert_eq!(output.summary, "pruned 1 metrics");
        assert_eq!(engine.store().counts().unwrap().metrics, 1);
    }

    #[tokio::test]
    async fn test_unbounded_retention_prunes_nothing() {
        let mut config = AppConfig::default();
        config.repair.metric_retention_days = u64::MAX;
        let store = Arc::new(KnowledgeStore::open_in_memory().unwrap());
        let engine = Arc::new(HealthEngine::new(Arc::new(StaticProbe::healthy()), store, &config));
        let mut old = Metric::new("cpu_percent", 10.0);
        old.timestamp = Utc::now() - chrono::Duration::days(3650);
        engine.store().insert_metric(&old).unwrap();

        let output = MetricsRetentionJob {
            engine: Arc::clone(&engine),
        }
        .run()
        .await
        .unwrap();

        assert_eq!(output.summary, "pruned 0 metrics");
        assert_eq!(engine.store().counts().unwrap().metrics, 1);
    }
}
