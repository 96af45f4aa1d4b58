//! Health & prediction engine
//!
//! Scores host health from the metrics probe, emits threshold predictions
//! and runs the auto-repair menu. Every output is written to the knowledge
//! store; store failures are logged and never fail the calling operation.

mod prediction;
mod repair;
mod scoring;

pub use prediction::evaluate_predictions;
pub use repair::{cleanup_temp_files, CleanupReport};
pub use scoring::{score_snapshot, HealthBreakdown, MAX_SCORE};

use crate::config::{AppConfig, HealthConfig, PredictionRules, RepairConfig};
use crate::error::{ProbeError, StoreError};
use crate::health::{components, HealthRegistry};
use crate::models::{Metric, Pattern, Prediction, RepairKind, RepairOutcome, SystemSnapshot};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::probe::MetricsProbe;
use crate::store::KnowledgeStore;
use crate::task::HealthOracle;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Pattern kind recorded for every auto-repair action
pub const REPAIR_PATTERN_KIND: &str = "auto_repair";

pub struct HealthEngine {
    probe: Arc<dyn MetricsProbe>,
    store: Arc<KnowledgeStore>,
    health: HealthConfig,
    rules: PredictionRules,
    repair: RepairConfig,
    registry: Option<HealthRegistry>,
    metrics: Option<SchedulerMetrics>,
    logger: Option<StructuredLogger>,
}

impl HealthEngine {
    pub fn new(
        probe: Arc<dyn MetricsProbe>,
        store: Arc<KnowledgeStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            probe,
            store,
            health: config.health.clone(),
            rules: config.prediction.clone(),
            repair: config.repair.clone(),
            registry: None,
            metrics: None,
            logger: None,
        }
    }

    /// Report store failures to a component registry
    pub fn with_registry(mut self, registry: HealthRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_metrics(mut self, metrics: SchedulerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    pub fn repair_config(&self) -> &RepairConfig {
        &self.repair
    }

    pub fn registry(&self) -> Option<&HealthRegistry> {
        self.registry.as_ref()
    }

    pub async fn snapshot(&self) -> Result<SystemSnapshot, ProbeError> {
        self.probe.snapshot().await
    }

    /// Sample the probe, score it and record the readings
    pub async fn assess(&self) -> Result<HealthBreakdown, ProbeError> {
        let snapshot = self.probe.snapshot().await?;
        let breakdown = score_snapshot(&snapshot, &self.health);

        let context = serde_json::to_string(&breakdown).ok();
        let mut score_metric = Metric::new("health_score", breakdown.score);
        score_metric.context = context;

        for metric in [
            Metric::new("cpu_percent", snapshot.cpu_percent),
            Metric::new("memory_percent", snapshot.memory_percent),
            Metric::new("disk_percent", snapshot.disk_percent),
            score_metric,
        ] {
            let result = self.store.insert_metric(&metric).map(|_| ());
            self.note_store_result("insert_metric", result).await;
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_health_score(breakdown.score);
        }
        debug!(score = breakdown.score, "Health assessed");
        Ok(breakdown)
    }

    /// Composite health score in `[0, 100]`
    pub async fn calculate_health_score(&self) -> Result<f64, ProbeError> {
        Ok(self.assess().await?.score)
    }

    /// Evaluate prediction rules against a fresh sample and persist every hit
    /// before returning it
    pub async fn predict_system_issues(&self) -> Result<Vec<Prediction>, ProbeError> {
        let snapshot = self.probe.snapshot().await?;
        let mut predictions = evaluate_predictions(&snapshot, &self.rules);

        for prediction in &mut predictions {
            match self.store.insert_prediction(prediction) {
                Ok(id) => {
                    prediction.id = Some(id);
                    self.note_store_result("insert_prediction", Ok(())).await;
                }
                Err(e) => self.note_store_result("insert_prediction", Err(e)).await,
            }

            let value = prediction.payload["value"].as_f64().unwrap_or_default();
            let severity = prediction.payload["severity"].as_str().unwrap_or("warning");
            if let Some(metrics) = &self.metrics {
                metrics.inc_prediction(&prediction.kind);
            }
            if let Some(logger) = &self.logger {
                logger.log_prediction(&prediction.kind, severity, value, prediction.confidence);
            }
        }

        Ok(predictions)
    }

    /// Run every repair action in order; one failing never stops the rest
    pub async fn auto_repair_system(&self) -> Vec<RepairOutcome> {
        let outcomes = vec![
            self.clean_temp_files().await,
            self.optimize_store().await,
            self.checkpoint_wal().await,
        ];

        for outcome in &outcomes {
            let action = outcome.repair_type.as_str();
            let result = self
                .record_pattern(REPAIR_PATTERN_KIND, &json!({ "action": action }), outcome.succeeded())
                .map(|_| ());
            self.note_store_result("upsert_pattern", result).await;

            if let Some(metrics) = &self.metrics {
                let status = if outcome.succeeded() { "success" } else { "failed" };
                metrics.inc_repair(action, status);
            }
            if let Some(logger) = &self.logger {
                logger.log_repair(action, outcome.succeeded(), &outcome.description);
            }
        }

        outcomes
    }

    async fn clean_temp_files(&self) -> RepairOutcome {
        let dir = self.repair.temp_dir.clone();
        let prefix = self.repair.temp_prefix.clone();
        let max_age = self.repair.temp_max_age();

        let joined = tokio::task::spawn_blocking(move || {
            cleanup_temp_files(&dir, &prefix, max_age, SystemTime::now())
        })
        .await;

        match joined {
            Ok(Ok(report)) if report.errors == 0 => RepairOutcome::success(
                RepairKind::TempCleanup,
                format!("removed {} stale temp files ({} bytes)", report.removed, report.bytes),
            ),
            Ok(Ok(report)) => RepairOutcome::failed(
                RepairKind::TempCleanup,
                format!(
                    "removed {} stale temp files, {} could not be removed",
                    report.removed, report.errors
                ),
            ),
            Ok(Err(e)) => RepairOutcome::failed(
                RepairKind::TempCleanup,
                format!("cannot scan {}: {e}", self.repair.temp_dir.display()),
            ),
            Err(e) => RepairOutcome::failed(RepairKind::TempCleanup, format!("cleanup aborted: {e}")),
        }
    }

    async fn optimize_store(&self) -> RepairOutcome {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.optimize()).await {
            Ok(Ok(())) => RepairOutcome::success(
                RepairKind::StoreOptimization,
                "knowledge store analyzed and vacuumed",
            ),
            Ok(Err(e)) => {
                RepairOutcome::failed(RepairKind::StoreOptimization, format!("optimize failed: {e}"))
            }
            Err(e) => RepairOutcome::failed(
                RepairKind::StoreOptimization,
                format!("optimize aborted: {e}"),
            ),
        }
    }

    /// Known issue: the write-ahead log grows without bound under a
    /// long-lived connection unless it is checkpointed.
    async fn checkpoint_wal(&self) -> RepairOutcome {
        let store = Arc::clone(&self.store);
        let joined = match tokio::task::spawn_blocking(move || store.checkpoint_wal()).await {
            Ok(result) => result,
            Err(e) => {
                return RepairOutcome::failed(
                    RepairKind::WalCheckpoint,
                    format!("checkpoint aborted: {e}"),
                )
            }
        };

        match joined {
            Ok(stats) if stats.log_frames < 0 => RepairOutcome::success(
                RepairKind::WalCheckpoint,
                "store is not in WAL mode, nothing to checkpoint",
            ),
            Ok(stats) if stats.busy != 0 => RepairOutcome::failed(
                RepairKind::WalCheckpoint,
                format!(
                    "checkpoint blocked, {} of {} frames written",
                    stats.checkpointed_frames, stats.log_frames
                ),
            ),
            Ok(stats) => RepairOutcome::success(
                RepairKind::WalCheckpoint,
                format!("checkpointed {} WAL frames", stats.checkpointed_frames),
            ),
            Err(e) => {
                RepairOutcome::failed(RepairKind::WalCheckpoint, format!("checkpoint failed: {e}"))
            }
        }
    }

    /// Record one observation of `(kind, payload)`
    pub fn record_pattern(
        &self,
        kind: &str,
        payload: &serde_json::Value,
        success: bool,
    ) -> Result<Pattern, StoreError> {
        self.store.upsert_pattern(kind, payload, success)
    }

    /// Append a metric, logging and discarding store failures
    pub async fn record_metric(&self, metric: Metric) {
        let result = self.store.insert_metric(&metric).map(|_| ());
        self.note_store_result("insert_metric", result).await;
    }

    async fn note_store_result(&self, operation: &str, result: Result<(), StoreError>) {
        match result {
            Ok(()) => {
                if let Some(registry) = &self.registry {
                    registry.set_healthy(components::KNOWLEDGE_STORE).await;
                }
            }
            Err(e) => {
                warn!(operation = %operation, error = %e, "Knowledge store write failed");
                if let Some(registry) = &self.registry {
                    registry
                        .set_degraded(components::KNOWLEDGE_STORE, format!("{operation}: {e}"))
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl HealthOracle for HealthEngine {
    /// Scored without recording, so gating does not write to the store
    async fn health_score(&self) -> Result<f64, ProbeError> {
        let snapshot = self.probe.snapshot().await?;
        Ok(score_snapshot(&snapshot, &self.health).score)
    }

    async fn cpu_usage(&self) -> Result<f64, ProbeError> {
        self.probe.cpu_percent().await
    }
}
