//! Wiring of probe, store, engine and scheduler from configuration

use anyhow::{Context, Result};
use autopilot_lib::{
    health::{components, HealthRegistry},
    jobs::register_builtin_tasks,
    observability::host_name,
    AppConfig, HardwareTier, HealthEngine, KnowledgeStore, Scheduler, SchedulerMetrics,
    StructuredLogger, SysinfoProbe,
};
use std::sync::Arc;
use tracing::info;

pub struct Runtime {
    pub tier: HardwareTier,
    pub registry: HealthRegistry,
    pub logger: StructuredLogger,
    pub scheduler: Scheduler,
}

impl Runtime {
    /// Open the knowledge store and register every built-in task
    pub async fn build(config: &AppConfig) -> Result<Self> {
        let store_path = config.store_path();
        let store = KnowledgeStore::open(&store_path).with_context(|| {
            format!("Failed to open knowledge store at {}", store_path.display())
        })?;

        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.register(components::KNOWLEDGE_STORE).await;
        registry.register(components::METRICS_PROBE).await;

        let metrics = SchedulerMetrics::new();
        let logger = StructuredLogger::new(host_name());

        let engine = Arc::new(
            HealthEngine::new(
                Arc::new(SysinfoProbe::new(&config.probe)),
                Arc::new(store),
                config,
            )
            .with_registry(registry.clone())
            .with_metrics(metrics.clone())
            .with_logger(logger.clone()),
        );

        let scheduler = Scheduler::builder(engine.clone())
            .settings(config.scheduler.clone())
            .recorder(engine.clone())
            .metrics(metrics)
            .logger(logger.clone())
            .registry(registry.clone())
            .build();

        let tier = config.resolved_tier();
        register_builtin_tasks(&scheduler, config, tier, &engine).await?;
        info!(tier = %tier, store = %store_path.display(), "Runtime ready");

        Ok(Self {
            tier,
            registry,
            logger,
            scheduler,
        })
    }
}
