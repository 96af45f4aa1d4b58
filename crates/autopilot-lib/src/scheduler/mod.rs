//! Task scheduler
//!
//! Owns the registered tasks and runs a single dispatch loop: every tick,
//! each task whose schedule entry is due is dispatched sequentially, in
//! registration order, then re-inserted at its next delay. Control
//! operations (`enable`, `disable`, `execute_now`) take the same per-task
//! lock as the loop.

mod queue;

pub use queue::ScheduleQueue;

use crate::config::SchedulerSettings;
use crate::engine::HealthEngine;
use crate::error::SchedulerError;
use crate::health::{components, HealthRegistry};
use crate::observability::{SchedulerMetrics, StructuredLogger};
use crate::task::{ExecutionResult, HealthOracle, Task, TaskStats};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pattern kind recorded for every non-skipped dispatch
pub const OUTCOME_PATTERN_KIND: &str = "task_outcome";

/// Snapshot of the scheduler and every task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub tasks: Vec<TaskStats>,
}

struct TaskSlot {
    name: String,
    task: Arc<Mutex<Task>>,
}

struct LoopControl {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Task state captured under the task lock for post-dispatch reporting
struct DispatchInfo {
    interval_minutes: f64,
    failures: u64,
    max_failures: u32,
}

struct SchedulerInner {
    tasks: RwLock<Vec<TaskSlot>>,
    queue: std::sync::Mutex<ScheduleQueue>,
    oracle: Arc<dyn HealthOracle>,
    recorder: Option<Arc<HealthEngine>>,
    settings: SchedulerSettings,
    running: AtomicBool,
    control: Mutex<Option<LoopControl>>,
    in_flight: std::sync::Mutex<Option<String>>,
    metrics: Option<SchedulerMetrics>,
    logger: Option<StructuredLogger>,
    registry: Option<HealthRegistry>,
}

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    oracle: Arc<dyn HealthOracle>,
    settings: SchedulerSettings,
    recorder: Option<Arc<HealthEngine>>,
    metrics: Option<SchedulerMetrics>,
    logger: Option<StructuredLogger>,
    registry: Option<HealthRegistry>,
}

impl SchedulerBuilder {
    pub fn settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Record dispatch outcomes as patterns through this engine when
    /// `record_outcomes` is set
    pub fn recorder(mut self, engine: Arc<HealthEngine>) -> Self {
        self.recorder = Some(engine);
        self
    }

    pub fn metrics(mut self, metrics: SchedulerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn registry(mut self, registry: HealthRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                tasks: RwLock::new(Vec::new()),
                queue: std::sync::Mutex::new(ScheduleQueue::new()),
                oracle: self.oracle,
                recorder: self.recorder,
                settings: self.settings,
                running: AtomicBool::new(false),
                control: Mutex::new(None),
                in_flight: std::sync::Mutex::new(None),
                metrics: self.metrics,
                logger: self.logger,
                registry: self.registry,
            }),
        }
    }
}

/// Cheap to clone; clones share the same tasks and loop
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn builder(oracle: Arc<dyn HealthOracle>) -> SchedulerBuilder {
        SchedulerBuilder {
            oracle,
            settings: SchedulerSettings::default(),
            recorder: None,
            metrics: None,
            logger: None,
            registry: None,
        }
    }

    pub fn new(oracle: Arc<dyn HealthOracle>, settings: SchedulerSettings) -> Self {
        Self::builder(oracle).settings(settings).build()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Add a task. Names must be unique.
    ///
    /// A task registered while the scheduler runs gets its first dispatch
    /// scheduled immediately.
    pub async fn register_task(&self, task: Task) -> Result<(), SchedulerError> {
        let mut tasks = self.inner.tasks.write().await;
        if tasks.iter().any(|slot| slot.name == task.name()) {
            return Err(SchedulerError::DuplicateTask(task.name().to_string()));
        }

        let name = task.name().to_string();
        let order = tasks.len();
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_task_interval(&name, task.current_interval());
        }
        if self.is_running() && task.is_enabled() {
            self.inner
                .queue()
                .schedule(&name, order, Instant::now() + task.next_delay());
        }
        debug!(task = %name, interval_minutes = task.current_interval(), "Registered task");

        tasks.push(TaskSlot {
            name,
            task: Arc::new(Mutex::new(task)),
        });
        drop(tasks);
        self.inner.refresh_enabled_gauge().await;
        Ok(())
    }

    /// Schedule every enabled task and launch the dispatch loop.
    ///
    /// Starting an already running scheduler only logs a warning.
    pub async fn start(&self) {
        let mut control = self.inner.control.lock().await;
        if control.is_some() {
            warn!("Scheduler already running, ignoring start");
            return;
        }

        let now = Instant::now();
        let mut first_runs = Vec::new();
        {
            let tasks = self.inner.tasks.read().await;
            for (order, slot) in tasks.iter().enumerate() {
                let task = slot.task.lock().await;
                if task.is_enabled() {
                    first_runs.push((slot.name.clone(), order, now + task.next_delay()));
                }
            }
        }
        {
            let mut queue = self.inner.queue();
            queue.clear();
            for (name, order, fire_at) in &first_runs {
                queue.schedule(name, *order, *fire_at);
            }
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.inner).run_loop(shutdown_rx));
        *control = Some(LoopControl { shutdown, handle });

        if let Some(registry) = &self.inner.registry {
            registry.set_healthy(components::SCHEDULER).await;
            registry.set_ready(true).await;
        }
        info!(
            scheduled = first_runs.len(),
            tick_secs = self.inner.settings.tick_secs,
            "Scheduler started"
        );
    }

    /// Signal the loop to exit and wait (bounded) for the current dispatch.
    ///
    /// The scheduler is marked stopped and its queue cleared even when the
    /// wait times out. Safe to call when not running.
    pub async fn stop(&self) {
        let control = self.inner.control.lock().await.take();
        self.inner.running.store(false, Ordering::SeqCst);

        let Some(control) = control else {
            debug!("Scheduler not running, nothing to stop");
            self.inner.queue().clear();
            return;
        };

        let _ = control.shutdown.send(true);
        match timeout(self.inner.settings.stop_timeout(), control.handle).await {
            Ok(Ok(())) => info!("Scheduler stopped"),
            Ok(Err(e)) => warn!(error = %e, "Dispatch loop ended abnormally"),
            Err(_) => {
                let in_flight = self.inner.in_flight().clone();
                warn!(
                    task = ?in_flight,
                    timeout_secs = self.inner.settings.stop_timeout_secs,
                    "Timed out waiting for dispatch loop, a task may still be running"
                );
            }
        }

        self.inner.queue().clear();
        if let Some(registry) = &self.inner.registry {
            registry.set_ready(false).await;
        }
    }

    /// Re-enable a task. Its counters are not reset. Returns false for an
    /// unknown name.
    pub async fn enable(&self, name: &str) -> bool {
        let Some((order, slot)) = self.inner.slot(name).await else {
            return false;
        };

        {
            let mut task = slot.lock().await;
            task.enable();
            if self.is_running() {
                let mut queue = self.inner.queue();
                if !queue.contains(name) {
                    queue.schedule(name, order, Instant::now() + task.next_delay());
                }
            }
        }

        info!(task = %name, "Task enabled");
        self.inner.refresh_enabled_gauge().await;
        true
    }

    /// Disable a task and drop its pending dispatch. Returns false for an
    /// unknown name.
    pub async fn disable(&self, name: &str) -> bool {
        let Some((_, slot)) = self.inner.slot(name).await else {
            return false;
        };

        {
            let mut task = slot.lock().await;
            task.disable();
            self.inner.queue().remove(name);
        }

        info!(task = %name, "Task disabled");
        self.inner.refresh_enabled_gauge().await;
        true
    }

    /// Run a task now, outside its schedule, and return its result.
    ///
    /// The pending schedule entry is kept unless the run disabled the task.
    /// The run is detached from the caller: dropping this future does not
    /// stop the work unit, and its outcome is still recorded.
    pub async fn execute_now(&self, name: &str) -> Result<ExecutionResult, SchedulerError> {
        let (_, slot) = self
            .inner
            .slot(name)
            .await
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;

        let inner = Arc::clone(&self.inner);
        let task_name = name.to_string();
        let run = tokio::spawn(async move {
            let (result, info) = {
                let mut task = slot.lock().await;
                let result = task.execute(inner.oracle.as_ref()).await;
                if !task.is_enabled() {
                    inner.queue().remove(&task_name);
                }
                (result, DispatchInfo::from(&*task))
            };

            inner.after_dispatch(&result, &info).await;
            result
        });

        run.await.map_err(|e| SchedulerError::Aborted {
            task: name.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn status(&self) -> SchedulerStatus {
        let now = Instant::now();
        let tasks = self.inner.tasks.read().await;
        let mut stats = Vec::with_capacity(tasks.len());

        for slot in tasks.iter() {
            let mut s = slot.task.lock().await.stats();
            s.next_run_in_secs = self
                .inner
                .queue()
                .fire_at(&slot.name)
                .map(|at| at.saturating_duration_since(now).as_secs_f64());
            stats.push(s);
        }

        SchedulerStatus {
            running: self.is_running(),
            total_tasks: stats.len(),
            enabled_tasks: stats.iter().filter(|s| s.enabled).count(),
            tasks: stats,
        }
    }

    pub async fn task_names(&self) -> Vec<String> {
        self.inner
            .tasks
            .read()
            .await
            .iter()
            .map(|slot| slot.name.clone())
            .collect()
    }
}

impl From<&Task> for DispatchInfo {
    fn from(task: &Task) -> Self {
        Self {
            interval_minutes: task.current_interval(),
            failures: task.failures(),
            max_failures: task.max_failures(),
        }
    }
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

impl SchedulerInner {
    fn queue(&self) -> MutexGuard<'_, ScheduleQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn slot(&self, name: &str) -> Option<(usize, Arc<Mutex<Task>>)> {
        self.tasks
            .read()
            .await
            .iter()
            .enumerate()
            .find(|(_, slot)| slot.name == name)
            .map(|(order, slot)| (order, Arc::clone(&slot.task)))
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_due(&shutdown).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Dispatch loop exited");
    }

    /// Dispatch every due task, one at a time
    async fn dispatch_due(&self, shutdown: &watch::Receiver<bool>) {
        let now = Instant::now();
        let due = self.queue().due(now);

        for name in due {
            if shutdown_requested(shutdown) {
                break;
            }
            // Disabled (and dequeued) since the due list was taken
            if !self.queue().is_due(&name, now) {
                continue;
            }
            let Some((order, slot)) = self.slot(&name).await else {
                self.queue().remove(&name);
                continue;
            };

            *self.in_flight() = Some(name.clone());
            let (result, info) = {
                let mut task = slot.lock().await;
                let result = task.execute(self.oracle.as_ref()).await;

                if !shutdown_requested(shutdown) {
                    let mut queue = self.queue();
                    if task.is_enabled() {
                        queue.schedule(&name, order, Instant::now() + task.next_delay());
                    } else {
                        queue.remove(&name);
                    }
                }
                (result, DispatchInfo::from(&*task))
            };
            *self.in_flight() = None;

            self.after_dispatch(&result, &info).await;
        }
    }

    /// Metrics, logs and outcome recording for one dispatch
    async fn after_dispatch(&self, result: &ExecutionResult, info: &DispatchInfo) {
        let task = result.task();

        if let Some(metrics) = &self.metrics {
            metrics.inc_task_execution(task, result.outcome());
            if let Some(duration) = result.duration_secs() {
                metrics.observe_task_duration(task, duration);
            }
            metrics.set_task_interval(task, info.interval_minutes);
        }

        match result {
            ExecutionResult::Completed { duration_secs, .. } => {
                if let Some(logger) = &self.logger {
                    logger.log_task_completed(task, *duration_secs, info.interval_minutes);
                }
            }
            ExecutionResult::Failed {
                error,
                circuit_open,
                ..
            } => {
                if let Some(logger) = &self.logger {
                    logger.log_task_failed(task, error, info.failures, info.interval_minutes);
                    if *circuit_open {
                        logger.log_circuit_open(task, info.failures, info.max_failures);
                    }
                }
                if *circuit_open {
                    self.refresh_enabled_gauge().await;
                }
            }
            ExecutionResult::Skipped { reason, .. } => {
                if let Some(logger) = &self.logger {
                    logger.log_task_skipped(task, &reason.to_string());
                }
                return;
            }
        }

        if self.settings.record_outcomes {
            if let Some(engine) = &self.recorder {
                if let Err(e) =
                    engine.record_pattern(OUTCOME_PATTERN_KIND, &json!({ "task": task }), result.is_success())
                {
                    warn!(task = %task, error = %e, "Failed to record task outcome");
                }
            }
        }
    }

    async fn refresh_enabled_gauge(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        let tasks = self.tasks.read().await;
        let mut enabled = 0;
        for slot in tasks.iter() {
            if slot.task.lock().await.is_enabled() {
                enabled += 1;
            }
        }
        metrics.set_tasks_enabled(enabled);
    }
}
