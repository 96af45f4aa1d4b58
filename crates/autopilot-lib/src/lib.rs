//! Adaptive task scheduler library
//!
//! This crate provides the core functionality for:
//! - Live system metrics (CPU, memory, disk, service reachability)
//! - A SQLite knowledge store of metrics, patterns and predictions
//! - Health scoring, threshold predictions and auto-repair
//! - Tasks with adaptive intervals, condition gates and circuit breakers
//! - A single-loop scheduler with built-in maintenance jobs
//! - Health checks and observability

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod probe;
pub mod scheduler;
pub mod store;
pub mod task;

pub use config::{AppConfig, BreakerPolicy, HardwareTier, SchedulerSettings};
pub use engine::{HealthBreakdown, HealthEngine};
pub use error::{ProbeError, SchedulerError, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SchedulerMetrics, StructuredLogger};
pub use probe::{MetricsProbe, StaticProbe, SysinfoProbe};
pub use scheduler::{Scheduler, SchedulerStatus};
pub use store::KnowledgeStore;
pub use task::{
    Condition, ConditionKind, ExecutionResult, HealthOracle, Runnable, SkipReason, Task,
    TaskOutput, TaskStats,
};
