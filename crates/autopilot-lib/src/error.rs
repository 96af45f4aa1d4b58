//! Error types for the scheduler library

use thiserror::Error;

/// Failures reading live system metrics
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cpu usage unavailable: {0}")]
    Cpu(String),
    #[error("memory usage unavailable: {0}")]
    Memory(String),
    #[error("disk usage unavailable for {path}: {reason}")]
    Disk { path: String, reason: String },
}

/// Failures reading or writing the knowledge store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("knowledge store lock poisoned")]
    LockPoisoned,
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Caller-facing scheduler errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task already registered: {0}")]
    DuplicateTask(String),
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("run of {task} was aborted: {reason}")]
    Aborted { task: String, reason: String },
}
