//! Core data models shared by the probe, store and health engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of the host's resource utilization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub service_reachable: bool,
}

/// Resource dimension a threshold applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
}

impl Resource {
    /// Read this resource's utilization out of a snapshot
    pub fn read(&self, snapshot: &SystemSnapshot) -> f64 {
        match self {
            Resource::Cpu => snapshot.cpu_percent,
            Resource::Memory => snapshot.memory_percent,
            Resource::Disk => snapshot.disk_percent,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
            Resource::Disk => write!(f, "disk"),
        }
    }
}

/// A single appended measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Utc::now(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// Deduplicated observation of a `(kind, payload)` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub frequency: u64,
    pub success_rate: f64,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Severity attached to a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Confidence-scored forecast of an impending issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Row id once persisted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Prediction {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value, confidence: f64) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            payload,
            confidence: confidence.clamp(0.0, 1.0),
            outcome: None,
            accuracy: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Which auto-repair action produced an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairKind {
    TempCleanup,
    StoreOptimization,
    WalCheckpoint,
}

impl RepairKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairKind::TempCleanup => "temp_cleanup",
            RepairKind::StoreOptimization => "store_optimization",
            RepairKind::WalCheckpoint => "wal_checkpoint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStatus {
    Success,
    Failed,
}

/// Result of one best-effort repair action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOutcome {
    #[serde(rename = "type")]
    pub repair_type: RepairKind,
    pub status: RepairStatus,
    pub description: String,
}

impl RepairOutcome {
    pub fn success(repair_type: RepairKind, description: impl Into<String>) -> Self {
        Self {
            repair_type,
            status: RepairStatus::Success,
            description: description.into(),
        }
    }

    pub fn failed(repair_type: RepairKind, description: impl Into<String>) -> Self {
        Self {
            repair_type,
            status: RepairStatus::Failed,
            description: description.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RepairStatus::Success
    }
}
