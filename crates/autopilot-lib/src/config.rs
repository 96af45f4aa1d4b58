//! Configuration types
//!
//! Every section deserializes with per-field defaults so a partial config
//! file (or none at all) yields a complete configuration. Loading from
//! files and the environment happens in the binary.

use crate::models::{Resource, Severity};
use crate::task::Condition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration, built once at process start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the knowledge store
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Address of the control/health/metrics API
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Hardware tier; detected from the host when absent
    #[serde(default)]
    pub tier: Option<HardwareTier>,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub prediction: PredictionRules,

    #[serde(default)]
    pub repair: RepairConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    /// Per-task overrides keyed by task name
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskOverride>,
}

fn default_data_dir() -> PathBuf {
    std::env::temp_dir().join("autopilot")
}

fn default_api_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_addr: default_api_addr(),
            tier: None,
            scheduler: SchedulerSettings::default(),
            health: HealthConfig::default(),
            prediction: PredictionRules::default(),
            repair: RepairConfig::default(),
            probe: ProbeConfig::default(),
            tasks: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Path of the SQLite knowledge store
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    /// Configured tier, or the one detected from this host
    pub fn resolved_tier(&self) -> HardwareTier {
        self.tier.unwrap_or_else(HardwareTier::detect)
    }
}

/// Which failure counter trips a task's circuit breaker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakerPolicy {
    /// Failures over the task's whole lifetime
    #[default]
    Lifetime,
    /// Failures since the last success
    Consecutive,
}

/// Dispatch loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,

    /// How long `stop()` waits for an in-flight dispatch
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    #[serde(default)]
    pub breaker: BreakerPolicy,

    /// Record every non-skipped dispatch as a `task_outcome` pattern
    #[serde(default = "default_true")]
    pub record_outcomes: bool,
}

fn default_tick_secs() -> u64 {
    1
}

fn default_stop_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            breaker: BreakerPolicy::default(),
            record_outcomes: true,
        }
    }
}

impl SchedulerSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Two-level penalty applied when a resource crosses its thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourcePenalty {
    pub warning_above: f64,
    pub warning_penalty: f64,
    pub critical_above: f64,
    pub critical_penalty: f64,
}

impl ResourcePenalty {
    /// Penalty for a utilization value; thresholds are exclusive
    pub fn penalty_for(&self, value: f64) -> f64 {
        if value > self.critical_above {
            self.critical_penalty
        } else if value > self.warning_above {
            self.warning_penalty
        } else {
            0.0
        }
    }
}

/// Health score weights and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_cpu_penalty")]
    pub cpu: ResourcePenalty,
    #[serde(default = "default_memory_penalty")]
    pub memory: ResourcePenalty,
    #[serde(default = "default_disk_penalty")]
    pub disk: ResourcePenalty,
    #[serde(default = "default_service_penalty")]
    pub service_unreachable_penalty: f64,
}

fn default_cpu_penalty() -> ResourcePenalty {
    ResourcePenalty {
        warning_above: 60.0,
        warning_penalty: 10.0,
        critical_above: 80.0,
        critical_penalty: 20.0,
    }
}

fn default_memory_penalty() -> ResourcePenalty {
    ResourcePenalty {
        warning_above: 70.0,
        warning_penalty: 15.0,
        critical_above: 85.0,
        critical_penalty: 25.0,
    }
}

fn default_disk_penalty() -> ResourcePenalty {
    ResourcePenalty {
        warning_above: 80.0,
        warning_penalty: 15.0,
        critical_above: 90.0,
        critical_penalty: 30.0,
    }
}

fn default_service_penalty() -> f64 {
    25.0
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cpu: default_cpu_penalty(),
            memory: default_memory_penalty(),
            disk: default_disk_penalty(),
            service_unreachable_penalty: default_service_penalty(),
        }
    }
}

impl HealthConfig {
    pub fn penalty(&self, resource: Resource) -> &ResourcePenalty {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
            Resource::Disk => &self.disk,
        }
    }
}

/// Threshold heuristic that emits a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRule {
    pub kind: String,
    pub resource: Resource,
    pub above: f64,
    pub severity: Severity,
    pub confidence: f64,
}

/// Prediction heuristics, evaluated in order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRules {
    #[serde(default = "default_prediction_rules")]
    pub rules: Vec<PredictionRule>,
}

fn default_prediction_rules() -> Vec<PredictionRule> {
    vec![
        PredictionRule {
            kind: "high_cpu_usage".to_string(),
            resource: Resource::Cpu,
            above: 80.0,
            severity: Severity::Warning,
            confidence: 0.85,
        },
        PredictionRule {
            kind: "high_memory_usage".to_string(),
            resource: Resource::Memory,
            above: 85.0,
            severity: Severity::Critical,
            confidence: 0.90,
        },
        PredictionRule {
            kind: "high_disk_usage".to_string(),
            resource: Resource::Disk,
            above: 90.0,
            severity: Severity::Critical,
            confidence: 0.95,
        },
    ]
}

impl Default for PredictionRules {
    fn default() -> Self {
        Self {
            rules: default_prediction_rules(),
        }
    }
}

/// Auto-repair and retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// Only files with this name prefix are ever removed
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    #[serde(default = "default_temp_max_age_hours")]
    pub temp_max_age_hours: u64,
    #[serde(default = "default_metric_retention_days")]
    pub metric_retention_days: u64,
}

fn default_temp_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_temp_prefix() -> String {
    "autopilot-".to_string()
}

fn default_temp_max_age_hours() -> u64 {
    24
}

fn default_metric_retention_days() -> u64 {
    30
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            temp_prefix: default_temp_prefix(),
            temp_max_age_hours: default_temp_max_age_hours(),
            metric_retention_days: default_metric_retention_days(),
        }
    }
}

impl RepairConfig {
    pub fn temp_max_age(&self) -> Duration {
        Duration::from_secs(self.temp_max_age_hours.saturating_mul(3600))
    }

    /// Saturates at the largest representable span, which keeps everything
    pub fn metric_retention(&self) -> chrono::TimeDelta {
        i64::try_from(self.metric_retention_days)
            .ok()
            .and_then(chrono::TimeDelta::try_days)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

/// Metrics probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Filesystem path whose disk is measured
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    /// `host:port` of the dependent service; unset means always reachable
    #[serde(default)]
    pub service_addr: Option<String>,
    #[serde(default = "default_service_timeout_ms")]
    pub service_timeout_ms: u64,
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/")
}

fn default_service_timeout_ms() -> u64 {
    2000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            disk_path: default_disk_path(),
            service_addr: None,
            service_timeout_ms: default_service_timeout_ms(),
        }
    }
}

/// Deployment size class used to seed task intervals and thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareTier {
    Low,
    Standard,
    High,
}

/// Defaults a tier supplies to every built-in task
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierProfile {
    /// Multiplier applied to each task's base interval
    pub interval_scale: f64,
    pub max_failures: u32,
}

impl HardwareTier {
    /// Classify the host by logical CPUs and total memory
    pub fn detect() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_memory();
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let memory_gib = system.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
        Self::classify(cpus, memory_gib)
    }

    pub fn classify(cpus: usize, memory_gib: f64) -> Self {
        if cpus <= 2 || memory_gib < 4.0 {
            HardwareTier::Low
        } else if cpus >= 8 && memory_gib >= 16.0 {
            HardwareTier::High
        } else {
            HardwareTier::Standard
        }
    }

    pub fn profile(&self) -> TierProfile {
        match self {
            // Small hosts check less often and tolerate fewer failures
            HardwareTier::Low => TierProfile {
                interval_scale: 2.0,
                max_failures: 3,
            },
            HardwareTier::Standard => TierProfile {
                interval_scale: 1.0,
                max_failures: 5,
            },
            HardwareTier::High => TierProfile {
                interval_scale: 0.5,
                max_failures: 5,
            },
        }
    }
}

impl std::fmt::Display for HardwareTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareTier::Low => write!(f, "low"),
            HardwareTier::Standard => write!(f, "standard"),
            HardwareTier::High => write!(f, "high"),
        }
    }
}

/// Per-task overrides; any field left unset keeps the tier default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOverride {
    #[serde(default)]
    pub interval_minutes: Option<f64>,
    #[serde(default)]
    pub adaptive: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_penalties_match_documented_weights() {
        let health = HealthConfig::default();
        assert_eq!(health.cpu.penalty_for(85.0), 20.0);
        assert_eq!(health.cpu.penalty_for(65.0), 10.0);
        assert_eq!(health.cpu.penalty_for(60.0), 0.0);
        assert_eq!(health.memory.penalty_for(86.0), 25.0);
        assert_eq!(health.memory.penalty_for(71.0), 15.0);
        assert_eq!(health.disk.penalty_for(91.0), 30.0);
        assert_eq!(health.disk.penalty_for(81.0), 15.0);
        assert_eq!(health.service_unreachable_penalty, 25.0);
    }

    #[test]
    fn test_default_prediction_rules() {
        let rules = PredictionRules::default().rules;
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[1].kind, "high_memory_usage");
        assert_eq!(rules[1].confidence, 0.90);
        assert_eq!(rules[1].severity, Severity::Critical);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"scheduler": {"breaker": "consecutive"}, "health": {"service_unreachable_penalty": 40.0}}"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.breaker, BreakerPolicy::Consecutive);
        assert_eq!(config.scheduler.tick_secs, 1);
        assert!(config.scheduler.record_outcomes);
        assert_eq!(config.health.service_unreachable_penalty, 40.0);
        assert_eq!(config.health.cpu.critical_above, 80.0);
        assert_eq!(config.prediction.rules.len(), 3);
    }

    #[test]
    fn test_tier_classification() {
        assert_eq!(HardwareTier::classify(2, 8.0), HardwareTier::Low);
        assert_eq!(HardwareTier::classify(4, 2.0), HardwareTier::Low);
        assert_eq!(HardwareTier::classify(4, 8.0), HardwareTier::Standard);
        assert_eq!(HardwareTier::classify(16, 32.0), HardwareTier::High);
    }

    #[test]
    fn test_tier_profiles() {
        assert_eq!(HardwareTier::Standard.profile().interval_scale, 1.0);
        assert_eq!(HardwareTier::Low.profile().max_failures, 3);
    }

    #[test]
    fn test_huge_repair_ages_saturate() {
        let repair = RepairConfig {
            temp_max_age_hours: u64::MAX,
            metric_retention_days: u64::MAX,
            ..RepairConfig::default()
        };

        assert_eq!(repair.temp_max_age(), Duration::from_secs(u64::MAX));
        assert_eq!(repair.metric_retention(), chrono::TimeDelta::MAX);

        let defaults = RepairConfig::default();
        assert_eq!(defaults.temp_max_age(), Duration::from_secs(24 * 3600));
        assert_eq!(defaults.metric_retention(), chrono::TimeDelta::days(30));
    }
}
