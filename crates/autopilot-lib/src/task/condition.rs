//! Execution gates evaluated against live system health

use crate::error::ProbeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Live signals a task's conditions are checked against
#[async_trait]
pub trait HealthOracle: Send + Sync {
    /// Composite health score, 0-100
    async fn health_score(&self) -> Result<f64, ProbeError>;

    /// Host CPU utilization, percent
    async fn cpu_usage(&self) -> Result<f64, ProbeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Run only while health is below the threshold
    MinHealthScore,
    /// Run only while CPU is at or below the threshold
    MaxCpuUsage,
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionKind::MinHealthScore => write!(f, "min_health_score"),
            ConditionKind::MaxCpuUsage => write!(f, "max_cpu_usage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    pub threshold: f64,
}

/// Outcome of checking one condition
#[derive(Debug)]
pub enum ConditionCheck {
    Met,
    Blocked { observed: f64 },
    /// Live value could not be read
    Unavailable(ProbeError),
}

impl Condition {
    pub fn min_health_score(threshold: f64) -> Self {
        Self {
            kind: ConditionKind::MinHealthScore,
            threshold,
        }
    }

    pub fn max_cpu_usage(threshold: f64) -> Self {
        Self {
            kind: ConditionKind::MaxCpuUsage,
            threshold,
        }
    }

    pub async fn check(&self, oracle: &dyn HealthOracle) -> ConditionCheck {
        match self.kind {
            ConditionKind::MinHealthScore => match oracle.health_score().await {
                Ok(score) if score >= self.threshold => ConditionCheck::Blocked { observed: score },
                Ok(_) => ConditionCheck::Met,
                Err(e) => ConditionCheck::Unavailable(e),
            },
            ConditionKind::MaxCpuUsage => match oracle.cpu_usage().await {
                Ok(cpu) if cpu > self.threshold => ConditionCheck::Blocked { observed: cpu },
                Ok(_) => ConditionCheck::Met,
                Err(e) => ConditionCheck::Unavailable(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        score: Option<f64>,
        cpu: Option<f64>,
    }

    #[async_trait]
    impl HealthOracle for Fixed {
        async fn health_score(&self) -> Result<f64, ProbeError> {
            self.score.ok_or_else(|| ProbeError::Cpu("down".to_string()))
        }

        async fn cpu_usage(&self) -> Result<f64, ProbeError> {
            self.cpu.ok_or_else(|| ProbeError::Cpu("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_min_health_score_blocks_when_healthy_enough() {
        let condition = Condition::min_health_score(70.0);
        let healthy = Fixed { score: Some(70.0), cpu: None };
        let sick = Fixed { score: Some(55.0), cpu: None };

        assert!(matches!(
            condition.check(&healthy).await,
            ConditionCheck::Blocked { observed } if observed == 70.0
        ));
        assert!(matches!(condition.check(&sick).await, ConditionCheck::Met));
    }

    #[tokio::test]
    async fn test_max_cpu_usage_blocks_only_above_threshold() {
        let condition = Condition::max_cpu_usage(80.0);
        let at = Fixed { score: None, cpu: Some(80.0) };
        let above = Fixed { score: None, cpu: Some(80.5) };

        assert!(matches!(condition.check(&at).await, ConditionCheck::Met));
        assert!(matches!(
            condition.check(&above).await,
            ConditionCheck::Blocked { .. }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_value_is_unavailable() {
        let condition = Condition::max_cpu_usage(80.0);
        let broken = Fixed { score: None, cpu: None };
        assert!(matches!(
            condition.check(&broken).await,
            ConditionCheck::Unavailable(_)
        ));
    }

    #[test]
    fn test_condition_serde_shape() {
        let parsed: Condition =
            serde_json::from_str(r#"{"kind": "max_cpu_usage", "threshold": 50}"#).unwrap();
        assert_eq!(parsed, Condition::max_cpu_usage(50.0));
    }
}
