//! Probe returning fixed readings

use super::MetricsProbe;
use crate::error::ProbeError;
use crate::models::SystemSnapshot;
use async_trait::async_trait;
use std::sync::RwLock;

/// Probe with settable readings; `None` makes that dimension fail
#[derive(Debug)]
pub struct StaticProbe {
    state: RwLock<StaticReadings>,
}

#[derive(Debug, Clone, Copy)]
struct StaticReadings {
    cpu: Option<f64>,
    memory: Option<f64>,
    disk: Option<f64>,
    reachable: bool,
}

impl StaticProbe {
    pub fn new(cpu: f64, memory: f64, disk: f64, service_reachable: bool) -> Self {
        Self {
            state: RwLock::new(StaticReadings {
                cpu: Some(cpu),
                memory: Some(memory),
                disk: Some(disk),
                reachable: service_reachable,
            }),
        }
    }

    /// A quiet, healthy host
    pub fn healthy() -> Self {
        Self::new(10.0, 30.0, 40.0, true)
    }

    /// A probe whose every reading fails
    pub fn failing() -> Self {
        Self {
            state: RwLock::new(StaticReadings {
                cpu: None,
                memory: None,
                disk: None,
                reachable: false,
            }),
        }
    }

    pub fn set(&self, snapshot: SystemSnapshot) {
        if let Ok(mut state) = self.state.write() {
            *state = StaticReadings {
                cpu: Some(snapshot.cpu_percent),
                memory: Some(snapshot.memory_percent),
                disk: Some(snapshot.disk_percent),
                reachable: snapshot.service_reachable,
            };
        }
    }

    pub fn set_cpu(&self, cpu: Option<f64>) {
        if let Ok(mut state) = self.state.write() {
            state.cpu = cpu;
        }
    }

    fn readings(&self) -> StaticReadings {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl MetricsProbe for StaticProbe {
    async fn cpu_percent(&self) -> Result<f64, ProbeError> {
        self.readings()
            .cpu
            .ok_or_else(|| ProbeError::Cpu("static probe has no cpu reading".to_string()))
    }

    async fn memory_percent(&self) -> Result<f64, ProbeError> {
        self.readings()
            .memory
            .ok_or_else(|| ProbeError::Memory("static probe has no memory reading".to_string()))
    }

    async fn disk_percent(&self) -> Result<f64, ProbeError> {
        self.readings().disk.ok_or_else(|| ProbeError::Disk {
            path: "/".to_string(),
            reason: "static probe has no disk reading".to_string(),
        })
    }

    async fn service_reachable(&self) -> bool {
        self.readings().reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_from_fixed_values() {
        let probe = StaticProbe::new(85.0, 50.0, 50.0, true);
        let snapshot = probe.snapshot().await.unwrap();
        assert_eq!(snapshot.cpu_percent, 85.0);
        assert!(snapshot.service_reachable);
    }

    #[tokio::test]
    async fn test_failing_probe_errors() {
        let probe = StaticProbe::failing();
        assert!(probe.cpu_percent().await.is_err());
        assert!(probe.snapshot().await.is_err());
    }

    #[tokio::test]
    async fn test_set_cpu_only() {
        let probe = StaticProbe::healthy();
        probe.set_cpu(None);
        assert!(probe.cpu_percent().await.is_err());
        assert!(probe.memory_percent().await.is_ok());
    }
}
