//! Live system metrics
//!
//! The probe reads CPU, memory and disk utilization plus reachability of a
//! dependent service. It is stateless from the caller's point of view and
//! is sampled on demand by the health engine.

mod fixed;
mod host;

pub use fixed::StaticProbe;
pub use host::{disk_usage_percent, SysinfoProbe};

use crate::error::ProbeError;
use crate::models::SystemSnapshot;

use async_trait::async_trait;

/// Source of live resource utilization, in percent
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    async fn cpu_percent(&self) -> Result<f64, ProbeError>;

    async fn memory_percent(&self) -> Result<f64, ProbeError>;

    async fn disk_percent(&self) -> Result<f64, ProbeError>;

    /// Whether the dependent service accepts connections
    async fn service_reachable(&self) -> bool;

    /// Sample every dimension at once
    async fn snapshot(&self) -> Result<SystemSnapshot, ProbeError> {
        Ok(SystemSnapshot {
            cpu_percent: self.cpu_percent().await?,
            memory_percent: self.memory_percent().await?,
            disk_percent: self.disk_percent().await?,
            service_reachable: self.service_reachable().await,
        })
    }
}
