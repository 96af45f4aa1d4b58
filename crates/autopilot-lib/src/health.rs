//! Component liveness tracking
//!
//! Tracks whether the scheduler's own moving parts (dispatch loop, knowledge
//! store, metrics probe) are working, for the `/healthz` and `/readyz`
//! endpoints. This is distinct from the host health *score* computed by the
//! engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Ordered from best to worst, so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Working, but recent operations failed
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the status last changed
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tracked component names
pub mod components {
    pub const SCHEDULER: &str = "scheduler";
    pub const KNOWLEDGE_STORE: &str = "knowledge_store";
    pub const METRICS_PROBE: &str = "metrics_probe";
}

#[derive(Debug, Default)]
struct RegistryState {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared registry of component health; clones share state
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a component as healthy
    pub async fn register(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.set(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Record a status. `since` only moves when the status itself changes,
    /// and only changes are logged.
    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        let now = Utc::now();

        let since = match state.components.get(name) {
            Some(prev) if prev.status == status => prev.since,
            Some(prev) => {
                match status {
                    ComponentStatus::Healthy => {
                        info!(component = %name, from = %prev.status, "Component recovered")
                    }
                    _ => warn!(
                        component = %name,
                        from = %prev.status,
                        to = %status,
                        message = message.as_deref().unwrap_or(""),
                        "Component status changed"
                    ),
                }
                now
            }
            None => now,
        };

        state.components.insert(
            name.to_string(),
            ComponentHealth {
                status,
                message,
                since,
            },
        );
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn component(&self, name: &str) -> Option<ComponentHealth> {
        self.state.read().await.components.get(name).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: overall(&state.components),
            components: state.components.clone(),
        }
    }

    /// Ready once the scheduler has started and while no component is
    /// unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.ready {
            Some("scheduler not started".to_string())
        } else {
            let failing: Vec<&str> = state
                .components
                .iter()
                .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| name.as_str())
                .collect();
            (!failing.is_empty()).then(|| format!("unhealthy: {}", failing.join(", ")))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

fn overall(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
    components
        .values()
        .map(|c| c.status)
        .max()
        .unwrap_or(ComponentStatus::Healthy)
}
