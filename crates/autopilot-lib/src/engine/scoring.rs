//! Composite health score

use crate::config::HealthConfig;
use crate::models::{Resource, SystemSnapshot};
use serde::{Deserialize, Serialize};

/// Perfect health before any penalty
pub const MAX_SCORE: f64 = 100.0;

/// Health score together with the penalty each factor contributed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthBreakdown {
    pub score: f64,
    pub cpu_penalty: f64,
    pub memory_penalty: f64,
    pub disk_penalty: f64,
    pub service_penalty: f64,
}

/// Score a snapshot: start at 100, subtract each factor's penalty, floor at 0
pub fn score_snapshot(snapshot: &SystemSnapshot, config: &HealthConfig) -> HealthBreakdown {
    let penalty = |r: Resource| config.penalty(r).penalty_for(r.read(snapshot));

    let cpu_penalty = penalty(Resource::Cpu);
    let memory_penalty = penalty(Resource::Memory);
    let disk_penalty = penalty(Resource::Disk);
    let service_penalty = if snapshot.service_reachable {
        0.0
    } else {
        config.service_unreachable_penalty
    };

    let score = (MAX_SCORE - cpu_penalty - memory_penalty - disk_penalty - service_penalty)
        .max(0.0);

    HealthBreakdown {
        score,
        cpu_penalty,
        memory_penalty,
        disk_penalty,
        service_penalty,
    }
}
