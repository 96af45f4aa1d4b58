//! Host probe backed by `sysinfo`

use super::MetricsProbe;
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::net::TcpStream;
use tracing::debug;

/// Reads utilization from the running host
pub struct SysinfoProbe {
    system: Mutex<System>,
    disk_path: PathBuf,
    service_addr: Option<String>,
    service_timeout: Duration,
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe")
            .field("disk_path", &self.disk_path)
            .field("service_addr", &self.service_addr)
            .finish_non_exhaustive()
    }
}

impl SysinfoProbe {
    /// Create a probe. Primes CPU accounting so the first sample has a baseline.
    pub fn new(config: &ProbeConfig) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            disk_path: config.disk_path.clone(),
            service_addr: config.service_addr.clone(),
            service_timeout: Duration::from_millis(config.service_timeout_ms),
        }
    }
}

#[async_trait]
impl MetricsProbe for SysinfoProbe {
    async fn cpu_percent(&self) -> Result<f64, ProbeError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| ProbeError::Cpu("probe lock poisoned".to_string()))?;
        system.refresh_cpu_usage();
        let usage = f64::from(system.global_cpu_usage());
        if usage.is_finite() {
            Ok(usage.clamp(0.0, 100.0))
        } else {
            Err(ProbeError::Cpu(format!("non-finite reading {usage}")))
        }
    }

    async fn memory_percent(&self) -> Result<f64, ProbeError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| ProbeError::Memory("probe lock poisoned".to_string()))?;
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(ProbeError::Memory("total memory reported as zero".to_string()));
        }
        Ok(system.used_memory() as f64 / total as f64 * 100.0)
    }

    async fn disk_percent(&self) -> Result<f64, ProbeError> {
        let disks = Disks::new_with_refreshed_list();
        let mounts: Vec<(PathBuf, u64, u64)> = disks
            .list()
            .iter()
            .map(|d| {
                (
                    d.mount_point().to_path_buf(),
                    d.total_space(),
                    d.available_space(),
                )
            })
            .collect();

        disk_usage_percent(&mounts, &self.disk_path).ok_or_else(|| ProbeError::Disk {
            path: self.disk_path.display().to_string(),
            reason: "no mounted filesystem covers this path".to_string(),
        })
    }

    async fn service_reachable(&self) -> bool {
        let Some(addr) = &self.service_addr else {
            return true;
        };

        match tokio::time::timeout(self.service_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %addr, error = %e, "Dependent service refused connection");
                false
            }
            Err(_) => {
                debug!(addr = %addr, "Dependent service connection timed out");
                false
            }
        }
    }
}

/// Utilization of the filesystem whose mount point is the longest prefix of `target`
///
/// `mounts` holds `(mount_point, total_bytes, available_bytes)`.
pub fn disk_usage_percent(mounts: &[(PathBuf, u64, u64)], target: &Path) -> Option<f64> {
    let (_, total, available) = mounts
        .iter()
        .filter(|(mount, total, _)| *total > 0 && target.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())?;

    let used = total.saturating_sub(*available);
    Some(used as f64 / *total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_usage_picks_longest_mount_prefix() {
        let mounts = vec![
            (PathBuf::from("/"), 1000, 900),
            (PathBuf::from("/var"), 1000, 100),
            (PathBuf::from("/var/lib/db"), 0, 0),
        ];

        let usage = disk_usage_percent(&mounts, Path::new("/var/lib/db")).unwrap();
        assert!((usage - 90.0).abs() < 1e-9);

        let root = disk_usage_percent(&mounts, Path::new("/home")).unwrap();
        assert!((root - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_disk_usage_no_match() {
        let mounts = vec![(PathBuf::from("/data"), 1000, 500)];
        assert!(disk_usage_percent(&mounts, Path::new("/srv")).is_none());
    }

    #[tokio::test]
    async fn test_unset_service_is_reachable() {
        let probe = SysinfoProbe::new(&ProbeConfig::default());
        assert!(probe.service_reachable().await);
    }

    #[tokio::test]
    async fn test_memory_reading_in_range() {
        let probe = SysinfoProbe::new(&ProbeConfig::default());
        if let Ok(memory) = probe.memory_percent().await {
            assert!((0.0..=100.0).contains(&memory));
        }
    }
}
