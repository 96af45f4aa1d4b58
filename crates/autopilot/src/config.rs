//! Configuration loading

use autopilot_lib::AppConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable prefix, e.g. `AUTOPILOT_API_ADDR` or
/// `AUTOPILOT_SCHEDULER__BREAKER`
const ENV_PREFIX: &str = "AUTOPILOT";

/// `~/.config/autopilot/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|dir| dir.join("autopilot").join("config.toml"))
}

/// Load configuration from an optional file and the environment.
///
/// An explicit `path` must exist; the default path is used only when
/// present. A configuration that fails to load or deserialize is logged and
/// replaced by defaults.
pub fn load(path: Option<&Path>) -> AppConfig {
    let mut builder = config::Config::builder();

    match path {
        Some(path) => {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        None => {
            if let Some(path) = default_config_path() {
                builder = builder.add_source(config::File::from(path).required(false));
            }
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__"),
    );

    match builder
        .build()
        .and_then(|c| c.try_deserialize::<AppConfig>())
    {
        Ok(config) => {
            debug!(data_dir = %config.data_dir.display(), api_addr = %config.api_addr, "Configuration loaded");
            config
        }
        Err(e) => {
            warn!(error = %e, "Invalid configuration, using defaults");
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_lib::BreakerPolicy;
    use std::io::Write;

    #[test]
    fn test_file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
api_addr = "127.0.0.1:9999"
tier = "low"

[scheduler]
breaker = "consecutive"
stop_timeout_secs = 5

[tasks.auto_repair]
enabled = false
interval_minutes = 120.0
"#
        )
        .unwrap();

        let config = load(Some(file.path()));

        assert_eq!(config.api_addr, "127.0.0.1:9999");
        assert_eq!(config.scheduler.breaker, BreakerPolicy::Consecutive);
        assert_eq!(config.scheduler.stop_timeout_secs, 5);
        assert_eq!(config.scheduler.tick_secs, 1);
        let repair = &config.tasks["auto_repair"];
        assert_eq!(repair.enabled, Some(false));
        assert_eq!(repair.interval_minutes, Some(120.0));
        assert_eq!(config.health.cpu.critical_above, 80.0);
    }

    #[test]
    fn test_missing_explicit_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load(Some(&dir.path().join("absent.toml")));
        assert_eq!(config.api_addr, AppConfig::default().api_addr);
    }
}
