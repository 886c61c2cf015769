//! Boot configuration constants and defaults.
//!
//! Every value the boot sequence waits on or retries with lives here so hosts
//! can tune them, tests in particular shrink the probe interval.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of connection attempts made before a configured database is
/// considered unreachable.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Pause between two connection attempts.
///
/// Fixed, not exponential. With the default attempt count boot can block for
/// up to five seconds on an unreachable database.
pub const DEFAULT_CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How long `configure_connection` waits for the persisted connection string
/// to be picked up by the configuration reload.
pub const DEFAULT_CONFIG_RELOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory sqlite database files are created in when none is configured.
pub const DEFAULT_DATA_DIRECTORY: &str = "data";

/// Runtime mode the host runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeMode {
    /// Everything may change at runtime, no restrictions apply.
    #[default]
    BackofficeDevelopment,
    Development,
    Production,
}

/// Settings driving the boot sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BootConfig {
    pub connect_attempts: u32,

    #[serde(with = "duration_millis")]
    pub connect_retry_interval: Duration,

    #[serde(with = "duration_millis")]
    pub config_reload_timeout: Duration,

    /// Install the baseline schema without operator interaction when the
    /// configured database is empty or missing.
    pub install_unattended: bool,

    /// Run the core migration plan at boot instead of stopping at `Upgrade`.
    pub upgrade_unattended: bool,

    /// Run pending package migration plans at boot.
    pub package_migrations_unattended: bool,

    pub runtime_mode: RuntimeMode,

    pub debug: bool,

    pub use_https: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_retry_interval: DEFAULT_CONNECT_RETRY_INTERVAL,
            config_reload_timeout: DEFAULT_CONFIG_RELOAD_TIMEOUT,
            install_unattended: false,
            upgrade_unattended: false,
            package_migrations_unattended: true,
            runtime_mode: RuntimeMode::default(),
            debug: false,
            use_https: false,
        }
    }
}

/// Builder for [`BootConfig`].
#[derive(Debug)]
pub struct ConfigBuilder {
    config: BootConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: BootConfig::default(),
        }
    }

    pub fn connect_attempts(mut self, attempts: u32) -> Self {
        self.config.connect_attempts = attempts;
        self
    }

    pub fn connect_retry_interval(mut self, interval: Duration) -> Self {
        self.config.connect_retry_interval = interval;
        self
    }

    pub fn config_reload_timeout(mut self, timeout: Duration) -> Self {
        self.config.config_reload_timeout = timeout;
        self
    }

    pub fn install_unattended(mut self, enabled: bool) -> Self {
        self.config.install_unattended = enabled;
        self
    }

    pub fn upgrade_unattended(mut self, enabled: bool) -> Self {
        self.config.upgrade_unattended = enabled;
        self
    }

    pub fn package_migrations_unattended(mut self, enabled: bool) -> Self {
        self.config.package_migrations_unattended = enabled;
        self
    }

    pub fn runtime_mode(mut self, mode: RuntimeMode) -> Self {
        self.config.runtime_mode = mode;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn use_https(mut self, use_https: bool) -> Self {
        self.config.use_https = use_https;
        self
    }

    pub fn build(self) -> BootConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The persisted database connection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStrings {
    pub connection_string: Option<String>,
    pub provider_name: Option<String>,
}

impl ConnectionStrings {
    pub fn new(connection_string: impl Into<String>, provider_name: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            provider_name: Some(provider_name.into()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.connection_string
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
            && self
                .provider_name
                .as_deref()
                .is_some_and(|value| !value.trim().is_empty())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BootConfig::default();

        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.connect_retry_interval, Duration::from_secs(1));
        assert_eq!(config.config_reload_timeout, Duration::from_secs(10));
        assert_eq!(config.runtime_mode, RuntimeMode::BackofficeDevelopment);
    }

    #[test]
    fn deserialize_partial_json() {
        let config: BootConfig = serde_json::from_str(
            r#"{"connectAttempts": 2, "connectRetryInterval": 50, "runtimeMode": "Production", "upgradeUnattended": true}"#,
        )
        .unwrap();

        assert_eq!(config.connect_attempts, 2);
        assert_eq!(config.connect_retry_interval, Duration::from_millis(50));
        assert_eq!(config.config_reload_timeout, DEFAULT_CONFIG_RELOAD_TIMEOUT);
        assert_eq!(config.runtime_mode, RuntimeMode::Production);
        assert!(config.upgrade_unattended);
    }

    #[test]
    fn connection_strings_configured() {
        assert!(!ConnectionStrings::default().is_configured());
        assert!(!ConnectionStrings::new(" ", "sqlite").is_configured());
        assert!(ConnectionStrings::new("sqlite::memory:", "sqlite").is_configured());
    }
}
