use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::trace;

use crate::Severity;
use crate::transport::DeviceKind;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (observations older than this are deleted)
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./health.db")
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub devices: Option<Vec<DeviceConfig>>,

    /// Named credential sets referenced by devices
    pub credentials: Option<Vec<CredentialConfig>>,

    /// Scheduler and worker pool tuning (optional - all fields have defaults)
    pub polling: Option<PollingConfig>,

    /// Storage configuration (optional - defaults to in-memory)
    pub storage: Option<StorageConfig>,
}

/// Scheduler, retry, and worker pool tuning
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PollingConfig {
    /// Fleet-wide scheduling tick in seconds
    #[serde(default = "default_fleet_interval")]
    pub fleet_interval: u64,

    /// Worker pool maintenance tick in seconds
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,

    /// Number of concurrent poll workers
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Attempts per poll cycle (first try plus retries)
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Linear spacing between attempts in seconds
    #[serde(default = "default_retry_spacing_secs")]
    pub retry_spacing_secs: u64,

    /// Multiplier on `timeout * attempts` before a worker is reaped
    #[serde(default = "default_reap_safety_factor")]
    pub reap_safety_factor: u32,

    /// What to do when a device lists fallback credential sets
    #[serde(default)]
    pub credential_failover: CredentialFailover,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fleet_interval: default_fleet_interval(),
            maintenance_interval: default_maintenance_interval(),
            pool_size: default_pool_size(),
            attempts: default_attempts(),
            timeout_secs: default_timeout_secs(),
            retry_spacing_secs: default_retry_spacing_secs(),
            reap_safety_factor: default_reap_safety_factor(),
            credential_failover: CredentialFailover::default(),
        }
    }
}

/// Credential failover policy for devices with multiple credential sets.
///
/// The default is `FailFast`: only the primary set is used and an auth
/// rejection ends the poll. `TryAll` walks the fallback sets within the same
/// attempt before giving up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFailover {
    #[default]
    FailFast,
    TryAll,
}

fn default_fleet_interval() -> u64 {
    300
}

fn default_maintenance_interval() -> u64 {
    600
}

fn default_pool_size() -> usize {
    50
}

fn default_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_retry_spacing_secs() -> u64 {
    2
}

fn default_reap_safety_factor() -> u32 {
    2
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceConfig {
    /// Poll address, e.g. "10.0.0.1:161". Doubles as the device id.
    pub address: String,

    pub display: Option<String>,

    /// Name of the primary credential set
    pub credentials: String,

    /// Additional credential set names for failover
    pub fallback_credentials: Option<Vec<String>>,

    /// Per-device poll interval in seconds
    #[serde(default = "default_device_interval")]
    pub interval: u64,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Consecutive failed polls before an alert opens
    #[serde(default = "default_alert_after_failures")]
    pub alert_after_failures: u32,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub kind: DeviceKind,
}

fn default_device_interval() -> u64 {
    300
}

fn default_active() -> bool {
    true
}

fn default_alert_after_failures() -> u32 {
    3
}

/// A named credential set from the config file
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CredentialConfig {
    pub name: String,

    #[serde(flatten)]
    pub auth: SnmpAuth,
}

/// Secret material for one SNMP protocol version
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum SnmpAuth {
    V2c {
        community: String,
    },
    V3 {
        user: String,
        auth_key: String,
        priv_key: Option<String>,
    },
}

/// A resolved credential set. Issued once and shared by reference; devices
/// never hold their own copy of the secret material.
#[derive(Debug)]
pub struct CredentialSet {
    pub name: String,
    pub auth: SnmpAuth,
}

/// Device configuration with credential names resolved to shared sets
#[derive(Debug, Clone)]
pub struct ResolvedDeviceConfig {
    pub address: String,
    pub display: Option<String>,
    /// Primary credential set first, fallbacks after
    pub credentials: Vec<Arc<CredentialSet>>,
    pub interval: u64,
    pub active: bool,
    pub alert_after_failures: u32,
    pub severity: Severity,
    pub kind: DeviceKind,
}

impl ResolvedDeviceConfig {
    /// Display name for logging, falling back to the address
    pub fn display_name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.address)
    }
}

impl Config {
    /// Resolve credential references and apply defaults.
    ///
    /// Fails if a device names a credential set that is not configured.
    pub fn resolve(&self) -> anyhow::Result<ResolvedConfig> {
        let sets: HashMap<String, Arc<CredentialSet>> = self
            .credentials
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    Arc::new(CredentialSet {
                        name: c.name.clone(),
                        auth: c.auth.clone(),
                    }),
                )
            })
            .collect();

        let lookup = |name: &str| -> anyhow::Result<Arc<CredentialSet>> {
            sets.get(name)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown credential set: {name}"))
        };

        let mut devices = Vec::new();
        for device in self.devices.as_deref().unwrap_or_default() {
            let mut credentials = vec![lookup(&device.credentials)?];
            for fallback in device.fallback_credentials.as_deref().unwrap_or_default() {
                credentials.push(lookup(fallback)?);
            }

            devices.push(ResolvedDeviceConfig {
                address: device.address.clone(),
                display: device.display.clone(),
                credentials,
                interval: device.interval,
                active: device.active,
                alert_after_failures: device.alert_after_failures,
                severity: device.severity,
                kind: device.kind,
            });
        }

        Ok(ResolvedConfig {
            devices,
            polling: self.polling.clone().unwrap_or_default(),
            storage: self.storage.clone().unwrap_or(StorageConfig::None),
        })
    }
}

/// Fully resolved configuration ready to wire into the actor pipeline
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub devices: Vec<ResolvedDeviceConfig>,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        serde_json::from_value(serde_json::json!({
            "credentials": [
                { "name": "lab", "version": "v2c", "community": "public" },
                { "name": "core", "version": "v3", "user": "ops", "auth_key": "secret123" }
            ],
            "devices": [
                {
                    "address": "10.0.0.1:161",
                    "credentials": "lab",
                    "fallback_credentials": ["core"],
                    "interval": 60,
                    "alert_after_failures": 2,
                    "severity": "critical",
                    "kind": "router"
                },
                { "address": "10.0.0.2:161", "credentials": "core" }
            ],
            "polling": { "pool_size": 4 }
        }))
        .unwrap()
    }

    #[test]
    fn test_resolve_credentials_shared_not_copied() {
        let resolved = sample_config().resolve().unwrap();

        assert_eq!(resolved.devices.len(), 2);
        let first = &resolved.devices[0];
        assert_eq!(first.credentials.len(), 2);
        assert_eq!(first.credentials[0].name, "lab");
        assert_eq!(first.credentials[1].name, "core");

        // Both devices reference the same "core" set
        assert!(Arc::ptr_eq(
            &first.credentials[1],
            &resolved.devices[1].credentials[0]
        ));
    }

    #[test]
    fn test_resolve_defaults() {
        let resolved = sample_config().resolve().unwrap();
        let second = &resolved.devices[1];

        assert!(second.active);
        assert_eq!(second.interval, 300);
        assert_eq!(second.alert_after_failures, 3);
        assert_eq!(second.severity, Severity::Warning);
        assert_eq!(second.kind, DeviceKind::Generic);

        assert_eq!(resolved.polling.pool_size, 4);
        assert_eq!(resolved.polling.fleet_interval, 300);
        assert_eq!(resolved.polling.maintenance_interval, 600);
        assert_eq!(resolved.polling.attempts, 3);
        assert_eq!(resolved.polling.timeout_secs, 5);
        assert_eq!(
            resolved.polling.credential_failover,
            CredentialFailover::FailFast
        );
    }

    #[test]
    fn test_resolve_unknown_credential_fails() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "devices": [
                { "address": "10.0.0.1:161", "credentials": "missing" }
            ]
        }))
        .unwrap();

        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_display_name_falls_back_to_address() {
        let resolved = sample_config().resolve().unwrap();
        assert_eq!(resolved.devices[1].display_name(), "10.0.0.2:161");
    }
}
