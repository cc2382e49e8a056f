use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
pub const ENDPOINT_ENV: &str = "AZURE_RESOURCE_MANAGER_ENDPOINT";

/// Top-level configuration from `.azscan.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Subscriptions scanned concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Plugins scanned concurrently within one subscription.
    #[serde(default = "default_plugin_workers")]
    pub plugin_workers: usize,
    /// Scanner keys to run; empty means all.
    #[serde(default)]
    pub scanners: Vec<String>,
    #[serde(default = "default_true")]
    pub mask_subscriptions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default)]
    pub format: Option<String>,
    /// Also print compliant results in console output.
    #[serde(default)]
    pub include_compliant: bool,
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_plugin_workers() -> usize {
    8
}

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    std::env::var(ENDPOINT_ENV)
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.into())
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            plugin_workers: default_plugin_workers(),
            scanners: Vec::new(),
            mask_subscriptions: true,
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.scan.workers = config.scan.workers.max(1);
        config.scan.plugin_workers = config.scan.plugin_workers.max(1);
        Ok(config)
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# azscan configuration

[scan]
# Subscriptions scanned in parallel (defaults to the number of logical CPUs).
# workers = 8

# Scanners run in parallel inside one subscription.
plugin_workers = 8

# Scanner keys to run; empty runs every registered scanner.
# scanners = ["kv", "st", "cosmos"]

# Mask subscription ids in logs and reports.
mask_subscriptions = true

[upstream]
# Resource Manager endpoint (AZURE_RESOURCE_MANAGER_ENDPOINT overrides the default).
endpoint = "https://management.azure.com"
timeout_secs = 60
max_retries = 3

[output]
# console, json, sarif
format = "console"
include_compliant = false
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/.azscan.toml")).unwrap();
        assert_eq!(config.scan.plugin_workers, 8);
        assert!(config.scan.workers >= 1);
        assert!(config.scan.mask_subscriptions);
        assert_eq!(config.upstream.max_retries, 3);
    }

    #[test]
    fn starter_config_parses() {
        let config: Config = toml::from_str(Config::starter_toml()).unwrap();
        assert_eq!(config.output.format.as_deref(), Some("console"));
        assert_eq!(config.upstream.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn zero_workers_are_clamped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\nworkers = 0\nplugin_workers = 0\nscanners = [\"kv\"]").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.scan.workers, 1);
        assert_eq!(config.scan.plugin_workers, 1);
        assert_eq!(config.scan.scanners, vec!["kv".to_string()]);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scan\nworkers = ").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
