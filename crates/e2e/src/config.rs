//! Harness configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{E2eError, E2eResult};

/// Top-level harness configuration, normally read from `miniups-e2e.toml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// The ordering service under test
    pub target: TargetConfig,

    /// Out-of-band log probe against the shipping service
    pub probe: ProbeConfig,
}

/// Where the ordering service lives and how to talk to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL, without a trailing slash
    pub base_url: String,

    /// Per-request timeout
    pub request_timeout_ms: u64,

    /// User-Agent header sent on every request
    pub user_agent: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 10_000,
            user_agent: concat!("miniups-e2e/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl TargetConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Join a scenario path onto the base URL
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// Container runtime used to read service logs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeSelection {
    #[default]
    Auto,
    Docker,
    Podman,
}

/// Verification polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub runtime: RuntimeSelection,

    /// Directory holding the compose file. Defaults to the working directory.
    pub compose_dir: Option<PathBuf>,

    /// Give up on the log evidence after this long
    pub timeout_ms: u64,

    /// First wait between log samples
    pub initial_interval_ms: u64,

    /// Upper bound for the wait between samples
    pub max_interval_ms: u64,

    /// Growth factor applied to the interval after each miss
    pub backoff_factor: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSelection::Auto,
            compose_dir: None,
            timeout_ms: 30_000,
            initial_interval_ms: 1_000,
            max_interval_ms: 8_000,
            backoff_factor: 2.0,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> E2eResult<()> {
        if !(self.target.base_url.starts_with("http://") || self.target.base_url.starts_with("https://")) {
            return Err(E2eError::Config(format!(
                "target.base_url must be an http(s) URL, got '{}'",
                self.target.base_url
            )));
        }
        if self.probe.backoff_factor < 1.0 {
            return Err(E2eError::Config(format!(
                "probe.backoff_factor must be >= 1.0, got {}",
                self.probe.backoff_factor
            )));
        }
        if self.probe.initial_interval_ms == 0 {
            return Err(E2eError::Config("probe.initial_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join() {
        let target = TargetConfig {
            base_url: "http://localhost:8080/".to_string(),
            ..Default::default()
        };
        assert_eq!(target.url("/cart/add"), "http://localhost:8080/cart/add");
        assert_eq!(target.url("login"), "http://localhost:8080/login");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.target.base_url, "http://localhost:8080");
        assert_eq!(config.probe.runtime, RuntimeSelection::Auto);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("harness.toml");

        let mut config = HarnessConfig::default();
        config.target.base_url = "http://amazon:8080".to_string();
        config.probe.runtime = RuntimeSelection::Podman;
        config.save(&path).unwrap();

        let loaded = HarnessConfig::load(&path).unwrap();
        assert_eq!(loaded.target.base_url, "http://amazon:8080");
        assert_eq!(loaded.probe.runtime, RuntimeSelection::Podman);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, "[probe]\ntimeout_ms = 500\n").unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.probe.timeout_ms, 500);
        assert_eq!(config.probe.max_interval_ms, 8_000);
        assert_eq!(config.target.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(&path, "[target]\nbase_url = \"localhost:8080\"\n").unwrap();

        assert!(matches!(HarnessConfig::load(&path), Err(E2eError::Config(_))));
    }
}
