//! Out-of-band verification against the shipping service's logs
//!
//! The shipping service is not queried over HTTP. Instead the probe samples
//! the tail of its container log and looks for every expected marker. Absence
//! within the sampling window is reported as "unconfirmed", never as a failure
//! of the order itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as AsyncCommand;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ProbeConfig, RuntimeSelection};
use crate::error::{E2eError, E2eResult};

/// Something that can return the recent log output of a named service
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn tail(&self, service: &str, lines: usize) -> E2eResult<String>;
}

/// Container runtime with a `compose logs` subcommand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Detect an installed runtime. Docker is preferred since the stack ships
    /// a docker compose file.
    pub fn detect() -> Option<Self> {
        if Command::new("docker").arg("--version").output().is_ok() {
            return Some(Self::Docker);
        }
        if Command::new("podman").arg("--version").output().is_ok() {
            return Some(Self::Podman);
        }
        None
    }

    pub fn resolve(selection: RuntimeSelection) -> E2eResult<Self> {
        match selection {
            RuntimeSelection::Docker => Ok(Self::Docker),
            RuntimeSelection::Podman => Ok(Self::Podman),
            RuntimeSelection::Auto => Self::detect().ok_or(E2eError::RuntimeNotFound),
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Reads logs with `<runtime> compose logs <service> --tail=<n>`
#[derive(Debug, Clone)]
pub struct ComposeLogs {
    runtime: ContainerRuntime,
    project_dir: Option<PathBuf>,
}

impl ComposeLogs {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self {
            runtime,
            project_dir: None,
        }
    }

    /// Run compose from this directory instead of the current one
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    pub fn args(service: &str, lines: usize) -> Vec<String> {
        vec![
            "compose".to_string(),
            "logs".to_string(),
            service.to_string(),
            format!("--tail={}", lines),
        ]
    }
}

#[async_trait]
impl LogSource for ComposeLogs {
    async fn tail(&self, service: &str, lines: usize) -> E2eResult<String> {
        let mut cmd = AsyncCommand::new(self.runtime.command());
        cmd.args(Self::args(service, lines));
        if let Some(dir) = &self.project_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| E2eError::LogSource(format!("{}: {}", self.runtime.command(), e)))?;

        if !output.status.success() {
            return Err(E2eError::LogSource(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Markers from `markers` that do not occur anywhere in `tail`
pub fn missing_markers(tail: &str, markers: &[String]) -> Vec<String> {
    markers
        .iter()
        .filter(|m| !tail.contains(m.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Every marker was present
    Confirmed,

    /// A single sample lacked some markers
    Unconfirmed { missing: Vec<String> },

    /// Polling ran out of time before all markers showed up
    TimedOut {
        missing: Vec<String>,
        last_error: Option<String>,
    },

    /// The log could not be read at all
    SourceError { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub service: String,
    pub markers: Vec<String>,
    pub status: VerificationStatus,

    /// Log text from the last sample
    pub evidence: String,

    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl VerificationOutcome {
    pub fn success(&self) -> bool {
        self.status == VerificationStatus::Confirmed
    }
}

/// Backoff schedule for repeated log samples
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub factor: f64,
}

impl PollSettings {
    pub fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max_interval)
    }
}

impl From<&ProbeConfig> for PollSettings {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            initial_interval: Duration::from_millis(config.initial_interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms.max(config.initial_interval_ms)),
            factor: config.backoff_factor.max(1.0),
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&ProbeConfig::default())
    }
}

/// Checks a service's log tail for completion markers
#[derive(Clone)]
pub struct VerificationProbe {
    source: Arc<dyn LogSource>,
    tail_lines: usize,
    poll: PollSettings,
}

impl VerificationProbe {
    pub fn new(source: Arc<dyn LogSource>, poll: PollSettings) -> Self {
        Self {
            source,
            tail_lines: 10,
            poll,
        }
    }

    /// Probe that shells out to the configured container runtime
    pub fn from_config(config: &ProbeConfig) -> E2eResult<Self> {
        let runtime = ContainerRuntime::resolve(config.runtime)?;
        info!("Reading service logs through {} compose", runtime.command());
        let mut logs = ComposeLogs::new(runtime);
        if let Some(dir) = &config.compose_dir {
            logs = logs.in_dir(dir);
        }
        Ok(Self::new(Arc::new(logs), PollSettings::from(config)))
    }

    pub fn with_tail_lines(mut self, lines: usize) -> Self {
        self.tail_lines = lines.max(1);
        self
    }

    pub fn tail_lines(&self) -> usize {
        self.tail_lines
    }

    /// Take one sample and judge it
    pub async fn verify(&self, service: &str, markers: &[String]) -> VerificationOutcome {
        let start = Instant::now();
        let (status, evidence) = match self.source.tail(service, self.tail_lines).await {
            Ok(tail) => {
                let missing = missing_markers(&tail, markers);
                if missing.is_empty() {
                    (VerificationStatus::Confirmed, tail)
                } else {
                    (VerificationStatus::Unconfirmed { missing }, tail)
                }
            }
            Err(e) => (
                VerificationStatus::SourceError {
                    message: e.to_string(),
                },
                String::new(),
            ),
        };

        VerificationOutcome {
            service: service.to_string(),
            markers: markers.to_vec(),
            status,
            evidence,
            attempts: 1,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Sample repeatedly with growing intervals until every marker is seen or
    /// the timeout passes. Always samples at least once.
    pub async fn poll(&self, service: &str, markers: &[String]) -> VerificationOutcome {
        let start = Instant::now();
        let deadline = start + self.poll.timeout;
        let mut interval = self.poll.initial_interval;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let sample = self.verify(service, markers).await;

            let (missing, last_error) = match sample.status.clone() {
                VerificationStatus::Confirmed => {
                    info!("✓ {} log shows all markers after {} attempt(s)", service, attempts);
                    return VerificationOutcome {
                        attempts,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        ..sample
                    };
                }
                VerificationStatus::Unconfirmed { missing } => {
                    debug!("Attempt {}: {} log still lacks {:?}", attempts, service, missing);
                    (missing, None)
                }
                VerificationStatus::SourceError { message } => {
                    warn!("Attempt {}: could not read {} log: {}", attempts, service, message);
                    (markers.to_vec(), Some(message))
                }
                VerificationStatus::TimedOut { missing, last_error } => (missing, last_error),
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "✗ Gave up on {} log after {} attempt(s), missing {:?}",
                    service, attempts, missing
                );
                return VerificationOutcome {
                    status: VerificationStatus::TimedOut { missing, last_error },
                    attempts,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    ..sample
                };
            }

            sleep(interval.min(deadline - now)).await;
            interval = self.poll.next_interval(interval);
        }
    }
}
