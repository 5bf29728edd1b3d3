//! Error types for the order flow harness
//!
//! `E2eError` covers harness setup problems only. Failures of the system under
//! test (rejected login, a step whose predicate fails, missing log evidence)
//! are ordinary values carried in the run report.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("HTTP client could not be built: {0}")]
    ClientBuild(String),

    #[error("Log source unavailable: {0}")]
    LogSource(String),

    #[error("No container runtime found (tried docker, podman)")]
    RuntimeNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;
