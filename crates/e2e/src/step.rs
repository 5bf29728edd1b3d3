//! Workflow step descriptors
//!
//! Endpoints of the ordering service do not agree on what success looks like,
//! so each step carries its own `SuccessPolicy` instead of one global rule.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::orchestrator::FlowState;

/// HTTP method of a step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepMethod {
    Get,
    #[default]
    Post,
}

/// When a step's response counts as success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// Any 2xx or 3xx. The body is not inspected.
    NonErrorStatus,

    /// Exactly this status
    Status { code: u16 },

    /// Exactly this status, and the body contains `phrase`
    StatusAndPhrase { code: u16, phrase: String },

    /// Exactly this status, and the body contains every marker
    StatusAndAllMarkers { code: u16, markers: Vec<String> },
}

/// Why a step did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailureReason {
    /// The request never produced a response
    Transport { message: String },

    /// 4xx or 5xx where any non-error status was acceptable
    ErrorStatus { status: u16 },

    UnexpectedStatus { expected: u16, actual: u16 },

    MissingPhrase { phrase: String },

    MissingMarkers { missing: Vec<String> },
}

impl std::fmt::Display for StepFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { message } => write!(f, "transport failure: {}", message),
            Self::ErrorStatus { status } => write!(f, "error status {}", status),
            Self::UnexpectedStatus { expected, actual } => {
                write!(f, "status {} (expected {})", actual, expected)
            }
            Self::MissingPhrase { phrase } => write!(f, "response lacks '{}'", phrase),
            Self::MissingMarkers { missing } => {
                write!(f, "response lacks {}", missing.join(", "))
            }
        }
    }
}

impl SuccessPolicy {
    /// Apply the policy to a received response
    pub fn evaluate(&self, status: u16, body: &str) -> Result<(), StepFailureReason> {
        match self {
            Self::NonErrorStatus => {
                if (200..400).contains(&status) {
                    Ok(())
                } else {
                    Err(StepFailureReason::ErrorStatus { status })
                }
            }
            Self::Status { code } => expect_status(*code, status),
            Self::StatusAndPhrase { code, phrase } => {
                expect_status(*code, status)?;
                if body.contains(phrase.as_str()) {
                    Ok(())
                } else {
                    Err(StepFailureReason::MissingPhrase {
                        phrase: phrase.clone(),
                    })
                }
            }
            Self::StatusAndAllMarkers { code, markers } => {
                expect_status(*code, status)?;
                let missing: Vec<String> = markers
                    .iter()
                    .filter(|m| !body.contains(m.as_str()))
                    .cloned()
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(StepFailureReason::MissingMarkers { missing })
                }
            }
        }
    }

    /// Short description for log lines
    pub fn describe(&self) -> String {
        match self {
            Self::NonErrorStatus => "2xx/3xx".to_string(),
            Self::Status { code } => format!("status {}", code),
            Self::StatusAndPhrase { code, phrase } => format!("status {} + '{}'", code, phrase),
            Self::StatusAndAllMarkers { code, markers } => {
                format!("status {} + all of [{}]", code, markers.join(", "))
            }
        }
    }
}

fn expect_status(expected: u16, actual: u16) -> Result<(), StepFailureReason> {
    if expected == actual {
        Ok(())
    } else {
        Err(StepFailureReason::UnexpectedStatus { expected, actual })
    }
}

/// One HTTP step of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Name used in logs and the report
    pub name: String,

    #[serde(default)]
    pub method: StepMethod,

    /// Path relative to the target base URL
    pub path: String,

    /// Fixed form fields, sent in order
    #[serde(default)]
    pub fields: Vec<(String, String)>,

    pub success: SuccessPolicy,

    /// Page to GET before the request, e.g. the form being submitted
    #[serde(default)]
    pub prime_path: Option<String>,

    /// Resolve redirects instead of judging the 3xx itself
    #[serde(default)]
    pub follow_redirects: bool,

    /// Logged when present or absent, never gates success
    #[serde(default)]
    pub advisory_marker: Option<String>,

    /// State the run enters once this step succeeds
    #[serde(default)]
    pub advances_to: Option<FlowState>,

    /// Settling delay after the step succeeds
    #[serde(default)]
    pub settle_ms: u64,
}

impl WorkflowStep {
    pub fn post(name: &str, path: &str, success: SuccessPolicy) -> Self {
        Self {
            name: name.to_string(),
            method: StepMethod::Post,
            path: path.to_string(),
            fields: Vec::new(),
            success,
            prime_path: None,
            follow_redirects: false,
            advisory_marker: None,
            advances_to: None,
            settle_ms: 0,
        }
    }

    pub fn field(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn primed_by(mut self, path: &str) -> Self {
        self.prime_path = Some(path.to_string());
        self
    }

    pub fn advisory(mut self, marker: &str) -> Self {
        self.advisory_marker = Some(marker.to_string());
        self
    }

    pub fn advances_to(mut self, state: FlowState) -> Self {
        self.advances_to = Some(state);
        self
    }

    pub fn settle(mut self, ms: u64) -> Self {
        self.settle_ms = ms;
        self
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}
