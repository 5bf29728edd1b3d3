//! Run reports and exit codes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::E2eResult;
use crate::orchestrator::FlowState;
use crate::probe::VerificationOutcome;
use crate::session::AuthFailure;
use crate::step::StepFailureReason;

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowFailure {
    Auth {
        reason: AuthFailure,
    },
    Step {
        step: String,
        reason: StepFailureReason,
    },
    /// Every step succeeded but none of them created an order
    OrderNotCreated {
        reached: FlowState,
    },
}

impl std::fmt::Display for FlowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { reason } => write!(f, "login failed: {}", reason),
            Self::Step { step, reason } => write!(f, "step '{}' failed: {}", step, reason),
            Self::OrderNotCreated { reached } => {
                write!(f, "workflow ended in {} without creating an order", reached)
            }
        }
    }
}

/// One completed (or failed) phase of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: String,
    pub state_after: FlowState,
    pub success: bool,
    pub status: Option<u16>,
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Summary judgement of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    /// The shipping service's log confirmed the order
    Verified,
    /// Workflow finished and no verification was requested
    Completed,
    /// Workflow finished but the log evidence never showed up
    Unconfirmed,
    Aborted,
}

impl RunVerdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Verified | Self::Completed => 0,
            Self::Aborted => 1,
            Self::Unconfirmed => 3,
        }
    }
}

/// Exit code for a harness setup error (bad config, bad scenario file)
pub const EXIT_HARNESS_ERROR: i32 = 2;

/// Everything one scenario run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub base_url: String,
    pub started_at: DateTime<Utc>,
    pub final_state: FlowState,
    pub phases: Vec<PhaseRecord>,
    pub verification: Option<VerificationOutcome>,
    pub failure: Option<FlowFailure>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn verdict(&self) -> RunVerdict {
        if self.final_state == FlowState::Aborted {
            RunVerdict::Aborted
        } else if self.final_state == FlowState::Verified {
            RunVerdict::Verified
        } else if self.verification.is_some() {
            RunVerdict::Unconfirmed
        } else {
            RunVerdict::Completed
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict().exit_code()
    }

    /// Console narration of the final outcome
    pub fn log_summary(&self) {
        match self.verdict() {
            RunVerdict::Verified => info!("✓ {}: order verified ({} ms)", self.scenario, self.duration_ms),
            RunVerdict::Completed => info!(
                "✓ {}: workflow completed in state {} ({} ms)",
                self.scenario, self.final_state, self.duration_ms
            ),
            RunVerdict::Unconfirmed => {
                warn!("? {}: order placed but processing could not be confirmed", self.scenario);
                if let Some(v) = &self.verification {
                    if !v.evidence.is_empty() {
                        info!("Recent {} logs:\n{}", v.service, v.evidence);
                    }
                }
            }
            RunVerdict::Aborted => error!(
                "✗ {}: {}",
                self.scenario,
                self.failure
                    .as_ref()
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "aborted".to_string())
            ),
        }
    }
}

/// Result of running several scenarios back to back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub verified: usize,
    pub completed: usize,
    pub unconfirmed: usize,
    pub aborted: usize,
    pub runs: Vec<RunReport>,
}

impl SuiteReport {
    pub fn new(runs: Vec<RunReport>) -> Self {
        let count = |v: RunVerdict| runs.iter().filter(|r| r.verdict() == v).count();
        Self {
            total: runs.len(),
            verified: count(RunVerdict::Verified),
            completed: count(RunVerdict::Completed),
            unconfirmed: count(RunVerdict::Unconfirmed),
            aborted: count(RunVerdict::Aborted),
            runs,
        }
    }

    /// Aborts outrank unconfirmed runs
    pub fn exit_code(&self) -> i32 {
        if self.aborted > 0 {
            RunVerdict::Aborted.exit_code()
        } else if self.unconfirmed > 0 {
            RunVerdict::Unconfirmed.exit_code()
        } else {
            0
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        info!("Report written to: {}", path.display());
        Ok(())
    }

    pub fn log_summary(&self) {
        info!("");
        info!(
            "Results: {} verified, {} completed, {} unconfirmed, {} aborted",
            self.verified, self.completed, self.unconfirmed, self.aborted
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::VerificationStatus;

    fn report(state: FlowState, verification: Option<VerificationStatus>) -> RunReport {
        RunReport {
            run_id: Uuid::new_v4(),
            scenario: "order-flow".to_string(),
            base_url: "http://localhost:8080".to_string(),
            started_at: Utc::now(),
            final_state: state,
            phases: Vec::new(),
            verification: verification.map(|status| VerificationOutcome {
                service: "ups-backend".to_string(),
                markers: vec!["ShipmentCreated".to_string()],
                status,
                evidence: String::new(),
                attempts: 1,
                elapsed_ms: 0,
            }),
            failure: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn test_verdicts_and_exit_codes() {
        let verified = report(FlowState::Verified, Some(VerificationStatus::Confirmed));
        assert_eq!(verified.verdict(), RunVerdict::Verified);
        assert_eq!(verified.exit_code(), 0);

        let unconfirmed = report(
            FlowState::OrderCreated,
            Some(VerificationStatus::TimedOut {
                missing: vec!["ShipmentCreated".to_string()],
                last_error: None,
            }),
        );
        assert_eq!(unconfirmed.verdict(), RunVerdict::Unconfirmed);
        assert_eq!(unconfirmed.exit_code(), 3);

        let completed = report(FlowState::OrderCreated, None);
        assert_eq!(completed.verdict(), RunVerdict::Completed);
        assert_eq!(completed.exit_code(), 0);

        let aborted = report(FlowState::Aborted, None);
        assert_eq!(aborted.exit_code(), 1);
    }

    #[test]
    fn test_suite_exit_code_prefers_aborted() {
        let suite = SuiteReport::new(vec![
            report(FlowState::Verified, Some(VerificationStatus::Confirmed)),
            report(
                FlowState::OrderCreated,
                Some(VerificationStatus::Unconfirmed { missing: vec![] }),
            ),
            report(FlowState::Aborted, None),
        ]);
        assert_eq!(suite.total, 3);
        assert_eq!(suite.verified, 1);
        assert_eq!(suite.unconfirmed, 1);
        assert_eq!(suite.aborted, 1);
        assert_eq!(suite.exit_code(), 1);

        let suite = SuiteReport::new(vec![report(
            FlowState::OrderCreated,
            Some(VerificationStatus::Unconfirmed { missing: vec![] }),
        )]);
        assert_eq!(suite.exit_code(), 3);
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.json");
        let mut run = report(FlowState::Aborted, None);
        run.failure = Some(FlowFailure::Step {
            step: "connect-world".to_string(),
            reason: StepFailureReason::MissingPhrase {
                phrase: "Connected to world simulator".to_string(),
            },
        });

        SuiteReport::new(vec![run]).write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["aborted"], 1);
        assert_eq!(value["runs"][0]["final_state"], "aborted");
        assert_eq!(value["runs"][0]["failure"]["kind"], "step");
        assert_eq!(value["runs"][0]["failure"]["reason"]["kind"], "missing_phrase");
    }
}
