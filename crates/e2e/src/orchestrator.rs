//! Runs one scenario end to end
//!
//! ```text
//! Init ──login──▶ LoggedIn ──connect──▶ Connected ──checkout──▶ OrderCreated ──probe──▶ Verified
//!   │                │                     │                        │
//!   └────────────────┴─────── any failure ─┴──────────▶ Aborted     └─ unconfirmed: stays OrderCreated
//! ```
//!
//! The run owns exactly one `Session`. Nothing is rolled back on abort; the
//! carts and orders a run leaves behind belong to disposable test stacks.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::TargetConfig;
use crate::executor::StepExecutor;
use crate::probe::{VerificationOutcome, VerificationProbe};
use crate::report::{FlowFailure, PhaseRecord, RunReport};
use crate::scenario::Scenario;
use crate::session::{self, Session};
use crate::token::{lookup_token, AntiForgeryToken, TokenLookup};

/// Where a run currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Init,
    LoggedIn,
    Connected,
    OrderCreated,
    Verified,
    Aborted,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Aborted)
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::LoggedIn => "logged_in",
            Self::Connected => "connected",
            Self::OrderCreated => "order_created",
            Self::Verified => "verified",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Sequences login, token fetch, workflow steps and verification
pub struct Orchestrator {
    target: TargetConfig,
    scenario: Scenario,
    probe: Option<VerificationProbe>,
}

struct Run {
    state: FlowState,
    phases: Vec<PhaseRecord>,
}

impl Run {
    fn record(&mut self, phase: &str, success: bool, status: Option<u16>, detail: Option<String>, duration: Duration) {
        self.phases.push(PhaseRecord {
            phase: phase.to_string(),
            state_after: self.state,
            success,
            status,
            detail,
            duration_ms: duration.as_millis() as u64,
        });
    }
}

impl Orchestrator {
    /// `probe` may be `None` to skip verification even when the scenario asks for it
    pub fn new(target: TargetConfig, scenario: Scenario, probe: Option<VerificationProbe>) -> Self {
        Self {
            target,
            scenario,
            probe,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Execute the scenario. Never returns early with an error: every failure
    /// ends up in the report.
    pub async fn run(&self) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let scenario = &self.scenario;

        info!("Running scenario '{}' against {} (run {})", scenario.name, self.target.base_url, run_id);

        let mut run = Run {
            state: FlowState::Init,
            phases: Vec::new(),
        };

        let finish = |run: Run, failure: Option<FlowFailure>, verification: Option<VerificationOutcome>| RunReport {
            run_id,
            scenario: scenario.name.clone(),
            base_url: self.target.base_url.clone(),
            started_at,
            final_state: run.state,
            phases: run.phases,
            verification,
            failure,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        // Login
        let phase_start = Instant::now();
        let session = match session::login(&self.target, &scenario.login, &scenario.token_field).await {
            Ok(session) => session,
            Err(failure) => {
                run.state = FlowState::Aborted;
                run.record("login", false, None, Some(failure.to_string()), phase_start.elapsed());
                return finish(run, Some(FlowFailure::Auth { reason: failure }), None);
            }
        };
        run.state = FlowState::LoggedIn;
        debug!("Session cookies present: {}", session.has_cookies());
        run.record("login", true, Some(200), session.identity().map(str::to_string), phase_start.elapsed());

        settle("login", scenario.after_login_delay()).await;

        let token = self.load_token(&session, &mut run).await;

        // Workflow steps
        let executor = StepExecutor::new(scenario.token_field.clone());
        for step in &scenario.steps {
            let result = executor.execute(&session, step, token.as_ref()).await;
            let elapsed = Duration::from_millis(result.duration_ms);

            if let Some(reason) = result.failure.clone() {
                run.state = FlowState::Aborted;
                run.record(&step.name, false, result.status, Some(reason.to_string()), elapsed);
                error!("Aborting '{}' after step '{}'", scenario.name, step.name);
                return finish(
                    run,
                    Some(FlowFailure::Step {
                        step: step.name.clone(),
                        reason,
                    }),
                    None,
                );
            }

            if let Some(next) = step.advances_to {
                run.state = next;
            }
            let detail = result.advisory_seen.map(|seen| {
                format!(
                    "advisory marker {}",
                    if seen { "present" } else { "absent" }
                )
            });
            run.record(&step.name, true, result.status, detail, elapsed);

            settle(&step.name, step.settle_delay()).await;
        }

        if run.state != FlowState::OrderCreated {
            let reached = run.state;
            run.state = FlowState::Aborted;
            run.record("workflow", false, None, Some(format!("stopped in {}", reached)), Duration::ZERO);
            error!("Aborting '{}': workflow ended in {} without creating an order", scenario.name, reached);
            return finish(run, Some(FlowFailure::OrderNotCreated { reached }), None);
        }

        // Verification
        let verification = match (&scenario.verification, &self.probe) {
            (Some(spec), Some(probe)) => {
                settle("workflow", spec.settle_delay()).await;

                let probe = probe.clone().with_tail_lines(spec.tail_lines);
                let outcome = probe.poll(&spec.service, &spec.markers).await;
                if outcome.success() {
                    run.state = FlowState::Verified;
                    info!("✓ {} processed the order", spec.service);
                } else {
                    warn!("Could not confirm processing in {} logs", spec.service);
                }
                run.record(
                    "verify",
                    outcome.success(),
                    None,
                    Some(format!("{} attempt(s)", outcome.attempts)),
                    Duration::from_millis(outcome.elapsed_ms),
                );
                Some(outcome)
            }
            (Some(spec), None) => {
                info!("Verification against {} skipped", spec.service);
                None
            }
            (None, _) => None,
        };

        finish(run, None, verification)
    }

    async fn load_token(&self, session: &Session, run: &mut Run) -> Option<AntiForgeryToken> {
        let page = self.scenario.token_page.as_deref()?;
        let phase_start = Instant::now();

        let lookup = lookup_token(session, page, &self.scenario.token_field).await;
        let status = lookup.status();
        let (reachable, detail) = match &lookup {
            TokenLookup::Found { token, .. } => {
                info!("Anti-forgery token found on {}: {:?}", page, token);
                (true, "present".to_string())
            }
            TokenLookup::Absent { .. } => {
                info!("No anti-forgery token on {}; continuing without one", page);
                (true, "absent".to_string())
            }
            TokenLookup::Unreachable { message } => {
                warn!("Token page {} unreachable; continuing without a token", page);
                (false, format!("unreachable: {}", message))
            }
        };
        run.record("token", reachable, status, Some(detail), phase_start.elapsed());
        lookup.into_token()
    }
}

async fn settle(after: &str, delay: Duration) {
    if !delay.is_zero() {
        info!("Waiting {} ms after {}", delay.as_millis(), after);
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order_follows_the_happy_path() {
        assert!(FlowState::Init < FlowState::LoggedIn);
        assert!(FlowState::LoggedIn < FlowState::Connected);
        assert!(FlowState::Connected < FlowState::OrderCreated);
        assert!(FlowState::OrderCreated < FlowState::Verified);
    }

    #[test]
    fn test_terminal_states() {
        assert!(FlowState::Verified.is_terminal());
        assert!(FlowState::Aborted.is_terminal());
        assert!(!FlowState::OrderCreated.is_terminal());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&FlowState::OrderCreated).unwrap();
        assert_eq!(json, "\"order_created\"");
        assert_eq!(FlowState::LoggedIn.to_string(), "logged_in");
    }

    #[tokio::test]
    async fn test_unreachable_target_aborts_at_login() {
        let target = TargetConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_ms: 500,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(target, Scenario::order_flow(), None);

        let report = orchestrator.run().await;
        assert_eq!(report.final_state, FlowState::Aborted);
        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.phases[0].phase, "login");
        assert!(matches!(report.failure, Some(FlowFailure::Auth { .. })));
    }
}
