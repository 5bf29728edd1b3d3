//! Workflow step execution
//!
//! Issues one step against the session, then judges the response with the
//! step's own policy. Transport errors are folded into a failed `StepResult`
//! so the orchestrator always gets a value back.

use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::session::{excerpt, read_response, Session};
use crate::step::{StepFailureReason, StepMethod, WorkflowStep};
use crate::token::AntiForgeryToken;

/// Outcome of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,

    /// `None` when no response arrived
    pub status: Option<u16>,

    #[serde(skip)]
    pub body: String,

    pub success: bool,

    pub failure: Option<StepFailureReason>,

    /// Whether the advisory marker showed up, when the step declares one
    pub advisory_seen: Option<bool>,

    pub duration_ms: u64,
}

/// Runs workflow steps, attaching the anti-forgery token under `token_field`
#[derive(Debug, Clone)]
pub struct StepExecutor {
    token_field: String,
}

impl StepExecutor {
    pub fn new(token_field: impl Into<String>) -> Self {
        Self {
            token_field: token_field.into(),
        }
    }

    pub fn token_field(&self) -> &str {
        &self.token_field
    }

    /// Merge the step's fixed fields with the token.
    ///
    /// The token field is present exactly when a token is supplied; a step that
    /// hard-codes the same field name has it dropped.
    pub fn build_payload(
        &self,
        step: &WorkflowStep,
        token: Option<&AntiForgeryToken>,
    ) -> Vec<(String, String)> {
        let mut payload: Vec<(String, String)> = step
            .fields
            .iter()
            .filter(|(name, _)| name != &self.token_field)
            .cloned()
            .collect();

        if let Some(token) = token {
            payload.push((self.token_field.clone(), token.as_str().to_string()));
        }

        payload
    }

    /// Execute a single step
    pub async fn execute(
        &self,
        session: &Session,
        step: &WorkflowStep,
        token: Option<&AntiForgeryToken>,
    ) -> StepResult {
        let start = Instant::now();

        if let Some(prime) = &step.prime_path {
            match session.fetch_page(prime).await {
                Ok((status, _)) => info!("{}: primed {} ({})", step.name, prime, status),
                Err(e) => warn!("{}: could not prime {}: {}", step.name, prime, e),
            }
        }

        let payload = self.build_payload(step, token);
        debug!(
            "{}: {:?} {} with fields [{}]",
            step.name,
            step.method,
            step.path,
            payload.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(", ")
        );

        let client = session.client(step.follow_redirects);
        let url = session.url(&step.path);
        let request = match step.method {
            StepMethod::Get => client.get(&url).query(&payload),
            StepMethod::Post => client.post(&url).form(&payload),
        };

        let response = match request.send().await {
            Ok(response) => read_response(response).await,
            Err(e) => Err(e),
        };

        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, body) = match response {
            Ok(pair) => pair,
            Err(e) => {
                error!("✗ {}: request failed: {}", step.name, e);
                return StepResult {
                    step_name: step.name.clone(),
                    status: None,
                    body: String::new(),
                    success: false,
                    failure: Some(StepFailureReason::Transport {
                        message: e.to_string(),
                    }),
                    advisory_seen: None,
                    duration_ms,
                };
            }
        };

        info!("{} status: {}", step.name, status);
        debug!("{} body: {}", step.name, excerpt(&body, 200));

        let advisory_seen = step.advisory_marker.as_ref().map(|marker| {
            let seen = body.contains(marker.as_str());
            if seen {
                info!("{}: response mentions '{}'", step.name, marker);
            } else {
                warn!("{}: response does not mention '{}' (not required)", step.name, marker);
            }
            seen
        });

        let failure = step.success.evaluate(status, &body).err();
        match &failure {
            None => info!("✓ {} ({} ms)", step.name, duration_ms),
            Some(reason) => error!(
                "✗ {} - {} [expected {}]",
                step.name,
                reason,
                step.success.describe()
            ),
        }

        StepResult {
            step_name: step.name.clone(),
            status: Some(status),
            body,
            success: failure.is_none(),
            failure,
            advisory_seen,
            duration_ms,
        }
    }
}
