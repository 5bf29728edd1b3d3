//! Declarative order-flow scenarios
//!
//! A scenario fixes everything one run does: the login, the ordered workflow
//! steps with their success policies, the settling delays, and what the
//! shipping service's log must show afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{E2eError, E2eResult};
use crate::orchestrator::FlowState;
use crate::session::{Credentials, LoginSpec};
use crate::step::{SuccessPolicy, WorkflowStep};
use crate::token::DEFAULT_TOKEN_FIELD;

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Form field carrying the anti-forgery token
    #[serde(default = "default_token_field")]
    pub token_field: String,

    pub login: LoginSpec,

    /// Page the token is read from once logged in. `None` skips the fetch.
    #[serde(default = "default_token_page")]
    pub token_page: Option<String>,

    /// Settling delay after a successful login
    #[serde(default = "default_after_login_ms")]
    pub after_login_ms: u64,

    /// Steps to execute in order
    pub steps: Vec<WorkflowStep>,

    #[serde(default)]
    pub verification: Option<VerificationSpec>,
}

fn default_token_field() -> String {
    DEFAULT_TOKEN_FIELD.to_string()
}

fn default_token_page() -> Option<String> {
    Some("/".to_string())
}

fn default_after_login_ms() -> u64 {
    2_000
}

/// What to look for in the shipping service's log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSpec {
    /// Compose service name
    pub service: String,

    /// All of these must appear in the tail
    pub markers: Vec<String>,

    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    /// Settling delay before the first sample
    #[serde(default = "default_pre_verification_ms")]
    pub settle_ms: u64,
}

fn default_tail_lines() -> usize {
    10
}

fn default_pre_verification_ms() -> u64 {
    5_000
}

impl VerificationSpec {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios under a directory, sorted by file path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn after_login_delay(&self) -> Duration {
        Duration::from_millis(self.after_login_ms)
    }

    /// Reject scenarios the orchestrator could not run meaningfully
    pub fn validate(&self) -> E2eResult<()> {
        let fail = |msg: String| Err(E2eError::ScenarioParse(format!("{}: {}", self.name, msg)));

        if self.steps.is_empty() {
            return fail("scenario has no steps".to_string());
        }
        if self.token_field.trim().is_empty() {
            return fail("token_field must not be empty".to_string());
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return fail(format!("duplicate step name '{}'", step.name));
            }
        }

        let mut reached = FlowState::LoggedIn;
        for step in &self.steps {
            if let Some(next) = step.advances_to {
                if !matches!(next, FlowState::Connected | FlowState::OrderCreated) {
                    return fail(format!("step '{}' cannot advance to {:?}", step.name, next));
                }
                if next < reached {
                    return fail(format!(
                        "step '{}' moves the run back from {:?} to {:?}",
                        step.name, reached, next
                    ));
                }
                reached = next;
            }
        }
        if reached != FlowState::OrderCreated {
            return fail("no step advances the run to order_created".to_string());
        }

        if let Some(verification) = &self.verification {
            if verification.markers.is_empty() {
                return fail("verification needs at least one marker".to_string());
            }
            if verification.service.trim().is_empty() {
                return fail("verification service must be named".to_string());
            }
        }

        Ok(())
    }

    /// Connect the store to world 1, buy product 1, and check that the
    /// shipping service created a shipment with a tracking number.
    pub fn order_flow() -> Self {
        Self {
            name: "order-flow".to_string(),
            description: "Amazon order reaches UPS and gets a tracking number".to_string(),
            tags: vec!["smoke".to_string(), "order".to_string()],
            token_field: default_token_field(),
            login: default_login(),
            token_page: default_token_page(),
            after_login_ms: default_after_login_ms(),
            steps: vec![
                WorkflowStep::post(
                    "connect-world",
                    "/admin/connect-world",
                    SuccessPolicy::StatusAndPhrase {
                        code: 200,
                        phrase: "Connected to world simulator".to_string(),
                    },
                )
                .primed_by("/admin/connect-world")
                .field("action", "connect_existing")
                .field("world_id", 1)
                .field("sim_speed", 1000)
                .advances_to(FlowState::Connected)
                .settle(2_000),
                WorkflowStep::post("add-to-cart", "/cart/add", SuccessPolicy::NonErrorStatus)
                    .field("product_id", 1)
                    .field("quantity", 1),
                WorkflowStep::post("checkout", "/checkout", SuccessPolicy::Status { code: 200 })
                    .field("destination_x", 10)
                    .field("destination_y", 10)
                    .field("ups_account", "test_user@example.com")
                    .advances_to(FlowState::OrderCreated),
            ],
            verification: Some(VerificationSpec {
                service: "ups-backend".to_string(),
                markers: vec!["ShipmentCreated".to_string(), "tracking number".to_string()],
                tail_lines: default_tail_lines(),
                settle_ms: default_pre_verification_ms(),
            }),
        }
    }

    /// Cart-only variant: add product 1 and check out through the cart page.
    /// Redirects are not followed, so only a 200 from checkout creates the order.
    pub fn cart_checkout() -> Self {
        Self {
            name: "cart-checkout".to_string(),
            description: "Place an order through /cart/checkout".to_string(),
            tags: vec!["order".to_string()],
            token_field: default_token_field(),
            login: default_login(),
            token_page: default_token_page(),
            after_login_ms: default_after_login_ms(),
            steps: vec![
                WorkflowStep::post("add-to-cart", "/cart/add", SuccessPolicy::NonErrorStatus)
                    .field("product_id", 1)
                    .field("quantity", 1),
                WorkflowStep::post("checkout", "/cart/checkout", SuccessPolicy::Status { code: 200 })
                    .field("destination_x", 15)
                    .field("destination_y", 20)
                    .advisory("Order")
                    .advances_to(FlowState::OrderCreated),
            ],
            verification: None,
        }
    }
}

fn default_login() -> LoginSpec {
    LoginSpec {
        path: "/login".to_string(),
        credentials: Credentials {
            email: "admin@example.com".to_string(),
            password: "admin".to_string(),
        },
        identity_marker: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_FLOW_YAML: &str = r#"
name: order-flow
description: Amazon order reaches UPS
tags:
  - smoke
login:
  email: admin@example.com
  password: admin
steps:
  - name: connect-world
    path: /admin/connect-world
    prime_path: /admin/connect-world
    fields:
      - [action, connect_existing]
      - [world_id, "1"]
      - [sim_speed, "1000"]
    success:
      kind: status_and_phrase
      code: 200
      phrase: Connected to world simulator
    advances_to: connected
    settle_ms: 2000
  - name: add-to-cart
    path: /cart/add
    fields:
      - [product_id, "1"]
      - [quantity, "1"]
    success:
      kind: non_error_status
  - name: checkout
    path: /checkout
    fields:
      - [destination_x, "10"]
      - [destination_y, "10"]
      - [ups_account, test_user@example.com]
    success:
      kind: status
      code: 200
    advances_to: order_created
verification:
  service: ups-backend
  markers:
    - ShipmentCreated
    - tracking number
"#;

    #[test]
    fn test_parse_order_flow() {
        let scenario = Scenario::from_yaml(ORDER_FLOW_YAML).unwrap();
        assert_eq!(scenario.name, "order-flow");
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.token_field, "csrf_token");
        assert_eq!(scenario.token_page.as_deref(), Some("/"));
        assert_eq!(scenario.after_login_ms, 2_000);
        assert_eq!(scenario.steps[0].advances_to, Some(FlowState::Connected));

        let verification = scenario.verification.unwrap();
        assert_eq!(verification.tail_lines, 10);
        assert_eq!(verification.settle_ms, 5_000);
    }

    #[test]
    fn test_yaml_matches_builtin() {
        let parsed = Scenario::from_yaml(ORDER_FLOW_YAML).unwrap();
        let builtin = Scenario::order_flow();

        assert_eq!(parsed.steps.len(), builtin.steps.len());
        for (a, b) in parsed.steps.iter().zip(&builtin.steps) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.path, b.path);
            assert_eq!(a.fields, b.fields);
            assert_eq!(a.success, b.success);
            assert_eq!(a.advances_to, b.advances_to);
        }
    }

    #[test]
    fn test_builtins_validate() {
        Scenario::order_flow().validate().unwrap();
        Scenario::cart_checkout().validate().unwrap();
    }

    #[test]
    fn test_rejects_backwards_state() {
        let mut scenario = Scenario::order_flow();
        scenario.steps[0].advances_to = Some(FlowState::OrderCreated);
        scenario.steps[2].advances_to = Some(FlowState::Connected);
        assert!(matches!(scenario.validate(), Err(E2eError::ScenarioParse(_))));
    }

    #[test]
    fn test_rejects_terminal_state_on_step() {
        let mut scenario = Scenario::order_flow();
        scenario.steps[2].advances_to = Some(FlowState::Verified);
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_rejects_steps_that_never_create_an_order() {
        let mut scenario = Scenario::cart_checkout();
        scenario.steps.truncate(1);
        let err = scenario.validate().unwrap_err();
        assert!(err.to_string().contains("order_created"));

        let mut scenario = Scenario::order_flow();
        for step in &mut scenario.steps {
            step.advances_to = None;
        }
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_builtin_checkouts_require_200() {
        for scenario in [Scenario::order_flow(), Scenario::cart_checkout()] {
            let checkout = scenario.steps.iter().find(|s| s.name == "checkout").unwrap();
            assert_eq!(checkout.success, SuccessPolicy::Status { code: 200 });
        }
    }

    #[test]
    fn test_rejects_duplicate_step_names() {
        let mut scenario = Scenario::cart_checkout();
        scenario.steps[1].name = "add-to-cart".to_string();
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_markers() {
        let mut scenario = Scenario::order_flow();
        if let Some(v) = scenario.verification.as_mut() {
            v.markers.clear();
        }
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_load_all_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), ORDER_FLOW_YAML).unwrap();
        let cart = serde_yaml::to_string(&Scenario::cart_checkout()).unwrap();
        std::fs::create_dir(dir.path().join("more")).unwrap();
        std::fs::write(dir.path().join("more").join("b.yml"), cart).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let scenarios = Scenario::load_all(dir.path()).unwrap();
        assert_eq!(scenarios.len(), 2);
        assert_eq!(scenarios[0].name, "order-flow");
        assert_eq!(scenarios[1].name, "cart-checkout");

        let smoke = Scenario::filter_by_tag(&scenarios, "smoke");
        assert_eq!(smoke.len(), 1);
        assert_eq!(Scenario::filter_by_tag(&scenarios, "order").len(), 1);
    }

    #[test]
    fn test_bad_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "name: broken\nsteps: []\nlogin: {email: a, password: b}\n").unwrap();

        let err = Scenario::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
