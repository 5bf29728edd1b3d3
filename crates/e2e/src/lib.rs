//! MiniUPS order flow harness
//!
//! Drives the Amazon storefront through a login → connect-world → cart →
//! checkout sequence over HTTP, then confirms from the UPS backend's container
//! logs that a shipment was created for the order.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Orchestrator                         │
//! │    ├── session::login()        -> Session | AuthFailure     │
//! │    ├── token::fetch_token()    -> Option<AntiForgeryToken>  │
//! │    ├── StepExecutor::execute() -> StepResult   (per step)   │
//! │    ├── settling delay                                       │
//! │    └── VerificationProbe::poll() -> VerificationOutcome     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── login { path, email, password, identity_marker? }    │
//! │    ├── steps: [WorkflowStep]                                │
//! │    │     ├── path, method, fields                           │
//! │    │     ├── success: SuccessPolicy                         │
//! │    │     └── prime_path?, advances_to?, settle_ms           │
//! │    └── verification { service, markers, tail_lines }        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod scenario;
pub mod session;
pub mod step;
pub mod token;

pub use config::HarnessConfig;
pub use error::{E2eError, E2eResult};
pub use orchestrator::{FlowState, Orchestrator};
pub use probe::{LogSource, VerificationOutcome, VerificationProbe};
pub use report::{RunReport, SuiteReport};
pub use scenario::Scenario;
pub use step::{SuccessPolicy, WorkflowStep};
