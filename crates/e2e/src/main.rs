//! Order flow harness entry point
//!
//! Run with: cargo run -p miniups-e2e -- --scenario crates/e2e/scenarios/order_flow.yaml

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use miniups_e2e::config::HarnessConfig;
use miniups_e2e::report::EXIT_HARNESS_ERROR;
use miniups_e2e::{E2eError, E2eResult, Orchestrator, Scenario, SuiteReport, VerificationProbe};

#[derive(Parser, Debug)]
#[command(name = "miniups-e2e")]
#[command(about = "Place an order on the Amazon service and verify UPS picked it up")]
struct Args {
    /// Harness configuration file (TOML). Defaults apply when it does not exist.
    #[arg(short, long, default_value = "miniups-e2e.toml", env = "MINIUPS_E2E_CONFIG")]
    config: PathBuf,

    /// Run a single scenario file instead of the built-in order flow
    #[arg(short, long, conflicts_with = "scenarios_dir")]
    scenario: Option<PathBuf>,

    /// Run every scenario under this directory
    #[arg(long)]
    scenarios_dir: Option<PathBuf>,

    /// Only run the scenario with this name
    #[arg(short, long)]
    name: Option<String>,

    /// Only run scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Base URL of the Amazon service
    #[arg(long, env = "MINIUPS_E2E_BASE_URL")]
    base_url: Option<String>,

    /// Login email, overriding the scenario
    #[arg(long, env = "MINIUPS_E2E_EMAIL")]
    email: Option<String>,

    /// Login password, overriding the scenario
    #[arg(long, env = "MINIUPS_E2E_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Do not read UPS logs after checkout
    #[arg(long)]
    skip_verify: bool,

    /// Write a JSON report here
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(EXIT_HARNESS_ERROR);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {}", e);
            std::process::exit(EXIT_HARNESS_ERROR);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<i32> {
    let mut config = HarnessConfig::load(&args.config)?;
    if let Some(base_url) = &args.base_url {
        config.target.base_url = base_url.clone();
    }
    config.validate()?;

    let mut scenarios = select_scenarios(&args)?;
    for scenario in &mut scenarios {
        if let Some(email) = &args.email {
            scenario.login.credentials.email = email.clone();
        }
        if let Some(password) = &args.password {
            scenario.login.credentials.password = password.clone();
        }
    }

    let needs_probe = !args.skip_verify && scenarios.iter().any(|s| s.verification.is_some());
    let probe = if needs_probe {
        Some(VerificationProbe::from_config(&config.probe)?)
    } else {
        None
    };

    info!("Testing order flow from Amazon to UPS");
    info!("{}", "=".repeat(50));

    let mut runs = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let orchestrator = Orchestrator::new(config.target.clone(), scenario, probe.clone());
        let report = orchestrator.run().await;
        report.log_summary();
        runs.push(report);
    }

    info!("{}", "=".repeat(50));
    let suite = SuiteReport::new(runs);
    suite.log_summary();

    if let Some(path) = &args.report {
        suite.write_json(path)?;
    }

    Ok(suite.exit_code())
}

fn select_scenarios(args: &Args) -> E2eResult<Vec<Scenario>> {
    let mut scenarios = if let Some(path) = &args.scenario {
        vec![Scenario::from_file(path)?]
    } else if let Some(dir) = &args.scenarios_dir {
        Scenario::load_all(dir)?
    } else {
        vec![Scenario::order_flow(), Scenario::cart_checkout()]
    };

    if let Some(tag) = &args.tag {
        scenarios.retain(|s| s.tags.iter().any(|t| t == tag));
    }

    // Without any filter the built-ins run only the primary order flow.
    if args.scenario.is_none() && args.scenarios_dir.is_none() && args.tag.is_none() && args.name.is_none() {
        scenarios.truncate(1);
    }

    if let Some(name) = &args.name {
        scenarios.retain(|s| &s.name == name);
        if scenarios.is_empty() {
            return Err(E2eError::ScenarioNotFound(name.clone()));
        }
    }

    if scenarios.is_empty() {
        return Err(E2eError::ScenarioNotFound("no scenario matched the filters".to_string()));
    }

    Ok(scenarios)
}
