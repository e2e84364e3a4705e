use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use xata_e2e_harness::{ScenarioRunner, Suite, SuiteVars, XataCommand};
use xata_e2e_types::config::DEFAULT_BINARY;
use xata_e2e_types::{TestConfig, API_KEY_VAR, BINARY_VAR};

use super::load_layers;

/// Options of `xata-e2e run`.
#[derive(Debug)]
pub struct RunArgs {
    pub suite: PathBuf,
    pub binary: Option<PathBuf>,
    pub interpreter: Option<PathBuf>,
    pub env_files: Vec<PathBuf>,
    pub no_color: bool,
    pub timeout_ms: u64,
}

/// Run the `xata-e2e run` command.
///
/// Prints one PASS/FAIL line per scenario and fails if any scenario failed.
/// The API key is only required when the suite refers to it.
pub fn run(args: &RunArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.suite)
        .with_context(|| format!("failed to read suite {}", args.suite.display()))?;
    let layers = load_layers(&args.env_files)?;

    let api_key = if Suite::needs_api_key(&text) {
        let config = TestConfig::load(&layers)
            .with_context(|| format!("suite uses the API key; set {API_KEY_VAR}"))?;
        Some(config.api_key)
    } else {
        layers.get(API_KEY_VAR).map(str::to_string)
    };
    let vars = SuiteVars { api_key };
    let suite = Suite::load(&args.suite, &vars)?;

    let binary = args
        .binary
        .clone()
        .or_else(|| layers.get(BINARY_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));
    let command = match &args.interpreter {
        Some(interpreter) => XataCommand::interpreted(interpreter, &binary),
        None => XataCommand::new(&binary),
    }
    .no_color(args.no_color)
    .default_timeout(Duration::from_millis(args.timeout_ms));

    info!(suite = %args.suite.display(), binary = %binary.display(), "starting suite");
    let report = suite.run(&ScenarioRunner::new(command))?;

    for (scenario, result) in suite.scenarios.iter().zip(&report.results) {
        match result {
            Ok(passed) => println!("PASS  {} ({:.2?})", scenario.name, passed.elapsed),
            Err(err) => {
                println!("FAIL  {}", scenario.name);
                for line in err.to_string().lines() {
                    println!("      {line}");
                }
            }
        }
    }
    println!(
        "\n{} passed, {} failed",
        report.passed(),
        report.failed()
    );

    if !report.is_success() {
        bail!("{} of {} scenarios failed", report.failed(), report.results.len());
    }
    Ok(())
}
