//! TOML scenario suites.
//!
//! ```toml
//! [[scenario]]
//! name = "login with invalid key"
//! args = ["auth", "login"]
//! exit = "failure"
//! steps = [
//!     { expect = "Introduce your API key:" },
//!     { send = "invalid_key" },
//!     { expect = "Auth error: Invalid API key", timeout_ms = 5000 },
//! ]
//! ```
//!
//! Each step has exactly one of `expect`, `pattern`, `send` or `key`.
//! `{{api_key}}` inside `send` is replaced with the configured key and the
//! line is redacted from logs. All scenarios of a suite share one
//! [`ConfigDir`] and run in file order; a failure does not stop the rest.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::command::ConfigDir;
use crate::error::HarnessError;
use crate::key::Key;
use crate::matcher::Matcher;
use crate::scenario::{
    ExpectedExit, JsonCheck, Scenario, ScenarioError, ScenarioReport, ScenarioRunner, Step,
};

/// Placeholder replaced with the API key in `send` steps.
pub const API_KEY_PLACEHOLDER: &str = "{{api_key}}";

const MAX_SUITE_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SuiteFile {
    #[serde(default, rename = "scenario")]
    scenarios: Vec<ScenarioDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDef {
    name: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    exit: Option<ExitDef>,
    #[serde(default)]
    steps: Vec<StepDef>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExitDef {
    Code(i32),
    Class(ExitClass),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ExitClass {
    Success,
    Failure,
    Any,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepDef {
    expect: Option<String>,
    pattern: Option<String>,
    send: Option<String>,
    key: Option<String>,
    timeout_ms: Option<u64>,
    json: Option<BTreeMap<String, String>>,
    json_non_empty: Option<Vec<String>>,
}

/// Values substituted into suite files.
#[derive(Debug, Clone, Default)]
pub struct SuiteVars {
    pub api_key: Option<String>,
}

/// A parsed list of scenarios.
#[derive(Debug, Clone)]
pub struct Suite {
    pub scenarios: Vec<Scenario>,
}

impl Suite {
    /// Read and parse a suite file.
    pub fn load(path: &Path, vars: &SuiteVars) -> Result<Self, HarnessError> {
        let meta = std::fs::metadata(path)
            .map_err(|e| HarnessError::Suite(format!("{}: {e}", path.display())))?;
        if meta.len() > MAX_SUITE_FILE_SIZE {
            return Err(HarnessError::Suite(format!(
                "{}: file too large ({} bytes, max {MAX_SUITE_FILE_SIZE})",
                path.display(),
                meta.len()
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Suite(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text, vars)
            .map_err(|e| HarnessError::Suite(format!("{}: {e}", path.display())))
    }

    /// Parse suite TOML.
    pub fn from_toml(text: &str, vars: &SuiteVars) -> Result<Self, HarnessError> {
        let file: SuiteFile =
            toml::from_str(text).map_err(|e| HarnessError::Suite(e.to_string()))?;
        if file.scenarios.is_empty() {
            return Err(HarnessError::Suite("no [[scenario]] entries".to_string()));
        }
        let scenarios = file
            .scenarios
            .into_iter()
            .map(|def| build_scenario(def, vars))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scenarios })
    }

    /// Whether any `send` step needs the API key.
    pub fn needs_api_key(text: &str) -> bool {
        text.contains(API_KEY_PLACEHOLDER)
    }

    /// Run every scenario in order against one fresh config dir.
    pub fn run(&self, runner: &ScenarioRunner) -> Result<SuiteReport, HarnessError> {
        let dir = ConfigDir::new()?;
        info!(scenarios = self.scenarios.len(), dir = %dir.path().display(), "running suite");
        let results = self
            .scenarios
            .iter()
            .map(|scenario| runner.run(scenario, &dir))
            .collect();
        Ok(SuiteReport { results })
    }
}

/// Outcome of every scenario in a suite, in order.
#[derive(Debug)]
pub struct SuiteReport {
    pub results: Vec<Result<ScenarioReport, ScenarioError>>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

fn build_scenario(def: ScenarioDef, vars: &SuiteVars) -> Result<Scenario, HarnessError> {
    let exit = match def.exit {
        None | Some(ExitDef::Class(ExitClass::Success)) => ExpectedExit::Code(0),
        Some(ExitDef::Code(code)) => ExpectedExit::Code(code),
        Some(ExitDef::Class(ExitClass::Failure)) => ExpectedExit::Failure,
        Some(ExitDef::Class(ExitClass::Any)) => ExpectedExit::Any,
    };
    let mut scenario = Scenario::new(def.name.clone(), def.args);
    scenario.exit = exit;
    for (index, step) in def.steps.into_iter().enumerate() {
        let step = build_step(step, vars).map_err(|e| {
            HarnessError::Suite(format!("scenario {:?} step {}: {e}", def.name, index + 1))
        })?;
        scenario.steps.push(step);
    }
    Ok(scenario)
}

fn build_step(def: StepDef, vars: &SuiteVars) -> Result<Step, String> {
    let actions = [
        def.expect.is_some(),
        def.pattern.is_some(),
        def.send.is_some(),
        def.key.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if actions != 1 {
        return Err("exactly one of expect, pattern, send or key is required".to_string());
    }
    let is_expect = def.expect.is_some() || def.pattern.is_some();
    if !is_expect && (def.timeout_ms.is_some() || def.json.is_some() || def.json_non_empty.is_some())
    {
        return Err("timeout_ms and json checks only apply to expect steps".to_string());
    }

    if let Some(text) = def.send {
        if !text.contains(API_KEY_PLACEHOLDER) {
            return Ok(Step::SendLine {
                text,
                secret: false,
            });
        }
        let key = vars
            .api_key
            .as_deref()
            .ok_or_else(|| format!("{API_KEY_PLACEHOLDER} used but no API key is configured"))?;
        return Ok(Step::SendLine {
            text: text.replace(API_KEY_PLACEHOLDER, key),
            secret: true,
        });
    }
    if let Some(key) = def.key {
        let key: Key = key.parse().map_err(|e| format!("{e}"))?;
        return Ok(Step::SendKey(key));
    }

    let matcher = match (def.expect, def.pattern) {
        (Some(literal), _) => Matcher::literal(literal),
        (None, Some(pattern)) => Matcher::pattern(&pattern).map_err(|e| e.to_string())?,
        (None, None) => return Err("missing expectation".to_string()),
    };
    let json = if def.json.is_some() || def.json_non_empty.is_some() {
        Some(JsonCheck {
            equals: def.json.unwrap_or_default(),
            non_empty: def.json_non_empty.unwrap_or_default(),
        })
    } else {
        None
    };
    Ok(Step::Expect {
        matcher,
        timeout: def.timeout_ms.map(Duration::from_millis),
        json,
    })
}
