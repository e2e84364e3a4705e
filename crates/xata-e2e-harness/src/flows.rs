//! Reusable xata CLI flows for chaining scenarios over one config dir.

use std::time::Duration;

use tracing::{info, warn};

use crate::command::ConfigDir;
use crate::error::HarnessError;
use crate::scenario::{ExpectedExit, JsonCheck, Scenario, ScenarioError, ScenarioRunner};

/// Timeout for steps that wait on the hosted API.
pub const API_TIMEOUT: Duration = Duration::from_secs(5);

/// Help link printed after CLI errors.
pub const HELP_LINK: &str = "For more information please see https://docs.xata.io/cli/getting-started";

/// `auth login` with `api_key` on a fresh config dir.
pub fn login_scenario(api_key: &str) -> Scenario {
    Scenario::new("login with API key", ["auth", "login"])
        .expect("Introduce your API key:")
        .send_secret(api_key)
        .expect_within("Checking access to the API...OK", API_TIMEOUT)
        .expect("All set! you can now start using xata")
}

/// `workspaces create <name>`, checking the printed JSON object.
pub fn create_workspace_scenario(name: &str) -> Scenario {
    Scenario::new(
        format!("create workspace {name}"),
        ["--nocolor", "workspaces", "create", name],
    )
    .expect_json(
        "}",
        API_TIMEOUT,
        JsonCheck::default().field("name", name).non_empty("id"),
    )
}

/// Log in, leaving the credentials in `config_dir`.
pub fn login_with_key(
    runner: &ScenarioRunner,
    config_dir: &ConfigDir,
    api_key: &str,
) -> Result<(), ScenarioError> {
    runner.run(&login_scenario(api_key), config_dir)?;
    Ok(())
}

/// Create a workspace and return its id.
pub fn create_workspace(
    runner: &ScenarioRunner,
    config_dir: &ConfigDir,
    name: &str,
) -> Result<String, ScenarioError> {
    let scenario = create_workspace_scenario(name);
    let report = runner.run(&scenario, config_dir)?;
    let id = report
        .json
        .first()
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    info!(workspace = %name, %id, "created workspace");
    Ok(id)
}

/// Delete a workspace, requiring a successful exit.
///
/// No output is awaited; the console stays open until the child exits.
pub fn delete_workspace(
    runner: &ScenarioRunner,
    config_dir: &ConfigDir,
    workspace_id: &str,
) -> Result<(), HarnessError> {
    let (mut console, mut child) = runner
        .command()
        .start(config_dir, &["workspaces", "delete", workspace_id])?;
    let outcome = child.wait_timeout(API_TIMEOUT)?;
    console.close();
    ExpectedExit::Code(0).check(outcome)?;
    info!(workspace = %workspace_id, "deleted workspace");
    Ok(())
}

/// A workspace that is deleted when dropped.
///
/// Call [`delete`](Self::delete) to delete it explicitly and see the
/// result; on drop, a failed delete is only logged.
pub struct CreatedWorkspace<'a> {
    runner: &'a ScenarioRunner,
    config_dir: &'a ConfigDir,
    id: Option<String>,
}

impl<'a> CreatedWorkspace<'a> {
    /// Create workspace `name` through [`create_workspace`].
    pub fn create(
        runner: &'a ScenarioRunner,
        config_dir: &'a ConfigDir,
        name: &str,
    ) -> Result<Self, ScenarioError> {
        let id = create_workspace(runner, config_dir, name)?;
        Ok(Self {
            runner,
            config_dir,
            id: Some(id),
        })
    }

    /// The id the CLI printed.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Delete the workspace now.
    pub fn delete(mut self) -> Result<(), HarnessError> {
        match self.id.take() {
            Some(id) => delete_workspace(self.runner, self.config_dir, &id),
            None => Ok(()),
        }
    }
}

impl Drop for CreatedWorkspace<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Err(err) = delete_workspace(self.runner, self.config_dir, &id) {
                warn!(workspace = %id, %err, "failed to delete workspace on drop");
            }
        }
    }
}
