//! The `xata-e2e` binary end to end.

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// Ignores its arguments, including the global flags.
const GREETER: &str = r#"
printf 'Introduce your API key: '
read -r key
if [ "$key" = "secret-key" ]; then echo "All set!"; exit 0; fi
echo "Auth error: Invalid API key"
exit 1
"#;

const SUITE: &str = r#"
[[scenario]]
name = "valid key"
steps = [
    { expect = "Introduce your API key:" },
    { send = "{{api_key}}" },
    { expect = "All set!" },
]

[[scenario]]
name = "invalid key"
exit = "failure"
steps = [
    { expect = "Introduce your API key:" },
    { send = "nope" },
    { expect = "Invalid API key" },
]
"#;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("greeter.sh"), GREETER).expect("write script");
        fs::write(dir.path().join("suite.toml"), SUITE).expect("write suite");
        fs::write(dir.path().join(".env"), "TEST_API_KEY=secret-key\n").expect("write env");
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("xata-e2e").expect("binary built");
        cmd.current_dir(self.dir.path())
            .env_remove("TEST_API_KEY")
            .env_remove("XATA_BINARY");
        cmd
    }

    fn run_suite(&self, suite: &Path, env_file: &Path) -> Command {
        let mut cmd = self.cmd();
        cmd.arg("run")
            .arg(suite)
            .arg("--interpreter")
            .arg("/bin/sh")
            .arg("--binary")
            .arg(self.path("greeter.sh"))
            .arg("--env-file")
            .arg(env_file)
            .args(["--timeout-ms", "5000"]);
        cmd
    }
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("xata-e2e")
        .expect("binary built")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("check-env"));
}

#[test]
fn check_env_reports_key_without_printing_it() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["check-env", "--env-file"])
        .arg(fx.path(".env"))
        .assert()
        .success()
        .stdout(predicate::str::contains("TEST_API_KEY:  set (10 chars"))
        .stdout(predicate::str::contains("secret-key").not());
}

#[test]
fn check_env_fails_without_key() {
    let fx = Fixture::new();
    fx.cmd()
        .args(["check-env", "--env-file"])
        .arg(fx.path("missing.env"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("TEST_API_KEY"));
}

#[test]
fn run_prints_a_line_per_scenario() {
    let fx = Fixture::new();
    fx.run_suite(&fx.path("suite.toml"), &fx.path(".env"))
        .assert()
        .success()
        .stdout(predicate::str::contains("PASS  valid key"))
        .stdout(predicate::str::contains("PASS  invalid key"))
        .stdout(predicate::str::contains("2 passed, 0 failed"));
}

#[test]
fn run_fails_when_a_scenario_fails() {
    let fx = Fixture::new();
    let suite = fx.path("failing.toml");
    fs::write(
        &suite,
        "[[scenario]]\nname = \"wrong prompt\"\nexit = \"any\"\nsteps = [{ expect = \"Password:\", timeout_ms = 200 }]\n",
    )
    .expect("write suite");
    fx.run_suite(&suite, &fx.path(".env"))
        .assert()
        .failure()
        .stdout(predicate::str::contains("FAIL  wrong prompt"))
        .stdout(predicate::str::contains("step 1"));
}

#[test]
fn run_requires_key_when_suite_uses_it() {
    let fx = Fixture::new();
    fx.run_suite(&fx.path("suite.toml"), &fx.path("missing.env"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("TEST_API_KEY"));
}
