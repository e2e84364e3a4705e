//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

use xata_e2e::{ScenarioRunner, SuiteVars, TestConfig, XataCommand};

/// The key the stand-in CLI accepts.
pub const VALID_KEY: &str = "fake-api-key-0123";

/// A shell script that reproduces the text contracts of the xata CLI:
/// `auth login`, `auth status`, `workspaces create` and `workspaces delete`.
/// Credentials and workspaces are files under `--configdir`.
const FAKE_XATA: &str = r#"
configdir=""
color=1
while [ $# -gt 0 ]; do
    case "$1" in
        --configdir=*) configdir="${1#--configdir=}"; shift ;;
        --nocolor) color=0; shift ;;
        *) break ;;
    esac
done
key_file="$configdir/credentials"

help_link() {
    echo "For more information please see https://docs.xata.io/cli/getting-started"
}

ok() {
    if [ "$color" = 1 ]; then printf '\033[32mOK\033[0m\n'; else echo "OK"; fi
}

check_key() {
    printf 'Checking access to the API...'
    if [ "$1" = "$FAKE_XATA_KEY" ]; then
        ok
        return 0
    fi
    echo "Auth error: Invalid API key"
    help_link
    return 1
}

case "$1 $2" in
"auth status")
    if [ ! -f "$key_file" ]; then
        echo 'You are not logged in, run `xata auth login` first'
        exit 1
    fi
    echo "Client is logged in"
    check_key "$(cat "$key_file")" || exit 1
    ;;
"auth login")
    if [ -f "$key_file" ]; then
        printf 'Authentication is already configured, do you want to override it? [y/N] '
        read -r answer
        case "$answer" in
            y|Y|yes) ;;
            *) echo "No"; exit 0 ;;
        esac
    fi
    printf 'Introduce your API key: '
    read -r key
    check_key "$key" || exit 1
    mkdir -p "$configdir"
    printf '%s' "$key" > "$key_file"
    echo "All set! you can now start using xata"
    ;;
"workspaces create")
    if [ ! -f "$key_file" ]; then
        echo "Auth error: not logged in"
        help_link
        exit 1
    fi
    id="ws-$$"
    mkdir -p "$configdir/workspaces"
    echo "$3" > "$configdir/workspaces/$id"
    printf '{\n  "id": "%s",\n  "name": "%s"\n}\n' "$id" "$3"
    ;;
"workspaces delete")
    if [ -f "$configdir/workspaces/$3" ]; then
        rm "$configdir/workspaces/$3"
        echo "Workspace $3 deleted"
        exit 0
    fi
    echo "Auth error: no access to the workspace"
    help_link
    exit 1
    ;;
*)
    echo "unknown command: $*"
    exit 2
    ;;
esac
"#;

/// The stand-in CLI written to a temp dir, run through `/bin/sh`.
pub struct FakeXata {
    _dir: TempDir,
    script: PathBuf,
}

impl FakeXata {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir for fake xata");
        let script = dir.path().join("xata.sh");
        std::fs::write(&script, FAKE_XATA).expect("should write fake xata script");
        Self { _dir: dir, script }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// A command running the script, accepting [`VALID_KEY`].
    pub fn command(&self) -> XataCommand {
        XataCommand::interpreted("/bin/sh", &self.script)
            .env("FAKE_XATA_KEY", VALID_KEY)
            .default_timeout(Duration::from_secs(5))
    }

    pub fn runner(&self) -> ScenarioRunner {
        ScenarioRunner::new(self.command()).wait_timeout(Duration::from_secs(5))
    }
}

/// Suite variables for the stand-in CLI.
pub fn fake_vars() -> SuiteVars {
    SuiteVars {
        api_key: Some(VALID_KEY.to_string()),
    }
}

/// Path of a file under `suites/`.
pub fn suite_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("suites").join(name)
}

/// Configuration for the real binary: `TEST_API_KEY` must be set.
pub fn real_config() -> TestConfig {
    xata_e2e::test_config().expect("TEST_API_KEY must be set for live tests")
}

/// A runner for the real binary.
pub fn real_runner(config: &TestConfig) -> ScenarioRunner {
    ScenarioRunner::new(XataCommand::from_config(config)).wait_timeout(Duration::from_secs(30))
}
