//! Authentication suite against the real xata binary.
//!
//! Needs the binary (`XATA_BINARY`, default `../xata`) and a live
//! `TEST_API_KEY`:
//!   cargo test --test test_auth -- --ignored

mod common;

use std::time::Duration;

use xata_e2e::flows::{self, login_scenario};
use xata_e2e::{ConfigDir, Scenario, Suite, SuiteVars};

use common::{real_config, real_runner, suite_path};

#[test]
#[ignore] // Requires the xata binary and a live API key
fn auth_login_command() {
    let config = real_config();
    let runner = real_runner(&config);
    let dir = ConfigDir::new().unwrap();

    let scenarios = [
        Scenario::new("try an invalid API key", ["auth", "login"])
            .expect("Introduce your API key:")
            .send_line("invalid_key")
            .expect_within(
                "Checking access to the API...Auth error: Invalid API key",
                Duration::from_secs(5),
            )
            .expect(flows::HELP_LINK)
            .exit_code(1),
        login_scenario(&config.api_key),
        Scenario::new("login again, should ask for a confirmation", ["auth", "login"])
            .expect("Authentication is already configured, do you want to override it?")
            .send_line("y")
            .expect("Introduce your API key:")
            .send_secret(&config.api_key)
            .expect_within("Checking access to the API...OK", flows::API_TIMEOUT)
            .expect("All set! you can now start using xata"),
        Scenario::new("answer No this time", ["auth", "login"])
            .expect("Authentication is already configured, do you want to override it?")
            .send_line("N")
            .expect("No"),
    ];
    for scenario in &scenarios {
        if let Err(err) = runner.run(scenario, &dir) {
            panic!("{err}");
        }
    }
}

#[test]
#[ignore] // Requires the xata binary and a live API key
fn auth_status() {
    let config = real_config();
    let runner = real_runner(&config);
    let dir = ConfigDir::new().unwrap();

    let before = Scenario::new("status before login", ["auth", "status"])
        .expect("You are not logged in, run `xata auth login` first")
        .exit_any();
    runner.run(&before, &dir).expect("not logged in");

    flows::login_with_key(&runner, &dir, &config.api_key).expect("login");

    let after = Scenario::new("status after login", ["auth", "status"])
        .expect("Client is logged in")
        .expect_within("Checking access to the API...OK", flows::API_TIMEOUT);
    runner.run(&after, &dir).expect("logged in");
}

#[test]
#[ignore] // Requires the xata binary and a live API key
fn auth_suite_file() {
    let config = real_config();
    let vars = SuiteVars {
        api_key: Some(config.api_key.clone()),
    };
    let suite = Suite::load(&suite_path("auth.toml"), &vars).expect("suite parses");
    let report = suite.run(&real_runner(&config)).expect("suite runs");
    assert!(report.is_success(), "{:?}", report.results);
}
