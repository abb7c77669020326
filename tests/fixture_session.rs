//! Session fixture: outcomes decide whether the environment survives.

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::{Duration, Instant};
use tsqa::environment::{ConfigureFlags, DaemonSpec, EnvironmentFactory};
use tsqa::fixture::{EnvironmentCase, Teardown, TestOutcome};
use tsqa::Error;

fn case(factory: &EnvironmentFactory) -> EnvironmentCase {
    let port = common::free_port();
    EnvironmentCase::set_up(
        factory,
        &ConfigureFlags::new(),
        &common::daemon_env(),
        |env, configs| {
            configs
                .records_mut()
                .expect("records.config")
                .set("proxy.config.http.server_ports", port.to_string())?;
            configs
                .get_mut("remap.config")
                .and_then(|c| c.as_generic_mut())
                .expect("remap.config")
                .add_line("", &format!("map http://tsqa.test/ http://127.0.0.1:{port}/"))?;
            env.set_daemon(DaemonSpec::default().arg("--port").arg(port.to_string()));
            env.set_startup_timeout(Duration::from_secs(20));
            Ok(())
        },
    )
    .unwrap()
}

fn factory(root: &Path) -> EnvironmentFactory {
    common::fake_factory(root).0
}

#[test]
fn outcome_success_rules() {
    assert!(TestOutcome::Passed.is_success());
    assert!(TestOutcome::Skipped.is_success());
    assert!(!TestOutcome::Failed.is_success());
    assert!(!TestOutcome::Errored.is_success());
}

#[test]
fn successful_session_destroys_environment() {
    let dir = common::temp_dir();
    let mut case = case(&factory(dir.path()));
    let prefix = case.environment.layout.prefix.clone();

    // Setup edits were written before the daemon started.
    let remap = std::fs::read_to_string(case.environment.layout.config_file("remap.config")).unwrap();
    assert!(remap.contains("map http://tsqa.test/"));
    assert_eq!(
        case.proxies().unwrap(),
        case.environment.proxies().unwrap()
    );

    case.run("proxy answers", |c| {
        let url = c.proxies()?["http"].clone();
        let client = tsqa::endpoint::TrackingClient::new()?;
        client.get(&format!("{url}/"))?;
        Ok(())
    })
    .unwrap();
    case.record(TestOutcome::Skipped);
    assert!(case.successful());

    assert_eq!(case.tear_down().unwrap(), Teardown::Destroyed);
    assert!(!prefix.exists());
}

#[test]
fn failed_session_preserves_environment() {
    let dir = common::temp_dir();
    let mut case = case(&factory(dir.path()));
    let prefix = case.environment.layout.prefix.clone();
    case.record(TestOutcome::Passed);
    case.record(TestOutcome::Failed);
    assert!(!case.successful());

    assert_eq!(case.tear_down().unwrap(), Teardown::Preserved(prefix.clone()));
    assert!(prefix.join("etc/trafficserver/records.config").is_file());
}

#[test]
fn errored_test_preserves_environment() {
    let dir = common::temp_dir();
    let mut case = case(&factory(dir.path()));
    let prefix = case.environment.layout.prefix.clone();
    let res: tsqa::Result<()> = case.run("broken", |_| Err(Error::InvalidState("boom".into())));
    assert!(res.is_err());
    assert_eq!(case.outcomes(), &[TestOutcome::Errored]);

    assert_eq!(case.tear_down().unwrap(), Teardown::Preserved(prefix));
}

#[test]
fn failed_assertion_is_recorded_and_preserves_environment() {
    let dir = common::temp_dir();
    let mut case = case(&factory(dir.path()));
    let prefix = case.environment.layout.prefix.clone();
    case.run("passes", |_| Ok(())).unwrap();

    let caught = panic::catch_unwind(AssertUnwindSafe(|| {
        case.run("asserts", |c| {
            assert_eq!(c.outcomes().len(), 99, "deliberate failure");
            Ok(())
        })
    }));
    assert!(caught.is_err());
    assert_eq!(case.outcomes(), &[TestOutcome::Passed, TestOutcome::Failed]);
    assert!(!case.successful());

    assert_eq!(case.tear_down().unwrap(), Teardown::Preserved(prefix.clone()));
    assert!(prefix.is_dir());
}

#[test]
fn dead_daemon_fails_teardown_and_keeps_state() {
    let dir = common::temp_dir();
    let mut case = case(&factory(dir.path()));
    let prefix = case.environment.layout.prefix.clone();
    case.record(TestOutcome::Passed);

    let pid = case.environment.pid().unwrap();
    unsafe {
        libc::kill(pid as i32, libc::SIGKILL);
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while case.environment.running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }

    let err = case.tear_down().unwrap_err();
    assert!(matches!(err, Error::DaemonDied { .. }), "{err}");
    assert!(prefix.is_dir());
}
