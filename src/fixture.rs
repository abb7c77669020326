//! Test-session fixtures.
//!
//! [`EnvironmentCase`] owns one running environment for a group of tests and
//! tracks their outcomes explicitly, so teardown can decide whether to
//! destroy the environment or keep it for diagnosis.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::configs::ConfigRegistry;
use crate::endpoint::{DynamicHttpEndpoint, TrackingClient};
use crate::environment::{ConfigureFlags, EnvVars, Environment, EnvironmentFactory};
use crate::error::{Error, Result};

const ENDPOINT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one test in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// An assertion failed.
    Failed,
    /// The test could not run to completion (harness or setup error).
    Errored,
    Skipped,
}

impl TestOutcome {
    /// Failures and errors both make a session unsuccessful; skips do not.
    pub fn is_success(self) -> bool {
        matches!(self, TestOutcome::Passed | TestOutcome::Skipped)
    }
}

/// What teardown did with the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Teardown {
    Destroyed,
    /// Kept on disk at this prefix because the session was not successful.
    Preserved(PathBuf),
}

/// A running environment shared by a group of tests.
pub struct EnvironmentCase {
    pub environment: Environment,
    pub configs: ConfigRegistry,
    outcomes: Vec<TestOutcome>,
}

impl EnvironmentCase {
    /// Get an environment from `factory`, let `setup` edit it, write all
    /// configs and start the daemon.
    pub fn set_up<F>(
        factory: &EnvironmentFactory,
        flags: &ConfigureFlags,
        env: &EnvVars,
        setup: F,
    ) -> Result<Self>
    where
        F: FnOnce(&mut Environment, &mut ConfigRegistry) -> Result<()>,
    {
        let environment = factory.get_environment(flags, env)?;
        Self::with_environment(environment, setup)
    }

    /// Like [`EnvironmentCase::set_up`] for an environment obtained elsewhere.
    pub fn with_environment<F>(mut environment: Environment, setup: F) -> Result<Self>
    where
        F: FnOnce(&mut Environment, &mut ConfigRegistry) -> Result<()>,
    {
        info!(prefix = %environment.layout.prefix.display(), "environment prefix");
        let mut configs = ConfigRegistry::scan(&environment.layout.sysconfdir)?;
        setup(&mut environment, &mut configs)?;
        configs.write_all()?;
        environment.start()?;
        Ok(Self {
            environment,
            configs,
            outcomes: Vec::new(),
        })
    }

    pub fn record(&mut self, outcome: TestOutcome) {
        self.outcomes.push(outcome);
    }

    /// Run a test body, recording `Passed` on `Ok` and `Errored` on `Err`.
    /// A panic (a failed assertion) is recorded as `Failed` and then resumed.
    pub fn run<T, F>(&mut self, name: &str, body: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let result = match panic::catch_unwind(AssertUnwindSafe(|| body(&mut *self))) {
            Ok(result) => result,
            Err(payload) => {
                warn!(test = name, "test failed");
                self.record(TestOutcome::Failed);
                panic::resume_unwind(payload);
            }
        };
        match &result {
            Ok(_) => self.record(TestOutcome::Passed),
            Err(e) => {
                warn!(test = name, "test errored: {e}");
                self.record(TestOutcome::Errored);
            }
        }
        result
    }

    pub fn outcomes(&self) -> &[TestOutcome] {
        &self.outcomes
    }

    /// True unless some test failed or errored.
    pub fn successful(&self) -> bool {
        self.outcomes.iter().all(|o| o.is_success())
    }

    /// Scheme -> proxy URL, from the in-memory records config.
    pub fn proxies(&self) -> Result<BTreeMap<String, String>> {
        let port = self
            .configs
            .records()
            .and_then(|r| r.proxy_port())
            .ok_or_else(|| Error::KeyNotFound {
                section: "CONFIG".into(),
                key: crate::configs::records::SERVER_PORTS_KEY.into(),
            })?;
        Ok(BTreeMap::from([(
            "http".to_string(),
            format!("http://127.0.0.1:{port}"),
        )]))
    }

    /// Stop the daemon and destroy the environment if the session succeeded.
    ///
    /// A daemon that died during the session is reported as
    /// [`Error::DaemonDied`] and the environment is left in place.
    pub fn tear_down(mut self) -> Result<Teardown> {
        let prefix = self.environment.layout.prefix.clone();
        if let Err(e) = self.environment.check_alive() {
            error!(prefix = %prefix.display(), "daemon died during the test run; environment preserved");
            return Err(e);
        }
        self.environment.stop()?;
        if self.successful() {
            self.environment.destroy()?;
            Ok(Teardown::Destroyed)
        } else {
            warn!(prefix = %prefix.display(), "session unsuccessful; environment preserved");
            Ok(Teardown::Preserved(prefix))
        }
    }
}

/// A dynamic HTTP endpoint plus a tracking client, ready to use.
pub struct EndpointCase {
    pub endpoint: DynamicHttpEndpoint,
    pub client: TrackingClient,
}

impl EndpointCase {
    /// Start an endpoint on `port` (0 for any) and wait for it to listen.
    pub fn set_up(port: u16) -> Result<Self> {
        let mut endpoint = DynamicHttpEndpoint::new(port);
        endpoint.start()?;
        endpoint.wait_ready(ENDPOINT_READY_TIMEOUT)?;
        Ok(Self {
            endpoint,
            client: TrackingClient::new()?,
        })
    }

    /// URL of `path` on the endpoint; a leading `/` is added if missing.
    pub fn endpoint_url(&self, path: &str) -> Result<String> {
        self.endpoint.url(path)
    }
}
