//! One installed instance of the proxy and its daemon lifecycle.
//!
//! `Built -> Running -> Stopped -> Destroyed`. Configs may be edited at any
//! point before `start`.

pub mod factory;
pub mod fingerprint;
pub mod process;

use std::collections::BTreeMap;
use std::fs;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::configs::records::SERVER_PORTS_KEY;
use crate::configs::RecordsConfig;
use crate::error::{Error, Result};
use crate::layout::Layout;

pub use factory::{BuildRecipe, BuildStep, EnvironmentFactory, StepDir};
pub use fingerprint::{ConfigureFlags, EnvVars, Fingerprint};

pub const DEFAULT_DAEMON: &str = "traffic_server";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Executable in `bindir` and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl DaemonSpec {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Default for DaemonSpec {
    fn default() -> Self {
        Self::new(DEFAULT_DAEMON)
    }
}

/// How `start` decides the daemon is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Accepts connections on the port in `proxy.config.http.server_ports`.
    #[default]
    ProxyPort,
    /// Accepts connections on a fixed port.
    Port(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Built,
    Running,
    Stopped,
    Destroyed,
}

/// An isolated install plus the daemon started from it.
#[derive(Debug)]
pub struct Environment {
    pub layout: Layout,
    configure: ConfigureFlags,
    env: EnvVars,
    fingerprint: Option<Fingerprint>,
    daemon: DaemonSpec,
    readiness: Readiness,
    startup_timeout: Duration,
    stop_grace: Duration,
    state: State,
    child: Option<Child>,
}

impl Environment {
    pub fn new(layout: Layout, configure: ConfigureFlags, env: EnvVars) -> Self {
        Self {
            layout,
            configure,
            env,
            fingerprint: None,
            daemon: DaemonSpec::default(),
            readiness: Readiness::default(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            state: State::Built,
            child: None,
        }
    }

    pub(crate) fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn configure(&self) -> &ConfigureFlags {
        &self.configure
    }

    pub fn env(&self) -> &EnvVars {
        &self.env
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub fn set_daemon(&mut self, daemon: DaemonSpec) {
        self.daemon = daemon;
    }

    pub fn set_readiness(&mut self, readiness: Readiness) {
        self.readiness = readiness;
    }

    pub fn set_startup_timeout(&mut self, timeout: Duration) {
        self.startup_timeout = timeout;
    }

    pub fn set_stop_grace(&mut self, grace: Duration) {
        self.stop_grace = grace;
    }

    /// Load `records.config` from disk.
    pub fn records(&self) -> Result<RecordsConfig> {
        RecordsConfig::load(self.layout.config_file("records.config"))
    }

    /// Scheme -> proxy URL, e.g. `http -> http://127.0.0.1:8080`.
    pub fn proxies(&self) -> Result<BTreeMap<String, String>> {
        let port = self.proxy_port()?;
        Ok(BTreeMap::from([(
            "http".to_string(),
            format!("http://127.0.0.1:{port}"),
        )]))
    }

    fn proxy_port(&self) -> Result<u16> {
        self.records()?
            .proxy_port()
            .ok_or_else(|| Error::key_not_found("CONFIG", SERVER_PORTS_KEY))
    }

    fn readiness_port(&self) -> Result<u16> {
        match self.readiness {
            Readiness::ProxyPort => self.proxy_port(),
            Readiness::Port(p) => Ok(p),
        }
    }

    /// Launch the daemon and block until it accepts connections. Configs
    /// must already be written.
    pub fn start(&mut self) -> Result<()> {
        if self.state == State::Destroyed {
            return Err(Error::InvalidState("environment is destroyed".into()));
        }
        if let Some(child) = self.child.as_mut() {
            if let Ok(None) = child.try_wait() {
                return Err(Error::AlreadyRunning { pid: child.id() });
            }
            self.child = None;
        }

        let port = self.readiness_port()?;
        let program = self.layout.binary(&self.daemon.program);
        if !program.is_file() {
            return Err(Error::NotFound(program));
        }
        self.layout.ensure_dirs()?;
        let stdout = fs::File::create(
            self.layout
                .logdir
                .join(format!("{}.stdout.log", self.daemon.program)),
        )?;
        let stderr = fs::File::create(
            self.layout
                .logdir
                .join(format!("{}.stderr.log", self.daemon.program)),
        )?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.daemon.args)
            .current_dir(&self.layout.prefix)
            .env("TS_ROOT", &self.layout.prefix)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        for (k, v) in self.env.iter() {
            cmd.env(k, v);
        }
        process::own_process_group(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        info!(pid, port, prefix = %self.layout.prefix.display(), "daemon spawned");

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    warn!(pid, %status, "daemon exited during startup");
                    sweep_group(pid);
                    return Err(Error::DaemonExited { status });
                }
                Ok(None) => {}
                Err(e) => {
                    process::kill_and_reap(&mut child);
                    return Err(e.into());
                }
            }
            if process::port_open(port) {
                break;
            }
            if started.elapsed() >= self.startup_timeout {
                process::kill_and_reap(&mut child);
                warn!(pid, timeout = ?self.startup_timeout, "daemon not ready; killed");
                return Err(Error::StartupTimeout {
                    timeout: self.startup_timeout,
                    prefix: self.layout.prefix.clone(),
                });
            }
            std::thread::sleep(process::poll_interval());
        }

        info!(pid, elapsed = ?started.elapsed(), "daemon ready");
        self.child = Some(child);
        self.state = State::Running;
        Ok(())
    }

    /// Whether the daemon process is alive.
    pub fn running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Whether the daemon is alive and accepting connections.
    pub fn responding(&mut self) -> bool {
        self.running() && self.readiness_port().map(process::port_open).unwrap_or(false)
    }

    /// Fail with `DaemonDied` if the daemon was started and has since exited.
    pub fn check_alive(&mut self) -> Result<()> {
        if self.state != State::Running {
            return Err(Error::InvalidState(format!(
                "daemon not started (state {:?})",
                self.state
            )));
        }
        if self.running() {
            Ok(())
        } else {
            Err(Error::DaemonDied {
                prefix: self.layout.prefix.clone(),
            })
        }
    }

    /// SIGTERM the daemon's process group, wait up to the grace period for the
    /// daemon, then SIGKILL the group. No-op when already stopped.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            if self.state == State::Running {
                self.state = State::Stopped;
            }
            return Ok(());
        };
        let pid = child.id();
        if let Ok(None) = child.try_wait() {
            process::terminate(&child);
            if !process::wait_exit(&mut child, self.stop_grace) {
                warn!(pid, grace = ?self.stop_grace, "daemon ignored SIGTERM; killing");
                process::kill_and_reap(&mut child);
            }
            info!(pid, "daemon stopped");
        } else {
            debug!(pid, "daemon already exited");
        }
        sweep_group(pid);
        self.state = State::Stopped;
        Ok(())
    }

    /// Remove everything under the prefix. The daemon must be stopped.
    pub fn destroy(&mut self) -> Result<()> {
        if self.running() {
            return Err(Error::InvalidState(
                "cannot destroy a running environment; stop it first".into(),
            ));
        }
        if self.state == State::Destroyed {
            return Ok(());
        }
        self.child = None;
        if self.layout.prefix.exists() {
            fs::remove_dir_all(&self.layout.prefix)?;
        }
        self.state = State::Destroyed;
        info!(prefix = %self.layout.prefix.display(), "environment destroyed");
        Ok(())
    }
}

/// Kill whatever is left of the daemon's process group after the daemon
/// itself has exited.
fn sweep_group(pgid: u32) {
    if process::is_group_alive(pgid) {
        warn!(pgid, "daemon left processes behind; killing its process group");
        process::kill_group(pgid);
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Ok(None) = child.try_wait() {
                warn!(pid = child.id(), "environment dropped with daemon running; killing");
                process::kill_and_reap(child);
            }
        }
    }
}
