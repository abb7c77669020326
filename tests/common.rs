//! Shared test helpers.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tsqa::environment::{BuildRecipe, BuildStep, EnvVars, EnvironmentFactory};

/// Create a temp directory under the current dir (workspace) so the sandbox
/// allows full access.
pub fn temp_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("tsqa_test_")
        .tempdir_in(std::env::current_dir().unwrap_or_else(|_| Path::new(".").into()))
        .expect("temp dir")
}

/// Fake "source tree" build: lays out a minimal install under the prefix and
/// appends one line per build to `builds.log` in the source dir.
const FAKE_BUILD: &str = r#"#!/bin/sh
set -e
prefix="$1"
shift
echo "$*" >> "$(dirname "$0")/builds.log"
mkdir -p "$prefix/bin" "$prefix/etc/trafficserver/body_factory"
cat > "$prefix/etc/trafficserver/records.config" <<'EOF'
# records
CONFIG proxy.config.http.server_ports STRING 8080
CONFIG proxy.config.diags.debug.enabled INT 0
LOCAL proxy.local.cluster.type INT 3
EOF
printf 'map http://example.test/ http://127.0.0.1:8000/\n' > "$prefix/etc/trafficserver/remap.config"
printf '#!/bin/sh\nexec "%s" endpoint "$@"\n' "${TSQA_BIN:-false}" > "$prefix/bin/traffic_server"
printf '#!/bin/sh\necho $$ > "$TS_ROOT/var/sleeper.pid"\nexec sleep 30\n' > "$prefix/bin/sleeper"
printf '#!/bin/sh\nexit 3\n' > "$prefix/bin/crasher"
printf '#!/bin/sh\nsleep 30 &\necho $! > "$TS_ROOT/var/forker.child"\nwait\n' > "$prefix/bin/forker"
printf '#!/bin/sh\n"%s" endpoint "$@" &\nsleep 30 &\necho $! > "$TS_ROOT/var/launcher.child"\nwait\n' "${TSQA_BIN:-false}" > "$prefix/bin/launcher"
chmod +x "$prefix/bin/traffic_server" "$prefix/bin/sleeper" "$prefix/bin/crasher" "$prefix/bin/forker" "$prefix/bin/launcher"
ln -s traffic_server "$prefix/bin/ts_link"
"#;

pub struct FakeSource {
    pub dir: PathBuf,
}

impl FakeSource {
    pub fn new(root: &Path) -> Self {
        let dir = root.join("src");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("fake_build.sh"), FAKE_BUILD).unwrap();
        Self { dir }
    }

    /// Number of builds run so far.
    pub fn builds(&self) -> usize {
        std::fs::read_to_string(self.dir.join("builds.log"))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn build_lines(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.join("builds.log"))
            .map(|s| s.lines().map(String::from).collect())
            .unwrap_or_default()
    }
}

pub fn fake_recipe() -> BuildRecipe {
    BuildRecipe::new(vec![BuildStep::new(
        "sh",
        ["{source}/fake_build.sh", "{prefix}", "{configure_args}"],
    )])
}

/// Factory over a fake source tree inside `root`.
pub fn fake_factory(root: &Path) -> (EnvironmentFactory, FakeSource) {
    let source = FakeSource::new(root);
    let factory = EnvironmentFactory::new(&source.dir, root.join("tmp").join("base_envs"))
        .with_recipe(fake_recipe());
    (factory, source)
}

/// Env vars that make the fake `traffic_server` run this crate's endpoint.
pub fn daemon_env() -> EnvVars {
    let bin = assert_cmd::cargo::cargo_bin("tsqa");
    EnvVars::new().set("TSQA_BIN", bin.to_str().unwrap())
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

/// Whether `pid` is a live process. Zombies left for init to reap count as
/// gone.
pub fn pid_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // The state letter follows the parenthesized command name.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next())
            .is_some_and(|state| state != 'Z' && state != 'X'),
        Err(_) if Path::new("/proc/self").exists() => false,
        Err(_) => unsafe { libc::kill(pid as i32, 0) == 0 },
    }
}

/// Poll until `pid` is gone; false if it is still alive after `timeout`.
pub fn wait_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while pid_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    true
}

/// Read a pid written by one of the fake daemons.
pub fn read_pid(path: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(s) = std::fs::read_to_string(path) {
            if let Ok(pid) = s.trim().parse() {
                return pid;
            }
        }
        assert!(Instant::now() < deadline, "no pid in {}", path.display());
        std::thread::sleep(Duration::from_millis(20));
    }
}
