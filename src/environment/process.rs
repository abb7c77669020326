//! Process and port helpers for the daemon.
//!
//! The daemon is spawned as the leader of a new process group (its pid is
//! the group id), so signals also reach anything it forked.

use std::net::{SocketAddr, TcpStream};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Make the command's process the leader of a new process group.
pub fn own_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = cmd;
    }
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) -> bool {
    unsafe { libc::kill(-(pgid as libc::pid_t), signal) == 0 }
}

/// Check if any process of group `pgid` exists (Unix: kill -0). Zombies
/// count as alive.
pub fn is_group_alive(pgid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pgid, 0)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        false
    }
}

/// Ask the child's process group to exit (SIGTERM). Returns false if the
/// signal could not be sent.
pub fn terminate(child: &Child) -> bool {
    #[cfg(unix)]
    {
        signal_group(child.id(), libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        let _ = child;
        false
    }
}

/// SIGKILL every process in group `pgid`.
pub fn kill_group(pgid: u32) {
    #[cfg(unix)]
    {
        signal_group(pgid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
    }
}

/// Poll until the child exits or `grace` elapses. Returns true if it exited.
pub fn wait_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(_) => return false,
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL.min(grace));
    }
}

/// SIGKILL the child's group and reap the child. Never fails.
pub fn kill_and_reap(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// True if something accepts TCP connections on `127.0.0.1:port`.
pub fn port_open(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok()
}

pub(crate) fn poll_interval() -> Duration {
    POLL_INTERVAL
}
