//! Tracks the pid of a running `trafficcontrol start` process so `stop` can
//! find it without a second channel back to the daemon.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

fn pidfile_path() -> PathBuf {
    crate::config::config_dir().join("trafficcontrold.pid")
}

pub fn write_pidfile() -> Result<()> {
    let path = pidfile_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("failed to write pidfile at {}", path.display()))?;
    Ok(())
}

pub fn remove_pidfile() {
    let _ = std::fs::remove_file(pidfile_path());
}

/// Read the pidfile and send it `SIGTERM`. Removes the pidfile afterward --
/// a stale pid left behind after a crash should not block the next `start`.
pub fn stop_running() -> Result<i32> {
    let path = pidfile_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("no running trafficcontrol process found (no pidfile at {})", path.display()))?;
    let pid: i32 = contents.trim().parse().context("pidfile does not contain a valid pid")?;

    // SAFETY: `kill` with SIGTERM is a request, not a write through a raw
    // pointer; `pid` is read from a file we wrote ourselves.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    let _ = std::fs::remove_file(&path);
    if rc != 0 {
        bail!("failed to signal process {pid}: {}", std::io::Error::last_os_error());
    }
    Ok(pid)
}
