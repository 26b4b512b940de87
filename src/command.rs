//! External command execution
//!
//! Every interaction with the host networking stack goes through
//! [`CommandRunner`], so controllers can be exercised without root.

use crate::error::{ApError, ApResult};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, warn};

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program to completion and return its stdout.
    /// A non-zero exit status is reported as [`ApError::CommandFailed`].
    async fn run(&self, program: &str, args: &[&str]) -> ApResult<String>;

    /// Check whether a program can be found in `PATH`.
    fn command_exists(&self, program: &str) -> bool;

    /// Whether the current process has administrative privileges.
    fn is_root(&self) -> bool;

    /// Whether a process with this pid exists.
    fn process_alive(&self, pid: i32) -> bool;

    /// Command name of a running process (`/proc/<pid>/comm`).
    fn process_name(&self, pid: i32) -> Option<String>;

    /// Whether `pid` is alive and runs `name`. A recycled pid fails this.
    fn process_is(&self, pid: i32, name: &str) -> bool {
        self.process_name(pid).as_deref() == Some(name)
    }

    /// Run a program, logging and swallowing any failure.
    /// Returns whether the command succeeded.
    async fn run_tolerant(&self, program: &str, args: &[&str]) -> bool {
        match self.run(program, args).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Ignoring failure: {}", e);
                false
            }
        }
    }
}

/// Runs commands on the real host
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> ApResult<String> {
        let cmd_str = format!("{} {}", program, args.join(" "));
        debug!(cmd = %cmd_str, "Running");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ApError::CommandFailed {
                cmd: cmd_str.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ApError::CommandFailed {
                cmd: cmd_str,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn command_exists(&self, program: &str) -> bool {
        if program.contains('/') {
            return Path::new(program).is_file();
        }
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| dir.join(program).is_file())
    }

    fn is_root(&self) -> bool {
        #[cfg(unix)]
        {
            unsafe { libc::geteuid() == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn process_alive(&self, pid: i32) -> bool {
        pid > 0 && Path::new(&format!("/proc/{}", pid)).exists()
    }

    fn process_name(&self, pid: i32) -> Option<String> {
        if pid <= 0 {
            return None;
        }
        let comm = std::fs::read_to_string(format!("/proc/{}/comm", pid)).ok()?;
        Some(comm.trim_end().to_string())
    }
}

/// Read a daemon pid file, if present and well-formed
pub async fn read_pid_file(path: &Path) -> Option<i32> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    content.trim().parse().ok().filter(|pid| *pid > 0)
}

/// Stop a daemon both through the service manager and by signalling it
/// directly, so supervised and manually launched instances both go away.
/// The pid file is only trusted while it names a `process` instance.
/// Having nothing to stop is not an error.
pub async fn stop_daemon(runner: &dyn CommandRunner, unit: &str, process: &str, pid_file: &Path) {
    runner.run_tolerant("systemctl", &["stop", unit]).await;

    if let Some(pid) = read_pid_file(pid_file).await {
        if runner.process_is(pid, process) {
            runner.run_tolerant("kill", &["-TERM", &pid.to_string()]).await;
        } else if runner.process_alive(pid) {
            warn!(pid, process, "Pid file names another program, not signalling it");
        }
    }

    if runner.run("pgrep", &["-x", process]).await.is_ok() {
        runner.run_tolerant("pkill", &["-x", process]).await;
    }

    if let Err(e) = tokio::fs::remove_file(pid_file).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %pid_file.display(), "Failed to remove pid file: {}", e);
        }
    }
}
