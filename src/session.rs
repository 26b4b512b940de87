//! Runtime session state
//!
//! The session record is written as soon as startup starts touching the host,
//! so a later `down` (or a crashed run) knows exactly what to undo. A pid file
//! next to it acts as an advisory single-instance lock.

use crate::backup::BackupRecord;
use crate::command::{read_pid_file, CommandRunner};
use crate::config::Method;
use crate::error::{ApError, ApResult};
use crate::interface::InterfaceBinding;
use serde::{Deserialize, Serialize};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

/// Command name a live lock holder must have
pub const PROCESS_NAME: &str = "apctl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Everything teardown needs to know about a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub pid: i32,
    pub phase: SessionPhase,
    pub method: Method,
    pub interfaces: InterfaceBinding,
    /// Bridge device created for this session
    pub bridge: Option<String>,
    /// Extra bridge member
    pub lan: Option<String>,
    /// Gateway address in CIDR form
    pub gateway: String,
    pub backup: Option<BackupRecord>,
    /// RFC 3339
    pub started_at: String,
}

impl SessionRecord {
    pub fn new(method: Method, interfaces: InterfaceBinding, gateway: String) -> Self {
        Self {
            pid: std::process::id() as i32,
            phase: SessionPhase::Starting,
            method,
            interfaces,
            bridge: None,
            lan: None,
            gateway,
            backup: None,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub async fn load(path: &Path) -> ApResult<Option<Self>> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> ApResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).await?;
        debug!(phase = ?self.phase, "Session record saved");
        Ok(())
    }
}

pub async fn remove_file_if_exists(path: &Path) -> ApResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Pid of another live apctl process holding the lock. A pid that has
/// been recycled by an unrelated program counts as a stale lock.
pub async fn lock_holder(lock_file: &Path, runner: &dyn CommandRunner) -> Option<i32> {
    let pid = read_pid_file(lock_file).await?;
    if pid == std::process::id() as i32 {
        return None;
    }
    if runner.process_is(pid, PROCESS_NAME) {
        return Some(pid);
    }
    if runner.process_alive(pid) {
        warn!(pid, "Lock names a process that is not apctl, treating it as stale");
    }
    None
}

/// Create the runtime directory private to the effective user, or check
/// that an existing one is. Pid files and configs in it are trusted later,
/// so a directory others can write to is refused.
pub async fn prepare_runtime_dir(dir: &Path) -> ApResult<()> {
    if !fs::try_exists(dir).await? {
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
            .await?;
    }
    check_runtime_dir(dir).await
}

/// Fail unless `dir` is a real directory owned by us and not writable by
/// group or others
pub async fn check_runtime_dir(dir: &Path) -> ApResult<()> {
    let meta = fs::symlink_metadata(dir).await?;
    let euid = unsafe { libc::geteuid() };

    if !meta.file_type().is_dir() {
        return Err(ApError::Precondition(format!(
            "runtime directory {} is not a directory",
            dir.display()
        )));
    }
    if meta.uid() != euid {
        return Err(ApError::Precondition(format!(
            "runtime directory {} is owned by uid {}, expected {}",
            dir.display(),
            meta.uid(),
            euid
        )));
    }
    if meta.permissions().mode() & 0o022 != 0 {
        return Err(ApError::Precondition(format!(
            "runtime directory {} is writable by other users (mode {:o})",
            dir.display(),
            meta.permissions().mode() & 0o777
        )));
    }
    Ok(())
}

/// Take the single-instance lock, replacing a stale one
pub async fn acquire_lock(lock_file: &Path, runner: &dyn CommandRunner) -> ApResult<()> {
    if let Some(pid) = lock_holder(lock_file, runner).await {
        return Err(ApError::AlreadyRunning { pid });
    }
    if let Some(dir) = lock_file.parent() {
        fs::create_dir_all(dir).await?;
    }
    fs::write(lock_file, format!("{}\n", std::process::id())).await?;
    Ok(())
}
