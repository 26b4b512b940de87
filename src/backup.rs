//! Backup and restore of the system dnsmasq configuration
//!
//! The system-wide file is replaced while the access point runs. The original
//! is kept in a sibling file and put back exactly once at teardown.

use crate::error::ApResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

const BACKUP_SUFFIX: &str = "apctl.bak";

/// What was saved before the managed config was installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub original: PathBuf,
    /// `None` when no original file existed
    pub saved: Option<PathBuf>,
}

pub fn backup_path(original: &Path) -> PathBuf {
    let mut name = original.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    original.with_file_name(name)
}

/// Save `original` if it exists. A backup left behind by an earlier session
/// is kept as is, since it holds the real original.
pub async fn backup(original: &Path) -> ApResult<BackupRecord> {
    let saved = backup_path(original);

    if fs::try_exists(&saved).await? {
        warn!(path = %saved.display(), "Keeping existing backup from an earlier session");
        return Ok(BackupRecord {
            original: original.to_path_buf(),
            saved: Some(saved),
        });
    }

    if !fs::try_exists(original).await? {
        return Ok(BackupRecord {
            original: original.to_path_buf(),
            saved: None,
        });
    }

    fs::copy(original, &saved).await?;
    info!(from = %original.display(), to = %saved.display(), "Backed up");
    Ok(BackupRecord {
        original: original.to_path_buf(),
        saved: Some(saved),
    })
}

/// Overwrite the system file with managed content
pub async fn install(record: &BackupRecord, content: &str) -> ApResult<()> {
    if let Some(dir) = record.original.parent() {
        fs::create_dir_all(dir).await?;
    }
    fs::write(&record.original, content).await?;
    Ok(())
}

/// Put the original back, or remove the managed file if there was none
pub async fn restore(record: &BackupRecord) -> ApResult<()> {
    match &record.saved {
        Some(saved) if fs::try_exists(saved).await? => {
            fs::rename(saved, &record.original).await?;
            info!(path = %record.original.display(), "Restored original");
        }
        Some(saved) => {
            warn!(path = %saved.display(), "Backup already consumed");
        }
        None => {
            if fs::try_exists(&record.original).await? {
                fs::remove_file(&record.original).await?;
                info!(path = %record.original.display(), "Removed managed file");
            }
        }
    }
    Ok(())
}
