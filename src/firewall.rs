//! Packet filter management via iptables

use crate::command::CommandRunner;
use crate::error::ApResult;
use crate::validation;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Tables flushed at teardown
const TABLES: [&str; 3] = ["filter", "nat", "mangle"];

pub struct FirewallController {
    runner: Arc<dyn CommandRunner>,
}

impl FirewallController {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Masquerade everything leaving through `wan`
    pub async fn masquerade(&self, wan: &str) -> ApResult<()> {
        validation::validate_interface_name(wan)?;
        self.iptables(&["-t", "nat", "-A", "POSTROUTING", "-o", wan, "-j", "MASQUERADE"])
            .await
    }

    /// Allow replies from `wan` back to `lan`
    pub async fn allow_established(&self, wan: &str, lan: &str) -> ApResult<()> {
        validation::validate_interface_name(wan)?;
        validation::validate_interface_name(lan)?;
        self.iptables(&[
            "-A", "FORWARD", "-i", wan, "-o", lan, "-m", "state", "--state",
            "RELATED,ESTABLISHED", "-j", "ACCEPT",
        ])
        .await
    }

    /// Allow all traffic from `lan` out through `wan`
    pub async fn allow_forward(&self, lan: &str, wan: &str) -> ApResult<()> {
        validation::validate_interface_name(lan)?;
        validation::validate_interface_name(wan)?;
        self.iptables(&["-A", "FORWARD", "-i", lan, "-o", wan, "-j", "ACCEPT"])
            .await
    }

    /// Write the live rule set to `path` for inspection
    pub async fn snapshot(&self, path: &Path) -> ApResult<()> {
        let rules = self.runner.run("iptables-save", &[]).await?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, rules).await?;
        debug!(path = %path.display(), "Saved rule snapshot");
        Ok(())
    }

    /// Flush every table and delete custom chains. Never fails.
    pub async fn flush_all(&self) {
        for table in TABLES {
            self.runner.run_tolerant("iptables", &["-t", table, "-F"]).await;
            self.runner.run_tolerant("iptables", &["-t", table, "-X"]).await;
        }
    }

    async fn iptables(&self, args: &[&str]) -> ApResult<()> {
        self.runner.run("iptables", args).await.map(|_| ())
    }
}
