//! DHCP/DNS service management via dnsmasq

use crate::command::{self, CommandRunner};
use crate::config::ApConfig;
use crate::error::ApResult;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;

/// Lease time handed to clients
pub const LEASE_TIME: &str = "12h";

/// Render the dnsmasq configuration serving clients on `interface`
pub fn render_config(config: &ApConfig, interface: &str) -> String {
    let (start, end) = config.dhcp_range;
    let mut conf = String::new();

    conf.push_str(&format!("interface={}\n", interface));
    conf.push_str("bind-interfaces\n");
    conf.push_str(&format!("server={}\n", config.dns_server));
    conf.push_str(&format!(
        "dhcp-range={},{},{},{}\n",
        start,
        end,
        config.netmask(),
        LEASE_TIME
    ));

    conf
}

pub struct DhcpController {
    runner: Arc<dyn CommandRunner>,
    conf_path: PathBuf,
    pid_file: PathBuf,
}

impl DhcpController {
    pub fn new(runner: Arc<dyn CommandRunner>, conf_path: PathBuf, pid_file: PathBuf) -> Self {
        Self {
            runner,
            conf_path,
            pid_file,
        }
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    pub async fn write_config(&self, config: &ApConfig, interface: &str) -> ApResult<String> {
        let conf = render_config(config, interface);
        if let Some(dir) = self.conf_path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&self.conf_path, &conf).await?;
        Ok(conf)
    }

    /// Start dnsmasq on our generated config; it daemonizes itself
    pub async fn start(&self) -> ApResult<()> {
        let conf_arg = format!("--conf-file={}", self.conf_path.display());
        let pid_arg = format!("--pid-file={}", self.pid_file.display());
        info!(conf = %self.conf_path.display(), "Starting dnsmasq");
        self.runner
            .run("dnsmasq", &[&conf_arg, &pid_arg])
            .await
            .map(|_| ())
    }

    pub async fn stop(&self) {
        command::stop_daemon(self.runner.as_ref(), "dnsmasq", "dnsmasq", &self.pid_file).await;
    }
}
