//! hostapd management for WiFi Access Point
//!
//! Configuration generation and control for hostapd

use crate::command::{self, CommandRunner};
use crate::config::ApConfig;
use crate::error::{ApError, ApResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::info;

/// Render the hostapd configuration for `interface`.
///
/// 802.11g with 802.11n enabled, WPA2-PSK with CCMP only.
pub fn render_config(config: &ApConfig, interface: &str) -> String {
    let mut conf = String::new();

    conf.push_str(&format!("interface={}\n", interface));
    conf.push_str(&format!("ssid={}\n", config.ssid));
    conf.push_str("hw_mode=g\n");
    conf.push_str(&format!("channel={}\n", config.channel));

    conf.push_str("wpa=2\nwpa_passphrase=");
    conf.push_str(&config.passphrase);
    conf.push_str("\nwpa_pairwise=CCMP\nwpa_key_mgmt=WPA-PSK\n");

    conf.push_str(&format!("country_code={}\n", config.country_code));
    conf.push_str("ieee80211n=1\n");

    conf
}

/// hostapd controller
pub struct HostapdController {
    runner: Arc<dyn CommandRunner>,
    conf_path: PathBuf,
    pid_file: PathBuf,
}

impl HostapdController {
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

    pub async fn write_config(&self, config: &ApConfig, interface: &str) -> ApResult<()> {
        if let Some(dir) = self.conf_path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&self.conf_path, render_config(config, interface)).await?;
        Ok(())
    }

    /// Make hostapd attach the wireless interface to `bridge`
    pub async fn append_bridge(&self, bridge: &str) -> ApResult<()> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&self.conf_path)
            .await?;
        file.write_all(format!("bridge={}\n", bridge).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Launch hostapd in the background, wait `grace`, then check it is alive
    pub async fn start(&self, grace: std::time::Duration) -> ApResult<()> {
        let conf = self.conf_path.to_string_lossy();
        let pid_file = self.pid_file.to_string_lossy();

        info!(conf = %conf, "Starting hostapd");
        self.runner
            .run("hostapd", &["-B", "-P", &pid_file, &conf])
            .await
            .map_err(|e| ApError::Startup(format!("failed to launch hostapd: {}", e)))?;

        sleep(grace).await;

        if !self.is_running().await {
            return Err(ApError::Startup(format!(
                "hostapd is not running {}s after launch",
                grace.as_secs()
            )));
        }

        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        match command::read_pid_file(&self.pid_file).await {
            Some(pid) => self.runner.process_is(pid, "hostapd"),
            None => false,
        }
    }

    pub async fn stop(&self) {
        command::stop_daemon(self.runner.as_ref(), "hostapd", "hostapd", &self.pid_file).await;
    }
}
