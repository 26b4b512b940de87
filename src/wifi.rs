//! WiFi device control
//!
//! Low-level WiFi management using iw command

use crate::command::CommandRunner;
use crate::error::ApResult;
use crate::validation;
use std::sync::Arc;

/// WiFi controller
pub struct WifiController {
    runner: Arc<dyn CommandRunner>,
}

impl WifiController {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Wireless interfaces in the order `iw dev` reports them
    pub async fn list_interfaces(&self) -> ApResult<Vec<String>> {
        let output = self.runner.run("iw", &["dev"]).await?;
        Ok(parse_iw_dev(&output))
    }

    /// Set power save mode
    pub async fn set_power_save(&self, interface: &str, enable: bool) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        let mode = if enable { "on" } else { "off" };
        self.runner
            .run("iw", &["dev", interface, "set", "power_save", mode])
            .await
            .map(|_| ())
    }
}

fn parse_iw_dev(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Interface "))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
