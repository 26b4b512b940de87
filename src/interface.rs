//! Network interface control
//!
//! Link and address management using the ip command, plus resolution of the
//! WAN and wireless interfaces every other step works on.

use crate::command::CommandRunner;
use crate::config::ApConfig;
use crate::error::{ApError, ApResult};
use crate::routing::RoutingController;
use crate::validation;
use crate::wifi::WifiController;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Interface controller
pub struct InterfaceController {
    runner: Arc<dyn CommandRunner>,
}

impl InterfaceController {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Bring interface up
    pub async fn up(&self, interface: &str) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        self.run_ip(&["link", "set", "dev", interface, "up"]).await
    }

    /// Bring interface down
    pub async fn down(&self, interface: &str) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        self.run_ip(&["link", "set", "dev", interface, "down"]).await
    }

    /// Add an address in CIDR notation
    pub async fn add_addr(&self, interface: &str, cidr: &str) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        self.run_ip(&["addr", "add", cidr, "dev", interface]).await
    }

    /// Delete an address in CIDR notation
    pub async fn del_addr(&self, interface: &str, cidr: &str) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        self.run_ip(&["addr", "del", cidr, "dev", interface]).await
    }

    /// Flush all IP addresses
    pub async fn flush_addrs(&self, interface: &str) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        self.run_ip(&["addr", "flush", "dev", interface]).await
    }

    /// Create a bridge device
    pub async fn create_bridge(&self, bridge: &str) -> ApResult<()> {
        validation::validate_interface_name(bridge)?;
        self.run_ip(&["link", "add", "name", bridge, "type", "bridge"]).await
    }

    /// Delete a bridge device
    pub async fn delete_bridge(&self, bridge: &str) -> ApResult<()> {
        validation::validate_interface_name(bridge)?;
        self.run_ip(&["link", "delete", bridge, "type", "bridge"]).await
    }

    /// Attach interface to a bridge
    pub async fn set_master(&self, interface: &str, bridge: &str) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        validation::validate_interface_name(bridge)?;
        self.run_ip(&["link", "set", "dev", interface, "master", bridge]).await
    }

    async fn run_ip(&self, args: &[&str]) -> ApResult<()> {
        self.runner.run("ip", args).await.map(|_| ())
    }
}

/// Resolved WAN and wireless interface names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceBinding {
    pub wan: String,
    pub wireless: String,
}

/// Resolve the interfaces named in `config`, querying the system for any
/// that were left empty. Read-only; runs once per process.
pub async fn resolve_interfaces(
    runner: Arc<dyn CommandRunner>,
    config: &ApConfig,
) -> ApResult<InterfaceBinding> {
    let mut wan = config.wan_interface.clone();
    let mut wireless = config.wireless_interface.clone();

    if wan.is_empty() {
        wan = RoutingController::new(runner.clone())
            .default_route_interface()
            .await
            .map_err(|e| ApError::Resolution(format!("default route query failed: {}", e)))?
            .unwrap_or_default();
    }

    if wireless.is_empty() {
        wireless = WifiController::new(runner.clone())
            .list_interfaces()
            .await
            .map_err(|e| ApError::Resolution(format!("wireless device query failed: {}", e)))?
            .into_iter()
            .next()
            .unwrap_or_default();
    }

    if wan.is_empty() {
        return Err(ApError::Resolution(
            "no WAN interface configured and no default route found".to_string(),
        ));
    }
    if wireless.is_empty() {
        return Err(ApError::Resolution(
            "no wireless interface configured and none detected".to_string(),
        ));
    }

    validation::validate_interface_name(&wan)
        .and_then(|_| validation::validate_interface_name(&wireless))
        .map_err(|e| ApError::Resolution(e.to_string()))?;

    info!(wan = %wan, wireless = %wireless, "Resolved interfaces");
    Ok(InterfaceBinding { wan, wireless })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fake::FakeRunner;
    use crate::config::{ConfigFile, Overrides};

    const ROUTES: &str = r#"[{"dst":"default","gateway":"10.0.0.1","dev":"enp3s0","protocol":"dhcp","metric":100,"flags":[]},{"dst":"default","gateway":"10.0.1.1","dev":"wwan0","flags":[]}]"#;
    const IW_DEV: &str = "phy#0\n\tInterface wlp2s0\n\t\tifindex 3\n\t\ttype managed\nphy#1\n\tInterface wlan1\n\t\ttype managed\n";

    fn config(wan: &str, wireless: &str) -> ApConfig {
        let file = ConfigFile {
            wan_interface: wan.to_string(),
            wireless_interface: wireless.to_string(),
            ..Default::default()
        };
        ApConfig::from_file(file, &Overrides::default()).unwrap()
    }

    #[tokio::test]
    async fn test_explicit_names_skip_queries() {
        let runner = Arc::new(FakeRunner::new());
        let binding = resolve_interfaces(runner.clone(), &config("eth0", "wlan0"))
            .await
            .unwrap();
        assert_eq!(binding, InterfaceBinding { wan: "eth0".into(), wireless: "wlan0".into() });
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_detects_first_match() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("ip -json route show default", ROUTES);
        runner.respond("iw dev", IW_DEV);
        let binding = resolve_interfaces(runner.clone(), &config("", "")).await.unwrap();
        assert_eq!(binding.wan, "enp3s0");
        assert_eq!(binding.wireless, "wlp2s0");
    }

    #[tokio::test]
    async fn test_no_default_route_is_resolution_error() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("ip -json route show default", "[]");
        let err = resolve_interfaces(runner.clone(), &config("", "wlan0"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_no_wireless_device_is_resolution_error() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("iw dev", "");
        let err = resolve_interfaces(runner.clone(), &config("eth0", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ApError::Resolution(_)));
    }

    #[tokio::test]
    async fn test_bridge_commands() {
        let runner = Arc::new(FakeRunner::new());
        let ifc = InterfaceController::new(runner.clone());
        ifc.create_bridge("br0").await.unwrap();
        ifc.set_master("eth0", "br0").await.unwrap();
        ifc.add_addr("br0", "192.168.50.1/24").await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "ip link add name br0 type bridge",
                "ip link set dev eth0 master br0",
                "ip addr add 192.168.50.1/24 dev br0",
            ]
        );
        assert!(ifc.up("eth0; reboot").await.is_err());
    }
}
