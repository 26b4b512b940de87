//! NAT topology

use super::{Host, Topology};
use crate::config::{ApConfig, Method};
use crate::error::ApResult;
use crate::interface::InterfaceBinding;
use async_trait::async_trait;

/// Clients live in their own subnet behind the wireless interface and are
/// masqueraded out of the WAN.
pub struct NatTopology;

#[async_trait]
impl Topology for NatTopology {
    fn method(&self) -> Method {
        Method::Nat
    }

    fn dhcp_interface(&self, _config: &ApConfig, interfaces: &InterfaceBinding) -> String {
        interfaces.wireless.clone()
    }

    async fn program_addressing(
        &self,
        host: &Host,
        config: &ApConfig,
        interfaces: &InterfaceBinding,
    ) -> ApResult<()> {
        host.links.flush_addrs(&interfaces.wireless).await?;
        host.links
            .add_addr(&interfaces.wireless, &config.gateway_cidr())
            .await
    }

    async fn program_forwarding(&self, host: &Host, interfaces: &InterfaceBinding) -> ApResult<()> {
        host.routing.set_ip_forward(true).await?;
        host.firewall.masquerade(&interfaces.wan).await?;
        host.firewall
            .allow_established(&interfaces.wan, &interfaces.wireless)
            .await?;
        host.firewall
            .allow_forward(&interfaces.wireless, &interfaces.wan)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::command::fake::FakeRunner;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_gateway_only_on_wireless() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path(), "nat");
        let runner = Arc::new(FakeRunner::new());
        let host = Host::new(runner.clone(), &cfg.paths);

        NatTopology
            .program_addressing(&host, &cfg, &binding())
            .await
            .unwrap();
        NatTopology.program_forwarding(&host, &binding()).await.unwrap();

        assert!(runner.called("ip addr add 192.168.50.1/24 dev wlan0"));
        assert!(!runner.calls().iter().any(|c| c.contains("dev eth0") && c.starts_with("ip addr add")));
        assert_eq!(
            &runner.calls()[2..],
            &[
                "sysctl -w net.ipv4.ip_forward=1",
                "iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE",
                "iptables -A FORWARD -i eth0 -o wlan0 -m state --state RELATED,ESTABLISHED -j ACCEPT",
                "iptables -A FORWARD -i wlan0 -o eth0 -j ACCEPT",
            ]
        );
        assert_eq!(NatTopology.dhcp_interface(&cfg, &binding()), "wlan0");
    }
}
