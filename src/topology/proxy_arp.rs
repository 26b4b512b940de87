//! Proxy-ARP topology

use super::{Host, Topology};
use crate::config::{ApConfig, Method};
use crate::error::ApResult;
use crate::interface::InterfaceBinding;
use crate::session::SessionRecord;
use async_trait::async_trait;
use tracing::warn;

/// The gateway address sits on both sides and the host answers ARP for
/// either side, so clients appear to share the upstream segment.
pub struct ProxyArpTopology;

#[async_trait]
impl Topology for ProxyArpTopology {
    fn method(&self) -> Method {
        Method::ProxyArp
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
        let cidr = config.gateway_cidr();
        host.links.add_addr(&interfaces.wan, &cidr).await?;
        host.links.flush_addrs(&interfaces.wireless).await?;
        host.links.add_addr(&interfaces.wireless, &cidr).await
    }

    async fn program_forwarding(&self, host: &Host, interfaces: &InterfaceBinding) -> ApResult<()> {
        host.routing.set_ip_forward(true).await?;
        host.routing.set_proxy_arp(&interfaces.wan, true).await?;
        host.routing.set_proxy_arp(&interfaces.wireless, true).await?;
        host.firewall.masquerade(&interfaces.wan).await?;
        host.firewall
            .allow_forward(&interfaces.wireless, &interfaces.wan)
            .await?;
        host.firewall
            .allow_established(&interfaces.wan, &interfaces.wireless)
            .await
    }

    async fn teardown(&self, host: &Host, session: &SessionRecord) {
        let wan = &session.interfaces.wan;
        if let Err(e) = host.links.del_addr(wan, &session.gateway).await {
            warn!(interface = %wan, "Gateway address not removed: {}", e);
        }
        for iface in [wan, &session.interfaces.wireless] {
            if let Err(e) = host.routing.set_proxy_arp(iface, false).await {
                warn!(interface = %iface, "proxy_arp not reset: {}", e);
            }
        }
    }
}
