//! Bridge topology

use super::{Host, Topology};
use crate::config::{ApConfig, Method};
use crate::error::ApResult;
use crate::interface::InterfaceBinding;
use crate::session::SessionRecord;
use async_trait::async_trait;
use tracing::{info, warn};

/// WAN and wireless become members of one bridge, which carries the gateway
/// address and the DHCP service.
pub struct BridgeTopology;

#[async_trait]
impl Topology for BridgeTopology {
    fn method(&self) -> Method {
        Method::Bridge
    }

    fn dhcp_interface(&self, config: &ApConfig, _interfaces: &InterfaceBinding) -> String {
        config.bridge_name.clone()
    }

    async fn program_addressing(
        &self,
        host: &Host,
        config: &ApConfig,
        interfaces: &InterfaceBinding,
    ) -> ApResult<()> {
        let bridge = &config.bridge_name;
        info!(bridge = %bridge, "Creating bridge");

        host.links.create_bridge(bridge).await?;
        host.links.up(&interfaces.wan).await?;
        host.links.up(&interfaces.wireless).await?;
        if let Some(lan) = &config.lan_interface {
            host.links.up(lan).await?;
        }
        host.links.up(bridge).await?;

        host.links.set_master(&interfaces.wan, bridge).await?;
        // A managed-mode radio is usually refused here; hostapd attaches it
        // itself through the bridge= directive.
        if let Err(e) = host.links.set_master(&interfaces.wireless, bridge).await {
            warn!(interface = %interfaces.wireless, "Deferring bridge membership to hostapd: {}", e);
        }
        if let Some(lan) = &config.lan_interface {
            host.links.set_master(lan, bridge).await?;
        }

        host.links.add_addr(bridge, &config.gateway_cidr()).await
    }

    async fn configure_ap(&self, host: &Host, config: &ApConfig) -> ApResult<()> {
        host.hostapd.append_bridge(&config.bridge_name).await
    }

    async fn teardown(&self, host: &Host, session: &SessionRecord) {
        let Some(bridge) = &session.bridge else {
            return;
        };
        if let Some(lan) = &session.lan {
            if let Err(e) = host.links.down(lan).await {
                warn!(interface = %lan, "LAN member not brought down: {}", e);
            }
        }
        if let Err(e) = host.links.down(bridge).await {
            warn!(bridge = %bridge, "Bridge not brought down: {}", e);
        }
        if let Err(e) = host.links.delete_bridge(bridge).await {
            warn!(bridge = %bridge, "Bridge not deleted: {}", e);
        }
    }
}
