//! Network topology strategies
//!
//! A topology decides how clients on the wireless side reach the WAN:
//! - nat: routed and masqueraded behind the gateway address
//! - proxy_arp: routed, with the host answering ARP on both sides
//! - bridge: wireless and WAN share one L2 segment through a bridge device

mod bridge;
mod nat;
mod proxy_arp;

pub use bridge::BridgeTopology;
pub use nat::NatTopology;
pub use proxy_arp::ProxyArpTopology;

use crate::backup;
use crate::command::CommandRunner;
use crate::config::{ApConfig, Method, RuntimePaths};
use crate::dhcp::DhcpController;
use crate::error::{ApResult, StepContext};
use crate::firewall::FirewallController;
use crate::hostapd::HostapdController;
use crate::interface::{InterfaceBinding, InterfaceController};
use crate::routing::RoutingController;
use crate::session::SessionRecord;
use crate::wifi::WifiController;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Controllers for every subsystem a session touches
pub struct Host {
    pub links: InterfaceController,
    pub wifi: WifiController,
    pub routing: RoutingController,
    pub firewall: FirewallController,
    pub hostapd: HostapdController,
    pub dhcp: DhcpController,
}

impl Host {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: &RuntimePaths) -> Self {
        Self {
            links: InterfaceController::new(runner.clone()),
            wifi: WifiController::new(runner.clone()),
            routing: RoutingController::new(runner.clone()),
            firewall: FirewallController::new(runner.clone()),
            hostapd: HostapdController::new(
                runner.clone(),
                paths.hostapd_conf.clone(),
                paths.hostapd_pid.clone(),
            ),
            dhcp: DhcpController::new(runner, paths.dhcp_conf.clone(), paths.dhcp_pid.clone()),
        }
    }
}

#[async_trait]
pub trait Topology: Send + Sync {
    fn method(&self) -> Method;

    /// Interface dnsmasq serves clients on
    fn dhcp_interface(&self, config: &ApConfig, interfaces: &InterfaceBinding) -> String;

    /// Addresses, links and bridge devices
    async fn program_addressing(
        &self,
        host: &Host,
        config: &ApConfig,
        interfaces: &InterfaceBinding,
    ) -> ApResult<()>;

    /// Kernel forwarding switches and packet filter rules
    async fn program_forwarding(
        &self,
        _host: &Host,
        _interfaces: &InterfaceBinding,
    ) -> ApResult<()> {
        Ok(())
    }

    /// Adjust the hostapd config once the topology is in place
    async fn configure_ap(&self, _host: &Host, _config: &ApConfig) -> ApResult<()> {
        Ok(())
    }

    /// Undo what only this topology creates. Must tolerate partial setup.
    async fn teardown(&self, _host: &Host, _session: &SessionRecord) {}
}

pub fn for_method(method: Method) -> Box<dyn Topology> {
    match method {
        Method::Nat => Box::new(NatTopology),
        Method::ProxyArp => Box::new(ProxyArpTopology),
        Method::Bridge => Box::new(BridgeTopology),
    }
}

/// Bring a topology up: addressing, DHCP/DNS service, forwarding.
///
/// The backup record is stored in `session` and persisted to `session_path`
/// before the system file is overwritten.
pub async fn apply(
    topology: &dyn Topology,
    host: &Host,
    config: &ApConfig,
    session: &mut SessionRecord,
    session_path: &std::path::Path,
) -> ApResult<()> {
    let interfaces = session.interfaces.clone();
    info!(method = %topology.method(), "Applying topology");

    topology
        .program_addressing(host, config, &interfaces)
        .await
        .step("addressing")?;

    let record = backup::backup(&config.paths.system_dhcp_conf)
        .await
        .step("backing up system DHCP config")?;
    session.backup = Some(record.clone());
    session.save(session_path).await.step("saving session")?;

    host.dhcp.stop().await;

    let dhcp_interface = topology.dhcp_interface(config, &interfaces);
    let conf = host
        .dhcp
        .write_config(config, &dhcp_interface)
        .await
        .step("writing DHCP config")?;
    backup::install(&record, &conf)
        .await
        .step("installing system DHCP config")?;
    host.dhcp.start().await.step("starting dnsmasq")?;

    topology
        .program_forwarding(host, &interfaces)
        .await
        .step("forwarding rules")?;

    if let Err(e) = host.firewall.snapshot(&config.paths.rules_file).await {
        warn!("Could not save rule snapshot: {}", e);
    }

    Ok(())
}
