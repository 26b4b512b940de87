//! Routing and kernel forwarding switches

use crate::command::CommandRunner;
use crate::error::{ApError, ApResult};
use crate::validation;
use std::sync::Arc;

pub struct RoutingController {
    runner: Arc<dyn CommandRunner>,
}

impl RoutingController {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Egress device of the first default route, if any
    pub async fn default_route_interface(&self) -> ApResult<Option<String>> {
        let output = self
            .runner
            .run("ip", &["-json", "route", "show", "default"])
            .await?;
        if output.trim().is_empty() {
            return Ok(None);
        }

        let json: serde_json::Value = serde_json::from_str(&output)
            .map_err(|e| ApError::Parse(format!("ip route output: {}", e)))?;

        Ok(json
            .as_array()
            .and_then(|routes| {
                routes
                    .iter()
                    .find_map(|r| r.get("dev").and_then(|v| v.as_str()))
            })
            .map(String::from))
    }

    /// Toggle net.ipv4.ip_forward
    pub async fn set_ip_forward(&self, enable: bool) -> ApResult<()> {
        self.sysctl("net.ipv4.ip_forward", enable).await
    }

    /// Toggle proxy ARP on one interface
    pub async fn set_proxy_arp(&self, interface: &str, enable: bool) -> ApResult<()> {
        validation::validate_interface_name(interface)?;
        self.sysctl(&format!("net.ipv4.conf.{}.proxy_arp", interface), enable)
            .await
    }

    async fn sysctl(&self, key: &str, enable: bool) -> ApResult<()> {
        let setting = format!("{}={}", key, if enable { 1 } else { 0 });
        self.runner.run("sysctl", &["-w", &setting]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::fake::FakeRunner;

    #[tokio::test]
    async fn test_default_route_interface() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "ip -json route show default",
            r#"[{"dst":"default","gateway":"192.168.1.1","dev":"eth0","flags":["onlink"]}]"#,
        );
        let routing = RoutingController::new(runner);
        assert_eq!(routing.default_route_interface().await.unwrap(), Some("eth0".to_string()));
    }

    #[tokio::test]
    async fn test_no_default_route() {
        let runner = Arc::new(FakeRunner::new());
        let routing = RoutingController::new(runner.clone());
        assert_eq!(routing.default_route_interface().await.unwrap(), None);

        runner.respond("ip -json route show default", "not json");
        assert!(matches!(routing.default_route_interface().await, Err(ApError::Parse(_))));
    }

    #[tokio::test]
    async fn test_sysctl_switches() {
        let runner = Arc::new(FakeRunner::new());
        let routing = RoutingController::new(runner.clone());
        routing.set_ip_forward(true).await.unwrap();
        routing.set_proxy_arp("wlan0", true).await.unwrap();
        routing.set_ip_forward(false).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "sysctl -w net.ipv4.ip_forward=1",
                "sysctl -w net.ipv4.conf.wlan0.proxy_arp=1",
                "sysctl -w net.ipv4.ip_forward=0",
            ]
        );
    }
}
