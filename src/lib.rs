//! apctl - WiFi access point controller
//!
//! Turns a Linux host into an access point: hostapd serves the radio,
//! dnsmasq hands out addresses, and the wireless side reaches the upstream
//! network through one of three topologies:
//! - nat: masquerade behind the gateway address
//! - proxy_arp: routed, with proxy ARP on both sides
//! - bridge: wireless and WAN joined in a Linux bridge
//!
//! Everything is driven through external tools (ip, iw, iptables, sysctl,
//! hostapd, dnsmasq) and torn down again when the session ends.

pub mod error;
pub mod command;
pub mod config;
pub mod validation;
pub mod interface;
pub mod wifi;
pub mod routing;
pub mod firewall;
pub mod hostapd;
pub mod dhcp;
pub mod backup;
pub mod session;
pub mod topology;
pub mod lifecycle;

// Re-export commonly used types
pub use error::{ApError, ApResult};
pub use command::{CommandRunner, SystemRunner};
pub use config::{ApConfig, Method, Overrides, RuntimePaths};
pub use interface::{InterfaceBinding, InterfaceController};
pub use lifecycle::LifecycleController;
pub use session::{SessionPhase, SessionRecord};
pub use topology::Topology;
