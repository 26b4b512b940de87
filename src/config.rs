//! Configuration management for apctl
//!
//! The on-disk TOML file is read once at start, overrides are applied and the
//! result is frozen into an [`ApConfig`] that every component borrows.

use crate::error::{ApError, ApResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/apctl/apctl.toml";

/// How the wireless side is connected to the upstream network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Nat,
    ProxyArp,
    Bridge,
}

impl FromStr for Method {
    type Err = ApError;

    fn from_str(s: &str) -> ApResult<Self> {
        match s.trim() {
            "nat" => Ok(Method::Nat),
            "proxy_arp" => Ok(Method::ProxyArp),
            "bridge" => Ok(Method::Bridge),
            other => Err(ApError::Method(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Nat => "nat",
            Method::ProxyArp => "proxy_arp",
            Method::Bridge => "bridge",
        };
        f.write_str(name)
    }
}

/// File representation; every key is optional
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub wan_interface: String,
    pub lan_interface: Option<String>,
    pub wireless_interface: String,
    pub ssid: String,
    pub passphrase: String,
    pub country_code: String,
    pub channel: u8,
    pub gateway: Ipv4Addr,
    pub prefix_len: u8,
    pub dhcp_range_start: Ipv4Addr,
    pub dhcp_range_end: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub method: String,
    pub bridge_name: String,
    pub grace_period_secs: u64,
    pub paths: PathsFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsFile {
    /// Shared location for generated files
    pub runtime_dir: PathBuf,
    /// System-wide dnsmasq config, replaced while the AP runs
    pub system_dhcp_conf: PathBuf,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            wan_interface: String::new(),
            lan_interface: None,
            wireless_interface: String::new(),
            ssid: "apctl".to_string(),
            passphrase: "changeme123".to_string(),
            country_code: "US".to_string(),
            channel: 6,
            gateway: Ipv4Addr::new(192, 168, 50, 1),
            prefix_len: 24,
            dhcp_range_start: Ipv4Addr::new(192, 168, 50, 10),
            dhcp_range_end: Ipv4Addr::new(192, 168, 50, 100),
            dns_server: Ipv4Addr::new(8, 8, 8, 8),
            method: "nat".to_string(),
            bridge_name: "br0".to_string(),
            grace_period_secs: 2,
            paths: PathsFile::default(),
        }
    }
}

impl Default for PathsFile {
    fn default() -> Self {
        Self {
            runtime_dir: PathBuf::from("/run/apctl"),
            system_dhcp_conf: PathBuf::from("/etc/dnsmasq.conf"),
        }
    }
}

/// Values given on the command line, applied over the file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub wan_interface: Option<String>,
    pub wireless_interface: Option<String>,
    pub method: Option<String>,
}

/// Immutable configuration record for one process run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApConfig {
    pub wan_interface: String,
    pub lan_interface: Option<String>,
    pub wireless_interface: String,
    pub ssid: String,
    pub passphrase: String,
    pub country_code: String,
    pub channel: u8,
    pub gateway: Ipv4Addr,
    pub prefix_len: u8,
    pub dhcp_range: (Ipv4Addr, Ipv4Addr),
    pub dns_server: Ipv4Addr,
    pub method: Method,
    pub bridge_name: String,
    pub grace_period: Duration,
    pub paths: RuntimePaths,
}

impl ApConfig {
    /// Load from `path`. A missing file at the default location means defaults.
    pub fn load<P: AsRef<Path>>(path: P, overrides: &Overrides) -> ApResult<Self> {
        let path = path.as_ref();
        let file = if !path.exists() && path == Path::new(DEFAULT_CONFIG_PATH) {
            ConfigFile::default()
        } else {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ApError::Configuration(format!("Failed to read config {}: {}", path.display(), e))
            })?;
            toml::from_str(&content).map_err(|e| {
                ApError::Configuration(format!("Failed to parse config {}: {}", path.display(), e))
            })?
        };
        Self::from_file(file, overrides)
    }

    pub fn from_file(mut file: ConfigFile, overrides: &Overrides) -> ApResult<Self> {
        if let Some(wan) = &overrides.wan_interface {
            file.wan_interface = wan.clone();
        }
        if let Some(wlan) = &overrides.wireless_interface {
            file.wireless_interface = wlan.clone();
        }
        if let Some(method) = &overrides.method {
            file.method = method.clone();
        }

        let method: Method = file.method.parse()?;

        Ok(Self {
            wan_interface: file.wan_interface,
            lan_interface: file.lan_interface.filter(|s| !s.is_empty()),
            wireless_interface: file.wireless_interface,
            ssid: file.ssid,
            passphrase: file.passphrase,
            country_code: file.country_code,
            channel: file.channel,
            gateway: file.gateway,
            prefix_len: file.prefix_len,
            dhcp_range: (file.dhcp_range_start, file.dhcp_range_end),
            dns_server: file.dns_server,
            method,
            bridge_name: file.bridge_name,
            grace_period: Duration::from_secs(file.grace_period_secs),
            paths: RuntimePaths::new(file.paths.runtime_dir, file.paths.system_dhcp_conf),
        })
    }

    /// Gateway in CIDR notation, e.g. `192.168.50.1/24`
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway, self.prefix_len)
    }

    /// Dotted subnet mask derived from the prefix length
    pub fn netmask(&self) -> Ipv4Addr {
        prefix_to_netmask(self.prefix_len)
    }
}

pub fn prefix_to_netmask(prefix_len: u8) -> Ipv4Addr {
    let bits = match prefix_len {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - u32::from(p)),
    };
    Ipv4Addr::from(bits)
}

/// Locations of every file the session generates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub runtime_dir: PathBuf,
    pub hostapd_conf: PathBuf,
    pub hostapd_pid: PathBuf,
    pub dhcp_conf: PathBuf,
    pub dhcp_pid: PathBuf,
    pub rules_file: PathBuf,
    pub session_file: PathBuf,
    pub lock_file: PathBuf,
    pub system_dhcp_conf: PathBuf,
}

impl RuntimePaths {
    pub fn new(runtime_dir: PathBuf, system_dhcp_conf: PathBuf) -> Self {
        Self {
            hostapd_conf: runtime_dir.join("hostapd.conf"),
            hostapd_pid: runtime_dir.join("hostapd.pid"),
            dhcp_conf: runtime_dir.join("dnsmasq.conf"),
            dhcp_pid: runtime_dir.join("dnsmasq.pid"),
            rules_file: runtime_dir.join("iptables.rules"),
            session_file: runtime_dir.join("session.json"),
            lock_file: runtime_dir.join("apctl.pid"),
            runtime_dir,
            system_dhcp_conf,
        }
    }

    /// Generated files removed at teardown
    pub fn temporary_artifacts(&self) -> [&Path; 5] {
        [
            self.hostapd_conf.as_path(),
            self.hostapd_pid.as_path(),
            self.dhcp_conf.as_path(),
            self.dhcp_pid.as_path(),
            self.rules_file.as_path(),
        ]
    }
}
