//! Input validation
//!
//! Everything that ends up on a command line or in a generated config file is
//! checked here first, so a bad value fails before the host is touched.

use crate::config::{prefix_to_netmask, ApConfig};
use crate::error::{ApError, ApResult};
use std::net::Ipv4Addr;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// hostapd rejects WPA passphrases outside 8..=63
const MIN_PASSPHRASE_LEN: usize = 8;
const MAX_PASSPHRASE_LEN: usize = 63;

/// Validate interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes and underscores,
/// and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> ApResult<()> {
    if name.is_empty() {
        return Err(ApError::InvalidParameter(
            "Interface name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(ApError::InvalidParameter(format!(
            "Interface name too long (max {} characters)",
            MAX_INTERFACE_NAME_LEN
        )));
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(ApError::InvalidParameter(
            "Interface name cannot start with dash".to_string(),
        ));
    }

    if let Some(c) = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_' && *c != '.')
    {
        return Err(ApError::InvalidParameter(format!(
            "Invalid interface name '{}': contains invalid character '{}'",
            name, c
        )));
    }

    Ok(())
}

/// SSIDs are 1-32 bytes and must not break the line-oriented hostapd config
pub fn validate_ssid(ssid: &str) -> ApResult<()> {
    if ssid.is_empty() {
        return Err(ApError::InvalidParameter("SSID cannot be empty".to_string()));
    }

    if ssid.len() > 32 {
        return Err(ApError::InvalidParameter(
            "SSID cannot exceed 32 bytes".to_string(),
        ));
    }

    if ssid.chars().any(|c| c.is_control()) {
        return Err(ApError::InvalidParameter(
            "SSID contains invalid control characters".to_string(),
        ));
    }

    Ok(())
}

/// WPA2-PSK passphrase: 8-63 printable ASCII characters
pub fn validate_passphrase(passphrase: &str) -> ApResult<()> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(ApError::InvalidParameter(format!(
            "Passphrase must be at least {} characters",
            MIN_PASSPHRASE_LEN
        )));
    }

    if passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(ApError::InvalidParameter(format!(
            "Passphrase cannot exceed {} characters",
            MAX_PASSPHRASE_LEN
        )));
    }

    if !passphrase.is_ascii() || passphrase.chars().any(|c| c.is_ascii_control()) {
        return Err(ApError::InvalidParameter(
            "Passphrase must contain only printable ASCII characters".to_string(),
        ));
    }

    Ok(())
}

/// Country code (ISO 3166-1 alpha-2, or the "00" world domain)
pub fn validate_country_code(code: &str) -> ApResult<()> {
    if code.len() != 2 {
        return Err(ApError::InvalidParameter(
            "Country code must be 2 characters".to_string(),
        ));
    }

    if code != "00" && !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ApError::InvalidParameter(format!(
            "Country code must be two upper-case letters, got '{}'",
            code
        )));
    }

    Ok(())
}

/// 802.11g channels
pub fn validate_channel(channel: u8) -> ApResult<()> {
    if !(1..=14).contains(&channel) {
        return Err(ApError::InvalidParameter(format!(
            "Invalid channel {} for 802.11g (expected 1-14)",
            channel
        )));
    }
    Ok(())
}

/// Both ends of the range must sit inside the gateway subnet, in order,
/// and must not hand out the gateway itself.
pub fn validate_dhcp_range(
    gateway: Ipv4Addr,
    prefix_len: u8,
    start: Ipv4Addr,
    end: Ipv4Addr,
) -> ApResult<()> {
    if prefix_len == 0 || prefix_len > 30 {
        return Err(ApError::InvalidParameter(format!(
            "Prefix length {} leaves no room for DHCP clients",
            prefix_len
        )));
    }

    let mask = u32::from(prefix_to_netmask(prefix_len));
    let net = u32::from(gateway) & mask;

    for addr in [start, end] {
        if u32::from(addr) & mask != net {
            return Err(ApError::InvalidParameter(format!(
                "DHCP address {} is outside {}/{}",
                addr, gateway, prefix_len
            )));
        }
    }

    if u32::from(start) > u32::from(end) {
        return Err(ApError::InvalidParameter(format!(
            "DHCP range start {} is after end {}",
            start, end
        )));
    }

    if (u32::from(start)..=u32::from(end)).contains(&u32::from(gateway)) {
        return Err(ApError::InvalidParameter(format!(
            "DHCP range {}-{} contains the gateway {}",
            start, end, gateway
        )));
    }

    Ok(())
}

/// Check a whole configuration record. Empty interface names are allowed
/// here because they are resolved later.
pub fn validate_config(config: &ApConfig) -> ApResult<()> {
    for name in [&config.wan_interface, &config.wireless_interface]
        .into_iter()
        .filter(|n| !n.is_empty())
    {
        validate_interface_name(name)?;
    }
    if let Some(lan) = &config.lan_interface {
        validate_interface_name(lan)?;
    }
    validate_interface_name(&config.bridge_name)?;
    validate_ssid(&config.ssid)?;
    validate_passphrase(&config.passphrase)?;
    validate_country_code(&config.country_code)?;
    validate_channel(config.channel)?;
    validate_dhcp_range(
        config.gateway,
        config.prefix_len,
        config.dhcp_range.0,
        config.dhcp_range.1,
    )?;
    Ok(())
}
