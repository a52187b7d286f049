//! Discoverer configuration.
//!
//! Settings come from code, from `KEY=VALUE` text, or from the process
//! environment, using the same keys:
//!
//! ```text
//! KNX_LOCAL_PORT=0
//! KNX_NAT=false
//! KNX_MULTICAST_RESPONSES=false
//! KNX_INTERFACE=eth0            # name or IPv4 address
//! KNX_SEARCH_TARGET=224.0.23.12:3671
//! KNX_DESCRIPTION_TIMEOUT=3     # seconds
//! KNX_RECEIVE_TICK_MS=100
//! ```

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use crate::error::{KnxError, Result};
use crate::net::NetworkInterface;
use crate::protocol::DISCOVERY_ENDPOINT;

const KEY_LOCAL_PORT: &str = "KNX_LOCAL_PORT";
const KEY_NAT: &str = "KNX_NAT";
const KEY_MULTICAST_RESPONSES: &str = "KNX_MULTICAST_RESPONSES";
const KEY_INTERFACE: &str = "KNX_INTERFACE";
const KEY_SEARCH_TARGET: &str = "KNX_SEARCH_TARGET";
const KEY_DESCRIPTION_TIMEOUT: &str = "KNX_DESCRIPTION_TIMEOUT";
const KEY_RECEIVE_TICK_MS: &str = "KNX_RECEIVE_TICK_MS";

const KEYS: [&str; 7] = [
    KEY_LOCAL_PORT,
    KEY_NAT,
    KEY_MULTICAST_RESPONSES,
    KEY_INTERFACE,
    KEY_SEARCH_TARGET,
    KEY_DESCRIPTION_TIMEOUT,
    KEY_RECEIVE_TICK_MS,
];

/// Settings shared by every session of a [`Discoverer`](crate::Discoverer)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscovererConfig {
    /// Local port for sessions started without an explicit one (0 = ephemeral)
    pub local_port: u16,
    /// Advertise the NAT sentinel so servers reply to the observed sender
    pub nat: bool,
    /// Have servers answer searches via the discovery multicast group
    pub multicast_responses: bool,
    /// Interface to bind and send multicast on (`None` = any)
    pub interface: Option<NetworkInterface>,
    /// Where search requests go; the discovery multicast endpoint or a unicast server
    pub search_target: SocketAddrV4,
    /// Description timeout used when a call passes 0
    pub description_timeout: Duration,
    /// Upper bound on one blocking receive; stop requests are observed at this granularity
    pub receive_tick: Duration,
}

impl Default for DiscovererConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            nat: false,
            multicast_responses: false,
            interface: None,
            search_target: DISCOVERY_ENDPOINT,
            description_timeout: Duration::from_secs(3),
            receive_tick: Duration::from_millis(100),
        }
    }
}

impl DiscovererConfig {
    /// Parse `KEY=VALUE` lines on top of the defaults
    ///
    /// Blank lines, `#` comments and unknown keys are skipped.
    ///
    /// # Errors
    ///
    /// Returns an argument error for a malformed value or an unknown interface
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(KnxError::invalid_config_value());
            };
            config.apply(key.trim(), value.trim())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Read the `KNX_*` variables from the process environment on top of the defaults
    ///
    /// # Errors
    ///
    /// Returns an argument error for a malformed value or an unknown interface
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        for key in KEYS {
            if let Ok(value) = std::env::var(key) {
                config.apply(key, value.trim())?;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be rejected by their type alone
    ///
    /// # Errors
    ///
    /// Returns an argument error if the receive tick is zero or the search
    /// target has port 0
    pub fn validate(&self) -> Result<()> {
        if self.receive_tick.is_zero() || self.search_target.port() == 0 {
            return Err(KnxError::invalid_config_value());
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            KEY_LOCAL_PORT => self.local_port = parse_value(value)?,
            KEY_NAT => self.nat = parse_bool(value)?,
            KEY_MULTICAST_RESPONSES => self.multicast_responses = parse_bool(value)?,
            KEY_INTERFACE => self.interface = parse_interface(value)?,
            KEY_SEARCH_TARGET => self.search_target = parse_value(value)?,
            KEY_DESCRIPTION_TIMEOUT => {
                self.description_timeout = Duration::from_secs(parse_value(value)?);
            }
            KEY_RECEIVE_TICK_MS => self.receive_tick = Duration::from_millis(parse_value(value)?),
            other => knx_log!(trace, "[Config] ignoring unknown key {}", other),
        }
        Ok(())
    }
}

fn parse_value<T: core::str::FromStr>(value: &str) -> Result<T> {
    value.parse().map_err(|_| KnxError::invalid_config_value())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(KnxError::invalid_config_value()),
    }
}

fn parse_interface(value: &str) -> Result<Option<NetworkInterface>> {
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(ip) = value.parse::<Ipv4Addr>() {
        return Ok(Some(
            NetworkInterface::by_address(ip).unwrap_or_else(|_| NetworkInterface::new(value, ip)),
        ));
    }
    NetworkInterface::by_name(value).map(Some)
}
