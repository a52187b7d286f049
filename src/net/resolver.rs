//! Local endpoint resolution.
//!
//! Turns the caller's intent (interface, port, NAT awareness, multicast
//! responses) into a bound transport plus the HPAI advertised to servers.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};

use crate::error::Result;
use crate::net::transport::{BindOptions, Connector, Transport};
use crate::protocol::{Hpai, DISCOVERY_ENDPOINT, KNXNETIP_DEFAULT_PORT, KNXNETIP_MULTICAST_ADDR};

/// What the caller asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LocalIntent {
    pub interface: Option<Ipv4Addr>,
    pub port: u16,
    pub nat: bool,
    pub multicast_responses: bool,
}

/// Which exchange the endpoint is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Purpose {
    Search,
    Description,
}

/// A bound transport and the reply endpoint to put into the request
pub(crate) struct Resolved {
    pub transport: Box<dyn Transport>,
    pub local: SocketAddrV4,
    pub hpai: Hpai,
}

/// Bind a transport for `purpose` and choose the advertised HPAI
///
/// Multicast responses apply to searches only and take precedence over NAT.
pub(crate) fn resolve(
    connector: &dyn Connector,
    intent: &LocalIntent,
    purpose: Purpose,
) -> Result<Resolved> {
    if intent.multicast_responses && purpose == Purpose::Search {
        let options = BindOptions::unicast(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            KNXNETIP_DEFAULT_PORT,
        ))
        .with_interface(intent.interface)
        .with_group(KNXNETIP_MULTICAST_ADDR);

        let transport = connector.open(&options)?;
        let local = transport.local_addr()?;
        knx_log!(
            debug,
            "[Resolver] {} listening for multicast responses on {}",
            local,
            DISCOVERY_ENDPOINT
        );
        return Ok(Resolved {
            transport,
            local,
            hpai: Hpai::from(DISCOVERY_ENDPOINT),
        });
    }

    let ip = intent.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    let options =
        BindOptions::unicast(SocketAddrV4::new(ip, intent.port)).with_interface(intent.interface);
    let transport = connector.open(&options)?;
    let local = transport.local_addr()?;

    let hpai = if intent.nat {
        Hpai::NAT
    } else if local.ip().is_unspecified() {
        Hpai::new(primary_ipv4(), local.port())
    } else {
        Hpai::from(local)
    };

    knx_log!(debug, "[Resolver] bound {} advertising {}", local, hpai);
    Ok(Resolved {
        transport,
        local,
        hpai,
    })
}

/// Address of the host's primary IPv4 interface
fn primary_ipv4() -> Ipv4Addr {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) => ip,
        Ok(IpAddr::V6(ip)) => {
            knx_log!(warn, "[Resolver] primary address {} is IPv6, advertising 0.0.0.0", ip);
            Ipv4Addr::UNSPECIFIED
        }
        Err(e) => {
            knx_log!(warn, "[Resolver] no primary IPv4 address ({}), advertising 0.0.0.0", e);
            Ipv4Addr::UNSPECIFIED
        }
    }
}
