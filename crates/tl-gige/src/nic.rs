//! Network helper utilities: interface resolution and GVSP sizing.

use std::io;
use std::net::Ipv4Addr;

use if_addrs::{get_if_addrs, IfAddr, Ifv4Addr, Interface};
use tracing::{debug, warn};

/// A resolved IPv4 network interface: name plus address/netmask/broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Iface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub broadcast: Option<Ipv4Addr>,
}

impl Iface {
    /// Subnet-directed broadcast address, falling back to the limited
    /// broadcast address when the OS did not report one.
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast.unwrap_or(Ipv4Addr::BROADCAST)
    }
}

fn to_iface(interface: &Interface, v4: &Ifv4Addr) -> Iface {
    Iface {
        name: interface.name.clone(),
        ip: v4.ip,
        netmask: v4.netmask,
        broadcast: v4.broadcast,
    }
}

fn synthetic_loopback() -> Iface {
    Iface {
        name: "lo".to_string(),
        ip: Ipv4Addr::LOCALHOST,
        netmask: Ipv4Addr::new(255, 0, 0, 0),
        broadcast: None,
    }
}

/// Resolve a network interface the way the proxy and sink CLIs accept one:
/// try the selector as an address owned by an interface first, then as an
/// OS interface name. A `None` selector, or a selector matching nothing,
/// falls back to the loopback interface so the simulator stays usable on a
/// host with no configured NICs.
pub fn resolve(selector: Option<&str>) -> io::Result<Iface> {
    let interfaces = get_if_addrs()?;

    if let Some(selector) = selector {
        if let Ok(target) = selector.parse::<Ipv4Addr>() {
            if let Some(found) = find_by_address(&interfaces, target) {
                debug!(selector, iface = %found.name, "resolved interface by address");
                return Ok(found);
            }
        }
        if let Some(found) = find_by_name(&interfaces, selector) {
            debug!(selector, iface = %found.name, "resolved interface by name");
            return Ok(found);
        }
        warn!(selector, "interface not found, falling back to loopback");
    }

    Ok(find_by_address(&interfaces, Ipv4Addr::LOCALHOST).unwrap_or_else(synthetic_loopback))
}

fn find_by_address(interfaces: &[Interface], target: Ipv4Addr) -> Option<Iface> {
    interfaces.iter().find_map(|i| match &i.addr {
        IfAddr::V4(v4) if v4.ip == target => Some(to_iface(i, v4)),
        _ => None,
    })
}

fn find_by_name(interfaces: &[Interface], name: &str) -> Option<Iface> {
    interfaces.iter().find_map(|i| match &i.addr {
        IfAddr::V4(v4) if i.name == name => Some(to_iface(i, v4)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_without_selector_falls_back_to_loopback() {
        let iface = resolve(None).expect("resolve");
        assert!(iface.ip.is_loopback() || iface.name == "lo");
    }

    #[test]
    fn resolve_unknown_selector_falls_back_to_loopback() {
        let iface = resolve(Some("definitely-not-a-real-iface-9000")).expect("resolve");
        assert!(iface.ip.is_loopback() || iface.name == "lo");
    }

}
