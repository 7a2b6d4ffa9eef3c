use std::net::{IpAddr, Ipv4Addr};

use network_interface::{NetworkInterface, NetworkInterfaceConfig};

use crate::error::InterfaceError;

/// Snapshot of the network interface a packet arrived on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub index: u32,
    pub name: String,
    pub addrs: Vec<Ipv4Addr>,
}

impl Interface {
    /// Every interface on the host with its IPv4 addresses
    pub fn all_ipv4() -> Result<Vec<Self>, InterfaceError> {
        let mut out: Vec<Self> = Vec::new();

        // some platforms report one entry per address
        for iface in NetworkInterface::show()? {
            let v4 = iface.addr.iter().filter_map(|a| match a.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            });
            match out.iter_mut().find(|i| i.index == iface.index) {
                Some(existing) => existing.addrs.extend(v4),
                None => {
                    let addrs = v4.collect();
                    out.push(Self {
                        index: iface.index,
                        name: iface.name,
                        addrs,
                    });
                }
            }
        }

        Ok(out)
    }

    /// Look up an interface and its IPv4 addresses by kernel index
    pub fn by_index(index: u32) -> Result<Self, InterfaceError> {
        Self::all_ipv4()?
            .into_iter()
            .find(|i| i.index == index)
            .ok_or(InterfaceError::UnknownIndex(index))
    }

    /// Pick the address this server answers from on this interface.
    ///
    /// Preference order: global unicast (including private ranges), then
    /// link-local unicast, then loopback.
    pub fn source_address(&self) -> Result<Ipv4Addr, InterfaceError> {
        let tiers: [fn(&Ipv4Addr) -> bool; 3] =
            [is_global_unicast, Ipv4Addr::is_link_local, Ipv4Addr::is_loopback];

        tiers
            .iter()
            .find_map(|tier| self.addrs.iter().copied().find(|a| tier(a)))
            .ok_or_else(|| InterfaceError::NoUsableAddress(self.name.clone()))
    }
}

fn is_global_unicast(addr: &Ipv4Addr) -> bool {
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_broadcast())
}
