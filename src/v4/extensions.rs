use dhcproto::v4::{self, DhcpOption};
use std::net::Ipv4Addr;

/// Helpers for interacting with dhcproto::v4::Message
pub trait BootMessageExtV4 {
    fn message_type(&self) -> Option<&v4::MessageType>;
    fn server_id(&self) -> Option<&Ipv4Addr>;
    fn requested_ip_addr(&self) -> Option<&Ipv4Addr>;
    /// Option 93, first architecture type only
    fn client_arch(&self) -> Option<u16>;
    /// Option 77
    fn user_class(&self) -> Option<&[u8]>;
    /// Option 97, opaque client GUID
    fn client_machine_id(&self) -> Option<&[u8]>;
}

impl BootMessageExtV4 for v4::Message {
    fn message_type(&self) -> Option<&v4::MessageType> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::MessageType(mt) => Some(mt),
            _ => None,
        })
    }

    fn server_id(&self) -> Option<&Ipv4Addr> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::ServerIdentifier(addr) => Some(addr),
            _ => None,
        })
    }

    fn requested_ip_addr(&self) -> Option<&Ipv4Addr> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::RequestedIpAddress(addr) => Some(addr),
            _ => None,
        })
    }

    fn client_arch(&self) -> Option<u16> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::ClientSystemArchitecture(arch) => Some(u16::from(*arch)),
            _ => None,
        })
    }

    fn user_class(&self) -> Option<&[u8]> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::UserClass(class) => Some(class.as_slice()),
            _ => None,
        })
    }

    fn client_machine_id(&self) -> Option<&[u8]> {
        self.opts().iter().find_map(|o| match o.1 {
            DhcpOption::ClientMachineIdentifier(id) => Some(id.as_slice()),
            _ => None,
        })
    }
}
