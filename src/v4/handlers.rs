use advmac::MacAddr6;
use dhcproto::v4;
use std::net::Ipv4Addr;
use tracing::{debug, error, field, info, instrument, warn, Span};

use crate::config::Config;
use crate::error::ClassifyError;
use crate::interface::Interface;
use crate::leasedb::LeasePool;
use crate::notify::DeclineNotifier;
use crate::v4::{
    classify::{classify, Architecture, Firmware},
    extensions::BootMessageExtV4,
    response::{build_ack, build_offer},
};

/// A DHCPv4 reply produced by the server.
pub struct ResponseMessage {
    pub message: v4::Message,
    /// Address taken from the pool for this reply. Released again by the
    /// caller if the reply never reaches the wire.
    pub allocated: Option<Ipv4Addr>,
    pub firmware: Option<(Architecture, Firmware)>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NoResponse {
    Discarded,
    NoMessageType,
    NoValidMac,
    MalformedPacket,
    UnsupportedFirmware,
    UnresolvedSourceAddress,
    PoolExhausted,
    /// Decline processed, the protocol has no reply for it
    Declined,
}

impl NoResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoResponse::Discarded => "Discarded",
            NoResponse::NoMessageType => "NoMessageType",
            NoResponse::NoValidMac => "NoValidMac",
            NoResponse::MalformedPacket => "MalformedPacket",
            NoResponse::UnsupportedFirmware => "UnsupportedFirmware",
            NoResponse::UnresolvedSourceAddress => "UnresolvedSourceAddress",
            NoResponse::PoolExhausted => "PoolExhausted",
            NoResponse::Declined => "Declined",
        }
    }
}

/// Result of processing one incoming DHCPv4 message.
pub enum Outcome {
    Reply(ResponseMessage),
    Ignored(NoResponse),
    /// The client chose another server. Expected with several servers on a
    /// segment, not an error.
    NotForThisServer,
}

/// Entry point for every decoded packet. Only the lease pool carries state
/// from one packet to the next.
pub fn handle_message(
    pool: &LeasePool,
    config: &Config,
    notifier: &dyn DeclineNotifier,
    msg: &v4::Message,
    iface: &Interface,
) -> Outcome {
    // servers should only respond to BootRequest messages
    let message_type = match msg.opcode() {
        v4::Opcode::BootRequest => match msg.message_type() {
            Some(mt) => mt,
            None => return Outcome::Ignored(NoResponse::NoMessageType),
        },
        v4::Opcode::BootReply | v4::Opcode::Unknown(_) => {
            return Outcome::Ignored(NoResponse::Discarded)
        }
    };

    match message_type {
        v4::MessageType::Discover => handle_discover(pool, config, msg, iface),
        v4::MessageType::Request => handle_request(msg, iface),
        v4::MessageType::Decline => handle_decline(pool, notifier, msg, iface),
        // no expiry or renewal, Release and Inform have nothing to act on
        _ => Outcome::Ignored(NoResponse::Discarded),
    }
}

fn server_address(iface: &Interface) -> Option<Ipv4Addr> {
    match iface.source_address() {
        Ok(addr) => Some(addr),
        Err(e) => {
            error!(iface = %iface.name, "{e}");
            None
        }
    }
}

/// PXE client looking for a boot server. Classify, lease an address and
/// point it at the boot program.
#[instrument(skip(pool, config, msg, iface),
fields(mac = field::Empty, xid = %msg.xid(), iface = %iface.name))]
fn handle_discover(
    pool: &LeasePool,
    config: &Config,
    msg: &v4::Message,
    iface: &Interface,
) -> Outcome {
    let mac_addr = match MacAddr6::try_from(msg.chaddr()).ok() {
        Some(ma) => ma,
        None => return Outcome::Ignored(NoResponse::NoValidMac),
    };
    Span::current().record("mac", field::display(mac_addr));
    info!("DHCPDiscover");

    let (arch, firmware) = match classify(msg) {
        Ok(class) => class,
        Err(e @ ClassifyError::MissingArchitecture) => {
            info!("{e}");
            return Outcome::Ignored(NoResponse::MalformedPacket);
        }
        Err(e @ ClassifyError::UnsupportedFirmware(_)) => {
            warn!("{e}");
            return Outcome::Ignored(NoResponse::UnsupportedFirmware);
        }
    };
    debug!(%arch, %firmware, "classified client");

    // resolve before allocating so a failure here never strands a lease
    let Some(server) = server_address(iface) else {
        return Outcome::Ignored(NoResponse::UnresolvedSourceAddress);
    };

    let client = match pool.allocate() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("{e}");
            return Outcome::Ignored(NoResponse::PoolExhausted);
        }
    };
    info!(%client, %server, "offering address");

    Outcome::Reply(ResponseMessage {
        message: build_offer(msg, server, client, &config.boot),
        allocated: Some(client),
        firmware: Some((arch, firmware)),
    })
}

/// DHCPREQUEST selecting an offered address.
///
/// The requested address is acknowledged as-is, nothing checks that it was
/// offered to this client.
#[instrument(skip(msg, iface), fields(mac = field::Empty, xid = %msg.xid(), iface = %iface.name))]
fn handle_request(msg: &v4::Message, iface: &Interface) -> Outcome {
    if let Ok(mac_addr) = MacAddr6::try_from(msg.chaddr()) {
        Span::current().record("mac", field::display(mac_addr));
    }
    info!("DHCPRequest");

    let Some(server) = server_address(iface) else {
        return Outcome::Ignored(NoResponse::UnresolvedSourceAddress);
    };

    if let Some(server_id) = msg.server_id() {
        if server_id != &server {
            debug!(%server_id, "client selected another server");
            return Outcome::NotForThisServer;
        }
    }

    let requested = match (msg.requested_ip_addr(), msg.ciaddr()) {
        (Some(requested), _) => *requested,
        (None, ciaddr) if !ciaddr.is_unspecified() => ciaddr,
        _ => {
            info!("DHCPRequest without requested address");
            return Outcome::Ignored(NoResponse::MalformedPacket);
        }
    };
    info!(%requested, %server, "acknowledging address");

    Outcome::Reply(ResponseMessage {
        message: build_ack(msg, server, requested),
        allocated: None,
        firmware: None,
    })
}

/// DHCPDECLINE: the client found the address in use. Tell the registry and
/// return the address to the pool. Never answered.
#[instrument(skip(pool, notifier, msg, iface),
fields(mac = field::Empty, xid = %msg.xid(), iface = %iface.name))]
fn handle_decline(
    pool: &LeasePool,
    notifier: &dyn DeclineNotifier,
    msg: &v4::Message,
    iface: &Interface,
) -> Outcome {
    info!("DHCPDecline");

    let Some(server) = server_address(iface) else {
        return Outcome::Ignored(NoResponse::UnresolvedSourceAddress);
    };

    let Some(server_id) = msg.server_id() else {
        info!("DHCPDecline without server identifier");
        return Outcome::Ignored(NoResponse::MalformedPacket);
    };
    if server_id != &server {
        debug!(%server_id, "decline addressed to another server");
        return Outcome::NotForThisServer;
    }

    let Some(declined) = msg.requested_ip_addr().copied() else {
        info!("DHCPDecline without requested address");
        return Outcome::Ignored(NoResponse::MalformedPacket);
    };
    let mac_addr = match MacAddr6::try_from(msg.chaddr()) {
        Ok(ma) => ma,
        Err(_) => {
            info!("DHCPDecline with invalid hardware address");
            return Outcome::Ignored(NoResponse::MalformedPacket);
        }
    };
    Span::current().record("mac", field::display(mac_addr));

    if let Err(e) = notifier.notify_decline(declined, mac_addr) {
        warn!(%declined, "{e}");
    }
    if pool.release(declined) {
        info!(%declined, "declined address returned to pool");
    } else {
        debug!(%declined, "declined address was not leased");
    }

    Outcome::Ignored(NoResponse::Declined)
}
