use arc_swap::ArcSwap;
use dhcproto::{v4, Decodable, Encodable};
use std::{
    io,
    net::{Ipv4Addr, SocketAddrV4},
};
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::error::{InterfaceError, TransportError};
use crate::interface::Interface;
use crate::leasedb::LeasePool;
use crate::notify::DeclineNotifier;
use crate::v4::{
    handlers::{handle_message, NoResponse, Outcome, ResponseMessage},
    transport::{PacketConn, Received},
    SERVER_PORT,
};

/// Receive, answer, repeat. Returns only when the transport fails, which is
/// also how a closed transport ends the loop.
pub fn v4_worker<C, F>(
    conn: &C,
    pool: &LeasePool,
    config: &ArcSwap<Config>,
    notifier: &dyn DeclineNotifier,
    lookup_interface: F,
) -> Result<(), TransportError>
where
    C: PacketConn + ?Sized,
    F: Fn(u32) -> Result<Interface, InterfaceError>,
{
    let mut read_buf = [0u8; 2048];

    loop {
        let received = match conn.recv(&mut read_buf) {
            Ok(received) => {
                debug!(
                    "Received {} bytes from {} on ifindex {}",
                    received.len, received.src, received.ifindex
                );
                trace!("Data: {:x?}", &read_buf[..received.len]);
                received
            }
            Err(err) => match err.kind() {
                io::ErrorKind::ConnectionReset => {
                    info!("Sent response to host that responded with ICMP unreachable");
                    continue;
                }
                io::ErrorKind::Interrupted => {
                    debug!("recv interrupted, retrying");
                    continue;
                }
                io::ErrorKind::InvalidData => {
                    warn!("Dropping unusable datagram: {err}");
                    continue;
                }
                _ => {
                    error!("Receive failed, stopping worker: {err}");
                    return Err(TransportError::Recv(err));
                }
            },
        };

        let msg = match v4::Message::from_bytes(&read_buf[..received.len]) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(src = %received.src, "Unable to parse dhcpv4 message: {e}");
                continue;
            }
        };

        let iface = match lookup_interface(received.ifindex) {
            Ok(iface) => iface,
            Err(e) => {
                error!(xid = msg.xid(), "{e}");
                debug!(
                    "Not responding {}",
                    NoResponse::UnresolvedSourceAddress.as_str()
                );
                continue;
            }
        };

        match handle_message(pool, &config.load(), notifier, &msg, &iface) {
            Outcome::Ignored(reason) => debug!("Not responding {}", reason.as_str()),
            Outcome::NotForThisServer => debug!("Not responding, client chose another server"),
            Outcome::Reply(resp) => {
                let client_port = config.load().client_port;
                send_reply(conn, pool, resp, &received, client_port);
            }
        }
    }
}

/// Relayed requests go back to the relay, everything else is broadcast on
/// the segment the request came from.
pub fn reply_destination(msg: &v4::Message, client_port: u16) -> SocketAddrV4 {
    let giaddr = msg.giaddr();
    if giaddr.is_unspecified() {
        SocketAddrV4::new(Ipv4Addr::BROADCAST, client_port)
    } else {
        SocketAddrV4::new(giaddr, SERVER_PORT)
    }
}

fn send_reply<C: PacketConn + ?Sized>(
    conn: &C,
    pool: &LeasePool,
    resp: ResponseMessage,
    received: &Received,
    client_port: u16,
) {
    let dst = reply_destination(&resp.message, client_port);
    let src = resp.message.siaddr();

    let sent = resp
        .message
        .to_vec()
        .map_err(|e| error!("Failed to encode DHCPv4 response: {e}"))
        .and_then(|buf| {
            conn.send(&buf, dst, received.ifindex, src)
                .map_err(|e| error!(%dst, "Problem sending response message: {e}"))
        });

    match sent {
        Ok(n) => match resp.firmware {
            Some((arch, firmware)) => {
                info!(%dst, %arch, %firmware, "responded with {n} bytes")
            }
            None => debug!("responded to {dst} with {n} bytes"),
        },
        Err(()) => {
            // the client never saw the offer, don't keep its address
            if let Some(addr) = resp.allocated {
                pool.release(addr);
            }
        }
    }
}
