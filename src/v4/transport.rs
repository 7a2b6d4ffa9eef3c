use std::io::{self, IoSlice, IoSliceMut};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc;
use nix::sys::socket::{
    recvmsg, sendmsg, setsockopt, sockopt, ControlMessage, ControlMessageOwned, MsgFlags,
    SockaddrIn,
};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::TransportError;

/// A datagram read from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub src: SocketAddrV4,
    /// Kernel index of the interface the datagram arrived on
    pub ifindex: u32,
}

/// Datagram socket that reports and selects the interface per packet
pub trait PacketConn {
    /// An [`io::ErrorKind::InvalidData`] error rejects only the datagram just
    /// read, any other error means the transport itself failed.
    fn recv(&self, buf: &mut [u8]) -> io::Result<Received>;

    /// Send `buf` to `dst` out of interface `ifindex`, from source address `src`
    fn send(&self, buf: &[u8], dst: SocketAddrV4, ifindex: u32, src: Ipv4Addr)
        -> io::Result<usize>;
}

/// UDP socket using `IP_PKTINFO` in both directions.
///
/// Bound to a wildcard address it still answers on the interface a request
/// came in on, which a plain `UdpSocket` cannot do.
pub struct PktInfoSocket {
    socket: Socket,
    closed: AtomicBool,
}

impl PktInfoSocket {
    pub fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let bind_failed = |source| TransportError::BindFailed { addr, source };

        let SocketAddr::V4(_) = addr else {
            return Err(bind_failed(io::Error::new(
                io::ErrorKind::InvalidInput,
                "only IPv4 is supported",
            )));
        };

        let socket =
            Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_failed)?;
        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket.set_broadcast(true).map_err(bind_failed)?;
        setsockopt(&socket, sockopt::Ipv4PacketInfo, &true)
            .map_err(|e| bind_failed(io::Error::from(e)))?;
        socket.bind(&addr.into()).map_err(bind_failed)?;

        debug!(%addr, "bound DHCP socket");
        Ok(Self {
            socket,
            closed: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::other("not an inet socket"))
    }

    /// Wake a blocked `recv` and make every later one fail
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // ENOTCONN on an unconnected UDP socket, the reader is woken anyway
        let _ = self.socket.shutdown(Shutdown::Both);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport closed",
            ));
        }
        Ok(())
    }
}

impl PacketConn for PktInfoSocket {
    fn recv(&self, buf: &mut [u8]) -> io::Result<Received> {
        self.check_open()?;

        let mut iov = [IoSliceMut::new(buf)];
        let mut cmsg = nix::cmsg_space!(libc::in_pktinfo);
        let msg = recvmsg::<SockaddrIn>(
            self.socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::empty(),
        )
        .map_err(io::Error::from)?;

        self.check_open()?;

        let src = msg
            .address
            .map(|a| SocketAddrV4::new(a.ip(), a.port()))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing source address"))?;

        let mut ifindex = None;
        // truncated control data only spoils this datagram
        let cmsgs = msg
            .cmsgs()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        for cmsg in cmsgs {
            if let ControlMessageOwned::Ipv4PacketInfo(info) = cmsg {
                ifindex = Some(info.ipi_ifindex as u32);
            }
        }
        let ifindex = ifindex.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "missing IP_PKTINFO control message")
        })?;

        Ok(Received {
            len: msg.bytes,
            src,
            ifindex,
        })
    }

    fn send(
        &self,
        buf: &[u8],
        dst: SocketAddrV4,
        ifindex: u32,
        src: Ipv4Addr,
    ) -> io::Result<usize> {
        let pktinfo = libc::in_pktinfo {
            ipi_ifindex: ifindex as _,
            ipi_spec_dst: libc::in_addr {
                s_addr: u32::from(src).to_be(),
            },
            ipi_addr: libc::in_addr { s_addr: 0 },
        };
        let iov = [IoSlice::new(buf)];
        let cmsgs = [ControlMessage::Ipv4PacketInfo(&pktinfo)];

        sendmsg(
            self.socket.as_raw_fd(),
            &iov,
            &cmsgs,
            MsgFlags::empty(),
            Some(&SockaddrIn::from(dst)),
        )
        .map_err(io::Error::from)
    }
}
