use dhcproto::v4::{self, Architecture, DhcpOption, Opcode};
use dhcproto::{Decodable, Encodable};

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

const USAGE: &str = "\
client - send a PXE DHCPDISCOVER and print the reply

USAGE:
  client [--server <addr:port>] [--bind <addr:port>] [--arch <code>] [--ipxe]
";

fn main() {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return;
    }
    let server: SocketAddr = args
        .opt_value_from_str("--server")
        .expect("parsing --server")
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::BROADCAST, 10067)));
    let bind: SocketAddr = args
        .opt_value_from_str("--bind")
        .expect("parsing --bind")
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 68)));
    let arch: u16 = args
        .opt_value_from_str("--arch")
        .expect("parsing --arch")
        .unwrap_or(7);
    let ipxe = args.contains("--ipxe");

    let msg = pxe_discover(arch, ipxe).to_vec().expect("encoding test msg");

    let socket = UdpSocket::bind(bind).expect("couldn't bind to address");
    socket.set_broadcast(true).expect("enabling broadcast");
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("setting read timeout");
    socket.send_to(&msg, server).expect("couldn't send data");

    let mut recv_buf = vec![0u8; 1500];
    let (recv_bytes, from) = socket.recv_from(&mut recv_buf).expect("socket recv");
    println!("received {recv_bytes} bytes from {from}");

    let msg = v4::Message::from_bytes(&recv_buf[..recv_bytes]).expect("parsing response");
    println!("msg: {msg}");
}

fn pxe_discover(arch: u16, ipxe: bool) -> v4::Message {
    let mac = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
    // random xid
    let mut msg = v4::Message::new(
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        &mac,
    );
    msg.set_opcode(Opcode::BootRequest);
    msg.set_flags(v4::Flags::default().set_broadcast());

    let opts = msg.opts_mut();
    opts.insert(DhcpOption::MessageType(v4::MessageType::Discover));
    opts.insert(DhcpOption::ClientSystemArchitecture(Architecture::from(arch)));
    opts.insert(DhcpOption::ClassIdentifier(
        format!("PXEClient:Arch:{arch:05}").into_bytes(),
    ));
    // type 0 followed by a 16 byte GUID
    opts.insert(DhcpOption::ClientMachineIdentifier((0u8..17).collect()));
    if ipxe {
        opts.insert(DhcpOption::UserClass(b"iPXE".to_vec()));
    }
    msg
}
