use dhcproto::v4::{self, DhcpOption};
use std::net::Ipv4Addr;

use crate::config::BootSettings;
use crate::v4::extensions::BootMessageExtV4;

/// Fields shared by every reply: identity of the request echoed back,
/// broadcast forced on, server and client addresses filled in.
fn reply_to(
    msg: &v4::Message,
    message_type: v4::MessageType,
    server: Ipv4Addr,
    client: Ipv4Addr,
) -> v4::Message {
    let mut reply = v4::Message::new_with_id(
        msg.xid(),
        Ipv4Addr::UNSPECIFIED,
        client,
        server,
        msg.giaddr(),
        msg.chaddr(),
    );
    reply.set_opcode(v4::Opcode::BootReply);
    reply.set_secs(0);
    reply.set_flags(msg.flags().set_broadcast());

    let opts = reply.opts_mut();
    opts.insert(DhcpOption::MessageType(message_type));
    opts.insert(DhcpOption::ServerIdentifier(server));
    reply
}

/// DHCPOFFER carrying the boot program location.
///
/// The boot filename is the same for every firmware class. Option 97 is
/// echoed verbatim because some firmware rejects offers without it.
pub fn build_offer(
    msg: &v4::Message,
    server: Ipv4Addr,
    client: Ipv4Addr,
    boot: &BootSettings,
) -> v4::Message {
    let mut reply = reply_to(msg, v4::MessageType::Offer, server, client);
    reply.set_sname(server.to_string().as_bytes());
    reply.set_fname_str(&boot.boot_filename);

    let opts = reply.opts_mut();
    opts.insert(DhcpOption::ClassIdentifier(
        boot.vendor_identifier.as_bytes().to_vec(),
    ));
    if let Some(id) = msg.client_machine_id() {
        opts.insert(DhcpOption::ClientMachineIdentifier(id.to_vec()));
    }
    opts.insert(DhcpOption::End);

    reply
}

/// DHCPACK for the address the client asked for
pub fn build_ack(msg: &v4::Message, server: Ipv4Addr, client: Ipv4Addr) -> v4::Message {
    let mut reply = reply_to(msg, v4::MessageType::Ack, server, client);
    reply.opts_mut().insert(DhcpOption::End);
    reply
}
