#![cfg(test)]

use advmac::MacAddr6;
use dhcproto::v4::{self, Architecture as WireArch, DhcpOption, Opcode};
use std::net::Ipv4Addr;
use std::sync::Mutex;

use crate::config::{Config, FileConfig, Overrides};
use crate::error::NotifyError;
use crate::interface::Interface;
use crate::leasedb::LeasePool;
use crate::notify::DeclineNotifier;
use crate::v4::{
    classify::Firmware,
    extensions::BootMessageExtV4,
    handlers::{handle_message, NoResponse, Outcome, ResponseMessage},
};

const TEST_MAC: MacAddr6 = MacAddr6::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
const TEST_MAC_2: MacAddr6 = MacAddr6::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
const TEST_MAC_3: MacAddr6 = MacAddr6::new([0x52, 0x54, 0x00, 0x00, 0x00, 0x03]);

const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const OTHER_SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(Ipv4Addr, MacAddr6)>>,
    fail: bool,
}

impl DeclineNotifier for RecordingNotifier {
    fn notify_decline(&self, declined: Ipv4Addr, mac: MacAddr6) -> Result<(), NotifyError> {
        self.calls.lock().unwrap().push((declined, mac));
        if self.fail {
            return Err(NotifyError::Disconnected);
        }
        Ok(())
    }
}

fn create_test_env() -> (Config, LeasePool, Interface) {
    let overrides = Overrides {
        pool_begin: Some(Ipv4Addr::new(10, 0, 0, 10)),
        pool_end: Some(Ipv4Addr::new(10, 0, 0, 11)),
        ..Default::default()
    };
    let config = Config::from_parts(FileConfig::default(), None, overrides).unwrap();
    let pool = LeasePool::new(config.pool_begin, config.pool_end).unwrap();
    let iface = Interface {
        index: 2,
        name: "eth0".into(),
        addrs: vec![Ipv4Addr::LOCALHOST, SERVER_IP],
    };
    (config, pool, iface)
}

fn create_discover(mac: MacAddr6, xid: u32, arch: u16) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        Ipv4Addr::UNSPECIFIED, // ciaddr
        Ipv4Addr::UNSPECIFIED, // yiaddr
        Ipv4Addr::UNSPECIFIED, // siaddr
        Ipv4Addr::UNSPECIFIED, // giaddr
        &mac.to_array(),
    );
    msg.set_opcode(Opcode::BootRequest);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(v4::MessageType::Discover));
    msg.opts_mut()
        .insert(DhcpOption::ClientSystemArchitecture(WireArch::from(arch)));
    msg
}

fn create_request(
    mac: MacAddr6,
    xid: u32,
    server_id: Option<Ipv4Addr>,
    requested_ip: Option<Ipv4Addr>,
) -> v4::Message {
    let mut msg = v4::Message::new_with_id(
        xid,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::UNSPECIFIED,
        Ipv4Addr::new(192, 168, 7, 1),
        &mac.to_array(),
    );
    msg.set_opcode(Opcode::BootRequest);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(v4::MessageType::Request));
    if let Some(id) = server_id {
        msg.opts_mut().insert(DhcpOption::ServerIdentifier(id));
    }
    if let Some(ip) = requested_ip {
        msg.opts_mut().insert(DhcpOption::RequestedIpAddress(ip));
    }
    msg
}

fn create_decline(
    mac: MacAddr6,
    xid: u32,
    server_id: Option<Ipv4Addr>,
    declined: Option<Ipv4Addr>,
) -> v4::Message {
    let mut msg = create_request(mac, xid, server_id, declined);
    msg.opts_mut()
        .insert(DhcpOption::MessageType(v4::MessageType::Decline));
    msg
}

fn expect_reply(outcome: Outcome) -> ResponseMessage {
    match outcome {
        Outcome::Reply(resp) => resp,
        Outcome::Ignored(reason) => panic!("expected reply, got {}", reason.as_str()),
        Outcome::NotForThisServer => panic!("expected reply, got NotForThisServer"),
    }
}

fn expect_ignored(outcome: Outcome) -> NoResponse {
    match outcome {
        Outcome::Ignored(reason) => reason,
        Outcome::Reply(_) => panic!("expected no reply, got a reply"),
        Outcome::NotForThisServer => panic!("expected no reply, got NotForThisServer"),
    }
}

// ===== Pre-dispatch =====

#[test]
fn test_boot_reply_discarded() {
    let (config, pool, iface) = create_test_env();
    let mut msg = create_discover(TEST_MAC, 1, 0);
    msg.set_opcode(Opcode::BootReply);

    let outcome = handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
    assert_eq!(expect_ignored(outcome), NoResponse::Discarded);
    assert_eq!(pool.leased_count(), 0);
}

#[test]
fn test_missing_message_type() {
    let (config, pool, iface) = create_test_env();
    let mut msg = create_discover(TEST_MAC, 1, 0);
    msg.opts_mut().remove(v4::OptionCode::MessageType);

    let outcome = handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
    assert_eq!(expect_ignored(outcome), NoResponse::NoMessageType);
}

#[test]
fn test_release_and_inform_ignored() {
    let (config, pool, iface) = create_test_env();
    for mt in [v4::MessageType::Release, v4::MessageType::Inform] {
        let mut msg = create_discover(TEST_MAC, 1, 0);
        msg.opts_mut().insert(DhcpOption::MessageType(mt));
        let outcome =
            handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
        assert_eq!(expect_ignored(outcome), NoResponse::Discarded);
    }
}

// ===== DISCOVER Tests =====

#[test]
fn test_discover_offer_echoes_request() {
    let (config, pool, iface) = create_test_env();
    let msg = create_discover(TEST_MAC, 0x1234_5678, 7);

    let resp = expect_reply(handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &msg,
        &iface,
    ));
    let offer = &resp.message;

    assert_eq!(offer.message_type(), Some(&v4::MessageType::Offer));
    assert_eq!(offer.xid(), 0x1234_5678);
    assert_eq!(offer.chaddr(), msg.chaddr());
    assert_eq!(offer.yiaddr(), Ipv4Addr::new(10, 0, 0, 10));
    assert_eq!(offer.siaddr(), SERVER_IP);
    assert_eq!(offer.server_id(), Some(&SERVER_IP));
    assert_eq!(
        offer.opts().get(v4::OptionCode::ClassIdentifier),
        Some(&DhcpOption::ClassIdentifier(b"HTTPClient".to_vec()))
    );
    assert_eq!(offer.sname(), Some(&b"10.0.0.1"[..]));
    assert_eq!(offer.fname(), Some(&b"/usr/lib/ipxe/ipxe.efi"[..]));
    assert!(offer.flags().broadcast());
    assert_eq!(resp.allocated, Some(Ipv4Addr::new(10, 0, 0, 10)));
}

#[test]
fn test_discover_pool_exhaustion() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier::default();

    let first = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC, 1, 0),
        &iface,
    ));
    let second = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC_2, 2, 0),
        &iface,
    ));
    let third = handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC_3, 3, 0),
        &iface,
    );

    assert_eq!(first.message.yiaddr(), Ipv4Addr::new(10, 0, 0, 10));
    assert_eq!(second.message.yiaddr(), Ipv4Addr::new(10, 0, 0, 11));
    assert_eq!(expect_ignored(third), NoResponse::PoolExhausted);
}

#[test]
fn test_discover_same_mac_gets_new_address() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier::default();

    let first = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC, 1, 0),
        &iface,
    ));
    let again = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC, 2, 0),
        &iface,
    ));
    assert_ne!(first.message.yiaddr(), again.message.yiaddr());
}

#[test]
fn test_discover_firmware_classes() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier::default();

    let mut msg = create_discover(TEST_MAC, 1, 0);
    msg.opts_mut().insert(DhcpOption::UserClass(b"iPXE".to_vec()));
    let resp = expect_reply(handle_message(&pool, &config, &notifier, &msg, &iface));
    assert_eq!(resp.firmware.map(|(_, fw)| fw), Some(Firmware::BiosIpxe));

    let resp = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC_2, 2, 9),
        &iface,
    ));
    assert_eq!(resp.firmware.map(|(_, fw)| fw), Some(Firmware::EfiBc));
    // uniform boot filename
    assert_eq!(resp.message.fname(), Some(&b"/usr/lib/ipxe/ipxe.efi"[..]));
}

#[test]
fn test_discover_unsupported_firmware() {
    let (config, pool, iface) = create_test_env();
    let outcome = handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &create_discover(TEST_MAC, 1, 99),
        &iface,
    );
    assert_eq!(expect_ignored(outcome), NoResponse::UnsupportedFirmware);
    assert_eq!(pool.leased_count(), 0);
}

#[test]
fn test_discover_without_architecture() {
    let (config, pool, iface) = create_test_env();
    let mut msg = create_discover(TEST_MAC, 1, 0);
    msg.opts_mut()
        .remove(v4::OptionCode::ClientSystemArchitecture);

    let outcome = handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
    assert_eq!(expect_ignored(outcome), NoResponse::MalformedPacket);
    assert_eq!(pool.leased_count(), 0);
}

#[test]
fn test_discover_unresolved_source_leaks_nothing() {
    let (config, pool, mut iface) = create_test_env();
    iface.addrs = vec![Ipv4Addr::UNSPECIFIED];

    let outcome = handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &create_discover(TEST_MAC, 1, 7),
        &iface,
    );
    assert_eq!(expect_ignored(outcome), NoResponse::UnresolvedSourceAddress);
    assert_eq!(pool.leased_count(), 0);
}

#[test]
fn test_discover_echoes_machine_identifier() {
    let (config, pool, iface) = create_test_env();
    let guid = vec![0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
    let mut msg = create_discover(TEST_MAC, 1, 7);
    msg.opts_mut()
        .insert(DhcpOption::ClientMachineIdentifier(guid.clone()));

    let resp = expect_reply(handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &msg,
        &iface,
    ));
    assert_eq!(resp.message.client_machine_id(), Some(guid.as_slice()));
}

#[test]
fn test_discover_invalid_mac() {
    let (config, pool, iface) = create_test_env();
    let mut msg = create_discover(TEST_MAC, 1, 0);
    msg.set_chaddr(&[0x01, 0x02, 0x03]);

    let outcome = handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
    assert_eq!(expect_ignored(outcome), NoResponse::NoValidMac);
}

// ===== REQUEST Tests =====

#[test]
fn test_request_ack() {
    let (config, pool, iface) = create_test_env();
    let requested = Ipv4Addr::new(10, 0, 0, 10);
    let msg = create_request(TEST_MAC, 0xfeed, Some(SERVER_IP), Some(requested));

    let resp = expect_reply(handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &msg,
        &iface,
    ));
    let ack = &resp.message;

    assert_eq!(ack.message_type(), Some(&v4::MessageType::Ack));
    assert_eq!(ack.xid(), 0xfeed);
    assert_eq!(ack.chaddr(), msg.chaddr());
    assert_eq!(ack.giaddr(), Ipv4Addr::new(192, 168, 7, 1));
    assert_eq!(ack.yiaddr(), requested);
    assert_eq!(ack.server_id(), Some(&SERVER_IP));
    assert_eq!(resp.allocated, None);
}

#[test]
fn test_request_without_server_id() {
    let (config, pool, iface) = create_test_env();
    let requested = Ipv4Addr::new(10, 0, 0, 11);
    let msg = create_request(TEST_MAC, 1, None, Some(requested));

    let resp = expect_reply(handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &msg,
        &iface,
    ));
    assert_eq!(resp.message.yiaddr(), requested);
}

#[test]
fn test_request_falls_back_to_ciaddr() {
    let (config, pool, iface) = create_test_env();
    let mut msg = create_request(TEST_MAC, 1, None, None);
    msg.set_ciaddr(Ipv4Addr::new(10, 0, 0, 10));

    let resp = expect_reply(handle_message(
        &pool,
        &config,
        &RecordingNotifier::default(),
        &msg,
        &iface,
    ));
    assert_eq!(resp.message.yiaddr(), Ipv4Addr::new(10, 0, 0, 10));
}

#[test]
fn test_request_other_server() {
    let (config, pool, iface) = create_test_env();
    let msg = create_request(
        TEST_MAC,
        1,
        Some(OTHER_SERVER_IP),
        Some(Ipv4Addr::new(10, 0, 0, 10)),
    );

    let outcome = handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
    assert!(matches!(outcome, Outcome::NotForThisServer));
}

#[test]
fn test_request_without_address() {
    let (config, pool, iface) = create_test_env();
    let msg = create_request(TEST_MAC, 1, Some(SERVER_IP), None);

    let outcome = handle_message(&pool, &config, &RecordingNotifier::default(), &msg, &iface);
    assert_eq!(expect_ignored(outcome), NoResponse::MalformedPacket);
}

// ===== DECLINE Tests =====

#[test]
fn test_decline_releases_address() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier::default();
    let offered = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC, 1, 0),
        &iface,
    ))
    .message
    .yiaddr();
    assert!(pool.is_leased(offered));

    let msg = create_decline(TEST_MAC, 2, Some(SERVER_IP), Some(offered));
    let outcome = handle_message(&pool, &config, &notifier, &msg, &iface);

    assert_eq!(expect_ignored(outcome), NoResponse::Declined);
    assert!(!pool.is_leased(offered));
    assert_eq!(*notifier.calls.lock().unwrap(), vec![(offered, TEST_MAC)]);

    // released address is handed out again
    let next = expect_reply(handle_message(
        &pool,
        &config,
        &notifier,
        &create_discover(TEST_MAC_2, 3, 0),
        &iface,
    ));
    assert_eq!(next.message.yiaddr(), offered);
}

#[test]
fn test_decline_other_server() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier::default();
    let addr = pool.allocate().unwrap();

    let msg = create_decline(TEST_MAC, 1, Some(OTHER_SERVER_IP), Some(addr));
    let outcome = handle_message(&pool, &config, &notifier, &msg, &iface);

    assert!(matches!(outcome, Outcome::NotForThisServer));
    assert!(pool.is_leased(addr));
    assert!(notifier.calls.lock().unwrap().is_empty());
}

#[test]
fn test_decline_notifier_failure_still_releases() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier {
        fail: true,
        ..Default::default()
    };
    let addr = pool.allocate().unwrap();

    let msg = create_decline(TEST_MAC, 1, Some(SERVER_IP), Some(addr));
    let outcome = handle_message(&pool, &config, &notifier, &msg, &iface);

    assert_eq!(expect_ignored(outcome), NoResponse::Declined);
    assert!(!pool.is_leased(addr));
    assert_eq!(notifier.calls.lock().unwrap().len(), 1);
}

#[test]
fn test_decline_missing_fields() {
    let (config, pool, iface) = create_test_env();
    let notifier = RecordingNotifier::default();
    let addr = pool.allocate().unwrap();

    let no_server = create_decline(TEST_MAC, 1, None, Some(addr));
    assert_eq!(
        expect_ignored(handle_message(&pool, &config, &notifier, &no_server, &iface)),
        NoResponse::MalformedPacket
    );

    let no_addr = create_decline(TEST_MAC, 2, Some(SERVER_IP), None);
    assert_eq!(
        expect_ignored(handle_message(&pool, &config, &notifier, &no_addr, &iface)),
        NoResponse::MalformedPacket
    );

    let mut bad_mac = create_decline(TEST_MAC, 3, Some(SERVER_IP), Some(addr));
    bad_mac.set_chaddr(&[0x01, 0x02]);
    assert_eq!(
        expect_ignored(handle_message(&pool, &config, &notifier, &bad_mac, &iface)),
        NoResponse::MalformedPacket
    );

    assert!(pool.is_leased(addr));
    assert!(notifier.calls.lock().unwrap().is_empty());
}
