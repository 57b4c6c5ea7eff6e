//! ARP answering, reply suppression and active resolution for ICMP echo

use super::harness::{arp_reply, arp_request, echo_request, mac, raw_frame, Lab};
use pipeswitch::protocol::arp::{ArpOp, ArpPacket};
use pipeswitch::protocol::icmp::IcmpPacket;
use pipeswitch::protocol::ipv4::Ipv4Packet;
use pipeswitch::protocol::{EtherType, MacAddr};
use std::net::Ipv4Addr;

const LOCAL_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const LOCAL_MAC: MacAddr = MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]);
const HOST_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

const SWITCH: &str = r#"
name = "arp-lab"

[switch_ports.p1]
allowed_vlans = [10]
up = true

[switch_ports.p2]
allowed_vlans = [10]
up = true

[switch_ports.p3]
allowed_vlans = [10]
up = true

[[control_process]]
layer = 2
name = "LearningSwitch"

[[control_process]]
layer = 2
name = "ARP"
config_file = "arp.toml"

[[control_process]]
layer = 2
name = "L2Adapter"
config_file = "l2.toml"

[[control_process]]
layer = 3
name = "IPv4"

[[control_process]]
layer = 3
name = "ICMP"
config_file = "icmp.toml"
"#;

const ARP: &str = r#"
[local_addresses.self]
ip = "10.0.0.1"
mac = "aa:bb:cc:dd:ee:01"
"#;

const L2: &str = r#"
[allowed_addresses.self]
mac = "aa:bb:cc:dd:ee:01"
"#;

const ICMP: &str = r#"
[local_addresses.self]
address = "10.0.0.1"
"#;

async fn start(tag: &str) -> Lab {
    Lab::start(
        tag,
        SWITCH,
        &[("arp.toml", ARP), ("l2.toml", L2), ("icmp.toml", ICMP)],
    )
    .await
}

#[tokio::test]
async fn test_request_for_local_address_is_answered() {
    let mut lab = start("arp-answer").await;
    let host = mac(0x02);

    lab.send("p1", &arp_request(host, HOST_IP, LOCAL_IP)).await;

    let frame = lab.recv("p1").await;
    assert_eq!(frame.src, LOCAL_MAC);
    assert_eq!(frame.dst, host);
    assert_eq!(frame.vlan, None);
    let reply = ArpPacket::parse(&frame.payload).unwrap();
    assert_eq!(reply.operation, ArpOp::Reply);
    assert_eq!(reply.sender_mac, LOCAL_MAC);
    assert_eq!(reply.sender_ip, LOCAL_IP);
    assert_eq!(reply.target_ip, HOST_IP);

    // Answered, not flooded
    lab.assert_silent("p2").await;
    assert_eq!(lab.metrics.arp_replies_sent.get(), 1);
    lab.stop().await;
}

#[tokio::test]
async fn test_foreign_request_is_switched() {
    let mut lab = start("arp-foreign").await;

    lab.send("p1", &arp_request(mac(0x02), HOST_IP, Ipv4Addr::new(10, 0, 0, 3)))
        .await;
    let frame = lab.recv("p2").await;
    assert_eq!(frame.dst, MacAddr::BROADCAST);
    assert!(frame.is_ethertype(EtherType::Arp));
    lab.assert_silent("p1").await;

    lab.stop().await;
}

#[tokio::test]
async fn test_reply_to_local_address_is_not_forwarded() {
    let mut lab = start("arp-self-reply").await;

    lab.send("p1", &arp_reply(mac(0x02), HOST_IP, LOCAL_MAC, LOCAL_IP))
        .await;
    lab.assert_silent("p2").await;
    lab.assert_silent("p1").await;

    assert_eq!(lab.metrics.arp_table_size.get(), 1);
    lab.stop().await;
}

#[tokio::test]
async fn test_echo_reply_after_active_resolution() {
    let mut lab = start("arp-resolve").await;
    let host = mac(0x02);

    // The host pings without having announced itself
    lab.send("p1", &echo_request(LOCAL_MAC, host, HOST_IP, LOCAL_IP, 1))
        .await;

    // The switch asks who the host is, on every port
    let request = lab.recv("p1").await;
    assert_eq!(request.dst, MacAddr::BROADCAST);
    assert_eq!(request.src, LOCAL_MAC);
    let arp = ArpPacket::parse(&request.payload).unwrap();
    assert_eq!(arp.operation, ArpOp::Request);
    assert_eq!(arp.sender_ip, LOCAL_IP);
    assert_eq!(arp.target_ip, HOST_IP);
    assert!(ArpPacket::parse(&lab.recv("p2").await.payload).is_ok());

    lab.send("p1", &arp_reply(host, HOST_IP, LOCAL_MAC, LOCAL_IP)).await;

    let frame = lab.recv("p1").await;
    assert_eq!(frame.src, LOCAL_MAC);
    assert_eq!(frame.dst, host);
    let ip = Ipv4Packet::from_bytes(&frame.payload).unwrap();
    assert_eq!(ip.src_addr(), LOCAL_IP);
    assert_eq!(ip.dst_addr(), HOST_IP);
    assert!(ip.validate_checksum());
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(icmp.is_echo_reply());
    assert_eq!(icmp.sequence(), 1);
    assert_eq!(icmp.payload(), b"pipeswitch");

    // The second ping needs no resolution
    lab.send("p1", &echo_request(LOCAL_MAC, host, HOST_IP, LOCAL_IP, 2))
        .await;
    let frame = lab.recv("p1").await;
    let ip = Ipv4Packet::from_bytes(&frame.payload).unwrap();
    assert_eq!(IcmpPacket::parse(ip.payload()).unwrap().sequence(), 2);
    lab.assert_silent("p2").await;

    assert_eq!(lab.metrics.arp_requests_sent.get(), 1);
    assert_eq!(lab.metrics.icmp_echo_replies.get(), 2);
    lab.stop().await;
}

#[tokio::test]
async fn test_resolution_completes_under_switched_load() {
    // More frames than the channels between L2Adapter and ARP can hold
    const LOAD: usize = 400;

    let mut lab = start("arp-load").await;
    let host = mac(0x02);
    let far = mac(0x03);
    let near = mac(0x04);

    // `far` lives behind p3
    lab.send("p3", &raw_frame(MacAddr::BROADCAST, far)).await;
    lab.recv("p1").await;
    lab.recv("p2").await;

    lab.send("p1", &echo_request(LOCAL_MAC, host, HOST_IP, LOCAL_IP, 1))
        .await;
    for port in ["p1", "p2", "p3"] {
        let request = lab.recv(port).await;
        assert_eq!(ArpPacket::parse(&request.payload).unwrap().target_ip, HOST_IP);
    }

    // Switched frames that travel the whole L2 pipeline while the reply waits
    for _ in 0..LOAD {
        lab.send("p3", &raw_frame(far, near)).await;
    }
    lab.send("p1", &arp_reply(host, HOST_IP, LOCAL_MAC, LOCAL_IP)).await;

    let frame = lab.recv("p1").await;
    assert_eq!(frame.dst, host);
    let ip = Ipv4Packet::from_bytes(&frame.payload).unwrap();
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(icmp.is_echo_reply());
    assert_eq!(icmp.sequence(), 1);

    // Frames for `far` stay behind p3, so nothing else leaves
    lab.assert_silent("p2").await;
    lab.assert_silent("p3").await;
    assert_eq!(lab.metrics.arp_requests_sent.get(), 1);
    assert_eq!(lab.metrics.arp_resolve_timeouts.get(), 0);
    lab.stop().await;
}
