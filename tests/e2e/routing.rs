//! Inter-VLAN routing through VLAN interfaces
//!
//! ```text
//! host A 10.0.10.2 -- p10 (VLAN 10) --+
//!                                     +-- router: v10 10.0.10.1, v20 10.0.20.1
//! host B 10.0.20.2 -- p20 (VLAN 20) --+
//!                                     +-- uplink trunk [10, 20]
//! ```

use super::harness::{arp_reply, arp_request, echo_request, mac, udp_frame, Lab};
use pipeswitch::protocol::arp::{ArpOp, ArpPacket};
use pipeswitch::protocol::icmp::IcmpPacket;
use pipeswitch::protocol::ipv4::Ipv4Packet;
use pipeswitch::protocol::MacAddr;
use std::net::Ipv4Addr;

const V10_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 10, 1);
const V10_MAC: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 0x0a]);
const V20_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 20, 1);
const V20_MAC: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 0x14]);
const HOST_A: Ipv4Addr = Ipv4Addr::new(10, 0, 10, 2);
const HOST_B: Ipv4Addr = Ipv4Addr::new(10, 0, 20, 2);

const SWITCH: &str = r#"
name = "router-lab"

[switch_ports.p10]
allowed_vlans = [10]
up = true

[switch_ports.p20]
allowed_vlans = [20]
up = true

[switch_ports.uplink]
trunk = true
allowed_vlans = [10, 20]
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
name = "Routing"
config_file = "routing.toml"

[[control_process]]
layer = 3
name = "ICMP"
config_file = "icmp.toml"
"#;

const ARP: &str = r#"
[local_addresses.v10]
ip = "10.0.10.1"
mac = "aa:00:00:00:00:0a"

[local_addresses.v20]
ip = "10.0.20.1"
mac = "aa:00:00:00:00:14"
"#;

const L2: &str = r#"
[allowed_addresses.v10]
mac = "aa:00:00:00:00:0a"

[allowed_addresses.v20]
mac = "aa:00:00:00:00:14"
"#;

const ROUTING: &str = r#"
[vlan_ifaces.v10]
ip = "10.0.10.1"
mac = "aa:00:00:00:00:0a"
vlan = 10

[vlan_ifaces.v20]
ip = "10.0.20.1"
mac = "aa:00:00:00:00:14"
vlan = 20

[routes."10.0.10.0/24"]
ports = [{ name = "v10" }]

[routes."10.0.20.0/24"]
ports = [{ name = "v20" }]
"#;

const ICMP: &str = r#"
[local_addresses.v10]
address = "10.0.10.1"

[local_addresses.v20]
address = "10.0.20.1"
"#;

async fn start(tag: &str) -> Lab {
    Lab::start(
        tag,
        SWITCH,
        &[
            ("arp.toml", ARP),
            ("l2.toml", L2),
            ("routing.toml", ROUTING),
            ("icmp.toml", ICMP),
        ],
    )
    .await
}

#[tokio::test]
async fn test_routed_between_vlans() {
    let mut lab = start("route-forward").await;
    let (mac_a, mac_b) = (mac(0x0a), mac(0x0b));

    lab.send("p10", &udp_frame(V10_MAC, mac_a, HOST_A, HOST_B)).await;

    // Next hop unknown: the router asks on VLAN 20 from its v20 identity
    let request = lab.recv("p20").await;
    assert_eq!(request.src, V20_MAC);
    let arp = ArpPacket::parse(&request.payload).unwrap();
    assert_eq!(arp.operation, ArpOp::Request);
    assert_eq!(arp.sender_ip, V20_IP);
    assert_eq!(arp.target_ip, HOST_B);
    assert_eq!(lab.recv("uplink").await.vlan_id(), Some(20));
    lab.assert_silent("p10").await;

    lab.send("p20", &arp_reply(mac_b, HOST_B, V20_MAC, V20_IP)).await;

    let frame = lab.recv("p20").await;
    assert_eq!(frame.src, V20_MAC);
    assert_eq!(frame.dst, mac_b);
    assert_eq!(frame.vlan, None);
    let ip = Ipv4Packet::from_bytes(&frame.payload).unwrap();
    assert_eq!(ip.src_addr(), HOST_A);
    assert_eq!(ip.dst_addr(), HOST_B);
    assert_eq!(ip.ttl(), 63);
    assert!(ip.validate_checksum());

    lab.assert_silent("uplink").await;
    lab.stop().await;
}

#[tokio::test]
async fn test_ping_gateway() {
    let mut lab = start("route-ping").await;
    let mac_a = mac(0x0a);

    lab.send("p10", &arp_request(mac_a, HOST_A, V10_IP)).await;
    let reply = ArpPacket::parse(&lab.recv("p10").await.payload).unwrap();
    assert_eq!(reply.sender_mac, V10_MAC);

    // The far interface answers too, through the near one
    for (seq, target) in [(1, V10_IP), (2, V20_IP)] {
        lab.send("p10", &echo_request(V10_MAC, mac_a, HOST_A, target, seq))
            .await;

        let frame = lab.recv("p10").await;
        assert_eq!(frame.src, V10_MAC);
        assert_eq!(frame.dst, mac_a);
        let ip = Ipv4Packet::from_bytes(&frame.payload).unwrap();
        assert_eq!(ip.src_addr(), target);
        assert_eq!(ip.dst_addr(), HOST_A);
        let icmp = IcmpPacket::parse(ip.payload()).unwrap();
        assert!(icmp.is_echo_reply());
        assert_eq!(icmp.sequence(), seq);
    }

    lab.assert_silent("p20").await;
    assert_eq!(lab.metrics.arp_requests_sent.get(), 0);
    lab.stop().await;
}

#[tokio::test]
async fn test_unroutable_and_expiring_packets_are_dropped() {
    let mut lab = start("route-drop").await;
    let mac_a = mac(0x0a);

    lab.send("p10", &udp_frame(V10_MAC, mac_a, HOST_A, Ipv4Addr::new(192, 0, 2, 1)))
        .await;

    let mut last_hop = udp_frame(V10_MAC, mac_a, HOST_A, HOST_B);
    let mut packet = Ipv4Packet::from_bytes(&last_hop.payload).unwrap();
    packet.set_ttl(1);
    last_hop.payload = packet.into_bytes();
    lab.send("p10", &last_hop).await;

    lab.assert_silent("p20").await;
    lab.assert_silent("uplink").await;
    lab.assert_silent("p10").await;
    lab.stop().await;
}
