//! L2 switching: VLAN tagging across access/trunk ports, learning, flooding

use super::harness::{mac, raw_frame, Lab};
use pipeswitch::protocol::MacAddr;

const VLAN_LAB: &str = r#"
name = "vlan-lab"

[switch_ports.access10]
allowed_vlans = [10]
up = true

[switch_ports.access20]
allowed_vlans = [20]
up = true

[switch_ports.uplink]
trunk = true
allowed_vlans = [10, 20]
up = true

[[control_process]]
layer = 2
name = "LearningSwitch"
"#;

const FLAT_LAB: &str = r#"
name = "flat-lab"

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
"#;

#[tokio::test]
async fn test_vlan_round_trip() {
    let mut lab = Lab::start("vlan-round-trip", VLAN_LAB, &[]).await;
    let (host_a, host_b) = (mac(0x0a), mac(0x0b));

    // Untagged in on the access port, tagged out on the trunk
    lab.send("access10", &raw_frame(MacAddr::BROADCAST, host_a)).await;
    let frame = lab.recv("uplink").await;
    assert_eq!(frame.vlan_id(), Some(10));
    assert_eq!(frame.src, host_a);
    lab.assert_silent("access20").await;

    // Tagged in on the trunk, untagged out on the access port
    let reply = raw_frame(host_a, host_b).with_vlan(10);
    lab.send("uplink", &reply).await;
    let frame = lab.recv("access10").await;
    assert_eq!(frame.vlan, None);
    assert_eq!(frame.src, host_b);
    assert_eq!(frame.payload, reply.payload);
    lab.assert_silent("access20").await;

    lab.stop().await;
}

#[tokio::test]
async fn test_trunk_discards_disallowed_vlan() {
    let mut lab = Lab::start("vlan-disallowed", VLAN_LAB, &[]).await;

    lab.send("uplink", &raw_frame(MacAddr::BROADCAST, mac(0x0b)).with_vlan(30))
        .await;
    lab.assert_silent("access10").await;
    lab.assert_silent("access20").await;

    // Untagged trunk traffic belongs to the native VLAN
    lab.send("uplink", &raw_frame(MacAddr::BROADCAST, mac(0x0b))).await;
    assert_eq!(lab.recv("access10").await.vlan, None);
    lab.assert_silent("access20").await;

    lab.stop().await;
}

#[tokio::test]
async fn test_flood_then_unicast() {
    let mut lab = Lab::start("flood-unicast", FLAT_LAB, &[]).await;
    let (host_a, host_b) = (mac(0x0a), mac(0x0b));

    // B unknown: flooded everywhere but the ingress port
    lab.send("p1", &raw_frame(host_b, host_a)).await;
    assert_eq!(lab.recv("p2").await.dst, host_b);
    assert_eq!(lab.recv("p3").await.dst, host_b);
    lab.assert_silent("p1").await;

    // A was learned on p1
    lab.send("p2", &raw_frame(host_a, host_b)).await;
    assert_eq!(lab.recv("p1").await.dst, host_a);
    lab.assert_silent("p3").await;

    // Both known now
    lab.send("p1", &raw_frame(host_b, host_a)).await;
    assert_eq!(lab.recv("p2").await.src, host_a);
    lab.assert_silent("p3").await;

    assert_eq!(lab.metrics.frames_flooded.get(), 1);
    assert_eq!(lab.metrics.mac_table_size.get(), 2);
    lab.stop().await;
}

#[tokio::test]
async fn test_down_port_is_skipped() {
    let mut lab = Lab::start("down-port", FLAT_LAB, &[]).await;

    lab.switch.down_port("p3").await.unwrap();
    lab.send("p1", &raw_frame(MacAddr::BROADCAST, mac(0x0a))).await;
    lab.recv("p2").await;
    lab.assert_silent("p3").await;

    lab.switch.up_port("p3").unwrap();
    lab.send("p1", &raw_frame(MacAddr::BROADCAST, mac(0x0a))).await;
    lab.recv("p2").await;
    lab.recv("p3").await;

    lab.stop().await;
}
