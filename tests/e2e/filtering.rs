//! MAC filter in front of the learning switch

use super::harness::{mac, raw_frame, Lab};
use pipeswitch::protocol::MacAddr;

const SWITCH: &str = r#"
name = "acl-lab"

[switch_ports.p1]
allowed_vlans = [1]
up = true

[switch_ports.p2]
allowed_vlans = [1]
up = true

[[control_process]]
layer = 2
name = "MACFilter"
config_file = "acl.toml"

[[control_process]]
layer = 2
name = "LearningSwitch"
"#;

const ACL: &str = r#"
[ingress_filter]
mode = "deny"

[[ingress_rules]]
src = "02:00:00:00:00:0b"
action = "allow"

[[egress_rules]]
dst = "02:00:00:00:00:0c"
action = "deny"

[local_addresses.self]
address = "aa:bb:cc:dd:ee:01"
"#;

#[tokio::test]
async fn test_ingress_default_deny() {
    let mut lab = Lab::start("acl-deny", SWITCH, &[("acl.toml", ACL)]).await;

    lab.send("p1", &raw_frame(MacAddr::BROADCAST, mac(0x0a))).await;
    lab.assert_silent("p2").await;

    // Explicitly allowed source
    lab.send("p2", &raw_frame(MacAddr::BROADCAST, mac(0x0b))).await;
    assert_eq!(lab.recv("p1").await.src, mac(0x0b));

    assert_eq!(lab.metrics.filter_denied.get(), 1);
    lab.stop().await;
}

#[tokio::test]
async fn test_egress_rules() {
    let mut lab = Lab::start("acl-egress", SWITCH, &[("acl.toml", ACL)]).await;

    lab.send("p2", &raw_frame(mac(0x0c), mac(0x0b))).await;
    lab.assert_silent("p1").await;

    // Let in, since it is addressed to the switch, but never sent out
    lab.send("p1", &raw_frame(MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]), mac(0x0a)))
        .await;
    lab.assert_silent("p2").await;

    assert_eq!(lab.metrics.filter_denied.get(), 2);
    lab.stop().await;
}
