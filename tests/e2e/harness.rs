use pipeswitch::capture::{MemoryBackend, MemoryPeer};
use pipeswitch::config;
use pipeswitch::pipeline::StageRegistry;
use pipeswitch::protocol::arp::ArpPacket;
use pipeswitch::protocol::icmp::EchoRequestBuilder;
use pipeswitch::protocol::ipv4::{Ipv4Builder, Protocol};
use pipeswitch::protocol::{EtherType, EthernetFrame, MacAddr};
use pipeswitch::telemetry::MetricsRegistry;
use pipeswitch::Switch;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How long to wait for a frame that should arrive
const DELIVERY_WAIT: Duration = Duration::from_secs(3);

/// How long a port must stay quiet to count as silent
const SILENCE_WAIT: Duration = Duration::from_millis(200);

pub struct Lab {
    pub switch: Switch<MemoryBackend>,
    pub metrics: Arc<MetricsRegistry>,
    peers: HashMap<String, MemoryPeer>,
    dir: PathBuf,
}

impl Lab {
    /// Start a switch from `switch_toml`, with `files` written next to it
    pub async fn start(tag: &str, switch_toml: &str, files: &[(&str, &str)]) -> Lab {
        let dir = std::env::temp_dir().join(format!("pipeswitch-e2e-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        for (name, content) in files {
            std::fs::write(dir.join(name), content).expect("write stage file");
        }
        let path = dir.join("switch.toml");
        std::fs::write(&path, switch_toml).expect("write switch config");

        let cfg = config::load(&path).expect("load config");
        let registry = StageRegistry::builtin();
        let validation = config::validate(&cfg, &registry);
        assert!(!validation.has_errors(), "{:?}", validation.errors);

        let backend = MemoryBackend::new();
        let peers = cfg
            .switch_ports
            .keys()
            .map(|name| (name.clone(), backend.add_link(name)))
            .collect();

        let metrics = Arc::new(MetricsRegistry::new());
        let mut switch =
            Switch::from_config(&cfg, &registry, backend, metrics.clone()).expect("build switch");
        switch.start().expect("start switch");

        Lab {
            switch,
            metrics,
            peers,
            dir,
        }
    }

    fn peer(&mut self, port: &str) -> &mut MemoryPeer {
        self.peers.get_mut(port).expect("unknown port")
    }

    /// Transmit `frame` from the host behind `port`
    pub async fn send(&mut self, port: &str, frame: &EthernetFrame) {
        self.peer(port).send(frame.to_bytes()).await.expect("send");
    }

    /// Next frame the switch sends out of `port`
    pub async fn recv(&mut self, port: &str) -> EthernetFrame {
        let bytes = self
            .peer(port)
            .recv_timeout(DELIVERY_WAIT)
            .await
            .unwrap_or_else(|| panic!("nothing received on {}", port));
        EthernetFrame::parse(&bytes).expect("switch sent a malformed frame")
    }

    /// Assert the switch sends nothing out of `port` for a while
    pub async fn assert_silent(&mut self, port: &str) {
        if let Some(bytes) = self.peer(port).recv_timeout(SILENCE_WAIT).await {
            panic!(
                "unexpected frame on {}: {:?}",
                port,
                EthernetFrame::parse(&bytes)
            );
        }
    }

    pub async fn stop(mut self) {
        self.switch.stop().await.expect("stop switch");
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0, last])
}

pub fn raw_frame(dst: MacAddr, src: MacAddr) -> EthernetFrame {
    EthernetFrame::new(dst, src, 0x88b5, vec![0x5a; 46])
}

pub fn arp_request(src_mac: MacAddr, src_ip: Ipv4Addr, target: Ipv4Addr) -> EthernetFrame {
    ArpPacket::request(src_mac, src_ip, target).into_frame(MacAddr::BROADCAST)
}

pub fn arp_reply(
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_mac: MacAddr,
    dst_ip: Ipv4Addr,
) -> EthernetFrame {
    ArpPacket::reply(src_mac, src_ip, dst_mac, dst_ip).into_frame(dst_mac)
}

pub fn udp_frame(
    dst_mac: MacAddr,
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> EthernetFrame {
    let packet = Ipv4Builder::new()
        .protocol(Protocol::Udp as u8)
        .src_addr(src_ip)
        .dst_addr(dst_ip)
        .payload(&[0, 1, 0, 2, 0, 12, 0, 0, 0xde, 0xad, 0xbe, 0xef])
        .build();
    EthernetFrame::new(dst_mac, src_mac, EtherType::Ipv4 as u16, packet)
}

pub fn echo_request(
    dst_mac: MacAddr,
    src_mac: MacAddr,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
    sequence: u16,
) -> EthernetFrame {
    let icmp = EchoRequestBuilder::new(0x1234, sequence)
        .payload(b"pipeswitch")
        .build();
    let packet = Ipv4Builder::new()
        .protocol(Protocol::Icmp as u8)
        .src_addr(src_ip)
        .dst_addr(dst_ip)
        .payload(&icmp)
        .build();
    EthernetFrame::new(dst_mac, src_mac, EtherType::Ipv4 as u16, packet)
}
