//! Switch ports
//!
//! A port owns one link and runs two loops on it while up:
//! - send loop: dequeue, apply the outbound VLAN policy, write to the link
//! - receive loop: read, decode, apply the inbound VLAN policy, hand the
//!   frame to the switch's ingress queue
//!
//! Inside the switch every frame carries an 802.1Q tag. Ports add it on the
//! way in and remove it on the way out where the port mode requires.

use crate::capture::{Backend, Link, LinkControl};
use crate::protocol::{EthernetFrame, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Frames buffered per port before `enqueue` waits
pub const PORT_QUEUE_CAPACITY: usize = 10;

/// Receive buffer size; holds a tagged 9000-byte jumbo frame with room to spare
pub const RECV_BUFFER_SIZE: usize = 9216;

/// Pause after a link read error before the next attempt
const LINK_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// VLAN membership of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortMode {
    /// Untagged on the wire, member of exactly one VLAN
    Access { vlan: u16 },
    /// Tagged on the wire; the first allowed VLAN is the native VLAN
    Trunk { allowed: Vec<u16> },
}

impl PortMode {
    /// Build from the configured trunk flag and VLAN list.
    /// An access port uses the first listed VLAN.
    pub fn from_config(name: &str, trunk: bool, vlans: &[u16]) -> Result<Self> {
        if trunk {
            return Ok(PortMode::Trunk {
                allowed: vlans.to_vec(),
            });
        }
        match vlans.first() {
            Some(&vlan) => Ok(PortMode::Access { vlan }),
            None => Err(Error::Config(format!(
                "access port {} has no VLAN",
                name
            ))),
        }
    }

    /// VLAN assumed for untagged traffic
    pub fn native_vlan(&self) -> Option<u16> {
        match self {
            PortMode::Access { vlan } => Some(*vlan),
            PortMode::Trunk { allowed } => allowed.first().copied(),
        }
    }

    /// Whether frames of `vlan` may cross this port
    pub fn carries(&self, vlan: u16) -> bool {
        match self {
            PortMode::Access { vlan: own } => *own == vlan,
            PortMode::Trunk { allowed } => allowed.contains(&vlan),
        }
    }

    /// Normalize a received frame. `None` means discard.
    pub fn inbound(&self, mut frame: EthernetFrame) -> Option<EthernetFrame> {
        match self {
            PortMode::Trunk { allowed } => match frame.vlan_id() {
                None => {
                    frame.set_vlan(self.native_vlan()?);
                    Some(frame)
                }
                Some(vid) if allowed.contains(&vid) => Some(frame),
                Some(_) => None,
            },
            // Access ports never legitimately receive tagged traffic
            PortMode::Access { vlan } => match frame.vlan {
                Some(_) => None,
                None => {
                    frame.set_vlan(*vlan);
                    Some(frame)
                }
            },
        }
    }

    /// Prepare a frame for transmission. `None` means discard.
    pub fn outbound(&self, mut frame: EthernetFrame) -> Option<EthernetFrame> {
        match self {
            PortMode::Trunk { allowed } => match frame.vlan_id() {
                None => {
                    frame.set_vlan(self.native_vlan()?);
                    Some(frame)
                }
                Some(vid) if allowed.contains(&vid) => Some(frame),
                Some(_) => None,
            },
            PortMode::Access { vlan } => match frame.vlan_id() {
                None => Some(frame),
                Some(vid) if vid == *vlan => {
                    frame.strip_vlan();
                    Some(frame)
                }
                Some(_) => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStatus {
    Down,
    Up,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortStatus::Down => write!(f, "down"),
            PortStatus::Up => write!(f, "up"),
        }
    }
}

/// A frame accepted by a port's receive loop
#[derive(Debug, Clone)]
pub struct IncomingFrame {
    pub frame: EthernetFrame,
    pub source_addr: MacAddr,
    pub in_port: Arc<SwitchPort>,
}

struct PortRuntime {
    link: Arc<dyn LinkControl>,
    stop: watch::Sender<bool>,
    send_task: JoinHandle<mpsc::Receiver<EthernetFrame>>,
    recv_task: JoinHandle<()>,
}

/// One physical or virtual switch port
pub struct SwitchPort {
    name: String,
    mode: PortMode,
    up: AtomicBool,
    queue: mpsc::Sender<EthernetFrame>,
    /// Receiving half of the send queue while no send loop owns it
    parked_queue: Mutex<Option<mpsc::Receiver<EthernetFrame>>>,
    runtime: Mutex<Option<PortRuntime>>,
    metrics: Arc<MetricsRegistry>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SwitchPort {
    pub fn new(name: &str, mode: PortMode, metrics: Arc<MetricsRegistry>) -> Arc<Self> {
        let (queue, parked) = mpsc::channel(PORT_QUEUE_CAPACITY);
        metrics.register_port(name);
        Arc::new(Self {
            name: name.to_string(),
            mode,
            up: AtomicBool::new(false),
            queue,
            parked_queue: Mutex::new(Some(parked)),
            runtime: Mutex::new(None),
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> &PortMode {
        &self.mode
    }

    pub fn status(&self) -> PortStatus {
        if self.is_up() {
            PortStatus::Up
        } else {
            PortStatus::Down
        }
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Open the link and start both loops. Activating an up port is a no-op.
    pub fn activate<B: Backend>(
        self: &Arc<Self>,
        backend: &B,
        ingress: mpsc::Sender<IncomingFrame>,
    ) -> Result<()> {
        let mut runtime = lock(&self.runtime);
        if runtime.is_some() {
            return Ok(());
        }

        let queue = lock(&self.parked_queue)
            .take()
            .ok_or_else(|| Error::PortState {
                name: self.name.clone(),
                reason: "send queue was lost by a failed send loop".into(),
            })?;

        let link = match backend.open(&self.name) {
            Ok(link) => link,
            Err(e) => {
                *lock(&self.parked_queue) = Some(queue);
                return Err(e);
            }
        };

        let (stop, stop_rx) = watch::channel(false);
        let send_task = tokio::spawn(send_loop(
            Arc::clone(self),
            Arc::clone(&link),
            queue,
            stop_rx.clone(),
        ));
        let recv_task = tokio::spawn(recv_loop(
            Arc::clone(self),
            Arc::clone(&link),
            ingress,
            stop_rx,
        ));

        *runtime = Some(PortRuntime {
            link,
            stop,
            send_task,
            recv_task,
        });
        self.up.store(true, Ordering::Release);

        info!(port = %self.name, mode = ?self.mode, "port up");
        Ok(())
    }

    /// Stop both loops and close the link. Frames still queued are discarded.
    pub async fn deactivate(&self) -> Result<()> {
        let runtime = lock(&self.runtime).take();
        let Some(runtime) = runtime else {
            return Ok(());
        };

        self.up.store(false, Ordering::Release);
        let _ = runtime.stop.send(true);

        match runtime.send_task.await {
            Ok(mut queue) => {
                while queue.try_recv().is_ok() {}
                *lock(&self.parked_queue) = Some(queue);
            }
            Err(e) => error!(port = %self.name, "send loop failed: {}", e),
        }
        if let Err(e) = runtime.recv_task.await {
            error!(port = %self.name, "receive loop failed: {}", e);
        }

        runtime.link.close()?;
        info!(port = %self.name, "port down");
        Ok(())
    }

    /// Queue a frame for transmission, waiting while the queue is full.
    /// Returns false if the port is down.
    pub async fn enqueue(&self, frame: EthernetFrame) -> bool {
        if !self.is_up() {
            trace!(port = %self.name, "port down, frame not queued");
            return false;
        }
        self.queue.send(frame).await.is_ok()
    }

    /// Blocking form of [`enqueue`](Self::enqueue) for callers outside the async runtime.
    pub fn enqueue_blocking(&self, frame: EthernetFrame) -> bool {
        if !self.is_up() {
            trace!(port = %self.name, "port down, frame not queued");
            return false;
        }
        self.queue.blocking_send(frame).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn set_up_for_test(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }

    /// Frames queued while no send loop runs
    #[cfg(test)]
    pub(crate) fn drain_queue_for_test(&self) -> Vec<EthernetFrame> {
        let mut parked = lock(&self.parked_queue);
        let mut frames = Vec::new();
        if let Some(queue) = parked.as_mut() {
            while let Ok(frame) = queue.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }
}

impl fmt::Debug for SwitchPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchPort")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("status", &self.status())
            .finish()
    }
}

async fn send_loop<L: Link>(
    port: Arc<SwitchPort>,
    link: Arc<L>,
    mut queue: mpsc::Receiver<EthernetFrame>,
    mut stop: watch::Receiver<bool>,
) -> mpsc::Receiver<EthernetFrame> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stop.changed() => break,
            frame = queue.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let Some(frame) = port.mode.outbound(frame) else {
            trace!(port = %port.name, "outbound VLAN policy discarded frame");
            port.metrics.with_port(&port.name, |s| s.tx_drops.inc());
            continue;
        };

        match link.send(&frame.to_bytes()).await {
            Ok(len) => port.metrics.with_port(&port.name, |s| s.record_tx(len)),
            Err(e) => {
                warn!(port = %port.name, "link write failed: {}", e);
                port.metrics.with_port(&port.name, |s| s.tx_errors.inc());
            }
        }
    }

    debug!(port = %port.name, "send loop stopped");
    queue
}

async fn recv_loop<L: Link>(
    port: Arc<SwitchPort>,
    link: Arc<L>,
    ingress: mpsc::Sender<IncomingFrame>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let received = tokio::select! {
            biased;
            _ = stop.changed() => break,
            received = link.recv(&mut buf) => received,
        };

        let len = match received {
            Ok(info) if info.truncated => {
                debug!(port = %port.name, buffer = RECV_BUFFER_SIZE, "oversized frame dropped");
                port.metrics.with_port(&port.name, |s| s.rx_errors.inc());
                continue;
            }
            Ok(info) => info.len,
            Err(e) => {
                warn!(port = %port.name, "link read failed: {}", e);
                port.metrics.with_port(&port.name, |s| s.rx_errors.inc());
                tokio::time::sleep(LINK_ERROR_BACKOFF).await;
                continue;
            }
        };

        let frame = match EthernetFrame::parse(&buf[..len]) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(port = %port.name, "undecodable frame: {}", e);
                port.metrics.with_port(&port.name, |s| s.rx_errors.inc());
                continue;
            }
        };
        port.metrics.with_port(&port.name, |s| s.record_rx(len));

        let Some(frame) = port.mode.inbound(frame) else {
            trace!(port = %port.name, "inbound VLAN policy discarded frame");
            port.metrics.with_port(&port.name, |s| s.rx_drops.inc());
            continue;
        };

        let incoming = IncomingFrame {
            source_addr: frame.src,
            frame,
            in_port: Arc::clone(&port),
        };

        tokio::select! {
            biased;
            _ = stop.changed() => break,
            sent = ingress.send(incoming) => {
                if sent.is_err() {
                    debug!(port = %port.name, "ingress queue closed");
                    break;
                }
            }
        }
    }

    debug!(port = %port.name, "receive loop stopped");
}
