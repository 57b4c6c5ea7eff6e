//! In-memory links
//!
//! Each link is a pair of channels. The switch side is opened through
//! [`MemoryBackend`]; the far side is a [`MemoryPeer`] that plays the
//! role of whatever is plugged into the port.

use super::{Backend, Link, LinkControl, RxInfo};
use crate::{Error, Result};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

const LINK_CAPACITY: usize = 64;

/// Switch side of an in-memory link
#[derive(Debug)]
pub struct MemoryLink {
    name: String,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    tx: mpsc::Sender<Vec<u8>>,
    closed: AtomicBool,
}

impl MemoryLink {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn broken(&self) -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            format!("link {} closed", self.name),
        ))
    }
}

impl LinkControl for MemoryLink {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl Link for MemoryLink {
    async fn recv(&self, buf: &mut [u8]) -> Result<RxInfo> {
        let mut rx = self.rx.lock().await;
        let frame = rx.recv().await.ok_or_else(|| self.broken())?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(RxInfo {
            len,
            truncated: frame.len() > len,
        })
    }

    async fn send(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.broken());
        }
        self.tx
            .send(buf.to_vec())
            .await
            .map_err(|_| self.broken())?;
        Ok(buf.len())
    }
}

/// Far side of an in-memory link
#[derive(Debug)]
pub struct MemoryPeer {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl MemoryPeer {
    /// Inject a frame into the switch port
    pub async fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::ChannelClosed("memory link"))
    }

    /// Next frame the switch transmitted on this port
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next transmitted frame, or `None` if nothing arrives within `wait`
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(wait, self.rx.recv()).await.ok().flatten()
    }

    /// Frame already queued by the switch, without waiting
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

/// Hands out pre-created in-memory links by port name.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    links: Mutex<HashMap<String, Arc<MemoryLink>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the link for `name` and return its far side
    pub fn add_link(&self, name: &str) -> MemoryPeer {
        let (to_switch, from_peer) = mpsc::channel(LINK_CAPACITY);
        let (to_peer, from_switch) = mpsc::channel(LINK_CAPACITY);

        let link = Arc::new(MemoryLink {
            name: name.to_string(),
            rx: tokio::sync::Mutex::new(from_peer),
            tx: to_peer,
            closed: AtomicBool::new(false),
        });
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), link);

        MemoryPeer {
            tx: to_switch,
            rx: from_switch,
        }
    }
}

impl Backend for MemoryBackend {
    type Link = MemoryLink;

    /// Reopening a closed link resumes it, like bringing an interface back up.
    fn open(&self, name: &str) -> Result<Arc<MemoryLink>> {
        let links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        let link = links.get(name).ok_or_else(|| Error::InterfaceNotFound {
            name: name.to_string(),
        })?;
        link.closed.store(false, Ordering::Release);
        Ok(Arc::clone(link))
    }
}
