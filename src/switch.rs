//! Switch orchestrator
//!
//! Ties ports to the pipeline: frames received by any port are wrapped in
//! a [`ControlMessage`] and pushed through the stages by a single dispatch
//! loop; messages coming out of the pipeline are written to their output
//! ports by a consumer loop.

use crate::capture::Backend;
use crate::config::{Config, PortConfig};
use crate::dataplane::{IncomingFrame, PortMode, SwitchPort};
use crate::pipeline::{ControlMessage, Pipeline, StageContext, StageHandle, StageRegistry};
use crate::protocol::EthernetFrame;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Frames buffered between the ports and the dispatch loop
pub const INGRESS_QUEUE_CAPACITY: usize = 256;

/// Processed messages buffered between the pipeline and the consumer loop
const OUTPUT_QUEUE_CAPACITY: usize = 64;

/// State shared with the stages through every message
pub struct SwitchContext {
    name: String,
    ports: RwLock<BTreeMap<String, Arc<SwitchPort>>>,
    metrics: Arc<MetricsRegistry>,
}

impl SwitchContext {
    pub fn new(name: &str, metrics: Arc<MetricsRegistry>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ports: RwLock::new(BTreeMap::new()),
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// All ports, in name order
    pub fn ports(&self) -> Vec<Arc<SwitchPort>> {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        ports.values().cloned().collect()
    }

    pub fn active_ports(&self) -> Vec<Arc<SwitchPort>> {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        ports.values().filter(|p| p.is_up()).cloned().collect()
    }

    pub fn port(&self, name: &str) -> Option<Arc<SwitchPort>> {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        ports.get(name).cloned()
    }

    /// Returns false if a port of that name already exists
    pub(crate) fn insert(&self, port: Arc<SwitchPort>) -> bool {
        let mut ports = self.ports.write().unwrap_or_else(PoisonError::into_inner);
        if ports.contains_key(port.name()) {
            return false;
        }
        ports.insert(port.name().to_string(), port);
        true
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Arc<SwitchPort>> {
        let mut ports = self.ports.write().unwrap_or_else(PoisonError::into_inner);
        ports.remove(name)
    }

    /// Queue `frame` on every active port, blocking while a queue is full.
    /// Must not be called from an async task. Returns the number of ports used.
    pub fn broadcast_blocking(&self, frame: &EthernetFrame) -> usize {
        self.active_ports()
            .iter()
            .filter(|port| port.enqueue_blocking(frame.clone()))
            .count()
    }
}

impl fmt::Debug for SwitchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = self.ports.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SwitchContext")
            .field("name", &self.name)
            .field("ports", &ports.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A running (or ready to run) switch on backend `B`
pub struct Switch<B: Backend> {
    ctx: Arc<SwitchContext>,
    backend: B,
    stages: Vec<StageHandle>,
    ingress_tx: mpsc::Sender<IncomingFrame>,
    ingress_rx: Option<mpsc::Receiver<IncomingFrame>>,
    shutdown: watch::Sender<bool>,
    dispatch: Option<JoinHandle<Option<Pipeline>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<B: Backend> Switch<B> {
    /// Build the stage chain. Any stage that cannot be built is fatal.
    pub fn new(
        config: &Config,
        registry: &StageRegistry,
        backend: B,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        info!(switch = %config.name, "initializing switch");

        let mut stages = Vec::with_capacity(config.control_process.len());
        for stage in &config.control_process {
            let ctx = StageContext {
                layer: stage.layer,
                name: stage.name.clone(),
                config_file: stage.config_file.clone(),
                metrics: Arc::clone(&metrics),
            };
            let handle = registry.build(&ctx)?;
            debug!(stage = %handle.label(), config = ?stage.config_file, "stage ready");
            stages.push(handle);
        }

        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            ctx: SwitchContext::new(&config.name, metrics),
            backend,
            stages,
            ingress_tx,
            ingress_rx: Some(ingress_rx),
            shutdown,
            dispatch: None,
            tasks: Vec::new(),
        })
    }

    /// [`new`](Self::new), then add every configured port.
    /// Ports marked `up` are activated, so this needs a Tokio runtime.
    pub fn from_config(
        config: &Config,
        registry: &StageRegistry,
        backend: B,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        let switch = Self::new(config, registry, backend, metrics)?;
        for (name, port) in &config.switch_ports {
            switch.add_port(name, port)?;
        }
        Ok(switch)
    }

    pub fn context(&self) -> &Arc<SwitchContext> {
        &self.ctx
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        self.ctx.metrics()
    }

    pub fn port(&self, name: &str) -> Option<Arc<SwitchPort>> {
        self.ctx.port(name)
    }

    /// Stage labels in traversal order
    pub fn stage_labels(&self) -> Vec<String> {
        self.stages.iter().map(StageHandle::label).collect()
    }

    /// Spawn the pipeline, the dispatch and consumer loops, and one aging
    /// task per stage that keeps tables.
    pub fn start(&mut self) -> Result<()> {
        let ingress_rx = self.ingress_rx.take().ok_or_else(|| {
            Error::Config(format!("switch {} already started", self.ctx.name()))
        })?;

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);
        let pipeline = Pipeline::start(&self.stages, output_tx, Arc::clone(self.ctx.metrics()))?;
        debug!(workers = pipeline.worker_count(), "pipeline workers running");

        self.dispatch = Some(tokio::spawn(dispatch_loop(
            Arc::clone(&self.ctx),
            pipeline,
            ingress_rx,
            self.shutdown.subscribe(),
        )));
        self.tasks
            .push(tokio::spawn(consumer_loop(Arc::clone(&self.ctx), output_rx)));

        for handle in &self.stages {
            if let Some(period) = handle.stage.aging_interval() {
                self.tasks.push(tokio::spawn(aging_loop(
                    handle.clone(),
                    period,
                    self.shutdown.subscribe(),
                )));
            }
        }

        info!(
            switch = %self.ctx.name(),
            stages = ?self.stage_labels(),
            "switch started"
        );
        Ok(())
    }

    /// Create a port, activating it if `config.up` is set
    pub fn add_port(&self, name: &str, config: &PortConfig) -> Result<Arc<SwitchPort>> {
        let mode = PortMode::from_config(name, config.trunk, &config.allowed_vlans)?;
        let port = SwitchPort::new(name, mode, Arc::clone(self.ctx.metrics()));

        if !self.ctx.insert(Arc::clone(&port)) {
            return Err(Error::PortState {
                name: name.to_string(),
                reason: "port already exists".into(),
            });
        }
        info!(switch = %self.ctx.name(), port = %name, "port added");

        if config.up {
            port.activate(&self.backend, self.ingress_tx.clone())?;
        }
        Ok(port)
    }

    /// Deactivate and forget a port
    pub async fn remove_port(&self, name: &str) -> Result<()> {
        let port = self.ctx.remove(name).ok_or_else(|| Error::PortNotFound {
            name: name.to_string(),
        })?;
        let result = port.deactivate().await;
        self.ctx.metrics().unregister_port(name);
        info!(switch = %self.ctx.name(), port = %name, "port removed");
        result
    }

    pub fn up_port(&self, name: &str) -> Result<()> {
        let port = self.lookup_port(name)?;
        port.activate(&self.backend, self.ingress_tx.clone())
    }

    pub async fn down_port(&self, name: &str) -> Result<()> {
        let port = self.lookup_port(name)?;
        port.deactivate().await
    }

    /// Stop dispatching, bring every port down, then drain the pipeline.
    /// The first port deactivation error is returned after all steps ran.
    pub async fn stop(&mut self) -> Result<()> {
        info!(switch = %self.ctx.name(), "stopping switch");
        let _ = self.shutdown.send(true);

        let pipeline = match self.dispatch.take() {
            Some(dispatch) => dispatch.await.unwrap_or_else(|e| {
                error!("dispatch loop failed: {}", e);
                None
            }),
            None => None,
        };

        let mut result = Ok(());
        for port in self.ctx.ports() {
            if let Err(e) = port.deactivate().await {
                error!(port = %port.name(), "failed to deactivate port: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        if let Some(pipeline) = pipeline {
            pipeline.shutdown().await;
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("switch task failed: {}", e);
            }
        }

        info!(switch = %self.ctx.name(), "switch stopped");
        result
    }

    fn lookup_port(&self, name: &str) -> Result<Arc<SwitchPort>> {
        self.ctx.port(name).ok_or_else(|| Error::PortNotFound {
            name: name.to_string(),
        })
    }
}

async fn dispatch_loop(
    ctx: Arc<SwitchContext>,
    pipeline: Pipeline,
    mut ingress: mpsc::Receiver<IncomingFrame>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<Pipeline> {
    loop {
        let incoming = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            incoming = ingress.recv() => match incoming {
                Some(incoming) => incoming,
                None => break,
            },
        };

        trace!(
            port = %incoming.in_port.name(),
            src = %incoming.source_addr,
            dst = %incoming.frame.dst,
            vlan = ?incoming.frame.vlan_id(),
            "dispatching frame"
        );
        let msg = ControlMessage::new(incoming, Arc::clone(&ctx));
        if let Err(e) = pipeline.send(msg).await {
            error!("pipeline rejected frame: {}", e);
            return None;
        }
    }

    debug!("dispatch loop stopped");
    Some(pipeline)
}

async fn consumer_loop(ctx: Arc<SwitchContext>, mut output: mpsc::Receiver<ControlMessage>) {
    while let Some(msg) = output.recv().await {
        let frame = &msg.in_frame.frame;
        let mut sent = 0;
        for port in &msg.out_ports {
            if port.enqueue(frame.clone()).await {
                sent += 1;
            }
        }

        if sent > 0 {
            ctx.metrics().frames_forwarded.inc();
        }
        trace!(
            ports = ?msg.out_ports.iter().map(|p| p.name()).collect::<Vec<_>>(),
            sent,
            "frame delivered"
        );
    }
    debug!("consumer loop stopped");
}

async fn aging_loop(
    handle: StageHandle,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    // First tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = interval.tick() => {
                let stage = Arc::clone(&handle.stage);
                if let Err(e) = tokio::task::spawn_blocking(move || stage.run_aging()).await {
                    warn!(stage = %handle.label(), "aging sweep failed: {}", e);
                }
            }
        }
    }
    debug!(stage = %handle.label(), "aging task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MemoryBackend;
    use crate::config::StageConfig;
    use crate::protocol::MacAddr;
    use std::time::Duration;

    fn config(stages: &[(u8, &str)]) -> Config {
        let mut config = crate::config::parse("name = \"sw0\"").unwrap();
        config.control_process = stages
            .iter()
            .map(|(layer, name)| StageConfig {
                layer: *layer,
                name: name.to_string(),
                config_file: None,
            })
            .collect();
        config
    }

    fn access(vlan: u16, up: bool) -> PortConfig {
        PortConfig {
            trunk: false,
            allowed_vlans: vec![vlan],
            up,
        }
    }

    #[test]
    fn test_unknown_stage_is_fatal() {
        let result = Switch::new(
            &config(&[(2, "Hub"), (2, "Bridge")]),
            &StageRegistry::builtin(),
            MemoryBackend::new(),
            Arc::new(MetricsRegistry::new()),
        );
        assert!(matches!(result, Err(Error::UnknownStage { .. })));
    }

    #[tokio::test]
    async fn test_port_management() {
        let backend = MemoryBackend::new();
        let _peer = backend.add_link("eth0");
        let switch = Switch::new(
            &config(&[(2, "Hub")]),
            &StageRegistry::builtin(),
            backend,
            Arc::new(MetricsRegistry::new()),
        )
        .unwrap();

        let port = switch.add_port("eth0", &access(10, false)).unwrap();
        assert!(!port.is_up());
        assert!(switch.add_port("eth0", &access(10, false)).is_err());

        switch.up_port("eth0").unwrap();
        assert_eq!(switch.context().active_ports().len(), 1);
        switch.down_port("eth0").await.unwrap();
        assert!(switch.context().active_ports().is_empty());

        assert!(matches!(
            switch.up_port("eth9"),
            Err(Error::PortNotFound { .. })
        ));
        switch.remove_port("eth0").await.unwrap();
        assert!(switch.port("eth0").is_none());
        assert!(switch.remove_port("eth0").await.is_err());
    }

    #[tokio::test]
    async fn test_hub_end_to_end() {
        let backend = MemoryBackend::new();
        let a = backend.add_link("a");
        let mut b = backend.add_link("b");
        let mut c = backend.add_link("c");

        let mut cfg = config(&[(2, "Hub")]);
        cfg.switch_ports.insert("a".into(), access(1, true));
        cfg.switch_ports.insert("b".into(), access(1, true));
        cfg.switch_ports.insert("c".into(), access(1, true));

        let metrics = Arc::new(MetricsRegistry::new());
        let mut switch =
            Switch::from_config(&cfg, &StageRegistry::builtin(), backend, metrics.clone()).unwrap();
        switch.start().unwrap();

        let frame = EthernetFrame::new(
            MacAddr([2, 0, 0, 0, 0, 2]),
            MacAddr([2, 0, 0, 0, 0, 1]),
            0x88b5,
            vec![0xab; 46],
        );
        a.send(frame.to_bytes()).await.unwrap();

        let wait = Duration::from_secs(2);
        assert_eq!(b.recv_timeout(wait).await.unwrap(), frame.to_bytes());
        assert_eq!(c.recv_timeout(wait).await.unwrap(), frame.to_bytes());

        switch.stop().await.unwrap();
        assert_eq!(metrics.frames_forwarded.get(), 1);
        assert!(switch.context().active_ports().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut switch = Switch::new(
            &config(&[]),
            &StageRegistry::builtin(),
            MemoryBackend::new(),
            Arc::new(MetricsRegistry::new()),
        )
        .unwrap();

        switch.start().unwrap();
        assert!(switch.start().is_err());
        switch.stop().await.unwrap();
    }
}
