//! Staged pipeline engine
//!
//! Every stage gets two worker threads, one per direction, linked by
//! bounded channels:
//!
//! ```text
//! input -> in[0] -> in[1] -> ... -> in[n-1]
//!            |        |                |
//! output <- eg[0] <- eg[1] <- ... <- eg[n-1]
//! ```
//!
//! A message leaves ingress for egress at the last stage, or earlier at the
//! stage that marks it finished. A drop verdict ends it wherever it is.
//! Each worker handles its messages in arrival order, so frames keep the
//! order they were submitted in. A parked message leaves that order: its
//! stage sends it on whenever it is ready, while the worker moves on.

use super::message::{ControlMessage, Verdict};
use super::stage::StageHandle;
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Capacity of each inter-stage channel
pub const STAGE_CHANNEL_CAPACITY: usize = 64;

/// Hands a parked message to the worker it would have reached next.
///
/// Holds only a weak link to that worker, so parked messages never keep a
/// stopping pipeline alive.
#[derive(Clone)]
pub struct Resume {
    next: mpsc::WeakSender<ControlMessage>,
    stage: String,
    metrics: Arc<MetricsRegistry>,
}

impl Resume {
    /// Send `msg` on with a `Continue` verdict. Blocks while the next
    /// channel is full, so call it from a plain thread, never from async
    /// code. Returns false if the pipeline has stopped.
    pub fn send(&self, mut msg: ControlMessage) -> bool {
        msg.verdict = Verdict::Continue;
        let delivered = self
            .next
            .upgrade()
            .is_some_and(|next| next.blocking_send(msg).is_ok());
        if !delivered {
            debug!(stage = %self.stage, "pipeline gone, parked frame lost");
            self.metrics.frames_dropped.inc();
        }
        delivered
    }

    #[cfg(test)]
    pub(crate) fn to_channel_for_test(
        next: &mpsc::Sender<ControlMessage>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            next: next.downgrade(),
            stage: "test".to_string(),
            metrics,
        }
    }

    /// Give up on a parked message
    pub fn discard(&self, msg: ControlMessage) {
        trace!(stage = %self.stage, "parked frame dropped");
        self.metrics.frames_dropped.inc();
        drop(msg);
    }
}

impl std::fmt::Debug for Resume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Resume").field(&self.stage).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ingress,
    Egress,
}

struct Worker {
    handle: StageHandle,
    direction: Direction,
    rx: mpsc::Receiver<ControlMessage>,
    /// Next stage in the same direction (ingress k+1, egress k-1 or the output)
    next: Option<mpsc::Sender<ControlMessage>>,
    /// Ingress only: this stage's egress worker
    turnaround: Option<mpsc::Sender<ControlMessage>>,
    metrics: Arc<MetricsRegistry>,
}

impl Worker {
    fn run(mut self) {
        let label = self.handle.label();
        while let Some(mut msg) = self.rx.blocking_recv() {
            match self.direction {
                Direction::Ingress => self.handle.stage.ingress(&mut msg),
                Direction::Egress => self.handle.stage.egress(&mut msg),
            }

            if msg.verdict == Verdict::Drop {
                trace!(stage = %label, direction = ?self.direction, "frame dropped");
                self.metrics.frames_dropped.inc();
                continue;
            }

            let target = match (self.direction, msg.verdict) {
                (Direction::Ingress, Verdict::Finished) => self.turnaround.as_ref(),
                _ => self.next.as_ref().or(self.turnaround.as_ref()),
            };
            let Some(target) = target else {
                continue;
            };

            if msg.verdict == Verdict::Parked {
                trace!(stage = %label, direction = ?self.direction, "frame parked");
                let resume = Resume {
                    next: target.downgrade(),
                    stage: label.clone(),
                    metrics: Arc::clone(&self.metrics),
                };
                self.handle.stage.park(msg, resume);
                continue;
            }

            if target.blocking_send(msg).is_err() {
                debug!(stage = %label, "downstream closed");
                break;
            }
        }
        trace!(stage = %label, direction = ?self.direction, "worker stopped");
    }
}

/// Running pipeline
pub struct Pipeline {
    input: Option<mpsc::Sender<ControlMessage>>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the workers for `stages` in traversal order. Fully traversed
    /// messages are delivered to `output`.
    pub fn start(
        stages: &[StageHandle],
        output: mpsc::Sender<ControlMessage>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        if stages.is_empty() {
            return Ok(Self {
                input: Some(output),
                workers: Vec::new(),
            });
        }

        let (ingress_tx, ingress_rx): (Vec<_>, Vec<_>) = stages
            .iter()
            .map(|_| mpsc::channel(STAGE_CHANNEL_CAPACITY))
            .unzip();
        let (egress_tx, egress_rx): (Vec<_>, Vec<_>) = stages
            .iter()
            .map(|_| mpsc::channel(STAGE_CHANNEL_CAPACITY))
            .unzip();

        let input = ingress_tx[0].clone();
        let mut pending = Vec::with_capacity(stages.len() * 2);

        for (k, (handle, (in_rx, eg_rx))) in stages
            .iter()
            .zip(ingress_rx.into_iter().zip(egress_rx))
            .enumerate()
        {
            pending.push(Worker {
                handle: handle.clone(),
                direction: Direction::Ingress,
                rx: in_rx,
                next: ingress_tx.get(k + 1).cloned(),
                turnaround: Some(egress_tx[k].clone()),
                metrics: Arc::clone(&metrics),
            });
            pending.push(Worker {
                handle: handle.clone(),
                direction: Direction::Egress,
                rx: eg_rx,
                next: Some(match k {
                    0 => output.clone(),
                    _ => egress_tx[k - 1].clone(),
                }),
                turnaround: None,
                metrics: Arc::clone(&metrics),
            });
        }

        // Workers now hold the only senders besides `input`, so closing the
        // input lets the shutdown cascade through every stage.
        drop(ingress_tx);
        drop(egress_tx);
        drop(output);

        let mut pipeline = Self {
            input: Some(input),
            workers: Vec::with_capacity(pending.len()),
        };
        for worker in pending {
            let suffix = match worker.direction {
                Direction::Ingress => "in",
                Direction::Egress => "out",
            };
            let name = format!("{}-{}", worker.handle.label(), suffix);
            match thread::Builder::new().name(name).spawn(move || worker.run()) {
                Ok(join) => pipeline.workers.push(join),
                Err(e) => {
                    // Dropping the pipeline closes the input and unwinds the started workers
                    pipeline.input = None;
                    return Err(Error::Io(e));
                }
            }
        }

        debug!(stages = stages.len(), "pipeline started");
        Ok(pipeline)
    }

    /// Submit a message for ingress traversal
    pub async fn send(&self, msg: ControlMessage) -> Result<()> {
        let input = self
            .input
            .as_ref()
            .ok_or(Error::ChannelClosed("pipeline input"))?;
        input
            .send(msg)
            .await
            .map_err(|_| Error::ChannelClosed("pipeline input"))
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close the input and wait for every worker to drain and exit
    pub async fn shutdown(mut self) {
        self.input = None;
        let workers = std::mem::take(&mut self.workers);

        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let name = worker.thread().name().map(str::to_string);
                if worker.join().is_err() {
                    error!(worker = ?name, "pipeline worker panicked");
                }
            }
        })
        .await;

        if let Err(e) = joined {
            error!("pipeline shutdown failed: {}", e);
        }
        debug!("pipeline stopped");
    }
}
