//! Frame pipeline
//!
//! A frame is wrapped in a [`ControlMessage`] and walked up through the
//! configured stages, then back down in reverse order. Stages talk to each
//! other only through the message: its payload, output ports and verdict.

mod engine;
mod message;
mod stage;

pub use engine::{Pipeline, Resume, STAGE_CHANNEL_CAPACITY};
pub use message::{ControlMessage, LayerPayload, NextHop, Verdict};
pub use stage::{Stage, StageContext, StageFactory, StageHandle, StageRegistry};
