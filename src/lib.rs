//! # Pipewright
//!
//! The control layer of a media pipeline: build graphs of elements, link
//! their pads, drive them through a lifecycle state machine and watch what
//! happens on a message bus.
//!
//! ## Features
//!
//! - **Element registry**: create elements by factory name, register your own
//! - **Graphs**: bins nest, pipelines own a bus and a clock
//! - **Launch descriptions**: `fakesrc ! queue ! fakesink` style parsing
//! - **State machine**: NULL, READY, PAUSED and PLAYING, with asynchronous
//!   preroll
//! - **Probes**: observe, drop or block data at any pad
//! - **Devices**: a polling monitor over pluggable providers
//! - **Diagnostics**: Graphviz dumps, `tracing` logs, `metrics` counters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pipewright::prelude::*;
//!
//! pipewright::initialize()?;
//! let pipeline = pipewright::parse::launch_pipeline("fakesrc num-buffers=100 ! fakesink")?;
//! pipeline.set_state(State::Playing)?;
//!
//! let bus = pipeline.bus();
//! while let Some(msg) = bus.timed_pop(ClockTime::NONE) {
//!     match msg.view() {
//!         MessageView::Eos | MessageView::Error(_) => break,
//!         _ => {}
//!     }
//! }
//! pipeline.set_state(State::Null)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod config;
pub mod device;
pub mod element;
mod elements;
pub mod error;
pub mod event;
mod flags;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod runtime;

pub use pipeline::parse;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::Buffer;
    pub use crate::bus::{Bus, Message, MessageTypes, MessageView};
    pub use crate::caps::{Caps, Structure};
    pub use crate::clock::ClockTime;
    pub use crate::device::{Device, DeviceMonitor};
    pub use crate::element::{
        Element, ElementImpl, Pad, PadDirection, ProbeReturn, ProbeType, State, StateChange,
        StateChangeSuccess,
    };
    pub use crate::error::{Error, FlowError, Result};
    pub use crate::event::{Event, SeekFlags};
    pub use crate::pipeline::{Bin, Pipeline};
    pub use crate::registry::{ElementFactory, Registry};
}

pub use error::{Error, Result};
pub use runtime::{initialize, initialize_with, is_initialized, shutdown, version, version_string};
