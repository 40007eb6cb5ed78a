//! Graph construction: bins, pipelines, launch descriptions and graph dumps.
//!
//! - [`Bin`]: a named collection of elements that is itself an element
//! - [`Pipeline`]: the top-level bin, owning the [`Bus`](crate::bus::Bus)
//!   and the clock
//! - [`parse`]: building graphs from `fakesrc ! identity ! fakesink`
//!   style descriptions
//! - [`debug_bin_to_dot_data`]: Graphviz export
//!
//! # Example
//!
//! ```rust,ignore
//! use pipewright::prelude::*;
//!
//! pipewright::initialize()?;
//! let pipeline = Pipeline::new(None);
//! let src = ElementFactory::make("fakesrc", None)?;
//! let sink = ElementFactory::make("fakesink", None)?;
//! pipeline.add_many(&[&src, &sink])?;
//! src.link(&sink)?;
//! pipeline.set_state(State::Playing)?;
//! ```

pub(crate) mod bin;
mod dot;
mod graph;
pub mod parse;

pub use bin::{Bin, Pipeline};
pub use dot::{DebugGraphDetails, debug_bin_to_dot_data, debug_bin_to_dot_file};
pub use parse::{launch, launch_pipeline};
