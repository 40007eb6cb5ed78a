//! Test sources and sinks.

mod fakesink;
mod fakesrc;

pub(crate) use fakesink::factory as fakesink_factory;
pub(crate) use fakesrc::factory as fakesrc_factory;
