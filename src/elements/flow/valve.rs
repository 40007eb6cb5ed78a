//! `valve`: an on/off switch for buffer flow.

use crate::buffer::Buffer;
use crate::element::{Element, ElementImpl, Pad, PadTemplate, ParamSpec, PropertyValue};
use crate::error::{FlowError, FlowResult};
use crate::registry::ElementFactory;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("valve")
        .metadata("Valve element", "Filter", "Drop buffers and events or let them through")
        .pad_template(PadTemplate::sink_any())
        .pad_template(PadTemplate::src_any())
        .property(ParamSpec::bool("drop", "Whether to drop buffers", false))
        .build(|| Ok(Box::new(Valve::default())))
}

/// Drops buffers while `drop` is set.
///
/// Events always pass so downstream still sees EOS and flushes.
#[derive(Default)]
pub(crate) struct Valve {
    drop: AtomicBool,
}

impl ElementImpl for Valve {
    fn chain(&self, _pad: &Pad, element: &Element, buffer: Buffer) -> FlowResult {
        if self.drop.load(Ordering::Acquire) {
            return Ok(());
        }
        element
            .static_pad("src")
            .ok_or(FlowError::NotLinked)?
            .push(buffer)
    }

    fn property_changed(&self, element: &Element, name: &str, value: &PropertyValue) {
        if let ("drop", PropertyValue::Bool(drop)) = (name, value) {
            debug!(element = %element.name(), drop, "valve toggled");
            self.drop.store(*drop, Ordering::Release);
        }
    }
}
