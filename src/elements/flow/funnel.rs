//! `funnel`: N-to-1 merge.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadDirection, PadPresence, PadTemplate};
use crate::error::{FlowError, FlowResult};
use crate::event::Event;
use crate::registry::ElementFactory;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::debug;

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("funnel")
        .metadata("Funnel pipe fitting", "Generic", "N-to-1 pipe fitting")
        .pad_template(PadTemplate::new(
            "sink_%u",
            PadDirection::Sink,
            PadPresence::Request,
            Caps::new_any(),
        ))
        .pad_template(PadTemplate::src_any())
        .build(|| Ok(Box::new(Funnel::default())))
}

/// Merges all inputs into one output.
///
/// Pushes are serialized. EOS goes downstream once, after every input saw
/// it.
#[derive(Default)]
pub(crate) struct Funnel {
    stream_lock: Mutex<()>,
    /// Names of the sink pads that received EOS.
    eos: Mutex<HashSet<String>>,
}

impl Funnel {
    fn all_eos(&self, element: &Element) -> bool {
        let eos = self.eos.lock();
        let sinks = element.sink_pads();
        !sinks.is_empty() && sinks.iter().all(|p| eos.contains(p.name()))
    }

    fn forward_eos(&self, element: &Element) -> bool {
        debug!(element = %element.name(), "all inputs are EOS");
        let _stream = self.stream_lock.lock();
        element.forward_event(PadDirection::Src, Event::Eos)
    }
}

impl ElementImpl for Funnel {
    fn chain(&self, _pad: &Pad, element: &Element, buffer: Buffer) -> FlowResult {
        let src = element.static_pad("src").ok_or(FlowError::NotLinked)?;
        let _stream = self.stream_lock.lock();
        src.push(buffer)
    }

    fn sink_event(&self, pad: &Pad, element: &Element, event: Event) -> bool {
        match event {
            Event::Eos => {
                self.eos.lock().insert(pad.name().to_string());
                if self.all_eos(element) {
                    return self.forward_eos(element);
                }
                true
            }
            Event::FlushStop { .. } => {
                self.eos.lock().remove(pad.name());
                element.forward_event(PadDirection::Src, event)
            }
            Event::FlushStart => element.forward_event(PadDirection::Src, event),
            event => {
                let _stream = self.stream_lock.lock();
                element.forward_event(PadDirection::Src, event)
            }
        }
    }

    fn release_pad(&self, element: &Element, pad: &Pad) {
        let was_eos = self.eos.lock().remove(pad.name());
        if !was_eos && self.all_eos(element) {
            self.forward_eos(element);
        }
    }
}
