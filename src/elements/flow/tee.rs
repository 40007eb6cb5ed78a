//! `tee`: 1-to-N fan-out.
//!
//! Every buffer goes to every `src_%u` pad. Payloads are shared, not copied.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadDirection, PadPresence, PadTemplate};
use crate::error::{FlowError, FlowResult};
use crate::registry::ElementFactory;
use tracing::{debug, trace};

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("tee")
        .metadata("Tee pipe fitting", "Generic", "1-to-N pipe fitting")
        .pad_template(PadTemplate::sink_any())
        .pad_template(PadTemplate::new(
            "src_%u",
            PadDirection::Src,
            PadPresence::Request,
            Caps::new_any(),
        ))
        .build(|| Ok(Box::new(Tee)))
}

/// Fan-out element.
pub(crate) struct Tee;

impl ElementImpl for Tee {
    /// Fails only if every branch failed: unlinked branches are skipped, and
    /// the result is NOT_LINKED only when no branch is linked.
    fn chain(&self, _pad: &Pad, element: &Element, buffer: Buffer) -> FlowResult {
        let mut delivered = false;
        for src in element.src_pads() {
            match src.push(buffer.clone()) {
                Ok(()) => delivered = true,
                Err(FlowError::NotLinked) => {
                    trace!(pad = %src.path_string(), "branch not linked");
                }
                Err(e) => return Err(e),
            }
        }
        if delivered {
            Ok(())
        } else {
            Err(FlowError::NotLinked)
        }
    }

    fn request_pad(&self, element: &Element, pad: &Pad) -> bool {
        debug!(element = %element.name(), pad = %pad.name(), "new branch");
        true
    }
}
