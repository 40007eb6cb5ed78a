//! `capsfilter`: restricts the format flowing through it.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, Pad, PadTemplate, ParamSpec, PropertyValue};
use crate::error::{FlowError, FlowResult};
use crate::registry::ElementFactory;
use tracing::debug;

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("capsfilter")
        .metadata("CapsFilter", "Generic", "Pass data without modification, limiting formats")
        .pad_template(PadTemplate::sink_any())
        .pad_template(PadTemplate::src_any())
        .property(ParamSpec::caps("caps", "Restrict the possible allowed formats", Caps::new_any()))
        .build(|| Ok(Box::new(CapsFilter)))
}

/// Pass-through element whose pads only accept the configured caps.
pub(crate) struct CapsFilter;

impl ElementImpl for CapsFilter {
    fn constructed(&self, element: &Element) {
        let caps: Caps = element.property("caps");
        restrict(element, &caps);
    }

    fn chain(&self, _pad: &Pad, element: &Element, buffer: Buffer) -> FlowResult {
        element
            .static_pad("src")
            .ok_or(FlowError::NotLinked)?
            .push(buffer)
    }

    fn property_changed(&self, element: &Element, name: &str, value: &PropertyValue) {
        if let ("caps", PropertyValue::Caps(caps)) = (name, value) {
            debug!(element = %element.name(), %caps, "restricting caps");
            restrict(element, caps);
        }
    }
}

fn restrict(element: &Element, caps: &Caps) {
    for pad in element.pads() {
        pad.set_caps(caps.clone());
    }
}

#[cfg(test)]
mod tests {
    use crate::caps::Caps;
    use crate::config::RuntimeConfig;
    use crate::registry::ElementFactory;
    use crate::runtime;

    #[test]
    fn test_caps_restrict_links() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        let filter = ElementFactory::make("capsfilter", None).unwrap();
        let caps: Caps = "video/x-raw, width=(int)320".parse().unwrap();
        filter.set_property("caps", &caps).unwrap();
        assert_eq!(filter.static_pad("sink").unwrap().caps(), caps);

        let src = ElementFactory::make("fakesrc", None).unwrap();
        let audio: Caps = "audio/x-raw".parse().unwrap();
        src.static_pad("src").unwrap().set_caps(audio);
        assert!(src.link(&filter).is_err());

        let other = ElementFactory::make("fakesrc", None).unwrap();
        assert!(other.link(&filter).is_ok());
    }
}
