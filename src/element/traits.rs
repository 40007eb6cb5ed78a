//! The trait element implementations provide.

use super::pad::{Pad, PadDirection};
use super::property::PropertyValue;
use super::state::{StateChange, StateChangeSuccess};
use super::Element;
use crate::buffer::Buffer;
use crate::clock::ClockTime;
use crate::error::{FlowError, FlowResult, Result};
use crate::event::Event;

/// Behaviour of a leaf element.
///
/// The runtime owns the element handle, its pads, properties and state
/// machine; an implementation only reacts to the hooks below. Every hook gets
/// the [`Element`] it belongs to so it can reach its pads, read properties
/// and post messages.
///
/// Hooks run on whatever thread drives them: state changes on the thread
/// that requested them, `chain` and events on streaming threads.
///
/// # Design
///
/// Data processing is synchronous: `chain` returns once the buffer has been
/// handled (or handed to another thread, as `queue` does). Implementations
/// that produce data on their own spawn a [`Task`](crate::element::Task) in
/// their READY to PAUSED transition and stop it in PAUSED to READY.
pub trait ElementImpl: Send + Sync + 'static {
    /// Called once after the element and its always-pads exist.
    fn constructed(&self, _element: &Element) {}

    /// Perform one state step.
    ///
    /// Return `Async` when the step completes later; then call
    /// [`Element::continue_state`] once it has.
    fn change_state(
        &self,
        _element: &Element,
        _transition: StateChange,
    ) -> Result<StateChangeSuccess> {
        Ok(StateChangeSuccess::Success)
    }

    /// A buffer arrived on sink pad `pad`.
    fn chain(&self, pad: &Pad, _element: &Element, _buffer: Buffer) -> FlowResult {
        tracing::warn!(pad = %pad.path_string(), "element does not accept buffers");
        Err(FlowError::Error)
    }

    /// An event arrived on sink pad `pad`. Forwards downstream by default.
    fn sink_event(&self, _pad: &Pad, element: &Element, event: Event) -> bool {
        element.forward_event(PadDirection::Src, event)
    }

    /// An upstream event arrived on source pad `pad`. Forwards upstream by
    /// default.
    fn src_event(&self, _pad: &Pad, element: &Element, event: Event) -> bool {
        element.forward_event(PadDirection::Sink, event)
    }

    /// An event was sent to the element itself.
    fn send_event(&self, element: &Element, event: Event) -> bool {
        element.default_send_event(event)
    }

    /// A request pad is about to be added. Return `false` to refuse it.
    fn request_pad(&self, _element: &Element, _pad: &Pad) -> bool {
        true
    }

    /// A request pad was released.
    fn release_pad(&self, _element: &Element, _pad: &Pad) {}

    /// Current position, for position queries.
    fn query_position(&self, _element: &Element) -> Option<ClockTime> {
        None
    }

    /// Stream duration, for duration queries.
    fn query_duration(&self, _element: &Element) -> Option<ClockTime> {
        None
    }

    /// Value of a property computed by the element (for example a counter).
    /// `None` falls back to the stored value.
    fn property(&self, _element: &Element, _name: &str) -> Option<PropertyValue> {
        None
    }

    /// A property was set.
    fn property_changed(&self, _element: &Element, _name: &str, _value: &PropertyValue) {}
}
