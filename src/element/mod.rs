//! Elements: the nodes of a pipeline graph.
//!
//! An [`Element`] is a cheap, clonable handle. Leaf elements get their
//! behaviour from an [`ElementImpl`]; containers ([`Bin`], [`Pipeline`]) are
//! elements too, so graphs nest.
//!
//! # State machine
//!
//! Every element walks `NULL -> READY -> PAUSED -> PLAYING` one step at a
//! time toward its target. A step either completes synchronously or returns
//! `Async`; an asynchronous step is finished later with
//! [`Element::continue_state`], usually from a streaming thread, and the walk
//! then resumes on that thread. Containers change their children sinks
//! first and only commit a step once every child has.
//!
//! No lock is held while an element's `change_state` runs, so streaming
//! threads can always commit, post messages and exit while a control thread
//! tears the graph down.
//!
//! [`Bin`]: crate::pipeline::Bin
//! [`Pipeline`]: crate::pipeline::Pipeline

pub mod pad;
pub mod probe;
pub mod property;
mod state;
mod task;
mod traits;

pub use pad::{Pad, PadDirection, PadPresence, PadTemplate, WeakPad};
pub use probe::{BlockHandle, ProbeData, ProbeId, ProbeInfo, ProbeReturn, ProbeType};
pub use property::{FromProperty, ParamKind, ParamSpec, PropertyValue, ToProperty};
pub use state::{State, StateChange, StateChangeSuccess};
pub use task::Task;
pub use traits::ElementImpl;

pub(crate) use state::LastReturn;

use crate::buffer::Buffer;
use crate::bus::Message;
use crate::clock::{Clock, ClockTime};
use crate::error::{Error, FlowResult, Result};
use crate::event::{Event, SeekEvent, SeekFlags};
use crate::observability;
use crate::pipeline::bin::{self, BinData};
use crate::pipeline::{Bin, Pipeline};
use crate::registry::{ElementFactory, ElementFlags};
use parking_lot::Mutex;
use property::PropertyStore;
use state::StateCell;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

pub(crate) enum ElementKind {
    Leaf(Box<dyn ElementImpl>),
    Bin(BinData),
}

pub(crate) struct ElementInner {
    name: String,
    factory: Arc<ElementFactory>,
    kind: ElementKind,
    parent: Mutex<Option<Weak<ElementInner>>>,
    pads: Mutex<Vec<Pad>>,
    state: StateCell,
    properties: PropertyStore,
    clock: Mutex<Option<Arc<dyn Clock>>>,
}

/// Handle to an element; clones refer to the same element.
#[derive(Clone)]
pub struct Element(pub(crate) Arc<ElementInner>);

/// Weak element reference, used for parents, pad owners and message
/// sources so that the graph has no reference cycles.
#[derive(Clone, Default)]
pub struct WeakElement(Weak<ElementInner>);

impl WeakElement {
    /// A reference to nothing.
    pub fn new() -> Self {
        Self(Weak::new())
    }

    /// Get the element if it still exists.
    pub fn upgrade(&self) -> Option<Element> {
        self.0.upgrade().map(Element)
    }
}

impl fmt::Debug for WeakElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(e) => write!(f, "WeakElement({})", e.name()),
            None => write!(f, "WeakElement(<gone>)"),
        }
    }
}

impl Element {
    pub(crate) fn new(factory: Arc<ElementFactory>, name: String, kind: ElementKind) -> Element {
        let properties = PropertyStore::from_specs(factory.properties());
        let element = Element(Arc::new(ElementInner {
            name,
            factory,
            kind,
            parent: Mutex::new(None),
            pads: Mutex::new(Vec::new()),
            state: StateCell::new(),
            properties,
            clock: Mutex::new(None),
        }));

        let always: Vec<Pad> = element
            .0
            .factory
            .pad_templates()
            .iter()
            .filter(|t| t.presence() == PadPresence::Always)
            .map(|t| Pad::new(t.name_template().to_string(), t.clone(), element.downgrade()))
            .collect();
        element.0.pads.lock().extend(always);

        if let ElementKind::Leaf(imp) = &element.0.kind {
            imp.constructed(&element);
        }
        element
    }

    /// Instance name, unique among the element's siblings.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Factory the element was made from.
    pub fn factory(&self) -> &Arc<ElementFactory> {
        &self.0.factory
    }

    /// Name of the factory the element was made from.
    pub fn factory_name(&self) -> &str {
        self.0.factory.name()
    }

    /// Weak reference.
    pub fn downgrade(&self) -> WeakElement {
        WeakElement(Arc::downgrade(&self.0))
    }

    /// Whether the element is a container.
    pub fn is_bin(&self) -> bool {
        matches!(self.0.kind, ElementKind::Bin(_))
    }

    /// Whether the element is a top-level pipeline.
    pub fn is_pipeline(&self) -> bool {
        self.bin_data().is_some_and(BinData::is_pipeline)
    }

    /// View as a bin.
    pub fn as_bin(&self) -> Option<Bin> {
        self.is_bin().then(|| Bin::from_element(self.clone()))
    }

    /// View as a pipeline.
    pub fn as_pipeline(&self) -> Option<Pipeline> {
        self.is_pipeline()
            .then(|| Pipeline::from_element(self.clone()))
    }

    pub(crate) fn bin_data(&self) -> Option<&BinData> {
        match &self.0.kind {
            ElementKind::Bin(data) => Some(data),
            ElementKind::Leaf(_) => None,
        }
    }

    fn imp(&self) -> Option<&dyn ElementImpl> {
        match &self.0.kind {
            ElementKind::Leaf(imp) => Some(imp.as_ref()),
            ElementKind::Bin(_) => None,
        }
    }

    /// Whether the element consumes data without producing any.
    pub fn is_sink(&self) -> bool {
        match self.bin_data() {
            Some(data) => data.children().iter().any(Element::is_sink),
            None => self.0.factory.flags().contains(ElementFlags::SINK),
        }
    }

    /// Whether the element produces data without consuming any.
    pub fn is_source(&self) -> bool {
        match self.bin_data() {
            Some(data) => data.children().iter().any(Element::is_source),
            None => self.0.factory.flags().contains(ElementFlags::SOURCE),
        }
    }

    /// Containing bin.
    pub fn parent(&self) -> Option<Element> {
        self.0
            .parent
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Element)
    }

    pub(crate) fn has_parent(&self) -> bool {
        self.0
            .parent
            .lock()
            .as_ref()
            .is_some_and(|p| p.strong_count() > 0)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) {
        *self.0.parent.lock() = parent.map(|p| Arc::downgrade(&p.0));
    }

    /// Set the parent unless a live one is already set.
    pub(crate) fn adopt(&self, parent: &Element) -> Result<()> {
        let mut slot = self.0.parent.lock();
        if let Some(existing) = slot.as_ref().and_then(Weak::upgrade) {
            return Err(Error::AlreadyOwned {
                element: self.name().to_string(),
                parent: existing.name.clone(),
            });
        }
        *slot = Some(Arc::downgrade(&parent.0));
        Ok(())
    }

    /// Whether `self` is `other` or contains it.
    pub(crate) fn is_ancestor_of(&self, other: &Element) -> bool {
        let mut current = Some(other.clone());
        while let Some(e) = current {
            if e == *self {
                return true;
            }
            current = e.parent();
        }
        false
    }

    // ------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------

    /// All pads.
    pub fn pads(&self) -> Vec<Pad> {
        self.0.pads.lock().clone()
    }

    /// Source pads.
    pub fn src_pads(&self) -> Vec<Pad> {
        self.pads_in(PadDirection::Src)
    }

    /// Sink pads.
    pub fn sink_pads(&self) -> Vec<Pad> {
        self.pads_in(PadDirection::Sink)
    }

    fn pads_in(&self, direction: PadDirection) -> Vec<Pad> {
        self.0
            .pads
            .lock()
            .iter()
            .filter(|p| p.direction() == direction)
            .cloned()
            .collect()
    }

    /// Pad by name.
    pub fn static_pad(&self, name: &str) -> Option<Pad> {
        self.0.pads.lock().iter().find(|p| p.name() == name).cloned()
    }

    /// Request a new pad from the template `template_name` (e.g. `src_%u`),
    /// or a specific pad name matching a request template (e.g. `src_3`).
    pub fn request_pad_simple(&self, template_name: &str) -> Result<Pad> {
        let unavailable = || Error::PadUnavailable {
            element: self.name().to_string(),
            template: template_name.to_string(),
        };
        let imp = self.imp().ok_or_else(unavailable)?;

        let templates = self.0.factory.pad_templates();
        let (template, explicit) = templates
            .iter()
            .filter(|t| t.presence() == PadPresence::Request)
            .find_map(|t| {
                if t.name_template() == template_name {
                    Some((t, None))
                } else if t.matches_name(template_name) {
                    Some((t, Some(template_name)))
                } else {
                    None
                }
            })
            .ok_or_else(unavailable)?;

        let pad = {
            let mut pads = self.0.pads.lock();
            let name = match explicit {
                Some(name) if pads.iter().any(|p| p.name() == name) => return Err(unavailable()),
                Some(name) => name.to_string(),
                None => (0..=u32::MAX)
                    .map(|n| template.name_for(n))
                    .find(|candidate| pads.iter().all(|p| p.name() != candidate))
                    .ok_or_else(unavailable)?,
            };
            let pad = Pad::new(name, template.clone(), self.downgrade());
            pads.push(pad.clone());
            pad
        };

        if !imp.request_pad(self, &pad) {
            self.0.pads.lock().retain(|p| p != &pad);
            return Err(unavailable());
        }
        debug!(element = %self.name(), pad = %pad.name(), "requested pad");
        Ok(pad)
    }

    /// Release a pad obtained with [`Element::request_pad_simple`].
    ///
    /// The pad is unlinked first. Static pads cannot be released.
    pub fn release_request_pad(&self, pad: &Pad) -> Result<()> {
        if !pad.is_request() {
            return Err(Error::NotRequestPad(pad.path_string()));
        }
        let removed = {
            let mut pads = self.0.pads.lock();
            let before = pads.len();
            pads.retain(|p| p != pad);
            pads.len() != before
        };
        if !removed {
            return Err(Error::PadNotFound {
                element: self.name().to_string(),
                pad: pad.name().to_string(),
            });
        }

        if let Some(peer) = pad.peer() {
            let _ = match pad.direction() {
                PadDirection::Src => pad.unlink(&peer),
                PadDirection::Sink => peer.unlink(pad),
            };
        }
        pad.set_flushing(true);
        if let Some(imp) = self.imp() {
            imp.release_pad(self, pad);
        }
        debug!(element = %self.name(), pad = %pad.name(), "released pad");
        Ok(())
    }

    /// Link this element to `dest`, picking free pads or requesting them.
    pub fn link(&self, dest: &Element) -> Result<()> {
        self.link_pads(None, dest, None)
    }

    /// Link `self` to `dest` through the named pads; `None` picks a pad.
    ///
    /// Pads requested for the link are released again if it fails.
    pub fn link_pads(&self, src_pad: Option<&str>, dest: &Element, sink_pad: Option<&str>) -> Result<()> {
        let (src, src_requested) = self.pad_for_link(PadDirection::Src, src_pad, None)?;
        let sink_caps = src.caps();
        let (sink, sink_requested) = match dest.pad_for_link(PadDirection::Sink, sink_pad, Some(&sink_caps)) {
            Ok(found) => found,
            Err(e) => {
                if src_requested {
                    let _ = self.release_request_pad(&src);
                }
                return Err(e);
            }
        };

        match src.link(&sink) {
            Ok(()) => Ok(()),
            Err(e) => {
                if src_requested {
                    let _ = self.release_request_pad(&src);
                }
                if sink_requested {
                    let _ = dest.release_request_pad(&sink);
                }
                Err(e)
            }
        }
    }

    /// Link a chain of elements: `a ! b ! c`.
    pub fn link_many(elements: &[&Element]) -> Result<()> {
        for pair in elements.windows(2) {
            pair[0].link(pair[1])?;
        }
        Ok(())
    }

    /// Remove every link from `self` to `dest`, releasing request pads.
    pub fn unlink(&self, dest: &Element) {
        for src in self.src_pads() {
            let Some(sink) = src.peer() else { continue };
            if sink.parent_element().as_ref() != Some(dest) {
                continue;
            }
            if src.unlink(&sink).is_ok() {
                if src.is_request() {
                    let _ = self.release_request_pad(&src);
                }
                if sink.is_request() {
                    let _ = dest.release_request_pad(&sink);
                }
            }
        }
    }

    /// Find or request a pad for linking; the flag tells whether it was
    /// requested.
    fn pad_for_link(
        &self,
        direction: PadDirection,
        name: Option<&str>,
        compatible_with: Option<&crate::caps::Caps>,
    ) -> Result<(Pad, bool)> {
        if let Some(name) = name {
            if let Some(pad) = self.static_pad(name) {
                return Ok((pad, false));
            }
            return match self.request_pad_simple(name) {
                Ok(pad) if pad.direction() == direction => Ok((pad, true)),
                Ok(pad) => {
                    let _ = self.release_request_pad(&pad);
                    Err(self.pad_not_found(name))
                }
                Err(_) => Err(self.pad_not_found(name)),
            };
        }

        let free = self.pads_in(direction).into_iter().find(|p| {
            !p.is_linked()
                && !p.is_request()
                && compatible_with.is_none_or(|caps| caps.can_intersect(&p.caps()))
        });
        if let Some(pad) = free {
            return Ok((pad, false));
        }

        let template = self
            .0
            .factory
            .pad_templates()
            .iter()
            .find(|t| t.direction() == direction && t.presence() == PadPresence::Request)
            .map(|t| t.name_template().to_string());
        match template {
            Some(template) => self.request_pad_simple(&template).map(|p| (p, true)),
            None => Err(Error::PadUnavailable {
                element: self.name().to_string(),
                template: match direction {
                    PadDirection::Src => "src".to_string(),
                    PadDirection::Sink => "sink".to_string(),
                },
            }),
        }
    }

    fn pad_not_found(&self, pad: &str) -> Error {
        Error::PadNotFound {
            element: self.name().to_string(),
            pad: pad.to_string(),
        }
    }

    /// Whether any pad is linked.
    pub(crate) fn is_linked(&self) -> bool {
        self.0.pads.lock().iter().any(Pad::is_linked)
    }

    fn set_pads_flushing(&self, flushing: bool) {
        for pad in self.pads() {
            pad.set_flushing(flushing);
        }
    }

    pub(crate) fn chain_impl(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        match self.imp() {
            Some(imp) => imp.chain(pad, self, buffer),
            None => Err(crate::error::FlowError::Error),
        }
    }

    pub(crate) fn sink_event_impl(&self, pad: &Pad, event: Event) -> bool {
        trace!(pad = %pad.path_string(), event = event.name(), "sink event");
        self.imp().is_some_and(|imp| imp.sink_event(pad, self, event))
    }

    pub(crate) fn src_event_impl(&self, pad: &Pad, event: Event) -> bool {
        trace!(pad = %pad.path_string(), event = event.name(), "src event");
        self.imp().is_some_and(|imp| imp.src_event(pad, self, event))
    }

    /// Push `event` out of every pad of `direction`; true if all pads
    /// handled it (or there were none).
    pub fn forward_event(&self, direction: PadDirection, event: Event) -> bool {
        let pads = self.pads_in(direction);
        let mut handled = true;
        for pad in pads {
            if pad.is_linked() {
                handled &= pad.push_event(event.clone());
            }
        }
        handled
    }

    // ------------------------------------------------------------------
    // Events, queries and seeking
    // ------------------------------------------------------------------

    /// Send an event to the element.
    ///
    /// Bins send upstream events (seeks) to their sinks and downstream
    /// events to their sources.
    pub fn send_event(&self, event: Event) -> bool {
        match &self.0.kind {
            ElementKind::Leaf(imp) => imp.send_event(self, event),
            ElementKind::Bin(data) => {
                let targets: Vec<Element> = data
                    .children()
                    .into_iter()
                    .filter(|c| if event.is_upstream() { c.is_sink() } else { c.is_source() })
                    .collect();
                let mut handled = false;
                for child in targets {
                    handled |= child.send_event(event.clone());
                }
                handled
            }
        }
    }

    /// What [`ElementImpl::send_event`] does unless overridden: upstream
    /// events leave through the sink pads (or are handled as if they arrived
    /// on a source pad when there are none), downstream events leave
    /// through the source pads.
    pub fn default_send_event(&self, event: Event) -> bool {
        if event.is_upstream() {
            let sinks = self.sink_pads();
            if sinks.is_empty() {
                return match self.src_pads().first() {
                    Some(pad) => self.src_event_impl(pad, event),
                    None => false,
                };
            }
            sinks
                .iter()
                .fold(false, |acc, pad| pad.push_event(event.clone()) || acc)
        } else {
            self.src_pads()
                .iter()
                .fold(false, |acc, pad| pad.push_event(event.clone()) || acc)
        }
    }

    /// Current position in the stream.
    ///
    /// Bins answer with the largest position of their sinks.
    pub fn query_position(&self) -> Option<ClockTime> {
        match &self.0.kind {
            ElementKind::Leaf(imp) => imp.query_position(self),
            ElementKind::Bin(data) => data
                .children()
                .iter()
                .filter(|c| c.is_sink())
                .filter_map(Element::query_position)
                .max(),
        }
    }

    /// Total stream duration.
    ///
    /// Bins answer with the largest duration of their sources.
    pub fn query_duration(&self) -> Option<ClockTime> {
        match &self.0.kind {
            ElementKind::Leaf(imp) => imp.query_duration(self),
            ElementKind::Bin(data) => data
                .children()
                .iter()
                .filter(|c| c.is_source())
                .filter_map(Element::query_duration)
                .max(),
        }
    }

    /// Seek to `start` (and optionally stop at `stop`).
    ///
    /// Needs at least PAUSED; fails if no element handled the request.
    pub fn seek(&self, rate: f64, flags: SeekFlags, start: ClockTime, stop: ClockTime) -> Result<()> {
        let seek_error = |reason: &str| Error::Seek {
            element: self.name().to_string(),
            reason: reason.to_string(),
        };
        if rate == 0.0 {
            return Err(seek_error("rate must not be zero"));
        }
        if self.current_state() < State::Paused {
            return Err(seek_error("element must be PAUSED or PLAYING"));
        }
        debug!(element = %self.name(), %start, ?flags, rate, "seeking");
        if self.send_event(Event::Seek(SeekEvent::new(rate, flags, start, stop))) {
            Ok(())
        } else {
            Err(seek_error("no element handled the seek"))
        }
    }

    /// Seek to `position` at normal rate.
    pub fn seek_simple(&self, flags: SeekFlags, position: ClockTime) -> Result<()> {
        self.seek(1.0, flags, position, ClockTime::NONE)
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Declared properties.
    pub fn list_properties(&self) -> &[ParamSpec] {
        self.0.factory.properties()
    }

    /// Declaration of property `name`.
    pub fn find_property(&self, name: &str) -> Option<&ParamSpec> {
        self.0.factory.properties().iter().find(|p| p.name() == name)
    }

    /// Raw property value; `name` is always available.
    pub fn property_value(&self, name: &str) -> Option<PropertyValue> {
        if name == "name" {
            return Some(PropertyValue::String(self.name().to_string()));
        }
        self.find_property(name)?;
        self.imp()
            .and_then(|imp| imp.property(self, name))
            .or_else(|| self.0.properties.get(name))
    }

    /// Read a property, failing on unknown names or other types.
    pub fn try_property<T: FromProperty>(&self, name: &str) -> Result<T> {
        let value = self
            .property_value(name)
            .ok_or_else(|| Error::property(self.name(), name, "no such property"))?;
        T::from_property(&value).ok_or_else(|| {
            Error::property(
                self.name(),
                name,
                format!("cannot read {} value as requested type", value.type_name()),
            )
        })
    }

    /// Read a property.
    ///
    /// Unknown names and type mismatches are logged and yield the type's
    /// default value.
    pub fn property<T: FromProperty>(&self, name: &str) -> T {
        self.try_property(name).unwrap_or_else(|e| {
            warn!(element = %self.name(), property = name, error = %e, "property read failed");
            T::default()
        })
    }

    /// Set a property.
    pub fn set_property<T: ToProperty>(&self, name: &str, value: T) -> Result<()> {
        self.store_property(name, value.to_property())
    }

    /// Set a property from its textual form.
    pub fn set_property_from_str(&self, name: &str, value: &str) -> Result<()> {
        let spec = self
            .find_property(name)
            .ok_or_else(|| Error::property(self.name(), name, "no such property"))?;
        let parsed = spec
            .parse_value(value)
            .map_err(|reason| Error::property(self.name(), name, reason))?;
        self.store_property(name, parsed)
    }

    fn store_property(&self, name: &str, value: PropertyValue) -> Result<()> {
        let spec = self
            .find_property(name)
            .ok_or_else(|| Error::property(self.name(), name, "no such property"))?;
        if !spec.is_writable() {
            return Err(Error::property(self.name(), name, "property is read-only"));
        }
        let value = spec
            .coerce(value)
            .map_err(|reason| Error::property(self.name(), name, reason))?;
        let key = spec.name();
        trace!(element = %self.name(), property = key, %value, "set property");
        self.0.properties.set(key, value.clone());
        if let Some(imp) = self.imp() {
            imp.property_changed(self, key, &value);
        }
        Ok(())
    }

    /// Properties whose value differs from the default.
    pub(crate) fn non_default_properties(&self) -> Vec<(&'static str, PropertyValue)> {
        self.0.properties.non_default(self.0.factory.properties())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Post a message toward the pipeline bus.
    ///
    /// Returns `false` if there is no bus to receive it.
    pub fn post_message(&self, message: Message) -> bool {
        match self.parent() {
            Some(parent) => parent.handle_child_message(message),
            None => match self.bin_data().and_then(BinData::bus) {
                Some(bus) => bus.post(message),
                None => {
                    trace!(element = %self.name(), kind = message.type_name(), "message dropped, no bus");
                    false
                }
            },
        }
    }

    fn handle_child_message(&self, message: Message) -> bool {
        match self.bin_data() {
            Some(data) => bin::handle_child_message(self, data, message),
            None => self.post_message(message),
        }
    }

    /// Post an ERROR message from this element.
    pub fn post_error(&self, text: impl Into<String>, debug: Option<String>) -> bool {
        let text = text.into();
        warn!(element = %self.name(), error = %text, "posting error");
        self.post_message(Message::new_error(Some(self), text, debug))
    }

    /// Post a WARNING message from this element.
    pub fn post_warning(&self, text: impl Into<String>, debug: Option<String>) -> bool {
        self.post_message(Message::new_warning(Some(self), text, debug))
    }

    /// Post an INFO message from this element.
    pub fn post_info(&self, text: impl Into<String>, debug: Option<String>) -> bool {
        self.post_message(Message::new_info(Some(self), text, debug))
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Clock distributed by the pipeline.
    pub fn clock(&self) -> Option<Arc<dyn Clock>> {
        self.0.clock.lock().clone()
    }

    /// Clock time at which running time was zero.
    pub fn base_time(&self) -> ClockTime {
        self.0.state.lock().base_time
    }

    /// Time spent in PLAYING according to the pipeline clock.
    pub fn running_time(&self) -> Option<ClockTime> {
        let clock = self.clock()?;
        Some(clock.now().saturating_sub(self.base_time()))
    }

    pub(crate) fn set_clock(&self, clock: Option<Arc<dyn Clock>>, base_time: ClockTime) {
        *self.0.clock.lock() = clock.clone();
        self.0.state.lock().base_time = base_time;
        if let Some(data) = self.bin_data() {
            for child in data.children() {
                child.set_clock(clock.clone(), base_time);
            }
        }
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Current state.
    pub fn current_state(&self) -> State {
        self.0.state.lock().current
    }

    /// Step in flight, if any.
    pub fn pending_state(&self) -> Option<State> {
        self.0.state.lock().pending
    }

    /// Last requested state.
    pub fn target_state(&self) -> Option<State> {
        self.0.state.lock().target
    }

    /// Current state, whether no step is in flight, and the last outcome.
    pub(crate) fn state_snapshot(&self) -> (State, bool, LastReturn) {
        let info = self.0.state.lock();
        (
            info.current,
            !info.busy && !info.async_step,
            info.last_return.clone(),
        )
    }

    /// Request a state; the element walks there one step at a time.
    ///
    /// Returns `Async` if a step continues in the background. On failure
    /// the element stays in the last state it fully reached.
    pub fn set_state(&self, state: State) -> Result<StateChangeSuccess> {
        {
            let mut info = self.0.state.lock();
            self.0.state.wait_idle(&mut info);
            debug!(element = %self.name(), from = ?info.current, to = ?state, "state change requested");
            info.target = Some(state);

            if info.async_step {
                let pending = info.pending.unwrap_or(info.current);
                if state >= pending {
                    info.last_return = LastReturn::Async;
                    return Ok(StateChangeSuccess::Async);
                }
                // Downward while a step is in flight: take the pending state
                // as reached so teardown runs the matching transitions.
                debug!(element = %self.name(), adopted = ?pending, "lost asynchronous state");
                info.current = pending;
                info.pending = None;
                info.async_step = false;
            }

            if info.current == state {
                info.last_return = LastReturn::Success;
                let resync = self.is_bin();
                drop(info);
                self.0.state.notify();
                if resync {
                    return self.resync_children(state);
                }
                return Ok(StateChangeSuccess::Success);
            }
            info.busy = true;
        }
        self.walk()
    }

    /// Bring children of a bin that already is in `state` up to it.
    fn resync_children(&self, state: State) -> Result<StateChangeSuccess> {
        let Some(data) = self.bin_data() else {
            return Ok(StateChangeSuccess::Success);
        };
        let mut result = StateChangeSuccess::Success;
        for child in bin::sorted_children(data) {
            if child.current_state() == state && child.pending_state().is_none() {
                continue;
            }
            match child.set_state(state)? {
                StateChangeSuccess::Async if result == StateChangeSuccess::Success => {
                    result = StateChangeSuccess::Async
                }
                StateChangeSuccess::NoPreroll => result = StateChangeSuccess::NoPreroll,
                _ => {}
            }
        }
        Ok(result)
    }

    /// Walk toward the target. The caller has set `busy`.
    fn walk(&self) -> Result<StateChangeSuccess> {
        let mut last = StateChangeSuccess::Success;
        loop {
            let transition = {
                let mut info = self.0.state.lock();
                let target = info.target.unwrap_or(info.current);
                if info.current == target {
                    info.busy = false;
                    info.pending = None;
                    info.last_return = match last {
                        StateChangeSuccess::NoPreroll => LastReturn::NoPreroll,
                        _ => LastReturn::Success,
                    };
                    drop(info);
                    self.0.state.notify();
                    return Ok(last);
                }
                let next = info.current.next_towards(target);
                info.pending = Some(next);
                StateChange::new(info.current, next)
            };

            trace!(element = %self.name(), %transition, "changing state");
            match self.change_state(transition) {
                Ok(StateChangeSuccess::Async) => {
                    {
                        let mut info = self.0.state.lock();
                        info.async_step = true;
                        info.busy = false;
                        info.last_return = LastReturn::Async;
                    }
                    self.0.state.notify();
                    debug!(element = %self.name(), %transition, "state change is asynchronous");
                    if self.is_bin() {
                        // A child may have committed before async_step was set.
                        self.check_children_committed();
                    }
                    return Ok(StateChangeSuccess::Async);
                }
                Ok(result) => {
                    last = result;
                    self.commit_step(transition);
                }
                Err(e) => {
                    let reason = e.to_string();
                    {
                        let mut info = self.0.state.lock();
                        info.pending = None;
                        info.busy = false;
                        info.last_return = LastReturn::Failure {
                            transition,
                            reason: reason.clone(),
                        };
                    }
                    self.0.state.notify();
                    warn!(element = %self.name(), %transition, error = %reason, "state change failed");
                    return Err(match e {
                        Error::StateChange { .. } => e,
                        other => Error::StateChange {
                            element: self.name().to_string(),
                            transition,
                            reason: other.to_string(),
                        },
                    });
                }
            }
        }
    }

    fn change_state(&self, transition: StateChange) -> Result<StateChangeSuccess> {
        match &self.0.kind {
            ElementKind::Leaf(imp) => {
                if transition == StateChange::READY_TO_PAUSED {
                    self.set_pads_flushing(false);
                } else if transition == StateChange::PAUSED_TO_READY {
                    self.set_pads_flushing(true);
                }
                imp.change_state(self, transition)
            }
            ElementKind::Bin(data) => bin::change_state(self, data, transition),
        }
    }

    /// Record a completed step and announce it.
    fn commit_step(&self, transition: StateChange) {
        let pending = {
            let mut info = self.0.state.lock();
            info.current = transition.next;
            info.pending = None;
            info.target.filter(|t| *t != transition.next)
        };
        self.0.state.notify();
        debug!(element = %self.name(), from = ?transition.current, to = ?transition.next, "state committed");
        observability::record_state_change(transition.current, transition.next);
        self.post_message(Message::new_state_changed(
            Some(self),
            transition.current,
            transition.next,
            pending,
        ));
    }

    /// Finish an asynchronous step.
    ///
    /// Elements call this once the work behind an `Async` return is done
    /// (a sink received its first buffer). On success the walk toward the
    /// target resumes on the calling thread.
    pub fn continue_state(&self, result: Result<StateChangeSuccess>) {
        let transition = {
            let mut info = self.0.state.lock();
            if !info.async_step || info.busy {
                return;
            }
            let Some(next) = info.pending else {
                return;
            };
            info.async_step = false;
            let transition = StateChange::new(info.current, next);
            if let Err(e) = &result {
                info.pending = None;
                info.last_return = LastReturn::Failure {
                    transition,
                    reason: e.to_string(),
                };
                drop(info);
                self.0.state.notify();
                warn!(element = %self.name(), %transition, error = %e, "asynchronous state change failed");
                self.notify_parent();
                return;
            }
            info.busy = true;
            transition
        };

        self.commit_step(transition);
        let walked = self.walk();
        if !matches!(walked, Ok(StateChangeSuccess::Async)) && !self.has_parent() {
            let running_time = self.running_time().unwrap_or(ClockTime::NONE);
            self.post_message(Message::new_async_done(Some(self), running_time));
        }
        self.notify_parent();
    }

    fn notify_parent(&self) {
        if let Some(parent) = self.parent() {
            parent.check_children_committed();
        }
    }

    /// Commit the async step of a bin once every child reached it.
    pub(crate) fn check_children_committed(&self) {
        let Some(data) = self.bin_data() else { return };
        let outcome = {
            let mut info = self.0.state.lock();
            if !info.async_step || info.busy {
                return;
            }
            let Some(next) = info.pending else { return };
            match bin::children_outcome(data, next) {
                bin::ChildrenOutcome::Waiting => return,
                bin::ChildrenOutcome::Failed(reason) => {
                    info.async_step = false;
                    info.pending = None;
                    info.last_return = LastReturn::Failure {
                        transition: StateChange::new(info.current, next),
                        reason: reason.clone(),
                    };
                    Err(Error::StateChange {
                        element: self.name().to_string(),
                        transition: StateChange::new(info.current, next),
                        reason,
                    })
                }
                bin::ChildrenOutcome::Committed => Ok(StateChangeSuccess::Success),
            }
        };
        match outcome {
            Ok(success) => self.continue_state(Ok(success)),
            Err(_) => {
                self.0.state.notify();
                self.notify_parent();
            }
        }
    }

    /// Wait up to `timeout` for an asynchronous change to settle.
    ///
    /// Returns the outcome of the last request with the current state and
    /// the step in flight, if any. A zero timeout polls; [`ClockTime::NONE`]
    /// waits forever.
    pub fn state(&self, timeout: ClockTime) -> (Result<StateChangeSuccess>, State, Option<State>) {
        let info = self.0.state.wait_settled(timeout);
        let current = info.current;
        if info.busy || info.async_step {
            // Between two steps nothing is in flight yet; report the next one.
            let pending = info
                .pending
                .or_else(|| info.target.filter(|t| *t != current).map(|t| current.next_towards(t)));
            return (Ok(StateChangeSuccess::Async), current, pending);
        }
        let result = match &info.last_return {
            LastReturn::Success => Ok(StateChangeSuccess::Success),
            LastReturn::Async => Ok(StateChangeSuccess::Async),
            LastReturn::NoPreroll => Ok(StateChangeSuccess::NoPreroll),
            LastReturn::Failure { transition, reason } => Err(Error::StateChange {
                element: self.name().to_string(),
                transition: *transition,
                reason: reason.clone(),
            }),
        };
        (result, current, None)
    }

    /// Bring the element to its parent's target state.
    ///
    /// Used after adding an element to a running bin.
    pub fn sync_state_with_parent(&self) -> Result<StateChangeSuccess> {
        let parent = self
            .parent()
            .ok_or_else(|| Error::NoParent(self.name().to_string()))?;
        let target = parent
            .target_state()
            .ok_or_else(|| Error::NoParentTarget(parent.name().to_string()))?;
        self.set_clock(parent.clock(), parent.base_time());
        debug!(element = %self.name(), parent = %parent.name(), ?target, "syncing state with parent");
        self.set_state(target)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Element {}

impl std::hash::Hash for Element {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("factory", &self.factory_name())
            .field("state", &self.current_state())
            .finish()
    }
}
