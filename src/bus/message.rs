//! Bus messages.

use crate::caps::Structure;
use crate::clock::ClockTime;
use crate::device::Device;
use crate::element::{Element, State, WeakElement};
use crate::event::next_seqnum;
use std::fmt;

crate::flags::bit_flags! {
    /// Set of message kinds, used to filter bus reads.
    pub struct MessageTypes {
        /// End of stream.
        const EOS = 1 << 0;
        /// Fatal error.
        const ERROR = 1 << 1;
        /// Non-fatal problem.
        const WARNING = 1 << 2;
        /// Informational.
        const INFO = 1 << 3;
        /// An element committed a state step.
        const STATE_CHANGED = 1 << 6;
        /// Application-defined.
        const APPLICATION = 1 << 14;
        /// The stream duration changed.
        const DURATION_CHANGED = 1 << 17;
        /// An asynchronous state change completed.
        const ASYNC_DONE = 1 << 20;
        /// A new stream started.
        const STREAM_START = 1 << 27;
        /// A device monitor found a device.
        const DEVICE_ADDED = 1 << 29;
        /// A device disappeared.
        const DEVICE_REMOVED = 1 << 30;
        /// Every kind.
        const ANY = u32::MAX;
    }
}

/// Text carried by ERROR, WARNING and INFO messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageText {
    text: String,
    debug: Option<String>,
}

impl MessageText {
    /// Human readable text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Additional debugging detail.
    pub fn debug(&self) -> Option<&str> {
        self.debug.as_deref()
    }
}

/// Payload of a STATE_CHANGED message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChanged {
    /// State before the step.
    pub old: State,
    /// State after the step.
    pub new: State,
    /// Final target if the element keeps walking.
    pub pending: Option<State>,
}

#[derive(Debug)]
enum Payload {
    Eos,
    Error(MessageText),
    Warning(MessageText),
    Info(MessageText),
    StateChanged(StateChanged),
    AsyncDone(ClockTime),
    DurationChanged,
    StreamStart,
    Application(Structure),
    DeviceAdded(Device),
    DeviceRemoved(Device),
}

/// Borrowed, kind-specific view of a message.
#[derive(Debug)]
pub enum MessageView<'a> {
    /// End of stream.
    Eos,
    /// Fatal error.
    Error(&'a MessageText),
    /// Non-fatal problem.
    Warning(&'a MessageText),
    /// Informational.
    Info(&'a MessageText),
    /// State step committed.
    StateChanged(StateChanged),
    /// Asynchronous state change completed, with the running time.
    AsyncDone(ClockTime),
    /// Duration changed; query it again.
    DurationChanged,
    /// A stream started.
    StreamStart,
    /// Application message.
    Application(&'a Structure),
    /// Device appeared.
    DeviceAdded(&'a Device),
    /// Device disappeared.
    DeviceRemoved(&'a Device),
}

/// Something that happened during graph execution.
///
/// Messages are not `Clone`: popping one from the bus moves it to the
/// caller, who drops it when done.
pub struct Message {
    seqnum: u32,
    src: WeakElement,
    src_name: Option<String>,
    payload: Payload,
}

impl Message {
    fn new(src: Option<&Element>, payload: Payload) -> Self {
        Self {
            seqnum: next_seqnum(),
            src: src.map(Element::downgrade).unwrap_or_default(),
            src_name: src.map(|e| e.name().to_string()),
            payload,
        }
    }

    /// End of stream.
    pub fn new_eos(src: Option<&Element>) -> Self {
        Self::new(src, Payload::Eos)
    }

    /// Fatal error.
    pub fn new_error(src: Option<&Element>, text: impl Into<String>, debug: Option<String>) -> Self {
        Self::new(src, Payload::Error(MessageText { text: text.into(), debug }))
    }

    /// Non-fatal problem.
    pub fn new_warning(src: Option<&Element>, text: impl Into<String>, debug: Option<String>) -> Self {
        Self::new(src, Payload::Warning(MessageText { text: text.into(), debug }))
    }

    /// Informational message.
    pub fn new_info(src: Option<&Element>, text: impl Into<String>, debug: Option<String>) -> Self {
        Self::new(src, Payload::Info(MessageText { text: text.into(), debug }))
    }

    /// State step committed.
    pub fn new_state_changed(src: Option<&Element>, old: State, new: State, pending: Option<State>) -> Self {
        Self::new(src, Payload::StateChanged(StateChanged { old, new, pending }))
    }

    /// Asynchronous state change completed.
    pub fn new_async_done(src: Option<&Element>, running_time: ClockTime) -> Self {
        Self::new(src, Payload::AsyncDone(running_time))
    }

    /// Stream duration changed.
    pub fn new_duration_changed(src: Option<&Element>) -> Self {
        Self::new(src, Payload::DurationChanged)
    }

    /// A new stream started.
    pub fn new_stream_start(src: Option<&Element>) -> Self {
        Self::new(src, Payload::StreamStart)
    }

    /// Application-defined message.
    pub fn new_application(src: Option<&Element>, structure: Structure) -> Self {
        Self::new(src, Payload::Application(structure))
    }

    pub(crate) fn new_device_added(monitor: &str, device: Device) -> Self {
        Self::new(None, Payload::DeviceAdded(device)).with_src_name(monitor)
    }

    pub(crate) fn new_device_removed(monitor: &str, device: Device) -> Self {
        Self::new(None, Payload::DeviceRemoved(device)).with_src_name(monitor)
    }

    fn with_src_name(mut self, name: &str) -> Self {
        self.src_name = Some(name.to_string());
        self
    }

    /// Emission sequence number, increasing across the process.
    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    /// Element that posted the message, if it still exists.
    pub fn src(&self) -> Option<Element> {
        self.src.upgrade()
    }

    /// Name of the poster.
    pub fn src_name(&self) -> Option<&str> {
        self.src_name.as_deref()
    }

    /// Whether `element` posted the message.
    pub fn is_from(&self, element: &Element) -> bool {
        self.src().is_some_and(|src| src == *element)
    }

    /// Kind of the message.
    pub fn message_type(&self) -> MessageTypes {
        match &self.payload {
            Payload::Eos => MessageTypes::EOS,
            Payload::Error(_) => MessageTypes::ERROR,
            Payload::Warning(_) => MessageTypes::WARNING,
            Payload::Info(_) => MessageTypes::INFO,
            Payload::StateChanged(_) => MessageTypes::STATE_CHANGED,
            Payload::AsyncDone(_) => MessageTypes::ASYNC_DONE,
            Payload::DurationChanged => MessageTypes::DURATION_CHANGED,
            Payload::StreamStart => MessageTypes::STREAM_START,
            Payload::Application(_) => MessageTypes::APPLICATION,
            Payload::DeviceAdded(_) => MessageTypes::DEVICE_ADDED,
            Payload::DeviceRemoved(_) => MessageTypes::DEVICE_REMOVED,
        }
    }

    /// Lower-case kind name (`state-changed`).
    pub fn type_name(&self) -> &'static str {
        match &self.payload {
            Payload::Eos => "eos",
            Payload::Error(_) => "error",
            Payload::Warning(_) => "warning",
            Payload::Info(_) => "info",
            Payload::StateChanged(_) => "state-changed",
            Payload::AsyncDone(_) => "async-done",
            Payload::DurationChanged => "duration-changed",
            Payload::StreamStart => "stream-start",
            Payload::Application(_) => "application",
            Payload::DeviceAdded(_) => "device-added",
            Payload::DeviceRemoved(_) => "device-removed",
        }
    }

    /// Kind-specific view.
    pub fn view(&self) -> MessageView<'_> {
        match &self.payload {
            Payload::Eos => MessageView::Eos,
            Payload::Error(t) => MessageView::Error(t),
            Payload::Warning(t) => MessageView::Warning(t),
            Payload::Info(t) => MessageView::Info(t),
            Payload::StateChanged(s) => MessageView::StateChanged(*s),
            Payload::AsyncDone(t) => MessageView::AsyncDone(*t),
            Payload::DurationChanged => MessageView::DurationChanged,
            Payload::StreamStart => MessageView::StreamStart,
            Payload::Application(s) => MessageView::Application(s),
            Payload::DeviceAdded(d) => MessageView::DeviceAdded(d),
            Payload::DeviceRemoved(d) => MessageView::DeviceRemoved(d),
        }
    }

    /// Error text; `None` for other kinds.
    pub fn parse_error(&self) -> Option<&MessageText> {
        match &self.payload {
            Payload::Error(t) => Some(t),
            _ => None,
        }
    }

    /// Warning text; `None` for other kinds.
    pub fn parse_warning(&self) -> Option<&MessageText> {
        match &self.payload {
            Payload::Warning(t) => Some(t),
            _ => None,
        }
    }

    /// Info text; `None` for other kinds.
    pub fn parse_info(&self) -> Option<&MessageText> {
        match &self.payload {
            Payload::Info(t) => Some(t),
            _ => None,
        }
    }

    /// State change payload; `None` for other kinds.
    pub fn parse_state_changed(&self) -> Option<StateChanged> {
        match &self.payload {
            Payload::StateChanged(s) => Some(*s),
            _ => None,
        }
    }

    /// Device of a DEVICE_ADDED or DEVICE_REMOVED message.
    pub fn parse_device(&self) -> Option<&Device> {
        match &self.payload {
            Payload::DeviceAdded(d) | Payload::DeviceRemoved(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.type_name())
            .field("seqnum", &self.seqnum)
            .field("src", &self.src_name)
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_accessor_yields_none() {
        let msg = Message::new_error(None, "boom", Some("at line 3".into()));
        assert_eq!(msg.message_type(), MessageTypes::ERROR);
        let err = msg.parse_error().unwrap();
        assert_eq!(err.text(), "boom");
        assert_eq!(err.debug(), Some("at line 3"));
        assert!(msg.parse_warning().is_none());
        assert!(msg.parse_info().is_none());
        assert!(msg.parse_state_changed().is_none());
        assert!(msg.parse_device().is_none());
    }

    #[test]
    fn test_state_changed_payload() {
        let msg = Message::new_state_changed(None, State::Ready, State::Paused, Some(State::Playing));
        let sc = msg.parse_state_changed().unwrap();
        assert_eq!((sc.old, sc.new, sc.pending), (State::Ready, State::Paused, Some(State::Playing)));
        assert_eq!(msg.type_name(), "state-changed");
        assert!(matches!(msg.view(), MessageView::StateChanged(_)));
    }

    #[test]
    fn test_seqnums_increase() {
        let a = Message::new_eos(None);
        let b = Message::new_eos(None);
        assert!(b.seqnum() > a.seqnum());
        assert!(a.src().is_none());
        assert!(a.src_name().is_none());
    }

    #[test]
    fn test_any_contains_every_kind() {
        for kind in [
            MessageTypes::EOS,
            MessageTypes::ERROR,
            MessageTypes::STATE_CHANGED,
            MessageTypes::DEVICE_REMOVED,
        ] {
            assert!(MessageTypes::ANY.contains(kind));
        }
    }
}
