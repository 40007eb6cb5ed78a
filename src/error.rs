//! Error types for Pipewright.

use crate::element::StateChange;
use thiserror::Error;

/// Result type alias using Pipewright's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Pipewright operations.
///
/// Structural and lookup failures are returned synchronously and leave the
/// graph untouched. Failures discovered while data flows are reported as
/// ERROR messages on the bus instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The runtime has not been initialized yet.
    #[error("runtime not initialized: call pipewright::initialize() first")]
    NotInitialized,

    /// The runtime was shut down and cannot be used anymore.
    #[error("runtime has been shut down")]
    Deinitialized,

    /// No factory with this name is registered.
    #[error("no element factory named '{0}'")]
    FactoryNotFound(String),

    /// A factory exists but could not instantiate its element.
    #[error("failed to create element from factory '{factory}': {reason}")]
    ElementCreation {
        /// Factory name.
        factory: String,
        /// Why creation failed.
        reason: String,
    },

    /// Lookup of a child element by name failed.
    #[error("no element named '{name}' in '{bin}'")]
    ElementNotFound {
        /// Container that was searched.
        bin: String,
        /// Name that was looked up.
        name: String,
    },

    /// Lookup of a pad by name failed.
    #[error("element '{element}' has no pad '{pad}'")]
    PadNotFound {
        /// Element that was searched.
        element: String,
        /// Pad name that was looked up.
        pad: String,
    },

    /// The element already belongs to a container.
    #[error("element '{element}' is already owned by '{parent}'")]
    AlreadyOwned {
        /// Element being added.
        element: String,
        /// Its current parent.
        parent: String,
    },

    /// A sibling with the same name exists.
    #[error("'{bin}' already contains an element named '{name}'")]
    NameInUse {
        /// Container being added to.
        bin: String,
        /// Conflicting name.
        name: String,
    },

    /// One of the pads is already linked.
    #[error("pad '{pad}' is already linked")]
    AlreadyLinked {
        /// Offending pad (`element:pad`).
        pad: String,
    },

    /// The pads are not linked to each other.
    #[error("pads '{src}' and '{sink}' are not linked")]
    NotLinked {
        /// Source pad (`element:pad`).
        src: String,
        /// Sink pad (`element:pad`).
        sink: String,
    },

    /// The pads have no capabilities in common.
    #[error("incompatible caps between '{src}' ({src_caps}) and '{sink}' ({sink_caps})")]
    IncompatibleCaps {
        /// Source pad (`element:pad`).
        src: String,
        /// Sink pad (`element:pad`).
        sink: String,
        /// Caps of the source pad.
        src_caps: String,
        /// Caps of the sink pad.
        sink_caps: String,
    },

    /// A link was attempted with pads of the wrong direction.
    #[error("cannot link '{src}' to '{sink}': wrong pad direction")]
    WrongDirection {
        /// Pad passed as source.
        src: String,
        /// Pad passed as sink.
        sink: String,
    },

    /// No pad could be requested from a template.
    #[error("element '{element}' cannot provide a pad for template '{template}'")]
    PadUnavailable {
        /// Element asked for a pad.
        element: String,
        /// Requested template or pad name.
        template: String,
    },

    /// Only request pads can be released.
    #[error("pad '{0}' is not a request pad")]
    NotRequestPad(String),

    /// The element is still linked while streaming.
    #[error("element '{element}' is linked and in state {state:?}; unlink it first")]
    ElementLinked {
        /// Element that was being removed.
        element: String,
        /// Its current state.
        state: crate::element::State,
    },

    /// A textual description could not be parsed or resolved.
    #[error("parse error: {0}")]
    Parse(String),

    /// A caps string is malformed.
    #[error("invalid caps '{input}': {reason}")]
    InvalidCaps {
        /// Offending caps string.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The runtime rejected a state transition.
    #[error("element '{element}' failed state change {transition}: {reason}")]
    StateChange {
        /// Element whose transition failed.
        element: String,
        /// Transition that failed.
        transition: StateChange,
        /// Why it failed.
        reason: String,
    },

    /// The element has no parent container.
    #[error("element '{0}' has no parent")]
    NoParent(String),

    /// The parent has never been asked to change state.
    #[error("parent '{0}' has no target state yet")]
    NoParentTarget(String),

    /// A property is unknown, read-only or of another type.
    #[error("property '{property}' on '{element}': {reason}")]
    Property {
        /// Element carrying the property.
        element: String,
        /// Property name.
        property: String,
        /// What went wrong.
        reason: String,
    },

    /// Filters cannot be changed while the monitor is running.
    #[error("device monitor is started; stop it before changing filters or providers")]
    MonitorStarted,

    /// A seek request was not handled.
    #[error("seek on '{element}' failed: {reason}")]
    Seek {
        /// Element the seek was sent to.
        element: String,
        /// Why it failed.
        reason: String,
    },

    /// A position or duration query could not be answered.
    #[error("query on '{element}' failed: {reason}")]
    Query {
        /// Element that was queried.
        element: String,
        /// Why it failed.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a property error.
    pub(crate) fn property(
        element: impl Into<String>,
        property: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Property {
            element: element.into(),
            property: property.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of a data-flow operation (a pad push).
///
/// These never cross the control API; elements turn fatal ones into ERROR
/// messages on the bus.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("not-linked")]
    NotLinked,
    /// The pad is shutting down.
    #[error("flushing")]
    Flushing,
    /// Downstream does not accept more data.
    #[error("eos")]
    Eos,
    /// Formats could not be agreed on.
    #[error("not-negotiated")]
    NotNegotiated,
    /// Generic fatal error, already reported by the element.
    #[error("error")]
    Error,
}

impl FlowError {
    /// Whether the error should stop a streaming thread with an ERROR message.
    pub fn is_fatal(self) -> bool {
        matches!(self, FlowError::NotLinked | FlowError::NotNegotiated | FlowError::Error)
    }
}

/// Result of a data-flow operation.
pub type FlowResult = std::result::Result<(), FlowError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::State;

    #[test]
    fn test_messages_name_the_fault() {
        let err = Error::StateChange {
            element: "sink".into(),
            transition: StateChange::new(State::Ready, State::Paused),
            reason: "device busy".into(),
        };
        let text = err.to_string();
        assert!(text.contains("sink"));
        assert!(text.contains("READY -> PAUSED"));
        assert!(text.contains("device busy"));
    }

    #[test]
    fn test_flow_fatality() {
        assert!(FlowError::NotLinked.is_fatal());
        assert!(FlowError::Error.is_fatal());
        assert!(!FlowError::Flushing.is_fatal());
        assert!(!FlowError::Eos.is_fatal());
    }
}
