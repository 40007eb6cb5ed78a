//! Lifecycle states and per-element state bookkeeping.

use crate::clock::ClockTime;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::time::Instant;

/// Lifecycle state of an element.
///
/// States are totally ordered: `Null < Ready < Paused < Playing`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    /// Initial state; no resources allocated.
    #[default]
    Null,
    /// Resources allocated, no data flowing.
    Ready,
    /// Data flows up to the sinks, which hold it (preroll).
    Paused,
    /// Data flows and sinks render.
    Playing,
}

impl State {
    /// Upper-case name, as printed in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }

    /// The adjacent state one step from `self` toward `target`.
    pub fn next_towards(self, target: State) -> State {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Equal => self,
            std::cmp::Ordering::Less => match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            },
            std::cmp::Ordering::Greater => match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            },
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single-step transition between adjacent states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StateChange {
    /// State before the step.
    pub current: State,
    /// State after the step.
    pub next: State,
}

impl StateChange {
    /// NULL to READY.
    pub const NULL_TO_READY: Self = Self::new(State::Null, State::Ready);
    /// READY to PAUSED.
    pub const READY_TO_PAUSED: Self = Self::new(State::Ready, State::Paused);
    /// PAUSED to PLAYING.
    pub const PAUSED_TO_PLAYING: Self = Self::new(State::Paused, State::Playing);
    /// PLAYING to PAUSED.
    pub const PLAYING_TO_PAUSED: Self = Self::new(State::Playing, State::Paused);
    /// PAUSED to READY.
    pub const PAUSED_TO_READY: Self = Self::new(State::Paused, State::Ready);
    /// READY to NULL.
    pub const READY_TO_NULL: Self = Self::new(State::Ready, State::Null);

    /// Create a transition.
    pub const fn new(current: State, next: State) -> Self {
        Self { current, next }
    }

    /// Whether the transition moves toward PLAYING.
    pub fn is_upward(self) -> bool {
        self.next > self.current
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.current, self.next)
    }
}

/// Non-failure outcome of a state change request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateChangeSuccess {
    /// The target state was reached.
    Success,
    /// The change continues in the background; wait with
    /// [`Element::state`](crate::element::Element::state) or watch the bus.
    Async,
    /// Reached, but the element is live and cannot preroll in PAUSED.
    NoPreroll,
}

/// How the last state change request ended.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LastReturn {
    Success,
    Async,
    NoPreroll,
    Failure {
        transition: StateChange,
        reason: String,
    },
}

/// State bookkeeping guarded by the element's state lock.
#[derive(Debug)]
pub(crate) struct StateInfo {
    pub(crate) current: State,
    /// Step in flight, if any.
    pub(crate) pending: Option<State>,
    /// Requested final state; `None` until the first request.
    pub(crate) target: Option<State>,
    /// A thread is currently walking this element through its steps.
    pub(crate) busy: bool,
    /// The step in `pending` returned Async and waits for `continue_state`.
    pub(crate) async_step: bool,
    pub(crate) last_return: LastReturn,
    /// Pipeline clock base time, distributed on PAUSED to PLAYING.
    pub(crate) base_time: ClockTime,
}

/// State lock plus the condition that wakes `state(timeout)` waiters.
#[derive(Debug)]
pub(crate) struct StateCell {
    info: Mutex<StateInfo>,
    cond: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            info: Mutex::new(StateInfo {
                current: State::Null,
                pending: None,
                target: None,
                busy: false,
                async_step: false,
                last_return: LastReturn::Success,
                base_time: ClockTime::ZERO,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StateInfo> {
        self.info.lock()
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    /// Wait while another thread walks this element.
    pub(crate) fn wait_idle<'a>(&'a self, info: &mut MutexGuard<'a, StateInfo>) {
        while info.busy {
            self.cond.wait(info);
        }
    }

    /// Wait until no step is in flight or `timeout` (NONE: forever) expires.
    pub(crate) fn wait_settled(&self, timeout: ClockTime) -> MutexGuard<'_, StateInfo> {
        let mut info = self.info.lock();
        let deadline = timeout.as_timeout().map(|t| Instant::now() + t);
        while info.busy || info.async_step {
            match deadline {
                None => self.cond.wait(&mut info),
                Some(deadline) => {
                    if self.cond.wait_until(&mut info, deadline).timed_out() {
                        break;
                    }
                }
            }
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_are_ordered() {
        assert!(State::Null < State::Ready);
        assert!(State::Paused < State::Playing);
        assert_eq!(State::Null.next_towards(State::Playing), State::Ready);
        assert_eq!(State::Playing.next_towards(State::Null), State::Paused);
        assert_eq!(State::Paused.next_towards(State::Paused), State::Paused);
    }

    #[test]
    fn test_transition_display() {
        assert_eq!(StateChange::READY_TO_PAUSED.to_string(), "READY -> PAUSED");
        assert!(StateChange::NULL_TO_READY.is_upward());
        assert!(!StateChange::PAUSED_TO_READY.is_upward());
    }

    #[test]
    fn test_zero_timeout_does_not_block() {
        let cell = StateCell::new();
        cell.lock().async_step = true;
        let start = Instant::now();
        let info = cell.wait_settled(ClockTime::ZERO);
        assert!(info.async_step);
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }
}
