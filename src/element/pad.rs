//! Pads: the connection points of elements.
//!
//! A pad belongs to exactly one element and links to at most one peer pad of
//! the opposite direction. Source pads push buffers and downstream events to
//! their peer; sink pads hand what they receive to their element.
//!
//! Links hold weak references both ways, so a link never keeps an element
//! alive.

use super::probe::{BlockHandle, ProbeCallback, ProbeData, ProbeEntry, ProbeId, ProbeInfo, ProbeReturn, ProbeType};
use super::{Element, WeakElement};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::error::{Error, FlowError, FlowResult, Result};
use crate::event::Event;
use crate::observability;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tracing::{debug, trace};

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data (output).
    Src,
    /// Consumes data (input).
    Sink,
}

/// When pads of a template exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Created with the element.
    Always,
    /// Created by the element while running.
    Sometimes,
    /// Created when requested and released explicitly.
    Request,
}

/// Template for the pads of an element factory.
#[derive(Debug, Clone)]
pub struct PadTemplate {
    name_template: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Caps,
}

impl PadTemplate {
    /// Create a pad template.
    pub fn new(
        name_template: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name_template: name_template.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Always-present `src` pad accepting anything.
    pub fn src_any() -> Self {
        Self::new("src", PadDirection::Src, PadPresence::Always, Caps::new_any())
    }

    /// Always-present `sink` pad accepting anything.
    pub fn sink_any() -> Self {
        Self::new("sink", PadDirection::Sink, PadPresence::Always, Caps::new_any())
    }

    /// Name or name pattern (`src_%u`).
    pub fn name_template(&self) -> &str {
        &self.name_template
    }

    /// Direction of created pads.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Presence of created pads.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Caps of created pads.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Whether `name` could have been made from this template.
    pub fn matches_name(&self, name: &str) -> bool {
        match self.name_template.split_once("%u") {
            None => self.name_template == name,
            Some((prefix, suffix)) => name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
        }
    }

    /// Pad name for index `n` of a `%u` template.
    pub fn name_for(&self, n: u32) -> String {
        self.name_template.replacen("%u", &n.to_string(), 1)
    }
}

struct PadState {
    peer: Option<Weak<PadInner>>,
    probes: SmallVec<[ProbeEntry; 2]>,
    /// Threads currently inside a push through this pad.
    pushing: u32,
    /// Threads parked by a blocking probe.
    blocked: u32,
    flushing: bool,
}

pub(crate) struct PadInner {
    name: String,
    direction: PadDirection,
    template: PadTemplate,
    parent: WeakElement,
    caps: Mutex<Caps>,
    state: Mutex<PadState>,
    cond: Condvar,
    next_probe_id: AtomicU64,
}

/// A pad handle; clones refer to the same pad.
#[derive(Clone)]
pub struct Pad(Arc<PadInner>);

/// Weak pad reference.
#[derive(Clone, Debug)]
pub struct WeakPad(Weak<PadInner>);

impl WeakPad {
    /// Get the pad if it still exists.
    pub fn upgrade(&self) -> Option<Pad> {
        self.0.upgrade().map(Pad)
    }
}

impl Pad {
    pub(crate) fn new(name: String, template: PadTemplate, parent: WeakElement) -> Self {
        let caps = template.caps.clone();
        Self(Arc::new(PadInner {
            name,
            direction: template.direction,
            template,
            parent,
            caps: Mutex::new(caps),
            state: Mutex::new(PadState {
                peer: None,
                probes: SmallVec::new(),
                pushing: 0,
                blocked: 0,
                flushing: false,
            }),
            cond: Condvar::new(),
            next_probe_id: AtomicU64::new(1),
        }))
    }

    /// Pad name, unique within its element.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Pad direction.
    pub fn direction(&self) -> PadDirection {
        self.0.direction
    }

    /// Template the pad was created from.
    pub fn template(&self) -> &PadTemplate {
        &self.0.template
    }

    /// Whether the pad came from a request template.
    pub fn is_request(&self) -> bool {
        self.0.template.presence == PadPresence::Request
    }

    /// Owning element.
    pub fn parent_element(&self) -> Option<Element> {
        self.0.parent.upgrade()
    }

    /// `element:pad`, for messages.
    pub fn path_string(&self) -> String {
        match self.parent_element() {
            Some(e) => format!("{}:{}", e.name(), self.name()),
            None => format!("<orphan>:{}", self.name()),
        }
    }

    /// Caps this pad accepts.
    pub fn caps(&self) -> Caps {
        self.0.caps.lock().clone()
    }

    /// Restrict the caps this pad accepts.
    pub fn set_caps(&self, caps: Caps) {
        *self.0.caps.lock() = caps;
    }

    /// Weak reference.
    pub fn downgrade(&self) -> WeakPad {
        WeakPad(Arc::downgrade(&self.0))
    }

    /// Linked peer pad.
    pub fn peer(&self) -> Option<Pad> {
        self.0
            .state
            .lock()
            .peer
            .as_ref()
            .and_then(Weak::upgrade)
            .map(Pad)
    }

    /// Whether the pad has a peer.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Whether the pad refuses data (inactive or flushing).
    pub fn is_flushing(&self) -> bool {
        self.0.state.lock().flushing
    }

    /// Whether a streaming thread is parked by a blocking probe.
    pub fn is_blocked(&self) -> bool {
        self.0.state.lock().blocked > 0
    }

    pub(crate) fn set_flushing(&self, flushing: bool) {
        self.0.state.lock().flushing = flushing;
        self.0.cond.notify_all();
    }

    /// Link this source pad to `sink`.
    ///
    /// Either both pads end up linked to each other or neither changes.
    pub fn link(&self, sink: &Pad) -> Result<()> {
        let result = self.try_link(sink);
        observability::record_link(result.is_ok());
        match &result {
            Ok(()) => debug!(src = %self.path_string(), sink = %sink.path_string(), "linked pads"),
            Err(e) => debug!(src = %self.path_string(), sink = %sink.path_string(), error = %e, "link failed"),
        }
        result
    }

    fn try_link(&self, sink: &Pad) -> Result<()> {
        if self.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            return Err(Error::WrongDirection {
                src: self.path_string(),
                sink: sink.path_string(),
            });
        }
        if Arc::ptr_eq(&self.0, &sink.0) {
            return Err(Error::WrongDirection {
                src: self.path_string(),
                sink: sink.path_string(),
            });
        }

        let src_caps = self.caps();
        let sink_caps = sink.caps();
        if !src_caps.can_intersect(&sink_caps) {
            return Err(Error::IncompatibleCaps {
                src: self.path_string(),
                sink: sink.path_string(),
                src_caps: src_caps.to_string(),
                sink_caps: sink_caps.to_string(),
            });
        }

        let (mut src_state, mut sink_state) = lock_pair(self, sink);
        for (pad, state) in [(self, &*src_state), (sink, &*sink_state)] {
            if state.peer.as_ref().is_some_and(|p| p.strong_count() > 0) {
                return Err(Error::AlreadyLinked {
                    pad: pad.path_string(),
                });
            }
        }
        src_state.peer = Some(Arc::downgrade(&sink.0));
        sink_state.peer = Some(Arc::downgrade(&self.0));
        Ok(())
    }

    /// Undo a link made with [`Pad::link`].
    pub fn unlink(&self, sink: &Pad) -> Result<()> {
        let linked_to = |state: &PadState, other: &Pad| {
            state
                .peer
                .as_ref()
                .is_some_and(|p| std::ptr::eq(p.as_ptr(), Arc::as_ptr(&other.0)))
        };

        {
            let (mut src_state, mut sink_state) = lock_pair(self, sink);
            if !linked_to(&*src_state, sink) || !linked_to(&*sink_state, self) {
                return Err(Error::NotLinked {
                    src: self.path_string(),
                    sink: sink.path_string(),
                });
            }
            src_state.peer = None;
            sink_state.peer = None;
        }
        debug!(src = %self.path_string(), sink = %sink.path_string(), "unlinked pads");
        Ok(())
    }

    /// Install a probe.
    ///
    /// Probes with the `BLOCK` flag park the streaming thread until removed.
    /// A probe that only asks for `IDLE` fires once, immediately when the
    /// pad is idle (then `None` is returned) or after the current push.
    pub fn add_probe<F>(&self, types: ProbeType, callback: F) -> Option<ProbeId>
    where
        F: Fn(&Pad, &mut ProbeInfo) -> ProbeReturn + Send + Sync + 'static,
    {
        let callback: ProbeCallback = Arc::new(callback);
        let id = ProbeId(self.0.next_probe_id.fetch_add(1, Ordering::Relaxed));
        let idle_only = types.contains(ProbeType::IDLE) && !types.contains(ProbeType::BLOCK);

        {
            let mut state = self.0.state.lock();
            if !(idle_only && state.pushing == 0) {
                state.probes.push(ProbeEntry {
                    id,
                    types,
                    callback,
                });
                trace!(pad = %self.name(), probe = id.0, ?types, "added probe");
                return Some(id);
            }
        }

        let mut info = ProbeInfo {
            id,
            types: ProbeType::IDLE,
            data: None,
        };
        callback(self, &mut info);
        None
    }

    /// Remove a probe; wakes threads it was blocking.
    pub fn remove_probe(&self, id: ProbeId) {
        let mut state = self.0.state.lock();
        state.probes.retain(|p| p.id != id);
        drop(state);
        self.0.cond.notify_all();
        trace!(pad = %self.name(), probe = id.0, "removed probe");
    }

    /// Install a blocking probe on downstream data.
    pub fn block(&self) -> BlockHandle {
        let id = self.add_probe(ProbeType::BLOCK | ProbeType::DATA_DOWNSTREAM, |_, _| {
            ProbeReturn::Ok
        });
        BlockHandle::new(self.clone(), id)
    }

    pub(crate) fn wait_blocked_or_idle(&self, timeout: ClockTime) -> bool {
        let deadline = timeout.as_timeout().map(|t| Instant::now() + t);
        let mut state = self.0.state.lock();
        loop {
            if state.blocked > 0 || state.pushing == 0 || state.flushing {
                return true;
            }
            match deadline {
                None => self.0.cond.wait(&mut state),
                Some(deadline) => {
                    if self.0.cond.wait_until(&mut state, deadline).timed_out() {
                        return state.blocked > 0 || state.pushing == 0;
                    }
                }
            }
        }
    }

    /// Run the probes matching `kind`; `Ok(None)` means a probe dropped the
    /// data. Blocking probes park the caller here.
    fn pass_probes(&self, kind: ProbeType, data: ProbeData) -> std::result::Result<Option<ProbeData>, FlowError> {
        Ok(self.run_probes(kind, data, |_| Ok(()))?.map(|(data, ())| data))
    }

    /// Run the probes matching `kind`, then enter the pad for a push.
    ///
    /// Entering happens under the same lock as the last probe scan, so a
    /// blocking probe installed afterwards always finds the push in flight.
    /// On `Ok(Some(_))` the caller must [`leave`](Self::leave).
    fn probe_and_enter(
        &self,
        kind: ProbeType,
        data: ProbeData,
        may_flush: bool,
    ) -> std::result::Result<Option<(ProbeData, Option<Pad>)>, FlowError> {
        self.run_probes(kind, data, |state| {
            if state.flushing && may_flush {
                return Err(FlowError::Flushing);
            }
            state.pushing += 1;
            Ok(state.peer.as_ref().and_then(Weak::upgrade).map(Pad))
        })
    }

    /// Probe loop; `settle` runs under the state lock once no probe is left.
    fn run_probes<T>(
        &self,
        kind: ProbeType,
        data: ProbeData,
        mut settle: impl FnMut(&mut PadState) -> std::result::Result<T, FlowError>,
    ) -> std::result::Result<Option<(ProbeData, T)>, FlowError> {
        let may_block = !matches!(
            data,
            ProbeData::Event(Event::FlushStart | Event::FlushStop { .. })
        );
        let mut data = data;
        let mut handled: SmallVec<[ProbeId; 4]> = SmallVec::new();

        loop {
            let pending: SmallVec<[ProbeEntry; 2]> = {
                let mut state = self.0.state.lock();
                if state.flushing && may_block {
                    return Err(FlowError::Flushing);
                }
                let pending: SmallVec<[ProbeEntry; 2]> = state
                    .probes
                    .iter()
                    .filter(|p| !handled.contains(&p.id) && p.types.matches(kind))
                    .filter(|p| !(p.types.contains(ProbeType::IDLE) && !p.types.contains(ProbeType::BLOCK)))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    let settled = settle(&mut *state)?;
                    return Ok(Some((data, settled)));
                }
                pending
            };

            let mut blocking: SmallVec<[ProbeId; 2]> = SmallVec::new();
            for probe in pending {
                handled.push(probe.id);
                let mut info = ProbeInfo {
                    id: probe.id,
                    types: kind,
                    data: Some(data),
                };
                let ret = (probe.callback)(self, &mut info);
                let Some(d) = info.data.take() else {
                    return Ok(None);
                };
                data = d;
                match ret {
                    ProbeReturn::Drop => return Ok(None),
                    ProbeReturn::Remove => self.remove_probe(probe.id),
                    ProbeReturn::Pass => {}
                    ProbeReturn::Ok => {
                        if probe.types.contains(ProbeType::BLOCK) && may_block {
                            blocking.push(probe.id);
                        }
                    }
                }
            }

            if !blocking.is_empty() {
                let mut state = self.0.state.lock();
                state.blocked += 1;
                self.0.cond.notify_all();
                trace!(pad = %self.name(), "streaming thread blocked");
                while !state.flushing
                    && state.probes.iter().any(|p| blocking.contains(&p.id))
                {
                    self.0.cond.wait(&mut state);
                }
                state.blocked -= 1;
                if state.flushing {
                    return Err(FlowError::Flushing);
                }
                trace!(pad = %self.name(), "streaming thread unblocked");
            }
        }
    }

    fn leave(&self) {
        let idle: SmallVec<[ProbeEntry; 1]> = {
            let mut state = self.0.state.lock();
            state.pushing -= 1;
            if state.pushing > 0 {
                SmallVec::new()
            } else {
                let (idle, rest): (SmallVec<[ProbeEntry; 2]>, SmallVec<[ProbeEntry; 2]>) =
                    state.probes.drain(..).partition(|p| {
                        p.types.contains(ProbeType::IDLE) && !p.types.contains(ProbeType::BLOCK)
                    });
                state.probes = rest;
                idle.into_iter().collect()
            }
        };
        self.0.cond.notify_all();
        for probe in idle {
            let mut info = ProbeInfo {
                id: probe.id,
                types: ProbeType::IDLE,
                data: None,
            };
            (probe.callback)(self, &mut info);
        }
    }

    /// Push a buffer from this source pad to its peer.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        let Some((data, peer)) =
            self.probe_and_enter(ProbeType::BUFFER, ProbeData::Buffer(buffer), true)?
        else {
            return Ok(());
        };
        let result = match (data, peer) {
            (ProbeData::Buffer(buffer), Some(peer)) => peer.chain(buffer),
            (ProbeData::Buffer(_), None) => Err(FlowError::NotLinked),
            _ => Err(FlowError::Error),
        };
        self.leave();
        result
    }

    /// Buffer arriving at this sink pad.
    fn chain(&self, buffer: Buffer) -> FlowResult {
        let element = self.parent_element().ok_or(FlowError::Flushing)?;
        let Some((data, _)) =
            self.probe_and_enter(ProbeType::BUFFER, ProbeData::Buffer(buffer), true)?
        else {
            return Ok(());
        };
        let result = match data {
            ProbeData::Buffer(buffer) => element.chain_impl(self, buffer),
            _ => Err(FlowError::Error),
        };
        self.leave();
        result
    }

    /// Send an event out of this pad: downstream from a source pad, upstream
    /// from a sink pad. Returns whether it was handled.
    pub fn push_event(&self, event: Event) -> bool {
        let outgoing_ok = match self.direction() {
            PadDirection::Src => event.is_downstream(),
            PadDirection::Sink => event.is_upstream(),
        };
        if !outgoing_ok {
            return false;
        }

        match &event {
            Event::FlushStart => self.set_flushing(true),
            Event::FlushStop { .. } => self.set_flushing(false),
            _ => {}
        }

        let kind = event_probe_kind(&event);
        let (data, peer) = match self.probe_and_enter(kind, ProbeData::Event(event), false) {
            Ok(Some(entered)) => entered,
            Ok(None) => return true,
            Err(_) => return false,
        };
        let handled = match (data, peer) {
            (ProbeData::Event(event), Some(peer)) => peer.receive_event(event),
            _ => false,
        };
        self.leave();
        handled
    }

    /// Event arriving at this pad from its peer.
    fn receive_event(&self, event: Event) -> bool {
        match &event {
            Event::FlushStart => self.set_flushing(true),
            Event::FlushStop { .. } => self.set_flushing(false),
            _ => {}
        }

        let kind = event_probe_kind(&event);
        let event = match self.pass_probes(kind, ProbeData::Event(event)) {
            Ok(Some(ProbeData::Event(event))) => event,
            Ok(_) => return true,
            Err(_) => return false,
        };

        if self.direction() == PadDirection::Sink
            && let Event::Caps(caps) = &event
            && !caps.can_intersect(&self.caps())
        {
            debug!(pad = %self.path_string(), %caps, "refusing caps");
            return false;
        }

        let Some(element) = self.parent_element() else {
            return false;
        };
        match self.direction() {
            PadDirection::Sink => element.sink_event_impl(self, event),
            PadDirection::Src => element.src_event_impl(self, event),
        }
    }
}

fn event_probe_kind(event: &Event) -> ProbeType {
    if event.is_upstream() {
        ProbeType::EVENT_UPSTREAM
    } else {
        ProbeType::EVENT_DOWNSTREAM
    }
}

/// Lock two pads in address order so concurrent links cannot deadlock.
fn lock_pair<'a>(
    a: &'a Pad,
    b: &'a Pad,
) -> (
    parking_lot::MutexGuard<'a, PadState>,
    parking_lot::MutexGuard<'a, PadState>,
) {
    if Arc::as_ptr(&a.0) < Arc::as_ptr(&b.0) {
        let ga = a.0.state.lock();
        let gb = b.0.state.lock();
        (ga, gb)
    } else {
        let gb = b.0.state.lock();
        let ga = a.0.state.lock();
        (ga, gb)
    }
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Pad {}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.0.name)
            .field("direction", &self.0.direction)
            .field("linked", &self.is_linked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan(name: &str, template: PadTemplate) -> Pad {
        Pad::new(name.to_string(), template, WeakElement::new())
    }

    #[test]
    fn test_template_name_matching() {
        let t = PadTemplate::new("src_%u", PadDirection::Src, PadPresence::Request, Caps::new_any());
        assert!(t.matches_name("src_0"));
        assert!(t.matches_name("src_12"));
        assert!(!t.matches_name("src_"));
        assert!(!t.matches_name("sink_0"));
        assert_eq!(t.name_for(3), "src_3");
        assert!(PadTemplate::src_any().matches_name("src"));
    }

    #[test]
    fn test_link_and_unlink() {
        let src = orphan("src", PadTemplate::src_any());
        let sink = orphan("sink", PadTemplate::sink_any());
        src.link(&sink).unwrap();
        assert_eq!(src.peer(), Some(sink.clone()));
        assert_eq!(sink.peer(), Some(src.clone()));

        assert!(matches!(src.link(&sink), Err(Error::AlreadyLinked { .. })));

        src.unlink(&sink).unwrap();
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
        assert!(matches!(src.unlink(&sink), Err(Error::NotLinked { .. })));
    }

    #[test]
    fn test_incompatible_caps_leave_pads_unlinked() {
        let video: Caps = "video/x-raw".parse().unwrap();
        let audio: Caps = "audio/x-raw".parse().unwrap();
        let src = orphan(
            "src",
            PadTemplate::new("src", PadDirection::Src, PadPresence::Always, video),
        );
        let sink = orphan(
            "sink",
            PadTemplate::new("sink", PadDirection::Sink, PadPresence::Always, audio),
        );
        assert!(matches!(src.link(&sink), Err(Error::IncompatibleCaps { .. })));
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
    }

    #[test]
    fn test_wrong_direction() {
        let a = orphan("sink", PadTemplate::sink_any());
        let b = orphan("src", PadTemplate::src_any());
        assert!(matches!(a.link(&b), Err(Error::WrongDirection { .. })));
    }

    #[test]
    fn test_push_unlinked_is_not_linked() {
        let src = orphan("src", PadTemplate::src_any());
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::NotLinked));
    }

    #[test]
    fn test_probe_drop_and_remove() {
        let src = orphan("src", PadTemplate::src_any());
        let id = src
            .add_probe(ProbeType::BUFFER, |_, _| ProbeReturn::Drop)
            .unwrap();
        // Dropped data never reaches the missing peer.
        assert_eq!(src.push(Buffer::with_size(1)), Ok(()));
        src.remove_probe(id);
        assert_eq!(src.push(Buffer::with_size(1)), Err(FlowError::NotLinked));
    }

    #[test]
    fn test_idle_probe_fires_immediately() {
        let src = orphan("src", PadTemplate::src_any());
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        let id = src.add_probe(ProbeType::IDLE, move |_, info| {
            assert!(info.data.is_none());
            flag.store(true, Ordering::SeqCst);
            ProbeReturn::Remove
        });
        assert!(id.is_none());
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_block_on_idle_pad_resolves_immediately() {
        let src = orphan("src", PadTemplate::src_any());
        let handle = src.block();
        assert!(handle.wait_blocked(ClockTime::ZERO));
        handle.unblock();
    }
}
