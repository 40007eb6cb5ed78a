//! Bins: elements that contain elements.

use super::graph::LinkGraph;
use crate::bus::{Bus, Message, MessageTypes};
use crate::clock::{Clock, ClockTime, SystemClock};
use crate::element::{Element, ElementKind, LastReturn, State, StateChange, StateChangeSuccess};
use crate::error::{Error, Result};
use crate::registry;
use crate::runtime;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Running-time bookkeeping of a pipeline.
#[derive(Debug, Default)]
struct RunningTime {
    /// Running time accumulated in earlier PLAYING periods.
    accumulated: ClockTime,
}

pub(crate) struct PipelineData {
    bus: Bus,
    clock: Arc<dyn Clock>,
    running: Mutex<RunningTime>,
}

/// Container state of a bin element.
pub(crate) struct BinData {
    pipeline: Option<PipelineData>,
    children: Mutex<Vec<Element>>,
    /// Children that posted EOS since the last READY to PAUSED.
    eos: Mutex<HashSet<String>>,
}

impl BinData {
    pub(crate) fn new(pipeline: bool, name: &str) -> Self {
        Self {
            pipeline: pipeline.then(|| PipelineData {
                bus: Bus::new(name),
                clock: SystemClock::shared(),
                running: Mutex::new(RunningTime::default()),
            }),
            children: Mutex::new(Vec::new()),
            eos: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn is_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    pub(crate) fn bus(&self) -> Option<&Bus> {
        self.pipeline.as_ref().map(|p| &p.bus)
    }

    /// Snapshot of the children in insertion order.
    pub(crate) fn children(&self) -> Vec<Element> {
        self.children.lock().clone()
    }
}

impl Drop for BinData {
    fn drop(&mut self) {
        let children = std::mem::take(self.children.get_mut());
        for child in children.iter().rev() {
            if child.current_state() != State::Null || child.pending_state().is_some() {
                if let Err(e) = child.set_state(State::Null) {
                    warn!(element = %child.name(), error = %e, "teardown of child failed");
                }
            }
            child.set_parent(None);
        }
    }
}

/// Children sorted so that downstream elements come first.
pub(crate) fn sorted_children(data: &BinData) -> Vec<Element> {
    let children = data.children();
    let graph = LinkGraph::new(&children);
    if graph.is_cyclic() {
        debug!("children are linked in a cycle, using insertion order");
    }
    graph
        .sinks_first()
        .into_iter()
        .map(|i| children[i].clone())
        .collect()
}

/// One state step of a bin: pipeline bookkeeping plus the children.
pub(crate) fn change_state(
    bin: &Element,
    data: &BinData,
    transition: StateChange,
) -> Result<StateChangeSuccess> {
    if let Some(pipeline) = &data.pipeline {
        if transition == StateChange::NULL_TO_READY {
            pipeline.bus.set_flushing(false);
        } else if transition == StateChange::READY_TO_PAUSED {
            pipeline.running.lock().accumulated = ClockTime::ZERO;
        } else if transition == StateChange::PAUSED_TO_PLAYING {
            let accumulated = pipeline.running.lock().accumulated;
            let base_time = pipeline.clock.now().saturating_sub(accumulated);
            trace!(pipeline = %bin.name(), %base_time, "distributing base time");
            bin.set_clock(Some(pipeline.clock.clone()), base_time);
        }
    }
    if transition == StateChange::READY_TO_PAUSED {
        data.eos.lock().clear();
    }

    let mut result = StateChangeSuccess::Success;
    let mut first_error = None;
    for child in sorted_children(data) {
        match child.set_state(transition.next) {
            Ok(StateChangeSuccess::NoPreroll) => result = StateChangeSuccess::NoPreroll,
            Ok(StateChangeSuccess::Async) if result == StateChangeSuccess::Success => {
                result = StateChangeSuccess::Async
            }
            Ok(_) => {}
            Err(e) => {
                let error = Error::StateChange {
                    element: bin.name().to_string(),
                    transition,
                    reason: format!("child '{}' failed: {e}", child.name()),
                };
                if transition.is_upward() {
                    return Err(error);
                }
                // Keep tearing the other children down.
                first_error.get_or_insert(error);
            }
        }
    }
    if let Some(error) = first_error {
        return Err(error);
    }

    if let Some(pipeline) = &data.pipeline {
        if transition == StateChange::PLAYING_TO_PAUSED {
            let played = pipeline.clock.now().saturating_sub(bin.base_time());
            pipeline.running.lock().accumulated = played;
        } else if transition == StateChange::READY_TO_NULL && runtime::config().auto_flush_bus {
            pipeline.bus.set_flushing(true);
        }
    }
    Ok(result)
}

pub(crate) enum ChildrenOutcome {
    Waiting,
    Committed,
    Failed(String),
}

/// Whether every child finished the step to `next`.
pub(crate) fn children_outcome(data: &BinData, next: State) -> ChildrenOutcome {
    for child in data.children() {
        let (current, settled, last_return) = child.state_snapshot();
        if let LastReturn::Failure { transition, reason } = last_return {
            return ChildrenOutcome::Failed(format!(
                "child '{}' failed {transition}: {reason}",
                child.name()
            ));
        }
        if current != next || !settled {
            return ChildrenOutcome::Waiting;
        }
    }
    ChildrenOutcome::Committed
}

/// Message from a child: aggregate EOS, pass everything else up.
pub(crate) fn handle_child_message(bin: &Element, data: &BinData, message: Message) -> bool {
    if message.message_type() != MessageTypes::EOS {
        return bin.post_message(message);
    }

    let all_done = {
        let mut eos = data.eos.lock();
        if let Some(name) = message.src_name() {
            eos.insert(name.to_string());
        }
        data.children()
            .iter()
            .filter(|c| c.is_sink())
            .all(|c| eos.contains(c.name()))
    };
    trace!(bin = %bin.name(), src = ?message.src_name(), all_done, "child reached EOS");
    if all_done {
        bin.post_message(Message::new_eos(Some(bin)))
    } else {
        true
    }
}

/// A container element.
///
/// Derefs to [`Element`], so the whole element API (state changes, linking,
/// properties) is available on bins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bin(Element);

impl Bin {
    /// Create an empty bin; without a name it is called `binN`.
    pub fn new(name: Option<&str>) -> Bin {
        Bin(new_container(registry::bin_factory(), name, false))
    }

    pub(crate) fn from_element(element: Element) -> Bin {
        Bin(element)
    }

    /// The bin as a plain element.
    pub fn element(&self) -> &Element {
        &self.0
    }

    /// Unwrap into the element handle.
    pub fn into_element(self) -> Element {
        self.0
    }

    fn data(&self) -> Option<&BinData> {
        self.0.bin_data()
    }

    /// Take ownership of `element`.
    ///
    /// Fails if it already has a parent or a sibling has its name. The
    /// element keeps its state; use [`Element::sync_state_with_parent`] to
    /// bring it to the bin's.
    pub fn add(&self, element: &Element) -> Result<()> {
        let Some(data) = self.data() else {
            return Err(Error::ElementNotFound {
                bin: self.name().to_string(),
                name: element.name().to_string(),
            });
        };
        if element.is_ancestor_of(&self.0) {
            return Err(Error::AlreadyOwned {
                element: element.name().to_string(),
                parent: self.name().to_string(),
            });
        }

        {
            let mut children = data.children.lock();
            if children.iter().any(|c| c.name() == element.name()) {
                return Err(Error::NameInUse {
                    bin: self.name().to_string(),
                    name: element.name().to_string(),
                });
            }
            element.adopt(&self.0)?;
            children.push(element.clone());
        }
        if let Some(clock) = self.clock() {
            element.set_clock(Some(clock), self.base_time());
        }
        debug!(bin = %self.name(), element = %element.name(), "added element");
        Ok(())
    }

    /// Add several elements; stops at the first failure.
    pub fn add_many(&self, elements: &[&Element]) -> Result<()> {
        for element in elements {
            self.add(element)?;
        }
        Ok(())
    }

    /// Give up ownership of `element`.
    ///
    /// Links are kept; removing an element that is linked and PAUSED or
    /// PLAYING fails, unlink it first.
    pub fn remove(&self, element: &Element) -> Result<()> {
        let not_found = || Error::ElementNotFound {
            bin: self.name().to_string(),
            name: element.name().to_string(),
        };
        let data = self.data().ok_or_else(not_found)?;
        {
            let mut children = data.children.lock();
            let index = children
                .iter()
                .position(|c| c == element)
                .ok_or_else(not_found)?;
            let state = element.current_state();
            if state >= State::Paused && element.is_linked() {
                return Err(Error::ElementLinked {
                    element: element.name().to_string(),
                    state,
                });
            }
            children.remove(index);
            element.set_parent(None);
        }
        data.eos.lock().remove(element.name());
        debug!(bin = %self.name(), element = %element.name(), "removed element");
        Ok(())
    }

    /// Find an element by name, searching nested bins too.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        let children = self.children();
        if let Some(found) = children.iter().find(|c| c.name() == name) {
            return Some(found.clone());
        }
        children
            .iter()
            .filter_map(Element::as_bin)
            .find_map(|bin| bin.by_name(name))
    }

    /// Like [`Bin::by_name`], failing with [`Error::ElementNotFound`].
    pub fn try_by_name(&self, name: &str) -> Result<Element> {
        self.by_name(name).ok_or_else(|| Error::ElementNotFound {
            bin: self.name().to_string(),
            name: name.to_string(),
        })
    }

    /// Direct children in insertion order.
    pub fn children(&self) -> Vec<Element> {
        self.data().map(BinData::children).unwrap_or_default()
    }

    /// Number of direct children.
    pub fn num_children(&self) -> usize {
        self.data().map_or(0, |d| d.children.lock().len())
    }

    /// Direct children that are sinks.
    pub fn sinks(&self) -> Vec<Element> {
        self.children().into_iter().filter(Element::is_sink).collect()
    }

    /// Direct children that are sources.
    pub fn sources(&self) -> Vec<Element> {
        self.children().into_iter().filter(Element::is_source).collect()
    }
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.0
    }
}

impl AsRef<Element> for Bin {
    fn as_ref(&self) -> &Element {
        &self.0
    }
}

impl From<Bin> for Element {
    fn from(bin: Bin) -> Element {
        bin.0
    }
}

/// Top-level bin with a bus and a clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipeline(Bin);

impl Pipeline {
    /// Create an empty pipeline; without a name it is called `pipelineN`.
    pub fn new(name: Option<&str>) -> Pipeline {
        Pipeline(Bin(new_container(registry::pipeline_factory(), name, true)))
    }

    pub(crate) fn from_element(element: Element) -> Pipeline {
        Pipeline(Bin(element))
    }

    /// The pipeline as a bin.
    pub fn bin(&self) -> &Bin {
        &self.0
    }

    /// The message bus.
    pub fn bus(&self) -> Bus {
        match self.0.data().and_then(BinData::bus) {
            Some(bus) => bus.clone(),
            // Only reachable through a mis-tagged element; hand out a
            // detached bus rather than fail.
            None => Bus::new(self.name()),
        }
    }

    /// The clock distributed to the children.
    pub fn pipeline_clock(&self) -> Arc<dyn Clock> {
        match self.0.data().and_then(|d| d.pipeline.as_ref()) {
            Some(p) => p.clock.clone(),
            None => SystemClock::shared(),
        }
    }
}

impl Deref for Pipeline {
    type Target = Bin;

    fn deref(&self) -> &Bin {
        &self.0
    }
}

impl AsRef<Element> for Pipeline {
    fn as_ref(&self) -> &Element {
        &self.0.0
    }
}

impl From<Pipeline> for Element {
    fn from(pipeline: Pipeline) -> Element {
        pipeline.0.0
    }
}

fn new_container(factory: Arc<registry::ElementFactory>, name: Option<&str>, pipeline: bool) -> Element {
    let name = match name {
        Some(name) => name.to_string(),
        None => factory.next_instance_name(),
    };
    let data = BinData::new(pipeline, &name);
    Element::new(factory, name, ElementKind::Bin(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{ElementImpl, PadTemplate};
    use crate::registry::{ElementFactory, ElementFlags};

    struct Plain;
    impl ElementImpl for Plain {}

    fn leaf(name: &str, flags: ElementFlags) -> Element {
        let factory = Arc::new(
            ElementFactory::builder("bin-test")
                .flags(flags)
                .pad_template(PadTemplate::sink_any())
                .pad_template(PadTemplate::src_any())
                .build(|| Ok(Box::new(Plain))),
        );
        factory.create(Some(name)).unwrap()
    }

    #[test]
    fn test_add_and_lookup() {
        let bin = Bin::new(Some("outer"));
        let inner = Bin::new(Some("inner"));
        let a = leaf("a", ElementFlags::empty());
        let b = leaf("b", ElementFlags::empty());
        bin.add(&a).unwrap();
        inner.add(&b).unwrap();
        bin.add(&inner).unwrap();

        assert_eq!(bin.num_children(), 2);
        assert_eq!(bin.by_name("a"), Some(a.clone()));
        assert_eq!(bin.by_name("b"), Some(b.clone()));
        assert_eq!(a.parent(), Some(bin.element().clone()));
        assert!(bin.by_name("missing").is_none());
        assert!(matches!(bin.try_by_name("missing"), Err(Error::ElementNotFound { .. })));
    }

    #[test]
    fn test_add_rejects_owned_and_duplicate_names() {
        let one = Bin::new(Some("one"));
        let two = Bin::new(Some("two"));
        let a = leaf("a", ElementFlags::empty());
        one.add(&a).unwrap();
        assert!(matches!(two.add(&a), Err(Error::AlreadyOwned { .. })));

        let other_a = leaf("a", ElementFlags::empty());
        assert!(matches!(one.add(&other_a), Err(Error::NameInUse { .. })));
        assert!(other_a.parent().is_none());

        assert!(matches!(one.add(one.element()), Err(Error::AlreadyOwned { .. })));
    }

    #[test]
    fn test_remove_clears_parent() {
        let bin = Bin::new(None);
        let a = leaf("a", ElementFlags::empty());
        bin.add(&a).unwrap();
        bin.remove(&a).unwrap();
        assert!(a.parent().is_none());
        assert!(matches!(bin.remove(&a), Err(Error::ElementNotFound { .. })));
    }

    #[test]
    fn test_sink_and_source_roles() {
        let bin = Bin::new(None);
        let src = leaf("src", ElementFlags::SOURCE);
        let sink = leaf("sink", ElementFlags::SINK);
        bin.add_many(&[&src, &sink]).unwrap();
        assert_eq!(bin.sources(), vec![src]);
        assert_eq!(bin.sinks(), vec![sink]);
        assert!(bin.is_sink());
        assert!(bin.is_source());
    }

    #[test]
    fn test_pipeline_has_bus() {
        let pipeline = Pipeline::new(Some("p"));
        assert!(pipeline.is_pipeline());
        assert!(pipeline.is_bin());
        assert_eq!(pipeline.bus().name(), "p");
        assert!(pipeline.as_pipeline().is_some());
        assert!(Bin::new(None).as_pipeline().is_none());
    }
}
