//! `queue`: a thread boundary.
//!
//! Upstream pushes into a bounded channel and returns; a task of the queue
//! pushes the items downstream. A full channel blocks upstream, which is the
//! backpressure. Flushes close the channel so both sides unblock, and
//! FLUSH_STOP opens a fresh one.

use crate::buffer::Buffer;
use crate::element::{
    Element, ElementImpl, Pad, PadDirection, PadTemplate, ParamSpec, PropertyValue, State, StateChange,
    StateChangeSuccess, Task, WeakElement,
};
use crate::error::{FlowError, FlowResult, Result};
use crate::event::Event;
use crate::registry::ElementFactory;
use kanal::{Receiver, Sender};
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("queue")
        .metadata("Queue", "Generic", "Simple data queue")
        .pad_template(PadTemplate::sink_any())
        .pad_template(PadTemplate::src_any())
        .property(ParamSpec::uint(
            "max-size-buffers",
            "Max. number of items in the queue",
            1,
            u32::MAX,
            200,
        ))
        .property(
            ParamSpec::uint("current-level-buffers", "Current number of items", 0, u32::MAX, 0)
                .read_only(),
        )
        .build(|| Ok(Box::new(Queue::default())))
}

enum Item {
    Buffer(Buffer),
    Event(Event),
}

struct Channel {
    tx: Sender<Item>,
    rx: Receiver<Item>,
}

pub(crate) struct Queue {
    task: Task,
    channel: Mutex<Option<Channel>>,
    /// Outcome of the last downstream push, returned to upstream.
    src_result: Arc<Mutex<FlowResult>>,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            task: Task::new("queue"),
            channel: Mutex::new(None),
            src_result: Arc::new(Mutex::new(Ok(()))),
        }
    }
}

impl Queue {
    /// Open a fresh channel and start draining it.
    fn open(&self, element: &Element) -> Result<()> {
        let capacity = element.property::<u32>("max-size-buffers").max(1) as usize;
        let (tx, rx) = kanal::bounded(capacity);
        let drain = rx.clone();
        *self.channel.lock() = Some(Channel { tx, rx });
        *self.src_result.lock() = Ok(());

        let Some(src) = element.static_pad("src") else {
            return Ok(());
        };
        let weak = element.downgrade();
        let src_result = self.src_result.clone();
        trace!(element = %element.name(), capacity, "queue opened");
        self.task
            .start(move || drain_one(&drain, &src, &weak, &src_result))
    }

    /// Close the channel, unblocking both sides, and wait for the task.
    fn close(&self, element: &Element) {
        self.task.stop();
        if let Some(channel) = self.channel.lock().take()
            && let Err(e) = channel.tx.close()
        {
            trace!(element = %element.name(), error = ?e, "queue channel already closed");
        }
        *self.src_result.lock() = Err(FlowError::Flushing);
        self.task.join();
        trace!(element = %element.name(), "queue closed");
    }

    fn enqueue(&self, item: Item) -> FlowResult {
        let tx = match &*self.channel.lock() {
            Some(channel) => channel.tx.clone(),
            None => return Err(FlowError::Flushing),
        };
        tx.send(item).map_err(|_| FlowError::Flushing)
    }
}

fn drain_one(
    rx: &Receiver<Item>,
    src: &Pad,
    element: &WeakElement,
    src_result: &Mutex<FlowResult>,
) -> ControlFlow<()> {
    let Ok(item) = rx.recv() else {
        return ControlFlow::Break(());
    };
    let Some(element) = element.upgrade() else {
        return ControlFlow::Break(());
    };
    match item {
        Item::Event(event) => {
            src.push_event(event);
            ControlFlow::Continue(())
        }
        Item::Buffer(buffer) => match src.push(buffer) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                *src_result.lock() = Err(e);
                debug!(element = %element.name(), reason = %e, "pausing queue task");
                if e.is_fatal() {
                    element.post_error(
                        "Internal data stream error",
                        Some(format!("streaming stopped, reason {e}")),
                    );
                    src.push_event(Event::Eos);
                }
                ControlFlow::Break(())
            }
        },
    }
}

impl ElementImpl for Queue {
    fn change_state(&self, element: &Element, transition: StateChange) -> Result<StateChangeSuccess> {
        match transition {
            StateChange::READY_TO_PAUSED => self.open(element)?,
            StateChange::PAUSED_TO_READY => self.close(element),
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn chain(&self, _pad: &Pad, _element: &Element, buffer: Buffer) -> FlowResult {
        let last = *self.src_result.lock();
        last?;
        self.enqueue(Item::Buffer(buffer))
    }

    fn sink_event(&self, _pad: &Pad, element: &Element, event: Event) -> bool {
        match event {
            Event::FlushStart => {
                let handled = element.forward_event(PadDirection::Src, event);
                self.close(element);
                handled
            }
            Event::FlushStop { .. } => {
                let handled = element.forward_event(PadDirection::Src, event);
                if element.current_state() >= State::Paused
                    || element.pending_state() == Some(State::Paused)
                {
                    return self.open(element).is_ok() && handled;
                }
                handled
            }
            event => self.enqueue(Item::Event(event)).is_ok(),
        }
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        match name {
            "current-level-buffers" => {
                let level = self.channel.lock().as_ref().map_or(0, |c| c.rx.len());
                Some(PropertyValue::UInt(u32::try_from(level).unwrap_or(u32::MAX)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageTypes;
    use crate::clock::ClockTime;
    use crate::config::RuntimeConfig;
    use crate::pipeline::launch_pipeline;
    use crate::runtime;

    #[test]
    fn test_buffers_cross_the_queue() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        let pipeline =
            launch_pipeline("fakesrc num-buffers=50 ! queue max-size-buffers=4 ! fakesink name=sink")
                .unwrap();
        pipeline.set_state(State::Playing).unwrap();
        assert!(
            pipeline
                .bus()
                .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS)
                .is_some()
        );
        let sink = pipeline.try_by_name("sink").unwrap();
        assert_eq!(sink.property::<u64>("buffers-received"), 50);
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_paused_queue_fills_up() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        let pipeline =
            launch_pipeline("fakesrc ! queue name=q max-size-buffers=3 ! fakesink").unwrap();
        pipeline.set_state(State::Paused).unwrap();
        let (result, _, _) = pipeline.state(ClockTime::from_secs(5));
        assert!(result.is_ok());

        let queue = pipeline.try_by_name("q").unwrap();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while queue.property::<u32>("current-level-buffers") < 3 && std::time::Instant::now() < deadline
        {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(queue.property::<u32>("current-level-buffers"), 3);

        pipeline.set_state(State::Null).unwrap();
        assert_eq!(queue.property::<u32>("current-level-buffers"), 0);
    }

    #[test]
    fn test_queue_reopens_after_close() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        let pipeline =
            launch_pipeline("fakesrc num-buffers=5 ! queue ! fakesink name=sink").unwrap();
        let sink = pipeline.try_by_name("sink").unwrap();
        for _ in 0..3 {
            pipeline.set_state(State::Playing).unwrap();
            assert!(
                pipeline
                    .bus()
                    .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS)
                    .is_some()
            );
            assert_eq!(sink.property::<u64>("buffers-received"), 5);
            pipeline.set_state(State::Ready).unwrap();
            pipeline.set_state(State::Null).unwrap();
        }
    }
}
