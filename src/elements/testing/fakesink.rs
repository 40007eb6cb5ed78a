//! `fakesink`: a sink that swallows buffers.
//!
//! With `async=true` (the default) READY to PAUSED completes only once the
//! first buffer (or EOS) arrived, like a real renderer prerolling. In PAUSED
//! the streaming thread is then held in `chain` until PLAYING.

use crate::buffer::Buffer;
use crate::bus::Message;
use crate::clock::ClockTime;
use crate::element::{
    Element, ElementImpl, Pad, PadTemplate, ParamSpec, PropertyValue, State, StateChange,
    StateChangeSuccess,
};
use crate::error::{FlowError, FlowResult, Result};
use crate::event::Event;
use crate::registry::{ElementFactory, ElementFlags};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Upper bound of one wait, so state changes are noticed.
const WAIT_SLICE: Duration = Duration::from_millis(10);

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("fakesink")
        .metadata("Fake Sink", "Sink", "Discard buffers")
        .flags(ElementFlags::SINK)
        .pad_template(PadTemplate::sink_any())
        .property(ParamSpec::bool("sync", "Wait for the clock before dropping", false))
        .property(ParamSpec::bool("async", "Preroll asynchronously", true))
        .property(ParamSpec::bool("silent", "Do not log every buffer", true))
        .property(
            ParamSpec::uint64("buffers-received", "Buffers received since READY", 0, u64::MAX, 0)
                .read_only(),
        )
        .build(|| Ok(Box::new(FakeSink::default())))
}

#[derive(Debug, Default)]
struct SinkState {
    playing: bool,
    flushing: bool,
    prerolled: bool,
    eos: bool,
    received: u64,
    position: Option<ClockTime>,
    segment_start: ClockTime,
}

/// Sink that counts and drops buffers.
#[derive(Default)]
pub(crate) struct FakeSink {
    state: Mutex<SinkState>,
    cond: Condvar,
}

impl FakeSink {
    /// Commit an asynchronous READY to PAUSED step.
    ///
    /// The step may still be running on the control thread when the first
    /// buffer arrives; retry until it has been handed over.
    fn preroll(&self, element: &Element) {
        {
            let mut state = self.state.lock();
            if state.prerolled {
                return;
            }
            state.prerolled = true;
        }
        debug!(element = %element.name(), "prerolled");
        loop {
            element.continue_state(Ok(StateChangeSuccess::Success));
            if element.pending_state() != Some(State::Paused)
                || element.current_state() >= State::Paused
            {
                return;
            }
            let mut state = self.state.lock();
            if state.flushing {
                return;
            }
            self.cond.wait_for(&mut state, Duration::from_millis(1));
        }
    }

    /// Hold the streaming thread until PLAYING or a flush.
    fn wait_playing<'a>(
        &self,
        mut state: MutexGuard<'a, SinkState>,
    ) -> std::result::Result<MutexGuard<'a, SinkState>, FlowError> {
        while !state.playing && !state.flushing {
            self.cond.wait(&mut state);
        }
        if state.flushing {
            return Err(FlowError::Flushing);
        }
        Ok(state)
    }

    /// Wait for the pipeline clock to reach the buffer's running time.
    fn wait_clock(&self, element: &Element, buffer: &Buffer) -> FlowResult {
        let Some(clock) = element.clock() else {
            return Ok(());
        };
        let pts = buffer.pts();
        if pts.is_none() {
            return Ok(());
        }
        let mut state = self.state.lock();
        let running = pts.saturating_sub(state.segment_start);
        let deadline = element.base_time().saturating_add(running);
        trace!(element = %element.name(), %deadline, "waiting for clock");
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if !state.playing {
                state = self.wait_playing(state)?;
                continue;
            }
            let now = clock.now();
            if now >= deadline {
                return Ok(());
            }
            let left = deadline.saturating_sub(now).as_timeout().unwrap_or(WAIT_SLICE);
            self.cond.wait_for(&mut state, left.min(WAIT_SLICE));
        }
    }
}

impl ElementImpl for FakeSink {
    fn change_state(&self, element: &Element, transition: StateChange) -> Result<StateChangeSuccess> {
        match transition {
            StateChange::READY_TO_PAUSED => {
                *self.state.lock() = SinkState::default();
                if element.property::<bool>("async") {
                    return Ok(StateChangeSuccess::Async);
                }
                self.state.lock().prerolled = true;
            }
            StateChange::PAUSED_TO_PLAYING => {
                self.state.lock().playing = true;
                self.cond.notify_all();
            }
            StateChange::PLAYING_TO_PAUSED => {
                self.state.lock().playing = false;
                self.cond.notify_all();
            }
            StateChange::PAUSED_TO_READY => {
                self.state.lock().flushing = true;
                self.cond.notify_all();
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn chain(&self, _pad: &Pad, element: &Element, buffer: Buffer) -> FlowResult {
        {
            let state = self.state.lock();
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if state.eos {
                return Err(FlowError::Eos);
            }
        }
        self.preroll(element);
        drop(self.wait_playing(self.state.lock())?);
        if element.property::<bool>("sync") {
            self.wait_clock(element, &buffer)?;
        }

        let mut state = self.state.lock();
        state.received += 1;
        if let Some(end) = buffer.end() {
            state.position = Some(end);
        }
        if !element.property::<bool>("silent") {
            debug!(
                element = %element.name(),
                pts = %buffer.pts(),
                size = buffer.size(),
                "chain"
            );
        }
        Ok(())
    }

    fn sink_event(&self, _pad: &Pad, element: &Element, event: Event) -> bool {
        match event {
            Event::Eos => {
                self.state.lock().eos = true;
                self.preroll(element);
                if self.wait_playing(self.state.lock()).is_err() {
                    return true;
                }
                debug!(element = %element.name(), "posting EOS");
                element.post_message(Message::new_eos(Some(element)));
            }
            Event::StreamStart(_) => {
                element.post_message(Message::new_stream_start(Some(element)));
            }
            Event::Segment { start, .. } => {
                self.state.lock().segment_start = start;
            }
            Event::FlushStart => {
                self.state.lock().flushing = true;
                self.cond.notify_all();
            }
            Event::FlushStop { .. } => {
                let mut state = self.state.lock();
                state.flushing = false;
                state.eos = false;
            }
            _ => {}
        }
        true
    }

    fn query_position(&self, _element: &Element) -> Option<ClockTime> {
        self.state.lock().position
    }

    fn property(&self, _element: &Element, name: &str) -> Option<PropertyValue> {
        match name {
            "buffers-received" => Some(PropertyValue::UInt64(self.state.lock().received)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageTypes;
    use crate::config::RuntimeConfig;
    use crate::pipeline::Pipeline;
    use crate::runtime;

    fn init() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
    }

    fn src_sink(num_buffers: i32) -> (Pipeline, Element, Element) {
        init();
        let pipeline = Pipeline::new(None);
        let src = ElementFactory::make("fakesrc", None).unwrap();
        let sink = ElementFactory::make("fakesink", None).unwrap();
        src.set_property("num-buffers", num_buffers).unwrap();
        pipeline.add_many(&[&src, &sink]).unwrap();
        src.link(&sink).unwrap();
        (pipeline, src, sink)
    }

    #[test]
    fn test_preroll_is_async() {
        let (pipeline, _src, sink) = src_sink(-1);
        assert_eq!(pipeline.set_state(State::Paused).unwrap(), StateChangeSuccess::Async);

        let (result, current, pending) = pipeline.state(ClockTime::from_secs(5));
        assert_eq!(result.unwrap(), StateChangeSuccess::Success);
        assert_eq!(current, State::Paused);
        assert_eq!(pending, None);
        assert_eq!(sink.current_state(), State::Paused);
        // The prerolled buffer is held, not counted.
        assert_eq!(sink.property::<u64>("buffers-received"), 0);

        pipeline.set_state(State::Null).unwrap();
        assert_eq!(sink.current_state(), State::Null);
    }

    #[test]
    fn test_counts_buffers_and_posts_eos() {
        let (pipeline, _src, sink) = src_sink(4);
        pipeline.set_state(State::Playing).unwrap();
        let msg = pipeline
            .bus()
            .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS | MessageTypes::ERROR)
            .unwrap();
        assert_eq!(msg.message_type(), MessageTypes::EOS);
        assert_eq!(sink.property::<u64>("buffers-received"), 4);
        assert_eq!(sink.query_position(), Some(ClockTime::from_millis(40)));
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_buffers_received_is_read_only() {
        init();
        let sink = ElementFactory::make("fakesink", None).unwrap();
        assert!(sink.set_property("buffers-received", 3u64).is_err());
    }

    #[test]
    fn test_empty_stream_prerolls_on_eos() {
        let (pipeline, _src, _sink) = src_sink(0);
        pipeline.set_state(State::Playing).unwrap();
        let (result, current, _) = pipeline.state(ClockTime::from_secs(5));
        assert!(result.is_ok());
        assert_eq!(current, State::Playing);
        assert!(
            pipeline
                .bus()
                .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS)
                .is_some()
        );
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_sync_waits_for_clock() {
        let (pipeline, src, sink) = src_sink(3);
        src.set_property("buffer-duration", ClockTime::from_millis(30).nanos())
            .unwrap();
        sink.set_property("sync", true).unwrap();
        let started = std::time::Instant::now();
        pipeline.set_state(State::Playing).unwrap();
        pipeline
            .bus()
            .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS)
            .unwrap();
        // The last buffer starts at 60ms running time.
        assert!(started.elapsed() >= Duration::from_millis(55));
        pipeline.set_state(State::Null).unwrap();
    }
}
