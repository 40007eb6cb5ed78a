//! `fakesrc`: a source that produces empty buffers on its own thread.

use crate::buffer::Buffer;
use crate::bus::Message;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{
    Element, ElementImpl, Pad, PadTemplate, ParamSpec, PropertyValue, State, StateChange,
    StateChangeSuccess, Task, WeakElement,
};
use crate::error::{FlowError, Result};
use crate::event::{Event, SeekEvent, SeekFlags};
use crate::registry::{ElementFactory, ElementFlags};
use parking_lot::{Condvar, Mutex};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

const DEFAULT_BUFFER_DURATION: u64 = 10 * ClockTime::MSECOND.nanos();

/// How long a live source waits for PLAYING before checking for a stop.
const LIVE_WAIT: Duration = Duration::from_millis(20);

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("fakesrc")
        .metadata("Fake Source", "Source", "Push empty buffers downstream")
        .flags(ElementFlags::SOURCE)
        .pad_template(PadTemplate::src_any())
        .property(ParamSpec::int(
            "num-buffers",
            "Number of buffers to output before EOS (-1 = unlimited)",
            -1,
            i32::MAX,
            -1,
        ))
        .property(ParamSpec::bool(
            "is-live",
            "Only produce data in PLAYING",
            false,
        ))
        .property(ParamSpec::uint64(
            "buffer-duration",
            "Duration of each buffer in nanoseconds",
            1,
            u64::MAX - 1,
            DEFAULT_BUFFER_DURATION,
        ))
        .property(ParamSpec::int("sizemax", "Size of each buffer in bytes", 0, i32::MAX, 4096))
        .property(ParamSpec::caps("caps", "Caps announced downstream", Caps::new_any()))
        .build(|| Ok(Box::new(FakeSrc::default())))
}

#[derive(Clone, Debug)]
struct Settings {
    num_buffers: Option<u64>,
    is_live: bool,
    buffer_duration: ClockTime,
    size: usize,
    caps: Caps,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_buffers: None,
            is_live: false,
            buffer_duration: ClockTime::from_nanos(DEFAULT_BUFFER_DURATION),
            size: 4096,
            caps: Caps::new_any(),
        }
    }
}

impl Settings {
    fn read(element: &Element) -> Self {
        let num_buffers: i32 = element.property("num-buffers");
        Self {
            num_buffers: u64::try_from(num_buffers).ok(),
            is_live: element.property("is-live"),
            buffer_duration: ClockTime::from_nanos(element.property::<u64>("buffer-duration").max(1)),
            size: usize::try_from(element.property::<i32>("sizemax")).unwrap_or(0),
            caps: element.property("caps"),
        }
    }
}

#[derive(Debug)]
struct Position {
    count: u64,
    stop_count: Option<u64>,
    need_start: bool,
    need_segment: bool,
    segment_start: ClockTime,
    rate: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            count: 0,
            stop_count: None,
            need_start: true,
            need_segment: true,
            segment_start: ClockTime::ZERO,
            rate: 1.0,
        }
    }
}

#[derive(Default)]
struct Shared {
    settings: Mutex<Settings>,
    position: Mutex<Position>,
    /// Held by the streaming thread around every push; flushing seeks take
    /// it to know the thread is out of the data path.
    stream_lock: Mutex<()>,
    playing: Mutex<bool>,
    playing_cond: Condvar,
    seeking: AtomicBool,
    last_seek: AtomicU32,
}

impl Shared {
    fn set_playing(&self, playing: bool) {
        *self.playing.lock() = playing;
        self.playing_cond.notify_all();
    }

    fn wait_playing(&self) -> bool {
        let mut playing = self.playing.lock();
        if !*playing {
            self.playing_cond.wait_for(&mut playing, LIVE_WAIT);
        }
        *playing
    }

    /// Events due before the next buffer, and the buffer itself unless the
    /// stream has ended.
    fn next(&self, element: &Element) -> (Vec<Event>, Option<Buffer>) {
        let settings = self.settings.lock().clone();
        let mut position = self.position.lock();
        let mut events = Vec::new();
        if position.need_start {
            events.push(Event::StreamStart(format!("{}/stream", element.name())));
            events.push(Event::Caps(settings.caps.clone()));
            position.need_start = false;
        }
        if position.need_segment {
            events.push(Event::Segment {
                start: position.segment_start,
                rate: position.rate,
            });
            position.need_segment = false;
        }

        let limit = match (settings.num_buffers, position.stop_count) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if limit.is_some_and(|limit| position.count >= limit) {
            return (events, None);
        }

        let mut buffer = Buffer::with_size(settings.size);
        buffer.set_pts(settings.buffer_duration.saturating_mul(position.count));
        buffer.set_duration(settings.buffer_duration);
        buffer.set_offset(position.count);
        position.count += 1;
        (events, Some(buffer))
    }

    fn apply_seek(&self, seek: &SeekEvent) {
        let duration = self.settings.lock().buffer_duration.nanos();
        let mut position = self.position.lock();
        position.count = seek.start.checked_div(duration).unwrap_or(0);
        // A partial buffer before `stop` is still produced.
        position.stop_count = seek.stop.to_option().map(|stop| stop.nanos().div_ceil(duration));
        position.segment_start = if seek.start.is_some() {
            seek.start
        } else {
            ClockTime::ZERO
        };
        position.rate = seek.rate;
        position.need_segment = true;
    }
}

/// Source of empty buffers with increasing timestamps.
pub(crate) struct FakeSrc {
    task: Task,
    shared: Arc<Shared>,
}

impl Default for FakeSrc {
    fn default() -> Self {
        Self {
            task: Task::new("fakesrc"),
            shared: Arc::default(),
        }
    }
}

impl FakeSrc {
    fn start_task(&self, element: &Element) -> Result<()> {
        let Some(pad) = element.static_pad("src") else {
            return Ok(());
        };
        let shared = self.shared.clone();
        let weak = element.downgrade();
        self.task.start(move || iterate(&shared, &weak, &pad))
    }

    fn handle_seek(&self, element: &Element, pad: &Pad, seek: SeekEvent) -> bool {
        if self.shared.last_seek.swap(seek.seqnum, Ordering::SeqCst) == seek.seqnum {
            trace!(element = %element.name(), seqnum = seek.seqnum, "seek already handled");
            return true;
        }
        debug!(element = %element.name(), start = %seek.start, rate = seek.rate, "seeking");

        if seek.flags.contains(SeekFlags::FLUSH) {
            self.shared.seeking.store(true, Ordering::SeqCst);
            pad.push_event(Event::FlushStart);
            {
                let _stream = self.shared.stream_lock.lock();
                self.shared.apply_seek(&seek);
                pad.push_event(Event::FlushStop { reset_time: true });
            }
            self.shared.seeking.store(false, Ordering::SeqCst);
        } else {
            self.shared.apply_seek(&seek);
        }

        if element.current_state() >= State::Paused && !self.task.is_running() {
            return self.start_task(element).is_ok();
        }
        true
    }
}

fn iterate(shared: &Shared, element: &WeakElement, pad: &Pad) -> ControlFlow<()> {
    let Some(element) = element.upgrade() else {
        return ControlFlow::Break(());
    };
    let live = shared.settings.lock().is_live;
    if live && !shared.wait_playing() {
        return ControlFlow::Continue(());
    }

    let _stream = shared.stream_lock.lock();
    let (events, buffer) = shared.next(&element);
    for event in events {
        pad.push_event(event);
    }
    let Some(buffer) = buffer else {
        debug!(element = %element.name(), "all buffers sent, pushing EOS");
        pad.push_event(Event::Eos);
        return ControlFlow::Break(());
    };

    match pad.push(buffer) {
        Ok(()) => ControlFlow::Continue(()),
        Err(FlowError::Flushing) if shared.seeking.load(Ordering::SeqCst) => {
            ControlFlow::Continue(())
        }
        Err(e) if e.is_fatal() => {
            debug!(element = %element.name(), reason = %e, "pausing task");
            element.post_error(
                "Internal data stream error",
                Some(format!("streaming stopped, reason {e}")),
            );
            pad.push_event(Event::Eos);
            ControlFlow::Break(())
        }
        Err(e) => {
            debug!(element = %element.name(), reason = %e, "pausing task");
            ControlFlow::Break(())
        }
    }
}

impl ElementImpl for FakeSrc {
    fn change_state(&self, element: &Element, transition: StateChange) -> Result<StateChangeSuccess> {
        match transition {
            StateChange::READY_TO_PAUSED => {
                let settings = Settings::read(element);
                let live = settings.is_live;
                *self.shared.settings.lock() = settings;
                *self.shared.position.lock() = Position::default();
                self.shared.set_playing(false);
                self.start_task(element)?;
                if live {
                    return Ok(StateChangeSuccess::NoPreroll);
                }
            }
            StateChange::PAUSED_TO_PLAYING => self.shared.set_playing(true),
            StateChange::PLAYING_TO_PAUSED => {
                self.shared.set_playing(false);
                if self.shared.settings.lock().is_live {
                    return Ok(StateChangeSuccess::NoPreroll);
                }
            }
            StateChange::PAUSED_TO_READY => {
                self.task.stop();
                self.shared.set_playing(false);
                self.task.join();
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn src_event(&self, pad: &Pad, element: &Element, event: Event) -> bool {
        match event {
            Event::Seek(seek) => self.handle_seek(element, pad, seek),
            _ => false,
        }
    }

    fn property_changed(&self, element: &Element, name: &str, value: &PropertyValue) {
        match (name, value) {
            ("caps", PropertyValue::Caps(caps)) => {
                if let Some(pad) = element.static_pad("src") {
                    debug!(element = %element.name(), %caps, "restricting source caps");
                    pad.set_caps(caps.clone());
                }
            }
            ("num-buffers" | "buffer-duration", _) if element.current_state() >= State::Paused => {
                element.post_message(Message::new_duration_changed(Some(element)));
            }
            _ => {}
        }
    }

    fn query_position(&self, _element: &Element) -> Option<ClockTime> {
        let duration = self.shared.settings.lock().buffer_duration;
        Some(duration.saturating_mul(self.shared.position.lock().count))
    }

    fn query_duration(&self, element: &Element) -> Option<ClockTime> {
        let num_buffers = u64::try_from(element.property::<i32>("num-buffers")).ok()?;
        let duration = ClockTime::from_nanos(element.property::<u64>("buffer-duration"));
        Some(duration.saturating_mul(num_buffers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::element::{ProbeReturn, ProbeType};
    use crate::runtime;
    use std::sync::atomic::AtomicU64;

    fn init() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
    }

    #[test]
    fn test_duration_query() {
        init();
        let src = ElementFactory::make("fakesrc", None).unwrap();
        assert_eq!(src.query_duration(), None);
        src.set_property("num-buffers", 5).unwrap();
        assert_eq!(src.query_duration(), Some(ClockTime::from_millis(50)));
        src.set_property("buffer-duration", ClockTime::SECOND.nanos()).unwrap();
        assert_eq!(src.query_duration(), Some(ClockTime::from_secs(5)));
    }

    #[test]
    fn test_duration_change_is_announced() {
        init();
        let pipeline = crate::pipeline::Pipeline::new(None);
        let src = ElementFactory::make("fakesrc", None).unwrap();
        let sink = ElementFactory::make("fakesink", None).unwrap();
        pipeline.add_many(&[&src, &sink]).unwrap();
        src.link(&sink).unwrap();
        pipeline.set_state(State::Paused).unwrap();
        pipeline.state(ClockTime::from_secs(5)).0.unwrap();

        src.set_property("num-buffers", 20).unwrap();
        let bus = pipeline.bus();
        let msg = bus
            .timed_pop_filtered(ClockTime::from_secs(1), crate::bus::MessageTypes::DURATION_CHANGED)
            .unwrap();
        assert!(msg.is_from(&src));
        assert_eq!(pipeline.query_duration(), Some(ClockTime::from_millis(200)));
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_caps_property_restricts_src_pad() {
        init();
        let src = ElementFactory::make("fakesrc", None).unwrap();
        let filter = ElementFactory::make("capsfilter", None).unwrap();
        let audio: Caps = "audio/x-raw".parse().unwrap();
        src.set_property("caps", &audio).unwrap();
        filter
            .set_property("caps", "video/x-raw".parse::<Caps>().unwrap())
            .unwrap();
        assert_eq!(src.static_pad("src").unwrap().caps(), audio);

        assert!(src.link(&filter).is_err());
        assert!(!src.static_pad("src").unwrap().is_linked());

        filter.set_property("caps", &audio).unwrap();
        src.link(&filter).unwrap();
    }

    #[test]
    fn test_seek_positions() {
        let shared = Shared::default();
        shared.apply_seek(&SeekEvent::new(
            1.0,
            SeekFlags::FLUSH,
            ClockTime::from_millis(35),
            ClockTime::from_millis(61),
        ));
        let position = shared.position.lock();
        assert_eq!(position.count, 3);
        assert_eq!(position.stop_count, Some(7));
        assert_eq!(position.segment_start, ClockTime::from_millis(35));
        assert!(position.need_segment);
    }

    #[test]
    fn test_unlinked_source_posts_error() {
        init();
        let pipeline = crate::pipeline::Pipeline::new(None);
        let src = ElementFactory::make("fakesrc", None).unwrap();
        pipeline.add(&src).unwrap();
        pipeline.set_state(State::Playing).unwrap();

        let msg = pipeline
            .bus()
            .timed_pop_filtered(ClockTime::from_secs(5), crate::bus::MessageTypes::ERROR)
            .unwrap();
        let error = msg.parse_error().unwrap();
        assert!(error.debug().unwrap().contains("not-linked"), "{:?}", error.debug());
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_buffers_are_timestamped() {
        init();
        let src = ElementFactory::make("fakesrc", None).unwrap();
        let sink = ElementFactory::make("fakesink", None).unwrap();
        src.set_property("num-buffers", 3).unwrap();
        sink.set_property("async", false).unwrap();
        let pipeline = crate::pipeline::Pipeline::new(None);
        pipeline.add_many(&[&src, &sink]).unwrap();
        src.link(&sink).unwrap();

        let last_pts = Arc::new(AtomicU64::new(u64::MAX));
        let seen = last_pts.clone();
        src.static_pad("src")
            .unwrap()
            .add_probe(ProbeType::BUFFER, move |_, info| {
                if let Some(buffer) = info.buffer() {
                    seen.store(buffer.pts().nanos(), Ordering::SeqCst);
                }
                ProbeReturn::Ok
            })
            .unwrap();

        pipeline.set_state(State::Playing).unwrap();
        pipeline
            .bus()
            .timed_pop_filtered(ClockTime::from_secs(5), crate::bus::MessageTypes::EOS)
            .unwrap();
        assert_eq!(last_pts.load(Ordering::SeqCst), ClockTime::from_millis(20).nanos());
        pipeline.set_state(State::Null).unwrap();
    }
}
