//! Integration tests for graph building and the state machine.

use pipewright::config::RuntimeConfig;
use pipewright::element::{PadTemplate, ParamSpec};
use pipewright::error::FlowResult;
use pipewright::parse;
use pipewright::prelude::*;
use pipewright::registry::ElementFlags;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let _ = pipewright::initialize_with(RuntimeConfig::testing());
}

fn wait_for(pipeline: &Pipeline, types: MessageTypes) -> Message {
    pipeline
        .bus()
        .timed_pop_filtered(ClockTime::from_secs(5), types)
        .unwrap_or_else(|| panic!("no {types:?} message within 5s"))
}

/// Build `fakesrc ! fakesink` by hand and run it to EOS.
#[test]
fn test_manual_pipeline_runs_to_eos() {
    init();
    let pipeline = Pipeline::new(Some("manual"));
    let src = ElementFactory::make("fakesrc", Some("src")).unwrap();
    let sink = ElementFactory::make("fakesink", Some("sink")).unwrap();
    src.set_property("num-buffers", 5i32).unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    assert_eq!(pipeline.set_state(State::Paused).unwrap(), StateChangeSuccess::Async);
    let (result, current, pending) = pipeline.state(ClockTime::from_secs(5));
    assert_eq!(result.unwrap(), StateChangeSuccess::Success);
    assert_eq!(current, State::Paused);
    assert_eq!(pending, None);

    pipeline.set_state(State::Playing).unwrap();
    let eos = wait_for(&pipeline, MessageTypes::EOS);
    assert!(eos.is_from(&pipeline));
    assert_eq!(sink.property::<u64>("buffers-received"), 5);

    pipeline.set_state(State::Null).unwrap();
    assert_eq!(pipeline.current_state(), State::Null);
    assert_eq!(src.current_state(), State::Null);
    assert_eq!(sink.current_state(), State::Null);
}

/// While preroll is outstanding the step in flight is reported, not the
/// final target.
#[test]
fn test_state_reports_step_in_flight() {
    init();
    let pipeline = Pipeline::new(None);
    let sink = ElementFactory::make("fakesink", None).unwrap();
    pipeline.add(&sink).unwrap();

    assert_eq!(pipeline.set_state(State::Playing).unwrap(), StateChangeSuccess::Async);
    let (result, current, pending) = pipeline.state(ClockTime::ZERO);
    assert_eq!(result.unwrap(), StateChangeSuccess::Async);
    assert_eq!(current, State::Ready);
    assert_eq!(pending, Some(State::Paused));
    assert_eq!(pipeline.target_state(), Some(State::Playing));
    pipeline.set_state(State::Null).unwrap();
}

/// The pipeline announces every step it commits, in order.
#[test]
fn test_state_changed_messages_in_order() {
    init();
    let pipeline = parse::launch_pipeline("fakesrc num-buffers=1 ! fakesink").unwrap();
    pipeline.set_state(State::Playing).unwrap();
    pipeline.state(ClockTime::from_secs(5)).0.unwrap();

    let bus = pipeline.bus();
    let mut steps = Vec::new();
    while let Some(msg) = bus.pop_filtered(MessageTypes::STATE_CHANGED) {
        if msg.is_from(&pipeline) {
            let changed = msg.parse_state_changed().unwrap();
            steps.push((changed.old, changed.new));
        }
    }
    assert_eq!(
        steps,
        [
            (State::Null, State::Ready),
            (State::Ready, State::Paused),
            (State::Paused, State::Playing),
        ]
    );
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_launch_with_identity() {
    init();
    let pipeline =
        parse::launch_pipeline("fakesrc num-buffers=12 ! identity name=id ! fakesink name=sink")
            .unwrap();
    assert_eq!(pipeline.num_children(), 3);
    let id = pipeline.try_by_name("id").unwrap();
    assert_eq!(id.factory_name(), "identity");

    pipeline.set_state(State::Playing).unwrap();
    wait_for(&pipeline, MessageTypes::EOS);
    let sink = pipeline.try_by_name("sink").unwrap();
    assert_eq!(sink.property::<u64>("buffers-received"), 12);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_launch_rejects_unknown_factory() {
    init();
    let err = parse::launch("fakesrc ! no-such-element ! fakesink").unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "unexpected error: {err}");
}

#[test]
fn test_position_and_duration_queries() {
    init();
    let pipeline =
        parse::launch_pipeline("fakesrc num-buffers=10 buffer-duration=5000000 ! fakesink")
            .unwrap();
    assert_eq!(pipeline.query_duration(), Some(ClockTime::from_millis(50)));

    pipeline.set_state(State::Playing).unwrap();
    wait_for(&pipeline, MessageTypes::EOS);
    assert_eq!(pipeline.query_position(), Some(ClockTime::from_millis(50)));
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_seek_needs_paused() {
    init();
    let pipeline = parse::launch_pipeline("fakesrc ! fakesink").unwrap();
    let err = pipeline
        .seek_simple(SeekFlags::FLUSH, ClockTime::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, Error::Seek { .. }));
}

/// A flushing seek in PAUSED restarts the stream at the new position.
#[test]
fn test_flushing_seek_while_paused() {
    init();
    let pipeline = parse::launch_pipeline(
        "fakesrc num-buffers=100 buffer-duration=10000000 ! fakesink name=sink",
    )
    .unwrap();
    pipeline.set_state(State::Paused).unwrap();
    pipeline.state(ClockTime::from_secs(5)).0.unwrap();

    pipeline
        .seek(
            1.0,
            SeekFlags::FLUSH,
            ClockTime::from_millis(500),
            ClockTime::from_millis(600),
        )
        .unwrap();
    pipeline.state(ClockTime::from_secs(5)).0.unwrap();
    pipeline.set_state(State::Playing).unwrap();

    wait_for(&pipeline, MessageTypes::EOS);
    assert_eq!(pipeline.query_position(), Some(ClockTime::from_millis(600)));
    pipeline.set_state(State::Null).unwrap();
}

/// A failed link leaves both elements untouched.
#[test]
fn test_failed_link_keeps_state() {
    init();
    let pipeline = Pipeline::new(None);
    let src = ElementFactory::make("fakesrc", None).unwrap();
    let filter = ElementFactory::make("capsfilter", None).unwrap();
    src.set_property("caps", "audio/x-raw".parse::<Caps>().unwrap()).unwrap();
    filter.set_property("caps", "video/x-raw".parse::<Caps>().unwrap()).unwrap();
    pipeline.add_many(&[&src, &filter]).unwrap();
    pipeline.set_state(State::Ready).unwrap();

    assert!(src.link(&filter).is_err());
    assert!(src.static_pad("src").unwrap().peer().is_none());
    assert_eq!(src.current_state(), State::Ready);
    assert_eq!(filter.current_state(), State::Ready);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_remove_linked_element_while_paused_fails() {
    init();
    let pipeline = parse::launch_pipeline("fakesrc name=src ! fakesink name=sink").unwrap();
    pipeline.set_state(State::Paused).unwrap();
    pipeline.state(ClockTime::from_secs(5)).0.unwrap();

    let sink = pipeline.try_by_name("sink").unwrap();
    assert!(matches!(
        pipeline.remove(&sink),
        Err(Error::ElementLinked { .. })
    ));
    pipeline.set_state(State::Null).unwrap();
    pipeline.remove(&sink).unwrap();
    assert!(sink.parent().is_none());
    assert_eq!(pipeline.num_children(), 1);
}

#[test]
fn test_nested_bins_reach_playing() {
    init();
    let pipeline = Pipeline::new(Some("outer"));
    let inner = Bin::new(Some("inner"));
    let src = ElementFactory::make("fakesrc", Some("src")).unwrap();
    let queue = ElementFactory::make("queue", Some("q")).unwrap();
    let sink = ElementFactory::make("fakesink", Some("sink")).unwrap();
    src.set_property("num-buffers", 20i32).unwrap();

    inner.add_many(&[&queue, &sink]).unwrap();
    queue.link(&sink).unwrap();
    pipeline.add_many(&[&src, inner.element()]).unwrap();
    src.link_pads(Some("src"), &queue, Some("sink")).unwrap();

    assert_eq!(pipeline.try_by_name("sink").unwrap(), sink);
    pipeline.set_state(State::Playing).unwrap();
    wait_for(&pipeline, MessageTypes::EOS);
    assert_eq!(inner.current_state(), State::Playing);
    assert_eq!(sink.property::<u64>("buffers-received"), 20);
    pipeline.set_state(State::Null).unwrap();
}

/// An element added to a running pipeline catches up on request.
#[test]
fn test_sync_state_with_parent() {
    init();
    let pipeline = Pipeline::new(None);
    let sink = ElementFactory::make("fakesink", None).unwrap();
    sink.set_property("async", false).unwrap();
    pipeline.add(&sink).unwrap();
    pipeline.set_state(State::Playing).unwrap();

    let late = ElementFactory::make("fakesink", Some("late")).unwrap();
    late.set_property("async", false).unwrap();
    pipeline.add(&late).unwrap();
    assert_eq!(late.current_state(), State::Null);
    late.sync_state_with_parent().unwrap();
    assert_eq!(late.current_state(), State::Playing);
    pipeline.set_state(State::Null).unwrap();
}

static COUNTED: AtomicU64 = AtomicU64::new(0);

/// Counts buffers into a static and drops them.
struct CountingSink;

impl ElementImpl for CountingSink {
    fn chain(&self, _pad: &Pad, _element: &Element, _buffer: Buffer) -> FlowResult {
        COUNTED.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sink_event(&self, _pad: &Pad, element: &Element, event: Event) -> bool {
        if event == Event::Eos {
            element.post_message(Message::new_eos(Some(element)));
        }
        true
    }
}

#[test]
fn test_custom_factory_in_launch() {
    init();
    Registry::get().register(
        ElementFactory::builder("countingsink")
            .metadata("Counting sink", "Sink/Test", "Counts buffers")
            .flags(ElementFlags::SINK)
            .pad_template(PadTemplate::sink_any())
            .property(ParamSpec::bool("verbose", "Unused", false))
            .build(|| Ok(Box::new(CountingSink))),
    );
    assert!(Registry::get().contains("countingsink"));

    let pipeline = parse::launch_pipeline("fakesrc num-buffers=7 ! countingsink verbose=true").unwrap();
    pipeline.set_state(State::Playing).unwrap();
    wait_for(&pipeline, MessageTypes::EOS);
    assert_eq!(COUNTED.load(Ordering::SeqCst), 7);
    pipeline.set_state(State::Null).unwrap();
}

#[test]
fn test_error_message_from_streaming_thread() {
    init();
    let pipeline =
        parse::launch_pipeline("fakesrc ! identity name=id error-after=2 ! fakesink").unwrap();
    pipeline.set_state(State::Playing).unwrap();
    let msg = wait_for(&pipeline, MessageTypes::ERROR);
    assert_eq!(msg.src_name(), Some("id"));
    assert!(msg.parse_error().is_some());
    pipeline.set_state(State::Null).unwrap();
}
