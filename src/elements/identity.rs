//! `identity`: passes buffers through unchanged.
//!
//! Useful as an inspection point, to slow a stream down (`sleep-time`) or to
//! inject a streaming error after a number of buffers (`error-after`).

use crate::buffer::Buffer;
use crate::element::{Element, ElementImpl, Pad, PadTemplate, ParamSpec, StateChange, StateChangeSuccess};
use crate::error::{FlowError, FlowResult, Result};
use crate::registry::ElementFactory;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

pub(crate) fn factory() -> ElementFactory {
    ElementFactory::builder("identity")
        .metadata("Identity", "Generic", "Pass data without modification")
        .pad_template(PadTemplate::sink_any())
        .pad_template(PadTemplate::src_any())
        .property(ParamSpec::int(
            "error-after",
            "Fail with an error after this many buffers (-1 = never)",
            -1,
            i32::MAX,
            -1,
        ))
        .property(ParamSpec::uint(
            "sleep-time",
            "Microseconds to sleep for each buffer",
            0,
            u32::MAX,
            0,
        ))
        .property(ParamSpec::bool("silent", "Do not log every buffer", true))
        .build(|| Ok(Box::new(Identity::default())))
}

/// Pass-through element.
#[derive(Default)]
pub(crate) struct Identity {
    count: AtomicU64,
}

impl ElementImpl for Identity {
    fn change_state(&self, _element: &Element, transition: StateChange) -> Result<StateChangeSuccess> {
        if transition == StateChange::READY_TO_PAUSED {
            self.count.store(0, Ordering::Relaxed);
        }
        Ok(StateChangeSuccess::Success)
    }

    fn chain(&self, _pad: &Pad, element: &Element, buffer: Buffer) -> FlowResult {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let error_after: i32 = element.property("error-after");
        if u64::try_from(error_after).is_ok_and(|limit| count > limit) {
            element.post_error(
                "Failed after iterations as requested",
                Some(format!("error-after={error_after}")),
            );
            return Err(FlowError::Error);
        }

        let sleep: u32 = element.property("sleep-time");
        if sleep > 0 {
            std::thread::sleep(Duration::from_micros(u64::from(sleep)));
        }
        if !element.property::<bool>("silent") {
            debug!(element = %element.name(), pts = %buffer.pts(), size = buffer.size(), "chain");
        }

        let src = element.static_pad("src").ok_or(FlowError::NotLinked)?;
        src.push(buffer)
    }
}

#[cfg(test)]
mod tests {
    use crate::bus::MessageTypes;
    use crate::clock::ClockTime;
    use crate::config::RuntimeConfig;
    use crate::element::State;
    use crate::pipeline::launch_pipeline;
    use crate::runtime;

    #[test]
    fn test_passes_everything() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        let pipeline =
            launch_pipeline("fakesrc num-buffers=6 ! identity sleep-time=100 ! fakesink name=sink")
                .unwrap();
        pipeline.set_state(State::Playing).unwrap();
        assert!(
            pipeline
                .bus()
                .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS)
                .is_some()
        );
        let sink = pipeline.try_by_name("sink").unwrap();
        assert_eq!(sink.property::<u64>("buffers-received"), 6);
        pipeline.set_state(State::Null).unwrap();
    }

    #[test]
    fn test_error_after() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        let pipeline = launch_pipeline(
            "fakesrc num-buffers=10 ! identity name=id error-after=3 ! fakesink name=sink",
        )
        .unwrap();
        pipeline.set_state(State::Playing).unwrap();

        let msg = pipeline
            .bus()
            .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::ERROR)
            .unwrap();
        assert_eq!(msg.src_name(), Some("id"));
        let sink = pipeline.try_by_name("sink").unwrap();
        assert_eq!(sink.property::<u64>("buffers-received"), 3);
        pipeline.set_state(State::Null).unwrap();
    }
}
