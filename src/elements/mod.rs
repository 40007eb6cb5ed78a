//! Built-in elements.
//!
//! Enough to run graphs end to end without any media code:
//!
//! ## Sources and sinks
//! - `fakesrc`: empty, timestamped buffers from its own thread
//! - `fakesink`: drops buffers, prerolls asynchronously
//!
//! ## Filters
//! - `identity`: pass-through with optional delay and error injection
//! - `capsfilter`: restricts the caps of a link
//! - `valve`: drops buffers while closed
//!
//! ## Flow
//! - `queue`: thread boundary over a bounded channel
//! - `tee`: 1-to-N fan-out on `src_%u` request pads
//! - `funnel`: N-to-1 merge on `sink_%u` request pads
//!
//! `bin` and `pipeline` are registered here too.

mod flow;
mod identity;
mod testing;
mod util;

use crate::registry::{self, Registry};

/// Register every built-in factory.
pub(crate) fn register_builtins() {
    let registry = Registry::get();
    registry.register_arc(registry::bin_factory());
    registry.register_arc(registry::pipeline_factory());
    for factory in [
        testing::fakesrc_factory(),
        testing::fakesink_factory(),
        identity::factory(),
        util::capsfilter_factory(),
        flow::valve_factory(),
        flow::queue_factory(),
        flow::tee_factory(),
        flow::funnel_factory(),
    ] {
        registry.register(factory);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RuntimeConfig;
    use crate::registry::{ElementFactory, Registry};
    use crate::runtime;

    #[test]
    fn test_builtins_are_registered() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
        for name in [
            "bin", "pipeline", "fakesrc", "fakesink", "identity", "capsfilter", "valve", "queue",
            "tee", "funnel",
        ] {
            assert!(Registry::get().contains(name), "{name} missing");
        }
        let sources = Registry::get().factories_with_klass("Source");
        assert!(sources.iter().any(|f| f.name() == "fakesrc"));

        let bin = ElementFactory::make("bin", Some("container")).unwrap();
        assert!(bin.is_bin());
        assert!(!bin.is_pipeline());
    }
}
