//! Metrics collection using metrics-rs.

use crate::element::State;
use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const MESSAGES_POSTED: &str = "pipewright_messages_posted";
const STATE_CHANGES: &str = "pipewright_state_changes";
const LINKS: &str = "pipewright_links";
const BUS_DEPTH: &str = "pipewright_bus_depth";
const DEVICES: &str = "pipewright_devices";

/// Initialize metrics descriptions.
///
/// Called by [`initialize`](crate::initialize). Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        MESSAGES_POSTED,
        Unit::Count,
        "Messages posted to pipeline buses, by message type"
    );
    metrics::describe_counter!(
        STATE_CHANGES,
        Unit::Count,
        "Committed single-step state changes, by from/to state"
    );
    metrics::describe_counter!(LINKS, Unit::Count, "Pad link attempts, by result");
    metrics::describe_gauge!(BUS_DEPTH, Unit::Count, "Messages waiting on a bus");
    metrics::describe_gauge!(
        DEVICES,
        Unit::Count,
        "Devices currently known to a device monitor"
    );
}

/// Record a message posted to a bus.
#[inline]
pub fn record_message_posted(kind: &'static str) {
    counter!(MESSAGES_POSTED, "type" => kind).increment(1);
}

/// Record a committed state change step.
#[inline]
pub fn record_state_change(from: State, to: State) {
    counter!(STATE_CHANGES, "from" => from.name(), "to" => to.name()).increment(1);
}

/// Record a link attempt.
#[inline]
pub fn record_link(ok: bool) {
    let result = if ok { "ok" } else { "failed" };
    counter!(LINKS, "result" => result).increment(1);
}

/// Record the number of messages waiting on a bus.
#[inline]
pub fn record_bus_depth(bus: &str, depth: usize) {
    gauge!(BUS_DEPTH, "bus" => bus.to_string()).set(depth as f64);
}

/// Record the number of devices a monitor knows about.
#[inline]
pub fn record_devices(count: usize) {
    gauge!(DEVICES).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        // Idempotent.
        init_metrics();
    }

    #[test]
    fn test_recording_without_recorder() {
        record_message_posted("eos");
        record_state_change(State::Null, State::Ready);
        record_link(true);
        record_link(false);
        record_bus_depth("pipeline0", 3);
        record_devices(2);
    }
}
