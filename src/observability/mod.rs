//! Observability features: metrics.
//!
//! Logging goes through `tracing` everywhere in the crate; install any
//! subscriber to see it. This module holds the `metrics` side:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `pipewright_messages_posted` | Counter | Messages posted to buses (label `type`) |
//! | `pipewright_state_changes` | Counter | Committed state steps (labels `from`, `to`) |
//! | `pipewright_links` | Counter | Pad link attempts (label `result`) |
//! | `pipewright_bus_depth` | Gauge | Messages waiting on a bus (label `bus`) |
//! | `pipewright_devices` | Gauge | Devices known to a device monitor |
//!
//! ## Example
//!
//! ```rust,ignore
//! // Install any metrics recorder (prometheus, statsd, ...), then:
//! pipewright::initialize()?; // describes the metrics above
//! ```

mod metrics;

pub use metrics::{
    init_metrics, record_bus_depth, record_devices, record_link, record_message_posted,
    record_state_change,
};
