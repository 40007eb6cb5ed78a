//! Graph dumps written to the configured directory.

use pipewright::config::RuntimeConfig;
use pipewright::parse;
use pipewright::pipeline::{DebugGraphDetails, debug_bin_to_dot_file};
use pipewright::prelude::*;

#[test]
fn test_dump_to_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    pipewright::initialize_with(RuntimeConfig::testing().with_dot_dump_dir(dir.path())).unwrap();
    assert_eq!(pipewright::runtime::config().dot_dump_dir.as_deref(), Some(dir.path()));

    let pipeline =
        parse::launch_pipeline("fakesrc name=src ! queue name=q ! fakesink name=sink").unwrap();
    pipeline.set_state(State::Paused).unwrap();
    pipeline.state(ClockTime::from_secs(5)).0.unwrap();

    let path = debug_bin_to_dot_file(pipeline.bin(), DebugGraphDetails::ALL, "paused")
        .unwrap()
        .expect("dump directory is configured");
    assert_eq!(path, dir.path().join("paused.dot"));

    let dot = std::fs::read_to_string(&path).unwrap();
    assert!(dot.starts_with("digraph pipeline {"));
    for name in ["src", "q", "sink"] {
        assert!(dot.contains(name), "{name} missing from dump");
    }
    assert!(dot.contains("->"));
    assert!(dot.contains("[=]"));
    pipeline.set_state(State::Null).unwrap();
}
