//! Device discovery through the public API.

use pipewright::config::RuntimeConfig;
use pipewright::device::{DeviceProvider, VirtualDeviceProvider};
use pipewright::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn init() {
    let _ = pipewright::initialize_with(RuntimeConfig::testing());
}

fn camera(name: &str) -> Device {
    Device::builder(name, "Video/Source", "fakesrc")
        .caps("video/x-raw, width=(int)1280, height=(int)720".parse().unwrap())
        .property("device.api", "virtual")
        .element_property("num-buffers", "3")
        .build()
}

fn microphone(name: &str) -> Device {
    Device::builder(name, "Audio/Source", "fakesrc")
        .caps("audio/x-raw, channels=(int)2".parse().unwrap())
        .build()
}

#[test]
fn test_monitor_without_providers_is_empty() {
    init();
    let monitor = DeviceMonitor::new().unwrap();
    monitor.add_filter(Some("Video/Source"), None).unwrap();
    monitor.start().unwrap();
    assert!(monitor.devices().is_empty());
    assert!(monitor.bus().pop().is_none());
    monitor.stop();
}

#[test]
fn test_caps_filter() {
    init();
    let provider = Arc::new(VirtualDeviceProvider::new("virtual"));
    provider.add(camera("cam0"));
    provider.add(microphone("mic0"));

    let monitor = DeviceMonitor::new().unwrap();
    monitor.add_provider(provider).unwrap();
    let audio: Caps = "audio/x-raw".parse().unwrap();
    monitor.add_filter(None, Some(&audio)).unwrap();
    monitor.start().unwrap();

    let devices = monitor.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name(), "mic0");
    monitor.stop();
}

/// The initial scan announces devices already present.
#[test]
fn test_initial_devices_are_announced() {
    init();
    let provider = Arc::new(VirtualDeviceProvider::new("virtual"));
    provider.add(camera("cam0"));
    provider.add(camera("cam1"));

    let monitor = DeviceMonitor::new().unwrap();
    monitor.add_provider(provider).unwrap();
    monitor.start().unwrap();

    let bus = monitor.bus();
    let mut announced = Vec::new();
    while let Some(msg) = bus.pop_filtered(MessageTypes::DEVICE_ADDED) {
        announced.push(msg.parse_device().unwrap().display_name().to_string());
    }
    announced.sort();
    assert_eq!(announced, ["cam0", "cam1"]);
    monitor.stop();
}

/// A discovered device makes a working element.
#[test]
fn test_device_element_in_pipeline() {
    init();
    let provider = Arc::new(VirtualDeviceProvider::new("virtual"));
    provider.add(camera("cam0"));
    let monitor = DeviceMonitor::new().unwrap();
    monitor.add_provider(provider).unwrap();
    monitor.start().unwrap();

    let device = monitor.devices().into_iter().next().unwrap();
    assert_eq!(device.property_string("device.api"), Some("virtual"));
    let src = device.create_element(Some("camsrc")).unwrap();
    monitor.stop();

    let pipeline = Pipeline::new(None);
    let sink = ElementFactory::make("fakesink", None).unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();
    pipeline.set_state(State::Playing).unwrap();
    assert!(
        pipeline
            .bus()
            .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::EOS)
            .is_some()
    );
    assert_eq!(sink.property::<u64>("buffers-received"), 3);
    pipeline.set_state(State::Null).unwrap();
}

/// Tracks start and stop calls; refuses to start when asked.
struct FlakyProvider {
    fail: bool,
    running: AtomicBool,
}

impl DeviceProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    fn probe(&self) -> Vec<Device> {
        Vec::new()
    }

    fn start(&self) -> pipewright::Result<()> {
        if self.fail {
            return Err(Error::Io(std::io::Error::other("backend unavailable")));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[test]
fn test_provider_start_failure_rolls_back() {
    init();
    let good = Arc::new(FlakyProvider {
        fail: false,
        running: AtomicBool::new(false),
    });
    let bad = Arc::new(FlakyProvider {
        fail: true,
        running: AtomicBool::new(false),
    });
    let monitor = DeviceMonitor::new().unwrap();
    monitor.add_provider(good.clone()).unwrap();
    monitor.add_provider(bad).unwrap();

    assert!(monitor.start().is_err());
    assert!(!monitor.is_started());
    assert!(!good.running.load(Ordering::SeqCst));
}

#[test]
fn test_drop_stops_providers() {
    init();
    let provider = Arc::new(FlakyProvider {
        fail: false,
        running: AtomicBool::new(false),
    });
    {
        let monitor = DeviceMonitor::new().unwrap();
        monitor.add_provider(provider.clone()).unwrap();
        monitor.start().unwrap();
        assert!(provider.running.load(Ordering::SeqCst));
    }
    assert!(!provider.running.load(Ordering::SeqCst));
}
