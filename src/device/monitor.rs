//! The device monitor.

use super::{Device, DeviceProvider, classes_match};
use crate::bus::{Bus, Message};
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::{observability, runtime};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

static MONITOR_COUNT: AtomicU32 = AtomicU32::new(0);

/// Handle of a filter added with [`DeviceMonitor::add_filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FilterId(u32);

struct Filter {
    id: FilterId,
    classes: Option<String>,
    caps: Option<Caps>,
}

impl Filter {
    fn matches(&self, device: &Device) -> bool {
        self.classes
            .as_deref()
            .is_none_or(|classes| classes_match(device.device_class(), classes))
            && self
                .caps
                .as_ref()
                .is_none_or(|caps| caps.can_intersect(device.caps()))
    }
}

struct Poller {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

struct Inner {
    name: String,
    bus: Bus,
    filters: Mutex<Vec<Filter>>,
    providers: Mutex<Vec<Arc<dyn DeviceProvider>>>,
    devices: Mutex<Vec<Device>>,
    next_filter: AtomicU32,
}

impl Inner {
    /// Probe every provider and announce the differences.
    fn scan(&self) {
        let found: Vec<Device> = {
            let providers = self.providers.lock().clone();
            let filters = self.filters.lock();
            let mut found = Vec::new();
            for provider in providers {
                for device in provider.probe() {
                    let wanted = filters.is_empty() || filters.iter().any(|f| f.matches(&device));
                    if wanted && !found.contains(&device) {
                        found.push(device);
                    }
                }
            }
            found
        };

        let (added, removed) = {
            let mut devices = self.devices.lock();
            let added: Vec<Device> = found.iter().filter(|d| !devices.contains(d)).cloned().collect();
            let removed: Vec<Device> = devices.iter().filter(|d| !found.contains(d)).cloned().collect();
            *devices = found;
            observability::record_devices(devices.len());
            (added, removed)
        };

        for device in removed {
            debug!(monitor = %self.name, device = %device.display_name(), "device removed");
            self.bus.post(Message::new_device_removed(&self.name, device));
        }
        for device in added {
            debug!(monitor = %self.name, device = %device.display_name(), "device added");
            self.bus.post(Message::new_device_added(&self.name, device));
        }
    }
}

/// Watches providers for devices matching a set of filters.
///
/// Filters and providers are fixed while the monitor runs: changing them
/// requires [`stop`](Self::stop) first. Dropping a started monitor stops it.
pub struct DeviceMonitor {
    inner: Arc<Inner>,
    poller: Mutex<Option<Poller>>,
}

impl DeviceMonitor {
    /// Create a stopped monitor without filters or providers.
    pub fn new() -> Result<Self> {
        runtime::ensure_initialized()?;
        let name = format!("devicemonitor{}", MONITOR_COUNT.fetch_add(1, Ordering::Relaxed));
        Ok(Self {
            inner: Arc::new(Inner {
                bus: Bus::new(format!("{name}-bus")),
                name,
                filters: Mutex::new(Vec::new()),
                providers: Mutex::new(Vec::new()),
                devices: Mutex::new(Vec::new()),
                next_filter: AtomicU32::new(1),
            }),
            poller: Mutex::new(None),
        })
    }

    /// Name, as used for the source of its messages.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bus carrying DEVICE_ADDED and DEVICE_REMOVED.
    pub fn bus(&self) -> Bus {
        self.inner.bus.clone()
    }

    /// Whether discovery is running.
    pub fn is_started(&self) -> bool {
        self.poller.lock().is_some()
    }

    /// Only report devices whose class contains every token of `classes`
    /// and whose caps intersect `caps`. `None` matches anything.
    ///
    /// A device is reported if any filter matches; without filters every
    /// device is.
    pub fn add_filter(&self, classes: Option<&str>, caps: Option<&Caps>) -> Result<FilterId> {
        let poller = self.poller.lock();
        if poller.is_some() {
            return Err(Error::MonitorStarted);
        }
        let id = FilterId(self.inner.next_filter.fetch_add(1, Ordering::Relaxed));
        self.inner.filters.lock().push(Filter {
            id,
            classes: classes.map(str::to_string),
            caps: caps.cloned(),
        });
        trace!(monitor = %self.inner.name, ?id, ?classes, "filter added");
        Ok(id)
    }

    /// Remove a filter; false if it does not exist.
    pub fn remove_filter(&self, id: FilterId) -> Result<bool> {
        let poller = self.poller.lock();
        if poller.is_some() {
            return Err(Error::MonitorStarted);
        }
        let mut filters = self.inner.filters.lock();
        let before = filters.len();
        filters.retain(|f| f.id != id);
        Ok(filters.len() != before)
    }

    /// Watch another provider.
    pub fn add_provider(&self, provider: Arc<dyn DeviceProvider>) -> Result<()> {
        let poller = self.poller.lock();
        if poller.is_some() {
            return Err(Error::MonitorStarted);
        }
        debug!(monitor = %self.inner.name, provider = %provider.name(), "provider added");
        self.inner.providers.lock().push(provider);
        Ok(())
    }

    /// Start discovery.
    ///
    /// The first scan completes before this returns, so [`devices`](Self::devices)
    /// is populated right away. Starting a started monitor does nothing.
    pub fn start(&self) -> Result<()> {
        runtime::ensure_initialized()?;
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return Ok(());
        }

        let providers = self.inner.providers.lock().clone();
        for (i, provider) in providers.iter().enumerate() {
            if let Err(e) = provider.start() {
                warn!(monitor = %self.inner.name, provider = %provider.name(), error = %e, "provider failed to start");
                for started in &providers[..i] {
                    started.stop();
                }
                return Err(e);
            }
        }
        self.inner.scan();

        let interval = runtime::config().device_poll_interval;
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = {
            let inner = self.inner.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("{}-poll", self.inner.name))
                .spawn(move || poll(&inner, &stop, interval))?
        };
        *poller = Some(Poller { stop, handle });
        debug!(monitor = %self.inner.name, ?interval, "monitor started");
        Ok(())
    }

    /// Stop discovery and forget the devices found.
    pub fn stop(&self) {
        let Some(poller) = self.poller.lock().take() else {
            return;
        };
        {
            let (stopped, cond) = &*poller.stop;
            *stopped.lock() = true;
            cond.notify_all();
        }
        if poller.handle.join().is_err() {
            warn!(monitor = %self.inner.name, "poll thread panicked");
        }
        for provider in self.inner.providers.lock().iter() {
            provider.stop();
        }
        self.inner.devices.lock().clear();
        observability::record_devices(0);
        debug!(monitor = %self.inner.name, "monitor stopped");
    }

    /// Snapshot of the matching devices.
    pub fn devices(&self) -> Vec<Device> {
        self.inner.devices.lock().clone()
    }
}

fn poll(inner: &Inner, stop: &(Mutex<bool>, Condvar), interval: Duration) {
    let (stopped, cond) = stop;
    loop {
        {
            let mut stopped = stopped.lock();
            if !*stopped {
                cond.wait_for(&mut stopped, interval);
            }
            if *stopped {
                return;
            }
        }
        inner.scan();
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DeviceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMonitor")
            .field("name", &self.inner.name)
            .field("started", &self.is_started())
            .field("devices", &self.inner.devices.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageTypes;
    use crate::clock::ClockTime;
    use crate::config::RuntimeConfig;
    use crate::device::VirtualDeviceProvider;

    fn init() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
    }

    fn device(name: &str, class: &str) -> Device {
        Device::builder(name, class, "fakesrc").build()
    }

    #[test]
    fn test_empty_monitor_start_stop() {
        init();
        let monitor = DeviceMonitor::new().unwrap();
        monitor.start().unwrap();
        assert!(monitor.is_started());
        assert!(monitor.devices().is_empty());
        monitor.stop();
        assert!(!monitor.is_started());
        assert!(monitor.devices().is_empty());
    }

    #[test]
    fn test_filters_rejected_while_started() {
        init();
        let monitor = DeviceMonitor::new().unwrap();
        let id = monitor.add_filter(Some("Video/Source"), None).unwrap();
        monitor.start().unwrap();
        assert!(matches!(monitor.add_filter(Some("Audio"), None), Err(Error::MonitorStarted)));
        assert!(matches!(monitor.remove_filter(id), Err(Error::MonitorStarted)));
        monitor.stop();
        assert!(monitor.remove_filter(id).unwrap());
        assert!(!monitor.remove_filter(id).unwrap());
    }

    #[test]
    fn test_filtered_snapshot() {
        init();
        let provider = Arc::new(VirtualDeviceProvider::new("virtual"));
        provider.add(device("cam", "Video/Source"));
        provider.add(device("mic", "Audio/Source"));
        provider.add(device("speaker", "Audio/Sink"));

        let monitor = DeviceMonitor::new().unwrap();
        monitor.add_provider(provider.clone()).unwrap();
        monitor.add_filter(Some("Source"), None).unwrap();
        monitor.start().unwrap();

        let mut names: Vec<String> =
            monitor.devices().iter().map(|d| d.display_name().to_string()).collect();
        names.sort();
        assert_eq!(names, ["cam", "mic"]);
        monitor.stop();
        assert!(monitor.devices().is_empty());
    }

    #[test]
    fn test_hotplug_posts_messages() {
        init();
        let provider = Arc::new(VirtualDeviceProvider::new("virtual"));
        let monitor = DeviceMonitor::new().unwrap();
        monitor.add_provider(provider.clone()).unwrap();
        monitor.start().unwrap();
        let bus = monitor.bus();

        let cam = device("cam", "Video/Source");
        provider.add(cam.clone());
        let msg = bus
            .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::DEVICE_ADDED)
            .unwrap();
        assert_eq!(msg.parse_device(), Some(&cam));
        assert_eq!(msg.src_name(), Some(monitor.name()));
        assert_eq!(monitor.devices(), vec![cam.clone()]);

        assert!(provider.remove(&cam));
        let msg = bus
            .timed_pop_filtered(ClockTime::from_secs(5), MessageTypes::DEVICE_REMOVED)
            .unwrap();
        assert_eq!(msg.parse_device(), Some(&cam));
        assert!(monitor.devices().is_empty());
    }
}
