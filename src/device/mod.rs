//! Device discovery.
//!
//! A [`DeviceMonitor`] polls its [`DeviceProvider`]s on a background thread
//! and keeps a snapshot of the [`Device`]s that match its filters. Changes
//! are announced on the monitor's bus as DEVICE_ADDED and DEVICE_REMOVED.
//!
//! ```rust,ignore
//! let monitor = DeviceMonitor::new()?;
//! monitor.add_filter(Some("Video/Source"), None)?;
//! monitor.start()?;
//! for device in monitor.devices() {
//!     println!("{} ({})", device.display_name(), device.device_class());
//! }
//! let src = monitor.devices()[0].create_element(Some("camera"))?;
//! ```

mod monitor;
mod provider;

pub use monitor::{DeviceMonitor, FilterId};
pub use provider::{DeviceProvider, VirtualDeviceProvider};

use crate::caps::Caps;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::registry::ElementFactory;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(PartialEq)]
struct DeviceInner {
    display_name: String,
    device_class: String,
    caps: Caps,
    properties: BTreeMap<String, String>,
    factory: String,
    element_properties: Vec<(String, String)>,
}

/// A discovered external resource, such as a camera or a microphone.
///
/// Devices compare by content, so a provider may build fresh values on
/// every probe.
#[derive(Clone, PartialEq)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    /// Start describing a device whose elements are made by `factory`.
    pub fn builder(
        display_name: impl Into<String>,
        device_class: impl Into<String>,
        factory: impl Into<String>,
    ) -> DeviceBuilder {
        DeviceBuilder(DeviceInner {
            display_name: display_name.into(),
            device_class: device_class.into(),
            caps: Caps::new_any(),
            properties: BTreeMap::new(),
            factory: factory.into(),
            element_properties: Vec::new(),
        })
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &str {
        &self.0.display_name
    }

    /// Hierarchical class such as `Video/Source`.
    pub fn device_class(&self) -> &str {
        &self.0.device_class
    }

    /// Formats the device can produce or accept.
    pub fn caps(&self) -> &Caps {
        &self.0.caps
    }

    /// All descriptive properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.0.properties
    }

    /// A descriptive property, e.g. `device.path`.
    pub fn property_string(&self, name: &str) -> Option<&str> {
        self.0.properties.get(name).map(String::as_str)
    }

    /// Whether the class contains every `/`-separated token of `classes`.
    ///
    /// `"Video/Source"` matches `"Source/Video"` and `"Video"` matches both.
    pub fn has_classes(&self, classes: &str) -> bool {
        classes_match(&self.0.device_class, classes)
    }

    /// Create a freestanding element configured for this device.
    pub fn create_element(&self, name: Option<&str>) -> Result<Element> {
        let element = ElementFactory::make(&self.0.factory, name).map_err(|e| match e {
            Error::NotInitialized | Error::Deinitialized => e,
            other => Error::ElementCreation {
                factory: self.0.factory.clone(),
                reason: format!("device '{}': {other}", self.0.display_name),
            },
        })?;
        for (key, value) in &self.0.element_properties {
            element.set_property_from_str(key, value)?;
        }
        debug!(device = %self.0.display_name, element = %element.name(), "created device element");
        Ok(element)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("display_name", &self.0.display_name)
            .field("device_class", &self.0.device_class)
            .field("caps", &self.0.caps)
            .field("factory", &self.0.factory)
            .finish()
    }
}

/// Builder for [`Device`].
pub struct DeviceBuilder(DeviceInner);

impl DeviceBuilder {
    /// Formats of the device.
    pub fn caps(mut self, caps: Caps) -> Self {
        self.0.caps = caps;
        self
    }

    /// Add a descriptive property.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.properties.insert(name.into(), value.into());
        self
    }

    /// Property set, in textual form, on elements made for the device.
    pub fn element_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.element_properties.push((name.into(), value.into()));
        self
    }

    /// Finish.
    pub fn build(self) -> Device {
        Device(Arc::new(self.0))
    }
}

/// Every token of `wanted` occurs among the tokens of `class`.
pub(crate) fn classes_match(class: &str, wanted: &str) -> bool {
    let tokens: Vec<&str> = class.split('/').collect();
    wanted
        .split('/')
        .filter(|t| !t.is_empty())
        .all(|w| tokens.contains(&w))
}
