//! Element registry: factories by name.
//!
//! Every element is made by an [`ElementFactory`]. Factories carry the static
//! description of their elements (pad templates, properties, flags) and a
//! constructor for the [`ElementImpl`]; the process-wide [`Registry`] maps
//! factory names to factories.
//!
//! ```rust,ignore
//! use pipewright::registry::ElementFactory;
//!
//! pipewright::initialize()?;
//! let src = ElementFactory::make("fakesrc", Some("src"))?;
//! let sink = ElementFactory::make("fakesink", None)?; // named "fakesink0"
//! ```

use crate::element::{Element, ElementImpl, ElementKind, PadTemplate, ParamSpec};
use crate::error::{Error, Result};
use crate::pipeline::bin::BinData;
use crate::runtime;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace};

crate::flags::bit_flags! {
    /// Static role of the elements a factory makes.
    pub struct ElementFlags {
        /// Produces data without consuming any.
        const SOURCE = 1 << 0;
        /// Consumes data without producing any.
        const SINK = 1 << 1;
    }
}

/// Constructor of element implementations.
pub type ElementConstructor = Arc<dyn Fn() -> Result<Box<dyn ElementImpl>> + Send + Sync>;

enum FactoryKind {
    Leaf(ElementConstructor),
    Bin,
    Pipeline,
}

/// Describes and creates one type of element.
pub struct ElementFactory {
    name: String,
    long_name: String,
    klass: String,
    description: String,
    flags: ElementFlags,
    pad_templates: Vec<PadTemplate>,
    properties: Vec<ParamSpec>,
    kind: FactoryKind,
    instances: AtomicU32,
}

impl ElementFactory {
    /// Start describing a factory.
    pub fn builder(name: impl Into<String>) -> ElementFactoryBuilder {
        let name = name.into();
        ElementFactoryBuilder {
            factory: ElementFactory {
                long_name: name.clone(),
                name,
                klass: "Generic".to_string(),
                description: String::new(),
                flags: ElementFlags::empty(),
                pad_templates: Vec::new(),
                properties: Vec::new(),
                kind: FactoryKind::Bin,
                instances: AtomicU32::new(0),
            },
        }
    }

    /// Look up a registered factory.
    pub fn find(name: &str) -> Option<Arc<ElementFactory>> {
        Registry::get().find(name)
    }

    /// Create an element from the registered factory `factory_name`.
    ///
    /// With `name` unset the element is named after the factory plus a
    /// per-factory counter (`fakesrc0`, `fakesrc1`, ...).
    pub fn make(factory_name: &str, name: Option<&str>) -> Result<Element> {
        runtime::ensure_initialized()?;
        let factory = Self::find(factory_name)
            .ok_or_else(|| Error::FactoryNotFound(factory_name.to_string()))?;
        factory.create(name)
    }

    /// Create an element from this factory.
    ///
    /// Fails without side effects if the constructor fails.
    pub fn create(self: &Arc<Self>, name: Option<&str>) -> Result<Element> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.next_instance_name(),
        };
        let kind = match &self.kind {
            FactoryKind::Leaf(constructor) => {
                let imp = constructor().map_err(|e| Error::ElementCreation {
                    factory: self.name.clone(),
                    reason: e.to_string(),
                })?;
                ElementKind::Leaf(imp)
            }
            FactoryKind::Bin => ElementKind::Bin(BinData::new(false, &name)),
            FactoryKind::Pipeline => ElementKind::Bin(BinData::new(true, &name)),
        };
        trace!(factory = %self.name, element = %name, "creating element");
        Ok(Element::new(self.clone(), name, kind))
    }

    pub(crate) fn next_instance_name(&self) -> String {
        format!("{}{}", self.name, self.instances.fetch_add(1, Ordering::Relaxed))
    }

    /// Factory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable name.
    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    /// Classification, `/`-separated (`Source/Video`).
    pub fn klass(&self) -> &str {
        &self.klass
    }

    /// One-line description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Source/sink role.
    pub fn flags(&self) -> ElementFlags {
        self.flags
    }

    /// Pad templates of created elements.
    pub fn pad_templates(&self) -> &[PadTemplate] {
        &self.pad_templates
    }

    /// Properties of created elements.
    pub fn properties(&self) -> &[ParamSpec] {
        &self.properties
    }

    /// Whether the factory makes containers.
    pub fn is_container(&self) -> bool {
        !matches!(self.kind, FactoryKind::Leaf(_))
    }
}

impl fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFactory")
            .field("name", &self.name)
            .field("klass", &self.klass)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Builder for [`ElementFactory`].
pub struct ElementFactoryBuilder {
    factory: ElementFactory,
}

impl ElementFactoryBuilder {
    /// Human readable name, classification and description.
    pub fn metadata(mut self, long_name: &str, klass: &str, description: &str) -> Self {
        self.factory.long_name = long_name.to_string();
        self.factory.klass = klass.to_string();
        self.factory.description = description.to_string();
        self
    }

    /// Source/sink role.
    pub fn flags(mut self, flags: ElementFlags) -> Self {
        self.factory.flags = flags;
        self
    }

    /// Add a pad template.
    pub fn pad_template(mut self, template: PadTemplate) -> Self {
        self.factory.pad_templates.push(template);
        self
    }

    /// Declare a property.
    pub fn property(mut self, spec: ParamSpec) -> Self {
        self.factory.properties.push(spec);
        self
    }

    /// Finish with the constructor of the element implementation.
    pub fn build<F>(mut self, constructor: F) -> ElementFactory
    where
        F: Fn() -> Result<Box<dyn ElementImpl>> + Send + Sync + 'static,
    {
        self.factory.kind = FactoryKind::Leaf(Arc::new(constructor));
        self.factory
    }

    fn build_container(mut self, pipeline: bool) -> ElementFactory {
        self.factory.kind = if pipeline {
            FactoryKind::Pipeline
        } else {
            FactoryKind::Bin
        };
        self.factory
    }
}

/// Factory of plain bins.
pub(crate) fn bin_factory() -> Arc<ElementFactory> {
    static FACTORY: OnceLock<Arc<ElementFactory>> = OnceLock::new();
    FACTORY
        .get_or_init(|| {
            Arc::new(
                ElementFactory::builder("bin")
                    .metadata("Generic bin", "Generic/Bin", "Container of other elements")
                    .build_container(false),
            )
        })
        .clone()
}

/// Factory of top-level pipelines.
pub(crate) fn pipeline_factory() -> Arc<ElementFactory> {
    static FACTORY: OnceLock<Arc<ElementFactory>> = OnceLock::new();
    FACTORY
        .get_or_init(|| {
            Arc::new(
                ElementFactory::builder("pipeline")
                    .metadata(
                        "Pipeline",
                        "Generic/Bin",
                        "Top-level bin with a bus and a clock",
                    )
                    .build_container(true),
            )
        })
        .clone()
}

/// Process-wide map of factory names to factories.
pub struct Registry {
    factories: RwLock<BTreeMap<String, Arc<ElementFactory>>>,
}

impl Registry {
    /// The process-wide registry.
    pub fn get() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| Registry {
            factories: RwLock::new(BTreeMap::new()),
        })
    }

    /// Register a factory, replacing one of the same name.
    ///
    /// Returns the registered factory.
    pub fn register(&self, factory: ElementFactory) -> Arc<ElementFactory> {
        self.register_arc(Arc::new(factory))
    }

    pub(crate) fn register_arc(&self, factory: Arc<ElementFactory>) -> Arc<ElementFactory> {
        debug!(factory = %factory.name(), klass = %factory.klass(), "registering factory");
        self.factories
            .write()
            .insert(factory.name().to_string(), factory.clone());
        factory
    }

    /// Find a factory by name.
    pub fn find(&self, name: &str) -> Option<Arc<ElementFactory>> {
        self.factories.read().get(name).cloned()
    }

    /// Whether a factory is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Names of all registered factories, sorted.
    pub fn list(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Factories whose classification contains every `/`-separated token
    /// of `klass`.
    pub fn factories_with_klass(&self, klass: &str) -> Vec<Arc<ElementFactory>> {
        let wanted: Vec<&str> = klass.split('/').filter(|t| !t.is_empty()).collect();
        self.factories
            .read()
            .values()
            .filter(|f| {
                let tokens: Vec<&str> = f.klass().split('/').collect();
                wanted.iter().all(|w| tokens.contains(w))
            })
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("factories", &self.factories.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{PadTemplate, ParamSpec};

    struct Nothing;
    impl ElementImpl for Nothing {}

    fn test_factory(name: &str) -> ElementFactory {
        ElementFactory::builder(name)
            .metadata("Nothing", "Filter/Test", "Does nothing")
            .pad_template(PadTemplate::sink_any())
            .pad_template(PadTemplate::src_any())
            .property(ParamSpec::int("level", "Level", 0, 10, 3))
            .build(|| Ok(Box::new(Nothing)))
    }

    #[test]
    fn test_auto_names_count_per_factory() {
        let factory = Arc::new(test_factory("registry-test-nothing"));
        let a = factory.create(None).unwrap();
        let b = factory.create(None).unwrap();
        assert_eq!(a.name(), "registry-test-nothing0");
        assert_eq!(b.name(), "registry-test-nothing1");
        let named = factory.create(Some("custom")).unwrap();
        assert_eq!(named.name(), "custom");
        assert_eq!(named.factory_name(), "registry-test-nothing");
    }

    #[test]
    fn test_created_element_has_always_pads_and_defaults() {
        let factory = Arc::new(test_factory("registry-test-pads"));
        let e = factory.create(Some("e")).unwrap();
        assert!(e.static_pad("src").is_some());
        assert!(e.static_pad("sink").is_some());
        assert_eq!(e.property::<i32>("level"), 3);
    }

    #[test]
    fn test_failing_constructor_is_creation_error() {
        let factory = Arc::new(
            ElementFactory::builder("registry-test-broken")
                .build(|| Err(Error::Parse("backend missing".into()))),
        );
        let err = factory.create(Some("x")).unwrap_err();
        assert!(matches!(err, Error::ElementCreation { .. }));
        assert!(err.to_string().contains("registry-test-broken"));
    }

    #[test]
    fn test_register_find_and_klass_lookup() {
        let registry = Registry::get();
        registry.register(test_factory("registry-test-lookup"));
        assert!(registry.contains("registry-test-lookup"));
        assert!(registry.list().iter().any(|n| n == "registry-test-lookup"));
        let by_klass = registry.factories_with_klass("Test/Filter");
        assert!(by_klass.iter().any(|f| f.name() == "registry-test-lookup"));
        assert!(registry.find("registry-test-missing").is_none());
    }
}
