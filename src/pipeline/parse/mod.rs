//! Building graphs from launch descriptions.
//!
//! ```rust,ignore
//! pipewright::initialize()?;
//! let pipeline = pipewright::parse::launch_pipeline(
//!     "fakesrc num-buffers=10 ! tee name=t  t. ! queue ! fakesink  t. ! queue ! fakesink",
//! )?;
//! pipeline.set_state(State::Playing)?;
//! ```
//!
//! Construction is all or nothing: elements are created and configured
//! first, then references are resolved and links made. Any failure drops
//! everything built so far and returns [`Error::Parse`] naming the culprit.

mod grammar;

pub use grammar::{ParsedChain, ParsedDescription, ParsedElement, ParsedItem, parse_description};

use super::bin::Pipeline;
use crate::caps::Caps;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::registry::ElementFactory;
use crate::runtime;
use std::collections::HashMap;
use tracing::debug;

/// One side of a link: an element and an optional pad name.
#[derive(Clone)]
struct Endpoint {
    element: Element,
    pad: Option<String>,
}

/// Build the graph described by `description`.
///
/// A description with exactly one element yields that element; anything
/// else is wrapped in a [`Pipeline`].
pub fn launch(description: &str) -> Result<Element> {
    runtime::ensure_initialized()?;
    let parsed = parse_description(description)?;
    let (mut elements, links) = build(&parsed)?;

    if elements.len() == 1 && links.is_empty() {
        if let Some(element) = elements.pop() {
            return Ok(element);
        }
    }
    Ok(assemble(elements, links)?.into())
}

/// Like [`launch`], always returning a [`Pipeline`].
pub fn launch_pipeline(description: &str) -> Result<Pipeline> {
    runtime::ensure_initialized()?;
    let parsed = parse_description(description)?;
    let (elements, links) = build(&parsed)?;
    assemble(elements, links)
}

type Links = Vec<(Endpoint, Endpoint)>;

/// Create every element, then resolve the links between them.
fn build(parsed: &ParsedDescription) -> Result<(Vec<Element>, Links)> {
    let mut elements = Vec::new();
    let mut by_name: HashMap<String, Element> = HashMap::new();
    // Items as endpoints, created in the first pass; references stay unresolved.
    let mut chains: Vec<Vec<Option<Endpoint>>> = Vec::with_capacity(parsed.chains.len());

    for chain in &parsed.chains {
        let mut items = Vec::with_capacity(chain.items.len());
        for item in &chain.items {
            let element = match item {
                ParsedItem::Element(parsed) => create(parsed)?,
                ParsedItem::Caps(caps) => create_capsfilter(caps)?,
                ParsedItem::Reference { .. } => {
                    items.push(None);
                    continue;
                }
            };
            if by_name.insert(element.name().to_string(), element.clone()).is_some() {
                return Err(Error::Parse(format!(
                    "element name '{}' is used twice",
                    element.name()
                )));
            }
            elements.push(element.clone());
            items.push(Some(Endpoint { element, pad: None }));
        }
        chains.push(items);
    }

    let mut links = Vec::new();
    for (chain, items) in parsed.chains.iter().zip(chains) {
        let mut resolved = Vec::with_capacity(items.len());
        for (item, endpoint) in chain.items.iter().zip(items) {
            let endpoint = match (item, endpoint) {
                (_, Some(endpoint)) => endpoint,
                (ParsedItem::Reference { name, pad }, None) => {
                    let element = by_name.get(name).cloned().ok_or_else(|| {
                        Error::Parse(format!("no element named '{name}' to refer to"))
                    })?;
                    Endpoint { element, pad: pad.clone() }
                }
                (_, None) => continue,
            };
            resolved.push(endpoint);
        }
        for pair in resolved.windows(2) {
            links.push((pair[0].clone(), pair[1].clone()));
        }
    }
    Ok((elements, links))
}

fn create(parsed: &ParsedElement) -> Result<Element> {
    let element = ElementFactory::make(&parsed.factory, parsed.name()).map_err(|e| match e {
        Error::FactoryNotFound(name) => Error::Parse(format!("no element \"{name}\"")),
        Error::NotInitialized | Error::Deinitialized => e,
        other => Error::Parse(format!("could not create '{}': {other}", parsed.factory)),
    })?;
    for (key, value) in &parsed.properties {
        if key == "name" {
            continue;
        }
        element.set_property_from_str(key, value).map_err(|e| {
            Error::Parse(format!(
                "could not set property '{key}' of '{}' to '{value}': {e}",
                element.name()
            ))
        })?;
    }
    Ok(element)
}

fn create_capsfilter(caps: &str) -> Result<Element> {
    let parsed: Caps = caps
        .parse()
        .map_err(|e| Error::Parse(format!("invalid caps '{caps}': {e}")))?;
    let element = ElementFactory::make("capsfilter", None)
        .map_err(|e| Error::Parse(format!("could not create capsfilter: {e}")))?;
    element
        .set_property("caps", parsed)
        .map_err(|e| Error::Parse(format!("could not set caps '{caps}': {e}")))?;
    Ok(element)
}

/// Put the elements into a new pipeline and make the links.
fn assemble(elements: Vec<Element>, links: Links) -> Result<Pipeline> {
    let pipeline = Pipeline::new(None);
    for element in &elements {
        pipeline
            .add(element)
            .map_err(|e| Error::Parse(format!("could not add '{}': {e}", element.name())))?;
    }
    for (src, sink) in &links {
        src.element
            .link_pads(src.pad.as_deref(), &sink.element, sink.pad.as_deref())
            .map_err(|e| {
                Error::Parse(format!(
                    "could not link {} to {}: {e}",
                    describe(src),
                    describe(sink)
                ))
            })?;
    }
    debug!(
        pipeline = %pipeline.name(),
        elements = elements.len(),
        links = links.len(),
        "launched description"
    );
    Ok(pipeline)
}

fn describe(endpoint: &Endpoint) -> String {
    match &endpoint.pad {
        Some(pad) => format!("{}.{pad}", endpoint.element.name()),
        None => endpoint.element.name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::element::PadDirection;

    fn init() {
        let _ = runtime::initialize_with(RuntimeConfig::testing());
    }

    #[test]
    fn test_single_element_is_not_wrapped() {
        init();
        let element = launch("identity name=solo").unwrap();
        assert_eq!(element.name(), "solo");
        assert!(!element.is_pipeline());

        let pipeline = launch_pipeline("identity").unwrap();
        assert_eq!(pipeline.num_children(), 1);
    }

    #[test]
    fn test_chain_links_in_order() {
        init();
        let element = launch("fakesrc name=a ! identity name=b ! fakesink name=c").unwrap();
        let pipeline = element.as_pipeline().unwrap();
        assert_eq!(pipeline.num_children(), 3);

        let a = pipeline.try_by_name("a").unwrap();
        let b = pipeline.try_by_name("b").unwrap();
        let c = pipeline.try_by_name("c").unwrap();
        let peer_of = |e: &Element| {
            e.src_pads()[0]
                .peer()
                .and_then(|p| p.parent_element())
        };
        assert_eq!(peer_of(&a), Some(b.clone()));
        assert_eq!(peer_of(&b), Some(c.clone()));
        assert!(c.src_pads().is_empty());
    }

    #[test]
    fn test_references_branch_a_tee() {
        init();
        let pipeline = launch_pipeline(
            "fakesrc ! tee name=t  t. ! queue ! fakesink  t. ! queue ! fakesink",
        )
        .unwrap();
        let tee = pipeline.try_by_name("t").unwrap();
        let linked: Vec<_> = tee
            .pads()
            .into_iter()
            .filter(|p| p.direction() == PadDirection::Src && p.is_linked())
            .collect();
        assert_eq!(linked.len(), 2);
    }

    #[test]
    fn test_forward_reference_resolves() {
        init();
        let pipeline =
            launch_pipeline("fakesrc ! f.  fakesrc ! f.  funnel name=f ! fakesink").unwrap();
        let funnel = pipeline.try_by_name("f").unwrap();
        assert_eq!(funnel.sink_pads().iter().filter(|p| p.is_linked()).count(), 2);
    }

    #[test]
    fn test_caps_item_becomes_capsfilter() {
        init();
        let pipeline = launch_pipeline("fakesrc ! video/x-raw ! fakesink").unwrap();
        let filters: Vec<_> = pipeline
            .children()
            .into_iter()
            .filter(|e| e.factory_name() == "capsfilter")
            .collect();
        assert_eq!(filters.len(), 1);
    }

    #[test]
    fn test_errors_name_the_problem() {
        init();
        let err = launch("fakesrc ! nosuchelement ! fakesink").unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("nosuchelement")));

        let err = launch("fakesrc ! missing.").unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("missing")));

        let err = launch("fakesrc num-buffers=many ! fakesink").unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("num-buffers")));

        let err = launch("identity name=x ! identity name=x").unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("twice")));

        assert!(matches!(launch("fakesrc ! ! fakesink"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_incompatible_link_fails_whole_description() {
        init();
        // A sink has no source pad to link from.
        let err = launch("fakesink ! fakesink").unwrap_err();
        assert!(matches!(&err, Error::Parse(m) if m.contains("could not link")));
    }
}
