//! Launch description grammar, using winnow.
//!
//! ```text
//! fakesrc num-buffers=10 ! identity name=id ! fakesink
//! fakesrc ! tee name=t  t. ! queue ! fakesink  t. ! queue ! fakesink
//! fakesrc ! "video/x-raw, width=(int)320" ! fakesink
//! ```
//!
//! # Syntax
//!
//! - Items of a chain are linked with `!`; whitespace around `!` is optional
//! - An element is a factory name followed by `property=value` pairs
//! - `name.` or `name.pad` refers to an element named elsewhere in the
//!   description, so graphs can branch and merge
//! - A bare or quoted item containing `/` is a caps filter
//! - Values can be quoted with `"` or `'`; bare values end at whitespace or `!`
//! - Chains that are not linked are separated by whitespace

use crate::error::{Error, Result};
use winnow::Parser;
use winnow::ascii::{alpha1, multispace0};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// An element item: factory name and properties in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedElement {
    /// Factory name (`fakesrc`).
    pub factory: String,
    /// `property=value` pairs, values unparsed.
    pub properties: Vec<(String, String)>,
}

impl ParsedElement {
    /// Instance name given with `name=`, if any.
    pub fn name(&self) -> Option<&str> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k == "name")
            .map(|(_, v)| v.as_str())
    }
}

/// One item of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedItem {
    /// A new element.
    Element(ParsedElement),
    /// An element named elsewhere, optionally with a pad name.
    Reference {
        /// Element name.
        name: String,
        /// Pad name after the dot.
        pad: Option<String>,
    },
    /// Caps string; becomes a `capsfilter`.
    Caps(String),
}

/// Items linked one after another with `!`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChain {
    /// Items in link order.
    pub items: Vec<ParsedItem>,
}

/// A parsed launch description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDescription {
    /// Chains in source order.
    pub chains: Vec<ParsedChain>,
}

impl ParsedDescription {
    /// All element items in source order.
    pub fn elements(&self) -> impl Iterator<Item = &ParsedElement> {
        self.chains
            .iter()
            .flat_map(|c| c.items.iter())
            .filter_map(|item| match item {
                ParsedItem::Element(e) => Some(e),
                _ => None,
            })
    }
}

/// Parse a launch description.
///
/// # Example
///
/// ```rust
/// use pipewright::parse::parse_description;
///
/// let desc = parse_description("fakesrc num-buffers=10 ! identity ! fakesink").unwrap();
/// assert_eq!(desc.chains.len(), 1);
/// assert_eq!(desc.chains[0].items.len(), 3);
/// ```
pub fn parse_description(input: &str) -> Result<ParsedDescription> {
    description
        .parse(input.trim())
        .map_err(|e| Error::Parse(format!("syntax error: {e}")))
}

fn description(input: &mut &str) -> WResult<ParsedDescription> {
    let chains = repeat(1.., chain).parse_next(input)?;

    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    Ok(ParsedDescription { chains })
}

fn chain(input: &mut &str) -> WResult<ParsedChain> {
    let items = separated(1.., item, link_separator).parse_next(input)?;
    Ok(ParsedChain { items })
}

fn item(input: &mut &str) -> WResult<ParsedItem> {
    let _ = multispace0.parse_next(input)?;
    alt((
        caps_item.map(ParsedItem::Caps),
        reference,
        element.map(ParsedItem::Element),
    ))
    .parse_next(input)
}

/// Parse the link separator `!`.
fn link_separator(input: &mut &str) -> WResult<()> {
    let _ = multispace0.parse_next(input)?;
    let _ = '!'.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

/// Identifier: factory, element or property name.
fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

fn pad_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || c == '_' || c == '-' || c == '%'
    })
    .parse_next(input)
}

/// `name.` or `name.pad`.
fn reference(input: &mut &str) -> WResult<ParsedItem> {
    let name = identifier.parse_next(input)?;
    let _ = '.'.parse_next(input)?;
    let pad = opt(pad_name).parse_next(input)?;
    Ok(ParsedItem::Reference {
        name: name.to_string(),
        pad: pad.map(str::to_string),
    })
}

/// A caps string, recognised by its `/`.
fn caps_item(input: &mut &str) -> WResult<String> {
    let text = alt((quoted_string, bare_value)).parse_next(input)?;
    if !text.contains('/') {
        return Err(ContextError::new());
    }
    Ok(text.trim().to_string())
}

fn element(input: &mut &str) -> WResult<ParsedElement> {
    let factory: &str = identifier.parse_next(input)?;
    let properties: Vec<(String, String)> = repeat(0.., property).parse_next(input)?;

    Ok(ParsedElement {
        factory: factory.to_string(),
        properties,
    })
}

/// Parse a property (key=value).
fn property(input: &mut &str) -> WResult<(String, String)> {
    let checkpoint = *input;
    let _ = multispace0.parse_next(input)?;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };

    let _ = multispace0.parse_next(input)?;

    if input.starts_with('=') {
        let _ = '='.parse_next(input)?;
    } else {
        // Next chain or reference, not a property
        *input = checkpoint;
        return Err(ContextError::new());
    }

    let _ = multispace0.parse_next(input)?;
    let value = alt((quoted_string, bare_value)).parse_next(input)?;

    Ok((key.to_string(), value))
}

fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

/// Unquoted value; stops at whitespace or `!`.
fn bare_value(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!' && c != '"' && c != '\'')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element_at(desc: &ParsedDescription, chain: usize, item: usize) -> &ParsedElement {
        match &desc.chains[chain].items[item] {
            ParsedItem::Element(e) => e,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_simple_element() {
        let result = parse_description("fakesink").unwrap();
        assert_eq!(result.chains.len(), 1);
        let e = element_at(&result, 0, 0);
        assert_eq!(e.factory, "fakesink");
        assert!(e.properties.is_empty());
        assert!(e.name().is_none());
    }

    #[test]
    fn test_parse_element_with_property() {
        let result = parse_description("fakesrc num-buffers=100").unwrap();
        let e = element_at(&result, 0, 0);
        assert_eq!(e.factory, "fakesrc");
        assert_eq!(e.properties, vec![("num-buffers".to_string(), "100".to_string())]);
    }

    #[test]
    fn test_parse_chain() {
        let result = parse_description("fakesrc ! identity ! fakesink").unwrap();
        assert_eq!(result.chains.len(), 1);
        let names: Vec<_> = result.elements().map(|e| e.factory.as_str()).collect();
        assert_eq!(names, ["fakesrc", "identity", "fakesink"]);
    }

    #[test]
    fn test_parse_quoted_values() {
        let result =
            parse_description(r#"identity name="my id" ! fakesink name='out'"#).unwrap();
        assert_eq!(element_at(&result, 0, 0).name(), Some("my id"));
        assert_eq!(element_at(&result, 0, 1).name(), Some("out"));
    }

    #[test]
    fn test_parse_multiple_properties() {
        let result = parse_description("fakesrc num-buffers=50 is-live=true sizemax=1024").unwrap();
        let props = &element_at(&result, 0, 0).properties;
        assert_eq!(props.len(), 3);
        assert_eq!(props[1], ("is-live".to_string(), "true".to_string()));
        assert_eq!(props[2].0, "sizemax");
    }

    #[test]
    fn test_parse_no_spaces() {
        let result = parse_description("a!b!c").unwrap();
        assert_eq!(result.chains[0].items.len(), 3);
        assert_eq!(element_at(&result, 0, 2).factory, "c");
    }

    #[test]
    fn test_parse_extra_spaces() {
        let result = parse_description("  a   !   b   !   c  ").unwrap();
        assert_eq!(result.chains[0].items.len(), 3);
    }

    #[test]
    fn test_parse_branches_with_references() {
        let result = parse_description(
            "fakesrc ! tee name=t t. ! queue ! fakesink t.src_1 ! queue ! fakesink",
        )
        .unwrap();
        assert_eq!(result.chains.len(), 3);
        assert_eq!(element_at(&result, 0, 1).name(), Some("t"));
        assert_eq!(
            result.chains[1].items[0],
            ParsedItem::Reference {
                name: "t".into(),
                pad: None
            }
        );
        assert_eq!(
            result.chains[2].items[0],
            ParsedItem::Reference {
                name: "t".into(),
                pad: Some("src_1".into())
            }
        );
    }

    #[test]
    fn test_parse_reference_as_sink() {
        let result = parse_description("fakesrc ! f.sink_0  funnel name=f ! fakesink").unwrap();
        assert_eq!(result.chains.len(), 2);
        assert_eq!(
            result.chains[0].items[1],
            ParsedItem::Reference {
                name: "f".into(),
                pad: Some("sink_0".into())
            }
        );
    }

    #[test]
    fn test_parse_caps_items() {
        let result = parse_description(
            r#"fakesrc ! video/x-raw,width=320 ! "audio/x-raw, rate=(int)44100" ! fakesink"#,
        )
        .unwrap();
        let items = &result.chains[0].items;
        assert_eq!(items[1], ParsedItem::Caps("video/x-raw,width=320".into()));
        assert_eq!(items[2], ParsedItem::Caps("audio/x-raw, rate=(int)44100".into()));
    }

    #[test]
    fn test_property_value_may_contain_slash() {
        let result = parse_description("fakesrc caps=video/x-raw ! fakesink").unwrap();
        let e = element_at(&result, 0, 0);
        assert_eq!(e.properties[0].1, "video/x-raw");
        assert_eq!(result.chains[0].items.len(), 2);
    }

    #[test]
    fn test_parse_underscore_in_name() {
        let result = parse_description("fake_src ! fake_sink").unwrap();
        assert_eq!(element_at(&result, 0, 0).factory, "fake_src");
        assert_eq!(element_at(&result, 0, 1).factory, "fake_sink");
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(matches!(parse_description(""), Err(Error::Parse(_))));
        assert!(matches!(parse_description("   "), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_dangling_link_fails() {
        assert!(parse_description("!").is_err());
        assert!(parse_description("fakesrc !").is_err());
        assert!(parse_description("fakesrc ! ! fakesink").is_err());
    }

    #[test]
    fn test_parse_unterminated_quote_fails() {
        assert!(parse_description(r#"identity name="oops ! fakesink"#).is_err());
    }
}
