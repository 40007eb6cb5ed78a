//! Capability descriptors.
//!
//! [`Caps`] describe the formats a pad can handle. They are immutable once
//! built, cheap to clone (reference counted) and compared by content.
//!
//! ```rust
//! use pipewright::caps::Caps;
//!
//! let caps: Caps = "video/x-raw, width=(int)[ 1, 1920 ], format=I420".parse().unwrap();
//! let fixed: Caps = "video/x-raw, width=640".parse().unwrap();
//! assert!(caps.can_intersect(&fixed));
//! ```

mod parse;
mod structure;

pub use structure::{Structure, Value};

use crate::error::{Error, Result};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

type Structures = SmallVec<[Structure; 2]>;

#[derive(Debug, PartialEq)]
enum CapsInner {
    Any,
    Structures(Structures),
}

/// An immutable, reference-counted set of format structures.
///
/// `ANY` matches everything, `EMPTY` (no structures) matches nothing.
#[derive(Clone)]
pub struct Caps(Arc<CapsInner>);

impl Caps {
    /// Caps accepting anything.
    pub fn new_any() -> Self {
        Self(Arc::new(CapsInner::Any))
    }

    /// Caps accepting nothing.
    pub fn new_empty() -> Self {
        Self(Arc::new(CapsInner::Structures(SmallVec::new())))
    }

    /// Caps of a single structure with no fields.
    pub fn new_empty_simple(media_type: &str) -> Self {
        Self::from_structures([Structure::new(media_type)])
    }

    /// Build caps from structures.
    pub fn from_structures(structures: impl IntoIterator<Item = Structure>) -> Self {
        Self(Arc::new(CapsInner::Structures(
            structures.into_iter().collect(),
        )))
    }

    /// Start building single-structure caps.
    pub fn builder(media_type: &str) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(media_type),
        }
    }

    /// Whether these are `ANY` caps.
    pub fn is_any(&self) -> bool {
        matches!(*self.0, CapsInner::Any)
    }

    /// Whether these caps accept nothing.
    pub fn is_empty(&self) -> bool {
        matches!(&*self.0, CapsInner::Structures(s) if s.is_empty())
    }

    /// Whether the caps describe exactly one concrete format.
    pub fn is_fixed(&self) -> bool {
        match &*self.0 {
            CapsInner::Any => false,
            CapsInner::Structures(s) => s.len() == 1 && s[0].is_fixed(),
        }
    }

    /// Number of structures (0 for `ANY`).
    pub fn size(&self) -> usize {
        match &*self.0 {
            CapsInner::Any => 0,
            CapsInner::Structures(s) => s.len(),
        }
    }

    /// Structure at `index`.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures().get(index)
    }

    /// All structures (empty for `ANY`).
    pub fn structures(&self) -> &[Structure] {
        match &*self.0 {
            CapsInner::Any => &[],
            CapsInner::Structures(s) => s,
        }
    }

    /// Intersection of two caps; may be empty.
    pub fn intersect(&self, other: &Caps) -> Caps {
        match (&*self.0, &*other.0) {
            (CapsInner::Any, _) => other.clone(),
            (_, CapsInner::Any) => self.clone(),
            (CapsInner::Structures(ours), CapsInner::Structures(theirs)) => {
                let mut out = Structures::new();
                for a in ours {
                    for b in theirs {
                        if let Some(s) = a.intersect(b)
                            && !out.contains(&s)
                        {
                            out.push(s);
                        }
                    }
                }
                Self(Arc::new(CapsInner::Structures(out)))
            }
        }
    }

    /// Whether the two caps share at least one format.
    pub fn can_intersect(&self, other: &Caps) -> bool {
        match (&*self.0, &*other.0) {
            (CapsInner::Any, CapsInner::Structures(s))
            | (CapsInner::Structures(s), CapsInner::Any) => !s.is_empty(),
            (CapsInner::Any, CapsInner::Any) => true,
            (CapsInner::Structures(ours), CapsInner::Structures(theirs)) => ours
                .iter()
                .any(|a| theirs.iter().any(|b| a.intersect(b).is_some())),
        }
    }

    /// Whether both caps share the same backing allocation.
    pub fn ptr_eq(&self, other: &Caps) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Caps {
    fn default() -> Self {
        Self::new_any()
    }
}

impl PartialEq for Caps {
    /// Content equality; the order of structures does not matter.
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (&*self.0, &*other.0) {
            (CapsInner::Any, CapsInner::Any) => true,
            (CapsInner::Structures(a), CapsInner::Structures(b)) => {
                a.len() == b.len()
                    && a.iter().all(|s| b.contains(s))
                    && b.iter().all(|s| a.contains(s))
            }
            _ => false,
        }
    }
}

impl FromStr for Caps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match parse::parse_caps(s) {
            Ok(parse::ParsedCaps::Any) => Ok(Self::new_any()),
            Ok(parse::ParsedCaps::Structures(structures)) => Ok(Self::from_structures(structures)),
            Err(reason) => Err(Error::InvalidCaps {
                input: s.to_string(),
                reason,
            }),
        }
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            CapsInner::Any => write!(f, "ANY"),
            CapsInner::Structures(s) if s.is_empty() => write!(f, "EMPTY"),
            CapsInner::Structures(s) => {
                for (i, structure) in s.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{structure}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caps({self})")
    }
}

/// Builder for single-structure caps.
#[derive(Debug)]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Add a field.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.structure.set(name, value);
        self
    }

    /// Finish.
    pub fn build(self) -> Caps {
        Caps::from_structures([self.structure])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_semantic() {
        let input = "video/x-raw,framerate=30/1, width=640 ,format=I420";
        let caps: Caps = input.parse().unwrap();
        let printed = caps.to_string();
        assert_eq!(
            printed,
            "video/x-raw, format=(string)I420, framerate=(fraction)30/1, width=(int)640"
        );
        let reparsed: Caps = printed.parse().unwrap();
        assert_eq!(caps, reparsed);
    }

    #[test]
    fn test_round_trip_constraints() {
        let caps: Caps = "audio/x-raw, rate=(int)[ 8000, 96000 ], format={ S16LE, F32LE }; audio/x-alaw"
            .parse()
            .unwrap();
        let reparsed: Caps = caps.to_string().parse().unwrap();
        assert_eq!(caps, reparsed);
        assert_eq!(caps.size(), 2);
    }

    #[test]
    fn test_equality_ignores_structure_order() {
        let a: Caps = "audio/x-raw; video/x-raw".parse().unwrap();
        let b: Caps = "video/x-raw; audio/x-raw".parse().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Caps::new_any());
    }

    #[test]
    fn test_any_and_empty() {
        let any: Caps = "ANY".parse().unwrap();
        let empty: Caps = "EMPTY".parse().unwrap();
        assert!(any.is_any());
        assert!(empty.is_empty());
        assert_eq!(any.to_string(), "ANY");
        assert_eq!(empty.to_string(), "EMPTY");

        let video = Caps::new_empty_simple("video/x-raw");
        assert!(any.can_intersect(&video));
        assert!(!empty.can_intersect(&video));
        assert!(!any.can_intersect(&empty));
        assert_eq!(any.intersect(&video), video);
    }

    #[test]
    fn test_intersection() {
        let src: Caps = "video/x-raw, width=(int)[ 1, 1920 ], format={ I420, NV12 }"
            .parse()
            .unwrap();
        let sink: Caps = "video/x-raw, width=1280, format=NV12".parse().unwrap();
        let common = src.intersect(&sink);
        assert!(common.is_fixed());
        assert_eq!(common, sink);

        let audio: Caps = "audio/x-raw".parse().unwrap();
        assert!(!src.can_intersect(&audio));
        assert!(src.intersect(&audio).is_empty());
    }

    #[test]
    fn test_builder() {
        let caps = Caps::builder("video/x-raw")
            .field("width", 320)
            .field("height", 240)
            .build();
        assert!(caps.is_fixed());
        assert_eq!(caps.structure(0).and_then(|s| s.get("width")), Some(&Value::Int(320)));
    }

    #[test]
    fn test_invalid_caps_error() {
        let err = "video/x-raw, width=(int)wide".parse::<Caps>().unwrap_err();
        assert!(matches!(err, Error::InvalidCaps { .. }));
        assert!(err.to_string().contains("video/x-raw"));
    }

    #[test]
    fn test_clone_shares_allocation() {
        let caps = Caps::new_empty_simple("text/x-raw");
        let copy = caps.clone();
        assert!(caps.ptr_eq(&copy));
    }
}
