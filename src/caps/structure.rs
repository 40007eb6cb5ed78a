//! Structures and field values that make up caps.

use std::collections::BTreeMap;
use std::fmt;

/// A typed field value in a caps structure.
///
/// Besides fixed values a field may carry a constraint (a range or a list of
/// alternatives); intersection narrows constraints toward fixed values.
#[derive(Clone, Debug)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// Double precision float.
    Double(f64),
    /// String.
    String(String),
    /// Fraction `numerator/denominator`.
    Fraction(i32, i32),
    /// Inclusive integer range.
    IntRange {
        /// Lower bound.
        min: i32,
        /// Upper bound.
        max: i32,
    },
    /// Inclusive double range.
    DoubleRange {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Alternatives, in order of preference.
    List(Vec<Value>),
}

impl Value {
    /// Whether the value is a single concrete value.
    pub fn is_fixed(&self) -> bool {
        !matches!(
            self,
            Value::IntRange { .. } | Value::DoubleRange { .. } | Value::List(_)
        )
    }

    /// Name of the type as written in caps strings.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::IntRange { .. } => "int",
            Value::Double(_) | Value::DoubleRange { .. } => "double",
            Value::String(_) => "string",
            Value::Fraction(..) => "fraction",
            Value::List(items) => items.first().map_or("string", Value::type_name),
        }
    }

    /// Get as a string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer, if this is one.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Intersect two values, returning the common subset.
    pub fn intersect(&self, other: &Value) -> Option<Value> {
        use Value::*;

        match (self, other) {
            (List(items), other) | (other, List(items)) => {
                let mut common: Vec<Value> =
                    items.iter().filter_map(|v| v.intersect(other)).collect();
                match common.len() {
                    0 => None,
                    1 => common.pop(),
                    _ => Some(List(common)),
                }
            }
            (Int(a), IntRange { min, max }) | (IntRange { min, max }, Int(a)) => {
                (*min..=*max).contains(a).then_some(Int(*a))
            }
            (IntRange { min: a0, max: a1 }, IntRange { min: b0, max: b1 }) => {
                let (lo, hi) = ((*a0).max(*b0), (*a1).min(*b1));
                match lo.cmp(&hi) {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Int(lo)),
                    std::cmp::Ordering::Less => Some(IntRange { min: lo, max: hi }),
                }
            }
            (Double(a), DoubleRange { min, max }) | (DoubleRange { min, max }, Double(a)) => {
                (*a >= *min && *a <= *max).then_some(Double(*a))
            }
            (DoubleRange { min: a0, max: a1 }, DoubleRange { min: b0, max: b1 }) => {
                let (lo, hi) = (a0.max(*b0), a1.min(*b1));
                if lo > hi {
                    None
                } else if lo == hi {
                    Some(Double(lo))
                } else {
                    Some(DoubleRange { min: lo, max: hi })
                }
            }
            (a, b) => (a == b).then(|| a.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;

        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Fraction(an, ad), Fraction(bn, bd)) => {
                i64::from(*an) * i64::from(*bd) == i64::from(*bn) * i64::from(*ad)
            }
            (IntRange { min: a0, max: a1 }, IntRange { min: b0, max: b1 }) => {
                a0 == b0 && a1 == b1
            }
            (DoubleRange { min: a0, max: a1 }, DoubleRange { min: b0, max: b1 }) => {
                a0 == b0 && a1 == b1
            }
            (List(a), List(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Write a string, quoting it when it would not survive re-parsing bare.
fn write_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let bare = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '+'));
    if bare {
        write!(f, "{s}")
    } else {
        write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn write_untyped(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(i) => write!(f, "{i}"),
        Value::Double(d) => write!(f, "{d}"),
        Value::String(s) => write_string(f, s),
        Value::Fraction(n, d) => write!(f, "{n}/{d}"),
        Value::IntRange { min, max } => write!(f, "[ {min}, {max} ]"),
        Value::DoubleRange { min, max } => write!(f, "[ {min}, {max} ]"),
        Value::List(items) => {
            write!(f, "{{ ")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, " }}")
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::List(_) => write_untyped(f, self),
            _ => {
                write!(f, "({})", self.type_name())?;
                write_untyped(f, self)
            }
        }
    }
}

/// A named set of fields, e.g. `video/x-raw, width=(int)640`.
///
/// Fields are kept sorted by name, so two structures with the same content
/// compare equal regardless of the order they were written in.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    name: String,
    fields: BTreeMap<String, Value>,
}

impl Structure {
    /// Create an empty structure.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// The structure (media type) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a string field.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Whether a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Iterate fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }

    /// Whether every field is fixed.
    pub fn is_fixed(&self) -> bool {
        self.fields.values().all(Value::is_fixed)
    }

    /// Intersect with another structure.
    ///
    /// Names must match and every shared field must intersect; fields
    /// present on one side only are carried over unchanged.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut fields = self.fields.clone();
        for (key, theirs) in &other.fields {
            let merged = match fields.get(key) {
                Some(ours) => ours.intersect(theirs)?,
                None => theirs.clone(),
            };
            fields.insert(key.clone(), merged);
        }
        Some(Structure {
            name: self.name.clone(),
            fields,
        })
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.fields {
            write!(f, ", {key}={value}")?;
        }
        Ok(())
    }
}
