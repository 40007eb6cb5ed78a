//! Typed element properties.
//!
//! Factories declare their properties as [`ParamSpec`]s; every element keeps
//! a [`PropertyStore`] initialized from those defaults. Reads and writes go
//! through [`FromProperty`] / [`ToProperty`] so callers work with plain Rust
//! types.

use crate::caps::Caps;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;

/// A property value.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// Boolean.
    Bool(bool),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit unsigned integer.
    UInt(u32),
    /// 64-bit unsigned integer.
    UInt64(u64),
    /// Double.
    Double(f64),
    /// String.
    String(String),
    /// Enumeration value with its nick.
    Enum {
        /// Numeric value.
        value: i32,
        /// Short name.
        nick: String,
    },
    /// Capabilities.
    Caps(Caps),
}

impl PropertyValue {
    /// Type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Int(_) => "int",
            PropertyValue::Int64(_) => "int64",
            PropertyValue::UInt(_) => "uint",
            PropertyValue::UInt64(_) => "uint64",
            PropertyValue::Double(_) => "double",
            PropertyValue::String(_) => "string",
            PropertyValue::Enum { .. } => "enum",
            PropertyValue::Caps(_) => "caps",
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match *self {
            PropertyValue::Int(v) => Some(v.into()),
            PropertyValue::Int64(v) => Some(v.into()),
            PropertyValue::UInt(v) => Some(v.into()),
            PropertyValue::UInt64(v) => Some(v.into()),
            PropertyValue::Enum { value, .. } => Some(value.into()),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{v}"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Int64(v) => write!(f, "{v}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
            PropertyValue::UInt64(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::String(v) => write!(f, "{v}"),
            PropertyValue::Enum { nick, .. } => write!(f, "{nick}"),
            PropertyValue::Caps(v) => write!(f, "{v}"),
        }
    }
}

/// Conversion from a stored property value.
pub trait FromProperty: Sized + Default {
    /// Convert, or `None` if the value has another type.
    fn from_property(value: &PropertyValue) -> Option<Self>;
}

/// Conversion into a property value.
pub trait ToProperty {
    /// Convert.
    fn to_property(self) -> PropertyValue;
}

macro_rules! impl_numeric_property {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromProperty for $ty {
                fn from_property(value: &PropertyValue) -> Option<Self> {
                    match value {
                        PropertyValue::$variant(v) => Some(*v),
                        other => other.as_i128().and_then(|v| <$ty>::try_from(v).ok()),
                    }
                }
            }

            impl ToProperty for $ty {
                fn to_property(self) -> PropertyValue {
                    PropertyValue::$variant(self)
                }
            }
        )*
    };
}

impl_numeric_property!(i32 => Int, i64 => Int64, u32 => UInt, u64 => UInt64);

impl FromProperty for bool {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl ToProperty for bool {
    fn to_property(self) -> PropertyValue {
        PropertyValue::Bool(self)
    }
}

impl FromProperty for f64 {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl ToProperty for f64 {
    fn to_property(self) -> PropertyValue {
        PropertyValue::Double(self)
    }
}

impl FromProperty for String {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::String(v) => Some(v.clone()),
            PropertyValue::Enum { nick, .. } => Some(nick.clone()),
            _ => None,
        }
    }
}

impl ToProperty for String {
    fn to_property(self) -> PropertyValue {
        PropertyValue::String(self)
    }
}

impl ToProperty for &str {
    fn to_property(self) -> PropertyValue {
        PropertyValue::String(self.to_string())
    }
}

impl FromProperty for Caps {
    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Caps(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl ToProperty for Caps {
    fn to_property(self) -> PropertyValue {
        PropertyValue::Caps(self)
    }
}

impl ToProperty for &Caps {
    fn to_property(self) -> PropertyValue {
        PropertyValue::Caps(self.clone())
    }
}

impl ToProperty for PropertyValue {
    fn to_property(self) -> PropertyValue {
        self
    }
}

/// Value type and range of a property.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamKind {
    /// Boolean.
    Bool,
    /// Bounded `i32`.
    Int {
        /// Minimum.
        min: i32,
        /// Maximum.
        max: i32,
    },
    /// Bounded `i64`.
    Int64 {
        /// Minimum.
        min: i64,
        /// Maximum.
        max: i64,
    },
    /// Bounded `u32`.
    UInt {
        /// Minimum.
        min: u32,
        /// Maximum.
        max: u32,
    },
    /// Bounded `u64`.
    UInt64 {
        /// Minimum.
        min: u64,
        /// Maximum.
        max: u64,
    },
    /// Bounded double.
    Double {
        /// Minimum.
        min: f64,
        /// Maximum.
        max: f64,
    },
    /// String.
    String,
    /// Enumeration of `(value, nick)` pairs.
    Enum(Vec<(i32, &'static str)>),
    /// Capabilities.
    Caps,
}

/// Declaration of one element property.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    name: &'static str,
    blurb: &'static str,
    kind: ParamKind,
    default: PropertyValue,
    writable: bool,
}

impl ParamSpec {
    fn new(name: &'static str, blurb: &'static str, kind: ParamKind, default: PropertyValue) -> Self {
        Self {
            name,
            blurb,
            kind,
            default,
            writable: true,
        }
    }

    /// Boolean property.
    pub fn bool(name: &'static str, blurb: &'static str, default: bool) -> Self {
        Self::new(name, blurb, ParamKind::Bool, PropertyValue::Bool(default))
    }

    /// `i32` property.
    pub fn int(name: &'static str, blurb: &'static str, min: i32, max: i32, default: i32) -> Self {
        Self::new(name, blurb, ParamKind::Int { min, max }, PropertyValue::Int(default))
    }

    /// `i64` property.
    pub fn int64(name: &'static str, blurb: &'static str, min: i64, max: i64, default: i64) -> Self {
        Self::new(
            name,
            blurb,
            ParamKind::Int64 { min, max },
            PropertyValue::Int64(default),
        )
    }

    /// `u32` property.
    pub fn uint(name: &'static str, blurb: &'static str, min: u32, max: u32, default: u32) -> Self {
        Self::new(name, blurb, ParamKind::UInt { min, max }, PropertyValue::UInt(default))
    }

    /// `u64` property.
    pub fn uint64(name: &'static str, blurb: &'static str, min: u64, max: u64, default: u64) -> Self {
        Self::new(
            name,
            blurb,
            ParamKind::UInt64 { min, max },
            PropertyValue::UInt64(default),
        )
    }

    /// Double property.
    pub fn double(name: &'static str, blurb: &'static str, min: f64, max: f64, default: f64) -> Self {
        Self::new(
            name,
            blurb,
            ParamKind::Double { min, max },
            PropertyValue::Double(default),
        )
    }

    /// String property.
    pub fn string(name: &'static str, blurb: &'static str, default: &str) -> Self {
        Self::new(
            name,
            blurb,
            ParamKind::String,
            PropertyValue::String(default.to_string()),
        )
    }

    /// Enumeration property; `default` must be one of the values.
    pub fn enumeration(
        name: &'static str,
        blurb: &'static str,
        values: Vec<(i32, &'static str)>,
        default: i32,
    ) -> Self {
        let nick = values
            .iter()
            .find(|(v, _)| *v == default)
            .map_or("", |(_, n)| *n)
            .to_string();
        Self::new(
            name,
            blurb,
            ParamKind::Enum(values),
            PropertyValue::Enum {
                value: default,
                nick,
            },
        )
    }

    /// Caps property.
    pub fn caps(name: &'static str, blurb: &'static str, default: Caps) -> Self {
        Self::new(name, blurb, ParamKind::Caps, PropertyValue::Caps(default))
    }

    /// Mark the property read-only.
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Property name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// One-line description.
    pub fn blurb(&self) -> &'static str {
        self.blurb
    }

    /// Value type.
    pub fn kind(&self) -> &ParamKind {
        &self.kind
    }

    /// Default value.
    pub fn default_value(&self) -> &PropertyValue {
        &self.default
    }

    /// Whether the property can be set.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Convert `value` to this property's type, checking the range.
    pub fn coerce(&self, value: PropertyValue) -> Result<PropertyValue, String> {
        fn ranged<T: PartialOrd + fmt::Display + Copy>(v: T, min: T, max: T) -> Result<T, String> {
            if v < min || v > max {
                Err(format!("value {v} out of range [{min}, {max}]"))
            } else {
                Ok(v)
            }
        }

        let mismatch = |value: &PropertyValue| {
            format!(
                "expected {} value, got {}",
                self.default.type_name(),
                value.type_name()
            )
        };
        let integer = |value: &PropertyValue| value.as_i128().ok_or_else(|| mismatch(value));
        let out_of_type = |v: i128| format!("value {v} does not fit {}", self.default.type_name());

        match &self.kind {
            ParamKind::Bool => match value {
                PropertyValue::Bool(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            ParamKind::Int { min, max } => {
                let v = integer(&value)?;
                let v = i32::try_from(v).map_err(|_| out_of_type(v))?;
                ranged(v, *min, *max).map(PropertyValue::Int)
            }
            ParamKind::Int64 { min, max } => {
                let v = integer(&value)?;
                let v = i64::try_from(v).map_err(|_| out_of_type(v))?;
                ranged(v, *min, *max).map(PropertyValue::Int64)
            }
            ParamKind::UInt { min, max } => {
                let v = integer(&value)?;
                let v = u32::try_from(v).map_err(|_| out_of_type(v))?;
                ranged(v, *min, *max).map(PropertyValue::UInt)
            }
            ParamKind::UInt64 { min, max } => {
                let v = integer(&value)?;
                let v = u64::try_from(v).map_err(|_| out_of_type(v))?;
                ranged(v, *min, *max).map(PropertyValue::UInt64)
            }
            ParamKind::Double { min, max } => {
                let v = match value {
                    PropertyValue::Double(v) => v,
                    ref other => integer(other)? as f64,
                };
                ranged(v, *min, *max).map(PropertyValue::Double)
            }
            ParamKind::String => match value {
                PropertyValue::String(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            ParamKind::Enum(values) => {
                let found = match &value {
                    PropertyValue::String(s) => values.iter().find(|(_, nick)| nick == s),
                    PropertyValue::Enum { value: v, .. } => values.iter().find(|(n, _)| n == v),
                    other => {
                        let v = integer(other)?;
                        values.iter().find(|(n, _)| i128::from(*n) == v)
                    }
                };
                found
                    .map(|(v, nick)| PropertyValue::Enum {
                        value: *v,
                        nick: nick.to_string(),
                    })
                    .ok_or_else(|| format!("'{value}' is not a valid value"))
            }
            ParamKind::Caps => match value {
                PropertyValue::Caps(_) => Ok(value),
                PropertyValue::String(s) => s
                    .parse::<Caps>()
                    .map(PropertyValue::Caps)
                    .map_err(|e| e.to_string()),
                other => Err(mismatch(&other)),
            },
        }
    }

    /// Parse the textual form used in launch descriptions.
    pub fn parse_value(&self, text: &str) -> Result<PropertyValue, String> {
        let value = match &self.kind {
            ParamKind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => PropertyValue::Bool(true),
                "false" | "no" | "0" => PropertyValue::Bool(false),
                _ => return Err(format!("'{text}' is not a boolean")),
            },
            ParamKind::Int { .. } | ParamKind::Int64 { .. } => PropertyValue::Int64(
                text.parse()
                    .map_err(|_| format!("'{text}' is not an integer"))?,
            ),
            ParamKind::UInt { .. } | ParamKind::UInt64 { .. } => PropertyValue::UInt64(
                text.parse()
                    .map_err(|_| format!("'{text}' is not an unsigned integer"))?,
            ),
            ParamKind::Double { .. } => PropertyValue::Double(
                text.parse()
                    .map_err(|_| format!("'{text}' is not a number"))?,
            ),
            ParamKind::Enum(_) => match text.parse::<i32>() {
                Ok(v) => PropertyValue::Int(v),
                Err(_) => PropertyValue::String(text.to_string()),
            },
            ParamKind::String | ParamKind::Caps => PropertyValue::String(text.to_string()),
        };
        self.coerce(value)
    }
}

/// Current property values of one element.
#[derive(Debug, Default)]
pub(crate) struct PropertyStore {
    values: Mutex<BTreeMap<&'static str, PropertyValue>>,
}

impl PropertyStore {
    pub(crate) fn from_specs(specs: &[ParamSpec]) -> Self {
        Self {
            values: Mutex::new(specs.iter().map(|s| (s.name, s.default.clone())).collect()),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<PropertyValue> {
        self.values.lock().get(name).cloned()
    }

    pub(crate) fn set(&self, name: &'static str, value: PropertyValue) {
        self.values.lock().insert(name, value);
    }

    /// Names and values that differ from the defaults.
    pub(crate) fn non_default(&self, specs: &[ParamSpec]) -> Vec<(&'static str, PropertyValue)> {
        let values = self.values.lock();
        specs
            .iter()
            .filter_map(|spec| {
                values
                    .get(spec.name)
                    .filter(|v| *v != &spec.default)
                    .map(|v| (spec.name, v.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_widens_and_checks_range() {
        let spec = ParamSpec::int("num-buffers", "", -1, i32::MAX, -1);
        assert_eq!(spec.coerce(PropertyValue::Int64(5)), Ok(PropertyValue::Int(5)));
        assert!(spec.coerce(PropertyValue::Int(-2)).is_err());
        assert!(spec.coerce(PropertyValue::Bool(true)).is_err());

        let spec = ParamSpec::uint64("duration", "", 0, u64::MAX, 0);
        assert!(spec.coerce(PropertyValue::Int(-1)).is_err());
        assert_eq!(spec.coerce(PropertyValue::Int(7)), Ok(PropertyValue::UInt64(7)));
    }

    #[test]
    fn test_parse_value_from_text() {
        let spec = ParamSpec::bool("silent", "", false);
        assert_eq!(spec.parse_value("true"), Ok(PropertyValue::Bool(true)));
        assert!(spec.parse_value("maybe").is_err());

        let spec = ParamSpec::double("rate", "", 0.0, 10.0, 1.0);
        assert_eq!(spec.parse_value("2"), Ok(PropertyValue::Double(2.0)));

        let spec = ParamSpec::caps("caps", "", Caps::new_any());
        assert!(matches!(spec.parse_value("video/x-raw, width=640"), Ok(PropertyValue::Caps(_))));
    }

    #[test]
    fn test_enum_by_nick_or_value() {
        let spec = ParamSpec::enumeration("mode", "", vec![(0, "none"), (1, "all")], 0);
        let by_nick = spec.parse_value("all").unwrap();
        let by_value = spec.parse_value("1").unwrap();
        assert_eq!(by_nick, by_value);
        assert_eq!(i32::from_property(&by_nick), Some(1));
        assert_eq!(String::from_property(&by_nick).as_deref(), Some("all"));
        assert!(spec.parse_value("some").is_err());
    }

    #[test]
    fn test_typed_conversion() {
        assert_eq!(u64::from_property(&PropertyValue::Int(3)), Some(3));
        assert_eq!(u32::from_property(&PropertyValue::Int(-3)), None);
        assert_eq!(bool::from_property(&PropertyValue::Int(1)), None);
    }
}
