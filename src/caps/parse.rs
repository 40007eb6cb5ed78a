//! Caps string parser using winnow.
//!
//! Accepts the usual textual form:
//!
//! ```text
//! video/x-raw, format=(string)I420, width=(int)[ 1, 4096 ], framerate=30/1
//! audio/x-raw, format={ S16LE, F32LE }; audio/x-alaw
//! ANY
//! EMPTY
//! ```
//!
//! Type annotations are optional; untyped values are inferred (boolean,
//! int, double, fraction, then string).

use super::structure::{Structure, Value};
use winnow::Parser;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, opt, separated};
use winnow::error::ContextError;
use winnow::token::take_while;

type WResult<T> = std::result::Result<T, ContextError>;

/// What a caps string describes.
#[derive(Debug)]
pub(crate) enum ParsedCaps {
    Any,
    Structures(Vec<Structure>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hint {
    Bool,
    Int,
    Double,
    String,
    Fraction,
}

/// Parse a caps string.
pub(crate) fn parse_caps(input: &str) -> Result<ParsedCaps, String> {
    let trimmed = input.trim();
    match trimmed {
        "ANY" => return Ok(ParsedCaps::Any),
        "EMPTY" | "NONE" => return Ok(ParsedCaps::Structures(Vec::new())),
        "" => return Err("empty caps string".to_string()),
        _ => {}
    }
    caps.parse(trimmed)
        .map(ParsedCaps::Structures)
        .map_err(|e| format!("syntax error at offset {}", e.offset()))
}

fn caps(input: &mut &str) -> WResult<Vec<Structure>> {
    let structures: Vec<Structure> = separated(1.., structure, separator(';')).parse_next(input)?;
    // Tolerate a trailing ';'
    let _ = opt(separator(';')).parse_next(input)?;
    multispace0.parse_next(input)?;
    Ok(structures)
}

fn separator<'a>(mut c: char) -> impl Parser<&'a str, (), ContextError> {
    move |input: &mut &'a str| -> WResult<()> {
        let _ = multispace0.parse_next(input)?;
        let _ = c.parse_next(input)?;
        let _ = multispace0.parse_next(input)?;
        Ok(())
    }
}

fn structure(input: &mut &str) -> WResult<Structure> {
    let _ = multispace0.parse_next(input)?;
    let name: &str = media_type.parse_next(input)?;
    let mut structure = Structure::new(name);

    loop {
        let checkpoint = *input;
        if separator(',').parse_next(input).is_err() {
            *input = checkpoint;
            break;
        }
        let (key, value) = field.parse_next(input)?;
        structure.set(key, value);
    }

    Ok(structure)
}

fn media_type<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '+')
    })
    .parse_next(input)
}

fn field_name<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .parse_next(input)
}

fn field(input: &mut &str) -> WResult<(String, Value)> {
    let key = field_name.parse_next(input)?;
    let _ = separator('=').parse_next(input)?;
    let value = typed_value(None).parse_next(input)?;
    Ok((key.to_string(), value))
}

fn type_annotation(input: &mut &str) -> WResult<Hint> {
    let name: &str = delimited(
        ('(', multispace0),
        take_while(1.., |c: char| c.is_alphanumeric()),
        (multispace0, ')'),
    )
    .parse_next(input)?;

    match name {
        "boolean" | "bool" | "b" => Ok(Hint::Bool),
        "int" | "i" => Ok(Hint::Int),
        "double" | "d" | "float" | "f" => Ok(Hint::Double),
        "string" | "str" | "s" => Ok(Hint::String),
        "fraction" => Ok(Hint::Fraction),
        _ => Err(ContextError::new()),
    }
}

/// A value with an optional `(type)` prefix; `outer` is inherited from an
/// enclosing list or range annotation.
fn typed_value<'a>(outer: Option<Hint>) -> impl Parser<&'a str, Value, ContextError> {
    move |input: &mut &'a str| -> WResult<Value> {
        let hint = opt(type_annotation).parse_next(input)?.or(outer);
        let _ = multispace0.parse_next(input)?;
        alt((range(hint), list(hint), scalar(hint))).parse_next(input)
    }
}

fn range<'a>(hint: Option<Hint>) -> impl Parser<&'a str, Value, ContextError> {
    move |input: &mut &'a str| -> WResult<Value> {
        let _ = ('[', multispace0).parse_next(input)?;
        let min = scalar(hint).parse_next(input)?;
        let _ = separator(',').parse_next(input)?;
        let max = scalar(hint).parse_next(input)?;
        let _ = (multispace0, ']').parse_next(input)?;

        match (min, max) {
            (Value::Int(min), Value::Int(max)) if min <= max => Ok(Value::IntRange { min, max }),
            (Value::Double(min), Value::Double(max)) if min <= max => {
                Ok(Value::DoubleRange { min, max })
            }
            (Value::Int(min), Value::Double(max)) if f64::from(min) <= max => {
                Ok(Value::DoubleRange {
                    min: f64::from(min),
                    max,
                })
            }
            (Value::Double(min), Value::Int(max)) if min <= f64::from(max) => {
                Ok(Value::DoubleRange {
                    min,
                    max: f64::from(max),
                })
            }
            _ => Err(ContextError::new()),
        }
    }
}

fn list<'a>(hint: Option<Hint>) -> impl Parser<&'a str, Value, ContextError> {
    move |input: &mut &'a str| -> WResult<Value> {
        let _ = ('{', multispace0).parse_next(input)?;
        let items: Vec<Value> = separated(1.., typed_value(hint), separator(',')).parse_next(input)?;
        let _ = (multispace0, '}').parse_next(input)?;
        Ok(Value::List(items))
    }
}

fn scalar<'a>(hint: Option<Hint>) -> impl Parser<&'a str, Value, ContextError> {
    move |input: &mut &'a str| -> WResult<Value> {
        if input.starts_with('"') {
            let text = quoted_string.parse_next(input)?;
            return match hint {
                None | Some(Hint::String) => Ok(Value::String(text)),
                Some(h) => convert(&text, Some(h)).ok_or_else(ContextError::new),
            };
        }
        let token: &str = take_while(1.., |c: char| {
            !c.is_whitespace() && !matches!(c, ',' | ';' | '[' | ']' | '{' | '}' | '"')
        })
        .parse_next(input)?;
        convert(token, hint).ok_or_else(ContextError::new)
    }
}

fn quoted_string(input: &mut &str) -> WResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                *input = &input[i + 1..];
                return Ok(out);
            }
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            _ => out.push(c),
        }
    }
    Err(ContextError::new())
}

fn convert(token: &str, hint: Option<Hint>) -> Option<Value> {
    match hint {
        Some(Hint::Bool) => parse_bool(token).map(Value::Bool),
        Some(Hint::Int) => token.parse().ok().map(Value::Int),
        Some(Hint::Double) => token.parse().ok().map(Value::Double),
        Some(Hint::String) => Some(Value::String(token.to_string())),
        Some(Hint::Fraction) => parse_fraction(token)
            .or_else(|| token.parse::<i32>().ok().map(|n| (n, 1)))
            .map(|(n, d)| Value::Fraction(n, d)),
        None => {
            if let Some(b) = parse_bool(token) {
                Some(Value::Bool(b))
            } else if let Ok(i) = token.parse::<i32>() {
                Some(Value::Int(i))
            } else if let Some((n, d)) = parse_fraction(token) {
                Some(Value::Fraction(n, d))
            } else if token.contains('.') {
                match token.parse::<f64>() {
                    Ok(d) => Some(Value::Double(d)),
                    Err(_) => Some(Value::String(token.to_string())),
                }
            } else {
                Some(Value::String(token.to_string()))
            }
        }
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token {
        "true" | "TRUE" | "yes" => Some(true),
        "false" | "FALSE" | "no" => Some(false),
        _ => None,
    }
}

fn parse_fraction(token: &str) -> Option<(i32, i32)> {
    let (n, d) = token.split_once('/')?;
    let n = n.parse().ok()?;
    let d: i32 = d.parse().ok()?;
    (d != 0).then_some((n, d))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structures(input: &str) -> Vec<Structure> {
        match parse_caps(input).unwrap() {
            ParsedCaps::Structures(s) => s,
            ParsedCaps::Any => panic!("expected structures"),
        }
    }

    #[test]
    fn test_parse_simple_media_type() {
        let s = structures("audio/x-raw");
        assert_eq!(s.len(), 1);
        assert_eq!(s[0].name(), "audio/x-raw");
        assert_eq!(s[0].n_fields(), 0);
    }

    #[test]
    fn test_parse_typed_fields() {
        let s = structures("video/x-raw, format=(string)I420, width=(int)640, rate=(double)1.5");
        assert_eq!(s[0].get_str("format"), Some("I420"));
        assert_eq!(s[0].get("width"), Some(&Value::Int(640)));
        assert_eq!(s[0].get("rate"), Some(&Value::Double(1.5)));
    }

    #[test]
    fn test_parse_inferred_fields() {
        let s = structures("video/x-raw,width=320,framerate=30/1,interlaced=false,par=1.0");
        assert_eq!(s[0].get("width"), Some(&Value::Int(320)));
        assert_eq!(s[0].get("framerate"), Some(&Value::Fraction(30, 1)));
        assert_eq!(s[0].get("interlaced"), Some(&Value::Bool(false)));
        assert_eq!(s[0].get("par"), Some(&Value::Double(1.0)));
    }

    #[test]
    fn test_parse_range_and_list() {
        let s = structures("video/x-raw, width=(int)[ 1, 4096 ], format={ I420, NV12 }");
        assert_eq!(
            s[0].get("width"),
            Some(&Value::IntRange { min: 1, max: 4096 })
        );
        assert_eq!(
            s[0].get("format"),
            Some(&Value::List(vec!["I420".into(), "NV12".into()]))
        );
    }

    #[test]
    fn test_parse_annotated_list() {
        let s = structures("audio/x-raw, rate=(int){ 44100, 48000 }");
        assert_eq!(
            s[0].get("rate"),
            Some(&Value::List(vec![Value::Int(44100), Value::Int(48000)]))
        );
    }

    #[test]
    fn test_parse_quoted_string() {
        let s = structures(r#"text/x-raw, label="hello, \"world\"""#);
        assert_eq!(s[0].get_str("label"), Some("hello, \"world\""));
    }

    #[test]
    fn test_parse_multiple_structures() {
        let s = structures("video/x-raw, width=640; audio/x-raw ;");
        assert_eq!(s.len(), 2);
        assert_eq!(s[1].name(), "audio/x-raw");
    }

    #[test]
    fn test_parse_any_and_empty() {
        assert!(matches!(parse_caps("ANY"), Ok(ParsedCaps::Any)));
        assert!(matches!(parse_caps(" EMPTY "), Ok(ParsedCaps::Structures(v)) if v.is_empty()));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_caps("").is_err());
        assert!(parse_caps("video/x-raw, width=").is_err());
        assert!(parse_caps("video/x-raw, width=(int)abc").is_err());
        assert!(parse_caps("video/x-raw, width=(int)[ 10, 1 ]").is_err());
        assert!(parse_caps("video/x-raw, (int)5").is_err());
    }
}
