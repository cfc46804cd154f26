//! Provides the parsers which turn raw strings into [Values](Value).
//!
//! Parsers are referenced by name from inputs (to convert columns or XML nodes) and from outputs
//! (to convert request parameters). Primitive parsers produce scalars and can therefore be used
//! to filter records. Composite parsers (`split` and `json`) produce lists or maps.
//!
//! All parsers live in a [Parsers] registry. As a `split` parser refers to another parser by
//! name and the declaration order in the config is arbitrary, the inner parser is looked up each
//! time a value is parsed. The registry still verifies once all parsers exist, that all these
//! references resolve and do not form a cycle.
//!
//! # Example
//! ```
//! # use rods::parsers::Parsers;
//! # use rods::record::Value;
//! let parsers = Parsers::new(&[]).unwrap();
//! let integer = parsers.find("integer").unwrap();
//!
//! assert_eq!(integer.parse("42").unwrap(), Value::Integer(42));
//! assert_eq!(integer.parse("").unwrap(), Value::Null);
//! assert!(integer.parse("42x").is_err());
//! ```
use crate::config::parsers::ParserConfig;
use crate::record::Value;
use anyhow::Context;
use fnv::FnvHashMap;
use std::cmp::Ordering;
use std::sync::{Arc, Weak};

mod boolean;
mod float;
mod integer;
mod json;
mod split;
mod string;

pub use boolean::BooleanParser;
pub use float::FloatParser;
pub use integer::IntegerParser;
pub use json::JsonParser;
pub use split::SplitParser;
pub use string::StringParser;

/// Converts raw strings into values.
pub trait Parser: Send + Sync {
    /// Returns the name of this parser.
    fn name(&self) -> &str;

    /// Determines if this parser produces scalars which can be used as filters.
    fn is_primitive(&self) -> bool {
        true
    }

    /// Returns a regular expression which matches all valid inputs.
    ///
    /// This is used to extract parameters from request paths and is empty for non-primitive
    /// parsers.
    fn regexp_pattern(&self) -> String;

    /// Parses the given string.
    fn parse(&self, value: &str) -> anyhow::Result<Value>;

    /// Parses the given raw bytes as read from a file.
    fn parse_bytes(&self, value: &[u8]) -> anyhow::Result<Value> {
        let value = std::str::from_utf8(value).context("The value is not valid UTF-8")?;
        self.parse(value)
    }

    /// Returns the name of the parser which is applied to the pieces of a split value.
    fn inner_parser(&self) -> Option<&str> {
        None
    }
}

/// Contains all known parsers by name.
pub struct Parsers {
    parsers: FnvHashMap<String, Arc<dyn Parser>>,
}

impl Parsers {
    /// Creates a registry containing the built-in parsers and the given ones.
    pub fn new(configs: &[(String, ParserConfig)]) -> anyhow::Result<Arc<Parsers>> {
        let mut failure = None;
        let parsers = Arc::new_cyclic(|registry: &Weak<Parsers>| {
            let mut parsers = FnvHashMap::default();
            for (name, config) in built_in_parsers()
                .iter()
                .chain(configs.iter())
            {
                match create_parser(name, config, registry) {
                    Ok(parser) => {
                        let _ = parsers.insert(name.clone(), parser);
                    }
                    Err(error) => {
                        if failure.is_none() {
                            failure = Some(anyhow::anyhow!("parsers.{}: {}", name, error));
                        }
                    }
                }
            }

            Parsers { parsers }
        });

        if let Some(error) = failure {
            return Err(error);
        }

        parsers.verify_references()?;
        for (name, _) in configs {
            log::info!("Created parser '{}'.", name);
        }

        Ok(parsers)
    }

    fn verify_references(&self) -> anyhow::Result<()> {
        for (name, parser) in &self.parsers {
            let mut visited = vec![name.as_str()];
            let mut current = parser.inner_parser();
            while let Some(inner) = current {
                if visited.contains(&inner) {
                    return Err(anyhow::anyhow!(
                        "parsers.{}.parser: The parsers form a cycle: {} -> {}",
                        name,
                        visited.join(" -> "),
                        inner
                    ));
                }
                visited.push(inner);

                current = match self.parsers.get(inner) {
                    Some(next) => next.inner_parser(),
                    None => {
                        return Err(anyhow::anyhow!(
                            "parsers.{}.parser: Unknown parser '{}'",
                            visited[visited.len() - 2],
                            inner
                        ))
                    }
                };
            }
        }

        Ok(())
    }

    /// Returns the parser with the given name.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Parser>> {
        self.parsers.get(name).cloned()
    }

    /// Returns the parser with the given name or reports an error for the given config path.
    pub fn require(&self, name: &str, path: &str) -> anyhow::Result<Arc<dyn Parser>> {
        self.find(name)
            .ok_or_else(|| anyhow::anyhow!("{}: Unknown parser '{}'", path, name))
    }

    /// Returns the primitive parser with the given name or reports an error for the given path.
    pub fn require_primitive(&self, name: &str, path: &str) -> anyhow::Result<Arc<dyn Parser>> {
        let parser = self.require(name, path)?;
        if !parser.is_primitive() {
            return Err(anyhow::anyhow!(
                "{}: The parser '{}' is not a primitive and cannot be used to filter",
                path,
                name
            ));
        }

        Ok(parser)
    }
}

fn built_in_parsers() -> Vec<(String, ParserConfig)> {
    vec![
        (
            "string".to_owned(),
            ParserConfig::String {
                convert_from_charset: None,
            },
        ),
        (
            "integer".to_owned(),
            ParserConfig::Integer {
                ignore_characters: String::new(),
            },
        ),
        (
            "float".to_owned(),
            ParserConfig::Float {
                ignore_characters: String::new(),
                decimal_separator: '.',
            },
        ),
        ("boolean".to_owned(), ParserConfig::default_boolean()),
        ("json".to_owned(), ParserConfig::Json),
    ]
}

/// Creates a single parser.
///
/// Split parsers keep a weak reference to the registry so that their inner parser can be
/// resolved when a value is parsed.
pub fn create_parser(
    name: &str,
    config: &ParserConfig,
    registry: &Weak<Parsers>,
) -> anyhow::Result<Arc<dyn Parser>> {
    Ok(match config {
        ParserConfig::String {
            convert_from_charset,
        } => Arc::new(StringParser::new(name, *convert_from_charset)),
        ParserConfig::Integer { ignore_characters } => {
            Arc::new(IntegerParser::new(name, ignore_characters))
        }
        ParserConfig::Float {
            ignore_characters,
            decimal_separator,
        } => Arc::new(FloatParser::new(name, ignore_characters, *decimal_separator)),
        ParserConfig::Boolean {
            true_values,
            false_values,
        } => Arc::new(BooleanParser::new(
            name,
            true_values.clone(),
            false_values.clone(),
        )?),
        ParserConfig::Json => Arc::new(JsonParser::new(name)),
        ParserConfig::Split { separator, parser } => Arc::new(SplitParser::new(
            name,
            separator.clone(),
            parser,
            registry.clone(),
        )),
    })
}

/// Builds a character class body which matches digits and the given ignored characters.
fn digit_class(ignore_characters: &str) -> String {
    let mut class = String::from("0-9");
    for ch in ignore_characters.chars() {
        class.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4])));
    }

    class
}

/// Compares two values of the same kind.
///
/// Strings, integers, floats and booleans (`false < true`) are ordered naturally. Two nulls are
/// considered equal. Comparing values of different kinds (or lists and maps) is an error, as
/// there is no sane order between them.
///
/// # Example
/// ```
/// # use rods::parsers::compare;
/// # use rods::record::Value;
/// # use std::cmp::Ordering;
/// assert_eq!(compare(&Value::Integer(1), &Value::Integer(2)).unwrap(), Ordering::Less);
/// assert_eq!(compare(&Value::Boolean(true), &Value::Boolean(false)).unwrap(), Ordering::Greater);
/// assert!(compare(&Value::Integer(1), &Value::from("1")).is_err());
/// ```
pub fn compare(a: &Value, b: &Value) -> anyhow::Result<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Integer(a), Value::Integer(b)) => Ok(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => Ok(a.total_cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Ok(a.cmp(b)),
        (Value::Null, Value::Null) => Ok(Ordering::Equal),
        _ => Err(anyhow::anyhow!(
            "Cannot compare {} with {}",
            a.kind(),
            b.kind()
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::parsers::{ParserConfig, Separator};
    use crate::parsers::{compare, Parsers};
    use crate::record::Value;
    use std::cmp::Ordering;

    fn split(separator: &str, parser: &str) -> ParserConfig {
        ParserConfig::Split {
            separator: Separator::Text(separator.to_owned()),
            parser: parser.to_owned(),
        }
    }

    #[test]
    fn split_parsers_may_refer_to_later_parsers() {
        let parsers = Parsers::new(&[
            ("numbers".to_owned(), split(",", "amount")),
            (
                "amount".to_owned(),
                ParserConfig::Integer {
                    ignore_characters: ".".to_owned(),
                },
            ),
        ])
        .unwrap();

        let numbers = parsers.find("numbers").unwrap();
        assert!(!numbers.is_primitive());
        assert_eq!(
            numbers.parse("1.000,2").unwrap(),
            Value::List(vec![Value::Integer(1000), Value::Integer(2)])
        );
    }

    #[test]
    fn unknown_or_cyclic_references_are_rejected() {
        assert!(Parsers::new(&[("a".to_owned(), split(",", "missing"))]).is_err());

        let error = Parsers::new(&[
            ("a".to_owned(), split(",", "b")),
            ("b".to_owned(), split(";", "a")),
        ])
        .err()
        .unwrap();
        assert!(error.to_string().contains("cycle"));
    }

    #[test]
    fn primitive_parsers_can_be_required() {
        let parsers = Parsers::new(&[]).unwrap();
        assert!(parsers.require_primitive("integer", "x").is_ok());
        assert!(parsers.require_primitive("json", "x").is_err());
        assert_eq!(
            parsers.require("nope", "outputs.x.parser").err().unwrap().to_string(),
            "outputs.x.parser: Unknown parser 'nope'"
        );
    }

    #[test]
    fn comparison_is_a_total_order_per_kind() {
        let values = [
            Value::Float(-1.5),
            Value::Float(0.0),
            Value::Float(2.25),
        ];
        for a in &values {
            assert_eq!(compare(a, a).unwrap(), Ordering::Equal);
            for b in &values {
                assert_eq!(compare(a, b).unwrap(), compare(b, a).unwrap().reverse());
            }
        }

        assert_eq!(
            compare(&Value::from("a"), &Value::from("b")).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Boolean(false), &Value::Boolean(true)).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            compare(&Value::Float(1.0), &Value::Integer(1))
                .err()
                .unwrap()
                .to_string(),
            "Cannot compare float with integer"
        );
    }
}
