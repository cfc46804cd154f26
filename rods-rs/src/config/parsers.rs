//! Describes the configuration of the parsers section.
use crate::config::node::Node;
use encoding_rs::Encoding;
use regex::Regex;

/// Contains the names of all parsers which are always present.
pub const BUILT_IN_PARSERS: [&str; 5] = ["string", "integer", "float", "boolean", "json"];

/// Describes how a split parser cuts its input into pieces.
#[derive(Debug, Clone)]
pub enum Separator {
    /// Splits at each occurrence of the given string.
    Text(String),
    /// Splits at each match of the given expression.
    Regexp(Regex),
}

/// Describes a single parser.
#[derive(Debug, Clone)]
pub enum ParserConfig {
    /// Returns the value as is, optionally decoding it from the given charset first.
    String {
        /// Contains the charset of the raw bytes, if these aren't UTF-8.
        convert_from_charset: Option<&'static Encoding>,
    },
    /// Parses signed 64 bit integers.
    Integer {
        /// Contains the characters which are removed before parsing (e.g. thousand separators).
        ignore_characters: String,
    },
    /// Parses 64 bit floating point numbers.
    Float {
        /// Contains the characters which are removed before parsing.
        ignore_characters: String,
        /// Contains the decimal separator which is replaced by a "." before parsing.
        decimal_separator: char,
    },
    /// Maps well known strings to `true` or `false`.
    Boolean {
        /// Contains all values which represent `true`.
        true_values: Vec<String>,
        /// Contains all values which represent `false`.
        false_values: Vec<String>,
    },
    /// Parses arbitrary JSON.
    Json,
    /// Splits a value and parses each piece with another parser.
    Split {
        /// Determines where to split.
        separator: Separator,
        /// Contains the name of the parser applied to each piece.
        parser: String,
    },
}

impl ParserConfig {
    /// Creates the boolean parser used for `true` and `false` values.
    pub fn default_boolean() -> Self {
        ParserConfig::Boolean {
            true_values: vec!["true".to_owned()],
            false_values: vec!["false".to_owned()],
        }
    }

    /// Reads a parser from the given node.
    pub fn parse(node: &Node) -> anyhow::Result<ParserConfig> {
        let type_name = node.type_name()?;
        match type_name.as_str() {
            "string" => {
                node.ensure_keys(&["type", "convertFromCharset"])?;
                let convert_from_charset = match node.optional_string("convertFromCharset")? {
                    Some(label) => Some(Encoding::for_label(label.as_bytes()).ok_or_else(|| {
                        node.child("convertFromCharset")
                            .error(format!("Unknown charset '{}'", label))
                    })?),
                    None => None,
                };
                Ok(ParserConfig::String {
                    convert_from_charset,
                })
            }
            "integer" => {
                node.ensure_keys(&["type", "ignoreCharacters"])?;
                Ok(ParserConfig::Integer {
                    ignore_characters: node.string_or("ignoreCharacters", "")?,
                })
            }
            "float" => {
                node.ensure_keys(&["type", "ignoreCharacters", "decimalSeparator"])?;
                Ok(ParserConfig::Float {
                    ignore_characters: node.string_or("ignoreCharacters", "")?,
                    decimal_separator: node.char_or("decimalSeparator", '.')?,
                })
            }
            "boolean" => {
                node.ensure_keys(&["type", "trueValues", "falseValues"])?;
                let (true_values, false_values) = read_boolean_values(node)?;
                Ok(ParserConfig::Boolean {
                    true_values,
                    false_values,
                })
            }
            "json" => {
                node.ensure_keys(&["type"])?;
                Ok(ParserConfig::Json)
            }
            "split" => {
                node.ensure_keys(&["type", "separator", "regexp", "parser"])?;
                let separator = match (
                    node.optional_string("separator")?,
                    node.optional_string("regexp")?,
                ) {
                    (Some(separator), None) if !separator.is_empty() => {
                        Separator::Text(separator)
                    }
                    (None, Some(regexp)) => Separator::Regexp(Regex::new(&regexp).map_err(
                        |error| {
                            node.child("regexp")
                                .error(format!("Invalid regular expression: {}", error))
                        },
                    )?),
                    _ => {
                        return Err(node.error(
                            "A split parser requires either a non-empty 'separator' or a 'regexp'",
                        ))
                    }
                };
                Ok(ParserConfig::Split {
                    separator,
                    parser: node.string_or("parser", "string")?,
                })
            }
            other => Err(node.unknown_type(
                other,
                &["string", "integer", "float", "boolean", "json", "split"],
            )),
        }
    }
}

/// Reads the `trueValues` and `falseValues` of the given node. Both are required to be non-empty.
pub fn read_boolean_values(node: &Node) -> anyhow::Result<(Vec<String>, Vec<String>)> {
    let true_values = node.string_list("trueValues")?.unwrap_or_default();
    let false_values = node.string_list("falseValues")?.unwrap_or_default();
    if true_values.is_empty() {
        return Err(node
            .child("trueValues")
            .error("At least one value has to be given"));
    }
    if false_values.is_empty() {
        return Err(node
            .child("falseValues")
            .error("At least one value has to be given"));
    }

    Ok((true_values, false_values))
}
