use crate::parsers::Parser;
use crate::record::Value;
use anyhow::Context;

/// Parses arbitrary JSON into a value tree.
pub struct JsonParser {
    name: String,
}

impl JsonParser {
    /// Creates a new JSON parser.
    pub fn new(name: &str) -> Self {
        JsonParser {
            name: name.to_owned(),
        }
    }
}

impl Parser for JsonParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_primitive(&self) -> bool {
        false
    }

    fn regexp_pattern(&self) -> String {
        String::new()
    }

    fn parse(&self, value: &str) -> anyhow::Result<Value> {
        if value.trim().is_empty() {
            return Ok(Value::Null);
        }

        let json: serde_json::Value =
            serde_json::from_str(value).context("Cannot parse value as JSON")?;
        Ok(Value::from(json))
    }
}

#[cfg(test)]
mod tests {
    use crate::parsers::{JsonParser, Parser};
    use crate::record::Value;

    #[test]
    fn json_is_turned_into_values() {
        let parser = JsonParser::new("json");
        assert!(!parser.is_primitive());
        assert_eq!(parser.regexp_pattern(), "");
        assert_eq!(
            parser.parse("[1, \"a\"]").unwrap(),
            Value::List(vec![Value::Integer(1), Value::from("a")])
        );
        assert_eq!(parser.parse("true").unwrap(), Value::Boolean(true));
        assert!(parser.parse("{").is_err());
    }
}
