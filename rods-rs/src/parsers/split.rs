use crate::config::parsers::Separator;
use crate::parsers::{Parser, Parsers};
use crate::record::Value;
use std::sync::Weak;

/// Splits a value into pieces and parses each piece with another parser.
///
/// The inner parser is resolved on each call, as it might be declared after this one.
pub struct SplitParser {
    name: String,
    separator: Separator,
    inner: String,
    registry: Weak<Parsers>,
}

impl SplitParser {
    /// Creates a new split parser which resolves `inner` within the given registry.
    pub fn new(name: &str, separator: Separator, inner: &str, registry: Weak<Parsers>) -> Self {
        SplitParser {
            name: name.to_owned(),
            separator,
            inner: inner.to_owned(),
            registry,
        }
    }

    fn parse_pieces<'a, I>(&self, pieces: I) -> anyhow::Result<Value>
    where
        I: Iterator<Item = &'a str>,
    {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("The parser registry has already been dropped"))?;
        let inner = registry.find(&self.inner).ok_or_else(|| {
            anyhow::anyhow!(
                "The parser '{}' refers to the unknown parser '{}'",
                self.name,
                self.inner
            )
        })?;

        let mut result = Vec::new();
        for piece in pieces {
            result.push(inner.parse(piece)?);
        }

        Ok(Value::List(result))
    }
}

impl Parser for SplitParser {
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
        if value.is_empty() {
            return Ok(Value::List(Vec::new()));
        }

        match &self.separator {
            Separator::Text(separator) => self.parse_pieces(value.split(separator.as_str())),
            Separator::Regexp(regexp) => self.parse_pieces(regexp.split(value)),
        }
    }

    fn inner_parser(&self) -> Option<&str> {
        Some(&self.inner)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::parsers::{ParserConfig, Separator};
    use crate::parsers::Parsers;
    use crate::record::Value;
    use regex::Regex;

    #[test]
    fn values_are_split_by_expressions() {
        let parsers = Parsers::new(&[(
            "words".to_owned(),
            ParserConfig::Split {
                separator: Separator::Regexp(Regex::new(r"\s*,\s*").unwrap()),
                parser: "string".to_owned(),
            },
        )])
        .unwrap();

        let words = parsers.find("words").unwrap();
        assert_eq!(
            words.parse("a , b,c").unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
        assert_eq!(words.parse("").unwrap(), Value::List(vec![]));
    }
}
