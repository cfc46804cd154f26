use crate::parsers::{digit_class, Parser};
use crate::record::Value;

/// Parses signed 64 bit integers after removing all ignored characters.
pub struct IntegerParser {
    name: String,
    ignore_characters: Vec<char>,
    pattern: String,
}

impl IntegerParser {
    /// Creates a new integer parser which drops the given characters before parsing.
    pub fn new(name: &str, ignore_characters: &str) -> Self {
        IntegerParser {
            name: name.to_owned(),
            ignore_characters: ignore_characters.chars().collect(),
            pattern: format!("[-+]?[{}]+", digit_class(ignore_characters)),
        }
    }
}

impl Parser for IntegerParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn regexp_pattern(&self) -> String {
        self.pattern.clone()
    }

    fn parse(&self, value: &str) -> anyhow::Result<Value> {
        let cleaned: String = value
            .chars()
            .filter(|ch| !self.ignore_characters.contains(ch))
            .collect();
        if cleaned.is_empty() {
            return Ok(Value::Null);
        }

        cleaned
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| anyhow::anyhow!("Cannot parse '{}' as integer", value))
    }
}

#[cfg(test)]
mod tests {
    use crate::parsers::{IntegerParser, Parser};
    use crate::record::Value;
    use regex::Regex;

    #[test]
    fn ignored_characters_are_removed() {
        let parser = IntegerParser::new("count", ".");
        assert_eq!(parser.parse("1.234.567").unwrap(), Value::Integer(1234567));
        assert_eq!(parser.parse("-12").unwrap(), Value::Integer(-12));
        assert_eq!(parser.parse("").unwrap(), Value::Null);
        assert!(parser.parse("12 apples").is_err());
        assert!(parser.parse("99999999999999999999").is_err());
    }

    #[test]
    fn the_pattern_matches_valid_values() {
        let parser = IntegerParser::new("count", ".");
        let pattern = Regex::new(&format!("^{}$", parser.regexp_pattern())).unwrap();
        assert!(pattern.is_match("1.234"));
        assert!(pattern.is_match("-5"));
        assert!(!pattern.is_match("12a"));
        assert!(!pattern.is_match("1,5"));
    }
}
