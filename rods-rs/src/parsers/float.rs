use crate::parsers::{digit_class, Parser};
use crate::record::Value;

/// Parses 64 bit floating point numbers.
///
/// All ignored characters are removed first, then the decimal separator is replaced by a `.`.
pub struct FloatParser {
    name: String,
    ignore_characters: Vec<char>,
    decimal_separator: char,
    pattern: String,
}

impl FloatParser {
    /// Creates a new float parser.
    pub fn new(name: &str, ignore_characters: &str, decimal_separator: char) -> Self {
        let digits = digit_class(ignore_characters);
        FloatParser {
            name: name.to_owned(),
            ignore_characters: ignore_characters.chars().collect(),
            decimal_separator,
            pattern: format!(
                "[-+]?[{digits}]+(?:{separator}[{digits}]*)?",
                digits = digits,
                separator = regex::escape(decimal_separator.encode_utf8(&mut [0; 4]))
            ),
        }
    }
}

impl Parser for FloatParser {
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
            .map(|ch| if ch == self.decimal_separator { '.' } else { ch })
            .collect();
        if cleaned.is_empty() {
            return Ok(Value::Null);
        }

        match cleaned.parse::<f64>() {
            Ok(number) if number.is_finite() => Ok(Value::Float(number)),
            _ => Err(anyhow::anyhow!("Cannot parse '{}' as float", value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parsers::{FloatParser, Parser};
    use crate::record::Value;

    #[test]
    fn decimal_separators_are_normalized() {
        let parser = FloatParser::new("amount", ".", ',');
        assert_eq!(parser.parse("1.234,5").unwrap(), Value::Float(1234.5));
        assert_eq!(parser.parse("-0,25").unwrap(), Value::Float(-0.25));
        assert_eq!(parser.parse("").unwrap(), Value::Null);
        assert!(parser.parse("1,2,3").is_err());
        assert!(parser.parse("NaN").is_err());
    }

    #[test]
    fn values_survive_a_round_trip() {
        let parser = FloatParser::new("float", "", '.');
        for value in [0.5, -3.0, 1e-7, 123456.789] {
            assert_eq!(
                parser.parse(&value.to_string()).unwrap(),
                Value::Float(value)
            );
        }
    }
}
