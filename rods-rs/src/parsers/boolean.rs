use crate::parsers::Parser;
use crate::record::Value;

/// Maps well known strings to `true` or `false`.
///
/// Values are compared exactly. An empty value which isn't listed explicitly yields null.
pub struct BooleanParser {
    name: String,
    true_values: Vec<String>,
    false_values: Vec<String>,
}

impl BooleanParser {
    /// Creates a new boolean parser. Both lists must not be empty.
    pub fn new(
        name: &str,
        true_values: Vec<String>,
        false_values: Vec<String>,
    ) -> anyhow::Result<Self> {
        if true_values.is_empty() || false_values.is_empty() {
            return Err(anyhow::anyhow!(
                "A boolean parser requires at least one true and one false value"
            ));
        }

        Ok(BooleanParser {
            name: name.to_owned(),
            true_values,
            false_values,
        })
    }
}

impl Parser for BooleanParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn regexp_pattern(&self) -> String {
        let alternatives: Vec<String> = self
            .true_values
            .iter()
            .chain(self.false_values.iter())
            .map(|value| regex::escape(value))
            .collect();

        format!("(?:{})", alternatives.join("|"))
    }

    fn parse(&self, value: &str) -> anyhow::Result<Value> {
        if self.true_values.iter().any(|candidate| candidate == value) {
            Ok(Value::Boolean(true))
        } else if self.false_values.iter().any(|candidate| candidate == value) {
            Ok(Value::Boolean(false))
        } else if value.is_empty() {
            Ok(Value::Null)
        } else {
            Err(anyhow::anyhow!(
                "Cannot parse '{}' as boolean. Expected one of: {}",
                value,
                self.true_values
                    .iter()
                    .chain(self.false_values.iter())
                    .map(|value| value.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parsers::{BooleanParser, Parser};
    use crate::record::Value;

    #[test]
    fn configured_values_are_mapped() {
        let parser = BooleanParser::new(
            "flag",
            vec!["ja".to_owned(), "1".to_owned()],
            vec!["nein".to_owned(), "0".to_owned()],
        )
        .unwrap();

        assert_eq!(parser.parse("ja").unwrap(), Value::Boolean(true));
        assert_eq!(parser.parse("0").unwrap(), Value::Boolean(false));
        assert_eq!(parser.parse("").unwrap(), Value::Null);
        assert!(parser.parse("Ja").is_err());
        assert_eq!(parser.regexp_pattern(), "(?:ja|1|nein|0)");
    }

    #[test]
    fn empty_value_lists_are_rejected() {
        assert!(BooleanParser::new("flag", vec![], vec!["no".to_owned()]).is_err());
    }
}
