use crate::parsers::Parser;
use crate::record::Value;
use anyhow::Context;
use encoding_rs::Encoding;

/// Returns values unchanged.
///
/// If a charset is configured, raw bytes read from a file are decoded from it. Values which are
/// already strings (e.g. request parameters) are always UTF-8 and therefore passed through.
pub struct StringParser {
    name: String,
    charset: Option<&'static Encoding>,
}

impl StringParser {
    /// Creates a new string parser.
    pub fn new(name: &str, charset: Option<&'static Encoding>) -> Self {
        StringParser {
            name: name.to_owned(),
            charset,
        }
    }
}

impl Parser for StringParser {
    fn name(&self) -> &str {
        &self.name
    }

    fn regexp_pattern(&self) -> String {
        "[^/]+".to_owned()
    }

    fn parse(&self, value: &str) -> anyhow::Result<Value> {
        Ok(Value::from(value))
    }

    fn parse_bytes(&self, value: &[u8]) -> anyhow::Result<Value> {
        match self.charset {
            Some(charset) => {
                let (decoded, had_errors) = charset.decode_without_bom_handling(value);
                if had_errors {
                    Err(anyhow::anyhow!(
                        "The value is not valid {}",
                        charset.name()
                    ))
                } else {
                    Ok(Value::from(decoded.into_owned()))
                }
            }
            None => Ok(Value::from(
                std::str::from_utf8(value).context("The value is not valid UTF-8")?,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parsers::{Parser, StringParser};
    use crate::record::Value;

    #[test]
    fn charsets_are_decoded() {
        let latin1 = StringParser::new("latin1", encoding_rs::Encoding::for_label(b"ISO-8859-1"));
        assert_eq!(
            latin1.parse_bytes(b"M\xfcller").unwrap(),
            Value::from("Müller")
        );
        assert_eq!(latin1.parse("Müller").unwrap(), Value::from("Müller"));

        let plain = StringParser::new("string", None);
        assert_eq!(plain.parse_bytes(b"").unwrap(), Value::from(""));
        assert!(plain.parse_bytes(b"M\xfcller").is_err());
    }
}
