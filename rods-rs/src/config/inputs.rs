//! Describes the configuration of the inputs section.
use crate::config::node::Node;
use crate::config::parsers::read_boolean_values;

/// Describes a single input.
#[derive(Debug, Clone)]
pub struct InputConfig {
    /// Contains the name of the source which provides the file.
    pub source: String,
    /// Contains the file name relative to the source.
    pub file: String,
    /// Determines if the server is aborted once the file changes.
    pub die_on_input_change: bool,
    /// Contains the format specific settings.
    pub format: InputFormat,
}

/// Enumerates the supported file formats.
#[derive(Debug, Clone)]
pub enum InputFormat {
    /// Comma separated values with a declared list of columns.
    Csv(CsvConfig),
    /// A top-level JSON array of objects.
    Json,
    /// Elements selected from an XML document.
    Xml(XmlConfig),
}

/// Contains the settings of a CSV input.
#[derive(Debug, Clone)]
pub struct CsvConfig {
    /// Determines if the first row is a header and therefore skipped.
    pub ignore_first_row: bool,
    /// Contains the field delimiter.
    pub delimiter: u8,
    /// Contains the columns in the order of appearance.
    pub columns: Vec<ColumnConfig>,
}

/// Describes a CSV column.
#[derive(Debug, Clone)]
pub struct ColumnConfig {
    /// Contains the property name of the column.
    pub name: String,
    /// Contains the name of the parser to use.
    pub parser: String,
    /// Contains inline boolean values which replace the parser.
    pub boolean_values: Option<(Vec<String>, Vec<String>)>,
    /// Contains a decimal separator which replaces the parser by an inline float parser.
    pub decimal_separator: Option<char>,
}

/// Contains the settings of an XML input.
#[derive(Debug, Clone)]
pub struct XmlConfig {
    /// Selects the elements which become records.
    pub xpath: String,
    /// Contains the properties extracted from each record element.
    pub properties: Vec<(String, XmlPropertyConfig)>,
}

/// Describes how a property is extracted from an XML record element.
#[derive(Debug, Clone)]
pub enum XmlPropertyConfig {
    /// Parses the text of the first matching node.
    Primitive {
        /// Selects the node relative to its parent.
        xpath: String,
        /// Contains the name of the parser to use.
        parser: String,
    },
    /// Collects all matching nodes into a list.
    Array {
        /// Selects the nodes relative to their parent.
        xpath: String,
        /// Describes how each item is extracted.
        items: Box<XmlPropertyConfig>,
    },
    /// Extracts a nested object from the first matching node.
    Object {
        /// Selects the node relative to its parent.
        xpath: String,
        /// Contains the properties of the nested object.
        properties: Vec<(String, XmlPropertyConfig)>,
    },
}

impl XmlPropertyConfig {
    /// Returns the path expression of this property.
    pub fn xpath(&self) -> &str {
        match self {
            XmlPropertyConfig::Primitive { xpath, .. } => xpath,
            XmlPropertyConfig::Array { xpath, .. } => xpath,
            XmlPropertyConfig::Object { xpath, .. } => xpath,
        }
    }

    fn parse(node: &Node, default_xpath: Option<&str>) -> anyhow::Result<XmlPropertyConfig> {
        let type_name = node.string_or("type", "primitive")?;
        let xpath = match default_xpath {
            Some(default) => node.string_or("xpath", default)?,
            None => node.required_string("xpath")?,
        };

        match type_name.as_str() {
            "primitive" => {
                node.ensure_keys(&["type", "xpath", "parser"])?;
                Ok(XmlPropertyConfig::Primitive {
                    xpath,
                    parser: node.string_or("parser", "string")?,
                })
            }
            "array" => {
                node.ensure_keys(&["type", "xpath", "items"])?;
                let items = node.child("items");
                let items = if items.is_present() {
                    XmlPropertyConfig::parse(&items, Some("."))?
                } else {
                    log::debug!("{}: Using default value 'primitive'.", items.path());
                    XmlPropertyConfig::Primitive {
                        xpath: ".".to_owned(),
                        parser: "string".to_owned(),
                    }
                };
                Ok(XmlPropertyConfig::Array {
                    xpath,
                    items: Box::new(items),
                })
            }
            "object" => {
                node.ensure_keys(&["type", "xpath", "properties"])?;
                Ok(XmlPropertyConfig::Object {
                    xpath,
                    properties: parse_xml_properties(&node.child("properties"))?,
                })
            }
            other => Err(node.unknown_type(other, &["primitive", "array", "object"])),
        }
    }
}

fn parse_xml_properties(node: &Node) -> anyhow::Result<Vec<(String, XmlPropertyConfig)>> {
    let mut result = Vec::new();
    for (name, property) in node.entries()? {
        result.push((name, XmlPropertyConfig::parse(&property, None)?));
    }

    Ok(result)
}

impl InputConfig {
    /// Reads an input from the given node.
    pub fn parse(node: &Node) -> anyhow::Result<InputConfig> {
        let type_name = node.type_name()?;
        let format = match type_name.as_str() {
            "csv" => {
                node.ensure_keys(&[
                    "type",
                    "source",
                    "file",
                    "dieOnInputChange",
                    "ignoreFirstRow",
                    "delimiter",
                    "columns",
                ])?;
                InputFormat::Csv(parse_csv(node)?)
            }
            "json" => {
                node.ensure_keys(&["type", "source", "file", "dieOnInputChange"])?;
                InputFormat::Json
            }
            "xml" => {
                node.ensure_keys(&[
                    "type",
                    "source",
                    "file",
                    "dieOnInputChange",
                    "xpath",
                    "properties",
                ])?;
                InputFormat::Xml(XmlConfig {
                    xpath: node.required_string("xpath")?,
                    properties: parse_xml_properties(&node.child("properties"))?,
                })
            }
            other => return Err(node.unknown_type(other, &["csv", "json", "xml"])),
        };

        Ok(InputConfig {
            source: node.required_string("source")?,
            file: node.required_string("file")?,
            die_on_input_change: node.bool_or("dieOnInputChange", true)?,
            format,
        })
    }
}

fn parse_csv(node: &Node) -> anyhow::Result<CsvConfig> {
    let delimiter = node.char_or("delimiter", ',')?;
    if !delimiter.is_ascii() {
        return Err(node
            .child("delimiter")
            .error("The delimiter has to be an ASCII character"));
    }

    let mut columns = Vec::new();
    for column in node.child("columns").items()? {
        let column = parse_column(&column)?;
        if columns
            .iter()
            .any(|other: &ColumnConfig| other.name == column.name)
        {
            return Err(node
                .child("columns")
                .error(format!("The column '{}' is declared twice", column.name)));
        }
        columns.push(column);
    }

    if columns.is_empty() {
        return Err(node
            .child("columns")
            .error("At least one column has to be declared"));
    }

    Ok(CsvConfig {
        ignore_first_row: node.bool_or("ignoreFirstRow", false)?,
        delimiter: delimiter as u8,
        columns,
    })
}

fn parse_column(node: &Node) -> anyhow::Result<ColumnConfig> {
    if let yaml_rust::Yaml::String(name) = node.yaml() {
        return Ok(ColumnConfig {
            name: name.clone(),
            parser: "string".to_owned(),
            boolean_values: None,
            decimal_separator: None,
        });
    }

    node.ensure_keys(&[
        "name",
        "parser",
        "trueValues",
        "falseValues",
        "decimalSeparator",
    ])?;
    let name = node.required_string("name")?;
    let has_booleans = node.child("trueValues").is_present() || node.child("falseValues").is_present();
    let has_separator = node.child("decimalSeparator").is_present();
    if (has_booleans || has_separator) && node.child("parser").is_present() {
        return Err(node.error(
            "A column either specifies a 'parser' or inline boolean values or a decimal separator",
        ));
    }
    if has_booleans && has_separator {
        return Err(node.error("A column cannot be both, a boolean and a float"));
    }

    Ok(ColumnConfig {
        name,
        parser: if has_booleans || has_separator {
            String::new()
        } else {
            node.string_or("parser", "string")?
        },
        boolean_values: if has_booleans {
            Some(read_boolean_values(node)?)
        } else {
            None
        },
        decimal_separator: if has_separator {
            Some(node.char_or("decimalSeparator", '.')?)
        } else {
            None
        },
    })
}
