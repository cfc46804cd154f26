//! Contains the system configuration.
//!
//! The configuration is a single YAML document with the top-level sections `sources`,
//! `parsers`, `inputs`, `indexes`, `outputs` and `services`. Each section is a map from names
//! to components, where each component carries a `type` discriminator. The document is read
//! once at startup and transformed into the typed model below. Unknown keys and types are
//! rejected and all defaults are filled in right away so that no other part of the system ever
//! has to deal with absent values.
//!
//! Note that this only checks each component on its own. Cross references (e.g. an output
//! which names an unknown index) are checked by the [Registry](crate::registry::Registry)
//! while constructing the components.
//!
//! # Example
//! ```
//! # use rods::config::Config;
//! # use rods::config::outputs::OutputConfig;
//! let config = Config::load_from_string("
//! sources:
//!     data: { type: filesystem, path: /var/data }
//! inputs:
//!     users: { type: csv, source: data, file: users.csv, columns: [id, name] }
//! outputs:
//!     users: { type: jsonArray, endpoint: /users, input: users }
//! ").unwrap();
//!
//! if let OutputConfig::JsonArray(users) = &config.outputs[0].1 {
//!     assert_eq!(users.limit.default, 100);
//!     assert_eq!(users.limit.parameter, "limit");
//!     assert_eq!(users.offset_parameter, "offset");
//! } else {
//!     panic!("Expected a jsonArray output");
//! }
//! ```
use crate::config::indexes::{IndexConfig, DEFAULT_INDEX};
use crate::config::inputs::InputConfig;
use crate::config::node::Node;
use crate::config::outputs::OutputConfig;
use crate::config::parsers::{ParserConfig, BUILT_IN_PARSERS};
use crate::config::services::ServiceConfig;
use crate::config::sources::SourceConfig;
use std::path::Path;
use yaml_rust::{Yaml, YamlLoader};

pub mod indexes;
pub mod inputs;
pub mod node;
pub mod outputs;
pub mod parsers;
pub mod services;
pub mod sources;

/// Contains the typed configuration. Each section keeps the order of the document.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Contains all sources.
    pub sources: Vec<(String, SourceConfig)>,
    /// Contains all declared parsers (without the built-in ones).
    pub parsers: Vec<(String, ParserConfig)>,
    /// Contains all inputs.
    pub inputs: Vec<(String, InputConfig)>,
    /// Contains all declared indexes (without the built-in default index).
    pub indexes: Vec<(String, IndexConfig)>,
    /// Contains all outputs.
    pub outputs: Vec<(String, OutputConfig)>,
    /// Contains all services.
    pub services: Vec<(String, ServiceConfig)>,
}

impl Config {
    /// Reads and parses the given configuration file.
    pub async fn load(file: impl AsRef<Path>) -> anyhow::Result<Config> {
        let file = file.as_ref();
        log::info!("Loading config file {}...", file.display());

        let config_data = match tokio::fs::read_to_string(file).await {
            Ok(data) => data,
            Err(error) => {
                return Err(anyhow::anyhow!(
                    "Cannot load config file {}: {}",
                    file.display(),
                    error
                ));
            }
        };

        Config::load_from_string(config_data.as_str())
    }

    /// Parses a configuration from the given string instead of a file.
    pub fn load_from_string(data: &str) -> anyhow::Result<Config> {
        let docs = match YamlLoader::load_from_str(data) {
            Ok(docs) => docs,
            Err(error) => {
                return Err(anyhow::anyhow!("Cannot parse config: {}", error));
            }
        };

        match docs.first() {
            Some(yaml @ Yaml::Hash(_)) => Config::from_yaml(yaml),
            Some(Yaml::Null) | None => Ok(Config::default()),
            _ => Err(anyhow::anyhow!("The config has to be a map")),
        }
    }

    fn from_yaml(yaml: &Yaml) -> anyhow::Result<Config> {
        let root = Node::new(yaml, "");
        root.ensure_keys(&[
            "sources", "parsers", "inputs", "indexes", "outputs", "services",
        ])?;

        let config = Config {
            sources: read_section(&root, "sources", SourceConfig::parse)?,
            parsers: read_section(&root, "parsers", ParserConfig::parse)?,
            inputs: read_section(&root, "inputs", InputConfig::parse)?,
            indexes: read_section(&root, "indexes", IndexConfig::parse)?,
            outputs: read_section(&root, "outputs", OutputConfig::parse)?,
            services: read_section(&root, "services", ServiceConfig::parse)?,
        };

        for (name, _) in &config.parsers {
            if BUILT_IN_PARSERS.contains(&name.as_str()) {
                return Err(root
                    .child("parsers")
                    .child(name)
                    .error("A built-in parser cannot be redeclared"));
            }
        }
        for (name, _) in &config.indexes {
            if name == DEFAULT_INDEX {
                return Err(root
                    .child("indexes")
                    .child(name)
                    .error("The built-in default index cannot be redeclared"));
            }
        }

        Ok(config)
    }
}

fn read_section<T, P>(root: &Node, section: &str, parser: P) -> anyhow::Result<Vec<(String, T)>>
where
    P: Fn(&Node) -> anyhow::Result<T>,
{
    let mut result = Vec::new();
    for (name, node) in root.child(section).entries()? {
        result.push((name, parser(&node)?));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::config::indexes::IndexConfig;
    use crate::config::inputs::{InputFormat, XmlPropertyConfig};
    use crate::config::outputs::OutputConfig;
    use crate::config::parsers::{ParserConfig, Separator};
    use crate::config::services::ServiceConfig;
    use crate::config::Config;

    #[test]
    fn a_complete_config_can_be_parsed() {
        let config = Config::load_from_string(
            r#"
sources:
  data: { type: filesystem, path: ./data }
parsers:
  amount: { type: float, ignoreCharacters: " ", decimalSeparator: "," }
  tags: { type: split, separator: "|", parser: string }
  words: { type: split, regexp: "\\s*,\\s*" }
inputs:
  users:
    type: csv
    source: data
    file: users.csv
    ignoreFirstRow: true
    columns:
      - id
      - { name: active, trueValues: [y], falseValues: [n] }
  books:
    type: xml
    source: data
    file: books.xml
    xpath: /catalog/book
    properties:
      id: { xpath: "@id" }
      authors: { type: array, xpath: authors/author }
indexes:
  users_by_name: { type: map, input: users, properties: [name] }
outputs:
  user:
    type: jsonObject
    endpoint: /user/?
    input: users
    parameters:
      - { property: id, index: users_by_name }
services:
  api: { type: http, outputs: [user] }
"#,
        )
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        assert!(matches!(
            &config.parsers[1].1,
            ParserConfig::Split { separator: Separator::Text(separator), .. } if separator == "|"
        ));
        assert!(matches!(
            &config.parsers[2].1,
            ParserConfig::Split { separator: Separator::Regexp(_), parser } if parser == "string"
        ));

        let users = &config.inputs[0].1;
        assert!(users.die_on_input_change);
        if let InputFormat::Csv(csv) = &users.format {
            assert!(csv.ignore_first_row);
            assert_eq!(csv.delimiter, b',');
            assert_eq!(csv.columns[0].parser, "string");
            assert!(csv.columns[1].boolean_values.is_some());
        } else {
            panic!("Expected a CSV input");
        }

        if let InputFormat::Xml(xml) = &config.inputs[1].1.format {
            assert!(matches!(
                &xml.properties[1].1,
                XmlPropertyConfig::Array { items, .. } if items.xpath() == "."
            ));
        } else {
            panic!("Expected an XML input");
        }

        assert!(matches!(&config.indexes[0].1, IndexConfig::Map { .. }));

        if let OutputConfig::JsonObject(user) = &config.outputs[0].1 {
            assert_eq!(user.parameters[0].name, "id");
            assert_eq!(user.parameters[0].parser, "string");
        } else {
            panic!("Expected a jsonObject output");
        }

        let ServiceConfig::Http(api) = &config.services[0].1;
        assert_eq!(api.listen, "127.0.0.1:0");
        assert!(api.tls.is_none());
    }

    #[test]
    fn invalid_configs_are_rejected_with_a_path() {
        let error = Config::load_from_string(
            "outputs: { users: { type: jsonArray, endpoint: /users, input: users, limit: { default: 10, max: 5 } } }",
        )
        .unwrap_err();
        assert!(error.to_string().starts_with("outputs.users.limit:"));

        let error = Config::load_from_string("parsers: { flag: { type: boolean, trueValues: [] } }")
            .unwrap_err();
        assert!(error.to_string().starts_with("parsers.flag.trueValues:"));

        let error = Config::load_from_string("indexes: { x: { type: fancy } }").unwrap_err();
        assert!(error.to_string().starts_with("indexes.x.type: Unknown type 'fancy'"));

        let error =
            Config::load_from_string("parsers: { p: { type: integer, colour: red } }").unwrap_err();
        assert!(error.to_string().starts_with("parsers.p.colour: Unknown key"));

        assert!(Config::load_from_string("outputs: { g: { type: graphql } }").is_err());
        assert!(Config::load_from_string("parsers: { string: { type: string } }").is_err());
        assert!(Config::load_from_string("indexes: { default: { type: noop } }").is_err());
        assert!(Config::load_from_string(
            "outputs: { u: { type: jsonObject, endpoint: /user, input: users } }"
        )
        .is_err());
        assert!(Config::load_from_string(
            "services: { api: { type: http, certificate: cert.pem } }"
        )
        .is_err());
        assert!(Config::load_from_string(
            "outputs: { u: { type: jsonArray, endpoint: /u, input: users, parameters: { limit: { property: x } } } }"
        )
        .is_err());
    }

    #[test]
    fn relationship_rules_are_enforced() {
        let sort_without_array = "
outputs:
  users:
    type: jsonArray
    endpoint: /users
    input: users
    relationships:
      orders:
        input: orders
        sort: [ { property: id } ]
";
        let error = Config::load_from_string(sort_without_array).unwrap_err();
        assert!(error
            .to_string()
            .starts_with("outputs.users.relationships.orders.sort:"));

        let duplicate_match = "
outputs:
  users:
    type: jsonArray
    endpoint: /users
    input: users
    relationships:
      orders:
        input: orders
        isArray: true
        match:
          - { parentProperty: id, childProperty: user_id }
          - { parentProperty: name, childProperty: user_id }
";
        assert!(Config::load_from_string(duplicate_match).is_err());

        let mut deep = String::from("outputs:\n  users:\n    type: jsonArray\n    endpoint: /users\n    input: users\n");
        let mut indent = String::from("    ");
        for _ in 0..9 {
            deep.push_str(&format!("{}relationships:\n{}  r:\n{}    input: users\n", indent, indent, indent));
            indent.push_str("    ");
        }
        let error = Config::load_from_string(&deep).unwrap_err();
        assert!(error.to_string().contains("must not be nested deeper than 8 levels"));
    }
}
