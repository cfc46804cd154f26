//! Describes the configuration of the indexes section.
use crate::config::node::Node;
use std::path::PathBuf;

/// Contains the name of the built-in noop index.
pub const DEFAULT_INDEX: &str = "default";

/// Describes a single index.
#[derive(Debug, Clone)]
pub enum IndexConfig {
    /// A full scan over any input.
    Noop,
    /// An in-memory exact match index.
    Map {
        /// Contains the name of the indexed input.
        input: String,
        /// Contains the indexed properties.
        properties: Vec<String>,
    },
    /// An in-memory substring index.
    Partial {
        /// Contains the name of the indexed input.
        input: String,
        /// Contains the indexed properties.
        properties: Vec<String>,
        /// Determines if matching ignores the case.
        ignore_case: bool,
    },
    /// A substring index which is persisted in a file.
    Wildcard {
        /// Contains the name of the indexed input.
        input: String,
        /// Contains the indexed properties.
        properties: Vec<String>,
        /// Determines if matching ignores the case.
        ignore_case: bool,
        /// Contains the location of the index file.
        path: PathBuf,
    },
}

impl IndexConfig {
    /// Reads an index from the given node.
    pub fn parse(node: &Node) -> anyhow::Result<IndexConfig> {
        let type_name = node.type_name()?;
        match type_name.as_str() {
            "noop" => {
                node.ensure_keys(&["type"])?;
                Ok(IndexConfig::Noop)
            }
            "map" => {
                node.ensure_keys(&["type", "input", "properties"])?;
                Ok(IndexConfig::Map {
                    input: node.required_string("input")?,
                    properties: read_properties(node)?,
                })
            }
            "partial" => {
                node.ensure_keys(&["type", "input", "properties", "ignoreCase"])?;
                Ok(IndexConfig::Partial {
                    input: node.required_string("input")?,
                    properties: read_properties(node)?,
                    ignore_case: node.bool_or("ignoreCase", false)?,
                })
            }
            "wildcard" => {
                node.ensure_keys(&["type", "input", "properties", "ignoreCase", "path"])?;
                let path = PathBuf::from(node.required_string("path")?);
                if path.is_dir() {
                    return Err(node
                        .child("path")
                        .error(format!("{} is a directory", path.display())));
                }
                Ok(IndexConfig::Wildcard {
                    input: node.required_string("input")?,
                    properties: read_properties(node)?,
                    ignore_case: node.bool_or("ignoreCase", false)?,
                    path,
                })
            }
            other => Err(node.unknown_type(other, &["map", "partial", "wildcard", "noop"])),
        }
    }

    /// Returns the input this index is bound to or `None` for the noop index.
    pub fn input(&self) -> Option<&str> {
        match self {
            IndexConfig::Noop => None,
            IndexConfig::Map { input, .. }
            | IndexConfig::Partial { input, .. }
            | IndexConfig::Wildcard { input, .. } => Some(input),
        }
    }

    /// Returns the indexed properties. The noop index has none but handles all.
    pub fn properties(&self) -> &[String] {
        match self {
            IndexConfig::Noop => &[],
            IndexConfig::Map { properties, .. }
            | IndexConfig::Partial { properties, .. }
            | IndexConfig::Wildcard { properties, .. } => properties,
        }
    }
}

fn read_properties(node: &Node) -> anyhow::Result<Vec<String>> {
    match node.string_list("properties")? {
        Some(properties) if !properties.is_empty() => Ok(properties),
        _ => Err(node
            .child("properties")
            .error("At least one property has to be given")),
    }
}
