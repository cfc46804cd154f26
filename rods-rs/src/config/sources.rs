//! Describes the configuration of the sources section.
use crate::config::node::Node;
use std::path::{Path, PathBuf};

/// Describes where input files are located.
#[derive(Debug, Clone)]
pub enum SourceConfig {
    /// A base directory in the local file system.
    FileSystem {
        /// Contains the base directory.
        path: PathBuf,
    },
}

impl SourceConfig {
    /// Reads a source from the given node.
    pub fn parse(node: &Node) -> anyhow::Result<SourceConfig> {
        let type_name = node.type_name()?;
        match type_name.as_str() {
            "filesystem" => {
                node.ensure_keys(&["type", "path"])?;
                Ok(SourceConfig::FileSystem {
                    path: PathBuf::from(node.required_string("path")?),
                })
            }
            other => Err(node.unknown_type(other, &["filesystem"])),
        }
    }

    /// Resolves the given file name against this source.
    pub fn resolve(&self, file: &str) -> PathBuf {
        match self {
            SourceConfig::FileSystem { path } => path.join(Path::new(file)),
        }
    }
}
