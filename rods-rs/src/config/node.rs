//! Provides a strict accessor for YAML nodes which keeps track of its path.
//!
//! Every error reported by a [Node] is prefixed with the dotted path of the offending element
//! (e.g. `outputs.users.limit.max`) so that an administrator can pinpoint the problem in a
//! configuration file right away.
use yaml_rust::Yaml;

/// Wraps a YAML element along with its path within the configuration document.
#[derive(Clone)]
pub struct Node<'a> {
    yaml: &'a Yaml,
    path: String,
}

impl<'a> Node<'a> {
    /// Creates a new node for the given element and path.
    pub fn new(yaml: &'a Yaml, path: impl Into<String>) -> Self {
        Node {
            yaml,
            path: path.into(),
        }
    }

    /// Returns the dotted path of this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Provides access to the underlying YAML element.
    pub fn yaml(&self) -> &'a Yaml {
        self.yaml
    }

    /// Determines if this node has a value. Missing nodes and explicit nulls are both absent.
    pub fn is_present(&self) -> bool {
        !matches!(self.yaml, Yaml::BadValue | Yaml::Null)
    }

    /// Returns the child node with the given key.
    ///
    /// If this node isn't a map or doesn't contain the key, an absent node is returned.
    pub fn child(&self, key: &str) -> Node<'a> {
        Node {
            yaml: &self.yaml[key],
            path: self.child_path(key),
        }
    }

    fn child_path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_owned()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    /// Creates an error which is prefixed with the path of this node.
    pub fn error(&self, message: impl AsRef<str>) -> anyhow::Error {
        anyhow::anyhow!("{}: {}", self.path, message.as_ref())
    }

    /// Returns all entries of this map in their order of appearance.
    ///
    /// An absent node yields no entries, any other non-map value is an error.
    pub fn entries(&self) -> anyhow::Result<Vec<(String, Node<'a>)>> {
        match self.yaml {
            Yaml::Hash(hash) => {
                let mut result = Vec::with_capacity(hash.len());
                for (key, value) in hash {
                    let key = match key {
                        Yaml::String(key) => key.clone(),
                        Yaml::Integer(key) => key.to_string(),
                        _ => return Err(self.error("Only strings can be used as keys")),
                    };
                    let path = self.child_path(&key);
                    result.push((key, Node::new(value, path)));
                }
                Ok(result)
            }
            Yaml::BadValue | Yaml::Null => Ok(Vec::new()),
            _ => Err(self.error("Expected a map")),
        }
    }

    /// Returns all items of this list.
    ///
    /// An absent node yields no items, any other non-list value is an error.
    pub fn items(&self) -> anyhow::Result<Vec<Node<'a>>> {
        match self.yaml {
            Yaml::Array(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(index, item)| Node::new(item, format!("{}[{}]", self.path, index)))
                .collect()),
            Yaml::BadValue | Yaml::Null => Ok(Vec::new()),
            _ => Err(self.error("Expected a list")),
        }
    }

    /// Ensures that this node is a map which only contains the given keys.
    pub fn ensure_keys(&self, allowed: &[&str]) -> anyhow::Result<()> {
        for (key, node) in self.entries()? {
            if !allowed.contains(&key.as_str()) {
                return Err(node.error(format!(
                    "Unknown key '{}'. Supported keys are: {}",
                    key,
                    allowed.join(", ")
                )));
            }
        }

        if self.is_present() && !matches!(self.yaml, Yaml::Hash(_)) {
            return Err(self.error("Expected a map"));
        }

        Ok(())
    }

    /// Returns the scalar value of this node as string.
    pub fn as_string(&self) -> anyhow::Result<String> {
        match self.yaml {
            Yaml::String(value) => Ok(value.clone()),
            Yaml::Integer(value) => Ok(value.to_string()),
            Yaml::Real(value) => Ok(value.clone()),
            Yaml::Boolean(value) => Ok(value.to_string()),
            Yaml::BadValue | Yaml::Null => Err(self.error("Missing required value")),
            _ => Err(self.error("Expected a string")),
        }
    }

    /// Returns the string value of the given key and fails if it is absent.
    pub fn required_string(&self, key: &str) -> anyhow::Result<String> {
        self.child(key).as_string()
    }

    /// Returns the string value of the given key or `None` if it is absent.
    pub fn optional_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let child = self.child(key);
        if child.is_present() {
            child.as_string().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Returns the string value of the given key or the default value if it is absent.
    pub fn string_or(&self, key: &str, default: &str) -> anyhow::Result<String> {
        match self.optional_string(key)? {
            Some(value) => Ok(value),
            None => {
                log::debug!("{}: Using default value '{}'.", self.child_path(key), default);
                Ok(default.to_owned())
            }
        }
    }

    /// Returns the boolean value of the given key or the default value if it is absent.
    pub fn bool_or(&self, key: &str, default: bool) -> anyhow::Result<bool> {
        let child = self.child(key);
        match child.yaml {
            Yaml::Boolean(value) => Ok(*value),
            Yaml::BadValue | Yaml::Null => {
                log::debug!("{}: Using default value '{}'.", child.path, default);
                Ok(default)
            }
            _ => Err(child.error("Expected a boolean (true or false)")),
        }
    }

    /// Returns the non-negative integer value of the given key or the default value if it is
    /// absent.
    pub fn usize_or(&self, key: &str, default: usize) -> anyhow::Result<usize> {
        let child = self.child(key);
        match child.yaml {
            Yaml::Integer(value) if *value >= 0 => Ok(*value as usize),
            Yaml::BadValue | Yaml::Null => {
                log::debug!("{}: Using default value '{}'.", child.path, default);
                Ok(default)
            }
            _ => Err(child.error("Expected a non-negative integer")),
        }
    }

    /// Returns the list of strings stored for the given key or `None` if it is absent.
    pub fn string_list(&self, key: &str) -> anyhow::Result<Option<Vec<String>>> {
        let child = self.child(key);
        if !child.is_present() {
            return Ok(None);
        }

        let mut result = Vec::new();
        for item in child.items()? {
            result.push(item.as_string()?);
        }

        Ok(Some(result))
    }

    /// Returns the single character stored for the given key or the default if it is absent.
    pub fn char_or(&self, key: &str, default: char) -> anyhow::Result<char> {
        let child = self.child(key);
        if !child.is_present() {
            log::debug!("{}: Using default value '{}'.", child.path, default);
            return Ok(default);
        }

        let value = child.as_string()?;
        let mut chars = value.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Ok(ch),
            _ => Err(child.error(format!(
                "Expected a single character but got '{}'",
                value
            ))),
        }
    }

    /// Returns the type discriminator of this node.
    pub fn type_name(&self) -> anyhow::Result<String> {
        self.required_string("type")
    }

    /// Creates the error reported for an unknown type discriminator.
    pub fn unknown_type(&self, type_name: &str, supported: &[&str]) -> anyhow::Error {
        self.child("type").error(format!(
            "Unknown type '{}'. Supported types are: {}",
            type_name,
            supported.join(", ")
        ))
    }
}
