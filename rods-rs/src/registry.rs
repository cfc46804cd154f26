//! Constructs and keeps all components of the query pipeline.
//!
//! Components refer to each other by name. Therefore they are constructed leaves first:
//! parsers, then inputs (resolved against their sources), then indexes (starting with the
//! built-in `default` index) and finally the outputs. Each step verifies its references and
//! reports errors with the path of the offending config node.
//!
//! Once constructed, the registry is immutable and shared by all requests. [close](Registry::close)
//! releases all components in reverse construction order.
use crate::config::indexes::DEFAULT_INDEX;
use crate::config::Config;
use crate::indexes::{create_index, Index, NoopIndex};
use crate::inputs::{create_input, Input};
use crate::outputs::{create_output, Output};
use crate::parsers::{Parser, Parsers};
use linked_hash_map::LinkedHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Contains all parsers, inputs, indexes and outputs by name.
pub struct Registry {
    parsers: Arc<Parsers>,
    inputs: LinkedHashMap<String, Arc<dyn Input>>,
    indexes: LinkedHashMap<String, Arc<dyn Index>>,
    outputs: LinkedHashMap<String, Arc<dyn Output>>,
    closed: AtomicBool,
}

impl Registry {
    /// Creates all components described by the given config.
    ///
    /// Note that this builds all indexes and may therefore take a while.
    pub fn new(config: &Config) -> anyhow::Result<Registry> {
        let mut registry = Registry {
            parsers: Parsers::new(&config.parsers)?,
            inputs: LinkedHashMap::new(),
            indexes: LinkedHashMap::new(),
            outputs: LinkedHashMap::new(),
            closed: AtomicBool::new(false),
        };

        for (name, input_config) in &config.inputs {
            let path = format!("inputs.{}", name);
            let source = config
                .sources
                .iter()
                .find(|(source, _)| source == &input_config.source)
                .map(|(_, source)| source)
                .ok_or_else(|| {
                    anyhow::anyhow!(
                        "{}.source: Unknown source '{}'",
                        path,
                        input_config.source
                    )
                })?;

            let input = create_input(
                name,
                input_config,
                source.resolve(&input_config.file),
                &registry.parsers,
                &path,
            )?;
            log::info!(
                "Created input '{}' for {} with {} records.",
                name,
                input.path().display(),
                input.size()
            );
            let _ = registry.inputs.insert(name.clone(), input);
        }

        let _ = registry.indexes.insert(
            DEFAULT_INDEX.to_owned(),
            Arc::new(NoopIndex::new(DEFAULT_INDEX)),
        );
        for (name, index_config) in &config.indexes {
            let path = format!("indexes.{}", name);
            let input = match index_config.input() {
                Some(input) => Some(registry.input(input, &format!("{}.input", path))?),
                None => None,
            };
            let index = create_index(name, index_config, input.as_deref(), &path)?;
            log::info!("Created index '{}'.", name);
            let _ = registry.indexes.insert(name.clone(), index);
        }

        for (name, output_config) in &config.outputs {
            let output = create_output(name, output_config, &registry, &format!("outputs.{}", name))?;
            log::info!("Created output '{}' for {}.", name, output.endpoint());
            let _ = registry.outputs.insert(name.clone(), output);
        }

        Ok(registry)
    }

    /// Returns all parsers.
    pub fn parsers(&self) -> &Parsers {
        &self.parsers
    }

    /// Returns the primitive parser with the given name or reports an error for `path`.
    pub fn primitive_parser(&self, name: &str, path: &str) -> anyhow::Result<Arc<dyn Parser>> {
        self.parsers.require_primitive(name, path)
    }

    /// Returns the input with the given name or reports an error for `path`.
    pub fn input(&self, name: &str, path: &str) -> anyhow::Result<Arc<dyn Input>> {
        self.inputs
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{}: Unknown input '{}'", path, name))
    }

    /// Returns all inputs in the order of their declaration.
    pub fn inputs(&self) -> impl Iterator<Item = &Arc<dyn Input>> {
        self.inputs.values()
    }

    /// Returns the index with the given name or reports an error for `path`.
    pub fn index(&self, name: &str, path: &str) -> anyhow::Result<Arc<dyn Index>> {
        self.indexes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{}: Unknown index '{}'", path, name))
    }

    /// Returns the index with the given name, provided that it can filter `property` of `input`.
    pub fn filter_index(
        &self,
        name: &str,
        input: &dyn Input,
        property: &str,
        path: &str,
    ) -> anyhow::Result<Arc<dyn Index>> {
        let index = self.index(name, path)?;
        if !index.handles_input(input.name()) {
            return Err(anyhow::anyhow!(
                "{}: The index '{}' cannot be used for the input '{}'",
                path,
                name,
                input.name()
            ));
        }
        if !index.handles_property(property) {
            return Err(anyhow::anyhow!(
                "{}: The index '{}' cannot filter on '{}'",
                path,
                name,
                property
            ));
        }
        if !input.has_property(property) {
            return Err(anyhow::anyhow!(
                "{}: The input '{}' has no property '{}'",
                path,
                input.name(),
                property
            ));
        }

        Ok(index)
    }

    /// Returns the output with the given name.
    pub fn output(&self, name: &str) -> Option<&Arc<dyn Output>> {
        self.outputs.get(name)
    }

    /// Returns all outputs in the order of their declaration.
    pub fn outputs(&self) -> impl Iterator<Item = &Arc<dyn Output>> {
        self.outputs.values()
    }

    /// Closes all components in reverse construction order.
    ///
    /// Subsequent calls have no effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        for output in self.outputs.values().rev() {
            output.close();
        }
        for index in self.indexes.values().rev() {
            index.close();
        }
        for input in self.inputs.values().rev() {
            input.close();
        }

        log::info!("Closed all inputs, indexes and outputs.");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::Config;
    use crate::inputs::testing::resource;
    use crate::registry::Registry;

    /// Creates a registry with the users and orders of the test resources.
    ///
    /// The given YAML is appended to a config which declares the sources and inputs.
    pub fn registry(yaml: &str) -> Registry {
        let base = resource("");
        let config = format!(
            r#"
sources:
  data: {{ type: filesystem, path: "{}" }}
inputs:
  users:
    type: csv
    source: data
    file: users.csv
    ignoreFirstRow: true
    columns: [id, name]
  orders:
    type: csv
    source: data
    file: orders.csv
    ignoreFirstRow: true
    columns: [id, user_id, amount]
{}"#,
            base.display(),
            yaml
        );

        Registry::new(&Config::load_from_string(&config).unwrap()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::registry::testing::registry;
    use crate::registry::Registry;

    #[test]
    fn components_are_created_leaves_first() {
        let registry = registry(
            "
indexes:
  users_by_name: { type: map, input: users, properties: [name] }
outputs:
  users:
    type: jsonArray
    endpoint: /users
    input: users
    parameters:
      name: { index: users_by_name }
",
        );

        assert_eq!(registry.inputs().count(), 2);
        assert!(registry.index("default", "test").is_ok());
        assert!(registry.index("users_by_name", "test").is_ok());
        assert_eq!(registry.outputs().count(), 1);
        assert!(registry.output("users").is_some());

        registry.close();
        registry.close();
    }

    #[test]
    fn broken_references_are_reported_with_their_path() {
        let config = Config::load_from_string(
            "inputs: { users: { type: json, source: unknown, file: users.json } }",
        )
        .unwrap();
        let error = Registry::new(&config).err().unwrap();
        assert_eq!(
            error.to_string(),
            "inputs.users.source: Unknown source 'unknown'"
        );
    }

    #[test]
    fn indexes_must_handle_the_filtered_property() {
        let registry = registry(
            "indexes:\n  users_by_name: { type: map, input: users, properties: [name] }\n",
        );
        let users = registry.input("users", "test").unwrap();
        let orders = registry.input("orders", "test").unwrap();

        assert!(registry
            .filter_index("users_by_name", users.as_ref(), "name", "p")
            .is_ok());
        assert_eq!(
            registry
                .filter_index("users_by_name", users.as_ref(), "id", "p")
                .err()
                .unwrap()
                .to_string(),
            "p: The index 'users_by_name' cannot filter on 'id'"
        );
        assert_eq!(
            registry
                .filter_index("users_by_name", orders.as_ref(), "name", "p")
                .err()
                .unwrap()
                .to_string(),
            "p: The index 'users_by_name' cannot be used for the input 'orders'"
        );
        assert_eq!(
            registry
                .filter_index("default", orders.as_ref(), "name", "p")
                .err()
                .unwrap()
                .to_string(),
            "p: The input 'orders' has no property 'name'"
        );
    }
}
