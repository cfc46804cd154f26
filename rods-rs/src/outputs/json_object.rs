use crate::config::outputs::JsonObjectConfig;
use crate::indexes::Query;
use crate::inputs::Input;
use crate::outputs::{load, Binding, Output};
use crate::parsers::Parser;
use crate::registry::Registry;
use crate::relationships::{Relation, Session};
use crate::request::Request;
use crate::response::{OutputError, OutputResult, Response};
use regex::Regex;
use std::sync::Arc;

/// Delivers a single record as JSON object.
///
/// The values used to find the record are part of the path. Each `?` in the endpoint is
/// replaced by a capture group which only accepts what the parser of the respective parameter
/// accepts. Therefore `/user/?` combined with an integer parameter matches `/user/42` but not
/// `/user/x`.
pub struct JsonObject {
    name: String,
    endpoint: String,
    pattern: Regex,
    input: Arc<dyn Input>,
    bindings: Vec<Binding>,
    relations: Vec<Relation>,
}

impl JsonObject {
    /// Creates a new output and verifies all its references.
    pub fn new(
        name: &str,
        config: &JsonObjectConfig,
        registry: &Registry,
        path: &str,
    ) -> anyhow::Result<JsonObject> {
        let input = registry.input(&config.input, &format!("{}.input", path))?;
        let bindings = config
            .parameters
            .iter()
            .enumerate()
            .map(|(index, parameter)| {
                Binding::new(
                    parameter,
                    input.as_ref(),
                    registry,
                    &format!("{}.parameters[{}]", path, index),
                )
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let relations = Relation::compile_all(
            &config.relationships,
            input.as_ref(),
            registry,
            &format!("{}.relationships", path),
        )?;

        let mut pattern = String::from("^");
        for (index, piece) in config.endpoint.split('?').enumerate() {
            if index > 0 {
                let binding = bindings.get(index - 1).ok_or_else(|| {
                    anyhow::anyhow!("{}.endpoint: There are more '?' than parameters", path)
                })?;
                pattern.push_str(&format!(
                    "(?P<param_{}>{})",
                    index - 1,
                    binding.parser.regexp_pattern()
                ));
            }
            pattern.push_str(&regex::escape(piece));
        }
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|error| {
            anyhow::anyhow!("{}.endpoint: Cannot compile the endpoint: {}", path, error)
        })?;

        Ok(JsonObject {
            name: name.to_owned(),
            endpoint: config.endpoint.clone(),
            pattern,
            input,
            bindings,
            relations,
        })
    }
}

impl Output for JsonObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    fn has_parameter(&self, name: &str) -> bool {
        self.bindings.iter().any(|binding| binding.name == name)
    }

    fn parameter_parser(&self, name: &str) -> Option<Arc<dyn Parser>> {
        self.bindings
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| binding.parser.clone())
    }

    fn handle(&self, request: &Request, response: &mut Response) -> OutputResult {
        let captures = self.pattern.captures(request.path()).ok_or_else(|| {
            OutputError::NotFound(anyhow::anyhow!("Unknown path: {}", request.path()))
        })?;

        let mut query = Query::new();
        for (index, binding) in self.bindings.iter().enumerate() {
            let raw = captures
                .name(&format!("param_{}", index))
                .map(|capture| capture.as_str())
                .unwrap_or_default();
            binding.apply(&mut query, raw)?;
        }

        let cancellation = response.cancellation().clone();
        let position = match query.execute(self.input.as_ref(), &cancellation)?.next() {
            Some(position) => position?,
            None => {
                return Err(OutputError::NotFound(anyhow::anyhow!(
                    "No record matches {}",
                    request.path()
                )))
            }
        };

        let mut session = Session::new(cancellation);
        let record = load(&mut session, self.input.as_ref(), &self.relations, position)?;
        response.json(&record)
    }
}

#[cfg(test)]
mod tests {
    use crate::outputs::dispatch;
    use crate::outputs::testing::get;
    use crate::registry::testing::registry;
    use crate::registry::Registry;
    use crate::request::Request;
    use crate::response::BufferedResponse;
    use hyper::StatusCode;
    use serde_json::json;

    fn users() -> Registry {
        registry(
            "
indexes:
  users_by_id: { type: map, input: users, properties: [id] }
  orders_by_id: { type: map, input: orders, properties: [id, user_id] }
outputs:
  user:
    type: jsonObject
    endpoint: /user/?
    input: users
    parameters:
      - { name: id, index: users_by_id, parser: integer }
  order:
    type: jsonObject
    endpoint: /user/?/order/?.json
    input: orders
    parameters:
      - { name: user, property: user_id, index: orders_by_id }
      - { property: id, index: orders_by_id }
    relationships:
      user:
        input: users
        match: [ { parentProperty: user_id, childProperty: id, childIndex: users_by_id } ]
",
        )
    }

    #[test]
    fn records_are_found_by_their_path() {
        let registry = users();

        let response = get(&registry, "user", "/user/2", None);
        assert_eq!(response.status(), Some(StatusCode::OK));
        assert_eq!(response.body_string(), r#"{"id":"2","name":"Bob"}"#);

        let response = get(&registry, "user", "/user/99", None);
        assert_eq!(response.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(
            response.body_json().unwrap(),
            json!({"error": "No record matches /user/99"})
        );
    }

    #[test]
    fn lookups_stop_once_the_client_went_away() {
        let registry = users();
        let user = registry.output("user").unwrap();

        let mut sink = BufferedResponse::new();
        sink.cancel();
        dispatch(user.as_ref(), &Request::new("/user/2", None), &mut sink);
        assert_eq!(sink.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(
            sink.body_json().unwrap(),
            json!({"error": "The client is no longer connected"})
        );
    }

    #[test]
    fn parsers_restrict_the_path() {
        let registry = users();
        let user = registry.output("user").unwrap();

        assert!(user.matches("/user/12"));
        assert!(!user.matches("/user/x"));
        assert!(!user.matches("/user/1/2"));
        assert!(!user.matches("/users/1"));
        assert!(user.has_parameter("id"));
        assert_eq!(user.parameter_parser("id").unwrap().name(), "integer");
    }

    #[test]
    fn several_parameters_and_relationships_are_supported() {
        let registry = users();

        let response = get(&registry, "order", "/user/1/order/11.json", None);
        assert_eq!(
            response.body_json().unwrap(),
            json!({
                "id": "11",
                "user_id": "1",
                "amount": "7",
                "user": {"id": "1", "name": "Alice"}
            })
        );

        let response = get(&registry, "order", "/user/2/order/11.json", None);
        assert_eq!(response.status(), Some(StatusCode::NOT_FOUND));
    }
}
