use crate::config::outputs::{JsonArrayConfig, LimitConfig};
use crate::indexes::Query;
use crate::inputs::Input;
use crate::outputs::{cancelled, load, Binding, Output};
use crate::parsers::Parser;
use crate::registry::Registry;
use crate::relationships::{Relation, Session};
use crate::request::Request;
use crate::response::{OutputResult, Response};
use std::convert::TryFrom;
use std::sync::Arc;

/// Delivers all records matching the query parameters as JSON array.
///
/// The number of records is controlled via a limit and an offset parameter. Any other parameter
/// has to be bound to a property. Unknown parameters are rejected, so that a typo doesn't
/// silently deliver all records.
pub struct JsonArray {
    name: String,
    endpoint: String,
    input: Arc<dyn Input>,
    limit: LimitConfig,
    offset_parameter: String,
    bindings: Vec<Binding>,
    relations: Vec<Relation>,
}

impl JsonArray {
    /// Creates a new output and verifies all its references.
    pub fn new(
        name: &str,
        config: &JsonArrayConfig,
        registry: &Registry,
        path: &str,
    ) -> anyhow::Result<JsonArray> {
        let input = registry.input(&config.input, &format!("{}.input", path))?;
        let bindings = config
            .parameters
            .iter()
            .map(|parameter| {
                Binding::new(
                    parameter,
                    input.as_ref(),
                    registry,
                    &format!("{}.parameters.{}", path, parameter.name),
                )
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let relations = Relation::compile_all(
            &config.relationships,
            input.as_ref(),
            registry,
            &format!("{}.relationships", path),
        )?;

        Ok(JsonArray {
            name: name.to_owned(),
            endpoint: config.endpoint.clone(),
            input,
            limit: config.limit.clone(),
            offset_parameter: config.offset_parameter.clone(),
            bindings,
            relations,
        })
    }

    fn limit(&self, request: &Request) -> OutputResult<usize> {
        let raw = match request.parameter(&self.limit.parameter) {
            Some(raw) => raw,
            None => return Ok(self.limit.default),
        };

        match raw.trim().parse::<i64>() {
            Ok(limit) if limit > 0 => {
                Ok(usize::try_from(limit).unwrap_or(usize::MAX).min(self.limit.max))
            }
            _ => Err(crate::client_error!(
                "The '{}' parameter must be a positive and non-zero number.",
                self.limit.parameter
            )),
        }
    }

    fn offset(&self, request: &Request) -> OutputResult<usize> {
        let raw = match request.parameter(&self.offset_parameter) {
            Some(raw) => raw,
            None => return Ok(0),
        };

        match raw.trim().parse::<i64>() {
            Ok(offset) if offset >= 0 => Ok(usize::try_from(offset).unwrap_or(usize::MAX)),
            _ => Err(crate::client_error!(
                "The '{}' parameter must be a non-negative number.",
                self.offset_parameter
            )),
        }
    }

    fn query(&self, request: &Request) -> OutputResult<Query> {
        for name in request.parameter_names() {
            if !self.has_parameter(name) {
                return Err(crate::client_error!("Unknown parameter '{}'", name));
            }
        }

        let mut query = Query::new();
        for binding in &self.bindings {
            if let Some(raw) = request.parameter(&binding.name) {
                binding.apply(&mut query, raw)?;
            }
        }

        Ok(query)
    }
}

impl Output for JsonArray {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn matches(&self, path: &str) -> bool {
        path == self.endpoint
    }

    fn has_parameter(&self, name: &str) -> bool {
        name == self.limit.parameter
            || name == self.offset_parameter
            || self.bindings.iter().any(|binding| binding.name == name)
    }

    fn parameter_parser(&self, name: &str) -> Option<Arc<dyn Parser>> {
        self.bindings
            .iter()
            .find(|binding| binding.name == name)
            .map(|binding| binding.parser.clone())
    }

    fn handle(&self, request: &Request, response: &mut Response) -> OutputResult {
        let limit = self.limit(request)?;
        let offset = self.offset(request)?;
        let query = self.query(request)?;

        let cancellation = response.cancellation().clone();
        let mut positions = query.execute(self.input.as_ref(), &cancellation)?;
        for _ in 0..offset {
            match positions.next() {
                Some(Ok(_)) => {}
                Some(Err(error)) => return Err(error.into()),
                None => break,
            }
        }
        if cancellation.is_cancelled() {
            return Err(cancelled());
        }

        let mut session = Session::new(cancellation);
        response.raw(b"[")?;
        for (count, position) in positions.take(limit).enumerate() {
            let record = load(&mut session, self.input.as_ref(), &self.relations, position?)?;
            if count > 0 {
                response.raw(b",")?;
            }
            response.json(&record)?;
        }
        response.raw(b"]")
    }
}
