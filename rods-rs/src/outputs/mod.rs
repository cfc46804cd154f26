//! Provides the outputs which answer requests with the records of an input.
//!
//! An [Output] is bound to an endpoint. It turns the parameters of a [Request] into a [Query],
//! loads the matching records, resolves their relationships and writes them as JSON into a
//! [Response]. Two kinds of outputs are available:
//!
//! * [JsonArray] answers `GET /endpoint?param=value&limit=10&offset=20` with a list of records.
//! * [JsonObject] answers `GET /endpoint/value` with a single record (or a 404).
//!
//! Each parameter is bound to a property, an index and a parser. The parser converts the raw
//! text of the parameter into the filter value and the index finds all records whose property
//! matches it.
use crate::config::outputs::{OutputConfig, ParameterConfig};
use crate::indexes::{Cancelled, Index, Query};
use crate::inputs::Input;
use crate::parsers::Parser;
use crate::record::{Position, Record};
use crate::registry::Registry;
use crate::relationships::{resolve_all, Relation, Session};
use crate::request::Request;
use crate::response::{OutputError, OutputResult, Response, ResponseSink};
use std::sync::Arc;

mod json_array;
mod json_object;

pub use json_array::JsonArray;
pub use json_object::JsonObject;

/// Describes an endpoint which delivers records.
pub trait Output: Send + Sync {
    /// Returns the name of this output.
    fn name(&self) -> &str;

    /// Returns the endpoint as given in the config.
    fn endpoint(&self) -> &str;

    /// Determines if the given (decoded) request path is handled by this output.
    fn matches(&self, path: &str) -> bool;

    /// Returns the content type of the expected request body.
    ///
    /// Outputs only answer GET requests, therefore no payload is expected.
    fn expected_payload_type(&self) -> Option<&str> {
        None
    }

    /// Returns the content type of the response.
    fn response_type(&self) -> &str {
        "application/json"
    }

    /// Determines if the output accepts the given parameter.
    fn has_parameter(&self, name: &str) -> bool;

    /// Returns the parser which converts the given parameter.
    fn parameter_parser(&self, name: &str) -> Option<Arc<dyn Parser>>;

    /// Handles the given request.
    fn handle(&self, request: &Request, response: &mut Response) -> OutputResult;

    /// Releases all resources held by this output.
    fn close(&self) {}
}

/// Creates the output described by the given config.
pub fn create_output(
    name: &str,
    config: &OutputConfig,
    registry: &Registry,
    path: &str,
) -> anyhow::Result<Arc<dyn Output>> {
    Ok(match config {
        OutputConfig::JsonArray(config) => Arc::new(JsonArray::new(name, config, registry, path)?),
        OutputConfig::JsonObject(config) => {
            Arc::new(JsonObject::new(name, config, registry, path)?)
        }
    })
}

/// Lets the output handle the request and reports all errors to the sink.
pub fn dispatch(output: &dyn Output, request: &Request, sink: &mut dyn ResponseSink) {
    let mut response = Response::new(sink);
    let result = output.handle(request, &mut response);
    let result = match result {
        Ok(_) => response.complete(),
        Err(error) => {
            report(output, request, &error, response.is_committed());
            response.fail(&error);
            return;
        }
    };

    if let Err(error) = result {
        report(output, request, &error, true);
    }
}

fn report(output: &dyn Output, request: &Request, error: &OutputError, committed: bool) {
    match error {
        OutputError::IOError(_) => log::debug!(
            "Output '{}' stopped sending {}: {}",
            output.name(),
            request.path(),
            error
        ),
        _ if committed => log::warn!(
            "Output '{}' truncated the response for {}: {}",
            output.name(),
            request.path(),
            error
        ),
        OutputError::ServerError(_) => log::error!(
            "Output '{}' failed to handle {}: {}",
            output.name(),
            request.path(),
            error
        ),
        _ => {}
    }
}

/// Binds a request parameter to a property, an index and a parser.
pub(crate) struct Binding {
    name: String,
    property: String,
    index: Arc<dyn Index>,
    parser: Arc<dyn Parser>,
}

impl Binding {
    fn new(
        config: &ParameterConfig,
        input: &dyn Input,
        registry: &Registry,
        path: &str,
    ) -> anyhow::Result<Binding> {
        Ok(Binding {
            name: config.name.clone(),
            property: config.property.clone(),
            index: registry.filter_index(
                &config.index,
                input,
                &config.property,
                &format!("{}.index", path),
            )?,
            parser: registry.primitive_parser(&config.parser, &format!("{}.parser", path))?,
        })
    }

    /// Parses the raw value and adds it as filter to the query.
    fn apply(&self, query: &mut Query, raw: &str) -> OutputResult {
        let value = self.parser.parse(raw).map_err(|error| {
            crate::client_error!("Cannot parse the '{}' parameter: {}", self.name, error)
        })?;
        query.filter(&self.index, &self.property, value);

        Ok(())
    }
}

/// Loads the record at the given position and resolves its relationships.
fn load<'a>(
    session: &mut Session<'a>,
    input: &'a dyn Input,
    relations: &'a [Relation],
    position: Position,
) -> OutputResult<Record> {
    let mut record = session.load(input, position)?;
    resolve_all(relations, session, &mut record)?;

    Ok(record)
}

/// Reports that the client went away.
fn cancelled() -> OutputError {
    OutputError::IOError(Cancelled.into())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::outputs::dispatch;
    use crate::registry::Registry;
    use crate::request::Request;
    use crate::response::BufferedResponse;

    /// Performs a GET request against the named output.
    pub fn get(registry: &Registry, output: &str, path: &str, query: Option<&str>) -> BufferedResponse {
        let output = registry.output(output).unwrap();
        let request = Request::new(path, query);
        assert!(output.matches(request.path()));

        let mut response = BufferedResponse::new();
        dispatch(output.as_ref(), &request, &mut response);
        response
    }
}
