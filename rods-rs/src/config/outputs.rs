//! Describes the configuration of the outputs section including the relationship trees.
use crate::config::indexes::DEFAULT_INDEX;
use crate::config::node::Node;

/// Limits how deep relationships may be nested.
///
/// Relationships are resolved recursively, so a configuration which leads back to an input it
/// came from would recurse forever. Such configurations are therefore rejected once they exceed
/// this depth.
pub const MAX_RELATIONSHIP_DEPTH: usize = 8;

/// Describes a single output.
#[derive(Debug, Clone)]
pub enum OutputConfig {
    /// A list endpoint.
    JsonArray(JsonArrayConfig),
    /// A single record endpoint.
    JsonObject(JsonObjectConfig),
}

/// Describes a list endpoint.
#[derive(Debug, Clone)]
pub struct JsonArrayConfig {
    /// Contains the path of the endpoint.
    pub endpoint: String,
    /// Contains the name of the queried input.
    pub input: String,
    /// Describes the limit parameter.
    pub limit: LimitConfig,
    /// Contains the name of the offset parameter.
    pub offset_parameter: String,
    /// Contains the filter parameters.
    pub parameters: Vec<ParameterConfig>,
    /// Contains the relationships resolved for each record.
    pub relationships: Vec<Relationship>,
}

/// Describes the limit parameter of a list endpoint.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Contains the number of records delivered if no limit is given.
    pub default: usize,
    /// Contains the maximal number of records delivered.
    pub max: usize,
    /// Contains the name of the parameter.
    pub parameter: String,
}

/// Describes a single record endpoint.
#[derive(Debug, Clone)]
pub struct JsonObjectConfig {
    /// Contains the path template with one `?` per parameter.
    pub endpoint: String,
    /// Contains the name of the queried input.
    pub input: String,
    /// Contains one parameter per `?` in the endpoint, in order.
    pub parameters: Vec<ParameterConfig>,
    /// Contains the relationships resolved for the record.
    pub relationships: Vec<Relationship>,
}

/// Binds a request parameter to a property, an index and a parser.
#[derive(Debug, Clone)]
pub struct ParameterConfig {
    /// Contains the name of the parameter.
    pub name: String,
    /// Contains the filtered property.
    pub property: String,
    /// Contains the name of the index which performs the filtering.
    pub index: String,
    /// Contains the name of the parser which converts the parameter.
    pub parser: String,
}

/// Describes a named join from a parent record to the records of another input.
#[derive(Debug, Clone)]
pub struct Relationship {
    /// Contains the name of the property which receives the result.
    pub name: String,
    /// Contains the name of the joined input.
    pub input: String,
    /// Determines if a list or a single object (or null) is attached.
    pub is_array: bool,
    /// Limits the number of attached records. Zero means unbounded.
    pub limit: usize,
    /// Contains the sort order of the attached records.
    pub sort: Vec<SortKey>,
    /// Contains the join conditions.
    pub matches: Vec<Match>,
    /// Contains the relationships resolved for each attached record.
    pub relationships: Vec<Relationship>,
}

/// Describes a sort criterion.
#[derive(Debug, Clone)]
pub struct SortKey {
    /// Contains the name of the property to sort by.
    pub property: String,
    /// Determines the direction.
    pub ascending: bool,
}

/// Describes a join condition.
#[derive(Debug, Clone)]
pub struct Match {
    /// Contains the property of the parent record which provides the value.
    pub parent_property: String,
    /// Contains the property of the child record which has to match.
    pub child_property: String,
    /// Contains the index which is used to find the child records.
    pub child_index: String,
}

impl OutputConfig {
    /// Reads an output from the given node.
    pub fn parse(node: &Node) -> anyhow::Result<OutputConfig> {
        let type_name = node.type_name()?;
        match type_name.as_str() {
            "jsonArray" => {
                node.ensure_keys(&[
                    "type",
                    "endpoint",
                    "input",
                    "limit",
                    "offset",
                    "parameters",
                    "relationships",
                ])?;
                Ok(OutputConfig::JsonArray(parse_json_array(node)?))
            }
            "jsonObject" => {
                node.ensure_keys(&["type", "endpoint", "input", "parameters", "relationships"])?;
                Ok(OutputConfig::JsonObject(parse_json_object(node)?))
            }
            "graphql" => Err(node
                .child("type")
                .error("GraphQL outputs are not supported")),
            other => Err(node.unknown_type(other, &["jsonArray", "jsonObject", "graphql"])),
        }
    }

    /// Returns the endpoint of this output.
    pub fn endpoint(&self) -> &str {
        match self {
            OutputConfig::JsonArray(config) => &config.endpoint,
            OutputConfig::JsonObject(config) => &config.endpoint,
        }
    }

    /// Returns the name of the input queried by this output.
    pub fn input(&self) -> &str {
        match self {
            OutputConfig::JsonArray(config) => &config.input,
            OutputConfig::JsonObject(config) => &config.input,
        }
    }

    /// Returns the filter parameters of this output.
    pub fn parameters(&self) -> &[ParameterConfig] {
        match self {
            OutputConfig::JsonArray(config) => &config.parameters,
            OutputConfig::JsonObject(config) => &config.parameters,
        }
    }

    /// Returns the relationships of this output.
    pub fn relationships(&self) -> &[Relationship] {
        match self {
            OutputConfig::JsonArray(config) => &config.relationships,
            OutputConfig::JsonObject(config) => &config.relationships,
        }
    }
}

fn read_endpoint(node: &Node) -> anyhow::Result<String> {
    let endpoint = node.required_string("endpoint")?;
    if !endpoint.starts_with('/') {
        return Err(node
            .child("endpoint")
            .error("The endpoint has to start with a '/'"));
    }

    Ok(endpoint)
}

fn parse_json_array(node: &Node) -> anyhow::Result<JsonArrayConfig> {
    let limit_node = node.child("limit");
    limit_node.ensure_keys(&["default", "max", "parameter"])?;
    let limit = LimitConfig {
        default: limit_node.usize_or("default", 100)?,
        max: limit_node.usize_or("max", 1000)?,
        parameter: limit_node.string_or("parameter", "limit")?,
    };
    if limit.default == 0 || limit.default > limit.max {
        return Err(limit_node.error(format!(
            "The default limit ({}) has to be positive and must not exceed the maximal limit ({})",
            limit.default, limit.max
        )));
    }

    let offset_node = node.child("offset");
    offset_node.ensure_keys(&["parameter"])?;
    let offset_parameter = offset_node.string_or("parameter", "offset")?;
    if offset_parameter == limit.parameter {
        return Err(offset_node
            .child("parameter")
            .error("The offset and limit parameters must have different names"));
    }

    let mut parameters = Vec::new();
    for (name, parameter) in node.child("parameters").entries()? {
        if name == limit.parameter || name == offset_parameter {
            return Err(parameter.error(format!(
                "The parameter name '{}' collides with the limit or offset parameter",
                name
            )));
        }
        parameters.push(parse_parameter(&parameter, Some(name))?);
    }

    Ok(JsonArrayConfig {
        endpoint: read_endpoint(node)?,
        input: node.required_string("input")?,
        limit,
        offset_parameter,
        parameters,
        relationships: parse_relationships(&node.child("relationships"), 1)?,
    })
}

fn parse_json_object(node: &Node) -> anyhow::Result<JsonObjectConfig> {
    let endpoint = read_endpoint(node)?;
    let wildcards = endpoint.matches('?').count();
    if wildcards == 0 {
        return Err(node
            .child("endpoint")
            .error("The endpoint has to contain at least one '?'"));
    }

    let mut parameters = Vec::new();
    for parameter in node.child("parameters").items()? {
        let parameter = parse_parameter(&parameter, None)?;
        if parameters
            .iter()
            .any(|other: &ParameterConfig| other.name == parameter.name)
        {
            return Err(node
                .child("parameters")
                .error(format!("The parameter '{}' is declared twice", parameter.name)));
        }
        parameters.push(parameter);
    }

    if parameters.len() != wildcards {
        return Err(node.child("parameters").error(format!(
            "The endpoint contains {} '?' but {} parameters are declared",
            wildcards,
            parameters.len()
        )));
    }

    Ok(JsonObjectConfig {
        endpoint,
        input: node.required_string("input")?,
        parameters,
        relationships: parse_relationships(&node.child("relationships"), 1)?,
    })
}

fn parse_parameter(node: &Node, name: Option<String>) -> anyhow::Result<ParameterConfig> {
    let name = match name {
        Some(name) => {
            node.ensure_keys(&["property", "index", "parser"])?;
            name
        }
        None => {
            node.ensure_keys(&["name", "property", "index", "parser"])?;
            match node.optional_string("name")? {
                Some(name) => name,
                None => node.required_string("property")?,
            }
        }
    };

    Ok(ParameterConfig {
        property: node.string_or("property", &name)?,
        index: node.string_or("index", DEFAULT_INDEX)?,
        parser: node.string_or("parser", "string")?,
        name,
    })
}

fn parse_relationships(node: &Node, depth: usize) -> anyhow::Result<Vec<Relationship>> {
    let entries = node.entries()?;
    if !entries.is_empty() && depth > MAX_RELATIONSHIP_DEPTH {
        return Err(node.error(format!(
            "Relationships must not be nested deeper than {} levels. Is the configuration cyclic?",
            MAX_RELATIONSHIP_DEPTH
        )));
    }

    let mut result = Vec::with_capacity(entries.len());
    for (name, relationship) in entries {
        result.push(parse_relationship(&relationship, name, depth)?);
    }

    Ok(result)
}

fn parse_relationship(node: &Node, name: String, depth: usize) -> anyhow::Result<Relationship> {
    node.ensure_keys(&[
        "input",
        "isArray",
        "limit",
        "sort",
        "match",
        "relationships",
    ])?;

    let is_array = node.bool_or("isArray", false)?;
    let limit = node.usize_or("limit", 0)?;
    if limit > 0 && !is_array {
        return Err(node
            .child("limit")
            .error("A limit can only be applied if 'isArray' is true"));
    }

    let mut sort = Vec::new();
    for key in node.child("sort").items()? {
        key.ensure_keys(&["property", "ascending"])?;
        sort.push(SortKey {
            property: key.required_string("property")?,
            ascending: key.bool_or("ascending", true)?,
        });
    }
    if !sort.is_empty() && !is_array {
        return Err(node
            .child("sort")
            .error("Sorting can only be applied if 'isArray' is true"));
    }

    let mut matches = Vec::new();
    for condition in node.child("match").items()? {
        condition.ensure_keys(&["parentProperty", "childProperty", "childIndex"])?;
        let condition_match = Match {
            parent_property: condition.required_string("parentProperty")?,
            child_property: condition.required_string("childProperty")?,
            child_index: condition.string_or("childIndex", DEFAULT_INDEX)?,
        };
        if matches
            .iter()
            .any(|other: &Match| other.child_property == condition_match.child_property)
        {
            return Err(condition.child("childProperty").error(format!(
                "The child property '{}' is matched twice",
                condition_match.child_property
            )));
        }
        matches.push(condition_match);
    }

    Ok(Relationship {
        input: node.required_string("input")?,
        is_array,
        limit,
        sort,
        matches,
        relationships: parse_relationships(&node.child("relationships"), depth + 1)?,
        name,
    })
}
