//! Represents a request received for an output.
//!
//! A request consists of the (percent decoded) path and the parameters of its query string.
//! Outputs can additionally extract parameters from the path itself (see
//! [JsonObject](crate::outputs::JsonObject)).
//!
//! # Example
//!
//! ```
//! # use rods::request::Request;
//! let request = Request::new("/users/J%C3%BCrgen", Some("limit=10&name=Bob+Smith&limit=20"));
//!
//! assert_eq!(request.path(), "/users/Jürgen");
//! assert_eq!(request.parameter("name"), Some("Bob Smith"));
//! // The first occurrence of a parameter wins...
//! assert_eq!(request.parameter("limit"), Some("10"));
//! assert_eq!(request.parameter("offset"), None);
//! ```
use linked_hash_map::LinkedHashMap;
use percent_encoding::percent_decode_str;

/// Contains the path and the query parameters of a request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    path: String,
    parameters: LinkedHashMap<String, String>,
}

impl Request {
    /// Creates a new request for the given raw path and query string.
    pub fn new(path: &str, query: Option<&str>) -> Self {
        let mut parameters = LinkedHashMap::new();
        if let Some(query) = query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                if !parameters.contains_key(name.as_ref()) {
                    let _ = parameters.insert(name.into_owned(), value.into_owned());
                }
            }
        }

        Request {
            path: percent_decode_str(path).decode_utf8_lossy().into_owned(),
            parameters,
        }
    }

    /// Returns the decoded path of the request.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the value of the given query parameter.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|value| value.as_str())
    }

    /// Iterates over the names of all query parameters.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.keys().map(|name| name.as_str())
    }

    /// Adds (or replaces) a query parameter.
    ///
    /// A replaced parameter keeps its position.
    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        if let Some(existing) = self.parameters.get_mut(name) {
            *existing = value.to_owned();
        } else {
            let _ = self.parameters.insert(name.to_owned(), value.to_owned());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use crate::request::Request;

    #[test]
    fn parameters_keep_their_order() {
        let request = Request::new("/users", Some("b=1&a=2&c"))
            .with_parameter("d", "4")
            .with_parameter("b", "5");

        assert_eq!(request.path(), "/users");
        assert_eq!(request.parameter_names().collect::<Vec<_>>(), vec!["b", "a", "c", "d"]);
        assert_eq!(request.parameter("b"), Some("5"));
        assert_eq!(request.parameter("c"), Some(""));
    }

    #[test]
    fn requests_without_query_have_no_parameters() {
        let request = Request::new("/user/2", None);
        assert_eq!(request.parameter_names().count(), 0);
    }
}
