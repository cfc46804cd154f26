//! Provides the subset of XPath which is used to select records and properties in XML files.
//!
//! Supported are location paths built of element names, `*`, `.`, the descendant shortcut `//`
//! as well as a trailing `@attribute` or `text()` step. Record paths are always absolute (e.g.
//! `/catalog/book` or `//book`) and may only consist of element steps. Property paths are
//! relative to the record element (or the enclosing property).
//!
//! # Example
//! ```
//! # use rods::inputs::XPath;
//! let record = XPath::compile_absolute("/catalog//book").unwrap();
//! assert!(record.matches_stack(&["catalog", "shelf", "book"]));
//! assert!(!record.matches_stack(&["catalog", "shelf"]));
//!
//! assert!(XPath::compile_relative("authors/author/text()").is_ok());
//! assert!(XPath::compile_relative("@id/name").is_err());
//! ```
use std::borrow::Cow;

/// Represents an element of a record which has been read into memory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct XmlNode {
    /// Contains the qualified name of the element.
    pub name: String,
    /// Contains the attributes in order of appearance.
    pub attributes: Vec<(String, String)>,
    /// Contains the direct text contents of the element.
    pub text: String,
    /// Contains the child elements.
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Returns the text contents of this element and all of its descendants.
    pub fn string_value(&self) -> Cow<str> {
        if self.children.is_empty() {
            return Cow::Borrowed(self.text.as_str());
        }

        let mut result = self.text.clone();
        for child in &self.children {
            result.push_str(child.string_value().as_ref());
        }

        Cow::Owned(result)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn collect_descendants<'a>(&'a self, name: &Option<String>, result: &mut Vec<Selected<'a>>) {
        for child in &self.children {
            if name_matches(name, &child.name) {
                result.push(Selected::Element(child));
            }
            child.collect_descendants(name, result);
        }
    }
}

/// Represents a node selected by a path.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Selected<'a> {
    /// An element.
    Element(&'a XmlNode),
    /// The value of an attribute or the text of an element.
    Text(&'a str),
}

impl<'a> Selected<'a> {
    /// Returns the text of the selected node.
    pub fn text(&self) -> Cow<'a, str> {
        match *self {
            Selected::Element(node) => node.string_value(),
            Selected::Text(text) => Cow::Borrowed(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Current,
    Child(Option<String>),
    Descendant(Option<String>),
    Attribute(String),
    Text,
}

/// Represents a compiled path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    steps: Vec<Step>,
}

fn name_matches(test: &Option<String>, name: &str) -> bool {
    match test {
        Some(expected) => expected == name,
        None => true,
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '.' || ch == ':')
}

impl XPath {
    /// Compiles a path which selects record elements from the document root.
    pub fn compile_absolute(expression: &str) -> anyhow::Result<XPath> {
        let expression = expression.trim();
        let relative = match expression.strip_prefix('/') {
            Some(rest) => rest,
            None => {
                return Err(anyhow::anyhow!(
                    "The record path '{}' has to start with '/'",
                    expression
                ))
            }
        };

        let path = XPath::compile(relative, expression)?;
        if path.steps.is_empty()
            || path
                .steps
                .iter()
                .any(|step| !matches!(step, Step::Child(_) | Step::Descendant(_)))
        {
            return Err(anyhow::anyhow!(
                "The record path '{}' may only consist of element names",
                expression
            ));
        }

        Ok(path)
    }

    /// Compiles a path which is evaluated relative to an element.
    pub fn compile_relative(expression: &str) -> anyhow::Result<XPath> {
        let expression = expression.trim();
        if expression.starts_with('/') && !expression.starts_with("//") {
            return Err(anyhow::anyhow!(
                "The path '{}' has to be relative to its record",
                expression
            ));
        }

        if expression.starts_with("//") {
            XPath::compile(&format!(".{}", expression), expression)
        } else {
            XPath::compile(expression, expression)
        }
    }

    fn compile(expression: &str, original: &str) -> anyhow::Result<XPath> {
        let mut steps = Vec::new();
        let mut descendant = false;
        let segments: Vec<&str> = expression.split('/').collect();
        for (index, segment) in segments.iter().enumerate() {
            let segment = segment.trim();
            if steps.last().map_or(false, |step| {
                matches!(step, Step::Attribute(_) | Step::Text)
            }) {
                return Err(anyhow::anyhow!(
                    "Invalid path '{}': Attributes and text() have to be the last step",
                    original
                ));
            }

            if segment.is_empty() {
                if descendant || index == segments.len() - 1 {
                    return Err(anyhow::anyhow!("Invalid path '{}'", original));
                }
                descendant = true;
                continue;
            }

            let step = match segment {
                "." if !descendant => Step::Current,
                "*" => Step::Child(None),
                "text()" if !descendant => Step::Text,
                _ if segment.starts_with('@') && !descendant && is_valid_name(&segment[1..]) => {
                    Step::Attribute(segment[1..].to_owned())
                }
                _ if is_valid_name(segment) && segment != "." => {
                    Step::Child(Some(segment.to_owned()))
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid path '{}': Unsupported step '{}'",
                        original,
                        segment
                    ))
                }
            };

            steps.push(match (step, descendant) {
                (Step::Child(name), true) => Step::Descendant(name),
                (step, _) => step,
            });
            descendant = false;
        }

        Ok(XPath { steps })
    }

    /// Determines if an element with the given ancestors (outermost first, the element itself
    /// last) is selected by this absolute path.
    pub fn matches_stack<S: AsRef<str>>(&self, names: &[S]) -> bool {
        matches_steps(&self.steps, names)
    }

    /// Selects all nodes reachable from the given element, in document order.
    pub fn select<'a>(&self, node: &'a XmlNode) -> Vec<Selected<'a>> {
        let mut current = vec![Selected::Element(node)];
        for step in &self.steps {
            let mut next = Vec::new();
            for selected in current {
                let element = match selected {
                    Selected::Element(element) => element,
                    Selected::Text(_) => continue,
                };
                match step {
                    Step::Current => next.push(Selected::Element(element)),
                    Step::Child(name) => next.extend(
                        element
                            .children
                            .iter()
                            .filter(|child| name_matches(name, &child.name))
                            .map(Selected::Element),
                    ),
                    Step::Descendant(name) => element.collect_descendants(name, &mut next),
                    Step::Attribute(name) => {
                        if let Some(value) = element.attribute(name) {
                            next.push(Selected::Text(value));
                        }
                    }
                    Step::Text => next.push(Selected::Text(element.text.as_str())),
                }
            }
            current = next;
        }

        current
    }

    /// Determines if this path only selects the element it is applied to.
    pub fn is_current(&self) -> bool {
        self.steps.iter().all(|step| *step == Step::Current)
    }
}

fn matches_steps<S: AsRef<str>>(steps: &[Step], names: &[S]) -> bool {
    let (last, rest) = match steps.split_last() {
        Some(split) => split,
        None => return names.is_empty(),
    };
    let (name, parents) = match names.split_last() {
        Some(split) => split,
        None => return false,
    };

    match last {
        Step::Child(test) => name_matches(test, name.as_ref()) && matches_steps(rest, parents),
        Step::Descendant(test) => {
            name_matches(test, name.as_ref())
                && (0..=parents.len())
                    .rev()
                    .any(|length| matches_steps(rest, &parents[..length]))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::inputs::xpath::{Selected, XPath, XmlNode};

    fn node(name: &str, text: &str, children: Vec<XmlNode>) -> XmlNode {
        XmlNode {
            name: name.to_owned(),
            attributes: Vec::new(),
            text: text.to_owned(),
            children,
        }
    }

    #[test]
    fn absolute_paths_match_element_stacks() {
        let path = XPath::compile_absolute("/catalog/book").unwrap();
        assert!(path.matches_stack(&["catalog", "book"]));
        assert!(!path.matches_stack(&["catalog", "shelf", "book"]));
        assert!(!path.matches_stack(&["book"]));

        let path = XPath::compile_absolute("//book").unwrap();
        assert!(path.matches_stack(&["book"]));
        assert!(path.matches_stack(&["a", "b", "book"]));

        let path = XPath::compile_absolute("/*/book").unwrap();
        assert!(path.matches_stack(&["library", "book"]));

        assert!(XPath::compile_absolute("book").is_err());
        assert!(XPath::compile_absolute("/catalog/@id").is_err());
        assert!(XPath::compile_absolute("/").is_err());
    }

    #[test]
    fn relative_paths_select_nodes() {
        let mut book = node(
            "book",
            "",
            vec![
                node("title", "Rust", vec![]),
                node(
                    "authors",
                    "",
                    vec![node("author", "A", vec![]), node("author", "B", vec![])],
                ),
            ],
        );
        book.attributes.push(("id".to_owned(), "b1".to_owned()));

        let texts = |expression: &str| -> Vec<String> {
            XPath::compile_relative(expression)
                .unwrap()
                .select(&book)
                .iter()
                .map(|selected| selected.text().into_owned())
                .collect()
        };

        assert_eq!(texts("@id"), vec!["b1"]);
        assert_eq!(texts("title"), vec!["Rust"]);
        assert_eq!(texts("title/text()"), vec!["Rust"]);
        assert_eq!(texts("authors/author"), vec!["A", "B"]);
        assert_eq!(texts(".//author"), vec!["A", "B"]);
        assert_eq!(texts("authors"), vec!["AB"]);
        assert_eq!(texts("missing"), Vec::<String>::new());
        assert!(matches!(
            XPath::compile_relative(".").unwrap().select(&book)[0],
            Selected::Element(_)
        ));
        assert!(XPath::compile_relative(".").unwrap().is_current());
        assert!(XPath::compile_relative("/abs").is_err());
        assert!(XPath::compile_relative("a//").is_err());
        assert_eq!(texts("//author"), vec!["A", "B"]);
    }
}
