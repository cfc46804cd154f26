//! Provides records stored in XML files.
//!
//! The document is processed as a stream of events. Each element which is selected by the
//! record path is read into a small in-memory tree (an [XmlNode]) from which the declared
//! properties are extracted. Everything else is skipped, so that only a single record is kept
//! in memory at any time. The position of a record is the byte offset of its element.
//!
//! The encoding of the document is taken from its XML declaration when the input is opened.
//! As records are later read starting at their own offset (thus without seeing the
//! declaration), the detected encoding is kept along with the input.
use crate::config::inputs::{XmlConfig, XmlPropertyConfig};
use crate::indexes::PositionIter;
use crate::inputs::xpath::{Selected, XPath, XmlNode};
use crate::inputs::{Input, RecordIter, RecordReader};
use crate::parsers::{Parser, Parsers};
use crate::record::{Position, Record, Value};
use anyhow::Context;
use encoding_rs::Encoding;
use linked_hash_map::LinkedHashMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

enum Property {
    Primitive {
        path: XPath,
        parser: Arc<dyn Parser>,
    },
    Array {
        path: XPath,
        items: Box<Property>,
    },
    Object {
        path: XPath,
        properties: Vec<(String, Property)>,
    },
}

impl Property {
    fn compile(
        config: &XmlPropertyConfig,
        parsers: &Parsers,
        config_path: &str,
    ) -> anyhow::Result<Property> {
        let path = XPath::compile_relative(config.xpath())
            .with_context(|| format!("{}.xpath", config_path))?;

        Ok(match config {
            XmlPropertyConfig::Primitive { parser, .. } => Property::Primitive {
                path,
                parser: parsers.require(parser, &format!("{}.parser", config_path))?,
            },
            XmlPropertyConfig::Array { items, .. } => Property::Array {
                path,
                items: Box::new(Property::compile(
                    items,
                    parsers,
                    &format!("{}.items", config_path),
                )?),
            },
            XmlPropertyConfig::Object { properties, .. } => Property::Object {
                path,
                properties: compile_properties(
                    properties,
                    parsers,
                    &format!("{}.properties", config_path),
                )?,
            },
        })
    }

    fn path(&self) -> &XPath {
        match self {
            Property::Primitive { path, .. } => path,
            Property::Array { path, .. } => path,
            Property::Object { path, .. } => path,
        }
    }

    /// Extracts the value of this property relative to the given element.
    fn apply(&self, element: &XmlNode) -> anyhow::Result<Value> {
        match self {
            Property::Primitive { path, parser } => match path.select(element).first() {
                Some(selected) => parser.parse(selected.text().as_ref()),
                None => Ok(Value::Null),
            },
            Property::Array { path, items } => {
                let mut result = Vec::new();
                for selected in path.select(element) {
                    result.push(items.value_of(selected)?);
                }
                Ok(Value::List(result))
            }
            Property::Object { path, properties } => {
                let child = path.select(element).into_iter().find_map(|selected| {
                    if let Selected::Element(child) = selected {
                        Some(child)
                    } else {
                        None
                    }
                });
                match child {
                    Some(child) => Ok(extract(properties, child)?.into_value()),
                    None => Ok(Value::Null),
                }
            }
        }
    }

    /// Extracts the value of this property for an item selected by an array.
    fn value_of(&self, selected: Selected) -> anyhow::Result<Value> {
        match (selected, self) {
            (Selected::Element(element), _) => self.apply(element),
            (Selected::Text(text), Property::Primitive { parser, .. })
                if self.path().is_current() =>
            {
                parser.parse(text)
            }
            _ => Ok(Value::Null),
        }
    }
}

fn compile_properties(
    properties: &[(String, XmlPropertyConfig)],
    parsers: &Parsers,
    config_path: &str,
) -> anyhow::Result<Vec<(String, Property)>> {
    let mut result = Vec::with_capacity(properties.len());
    for (name, property) in properties {
        result.push((
            name.clone(),
            Property::compile(property, parsers, &format!("{}.{}", config_path, name))?,
        ));
    }

    Ok(result)
}

fn extract(properties: &[(String, Property)], element: &XmlNode) -> anyhow::Result<Record> {
    let mut record = LinkedHashMap::with_capacity(properties.len());
    for (name, property) in properties {
        let value = property
            .apply(element)
            .with_context(|| format!("Cannot parse property '{}'", name))?;
        let _ = record.insert(name.clone(), value);
    }

    Ok(Record::from(record))
}

/// Provides the elements selected from an XML document as records.
pub struct XmlInput {
    name: String,
    path: PathBuf,
    die_on_change: bool,
    record_path: XPath,
    properties: Vec<(String, Property)>,
    encoding: &'static Encoding,
    size: usize,
}

impl XmlInput {
    /// Creates a new input for the given file.
    ///
    /// This compiles all paths, resolves all parsers and scans the document once to determine
    /// its encoding and the number of records.
    pub fn new(
        name: &str,
        path: PathBuf,
        die_on_change: bool,
        config: &XmlConfig,
        parsers: &Parsers,
        config_path: &str,
    ) -> anyhow::Result<Self> {
        let record_path = XPath::compile_absolute(&config.xpath)
            .with_context(|| format!("{}.xpath", config_path))?;
        let properties = compile_properties(
            &config.properties,
            parsers,
            &format!("{}.properties", config_path),
        )?;

        let mut nodes = Nodes::open(&path, &record_path)?;
        let mut size = 0;
        for node in &mut nodes {
            let _ = node.with_context(|| format!("Failed to read {}", path.display()))?;
            size += 1;
        }
        let encoding = nodes.reader.encoding();

        log::info!(
            "Opened XML input '{}' ({}, {}) with {} records.",
            name,
            path.display(),
            encoding.name(),
            size
        );

        Ok(XmlInput {
            name: name.to_owned(),
            path,
            die_on_change,
            record_path,
            properties,
            encoding,
            size,
        })
    }

    fn to_record(&self, node: &XmlNode, position: Position) -> anyhow::Result<Record> {
        extract(&self.properties, node).with_context(|| {
            format!(
                "Failed to read the record at position {} in {}",
                position,
                self.path.display()
            )
        })
    }
}

impl Input for XmlInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn die_on_change(&self) -> bool {
        self.die_on_change
    }

    fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|(name, _)| name == property)
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reader(&self) -> anyhow::Result<Box<dyn RecordReader + '_>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open {}", self.path.display()))?;
        Ok(Box::new(XmlRecordReader { input: self, file }))
    }

    fn iterate(&self) -> anyhow::Result<RecordIter<'_>> {
        let nodes = Nodes::open(&self.path, &self.record_path)?;
        Ok(Box::new(nodes.map(
            move |result| -> anyhow::Result<(Position, Record)> {
                let (position, node) = result?;
                Ok((position, self.to_record(&node, position)?))
            },
        )))
    }

    fn positions(&self) -> anyhow::Result<PositionIter<'_>> {
        let nodes = Nodes::open(&self.path, &self.record_path)?;
        Ok(Box::new(
            nodes.map(|result| result.map(|(position, _)| position)),
        ))
    }
}

fn configure<B: BufRead>(reader: &mut Reader<B>) {
    let _ = reader
        .trim_text(true)
        .expand_empty_elements(true)
        .check_end_names(true);
}

fn decode(encoding: &'static Encoding, data: &[u8]) -> String {
    encoding.decode_without_bom_handling(data).0.into_owned()
}

fn element_node(start: &BytesStart, encoding: &'static Encoding) -> anyhow::Result<XmlNode> {
    let mut node = XmlNode {
        name: decode(encoding, start.name()),
        ..XmlNode::default()
    };
    for attribute in start.attributes() {
        let attribute = attribute?;
        let value = attribute.unescaped_value()?;
        node.attributes
            .push((decode(encoding, attribute.key), decode(encoding, &value)));
    }

    Ok(node)
}

/// Reads the element which has just been started (including all of its children) into memory.
fn read_node<B: BufRead>(
    reader: &mut Reader<B>,
    start: &BytesStart,
    encoding: &'static Encoding,
) -> anyhow::Result<XmlNode> {
    let mut stack = vec![element_node(start, encoding)?];
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_event(&mut buffer)? {
            Event::Start(child) => stack.push(element_node(&child, encoding)?),
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| anyhow::anyhow!("Found an unbalanced end tag"))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => return Ok(node),
                }
            }
            Event::Text(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&decode(encoding, &text.unescaped()?));
                }
            }
            Event::CData(text) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&decode(encoding, text.escaped()));
                }
            }
            Event::Eof => {
                return Err(anyhow::anyhow!(
                    "Unexpected end of file within <{}>",
                    stack.first().map(|node| node.name.as_str()).unwrap_or("")
                ))
            }
            _ => {}
        }
    }
}

/// Iterates over all elements selected by a record path, in document order.
struct Nodes<'a> {
    reader: Reader<BufReader<File>>,
    record_path: &'a XPath,
    stack: Vec<String>,
    buffer: Vec<u8>,
    done: bool,
}

impl<'a> Nodes<'a> {
    fn open(path: &Path, record_path: &'a XPath) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        configure(&mut reader);

        Ok(Nodes {
            reader,
            record_path,
            stack: Vec::new(),
            buffer: Vec::new(),
            done: false,
        })
    }

    fn advance(&mut self) -> anyhow::Result<Option<(Position, XmlNode)>> {
        loop {
            let position = self.reader.buffer_position() as Position;
            let encoding = self.reader.encoding();
            self.buffer.clear();
            match self.reader.read_event(&mut self.buffer)? {
                Event::Start(start) => {
                    self.stack.push(decode(encoding, start.name()));
                    if self.record_path.matches_stack(&self.stack) {
                        let node = read_node(&mut self.reader, &start, encoding)?;
                        let _ = self.stack.pop();
                        return Ok(Some((position, node)));
                    }
                }
                Event::End(_) => {
                    let _ = self.stack.pop();
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl Iterator for Nodes<'_> {
    type Item = anyhow::Result<(Position, XmlNode)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(node)) => Some(Ok(node)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

struct XmlRecordReader<'a> {
    input: &'a XmlInput,
    file: File,
}

impl RecordReader for XmlRecordReader<'_> {
    fn get(&mut self, position: Position) -> anyhow::Result<Record> {
        let _ = self.file.seek(SeekFrom::Start(position))?;
        let mut reader = Reader::from_reader(BufReader::new(&mut self.file));
        configure(&mut reader);

        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_event(&mut buffer)? {
                Event::Start(start) => {
                    let node = read_node(&mut reader, &start, self.input.encoding)?;
                    return self.input.to_record(&node, position);
                }
                Event::Eof | Event::End(_) => {
                    return Err(anyhow::anyhow!(
                        "There is no record at position {} in {}",
                        position,
                        self.input.path.display()
                    ))
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::config::inputs::InputFormat;
    use crate::inputs::testing::resource;
    use crate::inputs::{Input, XmlInput};
    use crate::parsers::Parsers;
    use crate::record::Value;

    fn open(file: &str, yaml: &str) -> XmlInput {
        let config = Config::load_from_string(yaml).unwrap();
        let parsers = Parsers::new(&config.parsers).unwrap();
        match &config.inputs[0].1.format {
            InputFormat::Xml(xml) => XmlInput::new(
                "xml",
                resource(file),
                true,
                xml,
                &parsers,
                "inputs.xml",
            )
            .unwrap(),
            _ => panic!("Expected an XML input"),
        }
    }

    fn books() -> XmlInput {
        open(
            "books.xml",
            r#"
inputs:
  books:
    type: xml
    source: data
    file: books.xml
    xpath: /catalog/book
    properties:
      id: { xpath: "@id" }
      available: { xpath: "@available", parser: yesNo }
      title: { xpath: title }
      authors: { type: array, xpath: authors/author }
      meta:
        type: object
        xpath: meta
        properties:
          pages: { xpath: pages, parser: integer }
parsers:
  yesNo: { type: boolean, trueValues: ["yes"], falseValues: ["no"] }
"#,
        )
    }

    #[test]
    fn selected_elements_become_records() {
        let input = books();
        assert_eq!(input.size(), 2);
        assert!(input.has_property("title"));
        assert!(!input.has_property("magazine"));

        let records: Vec<_> = input.iterate().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].0 < records[1].0);
        assert_eq!(
            serde_json::to_string(&records[0].1).unwrap(),
            r#"{"id":"b1","available":true,"title":"The Rust Programming Language","authors":["Steve Klabnik","Carol Nichols"],"meta":{"pages":560}}"#
        );

        let second = &records[1].1;
        assert_eq!(second.property("title"), Some(&Value::from("Programming & Proving")));
        assert_eq!(second.property("available"), Some(&Value::Boolean(false)));
        assert_eq!(second.property("meta"), Some(&Value::Null));
    }

    #[test]
    fn records_can_be_loaded_by_position() {
        let input = books();
        let positions: Vec<_> = input.positions().unwrap().map(|p| p.unwrap()).collect();
        assert_eq!(positions.len(), 2);

        let mut reader = input.reader().unwrap();
        assert_eq!(
            reader.get(positions[1]).unwrap().property("id"),
            Some(&Value::from("b2"))
        );
        assert_eq!(
            reader.get(positions[0]).unwrap().property("id"),
            Some(&Value::from("b1"))
        );
    }

    #[test]
    fn the_declared_encoding_is_respected() {
        let input = open(
            "people_latin1.xml",
            r#"
inputs:
  people:
    type: xml
    source: data
    file: people_latin1.xml
    xpath: //person
    properties:
      name: { xpath: "@name" }
      city: { xpath: city/text() }
"#,
        );

        let (position, record) = input.iterate().unwrap().next().unwrap().unwrap();
        assert_eq!(record.property("name"), Some(&Value::from("Müller")));
        assert_eq!(record.property("city"), Some(&Value::from("Köln")));
        assert_eq!(input.get(position).unwrap(), record);
    }
}
