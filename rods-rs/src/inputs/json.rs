//! Provides records stored in a JSON file.
//!
//! The file has to contain a single top-level array of objects. When the input is opened, the
//! file is scanned once to determine the byte range of each element. Records are then parsed
//! one at a time from these ranges, so that the file is never loaded as a whole. The position of
//! a record is its index within the array.
use crate::indexes::PositionIter;
use crate::inputs::{Input, RecordIter, RecordReader};
use crate::record::{Position, Record, Value};
use anyhow::Context;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Provides the elements of a top-level JSON array as records.
pub struct JsonInput {
    name: String,
    path: PathBuf,
    die_on_change: bool,
    spans: Vec<(u64, u64)>,
}

impl JsonInput {
    /// Creates a new input for the given file and determines the location of all elements.
    pub fn new(name: &str, path: PathBuf, die_on_change: bool) -> anyhow::Result<Self> {
        let file =
            File::open(&path).with_context(|| format!("Cannot open {}", path.display()))?;
        let spans = scan_elements(BufReader::new(file))
            .with_context(|| format!("Failed to read {}", path.display()))?;

        log::info!(
            "Opened JSON input '{}' ({}) with {} records.",
            name,
            path.display(),
            spans.len()
        );

        Ok(JsonInput {
            name: name.to_owned(),
            path,
            die_on_change,
            spans,
        })
    }

    fn span(&self, position: Position) -> anyhow::Result<(u64, u64)> {
        self.spans
            .get(position as usize)
            .copied()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "There is no record at position {} in {}",
                    position,
                    self.path.display()
                )
            })
    }

    fn to_record(&self, data: &[u8], position: Position) -> anyhow::Result<Record> {
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(data)
            .with_context(|| {
                format!(
                    "Cannot parse the record at position {} in {}",
                    position,
                    self.path.display()
                )
            })?;

        Ok(Record::from(
            object
                .into_iter()
                .map(|(key, value)| (key, Value::from(value)))
                .collect::<linked_hash_map::LinkedHashMap<_, _>>(),
        ))
    }
}

impl Input for JsonInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn die_on_change(&self) -> bool {
        self.die_on_change
    }

    fn has_property(&self, _property: &str) -> bool {
        true
    }

    fn size(&self) -> usize {
        self.spans.len()
    }

    fn reader(&self) -> anyhow::Result<Box<dyn RecordReader + '_>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open {}", self.path.display()))?;
        Ok(Box::new(JsonRecordReader {
            input: self,
            file,
            buffer: Vec::new(),
        }))
    }

    fn iterate(&self) -> anyhow::Result<RecordIter<'_>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open {}", self.path.display()))?;
        let mut reader = BufReader::new(file);
        let mut offset = 0;
        let mut buffer = Vec::new();

        Ok(Box::new(self.spans.iter().enumerate().map(
            move |(index, (start, end))| -> anyhow::Result<(Position, Record)> {
                if *start > offset {
                    reader.seek_relative((*start - offset) as i64)?;
                }
                buffer.resize((*end - *start) as usize, 0);
                reader.read_exact(&mut buffer)?;
                offset = *end;

                let position = index as Position;
                Ok((position, self.to_record(&buffer, position)?))
            },
        )))
    }

    fn positions(&self) -> anyhow::Result<PositionIter<'_>> {
        Ok(Box::new((0..self.spans.len() as Position).map(Ok)))
    }
}

struct JsonRecordReader<'a> {
    input: &'a JsonInput,
    file: File,
    buffer: Vec<u8>,
}

impl RecordReader for JsonRecordReader<'_> {
    fn get(&mut self, position: Position) -> anyhow::Result<Record> {
        let (start, end) = self.input.span(position)?;
        let _ = self.file.seek(SeekFrom::Start(start))?;
        self.buffer.resize((end - start) as usize, 0);
        self.file.read_exact(&mut self.buffer)?;

        self.input.to_record(&self.buffer, position)
    }
}

#[derive(Copy, Clone, PartialEq)]
enum ScanState {
    BeforeArray,
    ExpectElement { first: bool },
    InElement,
    AfterElement,
    AfterArray,
}

/// Determines the byte ranges of all objects within a top-level array.
///
/// This only tracks nesting and strings. The contents of each object are validated once it is
/// parsed.
fn scan_elements<R: BufRead>(mut reader: R) -> anyhow::Result<Vec<(u64, u64)>> {
    let mut spans = Vec::new();
    let mut state = ScanState::BeforeArray;
    let mut offset: u64 = 0;
    let mut start = 0;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    loop {
        let buffer = reader.fill_buf()?;
        if buffer.is_empty() {
            break;
        }
        let length = buffer.len();

        for &byte in buffer {
            match state {
                ScanState::InElement => {
                    if in_string {
                        if escaped {
                            escaped = false;
                        } else if byte == b'\\' {
                            escaped = true;
                        } else if byte == b'"' {
                            in_string = false;
                        }
                    } else {
                        match byte {
                            b'"' => in_string = true,
                            b'{' | b'[' => depth += 1,
                            b'}' | b']' => {
                                depth -= 1;
                                if depth == 0 {
                                    spans.push((start, offset + 1));
                                    state = ScanState::AfterElement;
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ if byte.is_ascii_whitespace() => {}
                ScanState::BeforeArray if byte == b'[' => {
                    state = ScanState::ExpectElement { first: true }
                }
                ScanState::ExpectElement { .. } if byte == b'{' => {
                    start = offset;
                    depth = 1;
                    state = ScanState::InElement;
                }
                ScanState::ExpectElement { first: true } if byte == b']' => {
                    state = ScanState::AfterArray
                }
                ScanState::AfterElement if byte == b',' => {
                    state = ScanState::ExpectElement { first: false }
                }
                ScanState::AfterElement if byte == b']' => state = ScanState::AfterArray,
                ScanState::ExpectElement { .. } => {
                    return Err(anyhow::anyhow!(
                        "Expected an object as element {} (at offset {})",
                        spans.len(),
                        offset
                    ))
                }
                _ => {
                    return Err(anyhow::anyhow!(
                        "Unexpected character '{}' at offset {}. Expected a single array of objects",
                        byte as char,
                        offset
                    ))
                }
            }
            offset += 1;
        }

        reader.consume(length);
    }

    if state != ScanState::AfterArray {
        return Err(anyhow::anyhow!("Unexpected end of file at offset {}", offset));
    }

    Ok(spans)
}

#[cfg(test)]
mod tests {
    use crate::inputs::json::scan_elements;
    use crate::inputs::testing::resource;
    use crate::inputs::{Input, JsonInput};
    use crate::record::Value;

    #[test]
    fn elements_are_located() {
        let data = br#" [ {"a": "}"}, {"b": [1, {"c": "\"{"}]} ] "#;
        let spans = scan_elements(&data[..]).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(&data[spans[0].0 as usize..spans[0].1 as usize], br#"{"a": "}"}"#);
        assert_eq!(
            &data[spans[1].0 as usize..spans[1].1 as usize],
            br#"{"b": [1, {"c": "\"{"}]}"#
        );

        assert_eq!(scan_elements(&b"[]"[..]).unwrap().len(), 0);
        assert!(scan_elements(&b"[1, 2]"[..]).is_err());
        assert!(scan_elements(&b"[{}, ]"[..]).is_err());
        assert!(scan_elements(&b"[{}"[..]).is_err());
        assert!(scan_elements(&b"{}"[..]).is_err());
    }

    #[test]
    fn records_keep_their_own_keys() {
        let input = JsonInput::new("events", resource("events.json"), false).unwrap();
        assert_eq!(input.size(), 3);
        assert!(input.has_property("anything"));

        let records: Vec<_> = input.iterate().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records[0].0, 0);
        assert_eq!(records[2].0, 2);
        assert_eq!(
            serde_json::to_string(&records[0].1).unwrap(),
            r#"{"id":1,"kind":"login","user":"alice","tags":["web","mobile"]}"#
        );
        assert_eq!(records[2].1.property("score"), Some(&Value::Float(4.5)));
        assert_eq!(records[1].1.property("score"), None);

        let mut reader = input.reader().unwrap();
        assert_eq!(
            reader.get(1).unwrap().property("user"),
            Some(&Value::from("bob"))
        );
        assert!(reader.get(3).is_err());
    }
}
