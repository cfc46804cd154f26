//! Provides records stored in CSV files.
//!
//! Each row becomes a record which contains the declared columns in order. Cells are converted
//! by the parser of their column, missing cells (in short rows) yield null. The position of a
//! record is the byte offset at which its row starts.
//!
//! # Example
//! ```no_run
//! # use rods::config::Config;
//! # use rods::config::inputs::InputFormat;
//! # use rods::inputs::{CsvInput, Input};
//! # use rods::parsers::Parsers;
//! # use std::path::PathBuf;
//! let config = Config::load_from_string("
//! inputs:
//!     users: { type: csv, source: data, file: users.csv, ignoreFirstRow: true, columns: [id, name] }
//! ").unwrap();
//! let parsers = Parsers::new(&[]).unwrap();
//! if let InputFormat::Csv(csv) = &config.inputs[0].1.format {
//!     let users = CsvInput::new("users", PathBuf::from("users.csv"), true, csv, &parsers, "inputs.users").unwrap();
//!     for result in users.iterate().unwrap() {
//!         let (position, record) = result.unwrap();
//!         println!("{}: {}", position, serde_json::to_string(&record).unwrap());
//!     }
//! }
//! ```
use crate::config::inputs::CsvConfig;
use crate::indexes::PositionIter;
use crate::inputs::{Input, RecordIter, RecordReader};
use crate::parsers::{BooleanParser, FloatParser, Parser, Parsers};
use crate::record::{Position, Record, Value};
use anyhow::Context;
use csv::{ByteRecord, Reader, ReaderBuilder};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

struct Column {
    name: String,
    parser: Arc<dyn Parser>,
}

/// Provides the rows of a CSV file as records.
pub struct CsvInput {
    name: String,
    path: PathBuf,
    die_on_change: bool,
    ignore_first_row: bool,
    delimiter: u8,
    columns: Vec<Column>,
    size: usize,
}

impl CsvInput {
    /// Creates a new input for the given file.
    ///
    /// This resolves all column parsers and scans the file once to verify that it can be read
    /// and to count its records.
    pub fn new(
        name: &str,
        path: PathBuf,
        die_on_change: bool,
        config: &CsvConfig,
        parsers: &Parsers,
        config_path: &str,
    ) -> anyhow::Result<Self> {
        let mut columns = Vec::with_capacity(config.columns.len());
        for (index, column) in config.columns.iter().enumerate() {
            let column_path = format!("{}.columns[{}]", config_path, index);
            let parser: Arc<dyn Parser> = if let Some((true_values, false_values)) =
                &column.boolean_values
            {
                Arc::new(
                    BooleanParser::new(&column.name, true_values.clone(), false_values.clone())
                        .with_context(|| column_path.clone())?,
                )
            } else if let Some(separator) = column.decimal_separator {
                Arc::new(FloatParser::new(&column.name, "", separator))
            } else {
                parsers.require(&column.parser, &format!("{}.parser", column_path))?
            };

            columns.push(Column {
                name: column.name.clone(),
                parser,
            });
        }

        let mut input = CsvInput {
            name: name.to_owned(),
            path,
            die_on_change,
            ignore_first_row: config.ignore_first_row,
            delimiter: config.delimiter,
            columns,
            size: 0,
        };

        let mut size = 0;
        for position in input.positions()? {
            let _ = position.with_context(|| format!("Failed to read {}", input.path.display()))?;
            size += 1;
        }
        input.size = size;

        log::info!(
            "Opened CSV input '{}' ({}) with {} records.",
            input.name,
            input.path.display(),
            input.size
        );

        Ok(input)
    }

    fn open(&self) -> anyhow::Result<Reader<File>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open {}", self.path.display()))?;

        Ok(ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(file))
    }

    fn to_record(&self, row: &ByteRecord, position: Position) -> anyhow::Result<Record> {
        let mut record = Record::new();
        for (index, column) in self.columns.iter().enumerate() {
            let value = match row.get(index) {
                Some(cell) => column.parser.parse_bytes(cell).with_context(|| {
                    format!(
                        "Cannot parse column '{}' of the row at position {} in {}",
                        column.name,
                        position,
                        self.path.display()
                    )
                })?,
                None => Value::Null,
            };
            record.insert(column.name.as_str(), value);
        }

        Ok(record)
    }
}

impl Input for CsvInput {
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
        self.columns.iter().any(|column| column.name == property)
    }

    fn size(&self) -> usize {
        self.size
    }

    fn reader(&self) -> anyhow::Result<Box<dyn RecordReader + '_>> {
        Ok(Box::new(CsvRecordReader {
            input: self,
            reader: self.open()?,
            row: ByteRecord::new(),
        }))
    }

    fn iterate(&self) -> anyhow::Result<RecordIter<'_>> {
        let rows = Rows::new(self.open()?, self.ignore_first_row);
        Ok(Box::new(rows.map(move |result| -> anyhow::Result<(Position, Record)> {
            let (position, row) = result?;
            Ok((position, self.to_record(&row, position)?))
        })))
    }

    fn positions(&self) -> anyhow::Result<PositionIter<'_>> {
        let rows = Rows::new(self.open()?, self.ignore_first_row);
        Ok(Box::new(rows.map(|result| result.map(|(position, _)| position))))
    }
}

/// Iterates over the raw rows of a file along with their byte offsets.
struct Rows {
    reader: Reader<File>,
    skip_first: bool,
    done: bool,
}

impl Rows {
    fn new(reader: Reader<File>, skip_first: bool) -> Self {
        Rows {
            reader,
            skip_first,
            done: false,
        }
    }
}

impl Iterator for Rows {
    type Item = anyhow::Result<(Position, ByteRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let mut row = ByteRecord::new();
            match self.reader.read_byte_record(&mut row) {
                Ok(true) => {
                    if self.skip_first {
                        self.skip_first = false;
                        continue;
                    }
                    let position = row.position().map(|position| position.byte()).unwrap_or(0);
                    return Some(Ok((position, row)));
                }
                Ok(false) => self.done = true,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error.into()));
                }
            }
        }

        None
    }
}

struct CsvRecordReader<'a> {
    input: &'a CsvInput,
    reader: Reader<File>,
    row: ByteRecord,
}

impl RecordReader for CsvRecordReader<'_> {
    fn get(&mut self, position: Position) -> anyhow::Result<Record> {
        let mut seek_position = csv::Position::new();
        let _ = seek_position.set_byte(position);
        self.reader.seek(seek_position)?;

        if !self.reader.read_byte_record(&mut self.row)? {
            return Err(anyhow::anyhow!(
                "There is no record at position {} in {}",
                position,
                self.input.path.display()
            ));
        }

        self.input.to_record(&self.row, position)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::inputs::{ColumnConfig, CsvConfig};
    use crate::inputs::testing::resource;
    use crate::inputs::{CsvInput, Input};
    use crate::parsers::Parsers;
    use crate::record::Value;

    fn column(name: &str, parser: &str) -> ColumnConfig {
        ColumnConfig {
            name: name.to_owned(),
            parser: parser.to_owned(),
            boolean_values: None,
            decimal_separator: None,
        }
    }

    fn orders() -> CsvInput {
        let config = CsvConfig {
            ignore_first_row: true,
            delimiter: b',',
            columns: vec![
                column("id", "integer"),
                column("user_id", "string"),
                column("amount", "float"),
                column("note", "string"),
            ],
        };
        let parsers = Parsers::new(&[]).unwrap();
        CsvInput::new(
            "orders",
            resource("orders.csv"),
            true,
            &config,
            &parsers,
            "inputs.orders",
        )
        .unwrap()
    }

    #[test]
    fn rows_are_iterated_in_file_order() {
        let input = orders();
        assert_eq!(input.size(), 4);

        let records: Vec<_> = input.iterate().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 4);
        assert!(records.windows(2).all(|pair| pair[0].0 < pair[1].0));

        let (_, first) = &records[0];
        assert_eq!(first.property("id"), Some(&Value::Integer(10)));
        assert_eq!(first.property("user_id"), Some(&Value::from("1")));
        assert_eq!(first.property("amount"), Some(&Value::Float(5.5)));
        assert_eq!(first.property("note"), Some(&Value::Null));
        assert_eq!(
            serde_json::to_string(first).unwrap(),
            r#"{"id":10,"user_id":"1","amount":5.5,"note":null}"#
        );
    }

    #[test]
    fn records_can_be_loaded_by_position() {
        let input = orders();
        let positions: Vec<_> = input.positions().unwrap().map(|p| p.unwrap()).collect();
        assert_eq!(positions.len(), 4);

        let mut reader = input.reader().unwrap();
        let last = reader.get(positions[3]).unwrap();
        assert_eq!(last.property("id"), Some(&Value::Integer(20)));
        let second = reader.get(positions[1]).unwrap();
        assert_eq!(second.property("id"), Some(&Value::Integer(11)));
        assert_eq!(input.get(positions[0]).unwrap().property("id"), Some(&Value::Integer(10)));
    }

    #[test]
    fn unknown_parsers_are_reported() {
        let config = CsvConfig {
            ignore_first_row: false,
            delimiter: b',',
            columns: vec![column("id", "money")],
        };
        let parsers = Parsers::new(&[]).unwrap();
        let error = CsvInput::new(
            "users",
            resource("users.csv"),
            true,
            &config,
            &parsers,
            "inputs.users",
        )
        .err()
        .unwrap();
        assert_eq!(
            error.to_string(),
            "inputs.users.columns[0].parser: Unknown parser 'money'"
        );
    }

    #[test]
    fn parse_errors_name_the_column() {
        let config = CsvConfig {
            ignore_first_row: false,
            delimiter: b',',
            columns: vec![column("id", "integer")],
        };
        let parsers = Parsers::new(&[]).unwrap();
        let input = CsvInput::new(
            "users",
            resource("users.csv"),
            true,
            &config,
            &parsers,
            "inputs.users",
        )
        .unwrap();

        let error = input.iterate().unwrap().next().unwrap().err().unwrap();
        assert!(error.to_string().starts_with("Cannot parse column 'id'"));
    }
}
