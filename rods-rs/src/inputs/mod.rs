//! Provides access to the files which contain the actual records.
//!
//! An [Input] owns a single file and knows how to turn its contents into [Records](Record).
//! Each record is addressed by a [Position] which is stable as long as the file isn't modified.
//! Positions are ascending in file order, which is what permits the indexes to intersect their
//! results lazily.
//!
//! Inputs never keep records in memory. Sequential access is provided by
//! [iterate](Input::iterate), random access by a [RecordReader] which keeps its own file handle
//! and is therefore owned by a single request.
use crate::config::inputs::{InputConfig, InputFormat};
use crate::indexes::PositionIter;
use crate::parsers::Parsers;
use crate::record::{Position, Record};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod csv;
mod json;
mod xml;
mod xpath;

pub use self::csv::CsvInput;
pub use self::json::JsonInput;
pub use self::xml::XmlInput;
pub use self::xpath::XPath;

/// Represents a lazy sequence of records along with their positions in file order.
pub type RecordIter<'a> = Box<dyn Iterator<Item = anyhow::Result<(Position, Record)>> + 'a>;

/// Provides random access to the records of an input.
pub trait RecordReader {
    /// Loads the record at the given position.
    fn get(&mut self, position: Position) -> anyhow::Result<Record>;
}

/// Describes a file which provides records.
pub trait Input: Send + Sync {
    /// Returns the name of this input.
    fn name(&self) -> &str;

    /// Returns the location of the underlying file.
    fn path(&self) -> &Path;

    /// Determines if the system has to be stopped once the file changes.
    fn die_on_change(&self) -> bool;

    /// Determines if records of this input can provide the given property.
    fn has_property(&self, property: &str) -> bool;

    /// Returns the number of records.
    fn size(&self) -> usize;

    /// Creates a reader which provides random access to the records.
    fn reader(&self) -> anyhow::Result<Box<dyn RecordReader + '_>>;

    /// Loads a single record.
    ///
    /// Note that this opens the file for each call. Use a [RecordReader] to load several records.
    fn get(&self, position: Position) -> anyhow::Result<Record> {
        self.reader()?.get(position)
    }

    /// Iterates over all records in file order.
    fn iterate(&self) -> anyhow::Result<RecordIter<'_>>;

    /// Iterates over the positions of all records in file order.
    fn positions(&self) -> anyhow::Result<PositionIter<'_>> {
        Ok(Box::new(
            self.iterate()?.map(|result| result.map(|(position, _)| position)),
        ))
    }

    /// Releases all resources held by this input.
    fn close(&self) {}
}

/// Creates the input described by the given config.
///
/// The `path` is the location of the file (already resolved against its source) and
/// `config_path` the location of the input within the configuration, used for error messages.
pub fn create_input(
    name: &str,
    config: &InputConfig,
    path: PathBuf,
    parsers: &Parsers,
    config_path: &str,
) -> anyhow::Result<Arc<dyn Input>> {
    if !path.is_file() {
        return Err(anyhow::anyhow!(
            "{}.file: {} does not exist or isn't a file",
            config_path,
            path.display()
        ));
    }

    Ok(match &config.format {
        InputFormat::Csv(csv) => Arc::new(CsvInput::new(
            name,
            path,
            config.die_on_input_change,
            csv,
            parsers,
            config_path,
        )?),
        InputFormat::Json => Arc::new(JsonInput::new(name, path, config.die_on_input_change)?),
        InputFormat::Xml(xml) => Arc::new(XmlInput::new(
            name,
            path,
            config.die_on_input_change,
            xml,
            parsers,
            config_path,
        )?),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::PathBuf;

    /// Returns the location of the given test resource.
    pub fn resource(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("resources")
            .join("test")
            .join(name)
    }
}
