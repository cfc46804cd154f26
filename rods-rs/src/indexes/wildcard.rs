//! Provides a substring index which is stored in a memory mapped file.
//!
//! The file contains, for each indexed property, a blob of all keys and a table which lists
//! every suffix of every key along with the position of its record. The table is sorted by the
//! suffixes, so that all suffixes starting with a query (which are the keys containing it) form
//! a consecutive range which is located by a binary search.
//!
//! All numbers are stored in little endian:
//! ```text
//! magic       8 bytes    "RODSWIX1"
//! flags       u32        bit 0: ignore case
//! properties  u32        number of property tables
//! per property:
//!   name      u32 length + UTF-8 bytes
//!   blob      u64 offset, u64 length
//!   entries   u64 offset, u64 count
//! per entry (20 bytes):
//!   start     u64        offset of the suffix within the blob
//!   length    u32        length of the suffix
//!   position  u64        position of the record
//! ```
//!
//! The file is rebuilt when the index is opened and the file is missing, older than the input
//! or has been built for other properties or flags. It is first written to a temporary file
//! which then replaces the previous one.
use crate::indexes::{
    empty, fold_case, from_unsorted, join, log_built, scan_keys, verify_query, Filters, Index,
    PositionIter,
};
use crate::inputs::Input;
use crate::record::Position;
use anyhow::Context;
use memmap2::Mmap;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

const MAGIC: &[u8; 8] = b"RODSWIX1";
const FLAG_IGNORE_CASE: u32 = 1;
const ENTRY_SIZE: usize = 20;

/// Provides substring matches backed by a memory mapped file.
pub struct WildcardIndex {
    name: String,
    input: String,
    properties: Vec<String>,
    ignore_case: bool,
    file: MappedFile,
}

impl WildcardIndex {
    /// Opens the index file at the given path, (re-)building it if required.
    pub fn open(
        name: &str,
        input: &dyn Input,
        properties: &[String],
        ignore_case: bool,
        path: PathBuf,
    ) -> anyhow::Result<Self> {
        if path.is_dir() {
            return Err(anyhow::anyhow!(
                "The index file {} of '{}' is a directory",
                path.display(),
                name
            ));
        }

        let file = match current_file(name, &path, input, properties, ignore_case)? {
            Some(file) => {
                log::info!(
                    "Using the existing index file {} for '{}'.",
                    path.display(),
                    name
                );
                file
            }
            None => {
                build(name, &path, input, properties, ignore_case)?;
                let file = MappedFile::open(&path)?;
                if !file.matches(properties, ignore_case) {
                    return Err(anyhow::anyhow!(
                        "The rebuilt index file {} doesn't match the index '{}'",
                        path.display(),
                        name
                    ));
                }
                file
            }
        };

        Ok(WildcardIndex {
            name: name.to_owned(),
            input: input.name().to_owned(),
            properties: properties.to_vec(),
            ignore_case,
            file,
        })
    }
}

impl Index for WildcardIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles_input(&self, input: &str) -> bool {
        self.input == input
    }

    fn handles_property(&self, property: &str) -> bool {
        self.properties.iter().any(|name| name == property)
    }

    fn positions<'a>(
        &'a self,
        input: &'a dyn Input,
        filters: &Filters,
    ) -> anyhow::Result<PositionIter<'a>> {
        verify_query(&self.name, &self.input, &self.properties, input, filters)?;

        let mut iterators = Vec::with_capacity(filters.len());
        for (property, expected) in filters {
            let table = self
                .properties
                .iter()
                .position(|name| name == property)
                .and_then(|index| self.file.tables.get(index));

            match (table, expected.filter_key()) {
                (Some(table), Some(key)) => {
                    let key = fold_case(key.as_ref(), self.ignore_case);
                    iterators.push(from_unsorted(self.file.search(table, key.as_bytes())));
                }
                _ => return Ok(empty()),
            }
        }

        Ok(join(iterators))
    }
}

/// Returns the mapped index file if it exists and is up to date.
fn current_file(
    name: &str,
    path: &Path,
    input: &dyn Input,
    properties: &[String],
    ignore_case: bool,
) -> anyhow::Result<Option<MappedFile>> {
    if !path.exists() {
        log::info!(
            "The index file {} of '{}' doesn't exist yet...",
            path.display(),
            name
        );
        return Ok(None);
    }

    let index_modified = std::fs::metadata(path)?.modified()?;
    let input_modified = std::fs::metadata(input.path())?.modified()?;
    if index_modified < input_modified {
        log::info!(
            "The index file {} of '{}' is older than {}...",
            path.display(),
            name,
            input.path().display()
        );
        return Ok(None);
    }

    match MappedFile::open(path) {
        Ok(file) if file.matches(properties, ignore_case) => Ok(Some(file)),
        Ok(_) => {
            log::info!(
                "The index file {} of '{}' has been built for other properties...",
                path.display(),
                name
            );
            Ok(None)
        }
        Err(error) => {
            log::warn!(
                "The index file {} of '{}' cannot be read: {:#}",
                path.display(),
                name,
                error
            );
            Ok(None)
        }
    }
}

#[derive(Default)]
struct TableBuilder {
    blob: Vec<u8>,
    entries: Vec<(u64, u32, Position)>,
}

impl TableBuilder {
    fn add(&mut self, key: &str, position: Position) {
        let base = self.blob.len() as u64;
        self.blob.extend_from_slice(key.as_bytes());
        for (start, _) in key.char_indices() {
            self.entries
                .push((base + start as u64, (key.len() - start) as u32, position));
        }
    }

    fn suffix(&self, entry: &(u64, u32, Position)) -> &[u8] {
        let start = entry.0 as usize;
        &self.blob[start..start + entry.1 as usize]
    }

    fn sort(&mut self) {
        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_unstable_by(|a, b| {
            self.suffix(a)
                .cmp(self.suffix(b))
                .then_with(|| a.2.cmp(&b.2))
        });
        self.entries = entries;
    }
}

/// Scans the input and writes a new index file.
fn build(
    name: &str,
    path: &Path,
    input: &dyn Input,
    properties: &[String],
    ignore_case: bool,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut tables: Vec<TableBuilder> = properties.iter().map(|_| TableBuilder::default()).collect();
    let records = scan_keys(name, input, properties, ignore_case, |property, key, position| {
        tables[property].add(key, position)
    })?;
    tables.iter_mut().for_each(TableBuilder::sort);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create the directory {}", parent.display()))?;
        }
    }

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);

    let size = write_file(&temp_path, properties, ignore_case, &tables)
        .with_context(|| format!("Cannot write the index file {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Cannot move {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    log_built(name, input, records, started, size);
    Ok(())
}

/// Writes the given tables and returns the size of the file.
fn write_file(
    path: &Path,
    properties: &[String],
    ignore_case: bool,
    tables: &[TableBuilder],
) -> anyhow::Result<usize> {
    let header_size = MAGIC.len()
        + 8
        + properties
            .iter()
            .map(|property| 4 + property.len() + 32)
            .sum::<usize>();

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&(if ignore_case { FLAG_IGNORE_CASE } else { 0 }).to_le_bytes())?;
    writer.write_all(&(properties.len() as u32).to_le_bytes())?;

    let mut offset = header_size as u64;
    for (property, table) in properties.iter().zip(tables) {
        writer.write_all(&(property.len() as u32).to_le_bytes())?;
        writer.write_all(property.as_bytes())?;
        writer.write_all(&offset.to_le_bytes())?;
        writer.write_all(&(table.blob.len() as u64).to_le_bytes())?;
        offset += table.blob.len() as u64;
        writer.write_all(&offset.to_le_bytes())?;
        writer.write_all(&(table.entries.len() as u64).to_le_bytes())?;
        offset += (table.entries.len() * ENTRY_SIZE) as u64;
    }

    for table in tables {
        writer.write_all(&table.blob)?;
        for (start, length, position) in &table.entries {
            writer.write_all(&start.to_le_bytes())?;
            writer.write_all(&length.to_le_bytes())?;
            writer.write_all(&position.to_le_bytes())?;
        }
    }

    writer.flush()?;
    Ok(offset as usize)
}

struct Table {
    property: String,
    blob: Range<usize>,
    entries: usize,
    count: usize,
}

/// Represents a validated and memory mapped index file.
struct MappedFile {
    data: Mmap,
    flags: u32,
    tables: Vec<Table>,
}

impl MappedFile {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
        // The file is only ever replaced by renaming a new file over it, never modified in place.
        let data = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Cannot map {}", path.display()))?;

        if data.get(..MAGIC.len()) != Some(&MAGIC[..]) {
            return Err(anyhow::anyhow!("Invalid file header"));
        }
        let flags = read_u32(&data, 8)?;
        let count = read_u32(&data, 12)? as usize;

        let mut offset = 16;
        let mut tables = Vec::with_capacity(count);
        for _ in 0..count {
            let length = read_u32(&data, offset)? as usize;
            let property = data
                .get(offset + 4..offset + 4 + length)
                .ok_or_else(|| anyhow::anyhow!("The property table is truncated"))?;
            let property = std::str::from_utf8(property)?.to_owned();
            offset += 4 + length;

            let blob_start = read_u64(&data, offset)? as usize;
            let blob_length = read_u64(&data, offset + 8)? as usize;
            let entries = read_u64(&data, offset + 16)? as usize;
            let entry_count = read_u64(&data, offset + 24)? as usize;
            offset += 32;

            let table = Table {
                property,
                blob: blob_start..blob_start + blob_length,
                entries,
                count: entry_count,
            };
            verify_table(&data, &table)?;
            tables.push(table);
        }

        Ok(MappedFile {
            data,
            flags,
            tables,
        })
    }

    fn matches(&self, properties: &[String], ignore_case: bool) -> bool {
        let expected_flags = if ignore_case { FLAG_IGNORE_CASE } else { 0 };
        self.flags == expected_flags
            && self.tables.len() == properties.len()
            && self
                .tables
                .iter()
                .zip(properties)
                .all(|(table, property)| &table.property == property)
    }

    fn entry(&self, table: &Table, index: usize) -> (&[u8], Position) {
        let offset = table.entries + index * ENTRY_SIZE;
        let start = read_u64(&self.data, offset).unwrap_or(0) as usize;
        let length = read_u32(&self.data, offset + 8).unwrap_or(0) as usize;
        let position = read_u64(&self.data, offset + 12).unwrap_or(0);
        let blob = &self.data[table.blob.clone()];

        (blob.get(start..start + length).unwrap_or_default(), position)
    }

    /// Returns the positions of all entries whose suffix starts with the given query.
    fn search(&self, table: &Table, query: &[u8]) -> Vec<Position> {
        let mut low = 0;
        let mut high = table.count;
        while low < high {
            let middle = low + (high - low) / 2;
            if self.entry(table, middle).0.cmp(query) == Ordering::Less {
                low = middle + 1;
            } else {
                high = middle;
            }
        }

        (low..table.count)
            .map(|index| self.entry(table, index))
            .take_while(|(suffix, _)| suffix.starts_with(query))
            .map(|(_, position)| position)
            .collect()
    }
}

/// Ensures that all ranges of the table are within the file so that lookups can't fail.
fn verify_table(data: &[u8], table: &Table) -> anyhow::Result<()> {
    let entries_end = table
        .count
        .checked_mul(ENTRY_SIZE)
        .and_then(|size| size.checked_add(table.entries));
    if table.blob.end > data.len() || entries_end.map_or(true, |end| end > data.len()) {
        return Err(anyhow::anyhow!(
            "The table of '{}' exceeds the file",
            table.property
        ));
    }

    let blob_length = table.blob.len() as u64;
    for index in 0..table.count {
        let offset = table.entries + index * ENTRY_SIZE;
        let start = read_u64(data, offset)?;
        let length = read_u32(data, offset + 8)? as u64;
        if start + length > blob_length {
            return Err(anyhow::anyhow!(
                "The table of '{}' contains an invalid entry",
                table.property
            ));
        }
    }

    Ok(())
}

fn read_u32(data: &[u8], offset: usize) -> anyhow::Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| anyhow::anyhow!("The file is truncated at offset {}", offset))
}

fn read_u64(data: &[u8], offset: usize) -> anyhow::Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| anyhow::anyhow!("The file is truncated at offset {}", offset))
}

#[cfg(test)]
mod tests {
    use crate::indexes::testing::{query, users, users_at};
    use crate::indexes::WildcardIndex;
    use crate::inputs::testing::resource;
    use crate::record::Value;
    use std::path::PathBuf;
    use std::time::Duration;

    fn index_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rods-test-{}-{}.idx",
            std::process::id(),
            name
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn substrings_are_found_in_the_file() {
        let users = users();
        let path = index_file("search");
        let index =
            WildcardIndex::open("search", &users, &["name".to_owned()], true, path.clone())
                .unwrap();
        assert!(path.is_file());

        assert_eq!(query(&index, &users, &[("name", Value::from("o"))]), vec!["2", "3"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("ALI"))]), vec!["1"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("carol"))]), vec!["3"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("olx"))]), Vec::<String>::new());
        assert_eq!(query(&index, &users, &[("name", Value::from(""))]), vec!["1", "2", "3"]);

        // Re-opening uses the existing file...
        let reopened =
            WildcardIndex::open("search", &users, &["name".to_owned()], true, path.clone())
                .unwrap();
        assert_eq!(query(&reopened, &users, &[("name", Value::from("b"))]), vec!["2"]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn outdated_or_broken_files_are_rebuilt() {
        let users = users();
        let path = index_file("rebuild");
        let _ = WildcardIndex::open("rebuild", &users, &["name".to_owned()], false, path.clone())
            .unwrap();

        // Other properties...
        let index = WildcardIndex::open(
            "rebuild",
            &users,
            &["id".to_owned(), "name".to_owned()],
            false,
            path.clone(),
        )
        .unwrap();
        assert_eq!(
            query(&index, &users, &[("id", Value::from("2")), ("name", Value::from("B"))]),
            vec!["2"]
        );
        assert_eq!(query(&index, &users, &[("name", Value::from("b"))]), vec!["2"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("bo"))]), Vec::<String>::new());

        // Garbage...
        std::fs::write(&path, b"definitely not an index").unwrap();
        let index =
            WildcardIndex::open("rebuild", &users, &["name".to_owned()], false, path.clone())
                .unwrap();
        assert_eq!(query(&index, &users, &[("name", Value::from("Car"))]), vec!["3"]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn files_older_than_their_input_are_rebuilt() {
        let csv = std::env::temp_dir().join(format!("rods-test-{}-stale.csv", std::process::id()));
        std::fs::copy(resource("users.csv"), &csv).unwrap();
        let path = index_file("stale");

        let users = users_at(csv.clone());
        let index =
            WildcardIndex::open("stale", &users, &["name".to_owned()], true, path.clone()).unwrap();
        assert_eq!(query(&index, &users, &[("name", Value::from("bob"))]), vec!["2"]);
        drop(index);
        drop(users);

        std::fs::write(&csv, "id,name\n7,Dora\n8,Bobby\n").unwrap();
        let index_modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::fs::File::options()
            .write(true)
            .open(&csv)
            .unwrap()
            .set_modified(index_modified + Duration::from_secs(10))
            .unwrap();

        let users = users_at(csv.clone());
        let index =
            WildcardIndex::open("stale", &users, &["name".to_owned()], true, path.clone()).unwrap();
        assert_eq!(query(&index, &users, &[("name", Value::from("bob"))]), vec!["8"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("dor"))]), vec!["7"]);
        assert!(std::fs::metadata(&path).unwrap().modified().unwrap() >= index_modified);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(&csv);
    }

    #[test]
    fn directories_are_rejected() {
        let users = users();
        assert!(WildcardIndex::open(
            "dir",
            &users,
            &["name".to_owned()],
            false,
            std::env::temp_dir()
        )
        .is_err());
    }
}
