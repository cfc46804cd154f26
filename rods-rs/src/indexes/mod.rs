//! Provides the indexes which are used to find records matching a set of filters.
//!
//! An [Index] answers a query with a lazy [PositionIter] which yields the positions of all
//! matching records in ascending order. If a query spans several indexes, their results are
//! intersected via [join].
//!
//! Four kinds of indexes are available:
//! * **noop**: Scans the whole input. The built-in index `default` is of this kind and is used
//!   if a parameter or relationship doesn't name an index.
//! * **map**: Keeps a hash map from each value of the indexed properties to the positions of its
//!   records. This supports exact matches.
//! * **partial**: Keeps a suffix trie of the indexed properties to support substring matches.
//! * **wildcard**: Provides the same as **partial** but stores its data in a file which is
//!   memory mapped. This keeps even large indexes out of the heap.
//!
//! All indexes except **noop** are built once when the system starts. Queries never modify them
//! and can therefore run in parallel without any locking.
//!
//! Filter values are compared by their textual representation, so that an integer parameter
//! matches a property which has been parsed as string (and vice versa). List values match if
//! any of their elements matches.
use crate::config::indexes::IndexConfig;
use crate::fmt::{format_duration, format_size};
use crate::inputs::Input;
use crate::record::{Position, Value};
use linked_hash_map::LinkedHashMap;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

mod iter;
mod map;
mod noop;
mod partial;
mod trie;
mod wildcard;

pub use iter::{empty, from_slice, from_unsorted, join, Cancellation, Cancelled, PositionIter};
pub use map::MapIndex;
pub use noop::NoopIndex;
pub use partial::PartialIndex;
pub use wildcard::WildcardIndex;

/// Maps the names of properties to the values they have to match.
pub type Filters = LinkedHashMap<String, Value>;

/// Describes a structure which finds the positions of records by their properties.
pub trait Index: Send + Sync {
    /// Returns the name of this index.
    fn name(&self) -> &str;

    /// Determines if this index can be queried for records of the given input.
    fn handles_input(&self, input: &str) -> bool;

    /// Determines if this index can filter on the given property.
    fn handles_property(&self, property: &str) -> bool;

    /// Returns the positions of all records of the given input which match all filters.
    ///
    /// The result is lazy as far as possible. Substring indexes (**partial** and **wildcard**)
    /// however collect the matching positions of each filter into a sorted list first, as their
    /// matches are found in suffix order rather than in position order.
    fn positions<'a>(
        &'a self,
        input: &'a dyn Input,
        filters: &Filters,
    ) -> anyhow::Result<PositionIter<'a>>;

    /// Same as [positions](Index::positions) but stops an ongoing scan once cancelled.
    ///
    /// Indexes which have to scan their input override this. All others simply rely on the
    /// caller to guard the returned iterator.
    fn scan<'a>(
        &'a self,
        input: &'a dyn Input,
        filters: &Filters,
        _cancellation: &Cancellation,
    ) -> anyhow::Result<PositionIter<'a>> {
        self.positions(input, filters)
    }

    /// Releases all resources held by this index.
    fn close(&self) {}
}

/// Creates the index described by the given config.
///
/// All indexes but noop require the input they index, which is scanned once to build the index.
pub fn create_index(
    name: &str,
    config: &IndexConfig,
    input: Option<&dyn Input>,
    config_path: &str,
) -> anyhow::Result<Arc<dyn Index>> {
    let input = match (config, input) {
        (IndexConfig::Noop, _) => return Ok(Arc::new(NoopIndex::new(name))),
        (_, Some(input)) => input,
        (_, None) => {
            return Err(anyhow::anyhow!(
                "{}.input: The index requires an input",
                config_path
            ))
        }
    };

    for property in config.properties() {
        if !input.has_property(property) {
            return Err(anyhow::anyhow!(
                "{}.properties: The input '{}' has no property '{}'",
                config_path,
                input.name(),
                property
            ));
        }
    }

    Ok(match config {
        IndexConfig::Noop => Arc::new(NoopIndex::new(name)),
        IndexConfig::Map { properties, .. } => Arc::new(MapIndex::new(name, input, properties)?),
        IndexConfig::Partial {
            properties,
            ignore_case,
            ..
        } => Arc::new(PartialIndex::new(name, input, properties, *ignore_case)?),
        IndexConfig::Wildcard {
            properties,
            ignore_case,
            path,
            ..
        } => Arc::new(WildcardIndex::open(
            name,
            input,
            properties,
            *ignore_case,
            path.clone(),
        )?),
    })
}

/// Collects the filters of a request and routes them to their indexes.
///
/// Filters for the same index are combined, so that the index can intersect its own lists. The
/// results of different indexes are intersected via [join]. A query without filters yields all
/// records of the input. The resulting iterator ends with [Cancelled] once the given
/// [Cancellation] fires.
///
/// # Example
/// ```
/// # use rods::indexes::{NoopIndex, Query, Index};
/// # use rods::record::Value;
/// # use std::sync::Arc;
/// let index: Arc<dyn Index> = Arc::new(NoopIndex::new("default"));
/// let mut query = Query::new();
/// assert!(query.is_empty());
///
/// query.filter(&index, "name", Value::from("Bob"));
/// query.filter(&index, "id", Value::Integer(2));
/// assert_eq!(query.len(), 1);
/// ```
#[derive(Default)]
pub struct Query {
    filters: Vec<(Arc<dyn Index>, Filters)>,
}

impl Query {
    /// Creates a new query without any filters.
    pub fn new() -> Self {
        Query::default()
    }

    /// Adds a filter which is handled by the given index.
    pub fn filter(&mut self, index: &Arc<dyn Index>, property: &str, value: Value) {
        let position = self
            .filters
            .iter()
            .position(|(other, _)| other.name() == index.name());
        let filters = match position {
            Some(position) => &mut self.filters[position].1,
            None => {
                self.filters.push((index.clone(), Filters::new()));
                let last = self.filters.len() - 1;
                &mut self.filters[last].1
            }
        };

        let _ = filters.insert(property.to_owned(), value);
    }

    /// Determines if no filter has been added.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns the number of indexes involved.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns the positions of all records of the input which match all filters.
    pub fn execute<'a>(
        &'a self,
        input: &'a dyn Input,
        cancellation: &Cancellation,
    ) -> anyhow::Result<PositionIter<'a>> {
        if self.filters.is_empty() {
            return Ok(cancellation.guard(input.positions()?));
        }

        let mut iterators = Vec::with_capacity(self.filters.len());
        for (index, filters) in &self.filters {
            iterators.push(index.scan(input, filters, cancellation)?);
        }

        Ok(cancellation.guard(join(iterators)))
    }
}

/// Invokes the callback for each key of each indexed property of each record of the input.
///
/// The callback receives the index of the property, the key (folded to lower case if requested)
/// and the position of the record. Positions are reported in ascending order. Returns the number
/// of records which have been scanned.
fn scan_keys<C>(
    index: &str,
    input: &dyn Input,
    properties: &[String],
    ignore_case: bool,
    mut callback: C,
) -> anyhow::Result<usize>
where
    C: FnMut(usize, &str, Position),
{
    let started = Instant::now();
    let mut records = 0;
    for result in input.iterate()? {
        let (position, record) = result?;
        for (property_index, property) in properties.iter().enumerate() {
            if let Some(value) = record.property(property) {
                value.for_each_key(|key| {
                    callback(property_index, fold_case(key, ignore_case).as_ref(), position)
                });
            }
        }

        records += 1;
        if records % 100_000 == 0 {
            log::info!(
                "Building index '{}': Scanned {} records of '{}' in {}...",
                index,
                records,
                input.name(),
                format_duration(started.elapsed())
            );
        }
    }

    Ok(records)
}

/// Logs that an index has been built.
fn log_built(index: &str, input: &dyn Input, records: usize, started: Instant, size: usize) {
    log::info!(
        "Built index '{}' for {} records of '{}' in {} ({}).",
        index,
        records,
        input.name(),
        format_duration(started.elapsed()),
        format_size(size)
    );
}

fn fold_case(key: &str, ignore_case: bool) -> Cow<str> {
    if ignore_case {
        Cow::Owned(key.to_lowercase())
    } else {
        Cow::Borrowed(key)
    }
}

/// Ensures that a query for an index built on `indexed_input` is valid.
fn verify_query(
    index: &str,
    indexed_input: &str,
    properties: &[String],
    input: &dyn Input,
    filters: &Filters,
) -> anyhow::Result<()> {
    if input.name() != indexed_input {
        return Err(anyhow::anyhow!(
            "The index '{}' cannot be used for the input '{}'",
            index,
            input.name()
        ));
    }
    if filters.is_empty() {
        return Err(anyhow::anyhow!(
            "The index '{}' requires at least one filter",
            index
        ));
    }
    for property in filters.keys() {
        if !properties.contains(property) {
            return Err(anyhow::anyhow!(
                "The index '{}' cannot filter on '{}'",
                index,
                property
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::inputs::{ColumnConfig, CsvConfig};
    use crate::indexes::{Filters, Index};
    use crate::inputs::testing::resource;
    use crate::inputs::{CsvInput, Input};
    use crate::parsers::Parsers;
    use crate::record::{Position, Value};
    use std::path::PathBuf;

    /// Opens users.csv with the columns id and name.
    pub fn users() -> CsvInput {
        users_at(resource("users.csv"))
    }

    /// Opens the given CSV file with the columns id and name.
    pub fn users_at(file: PathBuf) -> CsvInput {
        let columns = ["id", "name"]
            .iter()
            .map(|name| ColumnConfig {
                name: name.to_string(),
                parser: "string".to_owned(),
                boolean_values: None,
                decimal_separator: None,
            })
            .collect();
        let config = CsvConfig {
            ignore_first_row: true,
            delimiter: b',',
            columns,
        };
        let parsers = Parsers::new(&[]).unwrap();
        CsvInput::new(
            "users",
            file,
            true,
            &config,
            &parsers,
            "inputs.users",
        )
        .unwrap()
    }

    /// Queries the index and returns the ids of all matching records.
    pub fn query(index: &dyn Index, input: &dyn Input, filters: &[(&str, Value)]) -> Vec<String> {
        let filters: Filters = filters
            .iter()
            .map(|(property, value)| (property.to_string(), value.clone()))
            .collect();
        let positions: Vec<Position> = index
            .positions(input, &filters)
            .unwrap()
            .map(|position| position.unwrap())
            .collect();

        positions
            .iter()
            .map(|position| input.get(*position).unwrap().property("id").unwrap().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::indexes::IndexConfig;
    use crate::indexes::testing::{query, users};
    use crate::indexes::{create_index, Cancellation, Index, MapIndex, PartialIndex, Query};
    use crate::record::Value;
    use std::sync::Arc;

    #[test]
    fn indexes_are_created_from_their_config() {
        let users = users();
        let index = create_index(
            "by_name",
            &IndexConfig::Map {
                input: "users".to_owned(),
                properties: vec!["name".to_owned()],
            },
            Some(&users),
            "indexes.by_name",
        )
        .unwrap();

        assert_eq!(index.name(), "by_name");
        assert!(index.handles_input("users"));
        assert!(!index.handles_input("orders"));
        assert!(index.handles_property("name"));
        assert!(!index.handles_property("id"));
        assert_eq!(query(index.as_ref(), &users, &[("name", Value::from("Bob"))]), vec!["2"]);
    }

    #[test]
    fn queries_join_several_indexes() {
        let users = users();
        let by_name: Arc<dyn Index> = Arc::new(
            MapIndex::new("by_name", &users, &["name".to_owned()]).unwrap(),
        );
        let search: Arc<dyn Index> = Arc::new(
            PartialIndex::new("search", &users, &["name".to_owned()], true).unwrap(),
        );
        let ids = |query: &Query| -> Vec<u64> {
            query
                .execute(&users, &Cancellation::never())
                .unwrap()
                .map(|position| position.unwrap())
                .collect()
        };

        let all = ids(&Query::new());
        assert_eq!(all.len(), 3);

        let mut query = Query::new();
        query.filter(&search, "name", Value::from("O"));
        assert_eq!(ids(&query), vec![all[1], all[2]]);

        query.filter(&by_name, "name", Value::from("Carol"));
        assert_eq!(query.len(), 2);
        assert_eq!(ids(&query), vec![all[2]]);

        query.filter(&by_name, "name", Value::from("Alice"));
        assert_eq!(query.len(), 2);
        assert_eq!(ids(&query), Vec::<u64>::new());
    }

    #[test]
    fn unknown_properties_are_rejected() {
        let users = users();
        let error = create_index(
            "by_age",
            &IndexConfig::Partial {
                input: "users".to_owned(),
                properties: vec!["age".to_owned()],
                ignore_case: false,
            },
            Some(&users),
            "indexes.by_age",
        )
        .err()
        .unwrap();

        assert_eq!(
            error.to_string(),
            "indexes.by_age.properties: The input 'users' has no property 'age'"
        );
    }
}
