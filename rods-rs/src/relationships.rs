//! Resolves the relationships of records.
//!
//! A relationship joins a parent record with the records of another input. Each match rule
//! takes the value of a parent property and filters a child property via an index. All rules
//! which use the same index are handed to it at once, the results of different indexes are
//! intersected. Without any rules, all records of the child input are joined.
//!
//! The joined records are optionally sorted and limited and then attached to the parent, either
//! as list (`isArray`) or as single object (or null if nothing matched). As each child record can
//! have relationships of its own, the resolution is performed recursively. The depth of this
//! recursion is limited when the configuration is loaded.
//!
//! Records are loaded via a [Session] which keeps one [RecordReader] per input for the duration
//! of a request, so that files aren't re-opened for every single record. The session also carries
//! the [Cancellation] of the request, so that the scans of all relationships stop once the client
//! went away.
use crate::config::outputs::{Relationship, SortKey};
use crate::indexes::{Cancellation, Index, Query};
use crate::inputs::{Input, RecordReader};
use crate::parsers::compare;
use crate::record::{Position, Record, Value};
use crate::registry::Registry;
use fnv::FnvHashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// Keeps the readers used to load records while handling a request.
#[derive(Default)]
pub struct Session<'a> {
    readers: FnvHashMap<String, Box<dyn RecordReader + 'a>>,
    cancellation: Cancellation,
}

impl<'a> Session<'a> {
    /// Creates a new session whose scans stop once the given cancellation fires.
    pub fn new(cancellation: Cancellation) -> Self {
        Session {
            readers: FnvHashMap::default(),
            cancellation,
        }
    }

    /// Loads the record at the given position of the given input.
    pub fn load(&mut self, input: &'a dyn Input, position: Position) -> anyhow::Result<Record> {
        if !self.readers.contains_key(input.name()) {
            let _ = self
                .readers
                .insert(input.name().to_owned(), input.reader()?);
        }

        match self.readers.get_mut(input.name()) {
            Some(reader) => reader.get(position),
            None => input.get(position),
        }
    }
}

struct Rule {
    parent_property: String,
    child_property: String,
    index: Arc<dyn Index>,
}

/// Represents a relationship whose input and indexes have been resolved.
pub struct Relation {
    name: String,
    input: Arc<dyn Input>,
    is_array: bool,
    limit: usize,
    sort: Vec<SortKey>,
    rules: Vec<Rule>,
    relations: Vec<Relation>,
}

impl Relation {
    /// Resolves and verifies the given relationships of records of `parent`.
    ///
    /// The `path` is the location of the relationships within the config and is used to report
    /// errors.
    pub fn compile_all(
        configs: &[Relationship],
        parent: &dyn Input,
        registry: &Registry,
        path: &str,
    ) -> anyhow::Result<Vec<Relation>> {
        configs
            .iter()
            .map(|config| {
                Relation::compile(
                    config,
                    parent,
                    registry,
                    &format!("{}.{}", path, config.name),
                )
            })
            .collect()
    }

    fn compile(
        config: &Relationship,
        parent: &dyn Input,
        registry: &Registry,
        path: &str,
    ) -> anyhow::Result<Relation> {
        let input = registry.input(&config.input, &format!("{}.input", path))?;

        let mut rules = Vec::with_capacity(config.matches.len());
        for (index, rule) in config.matches.iter().enumerate() {
            let rule_path = format!("{}.match[{}]", path, index);
            if !parent.has_property(&rule.parent_property) {
                return Err(anyhow::anyhow!(
                    "{}.parentProperty: The input '{}' has no property '{}'",
                    rule_path,
                    parent.name(),
                    rule.parent_property
                ));
            }
            rules.push(Rule {
                parent_property: rule.parent_property.clone(),
                child_property: rule.child_property.clone(),
                index: registry.filter_index(
                    &rule.child_index,
                    input.as_ref(),
                    &rule.child_property,
                    &format!("{}.childIndex", rule_path),
                )?,
            });
        }

        for (index, key) in config.sort.iter().enumerate() {
            if !input.has_property(&key.property) {
                return Err(anyhow::anyhow!(
                    "{}.sort[{}].property: The input '{}' has no property '{}'",
                    path,
                    index,
                    input.name(),
                    key.property
                ));
            }
        }

        let relations = Relation::compile_all(
            &config.relationships,
            input.as_ref(),
            registry,
            &format!("{}.relationships", path),
        )?;

        Ok(Relation {
            name: config.name.clone(),
            input,
            is_array: config.is_array,
            limit: config.limit,
            sort: config.sort.clone(),
            rules,
            relations,
        })
    }

    /// Returns the name of the property which receives the result.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Computes the value of this relationship for the given parent record.
    pub fn resolve<'a>(
        &'a self,
        session: &mut Session<'a>,
        parent: &Record,
    ) -> anyhow::Result<Value> {
        let mut query = Query::new();
        for rule in &self.rules {
            let value = parent.property(&rule.parent_property).ok_or_else(|| {
                anyhow::anyhow!(
                    "The relationship '{}' requires the property '{}' which is missing",
                    self.name,
                    rule.parent_property
                )
            })?;
            query.filter(&rule.index, &rule.child_property, value.clone());
        }

        // Without sorting, we can stop as soon as enough records have been found...
        let wanted = match (self.sort.is_empty(), self.is_array) {
            (true, true) if self.limit > 0 => Some(self.limit),
            (true, false) => Some(1),
            _ => None,
        };

        let mut children = Vec::new();
        for position in query.execute(self.input.as_ref(), &session.cancellation)? {
            children.push(session.load(self.input.as_ref(), position?)?);
            if wanted.map_or(false, |wanted| children.len() >= wanted) {
                break;
            }
        }

        sort(&mut children, &self.sort)?;
        let count = match (self.is_array, self.limit) {
            (true, 0) => children.len(),
            (true, limit) => limit,
            (false, _) => 1,
        };
        children.truncate(count);

        for child in children.iter_mut() {
            resolve_all(&self.relations, session, child)?;
        }

        if self.is_array {
            Ok(Value::List(
                children.into_iter().map(Record::into_value).collect(),
            ))
        } else {
            Ok(children
                .into_iter()
                .next()
                .map(Record::into_value)
                .unwrap_or(Value::Null))
        }
    }
}

/// Resolves the given relationships and attaches their values to the record.
pub fn resolve_all<'a>(
    relations: &'a [Relation],
    session: &mut Session<'a>,
    record: &mut Record,
) -> anyhow::Result<()> {
    for relation in relations {
        let value = relation.resolve(session, record)?;
        record.insert(relation.name.as_str(), value);
    }

    Ok(())
}

/// Sorts the records by the given keys.
///
/// Fails if two values of a key cannot be compared (e.g. a string and an integer).
fn sort(records: &mut [Record], keys: &[SortKey]) -> anyhow::Result<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let null = Value::Null;
    let mut error = None;
    records.sort_by(|a, b| {
        for key in keys {
            let left = a.property(&key.property).unwrap_or(&null);
            let right = b.property(&key.property).unwrap_or(&null);
            match compare(left, right) {
                Ok(Ordering::Equal) => continue,
                Ok(ordering) if key.ascending => return ordering,
                Ok(ordering) => return ordering.reverse(),
                Err(compare_error) => {
                    let _ = error.get_or_insert(compare_error);
                    return Ordering::Equal;
                }
            }
        }

        Ordering::Equal
    });

    match error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::outputs::SortKey;
    use crate::record::{Record, Value};
    use crate::relationships::sort;

    fn record(id: i64, group: &str) -> Record {
        let mut record = Record::new();
        record.insert("id", Value::Integer(id));
        record.insert("group", Value::from(group));
        record
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records
            .iter()
            .map(|record| record.property("id").and_then(Value::as_int).unwrap())
            .collect()
    }

    fn key(property: &str, ascending: bool) -> SortKey {
        SortKey {
            property: property.to_owned(),
            ascending,
        }
    }

    #[test]
    fn records_are_sorted_by_all_keys() {
        let mut records = vec![record(1, "b"), record(2, "a"), record(3, "b"), record(4, "a")];

        sort(&mut records, &[key("id", false)]).unwrap();
        assert_eq!(ids(&records), vec![4, 3, 2, 1]);

        sort(&mut records, &[key("group", true), key("id", true)]).unwrap();
        assert_eq!(ids(&records), vec![2, 4, 1, 3]);

        sort(&mut records, &[key("group", false), key("id", false)]).unwrap();
        assert_eq!(ids(&records), vec![3, 1, 4, 2]);
    }

    #[test]
    fn incomparable_values_are_reported() {
        let mut records = vec![record(1, "a"), record(2, "b")];
        records[1].insert("group", Value::Integer(7));

        let error = sort(&mut records, &[key("group", true)]).err().unwrap();
        assert!(error.to_string().starts_with("Cannot compare"));
    }
}
