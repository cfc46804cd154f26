use crate::indexes::{empty, from_slice, join, scan_keys, verify_query, Filters, Index, PositionIter};
use crate::inputs::Input;
use crate::record::Position;
use fnv::FnvHashMap;
use std::time::Instant;

/// Provides exact matches by keeping a hash map per property.
///
/// Each map points from a key to the ascending list of positions of all records carrying it. A
/// query with several filters intersects these lists lazily.
pub struct MapIndex {
    name: String,
    input: String,
    properties: Vec<String>,
    tables: Vec<FnvHashMap<String, Vec<Position>>>,
}

impl MapIndex {
    /// Builds a new index for the given properties by scanning the input.
    pub fn new(name: &str, input: &dyn Input, properties: &[String]) -> anyhow::Result<Self> {
        let started = Instant::now();
        let mut tables: Vec<FnvHashMap<String, Vec<Position>>> =
            vec![FnvHashMap::default(); properties.len()];

        let records = scan_keys(name, input, properties, false, |property, key, position| {
            let table = &mut tables[property];
            if !table.contains_key(key) {
                let _ = table.insert(key.to_owned(), Vec::new());
            }
            if let Some(positions) = table.get_mut(key) {
                if positions.last() != Some(&position) {
                    positions.push(position);
                }
            }
        })?;

        let size = tables
            .iter()
            .flat_map(|table| table.iter())
            .map(|(key, positions)| {
                key.capacity() + positions.capacity() * std::mem::size_of::<Position>()
            })
            .sum();
        super::log_built(name, input, records, started, size);

        Ok(MapIndex {
            name: name.to_owned(),
            input: input.name().to_owned(),
            properties: properties.to_vec(),
            tables,
        })
    }
}

impl Index for MapIndex {
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
                .map(|index| &self.tables[index]);
            let positions = expected
                .filter_key()
                .and_then(|key| table.and_then(|table| table.get(key.as_ref())));

            match positions {
                Some(positions) => iterators.push(from_slice(positions)),
                None => return Ok(empty()),
            }
        }

        Ok(join(iterators))
    }
}

#[cfg(test)]
mod tests {
    use crate::indexes::testing::{query, users};
    use crate::indexes::{Filters, Index, MapIndex};
    use crate::record::Value;

    #[test]
    fn exact_matches_are_found() {
        let users = users();
        let index =
            MapIndex::new("by_id_and_name", &users, &["id".to_owned(), "name".to_owned()]).unwrap();

        assert_eq!(query(&index, &users, &[("name", Value::from("Bob"))]), vec!["2"]);
        assert_eq!(query(&index, &users, &[("id", Value::Integer(3))]), vec!["3"]);
        assert_eq!(
            query(&index, &users, &[("id", Value::from("1")), ("name", Value::from("Alice"))]),
            vec!["1"]
        );
        assert_eq!(
            query(&index, &users, &[("id", Value::from("1")), ("name", Value::from("Bob"))]),
            Vec::<String>::new()
        );
        assert_eq!(query(&index, &users, &[("name", Value::from("bob"))]), Vec::<String>::new());
        assert_eq!(query(&index, &users, &[("name", Value::Null)]), Vec::<String>::new());
    }

    #[test]
    fn invalid_queries_are_rejected() {
        let users = users();
        let index = MapIndex::new("by_name", &users, &["name".to_owned()]).unwrap();

        assert!(index.positions(&users, &Filters::new()).is_err());

        let mut filters = Filters::new();
        let _ = filters.insert("id".to_owned(), Value::from("1"));
        assert_eq!(
            index.positions(&users, &filters).err().unwrap().to_string(),
            "The index 'by_name' cannot filter on 'id'"
        );
    }
}
