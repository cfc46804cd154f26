use crate::indexes::trie::SuffixTrie;
use crate::indexes::{
    empty, fold_case, from_unsorted, join, scan_keys, verify_query, Filters, Index, PositionIter,
};
use crate::inputs::Input;
use std::time::Instant;

/// Provides substring matches by keeping a suffix trie per property.
///
/// A filter value matches each record which has a key containing it. If the index ignores the
/// case, both the keys and the filter values are folded to lower case.
pub struct PartialIndex {
    name: String,
    input: String,
    properties: Vec<String>,
    ignore_case: bool,
    tries: Vec<SuffixTrie>,
}

impl PartialIndex {
    /// Builds a new index for the given properties by scanning the input.
    pub fn new(
        name: &str,
        input: &dyn Input,
        properties: &[String],
        ignore_case: bool,
    ) -> anyhow::Result<Self> {
        let started = Instant::now();
        let mut tries: Vec<SuffixTrie> = properties.iter().map(|_| SuffixTrie::new()).collect();

        let records = scan_keys(name, input, properties, ignore_case, |property, key, position| {
            tries[property].insert_suffixes(key, position)
        })?;

        let size = tries.iter().map(SuffixTrie::allocated_size).sum();
        log::debug!(
            "The index '{}' uses {} trie nodes.",
            name,
            tries.iter().map(SuffixTrie::num_nodes).sum::<usize>()
        );
        super::log_built(name, input, records, started, size);

        Ok(PartialIndex {
            name: name.to_owned(),
            input: input.name().to_owned(),
            properties: properties.to_vec(),
            ignore_case,
            tries,
        })
    }
}

impl Index for PartialIndex {
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
            let trie = self
                .properties
                .iter()
                .position(|name| name == property)
                .map(|index| &self.tries[index]);

            match (trie, expected.filter_key()) {
                (Some(trie), Some(key)) => {
                    let key = fold_case(key.as_ref(), self.ignore_case);
                    iterators.push(from_unsorted(trie.prefix_query(key.as_ref()).collect()));
                }
                _ => return Ok(empty()),
            }
        }

        Ok(join(iterators))
    }
}

#[cfg(test)]
mod tests {
    use crate::indexes::testing::{query, users};
    use crate::indexes::PartialIndex;
    use crate::record::Value;

    #[test]
    fn substrings_are_matched() {
        let users = users();
        let index = PartialIndex::new("search", &users, &["name".to_owned()], false).unwrap();

        assert_eq!(query(&index, &users, &[("name", Value::from("o"))]), vec!["2", "3"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("lic"))]), vec!["1"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("Al"))]), vec!["1"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("al"))]), Vec::<String>::new());
        assert_eq!(query(&index, &users, &[("name", Value::from("x"))]), Vec::<String>::new());
    }

    #[test]
    fn case_can_be_ignored() {
        let users = users();
        let index = PartialIndex::new(
            "search",
            &users,
            &["id".to_owned(), "name".to_owned()],
            true,
        )
        .unwrap();

        assert_eq!(query(&index, &users, &[("name", Value::from("O"))]), vec!["2", "3"]);
        assert_eq!(query(&index, &users, &[("name", Value::from("aLi"))]), vec!["1"]);
        assert_eq!(
            query(&index, &users, &[("name", Value::from("o")), ("id", Value::Integer(3))]),
            vec!["3"]
        );
    }
}
