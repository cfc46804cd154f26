use crate::indexes::{Cancellation, Filters, Index, PositionIter};
use crate::inputs::Input;

/// Scans the whole input.
///
/// Without filters, this yields the position of every record. If filters are given, each record
/// is loaded and checked, which is slow but correct for parameters bound to the default index.
pub struct NoopIndex {
    name: String,
}

impl NoopIndex {
    /// Creates a new noop index with the given name.
    pub fn new(name: &str) -> Self {
        NoopIndex {
            name: name.to_owned(),
        }
    }
}

impl Index for NoopIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles_input(&self, _input: &str) -> bool {
        true
    }

    fn handles_property(&self, _property: &str) -> bool {
        true
    }

    fn positions<'a>(
        &'a self,
        input: &'a dyn Input,
        filters: &Filters,
    ) -> anyhow::Result<PositionIter<'a>> {
        self.scan(input, filters, &Cancellation::never())
    }

    fn scan<'a>(
        &'a self,
        input: &'a dyn Input,
        filters: &Filters,
        cancellation: &Cancellation,
    ) -> anyhow::Result<PositionIter<'a>> {
        if filters.is_empty() {
            return Ok(cancellation.guard(input.positions()?));
        }

        // Records which don't match yield nothing, so the scan itself has to be guarded...
        let filters = filters.clone();
        Ok(Box::new(cancellation.guard(input.iterate()?).filter_map(move |result| {
            match result {
                Ok((position, record)) => {
                    let matching = filters.iter().all(|(property, expected)| {
                        record
                            .property(property)
                            .map_or(false, |value| value.matches(expected))
                    });
                    if matching {
                        Some(Ok(position))
                    } else {
                        None
                    }
                }
                Err(error) => Some(Err(error)),
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use crate::indexes::testing::{query, users};
    use crate::indexes::{Cancellation, Cancelled, Filters, Index, NoopIndex};
    use crate::record::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn scans_all_records() {
        let users = users();
        let index = NoopIndex::new("default");
        assert!(index.handles_input("anything"));
        assert!(index.handles_property("anything"));

        assert_eq!(query(&index, &users, &[]), vec!["1", "2", "3"]);
    }

    #[test]
    fn filters_are_checked_per_record() {
        let users = users();
        let index = NoopIndex::new("default");

        assert_eq!(query(&index, &users, &[("name", Value::from("Carol"))]), vec!["3"]);
        assert_eq!(query(&index, &users, &[("id", Value::Integer(1))]), vec!["1"]);
        assert_eq!(
            query(&index, &users, &[("id", Value::Integer(1)), ("name", Value::from("Bob"))]),
            Vec::<String>::new()
        );
        assert_eq!(query(&index, &users, &[("name", Value::Null)]), Vec::<String>::new());
    }

    #[test]
    fn cancelled_scans_stop_without_reading_further_records() {
        let users = users();
        let index = NoopIndex::new("default");
        let mut filters = Filters::new();
        let _ = filters.insert("name".to_owned(), Value::from("Nobody"));

        let checks = Arc::new(AtomicUsize::new(0));
        let counter = checks.clone();
        let cancellation = Cancellation::new(move || counter.fetch_add(1, Ordering::Relaxed) > 0);

        let mut positions = index.scan(&users, &filters, &cancellation).unwrap();
        assert!(positions.next().unwrap().unwrap_err().is::<Cancelled>());
        assert!(positions.next().is_none());
        assert_eq!(checks.load(Ordering::Relaxed), 2);
    }
}
