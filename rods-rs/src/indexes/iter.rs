//! Provides lazy position iterators and their intersection.
//!
//! All indexes answer queries with a [PositionIter] which yields positions in ascending order.
//! Several of these can be intersected by [join] without buffering more than a single position
//! per iterator.
//!
//! Scans can be tied to a [Cancellation], which ends them as soon as nobody is interested in
//! their results anymore.
//!
//! # Example
//! ```
//! # use rods::indexes::{join, PositionIter};
//! let a: PositionIter = Box::new(vec![1, 3, 5, 7, 9].into_iter().map(Ok));
//! let b: PositionIter = Box::new(vec![2, 3, 4, 7, 8].into_iter().map(Ok));
//!
//! let joined: Vec<u64> = join(vec![a, b]).map(|p| p.unwrap()).collect();
//! assert_eq!(joined, vec![3, 7]);
//! ```
use crate::record::Position;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Represents a lazy sequence of ascending positions.
pub type PositionIter<'a> = Box<dyn Iterator<Item = anyhow::Result<Position>> + 'a>;

/// Returns an iterator which yields nothing.
pub fn empty<'a>() -> PositionIter<'a> {
    Box::new(std::iter::empty())
}

/// Turns an ascending slice of positions into an iterator.
pub fn from_slice(positions: &[Position]) -> PositionIter<'_> {
    Box::new(positions.iter().copied().map(Ok))
}

/// Turns a list of positions into an ascending iterator, sorting and de-duplicating it first.
pub fn from_unsorted<'a>(mut positions: Vec<Position>) -> PositionIter<'a> {
    positions.sort_unstable();
    positions.dedup();
    Box::new(positions.into_iter().map(Ok))
}

/// Intersects the given iterators.
///
/// The result contains each position which is yielded by all iterators, again in ascending
/// order. It ends as soon as one of the iterators ends and reports the first error encountered
/// (after which it ends as well).
pub fn join(mut iterators: Vec<PositionIter<'_>>) -> PositionIter<'_> {
    if iterators.len() <= 1 {
        return iterators.pop().unwrap_or_else(empty);
    }

    let heads = vec![None; iterators.len()];
    Box::new(Join {
        iterators,
        heads,
        done: false,
    })
}

struct Join<'a> {
    iterators: Vec<PositionIter<'a>>,
    heads: Vec<Option<Position>>,
    done: bool,
}

impl Join<'_> {
    /// Fills all empty heads. Returns false if any iterator is exhausted.
    fn fill_heads(&mut self) -> anyhow::Result<bool> {
        for (iterator, head) in self.iterators.iter_mut().zip(self.heads.iter_mut()) {
            if head.is_none() {
                match iterator.next() {
                    Some(position) => *head = Some(position?),
                    None => return Ok(false),
                }
            }
        }

        Ok(true)
    }
}

impl Iterator for Join<'_> {
    type Item = anyhow::Result<Position>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.fill_heads() {
                Ok(true) => {}
                Ok(false) => self.done = true,
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            }
            if self.done {
                break;
            }

            let max = self.heads.iter().flatten().copied().max()?;
            if self.heads.iter().all(|head| *head == Some(max)) {
                self.heads.iter_mut().for_each(|head| *head = None);
                return Some(Ok(max));
            }

            for head in self.heads.iter_mut() {
                if head.map_or(false, |position| position < max) {
                    *head = None;
                }
            }
        }

        None
    }
}

/// Reports that a scan has been stopped via its [Cancellation].
#[derive(Debug)]
pub struct Cancelled;

impl Display for Cancelled {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "The client is no longer connected")
    }
}

impl Error for Cancelled {}

/// Determines if the results of a scan are still needed.
///
/// # Example
/// ```
/// # use rods::indexes::{Cancellation, Cancelled, PositionIter};
/// let positions: PositionIter = Box::new((0..1_000_000).map(Ok));
/// let mut guarded = Cancellation::new(|| true).guard(positions);
///
/// assert!(guarded.next().unwrap().unwrap_err().is::<Cancelled>());
/// assert!(guarded.next().is_none());
/// ```
#[derive(Clone, Default)]
pub struct Cancellation {
    check: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
}

impl Cancellation {
    /// Returns a cancellation which never fires.
    pub fn never() -> Self {
        Cancellation::default()
    }

    /// Creates a cancellation which fires once the given check returns true.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Cancellation {
            check: Some(Arc::new(check)),
        }
    }

    /// Determines if the results are no longer needed.
    pub fn is_cancelled(&self) -> bool {
        self.check.as_ref().map_or(false, |check| check())
    }

    /// Wraps the given iterator so that it fails with [Cancelled] and ends once cancelled.
    pub fn guard<'a, T: 'a>(
        &self,
        iter: Box<dyn Iterator<Item = anyhow::Result<T>> + 'a>,
    ) -> Box<dyn Iterator<Item = anyhow::Result<T>> + 'a> {
        if self.check.is_none() {
            return iter;
        }

        Box::new(Guarded {
            cancellation: self.clone(),
            iter,
            done: false,
        })
    }
}

struct Guarded<I> {
    cancellation: Cancellation,
    iter: I,
    done: bool,
}

impl<T, I: Iterator<Item = anyhow::Result<T>>> Iterator for Guarded<I> {
    type Item = anyhow::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancellation.is_cancelled() {
            self.done = true;
            return Some(Err(Cancelled.into()));
        }

        self.iter.next()
    }
}

#[cfg(test)]
mod tests {
    use crate::indexes::iter::{from_unsorted, join, Cancellation, Cancelled, PositionIter};
    use crate::record::Position;
    use std::sync::Arc;

    fn iter(positions: &[Position]) -> PositionIter<'_> {
        Box::new(positions.iter().copied().map(Ok))
    }

    fn collect(iter: PositionIter) -> Vec<Position> {
        iter.map(|position| position.unwrap()).collect()
    }

    #[test]
    fn join_yields_the_sorted_intersection() {
        let a = [1, 2, 4, 8, 16, 32];
        let b = [2, 4, 6, 8, 10, 12, 14, 16];
        let c = [0, 4, 16, 64];

        assert_eq!(collect(join(vec![iter(&a), iter(&b)])), vec![2, 4, 8, 16]);
        assert_eq!(collect(join(vec![iter(&a), iter(&b), iter(&c)])), vec![4, 16]);
        assert_eq!(collect(join(vec![iter(&a)])), a.to_vec());
        assert_eq!(collect(join(vec![iter(&a), iter(&[])])), Vec::<Position>::new());
        assert_eq!(collect(join(vec![])), Vec::<Position>::new());
    }

    #[test]
    fn join_stops_once_any_iterator_ends() {
        let mut pulled = 0;
        let counting: PositionIter = Box::new((0..1_000_000).map(|position| {
            pulled += 1;
            Ok(position)
        }));
        let short = [3, 5];

        assert_eq!(collect(join(vec![counting, iter(&short)])), vec![3, 5]);
        assert!(pulled < 10);
    }

    #[test]
    fn join_propagates_errors() {
        let failing: PositionIter = Box::new(
            vec![Ok(1), Ok(2), Err(anyhow::anyhow!("broken")), Ok(3)].into_iter(),
        );
        let all = [1, 2, 3];

        let mut joined = join(vec![failing, iter(&all)]);
        assert_eq!(joined.next().unwrap().unwrap(), 1);
        assert_eq!(joined.next().unwrap().unwrap(), 2);
        assert_eq!(joined.next().unwrap().err().unwrap().to_string(), "broken");
        assert!(joined.next().is_none());
    }

    #[test]
    fn cancelled_scans_stop_immediately() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let cancellation = Cancellation::new(move || flag.load(Ordering::Relaxed));
        let mut guarded = cancellation.guard(Box::new((0..1_000_000_u64).map(Ok)) as PositionIter);

        assert_eq!(guarded.next().unwrap().unwrap(), 0);
        assert_eq!(guarded.next().unwrap().unwrap(), 1);
        cancelled.store(true, Ordering::Relaxed);
        assert!(guarded.next().unwrap().unwrap_err().is::<Cancelled>());
        assert!(guarded.next().is_none());

        assert!(!Cancellation::never().is_cancelled());
        assert_eq!(collect(Cancellation::never().guard(iter(&[1, 2]))), vec![1, 2]);
    }

    #[test]
    fn unsorted_positions_are_normalized() {
        assert_eq!(collect(from_unsorted(vec![9, 1, 4, 1, 9])), vec![1, 4, 9]);
    }
}
