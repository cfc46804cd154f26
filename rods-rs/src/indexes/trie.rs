//! Provides the in-memory suffix trie used by the partial index.
//!
//! Each branch of the trie is labeled with a byte of the UTF-8 representation of a key. A
//! position is stored once for every suffix of every key of its record. Finding all positions
//! whose keys contain a given substring is therefore a prefix search for that substring, which
//! is a walk down the trie followed by a depth first search of the reached sub tree.
use crate::record::Position;
use std::slice::Iter;

/// Maps all suffixes of the indexed keys to the positions of their records.
#[derive(Default)]
pub struct SuffixTrie {
    root: TrieNode,
}

#[derive(Default)]
struct TrieNode {
    branches: Vec<(u8, TrieNode)>,
    positions: Vec<Position>,
}

impl TrieNode {
    /// Computes the additionally allocated memory outside of the node.
    fn allocated_size(&self) -> usize {
        let mut result = self.branches.capacity() * std::mem::size_of::<(u8, TrieNode)>();
        for (_, branch) in self.branches.iter() {
            result += branch.allocated_size();
        }
        result + self.positions.capacity() * std::mem::size_of::<Position>()
    }

    fn num_nodes(&self) -> usize {
        self.branches.len()
            + self
                .branches
                .iter()
                .map(|(_, branch)| branch.num_nodes())
                .sum::<usize>()
    }

    fn find(&self, query: &[u8]) -> Option<&TrieNode> {
        let mut node = self;
        for &ch in query {
            node = &node.branches.iter().find(|branch| branch.0 == ch)?.1;
        }

        Some(node)
    }
}

impl SuffixTrie {
    /// Creates a new and empty trie.
    pub fn new() -> Self {
        SuffixTrie::default()
    }

    /// Stores the position for every non-empty suffix of the given key.
    ///
    /// Suffixes start at character boundaries only. Positions have to be inserted in ascending
    /// order, which permits to skip duplicates (a key which contains a suffix twice or a list of
    /// keys containing the same value) by only looking at the last stored position.
    pub fn insert_suffixes(&mut self, key: &str, position: Position) {
        for (start, _) in key.char_indices() {
            self.insert(&key.as_bytes()[start..], position);
        }
    }

    fn insert(&mut self, key: &[u8], position: Position) {
        let mut node = &mut self.root;
        for &ch in key {
            let index = match node.branches.iter().position(|branch| branch.0 == ch) {
                Some(index) => index,
                None => {
                    node.branches.push((ch, TrieNode::default()));
                    node.branches.len() - 1
                }
            };
            node = &mut node.branches[index].1;
        }

        if node.positions.last() != Some(&position) {
            node.positions.push(position);
        }
    }

    /// Returns the positions of all keys which start with the given prefix.
    ///
    /// The positions are yielded in trie order, so they are neither sorted nor unique.
    pub fn prefix_query(&self, prefix: &str) -> PrefixIter<'_> {
        match self.root.find(prefix.as_bytes()) {
            Some(node) => PrefixIter {
                current: Some(node.positions.iter()),
                stack: vec![(0, node)],
            },
            None => PrefixIter {
                current: None,
                stack: Vec::new(),
            },
        }
    }

    /// Returns the amount of memory (in bytes) used by this trie.
    pub fn allocated_size(&self) -> usize {
        self.root.allocated_size()
    }

    /// Returns the number of nodes in this trie.
    pub fn num_nodes(&self) -> usize {
        self.root.num_nodes()
    }
}

/// Performs a depth first search over a sub tree of a [SuffixTrie].
pub struct PrefixIter<'a> {
    current: Option<Iter<'a, Position>>,
    stack: Vec<(usize, &'a TrieNode)>,
}

impl<'a> Iterator for PrefixIter<'a> {
    type Item = Position;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(position) = self.current.as_mut().and_then(|current| current.next()) {
                return Some(*position);
            }
            self.current = None;

            // Descend into the next branch of the top-most node or pop it once all branches
            // have been visited...
            let top = self.stack.last_mut()?;
            let node: &'a TrieNode = top.1;
            match node.branches.get(top.0) {
                Some((_, child)) => {
                    top.0 += 1;
                    self.stack.push((0, child));
                    self.current = Some(child.positions.iter());
                }
                None => {
                    let _ = self.stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::indexes::trie::SuffixTrie;
    use crate::record::Position;

    fn query(trie: &SuffixTrie, prefix: &str) -> Vec<Position> {
        let mut result: Vec<Position> = trie.prefix_query(prefix).collect();
        result.sort_unstable();
        result.dedup();
        result
    }

    #[test]
    fn substrings_are_found() {
        let mut trie = SuffixTrie::new();
        trie.insert_suffixes("banana", 1);
        trie.insert_suffixes("bandana", 2);
        trie.insert_suffixes("apple", 3);

        assert_eq!(query(&trie, "ana"), vec![1, 2]);
        assert_eq!(query(&trie, "nan"), vec![1]);
        assert_eq!(query(&trie, "dan"), vec![2]);
        assert_eq!(query(&trie, "pl"), vec![3]);
        assert_eq!(query(&trie, "a"), vec![1, 2, 3]);
        assert_eq!(query(&trie, ""), vec![1, 2, 3]);
        assert_eq!(query(&trie, "cherry"), Vec::<Position>::new());
    }

    #[test]
    fn repeated_suffixes_are_stored_once() {
        let mut trie = SuffixTrie::new();
        trie.insert_suffixes("aaa", 7);
        trie.insert_suffixes("aa", 7);

        // "a", "aa" and "aaa" each carry a single position...
        assert_eq!(trie.num_nodes(), 3);
        assert_eq!(trie.prefix_query("aaa").count(), 1);
        assert_eq!(trie.prefix_query("a").count(), 3);
        assert!(trie.allocated_size() > 0);
    }

    #[test]
    fn suffixes_start_at_character_boundaries() {
        let mut trie = SuffixTrie::new();
        trie.insert_suffixes("Köln", 1);

        assert_eq!(query(&trie, "öln"), vec![1]);
        assert_eq!(query(&trie, "ln"), vec![1]);
        // K, ö (two bytes), l and n form the chain of the full key...
        assert_eq!(trie.prefix_query("K").count(), 1);
    }
}
