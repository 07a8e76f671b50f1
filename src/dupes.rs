//! Near-duplicate grouping: a union-find over perceptual hashes.
//!
//! Files are equivalent when their pHashes are within a fixed Hamming
//! distance. The index is an arena keyed by dense insertion order; the
//! persisted group rows are a snapshot of its equivalence classes.

use std::collections::HashMap;

use crate::db::FileId;

/// Default Hamming threshold on the 64-bit pHash.
pub const DEFAULT_THRESHOLD: u32 = 6;

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

pub struct DuplicateIndex {
    ids: Vec<FileId>,
    hashes: Vec<u64>,
    parent: Vec<usize>,
    rank: Vec<usize>,
    by_id: HashMap<FileId, usize>,
    threshold: u32,
}

impl DuplicateIndex {
    pub fn new(threshold: u32) -> Self {
        Self {
            ids: Vec::new(),
            hashes: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
            by_id: HashMap::new(),
            threshold,
        }
    }

    /// Rebuild from stored hashes, unioning as it goes.
    pub fn load(threshold: u32, stored: impl IntoIterator<Item = (FileId, u64)>) -> Self {
        let mut index = Self::new(threshold);
        for (id, hash) in stored {
            index.insert(&id, hash);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            // Path halving.
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.rank[ra] < self.rank[rb] {
            self.parent[ra] = rb;
        } else if self.rank[ra] > self.rank[rb] {
            self.parent[rb] = ra;
        } else {
            self.parent[rb] = ra;
            self.rank[ra] += 1;
        }
        true
    }

    /// Add a newly hashed file, unioning it with every existing entry
    /// within the threshold. Returns the number of unions made.
    /// Re-inserting a known id is a no-op.
    pub fn insert(&mut self, id: &str, phash: u64) -> usize {
        if self.by_id.contains_key(id) {
            return 0;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.hashes.push(phash);
        self.parent.push(idx);
        self.rank.push(0);
        self.by_id.insert(id.to_string(), idx);

        let mut unions = 0;
        for other in 0..idx {
            if hamming(self.hashes[other], phash) <= self.threshold && self.union(other, idx) {
                unions += 1;
            }
        }
        unions
    }

    /// Current equivalence classes with two or more members.
    pub fn groups(&mut self) -> Vec<Vec<FileId>> {
        let mut by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..self.ids.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<FileId>> = by_root
            .into_values()
            .filter(|members| members.len() > 1)
            .map(|members| members.iter().map(|i| self.ids[*i].clone()).collect())
            .collect();
        for group in &mut groups {
            group.sort();
        }
        groups.sort();
        groups
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.hashes.clear();
        self.parent.clear();
        self.rank.clear();
        self.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming(0, 0), 0);
        assert_eq!(hamming(0b1011, 0b0010), 2);
        assert_eq!(hamming(u64::MAX, 0), 64);
    }

    #[test]
    fn test_close_hashes_group_distant_stay_apart() {
        let mut index = DuplicateIndex::new(DEFAULT_THRESHOLD);
        index.insert("x", 0b0);
        index.insert("x_resized", 0b111); // distance 3
        index.insert("unrelated", u64::MAX);

        let groups = index.groups();
        assert_eq!(groups, vec![vec!["x".to_string(), "x_resized".to_string()]]);
    }

    #[test]
    fn test_three_singletons() {
        let mut index = DuplicateIndex::new(DEFAULT_THRESHOLD);
        index.insert("a", 0);
        index.insert("b", 0x00FF_FF00_0000_0000);
        index.insert("c", u64::MAX);
        assert!(index.groups().is_empty());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_transitive_closure() {
        // a-b close, b-c close, a-c far: all three must share a group.
        let mut index = DuplicateIndex::new(4);
        index.insert("a", 0b0000_0000);
        index.insert("b", 0b0000_1111);
        index.insert("c", 0b1111_1111);
        assert!(hamming(0b0000_0000, 0b1111_1111) > 4);

        let groups = index.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_reinsert_is_noop() {
        let mut index = DuplicateIndex::new(6);
        index.insert("a", 0);
        assert_eq!(index.insert("a", 1), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_load_matches_incremental_inserts() {
        let entries = vec![
            ("a".to_string(), 0u64),
            ("b".to_string(), 0b11u64),
            ("c".to_string(), u64::MAX),
        ];
        let mut loaded = DuplicateIndex::load(6, entries.clone());
        let mut incremental = DuplicateIndex::new(6);
        for (id, hash) in entries {
            incremental.insert(&id, hash);
        }
        assert_eq!(loaded.groups(), incremental.groups());
    }
}
