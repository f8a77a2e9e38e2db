//! Space-saving top-k frequency estimation.
//!
//! Tracks the `capacity` most frequent keys seen through [`SpaceSaving::update`]
//! using bounded memory: once full, the least-frequent entry is evicted and
//! replaced by the newcomer, which inherits the evicted entry's count (so the
//! newcomer's true frequency is never overestimated by more than that
//! inherited count). The rank vector is kept sorted ascending by count via
//! `bubble_up`, so the lowest-count entry is always at index 0 and the top-k
//! query is a simple reverse scan.

use std::collections::HashMap;
use std::hash::Hash;

pub struct SpaceSaving<K: Clone + Eq + Hash> {
    capacity: usize,
    cur_size: usize,
    rank: Vec<Option<(K, u64)>>,
    index_of: HashMap<K, usize>,
}

impl<K: Clone + Eq + Hash> SpaceSaving<K> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "space-saving capacity must be nonzero");
        Self {
            capacity,
            cur_size: 0,
            rank: vec![None; capacity],
            index_of: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cur_size(&self) -> usize {
        self.cur_size
    }

    fn get_lowest_count(&self) -> u64 {
        self.rank[0].as_ref().map(|(_, c)| *c).unwrap_or(0)
    }

    /// Moves the entry at `idx` up through the rank vector until the
    /// ascending-by-count ordering is restored, updating `index_of` as
    /// entries swap.
    fn bubble_up(&mut self, mut idx: usize) {
        while idx + 1 < self.cur_size {
            let next = idx + 1;
            let cur_count = match &self.rank[idx] {
                Some((_, c)) => *c,
                None => break,
            };
            let next_count = match &self.rank[next] {
                Some((_, c)) => *c,
                None => break,
            };
            if cur_count <= next_count {
                break;
            }
            self.rank.swap(idx, next);
            if let Some((k, _)) = &self.rank[idx] {
                self.index_of.insert(k.clone(), idx);
            }
            if let Some((k, _)) = &self.rank[next] {
                self.index_of.insert(k.clone(), next);
            }
            idx = next;
        }
    }

    /// Increments an already-tracked key's count and restores ordering.
    fn increment_entry(&mut self, idx: usize, amount: u64) {
        if let Some((_, count)) = &mut self.rank[idx] {
            *count += amount;
        }
        self.bubble_up(idx);
    }

    /// Evicts the current minimum, installs `key` in its place inheriting the
    /// evicted count plus `amount`, and restores ordering.
    fn update_lowest(&mut self, key: K, amount: u64) {
        let inherited = self.get_lowest_count();
        if let Some((old_key, _)) = self.rank[0].take() {
            self.index_of.remove(&old_key);
        }
        self.rank[0] = Some((key.clone(), inherited + amount));
        self.index_of.insert(key, 0);
        crate::logging::log_event(crate::logging::GcEvent::SpaceSavingEvict {
            inherited_count: inherited,
        });
        self.bubble_up(0);
    }

    /// Records one observation of `key`, weighted by `amount`.
    pub fn update(&mut self, key: K, amount: u64) {
        if let Some(&idx) = self.index_of.get(&key) {
            self.increment_entry(idx, amount);
            return;
        }

        if self.cur_size < self.capacity {
            let idx = self.cur_size;
            self.rank[idx] = Some((key.clone(), amount));
            self.index_of.insert(key, idx);
            self.cur_size += 1;
            self.bubble_up(idx);
            return;
        }

        self.update_lowest(key, amount);
    }

    /// Returns the top `k` entries by count, descending. `k` is clamped to
    /// `cur_size`.
    pub fn kth_highest(&self, k: usize) -> Vec<(K, u64)> {
        let k = k.min(self.cur_size);
        self.rank[..self.cur_size]
            .iter()
            .rev()
            .take(k)
            .filter_map(|e| e.clone())
            .collect()
    }

    /// The count of the `k`-th highest entry (1-indexed), or `None` if fewer
    /// than `k` entries are tracked.
    pub fn kth_highest_count(&self, k: usize) -> Option<u64> {
        if k == 0 || k > self.cur_size {
            return None;
        }
        self.rank[self.cur_size - k].as_ref().map(|(_, c)| *c)
    }

    pub fn clear(&mut self) {
        for slot in self.rank.iter_mut() {
            *slot = None;
        }
        self.index_of.clear();
        self.cur_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_matches_worked_example() {
        // k=4; updates (A,1),(B,2),(C,3),(D,4),(E,5).
        let mut ss = SpaceSaving::new(4);
        ss.update("A", 1);
        ss.update("B", 2);
        ss.update("C", 3);
        ss.update("D", 4);
        ss.update("E", 5);

        let mut ranked = ss.kth_highest(4);
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        assert_eq!(
            ranked,
            vec![("B", 2), ("C", 3), ("D", 4), ("E", 6)]
        );

        let mut top = ss.kth_highest(4);
        top.sort_by(|a, b| b.1.cmp(&a.1));
        assert_eq!(top, vec![("E", 6), ("D", 4), ("C", 3), ("B", 2)]);
    }

    #[test]
    fn repeated_key_increments_in_place() {
        let mut ss: SpaceSaving<&str> = SpaceSaving::new(2);
        ss.update("A", 1);
        ss.update("B", 1);
        ss.update("A", 5);
        assert_eq!(ss.kth_highest_count(1), Some(6));
        assert_eq!(ss.cur_size(), 2);
    }

    #[test]
    fn clear_resets_state() {
        let mut ss: SpaceSaving<&str> = SpaceSaving::new(2);
        ss.update("A", 1);
        ss.clear();
        assert_eq!(ss.cur_size(), 0);
        assert_eq!(ss.kth_highest(2), Vec::new());
    }
}
