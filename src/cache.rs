//! Query result cache with dependency-based invalidation.
//!
//! Each entry remembers every recipe that was examined while computing it,
//! not just the matches: an update can lift a previously rejected recipe
//! into the answer, so an entry is stale as soon as any examined recipe
//! changes. Mutating a recipe drops the entries that examined it, plus all
//! "broad" entries (pantry queries and the empty query). Creating a recipe
//! or rebuilding the graph clears everything.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::debug;

use crate::ident::SubjectId;
use crate::query::CacheKey;

#[derive(Debug, Clone)]
struct Entry {
    matches: Vec<SubjectId>,
    deps: HashSet<SubjectId>,
    broad: bool,
}

/// Concurrent result cache, shared between the read path and the mutator.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<CacheKey, Entry>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached matches for a key, if fresh.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<SubjectId>> {
        self.entries.get(key).map(|e| e.matches.clone())
    }

    /// Store an evaluation result. `examined` is every recipe the
    /// evaluation looked at; it becomes the entry's dependency set.
    pub fn put(&self, key: CacheKey, matches: Vec<SubjectId>, examined: &[SubjectId], broad: bool) {
        let deps = examined.iter().copied().collect();
        self.entries.insert(
            key,
            Entry {
                matches,
                deps,
                broad,
            },
        );
    }

    /// Drop entries that examined `recipe`, plus all broad entries.
    /// Returns how many entries were evicted.
    pub fn invalidate(&self, recipe: SubjectId) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.broad && !entry.deps.contains(&recipe));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(%recipe, evicted, "invalidated cached queries");
        }
        evicted
    }

    /// Drop everything (recipe creation, full rebuild).
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Criteria;

    fn id(raw: u64) -> SubjectId {
        SubjectId::new(raw).unwrap()
    }

    fn key(min_protein: f64) -> CacheKey {
        Criteria {
            min_protein: Some(min_protein),
            ..Default::default()
        }
        .cache_key()
    }

    #[test]
    fn put_then_get() {
        let cache = ResultCache::new();
        cache.put(key(10.0), vec![id(1), id(2)], &[id(1), id(2), id(3)], false);
        assert_eq!(cache.get(&key(10.0)), Some(vec![id(1), id(2)]));
        assert_eq!(cache.get(&key(11.0)), None);
    }

    #[test]
    fn invalidate_drops_only_entries_that_examined_the_recipe() {
        let cache = ResultCache::new();
        cache.put(key(10.0), vec![id(1)], &[id(1), id(2)], false);
        cache.put(key(20.0), vec![id(3)], &[id(3)], false);

        assert_eq!(cache.invalidate(id(2)), 1);
        assert_eq!(cache.get(&key(10.0)), None);
        assert_eq!(cache.get(&key(20.0)), Some(vec![id(3)]));
    }

    #[test]
    fn invalidate_evicts_stale_empty_answers() {
        let cache = ResultCache::new();
        // A query that matched nothing still examined both recipes; a
        // change to either can lift it into the answer.
        cache.put(key(99.0), vec![], &[id(1), id(2)], false);
        assert_eq!(cache.invalidate(id(1)), 1);
        assert_eq!(cache.get(&key(99.0)), None);
    }

    #[test]
    fn broad_entries_fall_to_any_invalidation() {
        let cache = ResultCache::new();
        cache.put(Criteria::default().cache_key(), vec![id(1)], &[id(1)], true);
        cache.put(key(20.0), vec![id(3)], &[id(3)], false);

        // id(9) was examined by no entry, but the broad entry must still go.
        assert_eq!(cache.invalidate(id(9)), 1);
        assert_eq!(cache.get(&Criteria::default().cache_key()), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn unexamined_recipes_leave_entries_alone() {
        let cache = ResultCache::new();
        cache.put(key(10.0), vec![id(1)], &[id(1), id(2)], false);
        assert_eq!(cache.invalidate(id(7)), 0);
        assert_eq!(cache.get(&key(10.0)), Some(vec![id(1)]));
        cache.clear();
        assert!(cache.is_empty());
    }
}
