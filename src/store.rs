pub mod memory;
pub mod replacement;

use std::hash::Hash;

use crate::store::memory::MemoryStore;
use crate::store::replacement::lru::LruReplacementStore;

/// A key/value store the cache keeps its entries in.
///
/// Implementations may evict entries at any time; the cache layers above must
/// stay correct under arbitrary partial eviction.
pub trait CacheStoreStrategy<Key, Value>: Send {
    fn get(&mut self, key: &Key) -> Option<Value>;

    /// A platform read of a value. When replacement strategies are used (e.g.
    /// LRU) reads have side effects that update internal tracking. Peek allows
    /// inspecting state without skewing usage tracking.
    fn peek(&self, key: &Key) -> Option<Value>;

    fn put(&mut self, key: &Key, value: Value);

    fn delete(&mut self, key: &Key) -> bool;

    fn flush(&mut self);

    fn contains(&self, key: &Key) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store selection by capacity: `None` is unbounded, `Some(0)` caches nothing,
/// `Some(n)` keeps the `n` most recently used entries.
pub fn bounded<Key, Value>(maximum_size: Option<usize>) -> Box<dyn CacheStoreStrategy<Key, Value>>
where
    Key: Eq + Hash + Clone + Send + 'static,
    Value: Clone + Send + 'static,
{
    match maximum_size {
        None => Box::new(MemoryStore::new()),
        Some(capacity) => Box::new(LruReplacementStore::new(capacity)),
    }
}
