use std::collections::HashMap;
use std::hash::Hash;

use crate::store::CacheStoreStrategy;

/// Unbounded in-memory store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryStore<Key, Value> {
    data: HashMap<Key, Value>,
}

impl<Key, Value> MemoryStore<Key, Value> {
    pub fn new() -> Self {
        MemoryStore {
            data: HashMap::new(),
        }
    }
}

impl<Key, Value> CacheStoreStrategy<Key, Value> for MemoryStore<Key, Value>
where
    Key: Eq + Hash + Clone + Send,
    Value: Clone + Send,
{
    fn get(&mut self, key: &Key) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn peek(&self, key: &Key) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn put(&mut self, key: &Key, value: Value) {
        self.data.insert(key.clone(), value);
    }

    fn delete(&mut self, key: &Key) -> bool {
        self.data.remove(key).is_some()
    }

    fn flush(&mut self) {
        self.data.clear();
    }

    fn contains(&self, key: &Key) -> bool {
        self.data.contains_key(key)
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
