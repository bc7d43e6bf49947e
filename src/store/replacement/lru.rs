use std::collections::HashMap;
use std::hash::Hash;

use crate::store::CacheStoreStrategy;

/// Sentinel for null links in the recency list.
const NIL: usize = usize::MAX;

struct Node<Key, Value> {
    key: Key,
    // Option so values can be extracted on eviction without cloning the key
    value: Option<Value>,
    previous: usize,
    next: usize,
}

/// Implements the Least Recently Used replacement strategy on top of an
/// in-memory store.
///
/// Entries live in a `Vec` arena linked into a doubly-linked recency list by
/// index, with a `HashMap` from key to arena slot. All operations are O(1).
/// Usage order is volatile by design: committing usage tracking to a
/// non-volatile store would turn every read into a write.
///
/// A capacity of zero stores nothing, which disables caching entirely.
pub struct LruReplacementStore<Key, Value>
where
    Key: Eq + Hash,
{
    capacity: usize,
    slots: HashMap<Key, usize>,
    nodes: Vec<Node<Key, Value>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<Key, Value> LruReplacementStore<Key, Value>
where
    Key: Eq + Hash + Clone,
    Value: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, index: usize) {
        let (previous, next) = {
            let node = &self.nodes[index];
            (node.previous, node.next)
        };
        if previous == NIL {
            self.head = next;
        } else {
            self.nodes[previous].next = next;
        }
        if next == NIL {
            self.tail = previous;
        } else {
            self.nodes[next].previous = previous;
        }
    }

    fn push_front(&mut self, index: usize) {
        self.nodes[index].previous = NIL;
        self.nodes[index].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].previous = index;
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }

    fn mark_as_most_recent(&mut self, index: usize) {
        if self.head != index {
            self.unlink(index);
            self.push_front(index);
        }
    }

    fn evict_least_recent(&mut self) {
        let index = self.tail;
        if index == NIL {
            return;
        }
        self.unlink(index);
        let node = &mut self.nodes[index];
        node.value = None;
        let key = node.key.clone();
        self.slots.remove(&key);
        self.free.push(index);
    }
}

impl<Key, Value> CacheStoreStrategy<Key, Value> for LruReplacementStore<Key, Value>
where
    Key: Eq + Hash + Clone + Send,
    Value: Clone + Send,
{
    fn get(&mut self, key: &Key) -> Option<Value> {
        let index = *self.slots.get(key)?;
        self.mark_as_most_recent(index);
        self.nodes[index].value.clone()
    }

    fn peek(&self, key: &Key) -> Option<Value> {
        let index = *self.slots.get(key)?;
        self.nodes[index].value.clone()
    }

    fn put(&mut self, key: &Key, value: Value) {
        if let Some(&index) = self.slots.get(key) {
            self.nodes[index].value = Some(value);
            self.mark_as_most_recent(index);
            return;
        }
        if self.capacity == 0 {
            return;
        }
        if self.slots.len() == self.capacity {
            self.evict_least_recent();
        }
        let index = match self.free.pop() {
            Some(slot) => {
                let node = &mut self.nodes[slot];
                node.key = key.clone();
                node.value = Some(value);
                slot
            }
            None => {
                self.nodes.push(Node {
                    key: key.clone(),
                    value: Some(value),
                    previous: NIL,
                    next: NIL,
                });
                self.nodes.len() - 1
            }
        };
        self.slots.insert(key.clone(), index);
        self.push_front(index);
    }

    fn delete(&mut self, key: &Key) -> bool {
        match self.slots.remove(key) {
            Some(index) => {
                self.unlink(index);
                self.nodes[index].value = None;
                self.free.push(index);
                true
            }
            None => false,
        }
    }

    fn flush(&mut self) {
        self.slots.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    fn contains(&self, key: &Key) -> bool {
        self.slots.contains_key(key)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut store: LruReplacementStore<i64, &str> = LruReplacementStore::new(3);
        store.put(&1, "one");
        store.put(&2, "two");
        store.put(&3, "three");

        // 1 becomes most recent, 2 the eviction candidate
        assert_eq!(store.get(&1), Some("one"));
        store.put(&4, "four");

        assert_eq!(store.get(&2), None);
        assert_eq!(store.get(&1), Some("one"));
        assert_eq!(store.get(&3), Some("three"));
        assert_eq!(store.get(&4), Some("four"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn peek_does_not_touch_usage_order() {
        let mut store: LruReplacementStore<i64, &str> = LruReplacementStore::new(2);
        store.put(&1, "one");
        store.put(&2, "two");

        assert_eq!(store.peek(&1), Some("one"));
        store.put(&3, "three");

        // 1 was least recent despite the peek
        assert_eq!(store.get(&1), None);
        assert_eq!(store.get(&2), Some("two"));
    }

    #[test]
    fn put_updates_existing_entry_in_place() {
        let mut store: LruReplacementStore<i64, &str> = LruReplacementStore::new(2);
        store.put(&1, "one");
        store.put(&2, "two");
        store.put(&1, "uno");
        store.put(&3, "three");

        assert_eq!(store.get(&1), Some("uno"));
        assert_eq!(store.get(&2), None);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let mut store: LruReplacementStore<i64, &str> = LruReplacementStore::new(0);
        store.put(&1, "one");
        assert_eq!(store.get(&1), None);
        assert!(store.is_empty());
    }

    #[test]
    fn delete_reuses_slots() {
        let mut store: LruReplacementStore<i64, &str> = LruReplacementStore::new(2);
        store.put(&1, "one");
        assert!(store.delete(&1));
        assert!(!store.delete(&1));
        store.put(&2, "two");
        store.put(&3, "three");
        assert_eq!(store.get(&2), Some("two"));
        assert_eq!(store.get(&3), Some("three"));
        store.flush();
        assert!(store.is_empty());
    }

    #[test]
    fn capacity_one_survives_iteration() {
        let mut store: LruReplacementStore<i64, i64> = LruReplacementStore::new(1);
        for i in 0..100 {
            store.put(&i, i * 10);
            assert_eq!(store.get(&i), Some(i * 10));
            assert_eq!(store.len(), 1);
        }
    }
}
