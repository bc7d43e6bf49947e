use crate::error::{Error, Result};
use crate::key::HistoricalKey;

/// The authoritative, append-only data source behind the cache.
///
/// New values are only ever added at the newest end; the cache's gap
/// assumptions rely on this. The two read methods are required. The key
/// extraction and adjacency calculations are optional capabilities that
/// default to [`Error::Unsupported`]; the gap-filling load algorithm needs
/// `extract_key`, while the adjacency calculations only serve as best-effort
/// fallbacks and memoization inputs.
pub trait SourceOfRecord<Key: HistoricalKey, Value>: Send + Sync {
    /// All values with a key at or after `key`, ascending by key.
    fn read_all_values_ascending_from(&self, key: Key) -> Vec<Value>;

    /// The nearest value at or before `key`, falling back to the nearest
    /// value at or after it when nothing earlier exists. Whether a caller
    /// accepts the fallback (a value from the future) is decided later by
    /// the assertion policy, not here.
    fn read_latest_value_for(&self, key: Key) -> Option<Value>;

    /// The key a value sits at. `requested` is the key the lookup asked for,
    /// in case extraction depends on it.
    fn extract_key(&self, requested: Key, value: &Value) -> Result<Key> {
        let _ = (requested, value);
        Err(Error::Unsupported("extract_key"))
    }

    /// The greatest key strictly before `key` on this source's timeline.
    fn calculate_previous_key(&self, key: Key) -> Result<Key> {
        let _ = key;
        Err(Error::Unsupported("calculate_previous_key"))
    }

    /// The smallest key strictly after `key` on this source's timeline.
    fn calculate_next_key(&self, key: Key) -> Result<Key> {
        let _ = key;
        Err(Error::Unsupported("calculate_next_key"))
    }
}
