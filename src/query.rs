//! Query facade applying a future-tolerance policy to lookups.
//!
//! The cache itself never rejects a result for lying in the future of the
//! requested key; only lookups made through this facade do. The default is
//! the strict [`AssertValue::WithoutFuture`] policy.

use crate::assert_value::AssertValue;
use crate::error::Result;
use crate::historical::{HistoricalCache, LoadStrategy};
use crate::key::HistoricalKey;
use crate::source_of_record::SourceOfRecord;

pub struct HistoricalCacheQuery<'a, Key, Value, Source, Loader>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value>,
    Loader: LoadStrategy<Key, Value, Source>,
{
    cache: &'a HistoricalCache<Key, Value, Source, Loader>,
    mode: AssertValue,
}

impl<'a, Key, Value, Source, Loader> HistoricalCacheQuery<'a, Key, Value, Source, Loader>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value>,
    Loader: LoadStrategy<Key, Value, Source>,
{
    pub(crate) fn new(cache: &'a HistoricalCache<Key, Value, Source, Loader>) -> Self {
        Self {
            cache,
            mode: AssertValue::WithoutFuture,
        }
    }

    /// Accept values from the future of the requested key.
    pub fn with_future(mut self) -> Self {
        self.mode = AssertValue::WithFuture;
        self
    }

    /// Silently drop values from the future of the requested key.
    pub fn with_future_null(mut self) -> Self {
        self.mode = AssertValue::WithFutureNull;
        self
    }

    pub fn get_value(&self, key: Key) -> Result<Option<Value>> {
        Ok(self.get_entry(key)?.map(|(_, value)| value))
    }

    /// The resolved entry, keyed by the value's own key where the source
    /// supports extraction, by the requested key otherwise.
    pub fn get_entry(&self, key: Key) -> Result<Option<(Key, Value)>> {
        let value = self.cache.get(key)?;
        let resolved = match &value {
            Some(value) => self.cache.resolve_value_key(key, value)?,
            None => None,
        };
        self.mode.assert_entry(key, resolved, value)
    }
}
