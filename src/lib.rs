//! A read-through cache in front of an append-only time-series source.
//!
//! Keys are points in time and a lookup answers with the newest value at or
//! before the requested key, so requests may fall into gaps between stored
//! values or beyond either end of the data. Misses are resolved with as few
//! source interactions as possible: batch scans amortize across nearby
//! lookups, discovered source bounds short-circuit out-of-range requests,
//! and an empty source is queried exactly once until refreshed.
//!
//! ```
//! use std::sync::Arc;
//! use gap_cache::{GapHistoricalCache, SourceOfRecord};
//!
//! struct Bars(Vec<(i64, f64)>);
//!
//! impl SourceOfRecord<i64, (i64, f64)> for Bars {
//!     fn read_all_values_ascending_from(&self, key: i64) -> Vec<(i64, f64)> {
//!         self.0.iter().copied().filter(|(time, _)| *time >= key).collect()
//!     }
//!
//!     fn read_latest_value_for(&self, key: i64) -> Option<(i64, f64)> {
//!         self.0
//!             .iter()
//!             .copied()
//!             .filter(|(time, _)| *time <= key)
//!             .last()
//!             .or_else(|| self.0.first().copied())
//!     }
//!
//!     fn extract_key(&self, _requested: i64, value: &(i64, f64)) -> gap_cache::Result<i64> {
//!         Ok(value.0)
//!     }
//! }
//!
//! let bars = Arc::new(Bars(vec![(1, 1.0), (3, 3.0), (10, 10.0)]));
//! let cache = GapHistoricalCache::new(bars);
//!
//! // 5 falls in the gap between 3 and 10: the value at 3 answers
//! let entry = cache.query().get_entry(5)?;
//! assert_eq!(entry, Some((3, (3, 3.0))));
//! # Ok::<(), gap_cache::Error>(())
//! ```

pub mod assert_value;
pub mod error;
pub mod historical;
pub mod key;
pub mod query;
pub mod refresh;
pub mod source_of_record;
pub mod store;

pub use assert_value::AssertValue;
pub use error::{Error, Result};
pub use historical::gap::{GapHistoricalCache, GapLoadStrategy};
pub use historical::{
    CacheState, HistoricalCache, HistoricalCacheConfig, HistoricalCacheListener, LoadStrategy,
    ShiftKeysDelegate, DEFAULT_MAXIMUM_SIZE,
};
pub use key::HistoricalKey;
pub use query::HistoricalCacheQuery;
pub use refresh::RefreshSignal;
pub use source_of_record::SourceOfRecord;
pub use store::memory::MemoryStore;
pub use store::replacement::lru::LruReplacementStore;
pub use store::CacheStoreStrategy;
