//! The gap-filling load algorithm.
//!
//! Resolves a missing key with the fewest source interactions, tolerant of
//! prior eviction of any cached entry. Cheap in-memory lookups are always
//! attempted before a batch scan, and a batch scan before a direct point
//! query: a scan amortizes across many subsequent nearby lookups (the
//! expected access pattern is forward iteration through time) while a point
//! query only answers one key.
//!
//! The algorithm expects new values in the source to only be added on the
//! high end and not anywhere in between. It works best when iterating from
//! the past to the future.
//!
//! WARNING: the discovered source bounds are cached for the instance's
//! lifetime. If the underlying data changes outside the append-only
//! assumption, the bounds go stale and the change is not detected; only an
//! explicit refresh or `clear` recovers.

use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::historical::{CacheState, HistoricalCache, HistoricalCacheConfig, LoadStrategy};
use crate::key::HistoricalKey;
use crate::source_of_record::SourceOfRecord;

/// A read-through historical cache using [`GapLoadStrategy`].
pub type GapHistoricalCache<Key, Value, Source> =
    HistoricalCache<Key, Value, Source, GapLoadStrategy<Key, Value>>;

impl<Key, Value, Source> GapHistoricalCache<Key, Value, Source>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value>,
{
    pub fn new(source: Arc<Source>) -> Self {
        Self::with_config(source, HistoricalCacheConfig::default())
    }

    pub fn with_config(source: Arc<Source>, config: HistoricalCacheConfig<Key, Value>) -> Self {
        let loader = GapLoadStrategy::new(config.read_back);
        HistoricalCache::with_loader(source, loader, config)
    }
}

/// What is known about the smallest and largest keys existing in the source,
/// discovered lazily and kept until invalidation.
///
/// The two sides are discovered independently; knowing one says nothing about
/// the other, so each probe gates on its own side only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SourceBounds<Key> {
    Unknown,
    Known {
        min: Option<Key>,
        max: Option<Key>,
    },
    /// The source was probed and scanned and holds nothing at all.
    ConfirmedEmpty,
}

impl<Key: HistoricalKey> SourceBounds<Key> {
    fn min(&self) -> Option<Key> {
        match self {
            SourceBounds::Known { min, .. } => *min,
            _ => None,
        }
    }

    fn max(&self) -> Option<Key> {
        match self {
            SourceBounds::Known { max, .. } => *max,
            _ => None,
        }
    }

    fn set_min(&mut self, key: Key) {
        // never leave an inverted range behind
        let max = self.max().map(|max| max.max(key));
        *self = SourceBounds::Known {
            min: Some(key),
            max,
        };
    }

    fn set_max(&mut self, key: Key) {
        let min = self.min().map(|min| min.min(key));
        *self = SourceBounds::Known {
            min,
            max: Some(key),
        };
    }
}

/// Gap state for one cache instance. Mutated exclusively under the owning
/// cache's lock.
pub struct GapLoadStrategy<Key: HistoricalKey, Value> {
    read_back: Key::Span,
    /// Pending values from the most recent batch scan, ascending by key,
    /// consumed left to right. `None` means no scan since the last
    /// invalidation, as opposed to a fully consumed scan.
    further_values: Option<VecDeque<Value>>,
    /// Per-call flag, a field only as a convenience.
    further_values_loaded: bool,
    /// Smallest and largest keys ever requested of this instance.
    min_key: Option<Key>,
    max_key: Option<Key>,
    bounds: SourceBounds<Key>,
    /// Bounds of the most recent batch scan.
    scanned_min: Option<Key>,
    scanned_max: Option<Key>,
    /// Every key confirmed to exist in the source, by any means. Survives
    /// value eviction and serves as a fallback index.
    keys_from_db: BTreeSet<Key>,
    /// Set once a direct point query came back empty.
    no_value_found: bool,
}

impl<Key, Value> GapLoadStrategy<Key, Value>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
{
    pub fn new(read_back: Key::Span) -> Self {
        Self {
            read_back,
            further_values: None,
            further_values_loaded: false,
            min_key: None,
            max_key: None,
            bounds: SourceBounds::Unknown,
            scanned_min: None,
            scanned_max: None,
            keys_from_db: BTreeSet::new(),
            no_value_found: false,
        }
    }

    fn invalidate(&mut self) {
        self.keys_from_db.clear();
        self.bounds = SourceBounds::Unknown;
        // a cleared queue forces a complete reload on the next lookup
        self.further_values = None;
        self.no_value_found = false;
    }

    fn update_max_key(&mut self, key: Key) -> bool {
        if self.max_key.map_or(true, |max| key > max) {
            self.max_key = Some(key);
            true
        } else {
            false
        }
    }

    fn update_min_key(&mut self, key: Key) -> bool {
        if self.min_key.map_or(true, |min| key < min) {
            self.min_key = Some(key);
            true
        } else {
            false
        }
    }

    fn pop_front(&mut self) -> Option<Value> {
        self.further_values.as_mut().and_then(|queue| queue.pop_front())
    }

    fn queue_is_empty(&self) -> bool {
        self.further_values
            .as_ref()
            .map_or(true, |queue| queue.is_empty())
    }

    fn eventually_get_min_max_keys<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        force: bool,
    ) -> Result<bool>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if self.no_value_found {
            return Ok(false);
        }
        let mut changed = false;
        if self.eventually_get_min_key(state, source, key, force)? {
            changed = true;
        }
        if self.eventually_get_max_key(state, source, key, force)? {
            changed = true;
        }
        Ok(changed)
    }

    fn eventually_get_min_key<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        force: bool,
    ) -> Result<bool>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if self.bounds.min().is_some() && !force {
            return Ok(false);
        }
        if let Some(min_value) = self.read_newest_value_from_db(state, source, Key::min_key())? {
            let min_value_key = state.extract_key(source, key, &min_value)?;
            // the minimum may only move backward: a probe answered from a
            // later key must not shrink the explored range
            if self.bounds.min().map_or(true, |min| min_value_key < min) {
                self.bounds.set_min(min_value_key);
                self.keys_from_db.insert(min_value_key);
                state.put_value(min_value_key, min_value);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eventually_get_max_key<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        force: bool,
    ) -> Result<bool>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if self.bounds.max().is_some() && !force {
            return Ok(false);
        }
        if let Some(max_value) = self.read_newest_value_from_db(state, source, Key::max_key())? {
            let max_value_key = state.extract_key(source, key, &max_value)?;
            // an append-only source's maximum only ever moves forward
            if self.bounds.max().map_or(true, |max| max_value_key > max) {
                self.bounds.set_max(max_value_key);
                self.keys_from_db.insert(max_value_key);
                state.put_value(max_value_key, max_value);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Gate for the cheap path: worth trying when the key falls inside the
    /// last scanned range (before the first still-pending value), when no
    /// source maximum is known yet, or when the key lies beyond it.
    fn should_try_cheap_path<Source>(
        &self,
        state: &CacheState<Key, Value>,
        source: &Source,
        key: Key,
    ) -> Result<bool>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        let Some(max_in_db) = self.bounds.max() else {
            return Ok(true);
        };
        if key > max_in_db {
            return Ok(true);
        }
        if self.scanned_max != Some(max_in_db) {
            return Ok(false);
        }
        if self.scanned_min.map_or(true, |min| key < min) {
            return Ok(false);
        }
        match self.further_values.as_ref().and_then(|queue| queue.front()) {
            Some(front) => Ok(key < state.extract_key(source, key, front)?),
            None => Ok(true),
        }
    }

    fn load_from_cache_before_scan<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        new_max_key: bool,
        new_min_key: bool,
    ) -> Result<Option<Value>>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if let Some(value) = self.eventually_get_min_value(state, key, new_min_key) {
            return Ok(Some(value));
        }

        // anywhere between min and max the value has already been added
        let consumed_queue = matches!(&self.further_values, Some(queue) if queue.is_empty());
        if (!new_max_key || consumed_queue) && !new_min_key {
            return self.search_in_cache_via_keys_from_db(state, source, key);
        }

        // maybe use the max value
        if let Some(max_in_db) = self.bounds.max() {
            if key >= max_in_db {
                if let Some(value) = state.cached_value(&max_in_db) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Answer from the minimum boundary. Internal lookups are future-tolerant
    /// by nature: any cached boundary value is accepted as-is, so a direct
    /// store read is equivalent to the future-tolerant query mode.
    fn eventually_get_min_value(
        &self,
        state: &mut CacheState<Key, Value>,
        key: Key,
        new_min_key: bool,
    ) -> Option<Value> {
        let min_in_db = self.bounds.min()?;
        let after_min_key = !new_min_key && self.min_key.map_or(false, |min| key >= min);
        if after_min_key && key <= min_in_db {
            // populated by the newest-value probe
            if let Some(min_key) = self.min_key {
                if let Some(value) = state.cached_value(&min_key) {
                    return Some(value);
                }
            }
        }
        if key <= min_in_db {
            // populated by the batch scan
            if let Some(value) = state.cached_value(&min_in_db) {
                return Some(value);
            }
        }
        None
    }

    fn search_in_cache_via_keys_from_db<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
    ) -> Result<Option<Value>>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        let mut previous_from_db = None;
        for &key_from_db in &self.keys_from_db {
            if key < key_from_db {
                break;
            }
            previous_from_db = Some(key_from_db);
            if key == key_from_db {
                break;
            }
        }
        let Some(previous) = previous_from_db else {
            return Ok(None);
        };
        if let Some(value) = state.cached_value(&previous) {
            return Ok(Some(value));
        }
        // the key's value was evicted; unless the pending queue still covers
        // it, the gap assumptions are stale, so force a batch reload instead
        // of risking a wrong nearest-neighbor answer
        let queue_covers = match self.further_values.as_ref().and_then(|queue| queue.front()) {
            Some(front) => state.extract_key(source, key, front)? <= previous,
            None => false,
        };
        if !queue_covers {
            self.further_values = None;
            self.keys_from_db.clear();
            tracing::debug!(key = ?key, "cached key evicted, forcing batch reload");
        }
        Ok(None)
    }

    fn should_load_further_values(&self, key: Key, new_min_key: bool) -> bool {
        if self.queue_is_empty() {
            return true;
        }
        if new_min_key && self.scanned_min.map_or(false, |min| key < min) {
            return true;
        }
        // the last scan already started at the source minimum, but the
        // minimum itself moved below the key since
        let scanned_from_source_min =
            self.scanned_min.is_some() && self.scanned_min == self.bounds.min();
        scanned_from_source_min && self.bounds.min().map_or(false, |min| key < min) && new_min_key
    }

    fn eventually_load_further_values<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        adjusted_key: Key,
        new_min_key: bool,
        forced: bool,
    ) -> Result<bool>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if !(forced || self.should_load_further_values(key, new_min_key)) {
            return Ok(false);
        }
        let min_in_db = self.bounds.min();
        let start = if new_min_key && self.scanned_min.map_or(false, |min| key < min) {
            // going further back than any scan so far: clamp to the
            // discovered source minimum
            match min_in_db {
                Some(min) => min.min(min.max(adjusted_key)),
                None => adjusted_key,
            }
        } else {
            match min_in_db {
                Some(min) => min.max(adjusted_key),
                None => adjusted_key,
            }
        };
        let values: VecDeque<Value> = source.read_all_values_ascending_from(start).into();
        tracing::debug!(start = ?start, count = values.len(), "batch scan");
        if !values.is_empty() {
            self.note_scanned_values(state, source, key, &values)?;
            self.further_values = Some(values);
        } else {
            self.further_values = Some(values);
            if matches!(self.bounds, SourceBounds::Unknown) {
                self.bounds = SourceBounds::ConfirmedEmpty;
                tracing::debug!("source confirmed empty");
            }
        }
        Ok(true)
    }

    /// Update discovered bounds and the scanned range from a non-empty scan,
    /// asserting ascending order. Only first and last are compared here; the
    /// pop loop enforces pairwise order through the adjacency puts.
    fn note_scanned_values<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        values: &VecDeque<Value>,
    ) -> Result<()>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        let (Some(front), Some(back)) = (values.front(), values.back()) else {
            return Ok(());
        };
        let first_key = state.extract_key(source, key, front)?;
        if first_key < key {
            // the scan reached back past the requested key, so earlier
            // requests are already explored and can skip straight through
            self.min_key = Some(Key::min_key());
        }
        if self.bounds.min().is_none() || self.min_key.map_or(false, |min| first_key < min) {
            self.bounds.set_min(first_key);
        }
        self.scanned_min = Some(self.scanned_min.map_or(first_key, |min| min.min(first_key)));

        let last_key = state.extract_key(source, key, back)?;
        if self.bounds.max().map_or(true, |max| last_key > max) {
            self.bounds.set_max(last_key);
        }
        self.scanned_max = Some(self.scanned_max.map_or(last_key, |max| max.max(last_key)));

        if values.len() > 1 && first_key > last_key {
            return Err(Error::not_ascending(first_key, last_key));
        }
        Ok(())
    }

    fn search_in_further_values<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
    ) -> Result<Option<Value>>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        let earliest_start = key.back_step(self.read_back);
        let mut previous: Option<(Key, Value)> = None;
        // at most one forced continuation per top-level lookup, to bound work
        let mut continued = false;
        loop {
            let front_key = match self.further_values.as_ref().and_then(|queue| queue.front()) {
                Some(front) => state.extract_key(source, key, front)?,
                None => break,
            };
            self.keys_from_db.insert(front_key);
            match key.cmp(&front_key) {
                Ordering::Less => {
                    // overshoot: leave the entry queued but record it and its
                    // link to the last popped pair, completing the adjacency
                    // chain for this scan
                    if previous.is_some() {
                        let front = self
                            .further_values
                            .as_ref()
                            .and_then(|queue| queue.front())
                            .cloned();
                        if let Some(front_value) = front {
                            state.put_with_previous(front_key, front_value, previous.clone())?;
                        }
                    }
                    break;
                }
                Ordering::Equal => {
                    // the value searched for; the caller caches it under its
                    // db key
                    return Ok(self.pop_front());
                }
                Ordering::Greater => {
                    let Some(value) = self.pop_front() else {
                        break;
                    };
                    // gaps between observed keys are not synthesized, so the
                    // store's capacity is not reached prematurely
                    state.put_with_previous(front_key, value.clone(), previous.take())?;
                    previous = Some((front_key, value));

                    if self.queue_is_empty() && !continued {
                        if let Some(max_in_db) = self.bounds.max() {
                            let scan_fell_short =
                                self.scanned_max.map_or(true, |max| max < max_in_db);
                            if front_key < max_in_db && key < max_in_db && scan_fell_short {
                                let start = front_key.max(earliest_start);
                                continued = true;
                                self.eventually_load_further_values(
                                    state, source, front_key, start, false, true,
                                )?;
                                if let Some(queue) = self.further_values.as_mut() {
                                    if !queue.is_empty() {
                                        // the continuation repeats the key
                                        // just handled
                                        queue.pop_front();
                                        if start != front_key {
                                            // don't thread adjacency across
                                            // the jump
                                            previous = None;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(previous.map(|(_, value)| value))
    }

    /// These checks may only run after the pending queue was searched and
    /// possibly reloaded.
    fn try_from_cache_after_scan<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
        new_max_key: bool,
        previous_max_key: Option<Key>,
    ) -> Result<Option<Value>>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        // the source minimum might be unchanged even though the instance
        // minimum moved; after a fresh scan this is worth re-checking before
        // paying for a direct query
        if self.further_values_loaded {
            if let Some(value) = self.eventually_get_min_value(state, key, false) {
                return Ok(Some(value));
            }
        }

        match state.calculate_previous_key(source, key) {
            Ok(previous_key) => {
                if let Some(value) = state.cached_value(&previous_key) {
                    return Ok(Some(value));
                }
            }
            // the source might not support this kind of navigation
            Err(Error::Unsupported(_)) => {}
            Err(other) => return Err(other),
        }

        if new_max_key {
            if let Some(previous_max) = previous_max_key {
                // the previous maximum lies behind the new one, so it answers
                // when the source has no further values
                if let Some(value) = state.cached_value(&previous_max) {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn read_newest_value_from_db<Source>(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
    ) -> Result<Option<Value>>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        let mut value = None;
        if !self.no_value_found {
            value = source.read_latest_value_for(key);
            if value.is_none() {
                self.no_value_found = true;
                tracing::debug!(key = ?key, "direct query found nothing, negative-caching");
            }
        }

        // fall back to the first pending value of the current lookup's scan
        if value.is_none() && self.further_values_loaded {
            value = self
                .further_values
                .as_ref()
                .and_then(|queue| queue.front())
                .cloned();
        }

        match value {
            Some(value) => {
                // remember the db key of the value, not the requested key, so
                // the result can be found again without mislabeling
                // future-shifted hits
                let value_key = state.extract_key(source, key, &value)?;
                self.keys_from_db.insert(value_key);
                state.put_value(value_key, value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl<Key, Value, Source> LoadStrategy<Key, Value, Source> for GapLoadStrategy<Key, Value>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value> + ?Sized,
{
    /// Assumption: eviction never leaves a value behind whose key entry was
    /// evicted as well; even maximum-size eviction only punches random holes
    /// in the explored range, which every step below tolerates.
    fn load_value(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
    ) -> Result<Option<Value>> {
        if matches!(self.bounds, SourceBounds::ConfirmedEmpty)
            && self.min_key.map_or(false, |min| key >= min)
        {
            return Ok(None);
        }

        self.eventually_get_min_max_keys(state, source, key, false)?;

        self.further_values_loaded = false;
        let previous_max_key = self.max_key;
        let new_max_key = self.update_max_key(key);
        let new_min_key = self.update_min_key(key);

        // try answering from memory before any query, via gap finding or
        // through the min key
        if self.should_try_cheap_path(state, source, key)? {
            if let Some(value) =
                self.load_from_cache_before_scan(state, source, key, new_max_key, new_min_key)?
            {
                return Ok(Some(value));
            }
        }

        // the expensive query
        if !self.further_values_loaded {
            let adjusted_key = key.back_step(self.read_back);
            self.further_values_loaded = self
                .eventually_load_further_values(state, source, key, adjusted_key, new_min_key, false)?;
        }
        let value = self.search_in_further_values(state, source, key)?;
        if value.is_some() || matches!(self.bounds, SourceBounds::ConfirmedEmpty) {
            return Ok(value);
        }

        // use the last known value if the source has no higher key
        if let Some(value) =
            self.try_from_cache_after_scan(state, source, key, new_max_key, previous_max_key)?
        {
            return Ok(Some(value));
        }

        // last resort: the newest value matching the key directly; if the
        // source holds nothing at all this runs only once
        self.read_newest_value_from_db(state, source, key)
    }

    fn maybe_refresh(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
    ) -> Result<bool> {
        let discovered_anything =
            !matches!(self.bounds, SourceBounds::Unknown) || self.no_value_found;
        if !discovered_anything {
            return Ok(false);
        }
        // let the probes run again even after a negative verdict: the source
        // may hold data now
        self.no_value_found = false;
        if matches!(self.bounds, SourceBounds::ConfirmedEmpty) {
            self.bounds = SourceBounds::Unknown;
        }
        let changed = self.eventually_get_min_max_keys(state, source, Key::max_key(), true)?;
        if changed {
            state.clear();
            self.invalidate();
            tracing::debug!("source bounds moved, cache cleared");
            return Ok(true);
        }
        Ok(false)
    }

    fn on_clear(&mut self) {
        self.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_sided_discovery_leaves_the_other_side_unknown() {
        let mut bounds: SourceBounds<i64> = SourceBounds::Unknown;
        bounds.set_min(10);
        assert_eq!(bounds.min(), Some(10));
        // knowing the minimum must not fabricate a maximum, or the maximum
        // probe would never run
        assert_eq!(bounds.max(), None);

        let mut bounds: SourceBounds<i64> = SourceBounds::Unknown;
        bounds.set_max(20);
        assert_eq!(bounds.max(), Some(20));
        assert_eq!(bounds.min(), None);
    }

    #[test]
    fn bounds_never_invert() {
        let mut bounds: SourceBounds<i64> = SourceBounds::Unknown;
        bounds.set_min(10);
        bounds.set_max(20);
        assert_eq!(bounds.min(), Some(10));
        assert_eq!(bounds.max(), Some(20));
        // a min above the max drags the max along
        bounds.set_min(30);
        assert_eq!(bounds.min(), Some(30));
        assert_eq!(bounds.max(), Some(30));
    }

    #[test]
    fn requested_range_tracking() {
        let mut gap: GapLoadStrategy<i64, i64> = GapLoadStrategy::new(10);
        assert!(gap.update_min_key(5));
        assert!(gap.update_max_key(5));
        assert!(!gap.update_min_key(7));
        assert!(gap.update_max_key(7));
        assert!(gap.update_min_key(3));
        assert_eq!(gap.min_key, Some(3));
        assert_eq!(gap.max_key, Some(7));
    }

    #[test]
    fn scan_needed_when_queue_missing_or_below_scanned_range() {
        let mut gap: GapLoadStrategy<i64, i64> = GapLoadStrategy::new(10);
        assert!(gap.should_load_further_values(5, true));
        gap.further_values = Some(VecDeque::from(vec![1]));
        gap.scanned_min = Some(4);
        assert!(!gap.should_load_further_values(5, false));
        assert!(gap.should_load_further_values(3, true));
    }
}
