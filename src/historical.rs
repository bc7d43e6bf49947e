pub mod gap;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::key::HistoricalKey;
use crate::query::HistoricalCacheQuery;
use crate::refresh::RefreshSignal;
use crate::source_of_record::SourceOfRecord;
use crate::store::{self, CacheStoreStrategy};

/// This is normally sufficient for daily bars and still fast enough for
/// intraday ticks to load.
pub const DEFAULT_MAXIMUM_SIZE: usize = 10_000;

/// Callback invoked after a missing value was resolved and stored.
///
/// Listeners run after the cache's lock is released and may re-enter the
/// cache, but the value they observe is the consistent result of the lookup
/// that triggered them.
pub trait HistoricalCacheListener<Key, Value>: Send + Sync {
    fn on_value_loaded(&self, key: Key, value: &Value);
}

/// Another cache instance sharing the same physical timeline, to which key
/// extraction and previous/next adjacency are redirected.
///
/// Configured once at construction; the delegate necessarily exists before
/// the delegating cache, so self-reference is unrepresentable. Delegation
/// graphs must be acyclic: a delegate's lock is taken while the delegating
/// instance's lock is held.
pub trait ShiftKeysDelegate<Key: HistoricalKey, Value>: Send + Sync {
    fn calculate_previous_key(&self, key: Key) -> Result<Key>;

    fn calculate_next_key(&self, key: Key) -> Result<Key>;

    /// The key the delegate's timeline assigns to `value`, through the
    /// delegate's own extraction (and its delegation chain, if any).
    fn extract_key(&self, requested: Key, value: &Value) -> Result<Key>;

    fn put_previous_key(&self, key: Key, previous: Key);

    fn put_next_key(&self, key: Key, next: Key);

    fn remove_adjacency(&self, key: Key);

    fn clear(&self);
}

/// Construction-time configuration for a [`HistoricalCache`].
#[derive(Clone)]
pub struct HistoricalCacheConfig<Key: HistoricalKey, Value> {
    /// `None` means unbounded and `Some(0)` means no caching at all.
    pub maximum_size: Option<usize>,
    /// Lookback window used to choose a batch scan's start key.
    pub read_back: Key::Span,
    /// The refresh marker this instance watches.
    pub refresh: RefreshSignal,
    pub shift_keys_delegate: Option<Arc<dyn ShiftKeysDelegate<Key, Value>>>,
    /// Redirect key extraction (not only adjacency) to the delegate.
    pub extract_keys_from_delegate: bool,
}

impl<Key: HistoricalKey, Value> Default for HistoricalCacheConfig<Key, Value> {
    fn default() -> Self {
        Self {
            maximum_size: Some(DEFAULT_MAXIMUM_SIZE),
            read_back: Key::default_read_back(),
            refresh: RefreshSignal::global(),
            shift_keys_delegate: None,
            extract_keys_from_delegate: false,
        }
    }
}

/// The strategy that resolves a key missing from the value store.
///
/// Runs under the owning cache's lock with exclusive access to the guarded
/// [`CacheState`], so multi-field invariants hold atomically across the
/// whole resolution.
pub trait LoadStrategy<Key: HistoricalKey, Value, Source: ?Sized>: Send {
    fn load_value(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
        key: Key,
    ) -> Result<Option<Value>>;

    /// Invoked when the refresh marker advanced. Returns true when cached
    /// state was invalidated.
    fn maybe_refresh(
        &mut self,
        state: &mut CacheState<Key, Value>,
        source: &Source,
    ) -> Result<bool> {
        let _ = (state, source);
        Ok(false)
    }

    /// Invoked by `clear` so the strategy drops its own derived state.
    fn on_clear(&mut self) {}
}

/// The guarded portion of a cache instance: the value store plus the derived
/// previous/next adjacency stores.
///
/// Assumption carried over from the gap algorithm: eviction of a value does
/// not distort the adjacency data, because adjacency is only ever recorded
/// between keys confirmed to be consecutive in the source.
pub struct CacheState<Key: HistoricalKey, Value> {
    values: Box<dyn CacheStoreStrategy<Key, Value>>,
    previous_keys: Box<dyn CacheStoreStrategy<Key, Key>>,
    next_keys: Box<dyn CacheStoreStrategy<Key, Key>>,
    put_disabled: bool,
    shift_keys_delegate: Option<Arc<dyn ShiftKeysDelegate<Key, Value>>>,
    extract_keys_from_delegate: bool,
}

impl<Key, Value> CacheState<Key, Value>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
{
    fn new(config: &HistoricalCacheConfig<Key, Value>) -> Self {
        let put_disabled =
            config.maximum_size == Some(0) && config.shift_keys_delegate.is_none();
        Self {
            values: store::bounded(config.maximum_size),
            previous_keys: store::bounded(config.maximum_size),
            next_keys: store::bounded(config.maximum_size),
            put_disabled,
            shift_keys_delegate: config.shift_keys_delegate.clone(),
            extract_keys_from_delegate: config.extract_keys_from_delegate
                && config.shift_keys_delegate.is_some(),
        }
    }

    pub fn cached_value(&mut self, key: &Key) -> Option<Value> {
        self.values.get(key)
    }

    pub fn peek_value(&self, key: &Key) -> Option<Value> {
        self.values.peek(key)
    }

    pub fn contains_value(&self, key: &Key) -> bool {
        self.values.contains(key)
    }

    /// Raw insert into the value store, bypassing adjacency threading. The
    /// store's own capacity still applies.
    pub fn put_value(&mut self, key: Key, value: Value) {
        self.values.put(&key, value);
    }

    /// The key a value sits at: the shift delegate's resolution when key
    /// extraction is delegated, else the source's raw extraction.
    pub fn extract_key<Source>(
        &self,
        source: &Source,
        requested: Key,
        value: &Value,
    ) -> Result<Key>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if self.extract_keys_from_delegate {
            if let Some(delegate) = &self.shift_keys_delegate {
                return delegate.extract_key(requested, value);
            }
        }
        source.extract_key(requested, value)
    }

    /// Memoized previous-key calculation. A computed key equal to its own key
    /// is never cached, to avoid distorting navigation on sources with
    /// ambiguous boundaries; errors are never cached either.
    pub fn calculate_previous_key<Source>(&mut self, source: &Source, key: Key) -> Result<Key>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if let Some(delegate) = &self.shift_keys_delegate {
            return delegate.calculate_previous_key(key);
        }
        if let Some(previous) = self.previous_keys.get(&key) {
            return Ok(previous);
        }
        let computed = source.calculate_previous_key(key)?;
        if computed != key {
            self.previous_keys.put(&key, computed);
        }
        Ok(computed)
    }

    pub fn calculate_next_key<Source>(&mut self, source: &Source, key: Key) -> Result<Key>
    where
        Source: SourceOfRecord<Key, Value> + ?Sized,
    {
        if let Some(delegate) = &self.shift_keys_delegate {
            return delegate.calculate_next_key(key);
        }
        if let Some(next) = self.next_keys.get(&key) {
            return Ok(next);
        }
        let computed = source.calculate_next_key(key)?;
        if computed != key {
            self.next_keys.put(&key, computed);
        }
        Ok(computed)
    }

    /// Insert a new pair and thread it into the adjacency chain behind an
    /// optional previous pair. Fails hard when `previous` is after `new_key`:
    /// that means the source broke the append-only assumption and continuing
    /// would silently corrupt adjacency data.
    pub fn put_with_previous(
        &mut self,
        new_key: Key,
        new_value: Value,
        previous: Option<(Key, Value)>,
    ) -> Result<()> {
        if self.put_disabled {
            return Ok(());
        }
        match previous {
            Some((previous_key, previous_value)) => {
                self.put_prev_and_next(Some(new_key), previous_key, previous_value, None)?;
                self.put_prev_and_next(None, new_key, new_value, Some(previous_key))
            }
            None => self.put_prev_and_next(None, new_key, new_value, None),
        }
    }

    fn put_prev_and_next(
        &mut self,
        next_key: Option<Key>,
        value_key: Key,
        value: Value,
        previous_key: Option<Key>,
    ) -> Result<()> {
        if let (Some(previous), Some(next)) = (previous_key, next_key) {
            if previous > next {
                return Err(Error::adjacency_order(previous, next));
            }
        }
        self.values.put(&value_key, value);
        if let Some(previous) = previous_key {
            self.put_previous(previous, value_key)?;
        }
        if let Some(next) = next_key {
            self.put_next(next, value_key)?;
        }
        Ok(())
    }

    fn put_previous(&mut self, previous_key: Key, value_key: Key) -> Result<()> {
        if previous_key > value_key {
            return Err(Error::adjacency_order(previous_key, value_key));
        }
        // degenerate (equal) entries are never stored
        if previous_key != value_key {
            self.adjacency_put_previous(value_key, previous_key);
            self.adjacency_put_next(previous_key, value_key);
        }
        Ok(())
    }

    fn put_next(&mut self, next_key: Key, value_key: Key) -> Result<()> {
        if next_key < value_key {
            return Err(Error::adjacency_order(value_key, next_key));
        }
        if next_key != value_key {
            self.adjacency_put_next(value_key, next_key);
            self.adjacency_put_previous(next_key, value_key);
        }
        Ok(())
    }

    fn adjacency_put_previous(&mut self, key: Key, previous: Key) {
        match &self.shift_keys_delegate {
            Some(delegate) => delegate.put_previous_key(key, previous),
            None => self.previous_keys.put(&key, previous),
        }
    }

    fn adjacency_put_next(&mut self, key: Key, next: Key) {
        match &self.shift_keys_delegate {
            Some(delegate) => delegate.put_next_key(key, next),
            None => self.next_keys.put(&key, next),
        }
    }

    pub fn remove(&mut self, key: Key) {
        self.values.delete(&key);
        match &self.shift_keys_delegate {
            Some(delegate) => delegate.remove_adjacency(key),
            None => self.remove_adjacency_local(key),
        }
    }

    pub(crate) fn remove_adjacency_local(&mut self, key: Key) {
        if let Some(previous) = self.previous_keys.get(&key) {
            self.previous_keys.delete(&previous);
        }
        self.previous_keys.delete(&key);
        self.next_keys.delete(&key);
    }

    pub fn clear(&mut self) {
        self.values.flush();
        self.previous_keys.flush();
        self.next_keys.flush();
        if let Some(delegate) = &self.shift_keys_delegate {
            delegate.clear();
        }
    }
}

struct Inner<Key: HistoricalKey, Value, Loader> {
    state: CacheState<Key, Value>,
    loader: Loader,
    last_refresh_seen: u64,
}

/// A thread-safe key/value cache over an append-only time-series source, with
/// derived previous/next adjacency tracking and key-space delegation.
///
/// One coarse lock guards the whole instance; the load strategy's invariants
/// span the value store, both adjacency stores and its own gap state, so they
/// must update atomically. Holding the lock across source queries trades
/// throughput for correctness, which fits the read-through, batch-amortizing
/// access pattern.
pub struct HistoricalCache<Key, Value, Source, Loader>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value>,
    Loader: LoadStrategy<Key, Value, Source>,
{
    source: Arc<Source>,
    inner: Mutex<Inner<Key, Value, Loader>>,
    listeners: Mutex<Vec<Arc<dyn HistoricalCacheListener<Key, Value>>>>,
    refresh: RefreshSignal,
}

impl<Key, Value, Source, Loader> HistoricalCache<Key, Value, Source, Loader>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value>,
    Loader: LoadStrategy<Key, Value, Source>,
{
    pub fn with_loader(
        source: Arc<Source>,
        loader: Loader,
        config: HistoricalCacheConfig<Key, Value>,
    ) -> Self {
        let state = CacheState::new(&config);
        let last_refresh_seen = config.refresh.current();
        Self {
            source,
            inner: Mutex::new(Inner {
                state,
                loader,
                last_refresh_seen,
            }),
            listeners: Mutex::new(Vec::new()),
            refresh: config.refresh,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<Key, Value, Loader>> {
        // every critical section leaves the state consistent or errors out,
        // so a poisoned lock is still safe to reuse
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_if_needed(&self, inner: &mut Inner<Key, Value, Loader>) -> Result<()> {
        let current = self.refresh.current();
        if inner.last_refresh_seen < current {
            inner.last_refresh_seen = current;
            let Inner { state, loader, .. } = inner;
            let cleared = loader.maybe_refresh(state, self.source.as_ref())?;
            if cleared {
                tracing::debug!("refresh marker advanced, cached state invalidated");
            }
        }
        Ok(())
    }

    /// The cached value at `key`, resolving it through the load strategy on a
    /// miss. A resolved value is stored under its discovered key (falling
    /// back to the requested key when extraction is unsupported) and
    /// listeners are notified after the lock is released.
    pub fn get(&self, key: Key) -> Result<Option<Value>> {
        let (value, loaded) = {
            let mut inner = self.lock();
            self.refresh_if_needed(&mut inner)?;
            let Inner { state, loader, .. } = &mut *inner;
            if let Some(value) = state.cached_value(&key) {
                (Some(value), None)
            } else {
                match loader.load_value(state, self.source.as_ref(), key)? {
                    Some(value) => {
                        let discovered =
                            match state.extract_key(self.source.as_ref(), key, &value) {
                                Ok(extracted) => extracted,
                                Err(Error::Unsupported(_)) => key,
                                Err(other) => return Err(other),
                            };
                        state.put_value(discovered, value.clone());
                        (Some(value.clone()), Some((discovered, value)))
                    }
                    None => (None, None),
                }
            }
        };
        if let Some((discovered, value)) = loaded {
            let listeners = self
                .listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for listener in listeners {
                listener.on_value_loaded(discovered, &value);
            }
        }
        Ok(value)
    }

    /// Cached value without loading and without touching usage tracking.
    pub fn peek(&self, key: Key) -> Option<Value> {
        self.lock().state.peek_value(&key)
    }

    pub fn contains_key(&self, key: Key) -> bool {
        self.lock().state.contains_value(&key)
    }

    pub fn calculate_previous_key(&self, key: Key) -> Result<Key> {
        let mut inner = self.lock();
        self.refresh_if_needed(&mut inner)?;
        inner.state.calculate_previous_key(self.source.as_ref(), key)
    }

    pub fn calculate_next_key(&self, key: Key) -> Result<Key> {
        let mut inner = self.lock();
        self.refresh_if_needed(&mut inner)?;
        inner.state.calculate_next_key(self.source.as_ref(), key)
    }

    pub fn extract_key(&self, requested: Key, value: &Value) -> Result<Key> {
        self.lock()
            .state
            .extract_key(self.source.as_ref(), requested, value)
    }

    /// Insert a pair, optionally threading it behind a previous pair.
    pub fn put_with_previous(
        &self,
        new_key: Key,
        new_value: Value,
        previous: Option<(Key, Value)>,
    ) -> Result<()> {
        self.lock()
            .state
            .put_with_previous(new_key, new_value, previous)
    }

    pub fn put_pair(
        &self,
        new_entry: (Key, Value),
        previous: Option<(Key, Value)>,
    ) -> Result<()> {
        self.put_with_previous(new_entry.0, new_entry.1, previous)
    }

    /// Insert values whose keys the source can extract. Only raw extraction
    /// applies here; extraction must not depend on the requested key.
    pub fn put_values(&self, new_value: Value, previous_value: Option<Value>) -> Result<()> {
        let mut inner = self.lock();
        let Inner { state, .. } = &mut *inner;
        let new_key = self
            .source
            .extract_key(Key::min_key(), &new_value)?;
        let previous = match previous_value {
            Some(value) => {
                let key = self.source.extract_key(Key::min_key(), &value)?;
                Some((key, value))
            }
            None => None,
        };
        state.put_with_previous(new_key, new_value, previous)
    }

    /// Remove a pair along with its adjacency entries.
    pub fn remove(&self, key: Key) {
        self.lock().state.remove(key);
    }

    /// Full reset: the three stores, the load strategy's derived state and
    /// any shift delegate, cascading.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.state.clear();
        inner.loader.on_clear();
    }

    pub fn add_listener(&self, listener: Arc<dyn HistoricalCacheListener<Key, Value>>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// A query facade bound to this cache, future-intolerant by default.
    pub fn query(&self) -> HistoricalCacheQuery<'_, Key, Value, Source, Loader> {
        HistoricalCacheQuery::new(self)
    }

    /// Extraction for the query facade: `None` when the source supports no
    /// extraction, which the assertion policies resolve to the requested key.
    pub(crate) fn resolve_value_key(&self, requested: Key, value: &Value) -> Result<Option<Key>> {
        match self
            .lock()
            .state
            .extract_key(self.source.as_ref(), requested, value)
        {
            Ok(key) => Ok(Some(key)),
            Err(Error::Unsupported(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }
}

impl<Key, Value, Source, Loader> ShiftKeysDelegate<Key, Value>
    for HistoricalCache<Key, Value, Source, Loader>
where
    Key: HistoricalKey,
    Value: Clone + Send + 'static,
    Source: SourceOfRecord<Key, Value>,
    Loader: LoadStrategy<Key, Value, Source>,
{
    fn calculate_previous_key(&self, key: Key) -> Result<Key> {
        HistoricalCache::calculate_previous_key(self, key)
    }

    fn calculate_next_key(&self, key: Key) -> Result<Key> {
        HistoricalCache::calculate_next_key(self, key)
    }

    fn extract_key(&self, requested: Key, value: &Value) -> Result<Key> {
        HistoricalCache::extract_key(self, requested, value)
    }

    fn put_previous_key(&self, key: Key, previous: Key) {
        if previous != key {
            self.lock().state.previous_keys.put(&key, previous);
        }
    }

    fn put_next_key(&self, key: Key, next: Key) {
        if next != key {
            self.lock().state.next_keys.put(&key, next);
        }
    }

    fn remove_adjacency(&self, key: Key) {
        self.lock().state.remove_adjacency_local(key);
    }

    fn clear(&self) {
        HistoricalCache::clear(self);
    }
}
