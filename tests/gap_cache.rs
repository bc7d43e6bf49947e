use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gap_cache::{
    Error, GapHistoricalCache, HistoricalCacheConfig, HistoricalCacheListener, RefreshSignal,
    Result, ShiftKeysDelegate, SourceOfRecord,
};

#[derive(Clone, Debug, PartialEq)]
struct Bar {
    time: i64,
    close: f64,
}

fn bar(time: i64) -> Bar {
    Bar {
        time,
        close: time as f64,
    }
}

/// In-memory source counting how often it is actually hit.
struct RecordingSource {
    bars: Mutex<BTreeMap<i64, Bar>>,
    scans: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl RecordingSource {
    fn new(times: &[i64]) -> Self {
        Self {
            bars: Mutex::new(times.iter().map(|&t| (t, bar(t))).collect()),
            scans: AtomicUsize::new(0),
            latest_calls: AtomicUsize::new(0),
        }
    }

    fn append(&self, time: i64) {
        self.bars.lock().unwrap().insert(time, bar(time));
    }

    fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }
}

impl SourceOfRecord<i64, Bar> for RecordingSource {
    fn read_all_values_ascending_from(&self, key: i64) -> Vec<Bar> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.bars
            .lock()
            .unwrap()
            .range(key..)
            .map(|(_, value)| value.clone())
            .collect()
    }

    fn read_latest_value_for(&self, key: i64) -> Option<Bar> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        let bars = self.bars.lock().unwrap();
        bars.range(..=key)
            .next_back()
            .or_else(|| bars.range(key..).next())
            .map(|(_, value)| value.clone())
    }

    fn extract_key(&self, _requested: i64, value: &Bar) -> Result<i64> {
        Ok(value.time)
    }

    fn calculate_previous_key(&self, key: i64) -> Result<i64> {
        let bars = self.bars.lock().unwrap();
        Ok(bars.range(..key).next_back().map_or(key, |(k, _)| *k))
    }

    fn calculate_next_key(&self, key: i64) -> Result<i64> {
        let bars = self.bars.lock().unwrap();
        Ok(bars.range(key + 1..).next().map_or(key, |(k, _)| *k))
    }
}

fn cache_over(source: &Arc<RecordingSource>) -> GapHistoricalCache<i64, Bar, RecordingSource> {
    GapHistoricalCache::new(source.clone())
}

#[test]
fn gap_lookup_answers_with_nearest_earlier_value() {
    let source = Arc::new(RecordingSource::new(&[1_000, 3_000, 10_000]));
    let cache = cache_over(&source);

    let entry = cache.query().get_entry(5_000).unwrap();
    assert_eq!(entry, Some((3_000, bar(3_000))));

    // one scan plus the two bound probes resolves the whole neighborhood
    assert_eq!(source.scans(), 1);
    assert_eq!(source.latest_calls(), 2);

    // adjacency got threaded while the scan was consumed
    assert_eq!(cache.calculate_previous_key(3_000).unwrap(), 1_000);
    assert_eq!(cache.calculate_next_key(3_000).unwrap(), 10_000);
    assert_eq!(cache.calculate_previous_key(10_000).unwrap(), 3_000);
}

#[test]
fn first_lookup_above_the_minimum_does_not_answer_with_it() {
    let source = Arc::new(RecordingSource::new(&[0, 1]));
    let cache = cache_over(&source);

    // both bound probes must have run before the lookup is resolved;
    // a fabricated maximum would short-circuit to the value at 0 here
    assert_eq!(cache.query().get_entry(1).unwrap(), Some((1, bar(1))));
    assert_eq!(source.latest_calls(), 2);
}

#[test]
fn repeated_and_nearby_lookups_stay_in_memory() {
    let source = Arc::new(RecordingSource::new(&[1_000, 3_000, 10_000]));
    let cache = cache_over(&source);

    assert_eq!(cache.query().get_value(5_000).unwrap(), Some(bar(3_000)));
    let scans = source.scans();
    let latest = source.latest_calls();

    assert_eq!(cache.query().get_value(5_000).unwrap(), Some(bar(3_000)));
    assert_eq!(cache.query().get_value(4_000).unwrap(), Some(bar(3_000)));
    assert_eq!(cache.query().get_value(3_000).unwrap(), Some(bar(3_000)));

    assert_eq!(source.scans(), scans);
    assert_eq!(source.latest_calls(), latest);
}

#[test]
fn request_before_the_first_value_is_policy_dependent() {
    let source = Arc::new(RecordingSource::new(&[1_000, 3_000]));
    let cache = cache_over(&source);

    let entry = cache.query().with_future().get_entry(500).unwrap();
    assert_eq!(entry, Some((1_000, bar(1_000))));

    assert_eq!(cache.query().with_future_null().get_value(500).unwrap(), None);

    match cache.query().get_value(500) {
        Err(Error::FutureValue { .. }) => {}
        other => panic!("expected FutureValue, got {other:?}"),
    }
}

#[test]
fn request_after_the_last_value_answers_with_the_maximum() {
    let source = Arc::new(RecordingSource::new(&[1_000, 3_000, 10_000]));
    let cache = cache_over(&source);

    let entry = cache.query().get_entry(20_000).unwrap();
    assert_eq!(entry, Some((10_000, bar(10_000))));
    // the bound probes alone answer this, no scan needed
    assert_eq!(source.scans(), 0);
}

#[test]
fn ascending_iteration_with_tiny_capacity_scans_once() {
    let times: Vec<i64> = (1..=100).collect();
    let source = Arc::new(RecordingSource::new(&times));
    let config = HistoricalCacheConfig {
        maximum_size: Some(1),
        ..HistoricalCacheConfig::default()
    };
    let cache = GapHistoricalCache::with_config(source.clone(), config);

    for &t in &times {
        assert_eq!(cache.query().get_value(t).unwrap(), Some(bar(t)), "key {t}");
    }
    assert_eq!(source.scans(), 1);
}

#[test]
fn revisiting_an_evicted_key_forces_a_reload_not_a_wrong_answer() {
    let times: Vec<i64> = (1..=50).collect();
    let source = Arc::new(RecordingSource::new(&times));
    let config = HistoricalCacheConfig {
        maximum_size: Some(1),
        ..HistoricalCacheConfig::default()
    };
    let cache = GapHistoricalCache::with_config(source.clone(), config);

    for &t in &times {
        cache.query().get_value(t).unwrap();
    }
    assert_eq!(source.scans(), 1);

    // 10 is long evicted; answering it from stale gap state would be wrong
    assert_eq!(cache.query().get_value(10).unwrap(), Some(bar(10)));
    assert_eq!(source.scans(), 2);
}

#[test]
fn empty_source_is_probed_once_and_negative_cached() {
    let source = Arc::new(RecordingSource::new(&[]));
    let cache = cache_over(&source);

    assert_eq!(cache.query().get_value(5_000).unwrap(), None);
    assert_eq!(source.latest_calls(), 1);
    let scans = source.scans();

    // repeats at or after the explored minimum touch the source not at all
    assert_eq!(cache.query().get_value(5_000).unwrap(), None);
    assert_eq!(cache.query().get_value(7_000).unwrap(), None);
    assert_eq!(source.latest_calls(), 1);
    assert_eq!(source.scans(), scans);
}

#[test]
fn refresh_marker_revalidates_bounds_and_clears_on_growth() {
    let source = Arc::new(RecordingSource::new(&[1_000]));
    let signal = RefreshSignal::new();
    let config = HistoricalCacheConfig {
        refresh: signal.clone(),
        ..HistoricalCacheConfig::default()
    };
    let cache = GapHistoricalCache::with_config(source.clone(), config);

    assert_eq!(cache.query().get_value(2_000).unwrap(), Some(bar(1_000)));

    // growth alone is invisible until the marker advances
    source.append(3_000);
    assert_eq!(cache.query().get_value(3_000).unwrap(), Some(bar(1_000)));

    signal.mark();
    assert_eq!(cache.query().get_value(3_000).unwrap(), Some(bar(3_000)));
    assert_eq!(cache.query().get_value(2_000).unwrap(), Some(bar(1_000)));
}

#[test]
fn refresh_marker_recovers_a_source_that_appeared() {
    let source = Arc::new(RecordingSource::new(&[]));
    let signal = RefreshSignal::new();
    let config = HistoricalCacheConfig {
        refresh: signal.clone(),
        ..HistoricalCacheConfig::default()
    };
    let cache = GapHistoricalCache::with_config(source.clone(), config);

    assert_eq!(cache.query().get_value(5_000).unwrap(), None);

    source.append(1_000);
    // still negative-cached
    assert_eq!(cache.query().get_value(5_000).unwrap(), None);

    signal.mark();
    assert_eq!(cache.query().get_value(5_000).unwrap(), Some(bar(1_000)));
}

#[test]
fn clear_forgets_everything_including_negative_state() {
    let source = Arc::new(RecordingSource::new(&[]));
    let cache = cache_over(&source);

    assert_eq!(cache.query().get_value(5_000).unwrap(), None);
    source.append(1_000);
    assert_eq!(cache.query().get_value(5_000).unwrap(), None);

    cache.clear();
    assert_eq!(cache.query().get_value(5_000).unwrap(), Some(bar(1_000)));
}

#[test]
fn manual_puts_thread_adjacency_and_enforce_order() {
    let source = Arc::new(RecordingSource::new(&[]));
    let cache = cache_over(&source);

    cache.put_pair((2_000, bar(2_000)), Some((1_000, bar(1_000)))).unwrap();
    assert!(cache.contains_key(2_000));
    assert!(cache.contains_key(1_000));
    assert_eq!(cache.calculate_previous_key(2_000).unwrap(), 1_000);
    assert_eq!(cache.calculate_next_key(1_000).unwrap(), 2_000);

    match cache.put_pair((500, bar(500)), Some((1_000, bar(1_000)))) {
        Err(Error::AdjacencyOrder { .. }) => {}
        other => panic!("expected AdjacencyOrder, got {other:?}"),
    }
}

#[test]
fn put_values_extracts_keys_through_the_source() {
    let source = Arc::new(RecordingSource::new(&[]));
    let cache = cache_over(&source);

    cache.put_values(bar(2_000), Some(bar(1_000))).unwrap();
    assert_eq!(cache.peek(2_000), Some(bar(2_000)));
    assert_eq!(cache.calculate_previous_key(2_000).unwrap(), 1_000);
}

#[test]
fn listener_sees_the_discovered_key() {
    struct Recorder(Mutex<Vec<(i64, Bar)>>);

    impl HistoricalCacheListener<i64, Bar> for Recorder {
        fn on_value_loaded(&self, key: i64, value: &Bar) {
            self.0.lock().unwrap().push((key, value.clone()));
        }
    }

    let source = Arc::new(RecordingSource::new(&[1_000, 3_000, 10_000]));
    let cache = cache_over(&source);
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    cache.add_listener(recorder.clone());

    cache.query().get_value(5_000).unwrap();
    let seen = recorder.0.lock().unwrap();
    assert_eq!(seen.first(), Some(&(3_000, bar(3_000))));
}

/// A source whose only capability is reading; navigation and extraction come
/// from the delegate.
struct PlainSource(BTreeMap<i64, Bar>);

impl SourceOfRecord<i64, Bar> for PlainSource {
    fn read_all_values_ascending_from(&self, key: i64) -> Vec<Bar> {
        self.0.range(key..).map(|(_, value)| value.clone()).collect()
    }

    fn read_latest_value_for(&self, key: i64) -> Option<Bar> {
        self.0
            .range(..=key)
            .next_back()
            .or_else(|| self.0.range(key..).next())
            .map(|(_, value)| value.clone())
    }

    fn extract_key(&self, _requested: i64, value: &Bar) -> Result<i64> {
        Ok(value.time)
    }
}

#[test]
fn shift_keys_delegation_shares_the_master_timeline() {
    let times = [1_000i64, 3_000, 10_000];
    let master_source = Arc::new(PlainSource(times.iter().map(|&t| (t, bar(t))).collect()));
    let master = Arc::new(GapHistoricalCache::new(master_source));

    let derived_source = Arc::new(RecordingSource::new(&times));
    let config = HistoricalCacheConfig {
        shift_keys_delegate: Some(master.clone() as Arc<dyn ShiftKeysDelegate<i64, Bar>>),
        ..HistoricalCacheConfig::default()
    };
    let derived = GapHistoricalCache::with_config(derived_source, config);

    assert_eq!(derived.query().get_value(5_000).unwrap(), Some(bar(3_000)));

    // the adjacency derived observed during its scan lives in the master now;
    // the master's own source cannot navigate, so this is pure memoization
    assert_eq!(master.calculate_previous_key(3_000).unwrap(), 1_000);
    assert_eq!(master.calculate_next_key(3_000).unwrap(), 10_000);

    // and derived navigates through the master
    assert_eq!(derived.calculate_previous_key(10_000).unwrap(), 3_000);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whatever the key pattern and however small the store, every lookup
        /// matches a BTreeMap oracle's nearest-at-or-before answer.
        #[test]
        fn matches_nearest_at_or_before_oracle(
            times in proptest::collection::btree_set(0i64..10_000, 1..30),
            queries in proptest::collection::vec(-100i64..11_000, 1..40),
            capacity in prop_oneof![Just(None), (1usize..5).prop_map(Some)],
        ) {
            let times: Vec<i64> = times.into_iter().collect();
            let source = Arc::new(RecordingSource::new(&times));
            let oracle: BTreeMap<i64, Bar> =
                times.iter().map(|&t| (t, bar(t))).collect();
            let config = HistoricalCacheConfig {
                maximum_size: capacity,
                ..HistoricalCacheConfig::default()
            };
            let cache = GapHistoricalCache::with_config(source, config);

            for &q in &queries {
                let expected = oracle
                    .range(..=q)
                    .next_back()
                    .map(|(&k, v)| (k, v.clone()));
                let got = cache.query().with_future_null().get_entry(q).unwrap();
                prop_assert_eq!(got, expected, "query {}", q);
            }
        }
    }
}
