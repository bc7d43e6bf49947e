use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// An immutable, totally ordered timestamp key.
///
/// Two sentinel keys bound the key space and are used as scan boundaries when
/// probing a source for its oldest and newest values. `back_step` subtracts a
/// read-back window from a key, saturating at the minimum sentinel.
pub trait HistoricalKey: Copy + Ord + Eq + Hash + Debug + Send + Sync + 'static {
    /// The duration type used for the read-back window.
    type Span: Copy + Send + Sync;

    /// The global minimum representable key.
    fn min_key() -> Self;

    /// The global maximum representable key.
    fn max_key() -> Self;

    /// This key moved back by `span`, saturating at `min_key()`.
    fn back_step(self, span: Self::Span) -> Self;

    /// 10 days is a good value for daily series.
    fn default_read_back() -> Self::Span;
}

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Millisecond timestamps as plain integers.
impl HistoricalKey for i64 {
    type Span = i64;

    fn min_key() -> Self {
        i64::MIN
    }

    fn max_key() -> Self {
        i64::MAX
    }

    fn back_step(self, span: Self::Span) -> Self {
        self.saturating_sub(span)
    }

    fn default_read_back() -> Self::Span {
        10 * MILLIS_PER_DAY
    }
}

impl HistoricalKey for DateTime<Utc> {
    type Span = Duration;

    fn min_key() -> Self {
        DateTime::<Utc>::MIN_UTC
    }

    fn max_key() -> Self {
        DateTime::<Utc>::MAX_UTC
    }

    fn back_step(self, span: Self::Span) -> Self {
        self.checked_sub_signed(span)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn default_read_back() -> Self::Span {
        Duration::days(10)
    }
}
