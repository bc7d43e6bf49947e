use std::fmt::Debug;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the cache.
///
/// Absent values are never errors; only structural invariant breaks and
/// unsupported optional operations are. An invariant break means the source
/// violated the append-only contract and continuing would risk serving wrong
/// values, so these fail the current call without partial recovery.
#[derive(Debug, Error)]
pub enum Error {
    /// An optional source capability is not implemented. Callers that use a
    /// capability as a best-effort fallback should catch specifically this
    /// kind and treat it as "fallback unavailable".
    #[error("operation not supported by this source of record: {0}")]
    Unsupported(&'static str),

    /// A previous/next adjacency link would run backwards in time.
    #[error("previous key [{previous}] is after [{key}]: the source broke the append-only contract")]
    AdjacencyOrder { previous: String, key: String },

    /// A batch scan returned values that are not ascending by key.
    #[error("batch scan not ascending: first key [{first}] is after last key [{last}]")]
    NotAscending { first: String, last: String },

    /// The resolved value lies after the requested key and the caller asked
    /// for future-intolerant resolution.
    #[error("value key [{resolved}] is after requested key [{requested}]: values from the future are not allowed")]
    FutureValue { requested: String, resolved: String },
}

impl Error {
    pub(crate) fn adjacency_order(previous: impl Debug, key: impl Debug) -> Self {
        Error::AdjacencyOrder {
            previous: format!("{previous:?}"),
            key: format!("{key:?}"),
        }
    }

    pub(crate) fn not_ascending(first: impl Debug, last: impl Debug) -> Self {
        Error::NotAscending {
            first: format!("{first:?}"),
            last: format!("{last:?}"),
        }
    }

    pub(crate) fn future_value(requested: impl Debug, resolved: impl Debug) -> Self {
        Error::FutureValue {
            requested: format!("{requested:?}"),
            resolved: format!("{resolved:?}"),
        }
    }
}
