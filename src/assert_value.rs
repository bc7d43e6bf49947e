use crate::error::{Error, Result};
use crate::key::HistoricalKey;

/// Decides whether a resolved value may legitimately lie in the future
/// relative to the requested key.
///
/// Applied by the query facade only; raw cache lookups never pass through a
/// policy. `resolved` is the key extracted from the value, `None` when the
/// source supports no extraction; resolution then falls back to the
/// requested key itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssertValue {
    /// Accept values from the future as-is.
    WithFuture,
    /// Treat values from the future as "not found".
    WithFutureNull,
    /// Fail with [`Error::FutureValue`] on values from the future.
    WithoutFuture,
}

impl AssertValue {
    pub fn assert_entry<Key, Value>(
        self,
        requested: Key,
        resolved: Option<Key>,
        value: Option<Value>,
    ) -> Result<Option<(Key, Value)>>
    where
        Key: HistoricalKey,
    {
        let Some(value) = value else {
            return Ok(None);
        };
        let asserted = resolved.unwrap_or(requested);
        if asserted > requested {
            match self {
                AssertValue::WithFuture => {}
                AssertValue::WithFutureNull => return Ok(None),
                AssertValue::WithoutFuture => {
                    return Err(Error::future_value(requested, asserted))
                }
            }
        }
        Ok(Some((asserted, value)))
    }
}
