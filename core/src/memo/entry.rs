//! Cached values and the null-like predicate.

use serde::Serialize;
use serde_json::Value;

use crate::shape;

/// Result stored for one call key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    value: V,
    null_like: bool,
}

impl<V: Serialize> CacheEntry<V> {
    pub fn new(value: V) -> Self {
        let null_like = representation_is_null_like(&value);
        Self { value, null_like }
    }
}

impl<V> CacheEntry<V> {
    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    /// Whether the value is the "nothing" marker or a sequence made only of it.
    pub fn is_null_like(&self) -> bool {
        self.null_like
    }
}

/// `null`, or a sequence whose every element is `null`.
pub fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().all(Value::is_null),
        _ => false,
    }
}

/// Apply the [`is_null_like`] rule to the serde data model of `value`.
///
/// `None` and `()` are the nothing markers. Floats, including NaN and infinities, are real values.
pub fn representation_is_null_like<V: Serialize + ?Sized>(value: &V) -> bool {
    shape::inspect(value).is_ok_and(|shape| shape.null_like)
}
