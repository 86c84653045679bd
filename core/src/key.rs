//! Canonical call keys and the argument bag used to build them.
//!
//! A key is the compact `serde_json` rendering of the argument value. `serde_json` keeps object
//! keys in sorted order, so structurally equal arguments always render identically no matter in
//! which order named fields or keyword arguments were supplied. The key is independent of the
//! storage format used to persist tables.
//!
//! NaN and infinite floats have no JSON rendering and `serde_json` would fold them into `null`,
//! so arguments containing them are rejected and the call runs uncached.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::ser::{Error as _, SerializeStruct};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::{CacheError, Result};
use crate::shape;

/// Deterministic, hashable encoding of one call's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey(String);

impl CallKey {
    /// Canonicalize any serializable argument value.
    pub fn from_args<A: Serialize + ?Sized>(args: &A) -> Result<Self> {
        Ok(Self::from_value(&canonical_value(args)?))
    }

    /// Render an already structured argument value.
    pub fn from_value(value: &Value) -> Self {
        Self(value.to_string())
    }

    /// Rehydrate a key read back from a persisted table.
    pub(crate) fn from_persisted(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Positional and keyword arguments for functions that want call-style argument lists.
///
/// Keyword order never influences the key. Positional and keyword forms of the same parameter
/// produce different keys unless [`CallArgs::bind`] is used to name the positional values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
    invalid: Option<String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg<T: Serialize>(mut self, value: T) -> Self {
        match canonical_value(&value) {
            Ok(value) => self.positional.push(value),
            Err(err) => {
                let message = format!("positional #{}: {err}", self.positional.len());
                self.record_invalid(message);
            }
        }
        self
    }

    /// Set a keyword argument, replacing an earlier value under the same name.
    pub fn kwarg<T: Serialize>(mut self, name: impl Into<String>, value: T) -> Self {
        let name = name.into();
        match canonical_value(&value) {
            Ok(value) => {
                self.keyword.insert(name, value);
            }
            Err(err) => self.record_invalid(format!("keyword {name:?}: {err}")),
        }
        self
    }

    /// Name leading positional arguments after `params`, in declaration order.
    ///
    /// A positional value whose parameter was also given by keyword stays positional, so the
    /// ambiguous call keeps a distinct key.
    pub fn bind(mut self, params: &[&str]) -> Self {
        let positional = std::mem::take(&mut self.positional);
        let mut remaining = Vec::new();
        for (index, value) in positional.into_iter().enumerate() {
            match params.get(index) {
                Some(name) if !self.keyword.contains_key(*name) => {
                    self.keyword.insert((*name).to_string(), value);
                }
                _ => remaining.push(value),
            }
        }
        self.positional = remaining;
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decode the positional argument at `index`.
    pub fn arg_as<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.positional.get(index).and_then(|value| T::deserialize(value).ok())
    }

    /// Decode the keyword argument `name`.
    pub fn kwarg_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.keyword.get(name).and_then(|value| T::deserialize(value).ok())
    }

    fn record_invalid(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }
}

/// Convert `value` into a `Value`, refusing anything the conversion would not preserve.
fn canonical_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    let shape = shape::inspect(value).map_err(|err| CacheError::Key(err.to_string()))?;
    if shape.non_finite {
        return Err(CacheError::Key("NaN and infinite floats have no canonical form".to_string()));
    }
    serde_json::to_value(value).map_err(|err| CacheError::Key(err.to_string()))
}

impl Serialize for CallArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if let Some(message) = &self.invalid {
            return Err(S::Error::custom(message));
        }
        let mut state = serializer.serialize_struct("CallArgs", 2)?;
        state.serialize_field("args", &self.positional)?;
        state.serialize_field("kwargs", &self.keyword)?;
        state.end()
    }
}
