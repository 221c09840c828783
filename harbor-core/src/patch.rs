//! Helpers for partial-update request bodies.
//!
//! An optional field in a PATCH body has three states: absent (leave it
//! alone), `null` (clear it) and a value (set it). Fields declared as
//! `Option<Option<T>>` with `#[serde(default, deserialize_with = "nullable")]`
//! decode to `None`, `Some(None)` and `Some(Some(v))` respectively.

use serde::{Deserialize, Deserializer};

pub fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Apply a tri-state patch value onto an optional field
pub fn merge<T>(current: Option<T>, patch: Option<Option<T>>) -> Option<T> {
    match patch {
        Some(value) => value,
        None => current,
    }
}
