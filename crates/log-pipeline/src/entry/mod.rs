// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of data exchanged between operators.
//!
//! An [`Entry`] carries two timestamps and three independently optional
//! sections:
//!
//! - **body**: the event itself, any JSON-shaped value
//! - **attributes**: metadata about the event (e.g. network peer)
//! - **resource**: metadata about the origin (e.g. host identity)
//!
//! A missing section means "no data" and is distinct from an empty map.
//! Sections are addressed with a [`Field`].

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::FieldError;

mod field;

pub use field::{Field, FieldRoot};

/// A log record flowing through the pipeline.
///
/// Entries are owned by exactly one operator at a time: `process` takes the
/// entry by value, so an operator that forwards an entry gives it up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Time of the event, assigned by the source or defaulted to ingestion time.
    pub timestamp: DateTime<Utc>,
    /// Time the pipeline first saw the raw data. Never changed by transforms.
    pub observed_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Map<String, Value>>,
}

impl Entry {
    /// Creates an entry observed now, with every section empty.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Entry {
            timestamp: now,
            observed_timestamp: now,
            body: None,
            attributes: None,
            resource: None,
        }
    }

    /// Inserts a top-level attribute, creating the attribute map if needed.
    pub fn add_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
    }

    /// Inserts a top-level resource key, creating the resource map if needed.
    pub fn add_resource_key(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.resource
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
    }

    pub fn get(&self, field: &Field) -> Option<Cow<'_, Value>> {
        field.get(self)
    }

    pub fn set(&mut self, field: &Field, value: Value) -> Result<(), FieldError> {
        field.set(self, value)
    }

    pub fn delete(&mut self, field: &Field) -> Option<Value> {
        field.delete(self)
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows `keys` through nested maps.
pub(crate) fn lookup<'a>(map: &'a Map<String, Value>, keys: &[String]) -> Option<&'a Value> {
    let (last, parents) = keys.split_last()?;
    let mut current = map;
    for key in parents {
        current = current.get(key)?.as_object()?;
    }
    current.get(last)
}

/// Writes `value` at `keys`, creating intermediate maps and replacing
/// intermediate values that are not maps.
pub(crate) fn insert_at(map: &mut Map<String, Value>, keys: &[String], value: Value) {
    match keys {
        [] => {}
        [last] => {
            map.insert(last.clone(), value);
        }
        [first, rest @ ..] => match map.get_mut(first) {
            Some(Value::Object(inner)) => insert_at(inner, rest, value),
            _ => {
                let mut inner = Map::new();
                insert_at(&mut inner, rest, value);
                map.insert(first.clone(), Value::Object(inner));
            }
        },
    }
}

/// Like [`insert_at`], but when both the existing and the incoming value are
/// maps their keys are merged recursively instead of replaced.
pub(crate) fn merge_at(map: &mut Map<String, Value>, keys: &[String], value: Value) {
    match keys {
        [] => {
            if let Value::Object(incoming) = value {
                merge_maps(map, incoming);
            }
        }
        [last] => {
            if let Value::Object(incoming) = value {
                if let Some(Value::Object(existing)) = map.get_mut(last) {
                    merge_maps(existing, incoming);
                    return;
                }
                map.insert(last.clone(), Value::Object(incoming));
            } else {
                map.insert(last.clone(), value);
            }
        }
        [first, rest @ ..] => match map.get_mut(first) {
            Some(Value::Object(inner)) => merge_at(inner, rest, value),
            _ => {
                let mut inner = Map::new();
                merge_at(&mut inner, rest, value);
                map.insert(first.clone(), Value::Object(inner));
            }
        },
    }
}

fn merge_maps(dest: &mut Map<String, Value>, src: Map<String, Value>) {
    for (key, value) in src {
        merge_at(dest, std::slice::from_ref(&key), value);
    }
}

/// Removes and returns the value at `keys`, leaving parent maps in place.
pub(crate) fn remove_at(map: &mut Map<String, Value>, keys: &[String]) -> Option<Value> {
    match keys {
        [] => None,
        [last] => map.remove(last),
        [first, rest @ ..] => match map.get_mut(first)? {
            Value::Object(inner) => remove_at(inner, rest),
            _ => None,
        },
    }
}
