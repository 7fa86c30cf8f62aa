//! Row conversion.

use crate::db::ResultSet;
use crate::error::DbResult;
use crate::models::Value;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

/// A row keyed by column label.
///
/// Keeps the column order of the result set; lookups ignore ASCII case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    entries: Vec<(String, Value)>,
}

impl RowMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `label`, replacing a value stored under the same
    /// label in any case.
    pub fn insert(&mut self, label: impl Into<String>, value: Value) {
        let label = label.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&label))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((label, value)),
        }
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(label))
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

impl Serialize for RowMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Converts the current row of a result set.
pub trait RowProcessor {
    /// Values of the current row, in column order.
    fn to_array(&self, rs: &mut dyn ResultSet) -> DbResult<Vec<Value>> {
        let count = rs.columns().len();
        let mut row = Vec::with_capacity(count);
        for index in 1..=count {
            row.push(rs.value(index)?);
        }
        Ok(row)
    }

    /// Values of the current row keyed by column label. A column without a
    /// label is keyed by its 1-based index.
    fn to_map(&self, rs: &mut dyn ResultSet) -> DbResult<RowMap> {
        let labels: Vec<String> = rs
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if c.label.is_empty() {
                    (i + 1).to_string()
                } else {
                    c.label.clone()
                }
            })
            .collect();
        let mut row = RowMap::new();
        for (i, label) in labels.into_iter().enumerate() {
            row.insert(label, rs.value(i + 1)?);
        }
        Ok(row)
    }
}

/// Row processor with the default conversions.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicRowProcessor;

impl RowProcessor for BasicRowProcessor {}
