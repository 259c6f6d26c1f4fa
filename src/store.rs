//! Cumulative form data.
//!
//! The record is flat: field name to value, across all steps. Persistence
//! writes it step-partitioned ([`FormDataStore::partition`]) and reads it back
//! through [`FormDataStore::flatten`].

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::form::StepRegistry;

/// Flat field name to value mapping.
pub type FieldMap = Map<String, Value>;

/// Step id to the fields that step owns.
pub type StepPartitionedRecord = BTreeMap<String, FieldMap>;

/// Partition holding fields that no registered step owns. Step ids cannot
/// contain `$`, so it never collides with a real step.
pub const UNASSIGNED_PARTITION: &str = "$unassigned";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("field '{field}' does not hold a list")]
    NotAnArray { field: String },

    #[error("field '{field}' has no item {index} (it holds {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },
}

/// The cumulative record: every field value entered so far, across all steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormDataStore {
    record: FieldMap,
}

impl FormDataStore {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from restored values, e.g. a flattened saved entry.
    pub fn from_record(record: FieldMap) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &FieldMap {
        &self.record
    }

    /// Value of one field; `None` if it was never set.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.record.get(name)
    }

    /// Shallow merge; keys in `partial` overwrite, all other keys are kept.
    pub fn merge(&mut self, partial: &FieldMap) -> &FieldMap {
        for (name, value) in partial {
            self.record.insert(name.clone(), value.clone());
        }
        &self.record
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.record.insert(name.into(), value);
    }

    /// Empty the record.
    pub fn reset(&mut self) -> &FieldMap {
        self.record.clear();
        &self.record
    }

    /// Merge a step-partitioned record into one flat record.
    ///
    /// Partitions the registry does not know come first (sorted by key), then
    /// [`UNASSIGNED_PARTITION`], then registry steps in registry order, so on
    /// a name collision the field of the later registered step wins.
    pub fn flatten(registry: &StepRegistry, partitioned: &StepPartitionedRecord) -> FieldMap {
        let mut record = FieldMap::new();
        let mut absorb = |fields: &FieldMap| {
            for (name, value) in fields {
                record.insert(name.clone(), value.clone());
            }
        };

        for (key, fields) in partitioned {
            if key != UNASSIGNED_PARTITION && !registry.contains_step(key) {
                absorb(fields);
            }
        }
        if let Some(fields) = partitioned.get(UNASSIGNED_PARTITION) {
            absorb(fields);
        }
        for step in registry.steps() {
            if let Some(fields) = partitioned.get(&step.id) {
                absorb(fields);
            }
        }
        record
    }

    /// Split the record by owning step. Fields no step owns land in
    /// [`UNASSIGNED_PARTITION`].
    pub fn partition(&self, registry: &StepRegistry) -> StepPartitionedRecord {
        let mut partitioned = StepPartitionedRecord::new();
        for (name, value) in &self.record {
            let key = registry
                .step_of_field(name)
                .map_or(UNASSIGNED_PARTITION, |step| step.id.as_str());
            partitioned
                .entry(key.to_string())
                .or_default()
                .insert(name.clone(), value.clone());
        }
        partitioned
    }

    // ── Field arrays ──────────────────────────────────────────────────────────

    /// Append `item` to array `field`, creating the array if the field is
    /// unset. Returns the new item's index.
    pub fn push_item(&mut self, field: &str, item: Value) -> Result<usize, StoreError> {
        let slot = self
            .record
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if slot.is_null() {
            *slot = Value::Array(Vec::new());
        }
        let items = slot.as_array_mut().ok_or_else(|| StoreError::NotAnArray {
            field: field.to_string(),
        })?;
        items.push(item);
        Ok(items.len() - 1)
    }

    /// Shallow-merge `patch` into item `index` of array `field`. An item
    /// that is not an object is replaced by `patch`.
    pub fn update_item(
        &mut self,
        field: &str,
        index: usize,
        patch: &FieldMap,
    ) -> Result<(), StoreError> {
        let items = self.items_mut(field)?;
        let len = items.len();
        let item = items.get_mut(index).ok_or_else(|| StoreError::IndexOutOfRange {
            field: field.to_string(),
            index,
            len,
        })?;
        match item.as_object_mut() {
            Some(entry) => {
                for (name, value) in patch {
                    entry.insert(name.clone(), value.clone());
                }
            }
            None => *item = Value::Object(patch.clone()),
        }
        Ok(())
    }

    /// Remove and return item `index` of array `field`.
    pub fn remove_item(&mut self, field: &str, index: usize) -> Result<Value, StoreError> {
        let items = self.items_mut(field)?;
        if index >= items.len() {
            return Err(StoreError::IndexOutOfRange {
                field: field.to_string(),
                index,
                len: items.len(),
            });
        }
        Ok(items.remove(index))
    }

    fn items_mut(&mut self, field: &str) -> Result<&mut Vec<Value>, StoreError> {
        match self.record.get_mut(field) {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(StoreError::NotAnArray {
                field: field.to_string(),
            }),
            None => Err(StoreError::IndexOutOfRange {
                field: field.to_string(),
                index: 0,
                len: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> FieldMap {
        value.as_object().cloned().expect("test value must be an object")
    }

    fn registry() -> StepRegistry {
        StepRegistry::from_toml_str(
            r#"
[[steps]]
id = "first"
title = "First"

[[steps.fields]]
name = "a"
label = "A"
type = "text"

[[steps]]
id = "second"
title = "Second"

[[steps.fields]]
name = "b"
label = "B"
type = "text"
"#,
        )
        .expect("valid registry")
    }

    #[test]
    fn sequential_merges_keep_earlier_keys() {
        let mut store = FormDataStore::new();
        store.merge(&map(json!({ "a": 1 })));
        let record = store.merge(&map(json!({ "b": 2 })));
        assert_eq!(Value::Object(record.clone()), json!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn later_merge_overwrites() {
        let mut store = FormDataStore::new();
        store.merge(&map(json!({ "a": 1 })));
        store.merge(&map(json!({ "a": 2 })));
        assert_eq!(store.get("a"), Some(&json!(2)));
        assert_eq!(store.record().len(), 1);
    }

    #[test]
    fn reset_empties_the_record() {
        let mut store = FormDataStore::from_record(map(json!({ "a": 1 })));
        assert!(store.reset().is_empty());
    }

    #[test]
    fn flatten_uses_registry_order_not_key_order() {
        // "first" sorts before "second" and "zzz"; registry order decides the
        // winner regardless.
        let registry = registry();
        let mut partitioned = StepPartitionedRecord::new();
        partitioned.insert("second".into(), map(json!({ "shared": "from second", "b": 2 })));
        partitioned.insert("first".into(), map(json!({ "shared": "from first", "a": 1 })));
        partitioned.insert("zzz".into(), map(json!({ "shared": "from unknown", "z": 26 })));
        partitioned.insert(UNASSIGNED_PARTITION.into(), map(json!({ "orphan": true })));

        let flat = FormDataStore::flatten(&registry, &partitioned);
        assert_eq!(
            Value::Object(flat),
            json!({ "a": 1, "b": 2, "z": 26, "orphan": true, "shared": "from second" })
        );
    }

    #[test]
    fn partition_then_flatten_restores_the_record() {
        let registry = registry();
        let store = FormDataStore::from_record(map(json!({ "a": "x", "b": "y", "legacy": 3 })));
        let partitioned = store.partition(&registry);

        assert_eq!(partitioned["first"], map(json!({ "a": "x" })));
        assert_eq!(partitioned["second"], map(json!({ "b": "y" })));
        assert_eq!(partitioned[UNASSIGNED_PARTITION], map(json!({ "legacy": 3 })));
        assert_eq!(&FormDataStore::flatten(&registry, &partitioned), store.record());
    }

    #[test]
    fn field_array_edits() {
        let mut store = FormDataStore::new();
        assert_eq!(store.push_item("subs", json!({ "name": "A" })), Ok(0));
        assert_eq!(store.push_item("subs", json!({ "name": "B" })), Ok(1));

        store
            .update_item("subs", 1, &map(json!({ "country": "de" })))
            .expect("update second item");
        assert_eq!(store.get("subs"), Some(&json!([{ "name": "A" }, { "name": "B", "country": "de" }])));

        let removed = store.remove_item("subs", 0).expect("remove first item");
        assert_eq!(removed, json!({ "name": "A" }));
        assert_eq!(store.get("subs"), Some(&json!([{ "name": "B", "country": "de" }])));
    }

    #[test]
    fn field_array_errors() {
        let mut store = FormDataStore::from_record(map(json!({ "name": "Acme", "subs": [] })));
        assert!(matches!(
            store.push_item("name", json!({})),
            Err(StoreError::NotAnArray { .. })
        ));
        assert!(matches!(
            store.remove_item("subs", 0),
            Err(StoreError::IndexOutOfRange { index: 0, len: 0, .. })
        ));
        assert!(matches!(
            store.update_item("missing", 2, &FieldMap::new()),
            Err(StoreError::IndexOutOfRange { .. })
        ));
    }
}
