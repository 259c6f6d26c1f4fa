//! The persisted envelope.
//!
//! ```json
//! {
//!   "data": { "company_info": { "company_name": "Acme" }, "$unassigned": {} },
//!   "currentStep": 1,
//!   "timestamp": 1760572800000
//! }
//! ```
//!
//! `data` is written step-partitioned. Reading also accepts the flat legacy
//! shape, where `data` maps field names straight to values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::form::StepRegistry;
use crate::store::{FieldMap, FormDataStore, StepPartitionedRecord, UNASSIGNED_PARTITION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEnvelope {
    #[serde(default)]
    pub data: FieldMap,
    /// Kept signed so a corrupt negative value is clamped, not rejected.
    #[serde(default)]
    pub current_step: i64,
    /// Epoch milliseconds of the write.
    #[serde(default)]
    pub timestamp: i64,
}

impl PersistedEnvelope {
    /// Snapshot `store` in the canonical step-partitioned shape.
    pub fn capture(
        registry: &StepRegistry,
        store: &FormDataStore,
        current_step: usize,
        timestamp: i64,
    ) -> Self {
        let data = store
            .partition(registry)
            .into_iter()
            .map(|(step, fields)| (step, Value::Object(fields)))
            .collect();
        Self {
            data,
            current_step: i64::try_from(current_step).unwrap_or(i64::MAX),
            timestamp,
        }
    }

    /// `true` when `data` is step-partitioned: every value is an object and at
    /// least one key names a registered step or the unassigned partition.
    pub fn is_partitioned(&self, registry: &StepRegistry) -> bool {
        !self.data.is_empty()
            && self.data.values().all(Value::is_object)
            && self
                .data
                .keys()
                .any(|k| k == UNASSIGNED_PARTITION || registry.contains_step(k))
    }

    /// The flat record this envelope describes.
    pub fn restore(&self, registry: &StepRegistry) -> FieldMap {
        if !self.is_partitioned(registry) {
            return self.data.clone();
        }
        let partitioned: StepPartitionedRecord = self
            .data
            .iter()
            .filter_map(|(key, value)| value.as_object().map(|m| (key.clone(), m.clone())))
            .collect();
        FormDataStore::flatten(registry, &partitioned)
    }
}
