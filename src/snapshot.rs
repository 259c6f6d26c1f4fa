//! Serializable view of a controller for renderers and front ends.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::controller::{FormState, MultiStepFormController};
use crate::store::FieldMap;

/// Everything a renderer needs to draw the current step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub state: FormState,
    pub current_step: usize,
    pub total_steps: usize,
    pub is_first_step: bool,
    pub is_last_step: bool,
    pub progress_percent: u8,
    pub is_submitting: bool,
    /// Id of the current step.
    pub step_id: String,
    pub step_title: String,
    /// Fields of the current step whose display condition holds.
    pub visible_fields: Vec<String>,
    pub data: FieldMap,
    pub field_errors: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_error: Option<String>,
}

impl From<&MultiStepFormController> for FormSnapshot {
    fn from(c: &MultiStepFormController) -> Self {
        let navigator = c.navigator();
        let step = c.current_definition();
        let visible_fields = step
            .map(|s| {
                s.fields
                    .iter()
                    .filter(|f| f.is_visible(c.record()))
                    .map(|f| f.name.clone())
                    .collect()
            })
            .unwrap_or_default();
        Self {
            state: c.state(),
            current_step: navigator.current_step(),
            total_steps: navigator.total_steps(),
            is_first_step: navigator.is_first_step(),
            is_last_step: navigator.is_last_step(),
            progress_percent: navigator.progress_percent(),
            is_submitting: c.is_submitting(),
            step_id: step.map(|s| s.id.clone()).unwrap_or_default(),
            step_title: step.map(|s| s.title.clone()).unwrap_or_default(),
            visible_fields,
            data: c.record().clone(),
            field_errors: c.field_errors().clone(),
            submit_error: c.submit_error().map(str::to_string),
        }
    }
}

impl MultiStepFormController {
    pub fn snapshot(&self) -> FormSnapshot {
        FormSnapshot::from(self)
    }
}
