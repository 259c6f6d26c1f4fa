//! The ordered list of steps that makes up one form.

use std::collections::{BTreeSet, HashSet};

use serde::Deserialize;

use super::field::{DisplayCondition, FieldDefinition, FieldKind, FieldType};
use super::step::{RawStep, StepDefinition};
use super::ConfigError;

/// Top-level structure of a form definition file.
#[derive(Debug, Deserialize)]
struct FormFile {
    steps: Vec<RawStep>,
}

/// Static, validated, ordered step definitions.
///
/// Construction fails eagerly on any developer error; a `StepRegistry` that
/// exists always has at least one step, unique step ids, and conditions that
/// only reference fields the registry defines.
#[derive(Debug, Clone)]
pub struct StepRegistry {
    steps: Vec<StepDefinition>,
}

impl StepRegistry {
    pub fn new(steps: Vec<StepDefinition>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::EmptyRegistry);
        }

        let mut ids = HashSet::new();
        for step in &steps {
            if !is_valid_step_id(&step.id) {
                return Err(ConfigError::InvalidStepId {
                    id: step.id.clone(),
                });
            }
            if !ids.insert(step.id.as_str()) {
                return Err(ConfigError::DuplicateStepId {
                    id: step.id.clone(),
                });
            }
        }

        let known: BTreeSet<&str> = steps.iter().flat_map(StepDefinition::record_names).collect();
        for step in &steps {
            check_conditions(&step.fields, &known)?;
        }

        Ok(Self { steps })
    }

    /// Parse a TOML form definition (`[[steps]]` with `[[steps.fields]]`).
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let file: FormFile =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let steps = file
            .steps
            .into_iter()
            .map(StepDefinition::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(steps)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn get(&self, index: usize) -> Option<&StepDefinition> {
        self.steps.get(index)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn contains_step(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    /// The step that owns record field `name`, if any.
    pub fn step_of_field(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.owns(name))
    }

    /// Every field type used anywhere in the form.
    pub fn field_types(&self) -> BTreeSet<FieldType> {
        let mut types = BTreeSet::new();
        for field in self.steps.iter().flat_map(|s| s.fields.iter()) {
            field.collect_types(&mut types);
        }
        types
    }
}

fn is_valid_step_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Top-level conditions must reference a field of the registry; conditions on
/// array item fields must reference a sibling item field.
fn check_conditions(fields: &[FieldDefinition], known: &BTreeSet<&str>) -> Result<(), ConfigError> {
    for field in fields {
        for condition in conditions_of(field) {
            if !known.contains(condition.field.as_str()) {
                return Err(ConfigError::UnknownConditionField {
                    field: field.name.clone(),
                    references: condition.field.clone(),
                });
            }
        }
        match &field.kind {
            FieldKind::ConditionalGroup(group) => check_conditions(&group.fields, known)?,
            FieldKind::FieldArray(def) => {
                let siblings: BTreeSet<&str> =
                    def.item_fields.iter().map(|f| f.name.as_str()).collect();
                check_conditions(&def.item_fields, &siblings)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn conditions_of(field: &FieldDefinition) -> impl Iterator<Item = &DisplayCondition> {
    field
        .conditional_display
        .iter()
        .chain(field.required_when.iter())
}
