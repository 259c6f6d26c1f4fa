//! Field data model.
//!
//! A [`FieldDefinition`] carries the attributes every field shares (name,
//! label, requirement, display condition) and a type-discriminated
//! [`FieldKind`] payload holding only what that kind needs: only `select` and
//! `radio` carry options, only `field_array` carries an item schema.
//!
//! The serialized form flattens the kind into the field so the `"type"`
//! discriminant sits next to the common attributes:
//!
//! ```toml
//! [[steps.fields]]
//! name = "country"
//! label = "Country"
//! type = "select"
//! required = true
//! options = [{ value = "de", label = "Germany" }]
//! ```

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConfigError;
use crate::store::FieldMap;

/// Discriminant of [`FieldKind`], used to key renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Email,
    Number,
    Textarea,
    Select,
    Checkbox,
    Radio,
    FieldArray,
    ConditionalGroup,
}

impl FieldType {
    pub const ALL: [FieldType; 9] = [
        FieldType::Text,
        FieldType::Email,
        FieldType::Number,
        FieldType::Textarea,
        FieldType::Select,
        FieldType::Checkbox,
        FieldType::Radio,
        FieldType::FieldArray,
        FieldType::ConditionalGroup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Email => "email",
            FieldType::Number => "number",
            FieldType::Textarea => "textarea",
            FieldType::Select => "select",
            FieldType::Checkbox => "checkbox",
            FieldType::Radio => "radio",
            FieldType::FieldArray => "field_array",
            FieldType::ConditionalGroup => "conditional_group",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Conditions ────────────────────────────────────────────────────────────────

/// Comparison applied by a [`DisplayCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    /// `value` is an array; the governing field must equal one of its entries.
    In,
    NotIn,
    /// The governing field holds a non-blank value. `value` is ignored.
    IsSet,
}

/// A predicate over another field of the same record.
///
/// Used both to hide a field (`conditional_display`) and to make a field
/// required only in some situations (`required_when`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayCondition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

impl DisplayCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Shorthand for the common `field == value` condition.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, ConditionOperator::Equals, value.into())
    }

    pub fn evaluate(&self, record: &FieldMap) -> bool {
        let actual = record.get(&self.field);
        let in_set = || match (&self.value, actual) {
            (Value::Array(candidates), Some(v)) => candidates.iter().any(|c| c == v),
            _ => false,
        };
        match self.operator {
            ConditionOperator::Equals => actual == Some(&self.value),
            ConditionOperator::NotEquals => actual != Some(&self.value),
            ConditionOperator::In => in_set(),
            ConditionOperator::NotIn => !in_set(),
            ConditionOperator::IsSet => actual.is_some_and(is_present),
        }
    }
}

/// `true` when `value` counts as filled in: not `null`, not a blank string,
/// not an empty array.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

// ── Kind payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regular expression the value must match; anchor it to match the whole value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Reject values with a fractional part.
    #[serde(default)]
    pub integer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChoiceField {
    #[serde(default)]
    pub options: Vec<SelectOption>,
}

/// A repeatable group of item fields stored as an array of objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldArrayDef {
    #[serde(default)]
    pub item_fields: Vec<FieldDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

/// A presentational group. Its members live at the top level of the record
/// and inherit the group's display condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDef {
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Type-discriminated field payload, tagged by `"type"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Text(TextConstraints),
    Email,
    Number(NumberConstraints),
    Textarea(TextConstraints),
    Select(ChoiceField),
    Checkbox,
    Radio(ChoiceField),
    FieldArray(FieldArrayDef),
    ConditionalGroup(GroupDef),
}

// ── FieldDefinition ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    /// Makes the field required only while the condition holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_when: Option<DisplayCondition>,
    /// Hides the field (and skips its validation) while the condition is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_display: Option<DisplayCondition>,
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            required: false,
            required_when: None,
            conditional_display: None,
            kind,
        }
    }

    pub fn text(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::new(name, label, FieldKind::Text(TextConstraints::default()))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_when(mut self, condition: DisplayCondition) -> Self {
        self.required_when = Some(condition);
        self
    }

    pub fn shown_when(mut self, condition: DisplayCondition) -> Self {
        self.conditional_display = Some(condition);
        self
    }

    /// Set `min_length` on a text or textarea field; other kinds are left as-is.
    pub fn min_length(mut self, min: usize) -> Self {
        if let FieldKind::Text(c) | FieldKind::Textarea(c) = &mut self.kind {
            c.min_length = Some(min);
        }
        self
    }

    pub fn field_type(&self) -> FieldType {
        match self.kind {
            FieldKind::Text(_) => FieldType::Text,
            FieldKind::Email => FieldType::Email,
            FieldKind::Number(_) => FieldType::Number,
            FieldKind::Textarea(_) => FieldType::Textarea,
            FieldKind::Select(_) => FieldType::Select,
            FieldKind::Checkbox => FieldType::Checkbox,
            FieldKind::Radio(_) => FieldType::Radio,
            FieldKind::FieldArray(_) => FieldType::FieldArray,
            FieldKind::ConditionalGroup(_) => FieldType::ConditionalGroup,
        }
    }

    pub fn options(&self) -> Option<&[SelectOption]> {
        match &self.kind {
            FieldKind::Select(c) | FieldKind::Radio(c) => Some(&c.options),
            _ => None,
        }
    }

    pub fn is_visible(&self, record: &FieldMap) -> bool {
        self.conditional_display
            .as_ref()
            .map_or(true, |c| c.evaluate(record))
    }

    pub fn is_required(&self, record: &FieldMap) -> bool {
        self.required || self.required_when.as_ref().is_some_and(|c| c.evaluate(record))
    }

    /// Names this field contributes to the flat record: its own name, or the
    /// members' names for a conditional group.
    pub fn record_names(&self) -> Vec<&str> {
        match &self.kind {
            FieldKind::ConditionalGroup(group) => group
                .fields
                .iter()
                .flat_map(FieldDefinition::record_names)
                .collect(),
            _ => vec![self.name.as_str()],
        }
    }

    /// Every field type used by this field, descending into arrays and groups.
    pub fn collect_types(&self, into: &mut BTreeSet<FieldType>) {
        into.insert(self.field_type());
        let children = match &self.kind {
            FieldKind::FieldArray(def) => def.item_fields.as_slice(),
            FieldKind::ConditionalGroup(group) => group.fields.as_slice(),
            _ => &[],
        };
        for child in children {
            child.collect_types(into);
        }
    }

    /// Check the definition for developer errors.
    ///
    /// Duplicate names and condition references need the surrounding step and
    /// registry; they are checked there.
    pub fn check(&self) -> Result<(), ConfigError> {
        let field = || self.name.clone();
        match &self.kind {
            FieldKind::Text(c) | FieldKind::Textarea(c) => {
                if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
                    if min > max {
                        return Err(ConfigError::InvalidBounds {
                            field: field(),
                            detail: format!("min_length {min} exceeds max_length {max}"),
                        });
                    }
                }
                if let Some(pattern) = &c.pattern {
                    regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                        field: field(),
                        message: e.to_string(),
                    })?;
                }
            }
            FieldKind::Number(c) => {
                if let (Some(min), Some(max)) = (c.min, c.max) {
                    if min > max {
                        return Err(ConfigError::InvalidBounds {
                            field: field(),
                            detail: format!("min {min} exceeds max {max}"),
                        });
                    }
                }
            }
            FieldKind::Select(c) | FieldKind::Radio(c) => {
                if c.options.is_empty() {
                    return Err(ConfigError::MissingOptions { field: field() });
                }
                let mut seen = BTreeSet::new();
                for option in &c.options {
                    if !seen.insert(option.value.as_str()) {
                        return Err(ConfigError::DuplicateOption {
                            field: field(),
                            value: option.value.clone(),
                        });
                    }
                }
            }
            FieldKind::FieldArray(def) => {
                if def.item_fields.is_empty() {
                    return Err(ConfigError::MissingItemSchema { field: field() });
                }
                if let (Some(min), Some(max)) = (def.min_items, def.max_items) {
                    if min > max {
                        return Err(ConfigError::InvalidBounds {
                            field: field(),
                            detail: format!("min_items {min} exceeds max_items {max}"),
                        });
                    }
                }
                let mut seen = BTreeSet::new();
                for item in &def.item_fields {
                    if !seen.insert(item.name.as_str()) {
                        return Err(ConfigError::DuplicateField {
                            scope: self.name.clone(),
                            field: item.name.clone(),
                        });
                    }
                    item.check()?;
                }
            }
            FieldKind::ConditionalGroup(group) => {
                for member in &group.fields {
                    member.check()?;
                }
            }
            FieldKind::Email | FieldKind::Checkbox => {}
        }
        Ok(())
    }
}
