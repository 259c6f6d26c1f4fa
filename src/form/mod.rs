//! Form definitions: fields, steps, and the ordered step registry.
//!
//! Everything in this module is static configuration. It is checked once, at
//! construction time, and any inconsistency is reported as a [`ConfigError`]
//! before a controller or renderer is ever built on top of it.

pub mod builtin;
pub mod field;
pub mod registry;
pub mod step;

pub use field::{
    ChoiceField, ConditionOperator, DisplayCondition, FieldArrayDef, FieldDefinition, FieldKind,
    FieldType, GroupDef, NumberConstraints, SelectOption, TextConstraints,
};
pub use registry::StepRegistry;
pub use step::StepDefinition;

/// Developer errors in a form definition.
///
/// These are fatal: a registry that produces one of them is never handed to
/// a controller. They surface to the binary as `AppError::Configuration`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("a form must declare at least one step")]
    EmptyRegistry,

    #[error("invalid step id '{id}': only letters, digits, '_' and '-' are allowed")]
    InvalidStepId { id: String },

    #[error("duplicate step id '{id}'")]
    DuplicateStepId { id: String },

    #[error("step '{step}' declares a field with an empty name")]
    EmptyFieldName { step: String },

    #[error("'{scope}' declares field '{field}' more than once")]
    DuplicateField { scope: String, field: String },

    #[error("field '{field}' must declare at least one option")]
    MissingOptions { field: String },

    #[error("field '{field}' declares option '{value}' more than once")]
    DuplicateOption { field: String, value: String },

    #[error("field array '{field}' must declare its item fields")]
    MissingItemSchema { field: String },

    #[error("field '{field}' has inconsistent bounds: {detail}")]
    InvalidBounds { field: String, detail: String },

    #[error("field '{field}' has an invalid pattern: {message}")]
    InvalidPattern { field: String, message: String },

    #[error("field '{field}' has a condition on unknown field '{references}'")]
    UnknownConditionField { field: String, references: String },

    #[error("no renderer registered for field type '{field_type}'")]
    MissingRenderer { field_type: FieldType },

    #[error("cannot parse definition: {0}")]
    Parse(String),

    #[error("invalid setting: {0}")]
    Invalid(String),
}
