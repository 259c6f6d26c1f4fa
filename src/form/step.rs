//! A single step of a multi-step form.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::field::FieldDefinition;
use super::ConfigError;
use crate::validation::{FieldSchema, SchemaValidator};

/// On-disk shape of a step inside a form definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStep {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// A validated step: metadata, field list, and the schema gating "next".
///
/// The schema defaults to a [`FieldSchema`] compiled from `fields`; callers
/// with their own validation library plug it in through [`with_schema`].
///
/// [`with_schema`]: StepDefinition::with_schema
#[derive(Clone)]
pub struct StepDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub fields: Vec<FieldDefinition>,
    schema: Arc<dyn SchemaValidator>,
}

impl StepDefinition {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        fields: Vec<FieldDefinition>,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        check_fields(&id, &fields)?;
        let schema = FieldSchema::compile(&fields)?;
        Ok(Self {
            id,
            title: title.into(),
            description: description.into(),
            fields,
            schema: Arc::new(schema),
        })
    }

    pub fn from_raw(raw: RawStep) -> Result<Self, ConfigError> {
        Self::new(raw.id, raw.title, raw.description, raw.fields)
    }

    /// Replace the compiled field schema with an external validator.
    pub fn with_schema(mut self, schema: Arc<dyn SchemaValidator>) -> Self {
        self.schema = schema;
        self
    }

    pub fn schema(&self) -> &dyn SchemaValidator {
        self.schema.as_ref()
    }

    /// Names of the record fields owned by this step, in declaration order.
    pub fn record_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .flat_map(FieldDefinition::record_names)
            .collect()
    }

    pub fn owns(&self, name: &str) -> bool {
        self.record_names().contains(&name)
    }

    /// Look up a top-level field (group members included) by name.
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        find_field(&self.fields, name)
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

fn find_field<'a>(fields: &'a [FieldDefinition], name: &str) -> Option<&'a FieldDefinition> {
    fields.iter().find_map(|f| {
        if f.name == name {
            return Some(f);
        }
        match &f.kind {
            super::FieldKind::ConditionalGroup(group) => find_field(&group.fields, name),
            _ => None,
        }
    })
}

fn check_fields(step: &str, fields: &[FieldDefinition]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Err(ConfigError::EmptyFieldName {
                step: step.to_string(),
            });
        }
        field.check()?;
        // A group's own name shares the namespace with its members.
        let mut names = field.record_names();
        if !names.contains(&field.name.as_str()) {
            names.push(field.name.as_str());
        }
        for name in names {
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateField {
                    scope: step.to_string(),
                    field: name.to_string(),
                });
            }
        }
    }
    Ok(())
}
