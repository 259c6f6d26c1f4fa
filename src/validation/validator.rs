//! Step gating.
//!
//! The validator runs a step's schema against the cumulative record and
//! reduces the resulting issues to one message per top-level field, which is
//! what a field renderer can display.

use std::collections::BTreeMap;

use serde::Serialize;

use super::schema::{SchemaIssue, SchemaValidator};
use crate::form::StepDefinition;
use crate::store::FieldMap;

/// Key used for issues that do not point at a field.
pub const FORM_ERROR_KEY: &str = "_form";

const GENERIC_FAILURE: &str = "This step contains invalid values";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepValidation {
    Valid,
    Invalid {
        /// First message per top-level field.
        field_errors: BTreeMap<String, String>,
        /// Every issue the schema reported, including array item paths.
        issues: Vec<SchemaIssue>,
    },
}

impl StepValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, StepValidation::Valid)
    }

    pub fn field_errors(&self) -> BTreeMap<String, String> {
        match self {
            StepValidation::Valid => BTreeMap::new(),
            StepValidation::Invalid { field_errors, .. } => field_errors.clone(),
        }
    }
}

pub struct StepValidator;

impl StepValidator {
    pub fn validate(schema: &dyn SchemaValidator, candidate: &FieldMap) -> StepValidation {
        let outcome = schema.safe_parse(candidate);
        if outcome.success {
            return StepValidation::Valid;
        }

        let mut field_errors = reduce_issues(&outcome.errors);
        if field_errors.is_empty() {
            // A schema may fail without saying why.
            field_errors.insert(FORM_ERROR_KEY.to_string(), GENERIC_FAILURE.to_string());
        }
        StepValidation::Invalid {
            field_errors,
            issues: outcome.errors,
        }
    }

    pub fn validate_step(step: &StepDefinition, candidate: &FieldMap) -> StepValidation {
        let result = Self::validate(step.schema(), candidate);
        if let StepValidation::Invalid { field_errors, .. } = &result {
            tracing::debug!(
                step = %step.id,
                fields = ?field_errors.keys().collect::<Vec<_>>(),
                "step validation failed"
            );
        }
        result
    }
}

/// Key each issue by its first path segment and keep the first message seen.
pub fn reduce_issues(issues: &[SchemaIssue]) -> BTreeMap<String, String> {
    let mut field_errors = BTreeMap::new();
    for issue in issues {
        let key = issue
            .path
            .first()
            .filter(|segment| !segment.is_empty())
            .cloned()
            .unwrap_or_else(|| FORM_ERROR_KEY.to_string());
        field_errors.entry(key).or_insert_with(|| issue.message.clone());
    }
    field_errors
}
