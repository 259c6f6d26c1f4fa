//! The schema capability and its built-in declarative implementation.
//!
//! A schema only answers "does this candidate record satisfy me, and if not,
//! where and why". Steps and navigation are not its concern;
//! [`super::validator`] turns its answer into gating decisions.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::form::field::{
    is_present, ChoiceField, FieldArrayDef, FieldDefinition, FieldKind, NumberConstraints,
    TextConstraints,
};
use crate::form::ConfigError;
use crate::store::FieldMap;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// One failed check. `path` starts with the top-level field name; issues on
/// array items continue with the item index and the item field name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaIssue {
    pub path: Vec<String>,
    pub message: String,
}

/// Result of [`SchemaValidator::safe_parse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SchemaIssue>,
}

impl ParseOutcome {
    pub fn passed() -> Self {
        Self {
            success: true,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<SchemaIssue>) -> Self {
        Self {
            success: false,
            errors,
        }
    }

    fn from_issues(errors: Vec<SchemaIssue>) -> Self {
        if errors.is_empty() {
            Self::passed()
        } else {
            Self::failed(errors)
        }
    }
}

/// Validation capability attached to a step.
///
/// Implemented by [`FieldSchema`] and by any
/// `Fn(&FieldMap) -> ParseOutcome`, so an external validation library can be
/// adapted with a closure.
pub trait SchemaValidator: Send + Sync {
    fn safe_parse(&self, candidate: &FieldMap) -> ParseOutcome;
}

impl<F> SchemaValidator for F
where
    F: Fn(&FieldMap) -> ParseOutcome + Send + Sync,
{
    fn safe_parse(&self, candidate: &FieldMap) -> ParseOutcome {
        self(candidate)
    }
}

// ── FieldSchema ───────────────────────────────────────────────────────────────

/// Schema compiled from a step's field definitions.
///
/// Hidden fields (display condition false) are skipped entirely. Blank
/// strings, `null`, and empty arrays count as "not set".
#[derive(Debug)]
pub struct FieldSchema {
    fields: Vec<CompiledField>,
}

#[derive(Debug)]
struct CompiledField {
    def: FieldDefinition,
    pattern: Option<Regex>,
    /// Item fields of an array, or members of a group.
    children: Vec<CompiledField>,
}

impl FieldSchema {
    pub fn compile(fields: &[FieldDefinition]) -> Result<Self, ConfigError> {
        let fields = fields
            .iter()
            .map(CompiledField::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }
}

impl SchemaValidator for FieldSchema {
    fn safe_parse(&self, candidate: &FieldMap) -> ParseOutcome {
        let mut issues = Vec::new();
        for field in &self.fields {
            field.check(candidate, &[], &mut issues);
        }
        ParseOutcome::from_issues(issues)
    }
}

impl CompiledField {
    fn compile(def: &FieldDefinition) -> Result<Self, ConfigError> {
        let source = match &def.kind {
            FieldKind::Text(c) | FieldKind::Textarea(c) => c.pattern.as_deref(),
            FieldKind::Email => Some(EMAIL_PATTERN),
            _ => None,
        };
        let pattern = source
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidPattern {
                    field: def.name.clone(),
                    message: e.to_string(),
                })
            })
            .transpose()?;
        let children = match &def.kind {
            FieldKind::FieldArray(a) => a.item_fields.as_slice(),
            FieldKind::ConditionalGroup(g) => g.fields.as_slice(),
            _ => &[],
        };
        let children = children
            .iter()
            .map(CompiledField::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            def: def.clone(),
            pattern,
            children,
        })
    }

    fn check(&self, scope: &FieldMap, prefix: &[String], issues: &mut Vec<SchemaIssue>) {
        let def = &self.def;
        if !def.is_visible(scope) {
            return;
        }
        if let FieldKind::ConditionalGroup(_) = def.kind {
            for member in &self.children {
                member.check(scope, prefix, issues);
            }
            return;
        }

        let label = def.label.as_str();
        let required = def.is_required(scope);
        let Some(value) = scope.get(&def.name).filter(|v| is_present(v)) else {
            if required {
                let message = match &def.kind {
                    FieldKind::FieldArray(a) => at_least_items(label, a.min_items.unwrap_or(1).max(1)),
                    _ => format!("{label} is required"),
                };
                issues.push(issue(prefix, &def.name, message));
            }
            return;
        };

        let message = match &def.kind {
            FieldKind::Text(c) | FieldKind::Textarea(c) => {
                check_text(label, c, self.pattern.as_ref(), value)
            }
            FieldKind::Email => check_email(label, self.pattern.as_ref(), value),
            FieldKind::Number(c) => check_number(label, c, value),
            FieldKind::Select(c) | FieldKind::Radio(c) => check_choice(label, c, value),
            FieldKind::Checkbox => check_checkbox(label, required, value),
            FieldKind::FieldArray(a) => {
                self.check_items(a, required, value, prefix, issues);
                None
            }
            FieldKind::ConditionalGroup(_) => None,
        };
        if let Some(message) = message {
            issues.push(issue(prefix, &def.name, message));
        }
    }

    fn check_items(
        &self,
        array: &FieldArrayDef,
        required: bool,
        value: &Value,
        prefix: &[String],
        issues: &mut Vec<SchemaIssue>,
    ) {
        let def = &self.def;
        let label = def.label.as_str();
        let Some(items) = value.as_array() else {
            issues.push(issue(prefix, &def.name, format!("{label} must be a list")));
            return;
        };

        let min = array.min_items.unwrap_or(0).max(usize::from(required));
        if items.len() < min {
            issues.push(issue(prefix, &def.name, at_least_items(label, min)));
        }
        if let Some(max) = array.max_items {
            if items.len() > max {
                let noun = if max == 1 { "item" } else { "items" };
                issues.push(issue(
                    prefix,
                    &def.name,
                    format!("{label} must contain at most {max} {noun}"),
                ));
            }
        }

        for (index, item) in items.iter().enumerate() {
            let mut item_prefix = prefix.to_vec();
            item_prefix.push(def.name.clone());
            item_prefix.push(index.to_string());
            match item.as_object() {
                Some(entry) => {
                    for child in &self.children {
                        child.check(entry, &item_prefix, issues);
                    }
                }
                None => issues.push(SchemaIssue {
                    path: item_prefix,
                    message: format!("{label} entry {} is invalid", index + 1),
                }),
            }
        }
    }
}

fn issue(prefix: &[String], name: &str, message: String) -> SchemaIssue {
    let mut path = prefix.to_vec();
    path.push(name.to_string());
    SchemaIssue { path, message }
}

fn at_least_items(label: &str, n: usize) -> String {
    let noun = if n == 1 { "item" } else { "items" };
    format!("{label} must contain at least {n} {noun}")
}

fn check_text(
    label: &str,
    constraints: &TextConstraints,
    pattern: Option<&Regex>,
    value: &Value,
) -> Option<String> {
    let Some(text) = value.as_str() else {
        return Some(format!("{label} must be text"));
    };
    let length = text.chars().count();
    if let Some(min) = constraints.min_length {
        if length < min {
            return Some(format!("{label} must be at least {min} characters"));
        }
    }
    if let Some(max) = constraints.max_length {
        if length > max {
            return Some(format!("{label} must be at most {max} characters"));
        }
    }
    if pattern.is_some_and(|re| !re.is_match(text)) {
        return Some(format!("{label} has an invalid format"));
    }
    None
}

fn check_email(label: &str, pattern: Option<&Regex>, value: &Value) -> Option<String> {
    let valid = match (value.as_str(), pattern) {
        (Some(text), Some(re)) => re.is_match(text.trim()),
        _ => false,
    };
    (!valid).then(|| format!("{label} must be a valid email address"))
}

fn check_number(label: &str, constraints: &NumberConstraints, value: &Value) -> Option<String> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(number) = number.filter(|n| n.is_finite()) else {
        return Some(format!("{label} must be a number"));
    };
    if constraints.integer && number.fract() != 0.0 {
        return Some(format!("{label} must be a whole number"));
    }
    if let Some(min) = constraints.min {
        if number < min {
            return Some(format!("{label} must be at least {}", format_bound(min)));
        }
    }
    if let Some(max) = constraints.max {
        if number > max {
            return Some(format!("{label} must be at most {}", format_bound(max)));
        }
    }
    None
}

fn format_bound(bound: f64) -> String {
    if bound.fract() == 0.0 {
        format!("{bound:.0}")
    } else {
        bound.to_string()
    }
}

fn check_choice(label: &str, choices: &ChoiceField, value: &Value) -> Option<String> {
    let chosen = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    };
    let listed = choices.options.iter().any(|o| o.value == chosen);
    (!listed).then(|| format!("{label} must be one of the listed options"))
}

fn check_checkbox(label: &str, required: bool, value: &Value) -> Option<String> {
    match value {
        Value::Bool(false) if required => Some(format!("{label} is required")),
        Value::Bool(_) => None,
        _ => Some(format!("{label} must be true or false")),
    }
}
