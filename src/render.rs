//! Field rendering seam.
//!
//! Renderers are injected per field type when a [`StepRenderer`] is built;
//! there is no global registry. Construction fails if the form uses a field
//! type nobody can render, so a missing renderer is caught before the first
//! screen is drawn.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::form::field::{FieldDefinition, FieldKind, FieldType};
use crate::form::{ConfigError, StepDefinition, StepRegistry};
use crate::store::FieldMap;

/// Draws one field. Presentational only; holds no form state.
pub trait FieldRenderer: Send + Sync {
    fn render(&self, field: &FieldDefinition, value: Option<&Value>, error: Option<&str>)
        -> String;
}

pub type RendererMap = HashMap<FieldType, Arc<dyn FieldRenderer>>;

pub struct StepRenderer {
    renderers: RendererMap,
}

impl StepRenderer {
    pub fn new(registry: &StepRegistry, renderers: RendererMap) -> Result<Self, ConfigError> {
        if let Some(field_type) = registry
            .field_types()
            .into_iter()
            .find(|t| !renderers.contains_key(t))
        {
            return Err(ConfigError::MissingRenderer { field_type });
        }
        Ok(Self { renderers })
    }

    /// Render the visible fields of `step`, one block per field. Members of
    /// a visible group follow the group's own block.
    pub fn render_step(
        &self,
        step: &StepDefinition,
        record: &FieldMap,
        field_errors: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut blocks = Vec::new();
        self.render_fields(&step.fields, record, field_errors, &mut blocks);
        blocks
    }

    fn render_fields(
        &self,
        fields: &[FieldDefinition],
        record: &FieldMap,
        field_errors: &BTreeMap<String, String>,
        blocks: &mut Vec<String>,
    ) {
        for field in fields.iter().filter(|f| f.is_visible(record)) {
            if let Some(renderer) = self.renderers.get(&field.field_type()) {
                blocks.push(renderer.render(
                    field,
                    record.get(&field.name),
                    field_errors.get(&field.name).map(String::as_str),
                ));
            }
            if let FieldKind::ConditionalGroup(group) = &field.kind {
                self.render_fields(&group.fields, record, field_errors, blocks);
            }
        }
    }
}

// ── Plain text ────────────────────────────────────────────────────────────────

/// Renders every field type as plain text lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFieldRenderer;

/// A renderer map covering every field type with [`TextFieldRenderer`].
pub fn text_renderers() -> RendererMap {
    let renderer: Arc<dyn FieldRenderer> = Arc::new(TextFieldRenderer);
    FieldType::ALL
        .into_iter()
        .map(|t| (t, Arc::clone(&renderer)))
        .collect()
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "(empty)".to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => "(empty)".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl FieldRenderer for TextFieldRenderer {
    fn render(
        &self,
        field: &FieldDefinition,
        value: Option<&Value>,
        error: Option<&str>,
    ) -> String {
        let marker = if field.required { " *" } else { "" };
        let label = &field.label;
        let name = &field.name;

        let mut out = match &field.kind {
            FieldKind::Checkbox => {
                let tick = if value == Some(&Value::Bool(true)) { "x" } else { " " };
                format!("[{tick}] {label}{marker} ({name})")
            }
            FieldKind::Select(choices) | FieldKind::Radio(choices) => {
                let options: Vec<String> = choices
                    .options
                    .iter()
                    .map(|o| format!("{}={}", o.value, o.label))
                    .collect();
                format!(
                    "{label}{marker} ({name}): {}\n    options: {}",
                    display_value(value),
                    options.join(", ")
                )
            }
            FieldKind::FieldArray(array) => {
                let items = value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
                let columns: Vec<&str> =
                    array.item_fields.iter().map(|f| f.name.as_str()).collect();
                let mut block = format!(
                    "{label}{marker} ({name}): {} item(s) [{}]",
                    items.len(),
                    columns.join(", ")
                );
                for (index, item) in items.iter().enumerate() {
                    let cells: Vec<String> = columns
                        .iter()
                        .map(|c| format!("{c}={}", display_value(item.get(*c))))
                        .collect();
                    block.push_str(&format!("\n    {index}. {}", cells.join(", ")));
                }
                block
            }
            FieldKind::ConditionalGroup(_) => format!("── {label} ──"),
            FieldKind::Text(_) | FieldKind::Email | FieldKind::Number(_) | FieldKind::Textarea(_) => {
                format!("{label}{marker} ({name}): {}", display_value(value))
            }
        };

        if let Some(error) = error {
            out.push_str(&format!("\n    ! {error}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::builtin::sustainability_report;
    use serde_json::json;

    fn map(value: Value) -> FieldMap {
        value.as_object().cloned().expect("test value must be an object")
    }

    #[test]
    fn missing_renderer_is_a_configuration_error() {
        let registry = sustainability_report().expect("built-in form");
        let mut renderers = text_renderers();
        renderers.remove(&FieldType::FieldArray);
        match StepRenderer::new(&registry, renderers) {
            Err(ConfigError::MissingRenderer { field_type }) => {
                assert_eq!(field_type, FieldType::FieldArray)
            }
            Err(other) => panic!("expected MissingRenderer, got {other:?}"),
            Ok(_) => panic!("expected MissingRenderer, got a renderer"),
        }
    }

    #[test]
    fn renders_values_and_errors() {
        let field = FieldDefinition::text("company_name", "Company name").required();
        let line = TextFieldRenderer.render(&field, Some(&json!("Acme")), None);
        assert_eq!(line, "Company name * (company_name): Acme");

        let line = TextFieldRenderer.render(&field, None, Some("Company name is required"));
        assert_eq!(
            line,
            "Company name * (company_name): (empty)\n    ! Company name is required"
        );
    }

    #[test]
    fn hidden_fields_are_skipped() {
        let registry = sustainability_report().expect("built-in form");
        let renderer = StepRenderer::new(&registry, text_renderers()).expect("all types covered");
        let step = registry.get(1).expect("business model step");

        let hidden = renderer.render_step(step, &FieldMap::new(), &BTreeMap::new());
        assert!(!hidden.iter().any(|b| b.contains("(export_markets)")));

        let shown = renderer.render_step(
            step,
            &map(json!({ "sells_internationally": true })),
            &BTreeMap::new(),
        );
        assert!(shown.iter().any(|b| b.contains("(export_markets)")));
        assert!(shown.iter().any(|b| b.starts_with("[x] Sells outside")));
    }

    #[test]
    fn group_members_follow_the_group() {
        let registry = sustainability_report().expect("built-in form");
        let renderer = StepRenderer::new(&registry, text_renderers()).expect("all types covered");
        let step = registry.get(2).expect("practices step");

        let blocks = renderer.render_step(
            step,
            &map(json!({ "has_sustainability_policy": "yes" })),
            &BTreeMap::new(),
        );
        let group = blocks
            .iter()
            .position(|b| b.contains("Sustainability policy ──"))
            .expect("group header rendered");
        assert!(blocks[group + 1].contains("(policy_adoption_year)"));
    }

    #[test]
    fn field_arrays_list_their_items() {
        let registry = sustainability_report().expect("built-in form");
        let field = registry
            .get(3)
            .and_then(|s| s.field("subsidiaries"))
            .expect("subsidiaries field");
        let block = TextFieldRenderer.render(
            field,
            Some(&json!([{ "name": "Acme Nordic", "country": "se", "ownership_percentage": 100 }])),
            None,
        );
        assert!(block.starts_with("Subsidiaries (subsidiaries): 1 item(s)"));
        assert!(block.contains("0. name=Acme Nordic, country=se, ownership_percentage=100"));
    }
}
