//! The built-in sustainability report form.
//!
//! The definition ships as TOML inside the binary so the same file format
//! serves both the built-in form and user-supplied ones.

use super::registry::StepRegistry;
use super::ConfigError;

/// Source of the built-in form definition.
pub const SUSTAINABILITY_FORM_TOML: &str = include_str!("../../forms/sustainability.toml");

/// Build the four-step sustainability report registry: company information,
/// business model, sustainability practices, subsidiary management.
pub fn sustainability_report() -> Result<StepRegistry, ConfigError> {
    StepRegistry::from_toml_str(SUSTAINABILITY_FORM_TOML)
}
