//! Step validation.
//!
//! - [`schema`]: the `SchemaValidator` capability and the built-in
//!   declarative [`FieldSchema`] compiled from field definitions
//! - [`validator`]: reduces schema issues to one message per field and
//!   decides whether a step may be left forwards

pub mod schema;
pub mod validator;

pub use schema::{FieldSchema, ParseOutcome, SchemaIssue, SchemaValidator};
pub use validator::{StepValidation, StepValidator, FORM_ERROR_KEY};
