//! The multi-step form orchestration loop.
//!
//! ```text
//!   Loading ──hydrate──▶ Active ──submit on last step──▶ Submitting
//!                          ▲  ▲                               │
//!                          │  └────────── handler error ──────┤
//!                          │                                  ▼
//!                          └──────────── restart ────────── Complete
//! ```
//!
//! Field edits schedule a debounced write. Every step change writes
//! immediately. Nothing is written while Loading, so an empty initial record
//! can never clobber saved progress.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::form::{StepDefinition, StepRegistry};
use crate::navigation::{NavigationResult, StepNavigator};
use crate::persist::{DebouncedWriter, FormStorage, PersistedEnvelope, PersistenceAdapter};
use crate::store::{FieldMap, FormDataStore, StoreError};
use crate::validation::{SchemaIssue, StepValidation, StepValidator};

/// Default storage key of the built-in form.
pub const DEFAULT_STORAGE_KEY: &str = "sustainability-report";

/// Default delay between the last field edit and its write.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Lifecycle of one form session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FormState {
    /// Saved progress is being read. Edits are recorded and replayed over it.
    Loading,
    /// Accepting edits and navigation.
    Active,
    /// The submit handler is running; edits are rejected.
    Submitting,
    /// Submitted and cleared from storage. Only `restart` is accepted.
    Complete,
}

impl fmt::Display for FormState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormState::Loading => "loading",
            FormState::Active => "active",
            FormState::Submitting => "submitting",
            FormState::Complete => "complete",
        })
    }
}

// ── Submission seam ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SubmitError {
    pub message: String,
}

impl SubmitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Receives the complete record when the last step is submitted.
#[async_trait]
pub trait SubmitHandler: Send + Sync {
    async fn submit(&self, record: &FieldMap) -> Result<(), SubmitError>;
}

// ── Errors and outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FormError {
    #[error("cannot {operation} while the form is {state}")]
    NotEditable {
        state: FormState,
        operation: &'static str,
    },

    #[error("restart is only possible after submission (form is {state})")]
    NotComplete { state: FormState },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The submit handler failed; the form is back in Active.
    #[error("submission failed: {0}")]
    Submission(#[from] SubmitError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Validation of `step` failed; the form is on that step.
    #[serde(rename_all = "camelCase")]
    Invalid {
        step: usize,
        field_errors: BTreeMap<String, String>,
    },
    Moved {
        from: usize,
        to: usize,
    },
    Unchanged,
    /// The last step passed and the handler accepted the record.
    #[serde(rename_all = "camelCase")]
    Submitted {
        attempt_id: Uuid,
    },
}

impl From<NavigationResult> for StepOutcome {
    fn from(result: NavigationResult) -> Self {
        match result {
            NavigationResult::Moved { from, to } => StepOutcome::Moved { from, to },
            NavigationResult::Unchanged => StepOutcome::Unchanged,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub storage_key: String,
    pub debounce: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

/// An edit made while Loading. Array indices refer to the items added while
/// Loading, so they are shifted past the restored items on replay.
#[derive(Debug, Clone)]
enum EarlyEdit {
    Set { name: String, value: Value },
    Push { field: String, item: Value },
    Update { field: String, index: usize, patch: FieldMap },
    Remove { field: String, index: usize },
}

impl EarlyEdit {
    fn field(&self) -> &str {
        match self {
            EarlyEdit::Set { name, .. } => name,
            EarlyEdit::Push { field, .. }
            | EarlyEdit::Update { field, .. }
            | EarlyEdit::Remove { field, .. } => field,
        }
    }
}

/// Replay `edits` in order on top of the hydrated `store`.
fn replay_early_edits(store: &mut FormDataStore, edits: Vec<EarlyEdit>) {
    // Items restored ahead of the early ones, per array field.
    let mut offsets: HashMap<String, usize> = HashMap::new();
    for edit in edits {
        let field = edit.field().to_string();
        let offset = *offsets.entry(field.clone()).or_insert_with(|| {
            store
                .get(&field)
                .and_then(Value::as_array)
                .map_or(0, Vec::len)
        });
        let result = match edit {
            EarlyEdit::Set { name, value } => {
                store.set_field(name.clone(), value);
                offsets.insert(name, 0);
                Ok(())
            }
            EarlyEdit::Push { field, item } => store.push_item(&field, item).map(|_| ()),
            EarlyEdit::Update {
                field,
                index,
                patch,
            } => store.update_item(&field, index + offset, &patch),
            EarlyEdit::Remove { field, index } => {
                store.remove_item(&field, index + offset).map(|_| ())
            }
        };
        if let Err(e) = result {
            tracing::warn!(field = %field, "early edit dropped on replay: {e}");
        }
    }
}

pub struct MultiStepFormController {
    registry: Arc<StepRegistry>,
    navigator: StepNavigator,
    store: FormDataStore,
    persistence: Arc<PersistenceAdapter>,
    writer: DebouncedWriter,
    submitter: Arc<dyn SubmitHandler>,
    state: FormState,
    /// Mirrors `state` for observers outside the `&mut` borrow.
    state_tx: watch::Sender<FormState>,
    field_errors: BTreeMap<String, String>,
    issues: Vec<SchemaIssue>,
    submit_error: Option<String>,
    /// Edits made while Loading, replayed over the hydrated record.
    early_edits: Vec<EarlyEdit>,
    last_attempt: Option<Uuid>,
}

impl MultiStepFormController {
    /// A controller in the Loading state. Call [`hydrate`](Self::hydrate)
    /// before navigating.
    pub fn new(
        registry: Arc<StepRegistry>,
        storage: Arc<dyn FormStorage>,
        submitter: Arc<dyn SubmitHandler>,
        options: ControllerOptions,
    ) -> Self {
        let persistence = Arc::new(PersistenceAdapter::new(storage, options.storage_key));
        let writer = DebouncedWriter::new(Arc::clone(&persistence), options.debounce);
        Self {
            navigator: StepNavigator::new(registry.len()),
            registry,
            store: FormDataStore::new(),
            persistence,
            writer,
            submitter,
            state: FormState::Loading,
            state_tx: watch::Sender::new(FormState::Loading),
            field_errors: BTreeMap::new(),
            issues: Vec::new(),
            submit_error: None,
            early_edits: Vec::new(),
            last_attempt: None,
        }
    }

    /// [`new`](Self::new) followed by [`hydrate`](Self::hydrate).
    pub async fn open(
        registry: Arc<StepRegistry>,
        storage: Arc<dyn FormStorage>,
        submitter: Arc<dyn SubmitHandler>,
        options: ControllerOptions,
    ) -> Self {
        let mut controller = Self::new(registry, storage, submitter, options);
        controller.hydrate().await;
        controller
    }

    /// Load saved progress and enter Active. A missing or corrupt entry
    /// starts an empty form at step 0.
    pub async fn hydrate(&mut self) {
        if self.state != FormState::Loading {
            tracing::debug!(state = %self.state, "hydrate ignored; already loaded");
            return;
        }

        let mut record = FieldMap::new();
        if let Some(envelope) = self.persistence.load().await {
            record = envelope.restore(&self.registry);
            let step = self.navigator.clamp(envelope.current_step);
            if i64::try_from(step).ok() != Some(envelope.current_step) {
                tracing::warn!(
                    saved = envelope.current_step,
                    restored = step,
                    "saved step out of range; clamped"
                );
            }
            self.navigator.set_step(step);
        }

        let early_edits = std::mem::take(&mut self.early_edits);
        self.store = FormDataStore::from_record(record);
        let early_count = early_edits.len();
        replay_early_edits(&mut self.store, early_edits);
        self.set_state(FormState::Active);
        tracing::info!(
            step = self.navigator.current_step(),
            fields = self.store.record().len(),
            early_edits = early_count,
            "form hydrated"
        );

        if early_count > 0 {
            self.schedule_persist();
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn state(&self) -> FormState {
        self.state
    }

    /// A receiver that sees every state transition, including the
    /// Submitting phase while the handler runs.
    pub fn subscribe_state(&self) -> watch::Receiver<FormState> {
        self.state_tx.subscribe()
    }

    pub fn is_submitting(&self) -> bool {
        self.state == FormState::Submitting
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn navigator(&self) -> &StepNavigator {
        &self.navigator
    }

    pub fn current_step(&self) -> usize {
        self.navigator.current_step()
    }

    pub fn current_definition(&self) -> Option<&StepDefinition> {
        self.registry.get(self.navigator.current_step())
    }

    pub fn record(&self) -> &FieldMap {
        self.store.record()
    }

    pub fn field_errors(&self) -> &BTreeMap<String, String> {
        &self.field_errors
    }

    /// Every issue of the last failed validation, including array item paths.
    pub fn issues(&self) -> &[SchemaIssue] {
        &self.issues
    }

    pub fn submit_error(&self) -> Option<&str> {
        self.submit_error.as_deref()
    }

    pub fn last_attempt(&self) -> Option<Uuid> {
        self.last_attempt
    }

    /// `true` while a debounced write is waiting.
    pub fn has_pending_write(&self) -> bool {
        self.writer.is_pending()
    }

    // ── Editing ───────────────────────────────────────────────────────────────

    /// Last write wins. While Loading the edit is buffered and survives
    /// hydration.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> Result<(), FormError> {
        self.ensure_editable("edit a field")?;
        let name = name.into();
        self.store.set_field(name.clone(), value.clone());
        if self.state == FormState::Loading {
            self.early_edits.push(EarlyEdit::Set { name, value });
            return Ok(());
        }
        self.schedule_persist();
        Ok(())
    }

    /// Re-validate `name` against its owning step and update its error.
    /// Returns the field's current error, if any.
    pub fn blur_field(&mut self, name: &str) -> Result<Option<String>, FormError> {
        self.ensure_editable("validate a field")?;
        if self.state == FormState::Loading {
            return Ok(None);
        }
        Ok(self.refresh_field_error(name))
    }

    pub fn push_item(&mut self, field: &str, item: Value) -> Result<usize, FormError> {
        self.ensure_editable("add an item")?;
        let index = self.store.push_item(field, item.clone())?;
        if self.state == FormState::Loading {
            self.early_edits.push(EarlyEdit::Push {
                field: field.to_string(),
                item,
            });
        }
        self.after_array_edit(field);
        Ok(index)
    }

    pub fn update_item(
        &mut self,
        field: &str,
        index: usize,
        patch: &FieldMap,
    ) -> Result<(), FormError> {
        self.ensure_editable("edit an item")?;
        self.store.update_item(field, index, patch)?;
        if self.state == FormState::Loading {
            self.early_edits.push(EarlyEdit::Update {
                field: field.to_string(),
                index,
                patch: patch.clone(),
            });
        }
        self.after_array_edit(field);
        Ok(())
    }

    pub fn remove_item(&mut self, field: &str, index: usize) -> Result<Value, FormError> {
        self.ensure_editable("remove an item")?;
        let removed = self.store.remove_item(field, index)?;
        if self.state == FormState::Loading {
            self.early_edits.push(EarlyEdit::Remove {
                field: field.to_string(),
                index,
            });
        }
        self.after_array_edit(field);
        Ok(removed)
    }

    // ── Navigation ────────────────────────────────────────────────────────────

    /// Merge `input`, validate the current step, then advance or, on the last
    /// step, submit.
    pub async fn submit_step(&mut self, input: FieldMap) -> Result<StepOutcome, FormError> {
        self.ensure_active("submit a step")?;
        if !input.is_empty() {
            self.store.merge(&input);
            self.schedule_persist();
        }

        let step = self.navigator.current_step();
        if let StepValidation::Invalid {
            field_errors,
            issues,
        } = self.validate(step)
        {
            self.field_errors = field_errors.clone();
            self.issues = issues;
            return Ok(StepOutcome::Invalid { step, field_errors });
        }
        self.clear_errors();

        if self.navigator.is_last_step() {
            return self.submit().await;
        }
        let result = self.navigator.next_step();
        self.persist_now().await;
        tracing::info!(from = step, to = self.navigator.current_step(), "advanced");
        Ok(result.into())
    }

    /// Validate the current step and advance. Equivalent to submitting an
    /// empty step input.
    pub async fn next(&mut self) -> Result<StepOutcome, FormError> {
        self.submit_step(FieldMap::new()).await
    }

    /// Go back one step. Never gated by validation.
    pub async fn previous(&mut self) -> Result<StepOutcome, FormError> {
        self.ensure_active("go back")?;
        let result = self.navigator.prev_step();
        if result.moved() {
            self.clear_errors();
            self.persist_now().await;
        }
        Ok(result.into())
    }

    /// Jump to `index`. Backward jumps are free; a forward jump validates
    /// each step it leaves behind and stops on the first invalid one.
    pub async fn go_to_step(&mut self, index: usize) -> Result<StepOutcome, FormError> {
        self.ensure_active("change step")?;
        let current = self.navigator.current_step();
        if index >= self.navigator.total_steps() {
            return Ok(StepOutcome::Unchanged);
        }

        for step in current..index {
            if let StepValidation::Invalid {
                field_errors,
                issues,
            } = self.validate(step)
            {
                if self.navigator.go_to_step(step).moved() {
                    self.persist_now().await;
                }
                tracing::info!(target_step = index, blocked_at = step, "jump blocked by validation");
                self.field_errors = field_errors.clone();
                self.issues = issues;
                return Ok(StepOutcome::Invalid { step, field_errors });
            }
        }

        let result = self.navigator.go_to_step(index);
        if result.moved() {
            self.clear_errors();
            self.persist_now().await;
        }
        Ok(result.into())
    }

    /// Leave Complete for Active at step 0. Data is kept and written
    /// immediately so it can be restored after a reload.
    pub async fn restart(&mut self) -> Result<StepOutcome, FormError> {
        if self.state != FormState::Complete {
            return Err(FormError::NotComplete { state: self.state });
        }
        let from = self.navigator.current_step();
        self.navigator.set_step(0);
        self.set_state(FormState::Active);
        self.clear_errors();
        self.submit_error = None;
        self.persist_now().await;
        tracing::info!(fields = self.store.record().len(), "form restarted with data kept");
        Ok(if from == 0 {
            StepOutcome::Unchanged
        } else {
            StepOutcome::Moved { from, to: 0 }
        })
    }

    // ── Persistence lifecycle ─────────────────────────────────────────────────

    /// Write a pending debounced envelope now. Returns `true` if one was
    /// pending.
    pub async fn flush(&mut self) -> bool {
        self.writer.flush().await
    }

    /// Flush and drop the controller.
    pub async fn close(mut self) {
        if self.flush().await {
            tracing::debug!("pending write flushed on close");
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn submit(&mut self) -> Result<StepOutcome, FormError> {
        let attempt_id = Uuid::new_v4();
        self.last_attempt = Some(attempt_id);
        self.persist_now().await;

        self.set_state(FormState::Submitting);
        self.submit_error = None;
        tracing::info!(%attempt_id, fields = self.store.record().len(), "submitting form");

        let record = self.store.record().clone();
        match self.submitter.submit(&record).await {
            Ok(()) => {
                let _ = self.persistence.clear().await;
                self.set_state(FormState::Complete);
                tracing::info!(%attempt_id, "form submitted");
                Ok(StepOutcome::Submitted { attempt_id })
            }
            Err(e) => {
                self.set_state(FormState::Active);
                self.submit_error = Some(e.message.clone());
                tracing::error!(%attempt_id, "form submission failed: {e}");
                Err(FormError::Submission(e))
            }
        }
    }

    fn validate(&self, step: usize) -> StepValidation {
        match self.registry.get(step) {
            Some(definition) => StepValidator::validate_step(definition, self.store.record()),
            None => StepValidation::Valid,
        }
    }

    /// Validate the step owning `name` and copy that field's first message
    /// into `field_errors`.
    fn refresh_field_error(&mut self, name: &str) -> Option<String> {
        let registry = Arc::clone(&self.registry);
        let owner = registry
            .step_of_field(name)
            .or_else(|| registry.get(self.navigator.current_step()));
        let issues: Vec<SchemaIssue> =
            match owner.map(|step| StepValidator::validate_step(step, self.store.record())) {
                Some(StepValidation::Invalid { issues, .. }) => issues
                    .into_iter()
                    .filter(|i| i.path.first().map(String::as_str) == Some(name))
                    .collect(),
                _ => Vec::new(),
            };
        let message = issues.first().map(|i| i.message.clone());

        self.issues
            .retain(|i| i.path.first().map(String::as_str) != Some(name));
        self.issues.extend(issues);
        match &message {
            Some(message) => {
                self.field_errors.insert(name.to_string(), message.clone());
            }
            None => {
                self.field_errors.remove(name);
            }
        }
        message
    }

    fn after_array_edit(&mut self, field: &str) {
        if self.state == FormState::Loading {
            return;
        }
        self.schedule_persist();

        let conditional = self
            .registry
            .step_of_field(field)
            .and_then(|step| step.field(field))
            .is_some_and(|def| def.required_when.is_some() || def.conditional_display.is_some());
        if conditional {
            self.refresh_field_error(field);
        }
    }

    fn set_state(&mut self, state: FormState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn ensure_editable(&self, operation: &'static str) -> Result<(), FormError> {
        match self.state {
            FormState::Loading | FormState::Active => Ok(()),
            state => Err(FormError::NotEditable { state, operation }),
        }
    }

    fn ensure_active(&self, operation: &'static str) -> Result<(), FormError> {
        match self.state {
            FormState::Active => Ok(()),
            state => Err(FormError::NotEditable { state, operation }),
        }
    }

    fn clear_errors(&mut self) {
        self.field_errors.clear();
        self.issues.clear();
    }

    fn envelope(&self) -> PersistedEnvelope {
        PersistedEnvelope::capture(
            &self.registry,
            &self.store,
            self.navigator.current_step(),
            chrono::Utc::now().timestamp_millis(),
        )
    }

    fn schedule_persist(&mut self) {
        if self.state == FormState::Loading {
            return;
        }
        let envelope = self.envelope();
        self.writer.schedule(envelope);
    }

    /// Immediate write; supersedes any pending debounced write.
    async fn persist_now(&mut self) {
        if self.state == FormState::Loading {
            return;
        }
        self.writer.cancel().await;
        let envelope = self.envelope();
        let _ = self.persistence.save(&envelope).await;
    }
}

impl fmt::Debug for MultiStepFormController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiStepFormController")
            .field("state", &self.state)
            .field("current_step", &self.navigator.current_step())
            .field("total_steps", &self.navigator.total_steps())
            .field("fields", &self.store.record().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{MemoryStorage, StorageError};
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const FORM: &str = r#"
[[steps]]
id = "identity"
title = "Identity"

[[steps.fields]]
name = "name"
label = "Name"
type = "text"
required = true
min_length = 2

[[steps]]
id = "business"
title = "Business"

[[steps.fields]]
name = "sector"
label = "Sector"
type = "select"
required = true
options = [
    { value = "energy", label = "Energy" },
    { value = "retail", label = "Retail" },
]

[[steps]]
id = "group"
title = "Group"

[[steps.fields]]
name = "report_basis"
label = "Report basis"
type = "radio"
required = true
options = [
    { value = "individual", label = "Individual" },
    { value = "consolidated", label = "Consolidated" },
]

[[steps.fields]]
name = "subsidiaries"
label = "Subsidiaries"
type = "field_array"
required_when = { field = "report_basis", operator = "equals", value = "consolidated" }

[[steps.fields.item_fields]]
name = "name"
label = "Subsidiary name"
type = "text"
required = true
min_length = 2
"#;

    #[derive(Default)]
    struct RecordingSubmitter {
        received: Mutex<Vec<FieldMap>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl SubmitHandler for RecordingSubmitter {
        async fn submit(&self, record: &FieldMap) -> Result<(), SubmitError> {
            self.received
                .lock()
                .expect("submitter lock")
                .push(record.clone());
            match &self.fail_with {
                Some(message) => Err(SubmitError::new(message.clone())),
                None => Ok(()),
            }
        }
    }

    fn map(value: Value) -> FieldMap {
        value.as_object().cloned().expect("test value must be an object")
    }

    fn registry() -> Arc<StepRegistry> {
        Arc::new(StepRegistry::from_toml_str(FORM).expect("valid test form"))
    }

    async fn open(
        storage: &Arc<MemoryStorage>,
        submitter: &Arc<RecordingSubmitter>,
    ) -> MultiStepFormController {
        MultiStepFormController::open(
            registry(),
            storage.clone(),
            submitter.clone(),
            ControllerOptions {
                storage_key: "test-form".to_string(),
                debounce: Duration::from_millis(500),
            },
        )
        .await
    }

    async fn saved(storage: &MemoryStorage) -> Option<PersistedEnvelope> {
        let raw = storage.load("test-form").await.expect("memory load")?;
        Some(serde_json::from_str(&raw).expect("saved envelope parses"))
    }

    #[tokio::test]
    async fn starts_empty_without_saved_progress() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let form = open(&storage, &submitter).await;
        assert_eq!(form.state(), FormState::Active);
        assert_eq!(form.current_step(), 0);
        assert!(form.record().is_empty());
        assert!(storage.is_empty(), "hydration alone never writes");
    }

    #[tokio::test]
    async fn restores_saved_step_and_clamps_it() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(
                "test-form",
                json!({
                    "data": { "identity": { "name": "Acme" } },
                    "currentStep": 9,
                    "timestamp": 1
                })
                .to_string(),
            )
            .await
            .expect("seed storage");
        let submitter = Arc::new(RecordingSubmitter::default());
        let form = open(&storage, &submitter).await;
        assert_eq!(form.current_step(), 2);
        assert_eq!(form.record().get("name"), Some(&json!("Acme")));
    }

    #[tokio::test]
    async fn corrupt_saved_progress_starts_fresh() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save("test-form", "{ not json".to_string())
            .await
            .expect("seed storage");
        let submitter = Arc::new(RecordingSubmitter::default());
        let form = open(&storage, &submitter).await;
        assert_eq!(form.state(), FormState::Active);
        assert_eq!(form.current_step(), 0);
        assert!(form.record().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn edits_while_loading_survive_hydration_and_are_not_written_early() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(
                "test-form",
                json!({
                    "data": { "identity": { "name": "Saved name" }, "business": { "sector": "retail" } },
                    "currentStep": 1,
                    "timestamp": 1
                })
                .to_string(),
            )
            .await
            .expect("seed storage");
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = MultiStepFormController::new(
            registry(),
            storage.clone(),
            submitter.clone(),
            ControllerOptions {
                storage_key: "test-form".to_string(),
                debounce: Duration::from_millis(500),
            },
        );

        form.set_field("name", json!("Typed early")).expect("edit while loading");
        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = saved(&storage).await.expect("seeded envelope");
        assert_eq!(before.data["identity"]["name"], "Saved name", "no write while loading");

        form.hydrate().await;
        assert_eq!(form.record().get("name"), Some(&json!("Typed early")));
        assert_eq!(form.record().get("sector"), Some(&json!("retail")));
        assert_eq!(form.current_step(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let after = saved(&storage).await.expect("envelope after hydration");
        assert_eq!(after.data["identity"]["name"], "Typed early");
    }

    #[tokio::test]
    async fn min_length_gates_advancing() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        let outcome = form
            .submit_step(map(json!({ "name": "A" })))
            .await
            .expect("submit step");
        assert!(matches!(outcome, StepOutcome::Invalid { step: 0, .. }));
        assert_eq!(form.current_step(), 0);
        assert_eq!(
            form.field_errors().get("name").map(String::as_str),
            Some("Name must be at least 2 characters")
        );

        let outcome = form
            .submit_step(map(json!({ "name": "AB" })))
            .await
            .expect("submit step");
        assert_eq!(outcome, StepOutcome::Moved { from: 0, to: 1 });
        assert!(form.field_errors().is_empty());
    }

    #[tokio::test]
    async fn step_change_writes_immediately() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.submit_step(map(json!({ "name": "Acme" })))
            .await
            .expect("submit step");
        let envelope = saved(&storage).await.expect("written on step change");
        assert_eq!(envelope.current_step, 1);
        assert_eq!(envelope.data["identity"]["name"], "Acme");
        assert!(!form.has_pending_write());
    }

    #[tokio::test(start_paused = true)]
    async fn field_edits_are_debounced() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.set_field("name", json!("Ac")).expect("edit");
        form.set_field("name", json!("Acme")).expect("edit");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(saved(&storage).await.is_none());

        tokio::time::sleep(Duration::from_millis(500)).await;
        let envelope = saved(&storage).await.expect("debounced write");
        assert_eq!(envelope.data["identity"]["name"], "Acme");
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_pending_write() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.set_field("name", json!("Acme")).expect("edit");
        form.close().await;
        let envelope = saved(&storage).await.expect("flushed on close");
        assert_eq!(envelope.data["identity"]["name"], "Acme");
    }

    #[tokio::test]
    async fn previous_is_never_gated() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.submit_step(map(json!({ "name": "Acme" })))
            .await
            .expect("advance");
        form.set_field("sector", json!("not an option")).expect("edit");
        assert_eq!(
            form.previous().await.expect("go back"),
            StepOutcome::Moved { from: 1, to: 0 }
        );
        assert_eq!(form.previous().await.expect("go back"), StepOutcome::Unchanged);
    }

    #[tokio::test]
    async fn forward_jump_stops_at_first_invalid_step() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.set_field("name", json!("Acme")).expect("edit");
        let outcome = form.go_to_step(2).await.expect("jump");
        match outcome {
            StepOutcome::Invalid { step, field_errors } => {
                assert_eq!(step, 1);
                assert!(field_errors.contains_key("sector"));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
        assert_eq!(form.current_step(), 1);

        form.set_field("sector", json!("energy")).expect("edit");
        assert_eq!(form.go_to_step(0).await.expect("jump back"), StepOutcome::Moved { from: 1, to: 0 });
        assert_eq!(form.go_to_step(2).await.expect("jump"), StepOutcome::Moved { from: 0, to: 2 });
        assert_eq!(form.go_to_step(7).await.expect("out of range"), StepOutcome::Unchanged);
    }

    #[tokio::test]
    async fn array_edits_revalidate_conditional_arrays() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.set_field("report_basis", json!("consolidated")).expect("edit");
        form.push_item("subsidiaries", json!({ "name": "X" })).expect("push");
        assert_eq!(
            form.field_errors().get("subsidiaries").map(String::as_str),
            Some("Subsidiary name must be at least 2 characters")
        );
        assert_eq!(form.issues()[0].path, vec!["subsidiaries", "0", "name"]);

        form.update_item("subsidiaries", 0, &map(json!({ "name": "Acme Nordic" })))
            .expect("update");
        assert!(form.field_errors().get("subsidiaries").is_none());
        assert!(form.issues().is_empty());

        form.remove_item("subsidiaries", 0).expect("remove");
        assert_eq!(
            form.field_errors().get("subsidiaries").map(String::as_str),
            Some("Subsidiaries must contain at least 1 item")
        );
        assert!(matches!(
            form.remove_item("subsidiaries", 3),
            Err(FormError::Store(StoreError::IndexOutOfRange { .. }))
        ));
    }

    #[tokio::test]
    async fn blur_reports_and_clears_field_errors() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        form.set_field("name", json!("A")).expect("edit");
        assert_eq!(
            form.blur_field("name").expect("blur").as_deref(),
            Some("Name must be at least 2 characters")
        );
        form.set_field("name", json!("Acme")).expect("edit");
        assert_eq!(form.blur_field("name").expect("blur"), None);
        assert!(form.field_errors().is_empty());
    }

    async fn fill_to_last_step(form: &mut MultiStepFormController) {
        form.submit_step(map(json!({ "name": "Acme" })))
            .await
            .expect("step 1");
        form.submit_step(map(json!({ "sector": "energy" })))
            .await
            .expect("step 2");
    }

    #[tokio::test]
    async fn failed_submission_returns_to_active() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter {
            fail_with: Some("service unavailable".to_string()),
            ..RecordingSubmitter::default()
        });
        let mut form = open(&storage, &submitter).await;
        fill_to_last_step(&mut form).await;

        let result = form
            .submit_step(map(json!({ "report_basis": "individual" })))
            .await;
        assert!(matches!(result, Err(FormError::Submission(_))));
        assert_eq!(form.state(), FormState::Active);
        assert_eq!(form.submit_error(), Some("service unavailable"));
        assert!(saved(&storage).await.is_some(), "progress kept for retry");
        assert_eq!(submitter.received.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn successful_submission_clears_progress_and_locks_the_form() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;
        fill_to_last_step(&mut form).await;

        let outcome = form
            .submit_step(map(json!({ "report_basis": "individual" })))
            .await
            .expect("submit");
        let StepOutcome::Submitted { attempt_id } = outcome else {
            panic!("expected Submitted, got {outcome:?}");
        };
        assert_eq!(form.last_attempt(), Some(attempt_id));
        assert_eq!(form.state(), FormState::Complete);
        assert!(saved(&storage).await.is_none());

        assert!(matches!(
            form.set_field("name", json!("Other")),
            Err(FormError::NotEditable {
                state: FormState::Complete,
                ..
            })
        ));
        assert!(matches!(
            form.next().await,
            Err(FormError::NotEditable { .. })
        ));
    }

    #[tokio::test]
    async fn restart_keeps_data_and_saves_it() {
        let storage = Arc::new(MemoryStorage::new());
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = open(&storage, &submitter).await;

        assert!(matches!(
            form.restart().await,
            Err(FormError::NotComplete {
                state: FormState::Active
            })
        ));

        fill_to_last_step(&mut form).await;
        form.submit_step(map(json!({ "report_basis": "individual" })))
            .await
            .expect("submit");

        assert_eq!(
            form.restart().await.expect("restart"),
            StepOutcome::Moved { from: 2, to: 0 }
        );
        assert_eq!(form.state(), FormState::Active);
        assert_eq!(form.current_step(), 0);
        assert_eq!(form.record().get("name"), Some(&json!("Acme")));

        let envelope = saved(&storage).await.expect("written on restart");
        assert_eq!(envelope.current_step, 0);
        assert_eq!(envelope.data["identity"]["name"], "Acme");
    }

    #[tokio::test(start_paused = true)]
    async fn array_edits_while_loading_extend_the_saved_items() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(
                "test-form",
                json!({
                    "data": {
                        "group": {
                            "report_basis": "consolidated",
                            "subsidiaries": [{ "name": "Acme Nordic" }, { "name": "Acme Iberia" }]
                        }
                    },
                    "currentStep": 2,
                    "timestamp": 1
                })
                .to_string(),
            )
            .await
            .expect("seed storage");
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = MultiStepFormController::new(
            registry(),
            storage.clone(),
            submitter.clone(),
            ControllerOptions {
                storage_key: "test-form".to_string(),
                debounce: Duration::from_millis(500),
            },
        );

        assert_eq!(
            form.push_item("subsidiaries", json!({ "name": "Acme Baltic" }))
                .expect("push while loading"),
            0
        );
        form.push_item("subsidiaries", json!({ "name": "Acme Typo" }))
            .expect("push while loading");
        form.update_item("subsidiaries", 0, &map(json!({ "name": "Acme Baltics" })))
            .expect("update while loading");
        form.remove_item("subsidiaries", 1).expect("remove while loading");

        form.hydrate().await;
        assert_eq!(
            form.record().get("subsidiaries"),
            Some(&json!([
                { "name": "Acme Nordic" },
                { "name": "Acme Iberia" },
                { "name": "Acme Baltics" }
            ]))
        );
        assert_eq!(form.record().get("report_basis"), Some(&json!("consolidated")));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let after = saved(&storage).await.expect("envelope after hydration");
        assert_eq!(
            after.data["group"]["subsidiaries"]
                .as_array()
                .map(Vec::len),
            Some(3)
        );
    }

    #[tokio::test]
    async fn early_array_value_then_push_replaces_the_saved_items() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .save(
                "test-form",
                json!({
                    "data": { "group": { "subsidiaries": [{ "name": "Acme Nordic" }] } },
                    "currentStep": 0,
                    "timestamp": 1
                })
                .to_string(),
            )
            .await
            .expect("seed storage");
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = MultiStepFormController::new(
            registry(),
            storage.clone(),
            submitter.clone(),
            ControllerOptions {
                storage_key: "test-form".to_string(),
                debounce: Duration::from_millis(500),
            },
        );
        form.set_field("subsidiaries", json!([])).expect("set while loading");
        form.push_item("subsidiaries", json!({ "name": "Acme Fresh" }))
            .expect("push while loading");
        form.update_item("subsidiaries", 0, &map(json!({ "name": "Acme Fresh AB" })))
            .expect("update while loading");

        form.hydrate().await;
        assert_eq!(
            form.record().get("subsidiaries"),
            Some(&json!([{ "name": "Acme Fresh AB" }]))
        );
    }

    /// Every storage call fails.
    struct BrokenStorage;

    #[async_trait]
    impl FormStorage for BrokenStorage {
        async fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Backend("disk offline".to_string()))
        }

        async fn save(&self, _key: &str, _value: String) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk offline".to_string()))
        }

        async fn clear(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Backend("disk offline".to_string()))
        }
    }

    #[tokio::test]
    async fn storage_failures_never_block_the_form() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let mut form = MultiStepFormController::open(
            registry(),
            Arc::new(BrokenStorage),
            submitter.clone(),
            ControllerOptions::default(),
        )
        .await;
        assert_eq!(form.state(), FormState::Active);
        assert_eq!(form.current_step(), 0);
        assert!(form.record().is_empty());

        form.set_field("name", json!("Acme")).expect("edit despite failed saves");
        assert!(form.flush().await, "pending write attempted");
        assert_eq!(
            form.next().await.expect("advance despite failed save"),
            StepOutcome::Moved { from: 0, to: 1 }
        );
        form.submit_step(map(json!({ "sector": "energy" })))
            .await
            .expect("step 2");

        let outcome = form
            .submit_step(map(json!({ "report_basis": "individual" })))
            .await
            .expect("submit despite failed clear");
        assert!(matches!(outcome, StepOutcome::Submitted { .. }));
        assert_eq!(form.state(), FormState::Complete);
        assert_eq!(submitter.received.lock().expect("lock").len(), 1);
    }

    /// Holds the submission open until released.
    #[derive(Default)]
    struct GatedSubmitter {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SubmitHandler for GatedSubmitter {
        async fn submit(&self, _record: &FieldMap) -> Result<(), SubmitError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn form_is_submitting_while_the_handler_runs() {
        let gate = Arc::new(GatedSubmitter::default());
        let mut form = MultiStepFormController::open(
            registry(),
            Arc::new(MemoryStorage::new()),
            gate.clone(),
            ControllerOptions::default(),
        )
        .await;
        fill_to_last_step(&mut form).await;
        let states = form.subscribe_state();
        assert_eq!(*states.borrow(), FormState::Active);

        let (outcome, during) = tokio::join!(
            form.submit_step(map(json!({ "report_basis": "individual" }))),
            async {
                gate.entered.notified().await;
                let during = *states.borrow();
                gate.release.notify_one();
                during
            }
        );
        assert_eq!(during, FormState::Submitting);
        assert!(matches!(outcome, Ok(StepOutcome::Submitted { .. })));
        assert_eq!(*states.borrow(), FormState::Complete);
        assert!(!form.is_submitting());
    }
}
