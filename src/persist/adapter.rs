//! One form's saved progress.
//!
//! Load failures of any kind (missing entry, unreadable backend, corrupt
//! JSON) read as "nothing saved"; the form starts fresh and the cause is
//! logged. Saves and clears report their error but callers treat them as
//! best effort.
//!
//! Saves and clears run one at a time, in the order they were requested.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::envelope::PersistedEnvelope;
use super::storage::{FormStorage, StorageError};

pub struct PersistenceAdapter {
    storage: Arc<dyn FormStorage>,
    key: String,
    /// Fair lock; writers are served first come, first served.
    writes: Mutex<()>,
}

impl PersistenceAdapter {
    pub fn new(storage: Arc<dyn FormStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn load(&self) -> Option<PersistedEnvelope> {
        let raw = match self.storage.load(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!(key = %self.key, "no saved form progress");
                return None;
            }
            Err(e) => {
                tracing::warn!(key = %self.key, "reading saved form progress failed: {e}");
                return None;
            }
        };

        match serde_json::from_str::<PersistedEnvelope>(&raw) {
            Ok(envelope) => {
                tracing::debug!(
                    key = %self.key,
                    current_step = envelope.current_step,
                    "loaded saved form progress"
                );
                Some(envelope)
            }
            Err(e) => {
                tracing::warn!(key = %self.key, "ignoring corrupt saved form progress: {e}");
                None
            }
        }
    }

    pub async fn save(&self, envelope: &PersistedEnvelope) -> Result<(), StorageError> {
        let _write = self.writes.lock().await;
        let result = match serde_json::to_string(envelope) {
            Ok(json) => self.storage.save(&self.key, json).await,
            Err(e) => Err(StorageError::from(e)),
        };
        match &result {
            Ok(()) => tracing::debug!(
                key = %self.key,
                current_step = envelope.current_step,
                "saved form progress"
            ),
            Err(e) => tracing::warn!(key = %self.key, "saving form progress failed: {e}"),
        }
        result
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        let _write = self.writes.lock().await;
        let result = self.storage.clear(&self.key).await;
        match &result {
            Ok(()) => tracing::info!(key = %self.key, "cleared saved form progress"),
            Err(e) => tracing::warn!(key = %self.key, "clearing saved form progress failed: {e}"),
        }
        result
    }
}

impl std::fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceAdapter")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
