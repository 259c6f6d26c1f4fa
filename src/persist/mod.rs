//! Saving and restoring form progress.
//!
//! - [`envelope`]: the `{ data, currentStep, timestamp }` document and its
//!   step-partitioned encoding
//! - [`storage`]: the key/value backend seam and its memory and file
//!   implementations
//! - [`adapter`]: load/save/clear of one form's envelope, tolerant of
//!   missing and corrupt entries
//! - [`debounce`]: the single-slot delayed writer used for field edits

pub mod adapter;
pub mod debounce;
pub mod envelope;
pub mod storage;

pub use adapter::PersistenceAdapter;
pub use debounce::DebouncedWriter;
pub use envelope::PersistedEnvelope;
pub use storage::{FileStorage, FormStorage, MemoryStorage, StorageError};
