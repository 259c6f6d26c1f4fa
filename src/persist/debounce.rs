//! Debounced envelope writes.
//!
//! One pending slot, one timer. Scheduling a write replaces the pending
//! envelope and restarts the timer, so a burst of edits produces a single
//! write `delay` after the last one.
//!
//! A timer is only aborted while it sleeps. Once it has started saving, the
//! save runs to completion; the adapter serializes writes, so they reach the
//! backend in the order they were made.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::adapter::PersistenceAdapter;
use super::envelope::PersistedEnvelope;

type PendingSlot = Arc<Mutex<Option<PersistedEnvelope>>>;

const SLEEPING: u8 = 0;
const SAVING: u8 = 1;
const CANCELLED: u8 = 2;

struct Timer {
    handle: JoinHandle<()>,
    phase: Arc<AtomicU8>,
}

impl Timer {
    /// Stop the timer if it is still sleeping. Returns the handle of a save
    /// already under way.
    fn stop(self) -> Option<JoinHandle<()>> {
        match self
            .phase
            .compare_exchange(SLEEPING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.handle.abort();
                None
            }
            Err(_) => Some(self.handle),
        }
    }
}

pub struct DebouncedWriter {
    adapter: Arc<PersistenceAdapter>,
    delay: Duration,
    pending: PendingSlot,
    timer: Option<Timer>,
}

fn lock(slot: &PendingSlot) -> MutexGuard<'_, Option<PersistedEnvelope>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DebouncedWriter {
    pub fn new(adapter: Arc<PersistenceAdapter>, delay: Duration) -> Self {
        Self {
            adapter,
            delay,
            pending: Arc::new(Mutex::new(None)),
            timer: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Replace the pending write with `envelope` and restart the timer.
    ///
    /// Outside a Tokio runtime no timer can run; the write stays pending
    /// until [`flush`](Self::flush).
    pub fn schedule(&mut self, envelope: PersistedEnvelope) {
        // A save under way keeps running; the adapter orders it before ours.
        let _ = self.stop_timer();
        *lock(&self.pending) = Some(envelope);

        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("no async runtime; debounced write held until flush");
            return;
        };
        let pending = Arc::clone(&self.pending);
        let adapter = Arc::clone(&self.adapter);
        let delay = self.delay;
        let phase = Arc::new(AtomicU8::new(SLEEPING));
        let task_phase = Arc::clone(&phase);
        let handle = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if task_phase
                .compare_exchange(SLEEPING, SAVING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            let envelope = lock(&pending).take();
            if let Some(envelope) = envelope {
                // Failures are logged by the adapter.
                let _ = adapter.save(&envelope).await;
            }
        });
        self.timer = Some(Timer { handle, phase });
    }

    /// Write the pending envelope now. Returns `true` if there was one.
    pub async fn flush(&mut self) -> bool {
        self.settle().await;
        let envelope = lock(&self.pending).take();
        match envelope {
            Some(envelope) => {
                let _ = self.adapter.save(&envelope).await;
                true
            }
            None => false,
        }
    }

    /// Drop the pending write without saving it. A save already under way
    /// is awaited.
    pub async fn cancel(&mut self) {
        self.settle().await;
        if lock(&self.pending).take().is_some() {
            tracing::debug!("pending debounced write cancelled");
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Stop a sleeping timer, or wait for its save to finish.
    async fn settle(&mut self) {
        if let Some(in_flight) = self.stop_timer() {
            let _ = in_flight.await;
        }
    }

    fn stop_timer(&mut self) -> Option<JoinHandle<()>> {
        self.timer.take().and_then(Timer::stop)
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        // A save under way is left to finish on its own.
        let _ = self.stop_timer();
    }
}
