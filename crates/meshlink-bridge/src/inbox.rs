//! [`DetectionInbox`] – single-slot hand-off of the latest detection batch.
//!
//! The transport's callback task writes; the render tick reads. Both sides go
//! through one [`Mutex`] whose critical section covers only the slot fields:
//!
//! * [`DetectionInbox::replace`] overwrites the batch and marks it unconsumed.
//! * [`DetectionInbox::take_if_unconsumed`] hands out the batch once per
//!   arrival and marks it consumed.
//!
//! A batch that arrives while a take is in progress waits on the lock and is
//! delivered on the next take; older batches that were never taken are
//! overwritten, not queued.
//!
//! # Example
//!
//! ```rust
//! use meshlink_bridge::DetectionInbox;
//! use meshlink_types::DetectionBatch;
//!
//! let inbox = DetectionInbox::new(tracing::Span::none());
//! assert!(inbox.take_if_unconsumed().is_none());
//!
//! inbox.replace(DetectionBatch::default());
//! assert!(inbox.take_if_unconsumed().is_some());
//! assert!(inbox.take_if_unconsumed().is_none());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use meshlink_types::{DetectionBatch, DetectionSetMessage, LinkError};
use serde_json::Value;
use tracing::{Span, debug, warn};

#[derive(Debug)]
struct Slot {
    batch: DetectionBatch,
    consumed: bool,
}

#[derive(Debug)]
pub struct DetectionInbox {
    slot: Mutex<Slot>,
    rejected: AtomicU64,
    span: Span,
}

impl DetectionInbox {
    /// Create an empty inbox. Nothing is available to take until the first
    /// [`replace`][Self::replace].
    pub fn new(span: Span) -> Self {
        Self {
            slot: Mutex::new(Slot {
                batch: DetectionBatch::default(),
                consumed: true,
            }),
            rejected: AtomicU64::new(0),
            span,
        }
    }

    /// Overwrite the live batch and mark it unconsumed.
    pub fn replace(&self, batch: DetectionBatch) {
        let objects = batch.len();
        {
            let mut slot = self.lock();
            slot.batch = batch;
            slot.consumed = false;
        }
        self.span
            .in_scope(|| debug!(objects, "detection batch replaced"));
    }

    /// Return the live batch if it has not been taken since it arrived.
    pub fn take_if_unconsumed(&self) -> Option<DetectionBatch> {
        let mut slot = self.lock();
        if slot.consumed {
            return None;
        }
        slot.consumed = true;
        Some(slot.batch.clone())
    }

    /// Validate a decoded wire message and, if well formed, make it the live
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::MalformedBatch`] when corner and label counts
    /// disagree. The live batch and its consumed flag are left untouched.
    pub fn receive(&self, message: DetectionSetMessage) -> Result<(), LinkError> {
        let batch = DetectionBatch::try_from(message).inspect_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            self.span
                .in_scope(|| warn!(error = %e, "rejected detection batch; keeping previous"));
        })?;
        self.replace(batch);
        Ok(())
    }

    /// Decode a raw transport message body and [`receive`][Self::receive] it.
    ///
    /// # Errors
    ///
    /// [`LinkError::Serialization`] if the body is not a detection set, or
    /// whatever [`receive`][Self::receive] returns.
    pub fn receive_value(&self, body: Value) -> Result<(), LinkError> {
        let message: DetectionSetMessage = serde_json::from_value(body).map_err(|e| {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            self.span
                .in_scope(|| warn!(error = %e, "undecodable detection message"));
            LinkError::from(e)
        })?;
        self.receive(message)
    }

    /// Copy of the live batch, regardless of its consumed flag.
    pub fn live_batch(&self) -> DetectionBatch {
        self.lock().batch.clone()
    }

    pub fn is_consumed(&self) -> bool {
        self.lock().consumed
    }

    /// Inbound messages rejected so far, undecodable or malformed.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    // Slot contents are always whole values, so a panic while holding the
    // lock cannot leave them half-written.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
