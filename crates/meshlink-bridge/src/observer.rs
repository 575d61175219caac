//! [`SpatialObserverAdapter`] – entry point for perception-source callbacks.
//!
//! The perception source reports surface meshes through three callbacks,
//! each carrying a [`MeshSnapshot`] that borrows the source's own buffers
//! and is only valid for the duration of the call. The adapter copies the
//! geometry into an owned [`MeshObservation`] before handing it to an
//! [`ObservationSink`], so nothing downstream ever touches source memory.
//!
//! # Per-id state machine
//!
//! ```text
//! Unseen ──added──▶ Tracked ──updated──▶ Tracked ──removed──▶ Removed
//! ```
//!
//! * `added` / `updated` – copy, stamp, dispatch. An update for an unseen id
//!   is treated as its add.
//! * `removed` – dispatch a removal observation. The id is retired only once
//!   the sink accepts it; otherwise it stays `Tracked` and a repeated
//!   removal is dispatched again.
//! * anything for a `Removed` id, or a removal of an unseen id, is ignored.
//!
//! Retired ids are remembered in a FIFO of bounded size
//! ([`BridgeConfig::removed_mesh_memory`][crate::config::BridgeConfig]).
//! Once evicted an id reads as `Unseen` again.
//!
//! Rapid updates are not coalesced; every callback becomes its own dispatch.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use meshlink_types::{MeshObservation, Point3};
use tracing::{Span, debug, warn};

use crate::publisher::{DispatchOutcome, ObservationSink};

/// Matches [`BridgeConfig::default`][crate::config::BridgeConfig].
const DEFAULT_REMOVED_MEMORY: usize = 4096;

/// Callback-scoped view of one mesh as provided by the perception source.
#[derive(Debug, Clone, Copy)]
pub struct MeshSnapshot<'a> {
    pub id: i64,
    pub vertices: &'a [Point3],
    pub triangle_indices: &'a [u32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTrackState {
    Unseen,
    Tracked,
    Removed,
}

pub struct SpatialObserverAdapter {
    sink: Arc<dyn ObservationSink>,
    tracked: HashSet<i64>,
    removed: HashSet<i64>,
    removed_order: VecDeque<i64>,
    removed_memory: usize,
    next_sequence: u64,
    span: Span,
}

impl SpatialObserverAdapter {
    pub fn new(sink: Arc<dyn ObservationSink>, span: Span) -> Self {
        Self {
            sink,
            tracked: HashSet::new(),
            removed: HashSet::new(),
            removed_order: VecDeque::new(),
            removed_memory: DEFAULT_REMOVED_MEMORY,
            next_sequence: 0,
            span,
        }
    }

    /// Remember at most `capacity` retired ids. Zero forgets them at once.
    pub fn with_removed_memory(mut self, capacity: usize) -> Self {
        self.removed_memory = capacity;
        while self.removed_order.len() > capacity {
            self.evict_oldest();
        }
        self
    }

    /// A new mesh appeared.
    ///
    /// Returns the dispatch outcome, or `None` if nothing was dispatched.
    pub fn on_added(&mut self, snapshot: MeshSnapshot<'_>) -> Option<DispatchOutcome> {
        self.copy_and_dispatch(snapshot, "added")
    }

    /// An existing mesh changed shape.
    pub fn on_updated(&mut self, snapshot: MeshSnapshot<'_>) -> Option<DispatchOutcome> {
        self.copy_and_dispatch(snapshot, "updated")
    }

    /// A mesh is gone for good.
    pub fn on_removed(&mut self, id: i64) -> Option<DispatchOutcome> {
        let span = self.span.clone();
        let _enter = span.enter();
        match self.state(id) {
            MeshTrackState::Tracked => {
                let observation = MeshObservation::removal(id, self.bump_sequence());
                let outcome = self.sink.dispatch(observation);
                if outcome == DispatchOutcome::Scheduled {
                    self.tracked.remove(&id);
                    self.retire(id);
                } else {
                    warn!(mesh_id = id, ?outcome, "removal not accepted; mesh stays tracked");
                }
                Some(outcome)
            }
            MeshTrackState::Unseen => {
                debug!(mesh_id = id, "removal for unseen mesh ignored");
                None
            }
            MeshTrackState::Removed => {
                debug!(mesh_id = id, "duplicate removal ignored");
                None
            }
        }
    }

    pub fn state(&self, id: i64) -> MeshTrackState {
        if self.tracked.contains(&id) {
            MeshTrackState::Tracked
        } else if self.removed.contains(&id) {
            MeshTrackState::Removed
        } else {
            MeshTrackState::Unseen
        }
    }

    /// Number of meshes currently in the `Tracked` state.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Number of retired ids still remembered.
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    fn copy_and_dispatch(
        &mut self,
        snapshot: MeshSnapshot<'_>,
        event: &'static str,
    ) -> Option<DispatchOutcome> {
        let span = self.span.clone();
        let _enter = span.enter();
        let id = snapshot.id;
        if self.state(id) == MeshTrackState::Removed {
            debug!(mesh_id = id, event, "event for removed mesh ignored");
            return None;
        }

        // The copy must happen here, inside the callback.
        let observation = match MeshObservation::new(
            id,
            snapshot.vertices.to_vec(),
            snapshot.triangle_indices.to_vec(),
            self.next_sequence,
        ) {
            Ok(observation) => observation,
            Err(e) => {
                warn!(mesh_id = id, event, error = %e, "skipping malformed mesh");
                return None;
            }
        };
        self.bump_sequence();
        self.tracked.insert(id);
        Some(self.sink.dispatch(observation))
    }

    fn retire(&mut self, id: i64) {
        if self.removed_memory == 0 {
            return;
        }
        if self.removed_order.len() >= self.removed_memory {
            self.evict_oldest();
        }
        self.removed.insert(id);
        self.removed_order.push_back(id);
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.removed_order.pop_front() {
            self.removed.remove(&oldest);
        }
    }

    fn bump_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }
}
