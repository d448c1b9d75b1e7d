//! # Time Markers
//!
//! A time marker is a system-wide text annotation that carries the exact
//! playback time it refers to. Staves, measures, and repeats may change
//! around it; the marker stays at the same point in time and moves through
//! the structure to follow it.
//!
//! ## Sub-modules
//! - `state` - Clean/Dirty relocation state machine
//! - `extent` - Page bounding box spanning the whole system
//!
//! ## Time vs. Placement
//! - `time_location_seconds` is the marker's identity. It only changes through
//!   [`TimeMarker::set_time_location`].
//! - The placement (the segment currently holding the marker) is a cache
//!   derived from the time. Structural edits call
//!   [`TimeMarker::mark_needs_relocation`]; the next
//!   [`TimeMarker::relocate_if_needed`] recomputes it.
//!
//! Relocation takes `&self`. It only touches the placement cache and the
//! membership lists of the old and new containers, so it is safe to run from
//! any code path that reads the score, including rendering.
//!
//! ## Example
//! ```rust
//! use timemark::{Placement, Score, TimeSignature};
//!
//! let mut score = Score::new();
//! score.append_measure(TimeSignature::default()).unwrap();
//! let lead = score.lead_segment(0).unwrap();
//! let id = score.add_time_marker(lead, "Cue").unwrap();
//!
//! // A new first measure pushes the old one 2s later; the marker stays at 0s
//! score.insert_measure(0, TimeSignature::default()).unwrap();
//! let marker = score.time_marker(id).unwrap();
//! assert!(marker.needs_relocation());
//!
//! score.relocate_time_markers();
//! assert!(!marker.needs_relocation());
//! assert_eq!(marker.placement(), Some(Placement::Segment(score.lead_segment(0).unwrap())));
//! ```

mod extent;
mod state;

#[cfg(test)]
mod tests;

use std::cell::Cell;

use kurbo::{Rect, Vec2};

use crate::error::RelocationError;
use crate::structure::{MarkerId, Placement, SegmentType, StructuralLocator};
use crate::timeline::{Tick, TimelineMapper};

pub use state::{RelocationEvent, RelocationState};

/// Outcome of a relocation query
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relocation {
    /// The marker was clean; nothing was recomputed
    Clean,
    /// Recomputed; the marker already lived in the right container
    Stayed(Placement),
    /// Detached from `from` (if placed) and attached to `to`
    Moved {
        from: Option<Placement>,
        to: Placement,
    },
}

#[derive(Debug)]
pub struct TimeMarker {
    id: MarkerId,
    text: String,
    time_location_seconds: f64,
    state: Cell<RelocationState>,
    placement: Cell<Option<Placement>>,
    bbox: Rect,
    offset: Vec2,
}

impl TimeMarker {
    /// Create a marker at the playback time of `destination_tick`.
    ///
    /// The tick is structural; its first playback pass is sampled. The marker
    /// starts clean and unplaced: the caller attaches it to the container at
    /// that tick with [`TimeMarker::attach_to`].
    pub fn new(id: MarkerId, destination_tick: Tick, mapper: &dyn TimelineMapper) -> Self {
        let utick = mapper.tick_to_utick(destination_tick);
        Self::with_time(id, mapper.tick_to_time(utick), RelocationState::Clean)
    }

    /// Create an unplaced marker at an absolute time. It starts dirty so the
    /// first query places it.
    pub fn at_time(id: MarkerId, seconds: f64) -> Self {
        Self::with_time(id, seconds, RelocationState::Dirty)
    }

    fn with_time(id: MarkerId, seconds: f64, state: RelocationState) -> Self {
        Self {
            id,
            text: String::new(),
            time_location_seconds: seconds,
            state: Cell::new(state),
            placement: Cell::new(None),
            bbox: Rect::ZERO,
            offset: Vec2::ZERO,
        }
    }

    pub fn id(&self) -> MarkerId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn time_location_seconds(&self) -> f64 {
        self.time_location_seconds
    }

    /// Overwrite the marker's time.
    ///
    /// The placement is left alone; call
    /// [`mark_needs_relocation`](Self::mark_needs_relocation) to move the
    /// marker to the new time. Several time edits can be batched before one
    /// relocation.
    pub fn set_time_location(&mut self, seconds: f64) {
        self.time_location_seconds = seconds;
    }

    pub fn state(&self) -> RelocationState {
        self.state.get()
    }

    pub fn needs_relocation(&self) -> bool {
        self.state.get().is_dirty()
    }

    /// Container currently holding the marker. May be stale while dirty.
    pub fn placement(&self) -> Option<Placement> {
        self.placement.get()
    }

    /// Local bounding box of the rendered text, relative to the marker's
    /// position
    pub fn bbox(&self) -> Rect {
        self.bbox
    }

    pub fn set_bbox(&mut self, bbox: Rect) {
        self.bbox = bbox;
    }

    /// Position relative to the container
    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: Vec2) {
        self.offset = offset;
    }

    pub fn mark_needs_relocation(&self) {
        self.transition(RelocationEvent::Invalidated);
    }

    fn transition(&self, event: RelocationEvent) {
        self.state.set(self.state.get().on(event));
    }

    /// Bring the placement in line with the marker's time.
    ///
    /// A no-op while clean. When dirty, the time is mapped back to a
    /// structural tick and the marker moves to the first chord/rest segment
    /// at that tick. If no measure or segment exists there, the previous
    /// placement is kept, the marker stays dirty, and the failure is logged.
    pub fn relocate_if_needed(
        &self,
        mapper: &dyn TimelineMapper,
        locator: &dyn StructuralLocator,
    ) -> Result<Relocation, RelocationError> {
        if !self.needs_relocation() {
            return Ok(Relocation::Clean);
        }

        let seconds = self.time_location_seconds;
        let tick = mapper.utick_to_tick(mapper.time_to_tick(seconds));

        let Some(measure) = locator.measure_at_tick(tick) else {
            log::debug!("time marker {:?}: no measure for tick {} ({}s)", self.id, tick, seconds);
            self.transition(RelocationEvent::Failed);
            return Err(RelocationError::NoMeasure { tick, seconds });
        };

        let segment = locator.segment_at_tick(measure, SegmentType::ChordRest, tick);
        let Some(target) = segment.map(Placement::Segment) else {
            log::debug!("time marker {:?}: no chord/rest segment at tick {}", self.id, tick);
            self.transition(RelocationEvent::Failed);
            return Err(RelocationError::NoSegment { tick, measure });
        };

        let from = self.placement.get();
        if !self.attach_to(target, locator) {
            log::debug!("time marker {:?}: segment at tick {} has no container", self.id, tick);
            self.transition(RelocationEvent::Failed);
            return Err(RelocationError::NoSegment { tick, measure });
        }

        self.transition(RelocationEvent::Relocated);
        if from == Some(target) {
            Ok(Relocation::Stayed(target))
        } else {
            Ok(Relocation::Moved { from, to: target })
        }
    }

    /// Make `target` the marker's only container.
    ///
    /// The marker leaves its current container before joining the new one.
    /// Returns `false`, changing nothing, if `target` has no container.
    pub fn attach_to(&self, target: Placement, locator: &dyn StructuralLocator) -> bool {
        let Some(container) = locator.container(target) else {
            return false;
        };

        if let Some(current) = self.placement.get() {
            if current != target {
                match locator.container(current) {
                    Some(old) => {
                        old.detach(self.id);
                    }
                    None => log::debug!(
                        "time marker {:?}: previous container {:?} no longer exists",
                        self.id,
                        current
                    ),
                }
            }
        }

        if !container.contains(self.id) {
            container.attach(self.id);
        }
        self.placement.set(Some(target));
        true
    }

    /// Leave the current container, if any.
    pub fn detach(&self, locator: &dyn StructuralLocator) {
        if let Some(current) = self.placement.take() {
            if let Some(container) = locator.container(current) {
                container.detach(self.id);
            }
        }
    }
}
