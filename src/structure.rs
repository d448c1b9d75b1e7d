//! # Structural Relations
//!
//! Ids, placements, and the traits the time marker core uses to talk to the
//! document tree.
//!
//! ## Ownership
//! Every node lives in an arena owned by the [`Score`](crate::score::Score).
//! Relations between nodes are plain ids. A container lists the markers it
//! holds by [`MarkerId`] but never owns them, and a marker refers back to its
//! container through a [`Placement`] without owning it either.
//!
//! ## Traits
//! - [`Container`] - ordered annotation list with attach/detach
//! - [`StructuralLocator`] - tick → measure → segment lookup
//! - [`SystemLayout`] - page geometry needed to compute marker extents

use kurbo::Point;

use crate::timeline::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasureId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(pub usize);

/// Kind of a segment within a measure, in the order segments sharing a tick
/// are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentType {
    Clef,
    KeySig,
    TimeSig,
    /// Holds chords and rests; the only kind time markers attach to
    ChordRest,
    BarLine,
}

/// The structural container currently holding an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Segment(SegmentId),
    Measure(MeasureId),
}

/// An ordered, non-owning list of annotation items.
///
/// Methods take `&self`: membership is bookkeeping that relocation updates
/// from shared contexts. Attaching or detaching one item never reorders the
/// others.
pub trait Container {
    fn attach(&self, item: MarkerId);

    /// Returns `false` if the item was not a member.
    fn detach(&self, item: MarkerId) -> bool;

    fn contains(&self, item: MarkerId) -> bool;
}

pub trait StructuralLocator {
    /// Measure whose tick range contains `tick`.
    fn measure_at_tick(&self, tick: Tick) -> Option<MeasureId>;

    /// Segment of `kind` sounding at `tick` within `measure`: the first one
    /// starting exactly at `tick`, otherwise the latest one starting before
    /// it. `None` if no segment of `kind` starts at or before `tick`.
    fn segment_at_tick(&self, measure: MeasureId, kind: SegmentType, tick: Tick) -> Option<SegmentId>;

    /// Membership list behind a placement, if that node still exists.
    fn container(&self, placement: Placement) -> Option<&dyn Container>;
}

/// Vertical extent of one staff, relative to its system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SysStaff {
    pub y: f64,
    pub height: f64,
}

impl SysStaff {
    pub fn new(y: f64, height: f64) -> Self {
        Self { y, height }
    }

    pub fn y_bottom(&self) -> f64 {
        self.y + self.height
    }
}

pub trait SystemLayout {
    /// Page position of the node behind a placement.
    fn page_pos(&self, placement: Placement) -> Option<Point>;

    /// Page y of the system that owns the measure behind a placement, with
    /// that system's staves.
    fn system_staves(&self, placement: Placement) -> Option<(f64, &[SysStaff])>;
}
