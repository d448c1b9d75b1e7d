//! # Score Document
//!
//! The structural document that time markers live in.
//!
//! ## Type Hierarchy
//! ```text
//! Score
//!   ├── TempoMap (quarter-note BPM by tick)
//!   ├── RepeatList (unfolded timeline, rebuilt after every structural edit)
//!   ├── Vec<System>
//!   │     └── Vec<SysStaff> (y, height relative to the system)
//!   ├── Vec<Measure> (score order)
//!   │     ├── tick, time signature, repeat flags, ending
//!   │     ├── system, x, width
//!   │     ├── Vec<SegmentId> (ordered by tick, then kind)
//!   │     └── Annotations
//!   ├── Segment arena
//!   │     ├── kind, measure, tick relative to the measure, x
//!   │     └── Annotations (time markers by id)
//!   └── TimeMarker pool
//! ```
//!
//! ## Ownership
//! The score owns every node. Measures, segments, and markers live in arenas
//! indexed by [`MeasureId`], [`SegmentId`], and [`MarkerId`]; removing a node
//! leaves a hole so the ids of the others stay valid. Containers list markers
//! by id and never own them. Removing a marker from the pool detaches it from
//! its container first.
//!
//! ## Structural Edits
//! Every edit that can move a tick or time (measures inserted, removed, or
//! retimed; segments added or removed; repeats, endings, tempo) recomputes
//! the measure ticks, rebuilds the unfolded timeline, and marks every time
//! marker dirty. Markers are not moved until the next
//! [`Score::relocate_time_markers`] (or an individual
//! [`TimeMarker::relocate_if_needed`]).

use std::cell::RefCell;

use kurbo::{Point, Rect, Vec2};

use crate::error::{RelocationError, ScoreError};
use crate::marker::{Relocation, TimeMarker};
use crate::repeat::{Ending, MeasureMarks, RepeatList};
use crate::structure::{
    Container, MarkerId, MeasureId, Placement, SegmentId, SegmentType, StructuralLocator, SysStaff,
    SystemId, SystemLayout,
};
use crate::tempo::{Tempo, TempoMap, TimeSignature};
use crate::timeline::Tick;

/// Ordered list of annotation ids attached to a segment or measure
#[derive(Debug, Default)]
pub struct Annotations {
    items: RefCell<Vec<MarkerId>>,
}

impl Annotations {
    pub fn ids(&self) -> Vec<MarkerId> {
        self.items.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl Container for Annotations {
    // Every item in one container shares its tick, so appending keeps tick order.
    fn attach(&self, item: MarkerId) {
        self.items.borrow_mut().push(item);
    }

    fn detach(&self, item: MarkerId) -> bool {
        let mut items = self.items.borrow_mut();
        match items.iter().position(|id| *id == item) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    fn contains(&self, item: MarkerId) -> bool {
        self.items.borrow().contains(&item)
    }
}

/// A line of staves on a page
#[derive(Debug, Clone, PartialEq)]
pub struct System {
    pub pos: Point,
    pub staves: Vec<SysStaff>,
}

impl System {
    pub fn new(pos: Point, staves: Vec<SysStaff>) -> Self {
        Self { pos, staves }
    }
}

#[derive(Debug)]
pub struct Segment {
    kind: SegmentType,
    measure: MeasureId,
    rtick: Tick,
    x: f64,
    annotations: Annotations,
}

impl Segment {
    pub fn kind(&self) -> SegmentType {
        self.kind
    }

    pub fn measure(&self) -> MeasureId {
        self.measure
    }

    /// Tick relative to the start of the measure
    pub fn rtick(&self) -> Tick {
        self.rtick
    }

    /// Horizontal position relative to the measure
    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

#[derive(Debug)]
pub struct Measure {
    tick: Tick,
    time_signature: TimeSignature,
    repeat_start: bool,
    repeat_end: bool,
    ending: Option<Ending>,
    system: Option<SystemId>,
    x: f64,
    width: f64,
    segments: Vec<SegmentId>,
    annotations: Annotations,
}

impl Measure {
    fn new(time_signature: TimeSignature) -> Self {
        Self {
            tick: 0,
            time_signature,
            repeat_start: false,
            repeat_end: false,
            ending: None,
            system: None,
            x: 0.0,
            width: 0.0,
            segments: Vec::new(),
            annotations: Annotations::default(),
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn len(&self) -> Tick {
        self.time_signature.measure_ticks()
    }

    pub fn end_tick(&self) -> Tick {
        self.tick + self.len()
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn repeat_start(&self) -> bool {
        self.repeat_start
    }

    pub fn repeat_end(&self) -> bool {
        self.repeat_end
    }

    pub fn ending(&self) -> Option<Ending> {
        self.ending
    }

    pub fn system(&self) -> Option<SystemId> {
        self.system
    }

    /// Horizontal position relative to the system
    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn segments(&self) -> &[SegmentId] {
        &self.segments
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }
}

#[derive(Debug)]
pub struct Score {
    pub title: Option<String>,
    systems: Vec<System>,
    measures: Vec<Option<Measure>>,
    order: Vec<MeasureId>,
    segments: Vec<Option<Segment>>,
    markers: Vec<Option<TimeMarker>>,
    tempo: TempoMap,
    timeline: RepeatList,
}

impl Default for Score {
    fn default() -> Self {
        Self::new()
    }
}

impl Score {
    /// An empty score at quarter = 120
    pub fn new() -> Self {
        Self::with_tempo(Tempo::default())
    }

    pub fn with_tempo(tempo: Tempo) -> Self {
        let tempo = TempoMap::new(tempo.to_quarter_note_bpm());
        Self {
            title: None,
            systems: Vec::new(),
            measures: Vec::new(),
            order: Vec::new(),
            segments: Vec::new(),
            markers: Vec::new(),
            timeline: RepeatList::build(&[], tempo.clone()),
            tempo,
        }
    }

    // ---- queries --------------------------------------------------------

    /// Unfolded playback timeline of the current structure
    pub fn timeline(&self) -> &RepeatList {
        &self.timeline
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo
    }

    pub fn measure_count(&self) -> usize {
        self.order.len()
    }

    /// Measure ids in score order
    pub fn measure_ids(&self) -> &[MeasureId] {
        &self.order
    }

    pub fn measure_id(&self, index: usize) -> Option<MeasureId> {
        self.order.get(index).copied()
    }

    pub fn measure(&self, id: MeasureId) -> Option<&Measure> {
        self.measures.get(id.0).and_then(Option::as_ref)
    }

    /// 1-indexed position of a measure in score order
    pub fn measure_number(&self, id: MeasureId) -> Option<usize> {
        self.order.iter().position(|m| *m == id).map(|index| index + 1)
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Segment> {
        self.segments.get(id.0).and_then(Option::as_ref)
    }

    /// Absolute tick of a segment
    pub fn segment_tick(&self, id: SegmentId) -> Option<Tick> {
        let segment = self.segment(id)?;
        let measure = self.measure(segment.measure)?;
        Some(measure.tick + segment.rtick)
    }

    /// First chord/rest segment of the measure at `index`
    pub fn lead_segment(&self, index: usize) -> Option<SegmentId> {
        let measure = self.measure(self.measure_id(index)?)?;
        measure
            .segments
            .iter()
            .copied()
            .find(|id| self.segment(*id).map_or(false, |s| s.kind == SegmentType::ChordRest))
    }

    pub fn system(&self, id: SystemId) -> Option<&System> {
        self.systems.get(id.0)
    }

    /// Tick just past the last measure
    pub fn end_tick(&self) -> Tick {
        self.order
            .last()
            .and_then(|id| self.measure(*id))
            .map_or(0, Measure::end_tick)
    }

    // ---- layout ---------------------------------------------------------

    pub fn add_system(&mut self, pos: Point, staves: Vec<SysStaff>) -> SystemId {
        self.systems.push(System::new(pos, staves));
        SystemId(self.systems.len() - 1)
    }

    /// Place the measure at `index` on a system. Layout does not move ticks,
    /// so markers are not invalidated.
    pub fn set_measure_layout(
        &mut self,
        index: usize,
        system: SystemId,
        x: f64,
        width: f64,
    ) -> Result<(), ScoreError> {
        if system.0 >= self.systems.len() {
            return Err(ScoreError::UnknownSystem(system.0));
        }
        let measure = self.measure_at_index_mut(index)?;
        measure.system = Some(system);
        measure.x = x;
        measure.width = width;
        Ok(())
    }

    pub fn set_segment_x(&mut self, id: SegmentId, x: f64) -> Result<(), ScoreError> {
        let segment = self
            .segments
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ScoreError::UnknownSegment(id))?;
        segment.x = x;
        Ok(())
    }

    // ---- structural edits -----------------------------------------------

    /// Append a measure with a chord/rest segment on its downbeat.
    pub fn append_measure(&mut self, time_signature: TimeSignature) -> Result<MeasureId, ScoreError> {
        self.insert_measure(self.order.len(), time_signature)
    }

    /// Insert a measure before the measure at `index` (or at the end when
    /// `index == measure_count()`), with a chord/rest segment on its downbeat.
    pub fn insert_measure(
        &mut self,
        index: usize,
        time_signature: TimeSignature,
    ) -> Result<MeasureId, ScoreError> {
        if index > self.order.len() {
            return Err(ScoreError::UnknownMeasure(index));
        }
        time_signature.check()?;
        Ok(self.insert_measure_unchecked(index, time_signature))
    }

    fn insert_measure_unchecked(&mut self, index: usize, time_signature: TimeSignature) -> MeasureId {
        let at = match self.order.get(index) {
            Some(id) => self.measure(*id).map_or(0, Measure::tick),
            None => self.end_tick(),
        };

        let id = MeasureId(self.measures.len());
        self.measures.push(Some(Measure::new(time_signature)));
        self.order.insert(index, id);
        self.push_segment(id, SegmentType::ChordRest, 0, 0.0);

        self.tempo.insert_range(at, time_signature.measure_ticks());
        self.structure_changed();
        id
    }

    /// Remove the measure at `index` with its segments. Markers attached there
    /// keep their stale placement until relocated.
    pub fn remove_measure(&mut self, index: usize) -> Result<(), ScoreError> {
        if index >= self.order.len() {
            return Err(ScoreError::UnknownMeasure(index));
        }
        let id = self.order.remove(index);
        if let Some(measure) = self.measures.get_mut(id.0).and_then(Option::take) {
            for segment in &measure.segments {
                if let Some(slot) = self.segments.get_mut(segment.0) {
                    *slot = None;
                }
            }
            self.tempo.remove_range(measure.tick, measure.end_tick());
        }
        self.structure_changed();
        Ok(())
    }

    /// Change the meter of one measure. Segments that fall past the new end
    /// are removed.
    pub fn set_measure_time_signature(
        &mut self,
        index: usize,
        time_signature: TimeSignature,
    ) -> Result<(), ScoreError> {
        time_signature.check()?;
        let id = self.measure_id(index).ok_or(ScoreError::UnknownMeasure(index))?;
        let measure = self
            .measures
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ScoreError::UnknownMeasure(index))?;
        let old_end = measure.end_tick();
        measure.time_signature = time_signature;
        let new_end = measure.end_tick();
        let new_len = measure.len();

        let (kept, dropped): (Vec<SegmentId>, Vec<SegmentId>) = {
            let segments = &self.segments;
            measure.segments.iter().copied().partition(|id| {
                segments
                    .get(id.0)
                    .and_then(Option::as_ref)
                    .map_or(false, |s| s.rtick < new_len)
            })
        };
        measure.segments = kept;
        for id in dropped {
            if let Some(slot) = self.segments.get_mut(id.0) {
                *slot = None;
            }
        }

        if new_end > old_end {
            self.tempo.insert_range(old_end, new_end - old_end);
        } else {
            self.tempo.remove_range(new_end, old_end);
        }
        self.structure_changed();
        Ok(())
    }

    pub fn set_repeat(&mut self, index: usize, start: bool, end: bool) -> Result<(), ScoreError> {
        let measure = self.measure_at_index_mut(index)?;
        measure.repeat_start = start;
        measure.repeat_end = end;
        self.structure_changed();
        Ok(())
    }

    pub fn set_ending(&mut self, index: usize, ending: Option<Ending>) -> Result<(), ScoreError> {
        self.measure_at_index_mut(index)?.ending = ending;
        self.structure_changed();
        Ok(())
    }

    pub fn set_tempo(&mut self, tick: Tick, tempo: Tempo) {
        self.tempo.set(tick, tempo.to_quarter_note_bpm());
        self.structure_changed();
    }

    pub fn remove_tempo(&mut self, tick: Tick) -> bool {
        let removed = self.tempo.remove(tick);
        if removed {
            self.structure_changed();
        }
        removed
    }

    /// Add a segment at `rtick` within the measure at `index`
    pub fn add_segment(
        &mut self,
        index: usize,
        kind: SegmentType,
        rtick: Tick,
        x: f64,
    ) -> Result<SegmentId, ScoreError> {
        let measure_id = self.measure_id(index).ok_or(ScoreError::UnknownMeasure(index))?;
        let len = self.measure(measure_id).map_or(0, Measure::len);
        if rtick < 0 || rtick >= len {
            return Err(ScoreError::InvalidTick {
                measure: index + 1,
                tick: rtick,
            });
        }
        let id = self.push_segment(measure_id, kind, rtick, x);
        self.structure_changed();
        Ok(id)
    }

    /// Remove a segment. Markers attached to it keep their stale placement
    /// until relocated.
    pub fn remove_segment(&mut self, id: SegmentId) -> Result<(), ScoreError> {
        let segment = self
            .segments
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(ScoreError::UnknownSegment(id))?;
        if let Some(measure) = self.measures.get_mut(segment.measure.0).and_then(Option::as_mut) {
            measure.segments.retain(|s| *s != id);
        }
        self.structure_changed();
        Ok(())
    }

    fn push_segment(&mut self, measure_id: MeasureId, kind: SegmentType, rtick: Tick, x: f64) -> SegmentId {
        let id = SegmentId(self.segments.len());
        self.segments.push(Some(Segment {
            kind,
            measure: measure_id,
            rtick,
            x,
            annotations: Annotations::default(),
        }));

        let segments = &self.segments;
        if let Some(measure) = self.measures.get_mut(measure_id.0).and_then(Option::as_mut) {
            let position = measure
                .segments
                .iter()
                .position(|other| {
                    segments
                        .get(other.0)
                        .and_then(Option::as_ref)
                        .map_or(false, |s| (s.rtick, s.kind) > (rtick, kind))
                })
                .unwrap_or(measure.segments.len());
            measure.segments.insert(position, id);
        }
        id
    }

    fn measure_at_index_mut(&mut self, index: usize) -> Result<&mut Measure, ScoreError> {
        let id = self.measure_id(index).ok_or(ScoreError::UnknownMeasure(index))?;
        self.measures
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(ScoreError::UnknownMeasure(index))
    }

    /// Recompute measure ticks, rebuild the unfolded timeline, and mark every
    /// time marker dirty.
    fn structure_changed(&mut self) {
        let mut tick = 0;
        let mut marks = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(measure) = self.measures.get_mut(id.0).and_then(Option::as_mut) {
                measure.tick = tick;
                marks.push(MeasureMarks {
                    tick,
                    len: measure.len(),
                    repeat_start: measure.repeat_start,
                    repeat_end: measure.repeat_end,
                    ending: measure.ending,
                });
                tick += measure.len();
            }
        }
        self.timeline = RepeatList::build(&marks, self.tempo.clone());
        self.invalidate_time_markers();
    }

    pub fn invalidate_time_markers(&self) {
        for marker in self.time_markers() {
            marker.mark_needs_relocation();
        }
    }

    // ---- time markers ---------------------------------------------------

    /// Create a time marker at the time of `destination` and attach it there.
    pub fn add_time_marker(
        &mut self,
        destination: SegmentId,
        text: impl Into<String>,
    ) -> Result<MarkerId, ScoreError> {
        let tick = self
            .segment_tick(destination)
            .ok_or(ScoreError::UnknownSegment(destination))?;
        let id = MarkerId(self.markers.len());
        let mut marker = TimeMarker::new(id, tick, &self.timeline);
        marker.set_text(text);
        if !marker.attach_to(Placement::Segment(destination), &*self) {
            return Err(ScoreError::UnknownSegment(destination));
        }
        self.markers.push(Some(marker));
        Ok(id)
    }

    /// Create an unplaced time marker at an absolute time. It is placed by the
    /// next relocation.
    pub fn add_time_marker_at(
        &mut self,
        seconds: f64,
        text: impl Into<String>,
    ) -> Result<MarkerId, ScoreError> {
        check_time(seconds)?;
        let id = MarkerId(self.markers.len());
        let mut marker = TimeMarker::at_time(id, seconds);
        marker.set_text(text);
        self.markers.push(Some(marker));
        Ok(id)
    }

    /// Take a marker out of the pool, detaching it from its container.
    pub fn remove_time_marker(&mut self, id: MarkerId) -> Result<TimeMarker, ScoreError> {
        let marker = self
            .markers
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(ScoreError::UnknownMarker(id))?;
        marker.detach(&*self);
        Ok(marker)
    }

    pub fn time_marker(&self, id: MarkerId) -> Option<&TimeMarker> {
        self.markers.get(id.0).and_then(Option::as_ref)
    }

    pub fn time_marker_mut(&mut self, id: MarkerId) -> Option<&mut TimeMarker> {
        self.markers.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Live markers in creation order
    pub fn time_markers(&self) -> impl Iterator<Item = &TimeMarker> + '_ {
        self.markers.iter().filter_map(Option::as_ref)
    }

    /// Move a marker in time. The placement is not refreshed until the marker
    /// is marked dirty and relocated.
    pub fn set_marker_time(&mut self, id: MarkerId, seconds: f64) -> Result<(), ScoreError> {
        check_time(seconds)?;
        self.time_marker_mut(id)
            .ok_or(ScoreError::UnknownMarker(id))?
            .set_time_location(seconds);
        Ok(())
    }

    /// Relocate every dirty marker against the current structure.
    pub fn relocate_time_markers(&self) -> Vec<(MarkerId, Result<Relocation, RelocationError>)> {
        self.time_markers()
            .map(|marker| (marker.id(), marker.relocate_if_needed(&self.timeline, self)))
            .collect()
    }

    /// Page extent of a marker, relocating it first if it is dirty.
    pub fn time_marker_extent(&self, id: MarkerId) -> Option<Rect> {
        let marker = self.time_marker(id)?;
        if let Err(err) = marker.relocate_if_needed(&self.timeline, self) {
            log::debug!("time marker {:?} extent uses stale placement: {}", id, err);
        }
        Some(marker.page_extent(self))
    }

    fn measure_system(&self, placement: Placement) -> Option<(&Measure, &System)> {
        let measure_id = match placement {
            Placement::Segment(id) => self.segment(id)?.measure,
            Placement::Measure(id) => id,
        };
        let measure = self.measure(measure_id)?;
        let system = self.system(measure.system?)?;
        Some((measure, system))
    }
}

fn check_time(seconds: f64) -> Result<(), ScoreError> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(())
    } else {
        Err(ScoreError::InvalidTime(seconds))
    }
}

impl StructuralLocator for Score {
    fn measure_at_tick(&self, tick: Tick) -> Option<MeasureId> {
        if tick < 0 {
            return None;
        }
        let after = self
            .order
            .partition_point(|id| self.measure(*id).map_or(false, |m| m.tick <= tick));
        let id = *self.order.get(after.checked_sub(1)?)?;
        let measure = self.measure(id)?;
        (tick < measure.end_tick()).then_some(id)
    }

    /// Exact match first; otherwise the latest segment of `kind` before
    /// `tick`, i.e. the one sounding at that tick.
    fn segment_at_tick(&self, measure: MeasureId, kind: SegmentType, tick: Tick) -> Option<SegmentId> {
        let m = self.measure(measure)?;
        let mut covering = None;
        for id in &m.segments {
            let Some(segment) = self.segment(*id) else {
                continue;
            };
            if segment.kind != kind {
                continue;
            }
            let segment_tick = m.tick + segment.rtick;
            if segment_tick == tick {
                return Some(*id);
            }
            if segment_tick > tick {
                break;
            }
            covering = Some(*id);
        }
        covering
    }

    fn container(&self, placement: Placement) -> Option<&dyn Container> {
        match placement {
            Placement::Segment(id) => self.segment(id).map(|s| &s.annotations as &dyn Container),
            Placement::Measure(id) => self.measure(id).map(|m| &m.annotations as &dyn Container),
        }
    }
}

impl SystemLayout for Score {
    fn page_pos(&self, placement: Placement) -> Option<Point> {
        let (measure, system) = self.measure_system(placement)?;
        let x = match placement {
            Placement::Segment(id) => measure.x + self.segment(id)?.x,
            Placement::Measure(_) => measure.x,
        };
        Some(system.pos + Vec2::new(x, 0.0))
    }

    fn system_staves(&self, placement: Placement) -> Option<(f64, &[SysStaff])> {
        let (_, system) = self.measure_system(placement)?;
        Some((system.pos.y, &system.staves))
    }
}
