use super::*;
use crate::score::{Annotations, Score};
use crate::structure::{Container, MeasureId, SegmentId, SysStaff};
use crate::tempo::{Tempo, TimeSignature};
use crate::timeline::{ConstantTempo, DIVISION};
use kurbo::Point;

const BAR: Tick = 4 * DIVISION;

/// 4/4 bars with a chord/rest segment on every beat and nothing in between
struct BeatGrid {
    bars: usize,
    lists: Vec<Annotations>,
}

impl BeatGrid {
    fn new(bars: usize) -> Self {
        Self {
            bars,
            lists: (0..bars * 4).map(|_| Annotations::default()).collect(),
        }
    }

    fn members(&self, id: MarkerId) -> Vec<usize> {
        (0..self.lists.len()).filter(|i| self.lists[*i].contains(id)).collect()
    }
}

impl StructuralLocator for BeatGrid {
    fn measure_at_tick(&self, tick: Tick) -> Option<MeasureId> {
        (0..self.bars as Tick * BAR)
            .contains(&tick)
            .then(|| MeasureId((tick / BAR) as usize))
    }

    fn segment_at_tick(&self, measure: MeasureId, kind: SegmentType, tick: Tick) -> Option<SegmentId> {
        let on_beat = tick % DIVISION == 0 && tick / BAR == measure.0 as Tick;
        (kind == SegmentType::ChordRest && on_beat).then(|| SegmentId((tick / DIVISION) as usize))
    }

    fn container(&self, placement: Placement) -> Option<&dyn Container> {
        match placement {
            Placement::Segment(id) => self.lists.get(id.0).map(|l| l as &dyn Container),
            Placement::Measure(_) => None,
        }
    }
}

fn score_with_bars(count: usize) -> Score {
    let mut score = Score::new();
    for _ in 0..count {
        score.append_measure(TimeSignature::default()).unwrap();
    }
    score
}

fn add_beats(score: &mut Score, index: usize) -> Vec<SegmentId> {
    let mut beats = vec![score.lead_segment(index).unwrap()];
    for beat in 1..4 {
        beats.push(
            score
                .add_segment(index, SegmentType::ChordRest, beat * DIVISION, beat as f64 * 50.0)
                .unwrap(),
        );
    }
    beats
}

/// Number of segments and measures listing `id`
fn membership_count(score: &Score, id: MarkerId) -> usize {
    score
        .measure_ids()
        .iter()
        .filter_map(|m| score.measure(*m))
        .map(|measure| {
            let in_segments = measure
                .segments()
                .iter()
                .filter_map(|s| score.segment(*s))
                .filter(|s| s.annotations().contains(id))
                .count();
            in_segments + usize::from(measure.annotations().contains(id))
        })
        .sum()
}

// ==================== CONSTRUCTION TESTS ====================

#[test]
fn test_new_marker_samples_time_and_starts_clean() {
    let mapper = ConstantTempo::new(120.0);
    let marker = TimeMarker::new(MarkerId(0), 2 * DIVISION, &mapper);

    assert!((marker.time_location_seconds() - 1.0).abs() < 1e-9);
    assert_eq!(marker.state(), RelocationState::Clean);
    assert_eq!(marker.placement(), None);
}

#[test]
fn test_new_marker_uses_first_pass_of_repeat() {
    // A | ||: B :|| ; B is heard at 2s and again at 4s
    let mut score = score_with_bars(2);
    score.set_repeat(1, true, true).unwrap();
    let marker = TimeMarker::new(MarkerId(0), BAR, score.timeline());
    assert!((marker.time_location_seconds() - 2.0).abs() < 1e-9);
}

#[test]
fn test_at_time_starts_dirty_and_unplaced() {
    let marker = TimeMarker::at_time(MarkerId(3), 1.5);
    assert!(marker.needs_relocation());
    assert_eq!(marker.placement(), None);
    assert_eq!(marker.id(), MarkerId(3));
}

// ==================== ROUND TRIP TESTS ====================

#[test]
fn test_round_trip_over_repeats_and_tempo_changes() {
    // ||: A B :|| 1. C :|| 2. D | E, with a slowdown in B
    let mut score = score_with_bars(5);
    score.set_repeat(0, true, false).unwrap();
    score.set_repeat(2, false, true).unwrap();
    score.set_ending(2, Some(crate::repeat::Ending::First)).unwrap();
    score.set_ending(3, Some(crate::repeat::Ending::Second)).unwrap();
    score.set_tempo(BAR + DIVISION, Tempo::parse("60").unwrap());

    let timeline = score.timeline();
    let duration = timeline.duration();
    // One tick at the slowest tempo
    let epsilon = 60.0 / (60.0 * DIVISION as f64) + 1e-9;

    for i in 0..500 {
        let t = duration * i as f64 / 500.0;
        let back = timeline.tick_to_time(timeline.time_to_tick(t));
        assert!((back - t).abs() <= epsilon, "t={} back={}", t, back);
    }
}

// ==================== RELOCATION TESTS ====================

#[test]
fn test_relocate_clean_marker_is_noop() {
    let grid = BeatGrid::new(2);
    let mapper = ConstantTempo::new(120.0);
    let marker = TimeMarker::new(MarkerId(0), DIVISION, &mapper);

    assert_eq!(marker.relocate_if_needed(&mapper, &grid), Ok(Relocation::Clean));
    assert_eq!(marker.placement(), None);
    assert!(grid.members(MarkerId(0)).is_empty());
}

#[test]
fn test_relocate_moves_to_segment_at_time() {
    let grid = BeatGrid::new(2);
    let mapper = ConstantTempo::new(120.0);
    let marker = TimeMarker::at_time(MarkerId(0), 2.5);

    let result = marker.relocate_if_needed(&mapper, &grid);
    assert_eq!(
        result,
        Ok(Relocation::Moved {
            from: None,
            to: Placement::Segment(SegmentId(5))
        })
    );
    assert_eq!(grid.members(MarkerId(0)), vec![5]);
    assert!(!marker.needs_relocation());
}

#[test]
fn test_relocate_twice_is_idempotent() {
    let grid = BeatGrid::new(2);
    let mapper = ConstantTempo::new(120.0);
    let marker = TimeMarker::at_time(MarkerId(0), 1.0);

    assert!(marker.relocate_if_needed(&mapper, &grid).is_ok());
    let first = marker.placement();
    assert_eq!(marker.relocate_if_needed(&mapper, &grid), Ok(Relocation::Clean));
    assert_eq!(marker.placement(), first);
    assert_eq!(marker.state(), RelocationState::Clean);
    assert_eq!(grid.members(MarkerId(0)), vec![2]);
}

#[test]
fn test_invalidated_without_move_stays() {
    let grid = BeatGrid::new(1);
    let mapper = ConstantTempo::new(120.0);
    let marker = TimeMarker::at_time(MarkerId(0), 0.5);
    marker.relocate_if_needed(&mapper, &grid).unwrap();

    marker.mark_needs_relocation();
    let result = marker.relocate_if_needed(&mapper, &grid);
    assert_eq!(result, Ok(Relocation::Stayed(Placement::Segment(SegmentId(1)))));
    assert_eq!(grid.members(MarkerId(0)), vec![1]);
}

#[test]
fn test_dirty_lifecycle() {
    let grid = BeatGrid::new(1);
    let mapper = ConstantTempo::new(120.0);
    let mut marker = TimeMarker::new(MarkerId(0), 0, &mapper);
    assert_eq!(marker.state(), RelocationState::Clean);

    marker.mark_needs_relocation();
    assert_eq!(marker.state(), RelocationState::Dirty);
    assert!(marker.relocate_if_needed(&mapper, &grid).is_ok());
    assert_eq!(marker.state(), RelocationState::Clean);

    marker.set_time_location(60.0);
    marker.mark_needs_relocation();
    assert!(marker.relocate_if_needed(&mapper, &grid).is_err());
    assert_eq!(marker.state(), RelocationState::Dirty);
}

#[test]
fn test_set_time_location_does_not_invalidate() {
    let mapper = ConstantTempo::new(120.0);
    let mut marker = TimeMarker::new(MarkerId(0), 0, &mapper);
    marker.set_time_location(3.0);
    assert!(!marker.needs_relocation());
    assert_eq!(marker.time_location_seconds(), 3.0);
}

#[test]
fn test_failure_preserves_placement() {
    let grid = BeatGrid::new(2);
    let mapper = ConstantTempo::new(120.0);
    let mut marker = TimeMarker::at_time(MarkerId(0), 1.0);
    marker.relocate_if_needed(&mapper, &grid).unwrap();

    // Past the last bar
    marker.set_time_location(10.0);
    marker.mark_needs_relocation();
    let result = marker.relocate_if_needed(&mapper, &grid);

    assert_eq!(
        result,
        Err(RelocationError::NoMeasure {
            tick: 20 * DIVISION,
            seconds: 10.0
        })
    );
    assert_eq!(marker.placement(), Some(Placement::Segment(SegmentId(2))));
    assert_eq!(grid.members(MarkerId(0)), vec![2]);
    assert!(marker.needs_relocation());
}

#[test]
fn test_missing_segment_is_reported() {
    let grid = BeatGrid::new(1);
    let mapper = ConstantTempo::new(120.0);
    // Half a beat in: the grid has nothing between beats
    let marker = TimeMarker::at_time(MarkerId(0), 0.25);

    let result = marker.relocate_if_needed(&mapper, &grid);
    assert_eq!(
        result,
        Err(RelocationError::NoSegment {
            tick: DIVISION / 2,
            measure: MeasureId(0)
        })
    );
    assert_eq!(marker.placement(), None);
    assert!(grid.members(MarkerId(0)).is_empty());
}

#[test]
fn test_retry_after_failure_succeeds() {
    let mut score = score_with_bars(1);
    let id = score.add_time_marker_at(3.0, "Late").unwrap();
    let results = score.relocate_time_markers();
    assert!(matches!(results[0].1, Err(RelocationError::NoMeasure { .. })));

    score.append_measure(TimeSignature::default()).unwrap();
    score.relocate_time_markers();
    let marker = score.time_marker(id).unwrap();
    assert!(!marker.needs_relocation());
    assert_eq!(marker.placement(), Some(Placement::Segment(score.lead_segment(1).unwrap())));
}

#[test]
fn test_huge_time_fails_without_panicking() {
    // ||: A B :|| C
    let mut score = score_with_bars(3);
    score.set_repeat(0, true, false).unwrap();
    score.set_repeat(1, false, true).unwrap();
    let lead = score.lead_segment(2).unwrap();
    let id = score.add_time_marker(lead, "Far").unwrap();

    score.set_marker_time(id, 1.0e7).unwrap();
    score.time_marker(id).unwrap().mark_needs_relocation();
    let results = score.relocate_time_markers();

    assert!(matches!(results[0].1, Err(RelocationError::NoMeasure { .. })));
    let marker = score.time_marker(id).unwrap();
    assert!(marker.needs_relocation());
    assert_eq!(marker.placement(), Some(Placement::Segment(lead)));
    assert!(score.segment(lead).unwrap().annotations().contains(id));
}

#[test]
fn test_removed_segment_leaves_measure_without_target() {
    let mut score = score_with_bars(2);
    let lead = score.lead_segment(1).unwrap();
    let id = score.add_time_marker(lead, "B").unwrap();
    score.remove_segment(lead).unwrap();

    let marker = score.time_marker(id).unwrap();
    let result = marker.relocate_if_needed(score.timeline(), &score);
    assert_eq!(
        result,
        Err(RelocationError::NoSegment {
            tick: BAR,
            measure: score.measure_id(1).unwrap()
        })
    );
    assert_eq!(marker.placement(), Some(Placement::Segment(lead)));
}

#[test]
fn test_relocate_into_second_pass_of_repeat() {
    // ||: A B :|| C ; 5s is one second into the second pass over A
    let mut score = score_with_bars(3);
    score.set_repeat(0, true, false).unwrap();
    score.set_repeat(1, false, true).unwrap();
    let beats = add_beats(&mut score, 0);
    let id = score.add_time_marker_at(5.0, "Again").unwrap();

    score.relocate_time_markers();
    let marker = score.time_marker(id).unwrap();
    assert_eq!(marker.placement(), Some(Placement::Segment(beats[2])));
}

#[test]
fn test_example_insert_measure_at_start() {
    let mut score = score_with_bars(1);
    let old_lead = score.lead_segment(0).unwrap();
    let id = score.add_time_marker(old_lead, "Start").unwrap();
    assert_eq!(score.time_marker(id).unwrap().time_location_seconds(), 0.0);

    score.insert_measure(0, TimeSignature::default()).unwrap();
    let new_lead = score.lead_segment(0).unwrap();
    let marker = score.time_marker(id).unwrap();
    assert!(marker.needs_relocation());

    let result = marker.relocate_if_needed(score.timeline(), &score);
    assert_eq!(
        result,
        Ok(Relocation::Moved {
            from: Some(Placement::Segment(old_lead)),
            to: Placement::Segment(new_lead)
        })
    );
    assert_eq!(marker.state(), RelocationState::Clean);
    assert!(!score.segment(old_lead).unwrap().annotations().contains(id));
    assert!(score.segment(new_lead).unwrap().annotations().contains(id));
}

#[test]
fn test_member_of_exactly_one_container() {
    let mut score = score_with_bars(3);
    for index in 0..3 {
        add_beats(&mut score, index);
    }
    let id = score.add_time_marker(score.lead_segment(2).unwrap(), "C").unwrap();

    for index in [0, 1, 0] {
        score.set_measure_time_signature(index, TimeSignature::new(3, 4)).unwrap();
        score.relocate_time_markers();
        assert_eq!(membership_count(&score, id), 1);
    }
    // 4s is the downbeat of the old third bar
    assert!((score.time_marker(id).unwrap().time_location_seconds() - 4.0).abs() < 1e-9);
}

// ==================== ATTACH / DETACH TESTS ====================

#[test]
fn test_attach_to_missing_container() {
    let grid = BeatGrid::new(1);
    let marker = TimeMarker::at_time(MarkerId(0), 0.0);
    assert!(!marker.attach_to(Placement::Measure(MeasureId(0)), &grid));
    assert_eq!(marker.placement(), None);
}

#[test]
fn test_attach_twice_does_not_duplicate() {
    let grid = BeatGrid::new(1);
    let marker = TimeMarker::at_time(MarkerId(7), 0.0);
    assert!(marker.attach_to(Placement::Segment(SegmentId(1)), &grid));
    assert!(marker.attach_to(Placement::Segment(SegmentId(1)), &grid));
    assert_eq!(grid.lists[1].ids(), vec![MarkerId(7)]);
}

#[test]
fn test_detach_clears_placement() {
    let grid = BeatGrid::new(1);
    let marker = TimeMarker::at_time(MarkerId(0), 0.0);
    marker.attach_to(Placement::Segment(SegmentId(3)), &grid);
    marker.detach(&grid);
    assert_eq!(marker.placement(), None);
    assert!(grid.members(MarkerId(0)).is_empty());
}

#[test]
fn test_remove_time_marker_detaches() {
    let mut score = score_with_bars(1);
    let lead = score.lead_segment(0).unwrap();
    let id = score.add_time_marker(lead, "Gone").unwrap();
    let removed = score.remove_time_marker(id).unwrap();
    assert_eq!(removed.text(), "Gone");
    assert!(score.segment(lead).unwrap().annotations().is_empty());
    assert!(score.time_marker(id).is_none());
}

// ==================== EXTENT TESTS ====================

fn laid_out_score(system_pos: Point, measure_x: f64) -> Score {
    let mut score = score_with_bars(1);
    let staves = vec![
        SysStaff::new(0.0, 30.0),
        SysStaff::new(40.0, 30.0),
        SysStaff::new(90.0, 30.0),
    ];
    let system = score.add_system(system_pos, staves);
    score.set_measure_layout(0, system, measure_x, 200.0).unwrap();
    score
}

#[test]
fn test_extent_spans_whole_system() {
    let mut score = laid_out_score(Point::ORIGIN, 0.0);
    let id = score.add_time_marker(score.lead_segment(0).unwrap(), "Intro").unwrap();
    score.time_marker_mut(id).unwrap().set_bbox(Rect::new(0.0, -12.0, 48.0, 4.0));

    let extent = score.time_marker_extent(id).unwrap();
    assert_eq!(extent, Rect::new(0.0, 0.0, 48.0, 120.0));
}

#[test]
fn test_extent_ignores_text_height() {
    let mut score = laid_out_score(Point::ORIGIN, 0.0);
    let id = score.add_time_marker(score.lead_segment(0).unwrap(), "Tall").unwrap();
    score.time_marker_mut(id).unwrap().set_bbox(Rect::new(0.0, -300.0, 10.0, 300.0));

    let extent = score.time_marker_extent(id).unwrap();
    assert_eq!((extent.y0, extent.y1), (0.0, 120.0));
    assert_eq!((extent.x0, extent.x1), (0.0, 10.0));
}

#[test]
fn test_extent_of_measure_placement_spans_system() {
    let score = laid_out_score(Point::ORIGIN, 0.0);
    let measure = score.measure_id(0).unwrap();
    let mut marker = TimeMarker::at_time(MarkerId(0), 0.0);
    marker.set_bbox(Rect::new(0.0, -6.0, 36.0, 6.0));

    assert!(marker.attach_to(Placement::Measure(measure), &score));
    assert!(score.measure(measure).unwrap().annotations().contains(MarkerId(0)));

    let extent = marker.page_extent(&score);
    assert_eq!((extent.y0, extent.y1), (0.0, 120.0));
    assert_eq!((extent.x0, extent.x1), (0.0, 36.0));
}

#[test]
fn test_extent_in_page_coordinates() {
    let mut score = laid_out_score(Point::new(10.0, 200.0), 50.0);
    let beat2 = score.add_segment(0, SegmentType::ChordRest, DIVISION, 40.0).unwrap();
    let id = score.add_time_marker(beat2, "Beat 2").unwrap();
    score.time_marker_mut(id).unwrap().set_bbox(Rect::new(0.0, -10.0, 30.0, 0.0));

    let extent = score.time_marker_extent(id).unwrap();
    assert_eq!(extent, Rect::new(100.0, 200.0, 130.0, 320.0));
}

#[test]
fn test_unplaced_extent_is_local_bbox() {
    let grid_layout = score_with_bars(1);
    let mut marker = TimeMarker::at_time(MarkerId(0), 0.0);
    let bbox = Rect::new(-5.0, -10.0, 25.0, 2.0);
    marker.set_bbox(bbox);
    assert_eq!(marker.page_extent(&grid_layout), bbox);
}

#[test]
fn test_extent_without_system_is_local_bbox() {
    let mut score = score_with_bars(1);
    let id = score.add_time_marker(score.lead_segment(0).unwrap(), "Floating").unwrap();
    let bbox = Rect::new(0.0, -8.0, 20.0, 0.0);
    score.time_marker_mut(id).unwrap().set_bbox(bbox);
    assert_eq!(score.time_marker_extent(id), Some(bbox));
}

#[test]
fn test_extent_offset_moves_box_horizontally() {
    let mut score = laid_out_score(Point::ORIGIN, 0.0);
    let id = score.add_time_marker(score.lead_segment(0).unwrap(), "Nudged").unwrap();
    let marker = score.time_marker_mut(id).unwrap();
    marker.set_bbox(Rect::new(0.0, -10.0, 20.0, 0.0));
    marker.set_offset(Vec2::new(5.0, -15.0));

    let extent = score.time_marker_extent(id).unwrap();
    assert_eq!(extent, Rect::new(5.0, 0.0, 25.0, 120.0));
}

#[test]
fn test_extent_relocates_dirty_marker_first() {
    let mut score = laid_out_score(Point::ORIGIN, 0.0);
    let lead = score.lead_segment(0).unwrap();
    let id = score.add_time_marker(lead, "Moved").unwrap();
    score.time_marker_mut(id).unwrap().set_bbox(Rect::new(0.0, 0.0, 10.0, 10.0));

    score.insert_measure(0, TimeSignature::default()).unwrap();
    let system = crate::structure::SystemId(0);
    score.set_measure_layout(0, system, 300.0, 200.0).unwrap();
    score.set_measure_layout(1, system, 500.0, 200.0).unwrap();

    let extent = score.time_marker_extent(id).unwrap();
    assert!(!score.time_marker(id).unwrap().needs_relocation());
    assert_eq!(extent.x0, 300.0);
}
