//! # Repeat Unfolding
//!
//! Builds the unfolded playback timeline of a score and implements
//! [`TimelineMapper`] on top of it.
//!
//! ## Unfolding Rules
//! - Simple repeats: `||: ... :||` plays the section twice
//! - A repeat end without a start repeats from the beginning of the score, or
//!   from just after the previous repeat section
//! - Volta endings: the first ending is played on the first pass and skipped
//!   on the second, which continues with the second ending
//!
//! The unfolded measure sequence is compressed into [`RepeatSegment`]s: runs
//! of structurally consecutive measures. Each run knows its structural tick,
//! its unfolded tick, and the playback time at which it starts.
//!
//! ## Example
//! ```rust
//! use timemark::repeat::{MeasureMarks, RepeatList};
//! use timemark::tempo::TempoMap;
//! use timemark::timeline::{TimelineMapper, DIVISION};
//!
//! let bar = 4 * DIVISION;
//! let marks = vec![
//!     MeasureMarks { tick: 0, len: bar, repeat_start: true, ..Default::default() },
//!     MeasureMarks { tick: bar, len: bar, repeat_end: true, ..Default::default() },
//! ];
//! let list = RepeatList::build(&marks, TempoMap::new(120.0));
//!
//! // Four bars are heard, two seconds each
//! assert_eq!(list.unfolded_len(), 4 * bar);
//! assert_eq!(list.utick_to_tick(2 * bar), 0);
//! assert!((list.tick_to_time(2 * bar) - 4.0).abs() < 1e-9);
//! ```

use crate::tempo::TempoMap;
use crate::timeline::{Tick, TimelineMapper};

/// Ending type for volta brackets (1st/2nd endings)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    First,
    Second,
}

/// Repeat-relevant facts about one measure, in score order
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasureMarks {
    pub tick: Tick,
    pub len: Tick,
    pub repeat_start: bool,
    pub repeat_end: bool,
    pub ending: Option<Ending>,
}

/// A run of consecutive measures in the unfolded timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepeatSegment {
    pub tick: Tick,
    pub len: Tick,
    pub utick: Tick,
    pub utime: f64,
}

impl RepeatSegment {
    fn utick_end(&self) -> Tick {
        self.utick + self.len
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatList {
    segments: Vec<RepeatSegment>,
    tempo: TempoMap,
}

impl RepeatList {
    pub fn build(measures: &[MeasureMarks], tempo: TempoMap) -> Self {
        let sequence = unfold(measures);

        let mut segments: Vec<RepeatSegment> = Vec::new();
        let mut utick = 0;
        let mut utime = 0.0;
        let mut previous: Option<usize> = None;

        for index in sequence {
            let measure = &measures[index];
            let continues = previous.map_or(false, |p| p + 1 == index);
            match segments.last_mut() {
                Some(run) if continues && run.tick + run.len == measure.tick => {
                    run.len += measure.len;
                }
                _ => segments.push(RepeatSegment {
                    tick: measure.tick,
                    len: measure.len,
                    utick,
                    utime,
                }),
            }
            utick += measure.len;
            utime += tempo.seconds_between(measure.tick, measure.tick + measure.len);
            previous = Some(index);
        }

        Self { segments, tempo }
    }

    pub fn segments(&self) -> &[RepeatSegment] {
        &self.segments
    }

    pub fn tempo(&self) -> &TempoMap {
        &self.tempo
    }

    /// Total length of the unfolded timeline in ticks
    pub fn unfolded_len(&self) -> Tick {
        self.segments.last().map_or(0, RepeatSegment::utick_end)
    }

    /// Total playback duration in seconds
    pub fn duration(&self) -> f64 {
        self.segments.last().map_or(0.0, |last| {
            last.utime + self.tempo.seconds_between(last.tick, last.tick + last.len)
        })
    }

    /// Run containing `utick`, or the nearest run at either end
    fn segment_for_utick(&self, utick: Tick) -> Option<&RepeatSegment> {
        let after = self.segments.partition_point(|s| s.utick <= utick);
        self.segments.get(after.saturating_sub(1))
    }

    fn segment_for_utime(&self, seconds: f64) -> Option<&RepeatSegment> {
        let after = self.segments.partition_point(|s| s.utime <= seconds);
        self.segments.get(after.saturating_sub(1))
    }
}

impl TimelineMapper for RepeatList {
    fn tick_to_time(&self, utick: Tick) -> f64 {
        match self.segment_for_utick(utick) {
            Some(segment) => {
                let tick = segment.tick + (utick - segment.utick);
                segment.utime + self.tempo.seconds_between(segment.tick, tick)
            }
            None => self.tempo.seconds_between(0, utick),
        }
    }

    fn time_to_tick(&self, seconds: f64) -> Tick {
        match self.segment_for_utime(seconds) {
            Some(segment) => {
                let tick = self.tempo.tick_after(segment.tick, seconds - segment.utime);
                segment.utick.saturating_add(tick - segment.tick)
            }
            None => self.tempo.tick_after(0, seconds),
        }
    }

    fn utick_to_tick(&self, utick: Tick) -> Tick {
        match self.segment_for_utick(utick) {
            Some(segment) => segment.tick.saturating_add(utick - segment.utick),
            None => utick,
        }
    }

    fn tick_to_utick(&self, tick: Tick) -> Tick {
        let first_pass = self
            .segments
            .iter()
            .find(|s| s.tick <= tick && tick < s.tick + s.len)
            .or_else(|| self.segments.last());
        match first_pass {
            Some(segment) => segment.utick.saturating_add(tick - segment.tick),
            None => tick,
        }
    }
}

/// Expand measure indices into playback order
fn unfold(measures: &[MeasureMarks]) -> Vec<usize> {
    let mut sequence = Vec::with_capacity(measures.len());
    let mut section_start = 0;
    // Index of the repeat end whose jump back has been taken
    let mut second_pass: Option<usize> = None;
    let mut i = 0;

    while i < measures.len() {
        let measure = &measures[i];

        if let Some(repeat_end) = second_pass {
            if measure.ending == Some(Ending::First) {
                i = repeat_end + 1;
                section_start = i;
                second_pass = None;
                continue;
            }
        } else if measure.repeat_start {
            section_start = i;
        }

        sequence.push(i);

        if measure.repeat_end {
            match second_pass {
                None => {
                    second_pass = Some(i);
                    i = section_start;
                    continue;
                }
                Some(repeat_end) if repeat_end == i => {
                    second_pass = None;
                    section_start = i + 1;
                }
                Some(_) => {}
            }
        }

        i += 1;
    }

    sequence
}
