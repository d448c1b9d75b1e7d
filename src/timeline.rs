//! # Timeline Mapping
//!
//! Conversion between structural ticks and unfolded playback time.
//!
//! ## Coordinate Systems
//! - **Tick** - structural position, monotonic along one linear pass through
//!   the score. A measure repeated twice has one tick range.
//! - **Unfolded tick (utick)** - position in the fully expanded playback
//!   timeline. A repeated measure occupies two utick ranges.
//! - **Time** - seconds from the start of playback.
//!
//! `tick_to_time` is only well defined on uticks, since a structural tick
//! played twice has two times. `time_to_tick` returns exactly one utick for
//! every time inside the piece; callers strip the pass information with
//! [`TimelineMapper::utick_to_tick`].
//!
//! [`RepeatList`](crate::repeat::RepeatList) is the implementation backed by
//! a [`Score`](crate::score::Score).

/// Structural or unfolded position in ticks.
pub type Tick = i32;

/// Ticks per quarter note.
pub const DIVISION: Tick = 480;

pub trait TimelineMapper {
    /// Seconds from the start of playback at an unfolded tick.
    fn tick_to_time(&self, utick: Tick) -> f64;

    /// Unfolded tick sounding at `seconds`.
    fn time_to_tick(&self, seconds: f64) -> Tick;

    /// Strip the repeat-pass information from an unfolded tick.
    fn utick_to_tick(&self, utick: Tick) -> Tick {
        utick
    }

    /// Unfolded tick of the first playback pass over a structural tick.
    fn tick_to_utick(&self, tick: Tick) -> Tick {
        tick
    }
}

/// Fixed-tempo mapper with no repeats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantTempo {
    pub quarter_bpm: f64,
}

impl ConstantTempo {
    pub fn new(quarter_bpm: f64) -> Self {
        Self { quarter_bpm }
    }

    fn seconds_per_tick(&self) -> f64 {
        60.0 / (self.quarter_bpm * DIVISION as f64)
    }
}

impl TimelineMapper for ConstantTempo {
    fn tick_to_time(&self, utick: Tick) -> f64 {
        utick as f64 * self.seconds_per_tick()
    }

    fn time_to_tick(&self, seconds: f64) -> Tick {
        (seconds / self.seconds_per_tick()).round() as Tick
    }
}
