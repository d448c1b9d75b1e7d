//! # Tempo and Meter
//!
//! Time signatures, tempo markings, and the piecewise-constant tempo map that
//! turns structural tick distances into seconds.
//!
//! ## Tempo Notation
//! Tempo strings are a BPM number followed by optional rhythm modifiers:
//! - `120` - quarter note = 120
//! - `120p` - half note = 120
//! - `60o` - whole note = 60
//! - `120/` - eighth note = 120 (`//` sixteenth, `///` 32nd)
//! - `88p*` / `88*` - dotted; the dot comes after the note value
//!
//! The tempo map stores everything as quarter-note BPM.

use std::collections::BTreeMap;

use crate::error::ScoreError;
use crate::timeline::{Tick, DIVISION};

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub beats: u8,
    pub beat_type: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
        }
    }
}

impl TimeSignature {
    pub fn new(beats: u8, beat_type: u8) -> Self {
        Self { beats, beat_type }
    }

    /// Parse "N/D". The denominator must be a power of two.
    pub fn parse(s: &str) -> Result<Self, ScoreError> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        if parts.len() != 2 {
            return Err(ScoreError::MetadataError(format!(
                "Invalid time signature: {}",
                s
            )));
        }

        let beats: u8 = parts[0]
            .trim()
            .parse()
            .map_err(|_| ScoreError::MetadataError(format!("Invalid time signature beats: {}", s)))?;
        let beat_type: u8 = parts[1]
            .trim()
            .parse()
            .map_err(|_| ScoreError::MetadataError(format!("Invalid time signature beat type: {}", s)))?;

        let time_signature = Self { beats, beat_type };
        time_signature.check()?;
        Ok(time_signature)
    }

    /// Reject meters that have no whole number of ticks per beat.
    pub fn check(&self) -> Result<(), ScoreError> {
        let Self { beats, beat_type } = *self;
        if beats == 0 || beat_type == 0 || !beat_type.is_power_of_two() || beat_type > 64 {
            return Err(ScoreError::MetadataError(format!(
                "Invalid time signature: {}/{}",
                beats, beat_type
            )));
        }
        Ok(())
    }

    /// Ticks in one beat of this meter
    pub fn beat_ticks(&self) -> Tick {
        DIVISION * 4 / self.beat_type as Tick
    }

    /// Ticks in a full measure of this meter
    pub fn measure_ticks(&self) -> Tick {
        self.beat_ticks() * self.beats as Tick
    }
}

/// Which note value a tempo marking counts
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BeatUnit {
    Whole,
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl BeatUnit {
    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "" => Some(BeatUnit::Quarter),
            "o" => Some(BeatUnit::Whole),
            "p" => Some(BeatUnit::Half),
            "/" => Some(BeatUnit::Eighth),
            "//" => Some(BeatUnit::Sixteenth),
            "///" => Some(BeatUnit::ThirtySecond),
            _ => None,
        }
    }

    fn quarters(&self) -> f64 {
        match self {
            BeatUnit::Whole => 4.0,
            BeatUnit::Half => 2.0,
            BeatUnit::Quarter => 1.0,
            BeatUnit::Eighth => 0.5,
            BeatUnit::Sixteenth => 0.25,
            BeatUnit::ThirtySecond => 0.125,
        }
    }
}

/// Tempo marking with optional rhythm modifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub bpm: u16,
    pub unit: BeatUnit,
    pub dotted: bool,
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            bpm: 120,
            unit: BeatUnit::Quarter,
            dotted: false,
        }
    }
}

impl Tempo {
    /// Parse a tempo marking: the BPM digits, then an optional note value
    /// (`o`, `p`, `/`, `//`, `///`), then an optional `*` dot.
    pub fn parse(s: &str) -> Result<Self, ScoreError> {
        let s = s.trim();
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, rhythm) = s.split_at(split);

        let bpm = match digits.parse::<u16>() {
            Ok(0) => {
                return Err(ScoreError::MetadataError("Tempo BPM must be greater than 0".to_string()))
            }
            Ok(bpm) => bpm,
            Err(_) if digits.is_empty() => {
                return Err(ScoreError::MetadataError(format!("Tempo must start with BPM number: {}", s)))
            }
            Err(_) => return Err(ScoreError::MetadataError(format!("Invalid tempo BPM: {}", digits))),
        };

        let (value, dotted) = match rhythm.strip_suffix('*') {
            Some(value) => (value, true),
            None => (rhythm, false),
        };
        let unit = BeatUnit::from_symbol(value).ok_or_else(|| {
            ScoreError::MetadataError(format!("Invalid tempo rhythm '{}' in {}", rhythm, s))
        })?;

        Ok(Self { bpm, unit, dotted })
    }

    /// Quarter notes per minute
    ///
    /// Half note = 160 is quarter = 320; dotted quarter = 120 is quarter = 180.
    pub fn to_quarter_note_bpm(&self) -> f64 {
        let mut quarters = self.unit.quarters();
        if self.dotted {
            quarters *= 1.5;
        }
        self.bpm as f64 * quarters
    }
}

/// Piecewise-constant tempo keyed by structural tick.
///
/// There is always an entry at tick 0. Lookups past the last change use the
/// last tempo.
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    changes: BTreeMap<Tick, f64>,
}

impl Default for TempoMap {
    fn default() -> Self {
        Self::new(Tempo::default().to_quarter_note_bpm())
    }
}

impl TempoMap {
    pub fn new(initial_quarter_bpm: f64) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert(0, initial_quarter_bpm);
        Self { changes }
    }

    /// Set the tempo from `tick` onwards, replacing any change at that tick.
    pub fn set(&mut self, tick: Tick, quarter_bpm: f64) {
        self.changes.insert(tick.max(0), quarter_bpm);
    }

    /// Remove the change at `tick`. The change at tick 0 cannot be removed.
    pub fn remove(&mut self, tick: Tick) -> bool {
        tick != 0 && self.changes.remove(&tick).is_some()
    }

    /// Quarter-note BPM in effect at `tick`
    pub fn tempo_at(&self, tick: Tick) -> f64 {
        self.changes
            .range(..=tick.max(0))
            .next_back()
            .map(|(_, bpm)| *bpm)
            .unwrap_or_else(|| Tempo::default().to_quarter_note_bpm())
    }

    pub fn changes(&self) -> impl Iterator<Item = (Tick, f64)> + '_ {
        self.changes.iter().map(|(tick, bpm)| (*tick, *bpm))
    }

    /// Open a gap of `len` ticks at `at`, moving later changes along.
    pub fn insert_range(&mut self, at: Tick, len: Tick) {
        if len <= 0 {
            return;
        }
        // The entry at tick 0 stays put and covers the gap when `at == 0`
        let moved = self.changes.split_off(&at.max(1));
        for (tick, bpm) in moved {
            self.changes.insert(tick + len, bpm);
        }
    }

    /// Delete the ticks `[from, to)` and close the gap. The tempo in effect at
    /// `to` stays in effect at `from`.
    pub fn remove_range(&mut self, from: Tick, to: Tick) {
        let from = from.max(0);
        if to <= from {
            return;
        }
        let keep = self.tempo_at(to);
        let mut tail = self.changes.split_off(&from);
        let after = tail.split_off(&to);
        for (tick, bpm) in after {
            self.changes.insert(tick - (to - from), bpm);
        }
        if !self.changes.contains_key(&from) && (from == 0 || self.tempo_at(from) != keep) {
            self.changes.insert(from, keep);
        }
    }

    /// Seconds elapsed from `from` to `to` (`from <= to`) along one pass
    pub fn seconds_between(&self, from: Tick, to: Tick) -> f64 {
        if to <= from {
            return 0.0;
        }
        let mut seconds = 0.0;
        let mut cursor = from;
        let mut bpm = self.tempo_at(from);
        for (&tick, &next_bpm) in self.changes.range(from + 1..to) {
            seconds += seconds_for_ticks(tick - cursor, bpm);
            cursor = tick;
            bpm = next_bpm;
        }
        seconds + seconds_for_ticks(to - cursor, bpm)
    }

    /// Tick reached `seconds` after `from`, rounded to the nearest tick
    pub fn tick_after(&self, from: Tick, seconds: f64) -> Tick {
        let mut remaining = seconds.max(0.0);
        let mut cursor = from;
        let mut bpm = self.tempo_at(from);
        for (&tick, &next_bpm) in self.changes.range(from + 1..) {
            let span = seconds_for_ticks(tick - cursor, bpm);
            if remaining < span {
                break;
            }
            remaining -= span;
            cursor = tick;
            bpm = next_bpm;
        }
        cursor.saturating_add(ticks_for_seconds(remaining, bpm))
    }
}

fn seconds_for_ticks(ticks: Tick, quarter_bpm: f64) -> f64 {
    ticks as f64 * 60.0 / (quarter_bpm * DIVISION as f64)
}

fn ticks_for_seconds(seconds: f64, quarter_bpm: f64) -> Tick {
    (seconds * quarter_bpm * DIVISION as f64 / 60.0).round() as Tick
}
