//! # Score Descriptions
//!
//! Loads a [`Score`] from a YAML description.
//!
//! ## Format
//! ```yaml
//! title: Etude
//! tempo: "120"              # same notation as Tempo::parse: "60p", "80*"
//! time-signature: "4/4"     # default meter for every measure
//! tempo-changes:
//!   - { measure: 3, beat: 1, tempo: "60" }
//! systems:
//!   - { x: 0, y: 100, staves: [{ y: 0, height: 40 }] }
//! measures:
//!   - { repeat-start: true, system: 1, x: 0, width: 200 }
//!   - { repeat-end: true, ending: 1, beats: [3], system: 1, x: 200, width: 200 }
//!   - { ending: 2, time-signature: "3/4" }
//! markers:
//!   - { measure: 2, beat: 3, text: "Cue" }
//!   - { seconds: 4.5, text: "Hit" }
//! ```
//!
//! Measure, system, and beat numbers are 1-indexed. Each measure gets a
//! chord/rest segment on beat 1 plus one per entry in `beats`.

use kurbo::{Point, Rect};
use serde::Deserialize;

use crate::error::ScoreError;
use crate::repeat::Ending;
use crate::score::Score;
use crate::structure::{SegmentType, StructuralLocator, SysStaff, SystemId};
use crate::tempo::{Tempo, TimeSignature};
use crate::timeline::Tick;
use crate::validate::validate;

/// Raw score description for YAML deserialization
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ScoreConfig {
    pub title: Option<String>,
    pub tempo: Option<String>,
    pub time_signature: Option<String>,
    #[serde(default)]
    pub tempo_changes: Vec<TempoChangeConfig>,
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
    #[serde(default)]
    pub measures: Vec<MeasureConfig>,
    #[serde(default)]
    pub markers: Vec<MarkerConfig>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct TempoChangeConfig {
    pub measure: usize,
    #[serde(default = "first_beat")]
    pub beat: f64,
    pub tempo: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SystemConfig {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub staves: Vec<StaffConfig>,
}

#[derive(Deserialize, Debug)]
pub struct StaffConfig {
    pub y: f64,
    pub height: f64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct MeasureConfig {
    pub time_signature: Option<String>,
    #[serde(default)]
    pub repeat_start: bool,
    #[serde(default)]
    pub repeat_end: bool,
    /// Volta number: 1 or 2
    pub ending: Option<u8>,
    pub system: Option<usize>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub width: f64,
    /// Beats carrying a chord or rest besides beat 1
    #[serde(default)]
    pub beats: Vec<f64>,
}

/// A marker is anchored either at a measure and beat or at an absolute time.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case")]
pub struct MarkerConfig {
    pub measure: Option<usize>,
    pub beat: Option<f64>,
    pub seconds: Option<f64>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

fn first_beat() -> f64 {
    1.0
}

impl ScoreConfig {
    pub fn from_yaml(source: &str) -> Result<Self, ScoreError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// Build and validate the score, then create its markers.
    pub fn build(&self) -> Result<Score, ScoreError> {
        let tempo = match &self.tempo {
            Some(tempo) => Tempo::parse(tempo)?,
            None => Tempo::default(),
        };
        let default_time_signature = match &self.time_signature {
            Some(ts) => TimeSignature::parse(ts)?,
            None => TimeSignature::default(),
        };

        let mut score = Score::with_tempo(tempo);
        score.title = self.title.clone();

        for system in &self.systems {
            let staves = system
                .staves
                .iter()
                .map(|staff| SysStaff::new(staff.y, staff.height))
                .collect();
            score.add_system(Point::new(system.x, system.y), staves);
        }

        for (index, measure) in self.measures.iter().enumerate() {
            build_measure(&mut score, index, measure, default_time_signature)?;
        }

        for change in &self.tempo_changes {
            let index = measure_index(&score, change.measure)?;
            let tick = beat_tick(&score, index, change.beat)?;
            score.set_tempo(tick, Tempo::parse(&change.tempo)?);
        }

        validate(&score)?;

        for marker in &self.markers {
            add_marker(&mut score, marker)?;
        }

        log::debug!(
            "loaded score with {} measures and {} time markers",
            score.measure_count(),
            score.time_markers().count()
        );
        Ok(score)
    }
}

impl Score {
    /// Load a validated score from a YAML description.
    pub fn from_yaml(source: &str) -> Result<Self, ScoreError> {
        ScoreConfig::from_yaml(source)?.build()
    }
}

fn build_measure(
    score: &mut Score,
    index: usize,
    config: &MeasureConfig,
    default_time_signature: TimeSignature,
) -> Result<(), ScoreError> {
    let time_signature = match &config.time_signature {
        Some(ts) => TimeSignature::parse(ts)?,
        None => default_time_signature,
    };
    score.append_measure(time_signature)?;
    score.set_repeat(index, config.repeat_start, config.repeat_end)?;

    let ending = match config.ending {
        None => None,
        Some(1) => Some(Ending::First),
        Some(2) => Some(Ending::Second),
        Some(n) => {
            return Err(ScoreError::MetadataError(format!(
                "Invalid ending {} in measure {}: must be 1 or 2",
                n,
                index + 1
            )))
        }
    };
    if ending.is_some() {
        score.set_ending(index, ending)?;
    }

    if let Some(system) = config.system {
        // Report the 1-indexed number as written
        let id = system
            .checked_sub(1)
            .map(SystemId)
            .filter(|id| score.system(*id).is_some())
            .ok_or(ScoreError::UnknownSystem(system))?;
        score.set_measure_layout(index, id, config.x, config.width)?;
    }

    let len = time_signature.measure_ticks();
    for beat in &config.beats {
        let rtick = beat_tick(score, index, *beat)? - measure_start(score, index)?;
        if rtick == 0 {
            continue;
        }
        let x = config.width * rtick as f64 / len as f64;
        score.add_segment(index, SegmentType::ChordRest, rtick, x)?;
    }
    Ok(())
}

fn add_marker(score: &mut Score, config: &MarkerConfig) -> Result<(), ScoreError> {
    let id = match (config.measure, config.seconds) {
        (Some(number), None) => {
            let index = measure_index(score, number)?;
            let tick = beat_tick(score, index, config.beat.unwrap_or(1.0))?;
            let segment = score
                .measure_id(index)
                .and_then(|m| score.segment_at_tick(m, SegmentType::ChordRest, tick))
                .filter(|s| score.segment_tick(*s) == Some(tick))
                .ok_or_else(|| {
                    ScoreError::MetadataError(format!(
                        "Marker '{}': no chord or rest on beat {} of measure {}",
                        config.text,
                        config.beat.unwrap_or(1.0),
                        number
                    ))
                })?;
            score.add_time_marker(segment, config.text.clone())?
        }
        (None, Some(seconds)) => score.add_time_marker_at(seconds, config.text.clone())?,
        _ => {
            return Err(ScoreError::MetadataError(format!(
                "Marker '{}' needs either a measure or seconds",
                config.text
            )))
        }
    };

    if let Some(marker) = score.time_marker_mut(id) {
        marker.set_bbox(Rect::new(0.0, 0.0, config.width, config.height));
    }
    Ok(())
}

fn measure_index(score: &Score, number: usize) -> Result<usize, ScoreError> {
    number
        .checked_sub(1)
        .filter(|index| *index < score.measure_count())
        .ok_or(ScoreError::UnknownMeasure(number))
}

fn measure_start(score: &Score, index: usize) -> Result<Tick, ScoreError> {
    score
        .measure_id(index)
        .and_then(|id| score.measure(id))
        .map(|m| m.tick())
        .ok_or(ScoreError::UnknownMeasure(index + 1))
}

/// Absolute tick of a 1-indexed beat in the measure at `index`
fn beat_tick(score: &Score, index: usize, beat: f64) -> Result<Tick, ScoreError> {
    let measure = score
        .measure_id(index)
        .and_then(|id| score.measure(id))
        .ok_or(ScoreError::UnknownMeasure(index + 1))?;
    let rtick = ((beat - 1.0) * measure.time_signature().beat_ticks() as f64).round() as Tick;
    if !beat.is_finite() || rtick < 0 || rtick >= measure.len() {
        return Err(ScoreError::InvalidTick {
            measure: index + 1,
            tick: rtick,
        });
    }
    Ok(measure.tick() + rtick)
}
