//! # Error Types
//!
//! This module defines the error types for the score document and for time
//! marker relocation.
//!
//! ## Error Types
//! - [`ScoreError`] - Loading, validating, or editing a score went wrong
//! - [`RelocationError`] - A time marker could not be placed in the structure
//!
//! Relocation errors are never fatal. The marker keeps its previous placement
//! and stays dirty, so the next query simply retries.
//!
//! ## Usage
//! ```rust
//! use timemark::{Score, ScoreError};
//!
//! match Score::from_yaml("time-signature: 4\n") {
//!     Ok(_) => println!("loaded"),
//!     Err(ScoreError::MetadataError(message)) => eprintln!("bad metadata: {}", message),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

use crate::structure::{MarkerId, MeasureId, SegmentId};
use crate::timeline::Tick;

#[derive(Error, Debug)]
pub enum ScoreError {
    /// Invalid metadata in a score description.
    ///
    /// # Example
    /// ```
    /// # use timemark::ScoreError;
    /// let err = ScoreError::MetadataError("time-signature must be in format N/D".to_string());
    /// assert_eq!(err.to_string(), "Invalid metadata: time-signature must be in format N/D");
    /// ```
    #[error("Invalid metadata: {0}")]
    MetadataError(String),

    /// Structural validation error with a 1-indexed measure number.
    ///
    /// Occurs when repeats are unmatched or endings are incorrectly structured.
    #[error("Semantic error at measure {measure}: {message}")]
    SemanticError { measure: usize, message: String },

    /// The YAML score description could not be deserialized.
    #[error("Invalid score description: {0}")]
    ConfigError(#[from] serde_yaml::Error),

    /// A measure index outside the score.
    #[error("No measure at index {0}")]
    UnknownMeasure(usize),

    /// A segment tick outside its measure.
    #[error("Tick {tick} is outside measure {measure}")]
    InvalidTick { measure: usize, tick: Tick },

    /// A system index outside the score.
    #[error("No system at index {0}")]
    UnknownSystem(usize),

    /// A segment id that is not (or no longer) in the score.
    #[error("No segment with id {0:?}")]
    UnknownSegment(SegmentId),

    /// A marker id that is not (or no longer) in the object pool.
    #[error("No time marker with id {0:?}")]
    UnknownMarker(MarkerId),

    /// A marker time that is not a finite, non-negative number of seconds.
    #[error("Invalid time location: {0}s")]
    InvalidTime(f64),
}

/// Why a dirty time marker could not be relocated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelocationError {
    #[error("no measure for tick {tick} ({seconds}s)")]
    NoMeasure { tick: Tick, seconds: f64 },

    #[error("no chord/rest segment at tick {tick} in measure {measure:?}")]
    NoSegment { tick: Tick, measure: MeasureId },
}
