//! # Structural Validation
//!
//! Checks that the repeat structure of a score can be unfolded unambiguously.
//!
//! ## Validation Rules
//!
//! ### Repeat Markers
//! - A repeat start must be closed by a repeat end before the next start
//! - A repeat end without any start repeats from the beginning of the score
//!   (or the end of the previous section), so it is allowed
//! - A repeat start must eventually be closed
//!
//! ### Endings
//! - A first ending must carry the repeat end
//! - A second ending must immediately follow a first ending and cannot carry
//!   a repeat end
//!
//! Measure numbers in errors are 1-indexed.

use crate::error::ScoreError;
use crate::repeat::Ending;
use crate::score::{Measure, Score};

pub fn validate(score: &Score) -> Result<(), ScoreError> {
    let measures: Vec<&Measure> = score
        .measure_ids()
        .iter()
        .filter_map(|id| score.measure(*id))
        .collect();
    validate_repeats(&measures)?;
    validate_endings(&measures)?;
    Ok(())
}

fn validate_repeats(measures: &[&Measure]) -> Result<(), ScoreError> {
    let mut repeat_start_measure: Option<usize> = None;

    for (i, measure) in measures.iter().enumerate() {
        let measure_number = i + 1;

        if measure.repeat_start() {
            if repeat_start_measure.is_some() {
                return Err(ScoreError::SemanticError {
                    measure: measure_number,
                    message: "Repeat start found without closing the previous repeat".to_string(),
                });
            }
            repeat_start_measure = Some(measure_number);
        }

        if measure.repeat_end() {
            repeat_start_measure = None;
        }
    }

    if let Some(start_measure) = repeat_start_measure {
        return Err(ScoreError::SemanticError {
            measure: start_measure,
            message: "Repeat start at this measure has no matching repeat end".to_string(),
        });
    }

    Ok(())
}

fn validate_endings(measures: &[&Measure]) -> Result<(), ScoreError> {
    for (i, measure) in measures.iter().enumerate() {
        let measure_number = i + 1;

        match measure.ending() {
            Some(Ending::First) => {
                if !measure.repeat_end() {
                    return Err(ScoreError::SemanticError {
                        measure: measure_number,
                        message: "First ending must end with a repeat sign".to_string(),
                    });
                }
            }
            Some(Ending::Second) => {
                if measure.repeat_end() {
                    return Err(ScoreError::SemanticError {
                        measure: measure_number,
                        message: "Second ending cannot have a repeat sign".to_string(),
                    });
                }

                let follows_first = i > 0 && measures[i - 1].ending() == Some(Ending::First);
                if !follows_first {
                    return Err(ScoreError::SemanticError {
                        measure: measure_number,
                        message: "Second ending must immediately follow a first ending".to_string(),
                    });
                }
            }
            None => {}
        }
    }

    Ok(())
}
