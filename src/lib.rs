pub mod config;
pub mod error;
pub mod marker;
pub mod repeat;
pub mod score;
pub mod structure;
pub mod tempo;
pub mod timeline;
pub mod validate;

pub use config::ScoreConfig;
pub use error::*;
pub use marker::{Relocation, RelocationEvent, RelocationState, TimeMarker};
pub use repeat::{Ending, RepeatList};
pub use score::{Measure, Score, Segment, System};
pub use structure::{
    Container, MarkerId, MeasureId, Placement, SegmentId, SegmentType, StructuralLocator, SysStaff,
    SystemId, SystemLayout,
};
pub use tempo::{Tempo, TempoMap, TimeSignature};
pub use timeline::{ConstantTempo, Tick, TimelineMapper, DIVISION};
pub use validate::validate;

/// Load a score description and relocate every time marker.
/// This is the main entry point for the library.
pub fn load(source: &str) -> Result<Score, ScoreError> {
    let score = Score::from_yaml(source)?;
    for (id, result) in score.relocate_time_markers() {
        if let Err(e) = result {
            log::warn!("time marker {:?} could not be placed: {}", id, e);
        }
    }
    Ok(score)
}
