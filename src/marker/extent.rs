//! Page extent of a time marker
//!
//! A time marker belongs to a whole system rather than to the staff its
//! container happens to sit on. Once placed, its box reaches from the top of
//! the system's first staff to the bottom of its last one, which is what
//! hit-testing and collision avoidance see.

use kurbo::{Point, Rect};

use super::TimeMarker;
use crate::structure::SystemLayout;

impl TimeMarker {
    /// Page position: the container's page position plus the marker offset.
    /// Unplaced markers are positioned at their offset alone.
    pub fn page_pos(&self, layout: &dyn SystemLayout) -> Point {
        let origin = self
            .placement()
            .and_then(|placement| layout.page_pos(placement))
            .unwrap_or(Point::ORIGIN);
        origin + self.offset()
    }

    /// Bounding box in page coordinates.
    ///
    /// While the marker sits in a segment or measure, the vertical range is
    /// replaced by the span of every staff in the owning system; the
    /// horizontal range always comes from the local box.
    pub fn page_extent(&self, layout: &dyn SystemLayout) -> Rect {
        let rect = self.bbox() + self.page_pos(layout).to_vec2();

        let Some(placement) = self.placement() else {
            return rect;
        };
        let Some((system_y, staves)) = layout.system_staves(placement) else {
            return rect;
        };
        if staves.is_empty() {
            return rect;
        }

        let top = staves
            .iter()
            .map(|staff| system_y + staff.y)
            .fold(f64::INFINITY, f64::min);
        let bottom = staves
            .iter()
            .map(|staff| system_y + staff.y_bottom())
            .fold(f64::NEG_INFINITY, f64::max);

        Rect::new(rect.x0, top, rect.x1, bottom)
    }
}
