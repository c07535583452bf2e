//! Incremental replay of a frame's move and dirty regions onto the shared
//! composition surface.

pub mod dirty;
pub mod moves;

pub use dirty::{DirtyReplayer, VertexScratch};
pub use moves::MoveReplayer;

use crate::geometry::{Point, Rect, Rotation, Size};

/// Where on the shared surface an output's regions are replayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayTarget {
    pub rotation: Rotation,
    /// Logical size of the area the output occupies.
    pub logical: Size,
    /// Shared surface pixel of the area's top-left corner.
    pub origin: Point,
}

impl ReplayTarget {
    /// `destination` is the output's area on the shared surface, shifted by
    /// the caller's offset.
    pub fn new(rotation: Rotation, destination: Rect, offset_x: i32, offset_y: i32) -> Self {
        Self {
            rotation,
            logical: destination.size(),
            origin: Point::new(destination.left + offset_x, destination.top + offset_y),
        }
    }
}
