//! Rectangle arithmetic and output rotation states.
//!
//! All rectangles use the desktop convention: `left`/`top` inclusive,
//! `right`/`bottom` exclusive, signed 32-bit coordinates.

use crate::error::{DuplicationError, DuplicationResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn transposed(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const ZERO: Rect = Rect::new(0, 0, 0, 0);

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width as i32, size.height as i32)
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Width/height as unsigned extents; empty or inverted rects yield zero.
    pub fn size(&self) -> Size {
        Size::new(self.width().max(0) as u32, self.height().max(0) as u32)
    }

    pub const fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let rect = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!rect.is_empty()).then_some(rect)
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

/// Clamp `rect` to `[0, width) x [0, height)`, dropping it when nothing of
/// it remains visible.
#[inline]
pub fn clamp_rect(rect: Rect, width: u32, height: u32) -> Option<Rect> {
    let bounds = Rect::from_size(Size::new(width, height));
    rect.intersect(&bounds)
}

/// Round to an even value, moving odd values down by one.
///
/// Encoder surfaces and GPU copy boxes are kept on even extents; rounding
/// down keeps a box inside the texture it was measured from.
#[inline]
pub const fn make_even(value: i32) -> i32 {
    value - value.rem_euclid(2)
}

/// Output rotation as reported by the display stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    Unspecified,
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    /// A raw value outside the known rotation set.
    Unsupported(u32),
}

impl Rotation {
    /// Decode a `DXGI_MODE_ROTATION` value.
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Unspecified,
            1 => Self::Identity,
            2 => Self::Rotate90,
            3 => Self::Rotate180,
            4 => Self::Rotate270,
            other => Self::Unsupported(other),
        }
    }

    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Unspecified => 0,
            Self::Identity => 1,
            Self::Rotate90 => 2,
            Self::Rotate180 => 3,
            Self::Rotate270 => 4,
            Self::Unsupported(raw) => raw,
        }
    }

    /// Identity and unspecified both leave pixels where they are.
    pub const fn is_identity(self) -> bool {
        matches!(self, Self::Identity | Self::Unspecified)
    }

    /// Whether native pixel rows run along the logical vertical axis.
    pub const fn swaps_axes(self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }

    pub fn ensure_supported(self) -> DuplicationResult<Self> {
        match self {
            Self::Unsupported(raw) => Err(DuplicationError::UnsupportedRotation(raw)),
            known => Ok(known),
        }
    }

    /// Size of the captured texture for an output whose logical (as seen on
    /// the desktop) size is `logical`.
    pub const fn native_size(self, logical: Size) -> Size {
        if self.swaps_axes() {
            logical.transposed()
        } else {
            logical
        }
    }
}
