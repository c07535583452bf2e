//! The duplication source the manager pulls frames from.

use crate::bridge::CpuSurface;
use crate::error::DuplicationResult;
use crate::geometry::{Rect, Rotation, Size};

/// Locally unique identifier of a graphics adapter (an adapter LUID).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AdapterId(pub u64);

impl AdapterId {
    pub const fn from_luid_parts(high: i32, low: u32) -> Self {
        Self(((high as u32 as u64) << 32) | low as u64)
    }
}

/// Description of the display output being duplicated. Captured once at
/// initialization and never refreshed; a mode change surfaces as
/// `AccessLost` instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// GDI device name, e.g. `\\.\DISPLAY1`.
    pub device_name: String,
    /// Output bounds in virtual desktop coordinates (logical orientation).
    pub bounds: Rect,
    pub rotation: Rotation,
    /// Adapter the output is physically attached to.
    pub adapter: AdapterId,
}

impl OutputDescriptor {
    pub fn logical_size(&self) -> Size {
        self.bounds.size()
    }
}

/// Timing and bookkeeping the source reports with each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// QPC time of the last desktop present; zero when only the pointer
    /// changed.
    pub last_present_time: i64,
    pub last_mouse_update_time: i64,
    /// Number of presents folded into this frame.
    pub accumulated_frames: u32,
    pub rects_coalesced: bool,
    pub protected_content_masked_out: bool,
    /// Size in bytes of the move + dirty metadata blob for this frame.
    pub total_metadata_bytes: u32,
}

/// External capture source (a desktop duplication interface).
///
/// Only one frame can be acquired at a time; callers must
/// [`release_frame`](Self::release_frame) before acquiring again.
pub trait DuplicationSource {
    type Texture: Clone;

    fn output(&self) -> &OutputDescriptor;

    /// Wait up to `timeout_ms` for a new frame. Returns
    /// `Err(DuplicationError::Timeout)` when nothing new was presented.
    fn acquire_next_frame(
        &mut self,
        timeout_ms: u32,
    ) -> DuplicationResult<(Self::Texture, FrameInfo)>;

    fn release_frame(&mut self) -> DuplicationResult<()>;

    /// Write the acquired frame's move records into `buffer`, returning the
    /// number of bytes written.
    fn frame_move_rects(&mut self, buffer: &mut [u8]) -> DuplicationResult<usize>;

    /// Write the acquired frame's dirty records into `buffer`, returning the
    /// number of bytes written.
    fn frame_dirty_rects(&mut self, buffer: &mut [u8]) -> DuplicationResult<usize>;

    /// Read a frame texture back into CPU memory on the source's own
    /// adapter. Used when the compositing device lives on another adapter.
    fn read_pixels(&mut self, texture: &Self::Texture) -> DuplicationResult<CpuSurface>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_id_packs_luid_halves() {
        assert_eq!(AdapterId::from_luid_parts(1, 2).0, (1u64 << 32) | 2);
        assert_eq!(AdapterId::from_luid_parts(-1, 0).0, 0xffff_ffff_0000_0000);
    }
}
