//! Per-frame change metadata: move and dirty records packed into one blob.
//!
//! The capture source fills the blob with move records first, then dirty
//! records directly after them. Records use the native `DXGI_OUTDUPL_MOVE_RECT`
//! and `RECT` layouts (native-endian `i32` fields).

use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Point, Rect};
use crate::source::DuplicationSource;

/// `source.x, source.y, dest.left, dest.top, dest.right, dest.bottom`
pub const MOVE_RECORD_BYTES: usize = 24;
/// `left, top, right, bottom`
pub const DIRTY_RECORD_BYTES: usize = 16;

/// A block of pixels that moved from `source` to `destination` since the
/// previous frame, in the output's logical coordinate space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveRegion {
    pub source: Point,
    pub destination: Rect,
}

/// A changed rectangle in the captured texture's native pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRegion {
    pub rect: Rect,
}

#[inline]
fn read_i32(bytes: &[u8], index: usize) -> i32 {
    let start = index * 4;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[start..start + 4]);
    i32::from_ne_bytes(raw)
}

#[inline]
fn write_i32(bytes: &mut [u8], index: usize, value: i32) {
    let start = index * 4;
    bytes[start..start + 4].copy_from_slice(&value.to_ne_bytes());
}

impl MoveRegion {
    pub fn from_record(record: &[u8]) -> Self {
        debug_assert!(record.len() >= MOVE_RECORD_BYTES);
        Self {
            source: Point::new(read_i32(record, 0), read_i32(record, 1)),
            destination: Rect::new(
                read_i32(record, 2),
                read_i32(record, 3),
                read_i32(record, 4),
                read_i32(record, 5),
            ),
        }
    }

    pub fn write_record(&self, out: &mut [u8]) {
        write_i32(out, 0, self.source.x);
        write_i32(out, 1, self.source.y);
        write_i32(out, 2, self.destination.left);
        write_i32(out, 3, self.destination.top);
        write_i32(out, 4, self.destination.right);
        write_i32(out, 5, self.destination.bottom);
    }
}

impl DirtyRegion {
    pub fn from_record(record: &[u8]) -> Self {
        debug_assert!(record.len() >= DIRTY_RECORD_BYTES);
        Self {
            rect: Rect::new(
                read_i32(record, 0),
                read_i32(record, 1),
                read_i32(record, 2),
                read_i32(record, 3),
            ),
        }
    }

    pub fn write_record(&self, out: &mut [u8]) {
        write_i32(out, 0, self.rect.left);
        write_i32(out, 1, self.rect.top);
        write_i32(out, 2, self.rect.right);
        write_i32(out, 3, self.rect.bottom);
    }
}

/// Where the move and dirty records of the current frame live inside the
/// [`MetadataBuffer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetadataLayout {
    pub move_count: usize,
    pub dirty_count: usize,
}

impl MetadataLayout {
    pub const EMPTY: MetadataLayout = MetadataLayout {
        move_count: 0,
        dirty_count: 0,
    };

    #[inline]
    pub const fn move_bytes(&self) -> usize {
        self.move_count * MOVE_RECORD_BYTES
    }

    #[inline]
    pub const fn dirty_bytes(&self) -> usize {
        self.dirty_count * DIRTY_RECORD_BYTES
    }

    pub const fn is_empty(&self) -> bool {
        self.move_count == 0 && self.dirty_count == 0
    }
}

/// Growable backing store for the metadata blob.
///
/// Backed by `u32` words so the storage is 4-byte aligned and the capture
/// source can write native records straight into it. Capacity never
/// shrinks over the buffer's lifetime.
#[derive(Debug, Default)]
pub struct MetadataBuffer {
    words: Vec<u32>,
}

impl MetadataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.words.len() * 4
    }

    /// Make room for at least `bytes` bytes. Returns `Ok(true)` when the
    /// buffer had to grow; existing contents are preserved.
    pub fn ensure_capacity(&mut self, bytes: usize) -> DuplicationResult<bool> {
        if bytes <= self.capacity_bytes() {
            return Ok(false);
        }

        let words = bytes.div_ceil(4);
        let additional = words - self.words.len();
        if let Err(error) = self.words.try_reserve_exact(additional) {
            log::warn!("failed to grow metadata buffer to {bytes} bytes: {error}");
            return Err(DuplicationError::OutOfMemory);
        }
        self.words.resize(words, 0);
        Ok(true)
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: u32 storage reinterpreted as bytes; u8 has no alignment
        // or validity requirements.
        unsafe {
            std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.capacity_bytes())
        }
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        let len = self.capacity_bytes();
        // SAFETY: see `as_bytes`; the borrow is unique through `&mut self`.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), len) }
    }

    pub fn moves(&self, layout: MetadataLayout) -> impl ExactSizeIterator<Item = MoveRegion> + '_ {
        self.as_bytes()[..layout.move_bytes()]
            .chunks_exact(MOVE_RECORD_BYTES)
            .map(MoveRegion::from_record)
    }

    pub fn dirties(
        &self,
        layout: MetadataLayout,
    ) -> impl ExactSizeIterator<Item = DirtyRegion> + '_ {
        let start = layout.move_bytes();
        self.as_bytes()[start..start + layout.dirty_bytes()]
            .chunks_exact(DIRTY_RECORD_BYTES)
            .map(DirtyRegion::from_record)
    }
}

/// Pull the move and dirty records for the currently acquired frame out of
/// `source` into `buffer`.
///
/// `total_bytes` is the frame's declared metadata size. A zero size short
/// circuits without touching the buffer. Any failure leaves the caller
/// with [`MetadataLayout::EMPTY`].
pub(crate) fn read_frame_metadata<S: DuplicationSource>(
    source: &mut S,
    total_bytes: usize,
    buffer: &mut MetadataBuffer,
) -> DuplicationResult<MetadataLayout> {
    if total_bytes == 0 {
        return Ok(MetadataLayout::EMPTY);
    }

    buffer.ensure_capacity(total_bytes)?;
    let bytes = &mut buffer.as_mut_bytes()[..total_bytes];

    let move_written = source.frame_move_rects(bytes)?.min(total_bytes);
    let move_count = move_written / MOVE_RECORD_BYTES;
    let move_bytes = move_count * MOVE_RECORD_BYTES;

    let dirty_slot = &mut bytes[move_bytes..];
    let dirty_written = source.frame_dirty_rects(dirty_slot)?.min(dirty_slot.len());
    let dirty_count = dirty_written / DIRTY_RECORD_BYTES;

    log::trace!("frame metadata: {move_count} move(s), {dirty_count} dirty rect(s)");
    Ok(MetadataLayout {
        move_count,
        dirty_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_only_grows_and_keeps_contents() {
        let mut buffer = MetadataBuffer::new();
        assert_eq!(buffer.capacity_bytes(), 0);

        assert!(buffer.ensure_capacity(40).unwrap());
        assert_eq!(buffer.capacity_bytes(), 40);
        buffer.as_mut_bytes()[..4].copy_from_slice(&7i32.to_ne_bytes());

        assert!(!buffer.ensure_capacity(16).unwrap());
        assert!(!buffer.ensure_capacity(40).unwrap());
        assert_eq!(buffer.capacity_bytes(), 40);

        assert!(buffer.ensure_capacity(41).unwrap());
        assert_eq!(buffer.capacity_bytes(), 44);
        assert_eq!(read_i32(buffer.as_bytes(), 0), 7);
    }

    #[test]
    fn impossible_growth_reports_out_of_memory_and_keeps_capacity() {
        let mut buffer = MetadataBuffer::new();
        buffer.ensure_capacity(64).unwrap();
        assert!(matches!(
            buffer.ensure_capacity(usize::MAX),
            Err(DuplicationError::OutOfMemory)
        ));
        assert_eq!(buffer.capacity_bytes(), 64);
    }

    #[test]
    fn moves_precede_dirties_in_the_blob() {
        let mut buffer = MetadataBuffer::new();
        buffer.ensure_capacity(MOVE_RECORD_BYTES + 2 * DIRTY_RECORD_BYTES).unwrap();
        let moved = MoveRegion {
            source: Point::new(3, 4),
            destination: Rect::new(10, 20, 30, 40),
        };
        let first = DirtyRegion {
            rect: Rect::new(0, 0, 8, 8),
        };
        let second = DirtyRegion {
            rect: Rect::new(100, 50, 120, 90),
        };
        let bytes = buffer.as_mut_bytes();
        moved.write_record(&mut bytes[..MOVE_RECORD_BYTES]);
        first.write_record(&mut bytes[MOVE_RECORD_BYTES..]);
        second.write_record(&mut bytes[MOVE_RECORD_BYTES + DIRTY_RECORD_BYTES..]);

        let layout = MetadataLayout {
            move_count: 1,
            dirty_count: 2,
        };
        assert_eq!(buffer.moves(layout).collect::<Vec<_>>(), vec![moved]);
        assert_eq!(buffer.dirties(layout).collect::<Vec<_>>(), vec![first, second]);
    }
}
