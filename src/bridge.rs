//! CPU-side transfer of captured frames between graphics adapters.
//!
//! Shader views cannot span adapters, so when the output is attached to a
//! different adapter than the compositing device every frame is read back
//! on the capture adapter and re-uploaded on the compositing one.

use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Rect, Size};
use crate::gpu::{GraphicsDevice, PixelFormat};
use crate::source::{AdapterId, DuplicationSource};

/// Pixels in CPU memory, `row_pitch` bytes per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuSurface {
    pub size: Size,
    pub format: PixelFormat,
    pub row_pitch: usize,
    pub bytes: Vec<u8>,
}

fn tight_row_bytes(format: PixelFormat, width: u32) -> DuplicationResult<usize> {
    (width as usize)
        .checked_mul(format.bytes_per_pixel())
        .ok_or(DuplicationError::BufferOverflow)
}

impl CpuSurface {
    /// Zero-filled, tightly packed surface.
    pub fn new(size: Size, format: PixelFormat) -> DuplicationResult<Self> {
        let row_pitch = tight_row_bytes(format, size.width)?;
        let len = row_pitch
            .checked_mul(size.height as usize)
            .ok_or(DuplicationError::BufferOverflow)?;
        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(len).is_err() {
            log::warn!(
                "failed to allocate {len} bytes for a {}x{} cpu surface",
                size.width,
                size.height
            );
            return Err(DuplicationError::OutOfMemory);
        }
        bytes.resize(len, 0);
        Ok(Self {
            size,
            format,
            row_pitch,
            bytes,
        })
    }

    /// Wrap rows read back from a mapped texture, validating that every row
    /// fits inside `bytes`.
    pub fn from_rows(
        size: Size,
        format: PixelFormat,
        row_pitch: usize,
        bytes: Vec<u8>,
    ) -> DuplicationResult<Self> {
        let row_len = tight_row_bytes(format, size.width)?;
        if row_pitch < row_len {
            return Err(DuplicationError::BufferOverflow);
        }
        let required = row_pitch
            .checked_mul((size.height as usize).saturating_sub(1))
            .and_then(|base| base.checked_add(row_len))
            .ok_or(DuplicationError::BufferOverflow)?;
        if size.height > 0 && bytes.len() < required {
            return Err(DuplicationError::BufferOverflow);
        }
        Ok(Self {
            size,
            format,
            row_pitch,
            bytes,
        })
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }

    fn offset_of(&self, x: u32, y: u32) -> usize {
        y as usize * self.row_pitch + x as usize * self.format.bytes_per_pixel()
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let start = self.offset_of(x, y);
        &self.bytes[start..start + self.format.bytes_per_pixel()]
    }

    pub fn pixel_mut(&mut self, x: u32, y: u32) -> &mut [u8] {
        let start = self.offset_of(x, y);
        let bpp = self.format.bytes_per_pixel();
        &mut self.bytes[start..start + bpp]
    }

    pub fn fill_rect(&mut self, rect: &Rect, pixel: &[u8]) {
        let Some(rect) = rect.intersect(&self.bounds()) else {
            return;
        };
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                self.pixel_mut(x as u32, y as u32).copy_from_slice(pixel);
            }
        }
    }

    /// Copy `src_rect` of `src` so its top-left lands at (`dst_x`, `dst_y`).
    ///
    /// Both regions must lie fully inside their surfaces and the formats
    /// must match; otherwise nothing is written.
    pub fn copy_region_from(
        &mut self,
        dst_x: u32,
        dst_y: u32,
        src: &CpuSurface,
        src_rect: &Rect,
    ) -> DuplicationResult<()> {
        if src_rect.is_empty() {
            return Ok(());
        }
        if src.format != self.format {
            return Err(DuplicationError::InvalidConfig(format!(
                "cannot copy {:?} pixels into a {:?} surface",
                src.format, self.format
            )));
        }
        if src_rect.left < 0 || src_rect.top < 0 {
            return Err(DuplicationError::BufferOverflow);
        }

        let size = src_rect.size();
        let dst_right = dst_x
            .checked_add(size.width)
            .ok_or(DuplicationError::BufferOverflow)?;
        let dst_bottom = dst_y
            .checked_add(size.height)
            .ok_or(DuplicationError::BufferOverflow)?;
        if !src.bounds().contains_rect(src_rect)
            || dst_right > self.size.width
            || dst_bottom > self.size.height
        {
            return Err(DuplicationError::BufferOverflow);
        }

        let row_bytes = tight_row_bytes(self.format, size.width)?;
        for row in 0..size.height {
            let src_start = src.offset_of(src_rect.left as u32, src_rect.top as u32 + row);
            let dst_start = self.offset_of(dst_x, dst_y + row);
            self.bytes[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src.bytes[src_start..src_start + row_bytes]);
        }
        Ok(())
    }
}

/// Moves frames from the capture adapter onto the compositing device.
#[derive(Debug, Default)]
pub struct CrossAdapterBridge {
    transfers: u64,
}

impl CrossAdapterBridge {
    /// Decide once, at initialization, whether frames need bridging.
    pub fn activate(
        compositing: AdapterId,
        capture: AdapterId,
        force: bool,
    ) -> Option<CrossAdapterBridge> {
        if compositing == capture && !force {
            return None;
        }
        log::debug!(
            "cross-adapter bridge enabled (compositing adapter {:#x}, capture adapter {:#x}, forced: {force})",
            compositing.0,
            capture.0
        );
        Some(CrossAdapterBridge::default())
    }

    /// Read `texture` back through `source` and upload it to `device`.
    pub fn transfer<G, S>(
        &mut self,
        device: &G,
        source: &mut S,
        texture: &S::Texture,
    ) -> DuplicationResult<G::Texture>
    where
        G: GraphicsDevice,
        S: DuplicationSource,
    {
        let pixels = source.read_pixels(texture)?;
        let uploaded = device.create_texture_with_pixels(&pixels)?;
        self.transfers += 1;
        Ok(uploaded)
    }

    /// Frames bridged so far.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(size: Size) -> CpuSurface {
        let mut surface = CpuSurface::new(size, PixelFormat::Bgra8).unwrap();
        for y in 0..size.height {
            for x in 0..size.width {
                surface
                    .pixel_mut(x, y)
                    .copy_from_slice(&[x as u8, y as u8, 0, 255]);
            }
        }
        surface
    }

    #[test]
    fn copy_region_moves_rows_into_place() {
        let src = gradient(Size::new(8, 8));
        let mut dst = CpuSurface::new(Size::new(8, 8), PixelFormat::Bgra8).unwrap();
        dst.copy_region_from(4, 5, &src, &Rect::new(1, 2, 3, 4)).unwrap();

        assert_eq!(dst.pixel(4, 5), &[1, 2, 0, 255]);
        assert_eq!(dst.pixel(5, 6), &[2, 3, 0, 255]);
        assert_eq!(dst.pixel(3, 5), &[0, 0, 0, 0]);
        assert_eq!(dst.pixel(6, 5), &[0, 0, 0, 0]);
    }

    #[test]
    fn copy_region_rejects_out_of_bounds_boxes() {
        let src = gradient(Size::new(4, 4));
        let mut dst = CpuSurface::new(Size::new(4, 4), PixelFormat::Bgra8).unwrap();
        assert!(matches!(
            dst.copy_region_from(3, 0, &src, &Rect::new(0, 0, 2, 2)),
            Err(DuplicationError::BufferOverflow)
        ));
        assert!(matches!(
            dst.copy_region_from(0, 0, &src, &Rect::new(-1, 0, 2, 2)),
            Err(DuplicationError::BufferOverflow)
        ));
        assert_eq!(dst.bytes.iter().copied().max(), Some(0));
    }

    #[test]
    fn from_rows_accepts_padded_pitch() {
        let bytes = vec![0u8; 32 * 2 + 16];
        let surface =
            CpuSurface::from_rows(Size::new(4, 3), PixelFormat::Bgra8, 32, bytes).unwrap();
        assert_eq!(surface.pixel(3, 2).len(), 4);

        assert!(CpuSurface::from_rows(Size::new(4, 3), PixelFormat::Bgra8, 8, vec![0; 64]).is_err());
        assert!(CpuSurface::from_rows(Size::new(4, 3), PixelFormat::Bgra8, 32, vec![0; 64]).is_err());
    }

    #[test]
    fn bridge_activates_only_across_adapters_unless_forced() {
        let a = AdapterId(1);
        let b = AdapterId(2);
        assert!(CrossAdapterBridge::activate(a, a, false).is_none());
        assert!(CrossAdapterBridge::activate(a, b, false).is_some());
        assert!(CrossAdapterBridge::activate(a, a, true).is_some());
    }
}
