use crate::error::DuplicationResult;
use crate::geometry::{Rect, Size};
use crate::gpu::{GraphicsDevice, SurfaceDesc, SurfaceUsage};
use crate::metadata::MoveRegion;
use crate::rotation::{MappedMove, map_move_region};

use super::ReplayTarget;

/// Replays moved regions through a persistent staging surface.
///
/// Every source rect is copied out of the shared surface before any
/// destination is written, so overlapping moves all read pre-move pixels
/// and the order of the moves does not matter.
pub struct MoveReplayer<T> {
    staging: Option<T>,
    staging_size: Size,
    mapped: Vec<MappedMove>,
}

impl<T> Default for MoveReplayer<T> {
    fn default() -> Self {
        Self {
            staging: None,
            staging_size: Size::default(),
            mapped: Vec::new(),
        }
    }
}

fn to_u32(value: i32) -> Option<u32> {
    u32::try_from(value).ok()
}

impl<T: Clone + PartialEq> MoveReplayer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_staging(&self) -> bool {
        self.staging.is_some()
    }

    fn ensure_staging<G>(
        &mut self,
        device: &G,
        shared: &T,
        target: &ReplayTarget,
    ) -> DuplicationResult<T>
    where
        G: GraphicsDevice<Texture = T>,
    {
        if let Some(staging) = &self.staging {
            return Ok(staging.clone());
        }

        let size = target.rotation.native_size(target.logical);
        let desc = SurfaceDesc::new(size, device.describe(shared).format);
        let staging = device.create_texture(&desc, SurfaceUsage::RenderTarget)?;
        log::debug!(
            "created {}x{} move staging surface",
            size.width,
            size.height
        );
        self.staging = Some(staging.clone());
        self.staging_size = size;
        Ok(staging)
    }

    /// Replay `moves` onto `shared`. A move whose rects fall outside the
    /// staging surface or the shared surface is skipped.
    pub fn replay<G, I>(
        &mut self,
        device: &G,
        shared: &T,
        moves: I,
        target: &ReplayTarget,
    ) -> DuplicationResult<usize>
    where
        G: GraphicsDevice<Texture = T>,
        I: IntoIterator<Item = MoveRegion>,
    {
        self.mapped.clear();
        for region in moves {
            self.mapped
                .push(map_move_region(target.rotation, &region, target.logical)?);
        }
        if self.mapped.is_empty() {
            return Ok(0);
        }

        let staging = self.ensure_staging(device, shared, target)?;
        let staging_bounds = Rect::from_size(self.staging_size);
        let shared_bounds = device.describe(shared).bounds();
        let origin = target.origin;

        self.mapped.retain(|mapped| {
            let source_on_shared = mapped.source.offset(origin.x, origin.y);
            let destination_on_shared = mapped.destination.offset(origin.x, origin.y);
            let fits = staging_bounds.contains_rect(&mapped.source)
                && shared_bounds.contains_rect(&source_on_shared)
                && shared_bounds.contains_rect(&destination_on_shared);
            if !fits {
                log::warn!("skipping move {mapped:?} outside the composition surface");
            }
            fits
        });

        for mapped in &self.mapped {
            let source_on_shared = mapped.source.offset(origin.x, origin.y);
            let (Some(x), Some(y)) = (to_u32(mapped.source.left), to_u32(mapped.source.top))
            else {
                continue;
            };
            device.copy_region(&staging, x, y, shared, &source_on_shared);
        }

        for mapped in &self.mapped {
            let (Some(x), Some(y)) = (
                to_u32(mapped.destination.left + origin.x),
                to_u32(mapped.destination.top + origin.y),
            ) else {
                continue;
            };
            device.copy_region(shared, x, y, &staging, &mapped.source);
        }

        Ok(self.mapped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DuplicationError;
    use crate::geometry::{Point, Rotation};
    use crate::gpu::PixelFormat;
    use crate::software::{SoftwareDevice, SoftwareTexture};

    fn patterned_surface(size: Size) -> SoftwareTexture {
        SoftwareTexture::from_fn(size, |x, y| [x as u8, y as u8, (x ^ y) as u8, 255]).unwrap()
    }

    fn replay_all(order: &[MoveRegion]) -> Vec<u8> {
        let device = SoftwareDevice::new();
        let shared = patterned_surface(Size::new(64, 64));
        let target = ReplayTarget::new(Rotation::Identity, Rect::new(0, 0, 64, 64), 0, 0);
        let mut replayer = MoveReplayer::new();
        replayer
            .replay(&device, &shared, order.iter().copied(), &target)
            .unwrap();
        shared.snapshot().bytes
    }

    #[test]
    fn overlapping_moves_are_order_independent() {
        // b reads from where a writes; destinations are disjoint.
        let a = MoveRegion {
            source: Point::new(0, 0),
            destination: Rect::new(8, 0, 24, 16),
        };
        let b = MoveRegion {
            source: Point::new(10, 4),
            destination: Rect::new(0, 20, 16, 36),
        };
        assert_eq!(replay_all(&[a, b]), replay_all(&[b, a]));
    }

    #[test]
    fn move_reads_pre_move_pixels_when_rects_overlap() {
        let device = SoftwareDevice::new();
        let shared = patterned_surface(Size::new(32, 32));
        let target = ReplayTarget::new(Rotation::Identity, Rect::new(0, 0, 32, 32), 0, 0);
        let region = MoveRegion {
            source: Point::new(0, 0),
            destination: Rect::new(4, 0, 20, 8),
        };
        MoveReplayer::new()
            .replay(&device, &shared, [region], &target)
            .unwrap();

        let surface = shared.snapshot();
        assert_eq!(surface.pixel(4, 0), &[0, 0, 0, 255]);
        assert_eq!(surface.pixel(19, 7), &[15, 7, 15 ^ 7, 255]);
        assert_eq!(surface.pixel(20, 0), &[20, 0, 20, 255]);
    }

    #[test]
    fn staging_surface_is_created_once_in_native_orientation() {
        let device = SoftwareDevice::new();
        let shared = SoftwareTexture::new(Size::new(100, 100), PixelFormat::Bgra8).unwrap();
        let target = ReplayTarget::new(Rotation::Rotate90, Rect::new(0, 0, 40, 60), 0, 0);
        let region = MoveRegion {
            source: Point::new(0, 0),
            destination: Rect::new(0, 10, 10, 20),
        };
        let mut replayer = MoveReplayer::new();
        for _ in 0..3 {
            replayer.replay(&device, &shared, [region], &target).unwrap();
        }
        assert_eq!(device.counters().textures, 1);
        assert_eq!(replayer.staging_size, Size::new(60, 40));
    }

    #[test]
    fn no_moves_creates_nothing() {
        let device = SoftwareDevice::new();
        let shared = SoftwareTexture::new(Size::new(16, 16), PixelFormat::Bgra8).unwrap();
        let target = ReplayTarget::new(Rotation::Identity, Rect::new(0, 0, 16, 16), 0, 0);
        let mut replayer = MoveReplayer::new();
        let replayed = replayer
            .replay(&device, &shared, Vec::<MoveRegion>::new(), &target)
            .unwrap();
        assert_eq!(replayed, 0);
        assert!(!replayer.has_staging());
        assert_eq!(device.counters().textures, 0);
    }

    #[test]
    fn unsupported_rotation_fails_the_pass() {
        let device = SoftwareDevice::new();
        let shared = SoftwareTexture::new(Size::new(16, 16), PixelFormat::Bgra8).unwrap();
        let target = ReplayTarget::new(Rotation::Unsupported(9), Rect::new(0, 0, 16, 16), 0, 0);
        let region = MoveRegion {
            source: Point::new(0, 0),
            destination: Rect::new(1, 1, 2, 2),
        };
        assert!(matches!(
            MoveReplayer::new().replay(&device, &shared, [region], &target),
            Err(DuplicationError::UnsupportedRotation(9))
        ));
    }
}
