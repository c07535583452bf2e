//! A synchronous acquire, process and release loop against one fixed
//! composition target.

use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::Rect;
use crate::gpu::GraphicsDevice;
use crate::manager::{DuplicationManager, FrameUpdate};
use crate::source::{DuplicationSource, FrameInfo};

/// Where pumped frames are composited.
#[derive(Clone, Debug)]
pub struct CompositionTarget<T> {
    pub surface: T,
    pub offset_x: i32,
    pub offset_y: i32,
    pub destination: Rect,
    pub source: Option<Rect>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PumpOutcome {
    /// The timeout elapsed without a new frame.
    NoNewFrame,
    Processed { info: FrameInfo, update: FrameUpdate },
}

/// Counters accumulated over the pump's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub frames_processed: u64,
    /// Frames whose metadata was empty (pointer-only updates).
    pub frames_unchanged: u64,
    pub timeouts: u64,
}

pub struct FramePump<'a, G, S>
where
    G: GraphicsDevice,
    S: DuplicationSource<Texture = G::Texture>,
{
    manager: &'a mut DuplicationManager<G, S>,
    target: CompositionTarget<G::Texture>,
    stats: PumpStats,
}

impl<'a, G, S> FramePump<'a, G, S>
where
    G: GraphicsDevice,
    S: DuplicationSource<Texture = G::Texture>,
{
    pub fn new(
        manager: &'a mut DuplicationManager<G, S>,
        target: CompositionTarget<G::Texture>,
    ) -> Self {
        Self {
            manager,
            target,
            stats: PumpStats::default(),
        }
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    pub fn target(&self) -> &CompositionTarget<G::Texture> {
        &self.target
    }

    /// Run one cycle. The acquired frame is released even when processing
    /// fails; a processing error takes precedence over a release error.
    pub fn pump(&mut self, timeout_ms: u32) -> DuplicationResult<PumpOutcome> {
        let frame = match self.manager.get_frame(timeout_ms) {
            Ok(frame) => frame,
            Err(DuplicationError::Timeout) => {
                self.stats.timeouts += 1;
                return Ok(PumpOutcome::NoNewFrame);
            }
            Err(error) => return Err(error),
        };

        let target = &self.target;
        let processed = self.manager.process_frame(
            &frame,
            &target.surface,
            target.offset_x,
            target.offset_y,
            target.destination,
            target.source,
        );
        let released = self.manager.release_frame();
        let update = processed?;
        released?;

        self.stats.frames_processed += 1;
        if update == FrameUpdate::Unchanged {
            self.stats.frames_unchanged += 1;
        }
        Ok(PumpOutcome::Processed {
            info: frame.info,
            update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rotation, Size};
    use crate::gpu::{PixelFormat, ShaderSet};
    use crate::manager::ManagerConfig;
    use crate::software::{ScriptedFrame, ScriptedSource, SoftwareDevice, SoftwareTexture};
    use crate::source::{AdapterId, OutputDescriptor};

    fn source(size: Size) -> ScriptedSource {
        ScriptedSource::new(OutputDescriptor {
            device_name: r"\\.\DISPLAY2".to_string(),
            bounds: Rect::from_size(size),
            rotation: Rotation::Identity,
            adapter: AdapterId::default(),
        })
    }

    #[test]
    fn pump_maps_timeouts_and_releases_every_frame() {
        let size = Size::new(8, 8);
        let mut source = source(size);
        let frame = SoftwareTexture::from_fn(size, |_, _| [1, 2, 3, 255]).unwrap();
        source.push_frame(ScriptedFrame::new(frame.clone()).with_dirty(Rect::new(0, 0, 8, 8)));
        source.push_frame(ScriptedFrame::new(frame));

        let mut manager = DuplicationManager::new(
            SoftwareDevice::new(),
            ShaderSet::default(),
            source,
            ManagerConfig::default(),
        );
        let shared = SoftwareTexture::new(size, PixelFormat::Bgra8).unwrap();
        let mut pump = FramePump::new(
            &mut manager,
            CompositionTarget {
                surface: shared.clone(),
                offset_x: 0,
                offset_y: 0,
                destination: Rect::from_size(size),
                source: None,
            },
        );

        let first = pump.pump(10).unwrap();
        assert!(matches!(
            first,
            PumpOutcome::Processed {
                update: FrameUpdate::Delta {
                    moves: 0,
                    dirty_quads: 1
                },
                ..
            }
        ));
        assert!(matches!(
            pump.pump(10).unwrap(),
            PumpOutcome::Processed {
                update: FrameUpdate::Unchanged,
                ..
            }
        ));
        assert_eq!(pump.pump(10).unwrap(), PumpOutcome::NoNewFrame);
        assert_eq!(
            pump.stats(),
            PumpStats {
                frames_processed: 2,
                frames_unchanged: 1,
                timeouts: 1,
            }
        );

        assert!(!manager.holds_frame());
        assert_eq!(manager.source().releases(), 2);
        assert_eq!(shared.snapshot().pixel(5, 5), &[1, 2, 3, 255]);
    }
}
