//! Frame acquisition and dispatch for one duplicated output.
//!
//! [`DuplicationManager`] pulls frames from a [`DuplicationSource`], parses
//! their change metadata and composites them onto a caller-owned shared
//! surface, either incrementally (moves, then dirty rects) or through the
//! letterbox path when a differing source crop is requested.

use std::time::Instant;

use crate::bridge::CrossAdapterBridge;
use crate::env_config::define_env_flag;
use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Point, Rect};
use crate::gpu::{GraphicsDevice, LazyPipeline, ShaderSet};
use crate::letterbox::{LetterboxPlan, LetterboxRequest, LetterboxTransformer};
use crate::metadata::{
    DirtyRegion, MetadataBuffer, MetadataLayout, MoveRegion, read_frame_metadata,
};
use crate::replay::{DirtyReplayer, MoveReplayer, ReplayTarget};
use crate::source::{DuplicationSource, FrameInfo, OutputDescriptor};

define_env_flag!(enabled_when(
    force_cpu_bridge_from_env,
    "SNOW_DUPLICATION_FORCE_CPU_BRIDGE"
));
define_env_flag!(enabled_unless(
    vertex_reuse_from_env,
    "SNOW_DUPLICATION_DISABLE_VERTEX_REUSE"
));

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Bridge every frame through CPU memory even when the output and the
    /// compositing device share an adapter.
    pub force_cpu_bridge: bool,
    /// Reuse the dirty-pass vertex buffer when the vertex count repeats.
    pub reuse_vertex_buffer: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            force_cpu_bridge: false,
            reuse_vertex_buffer: true,
        }
    }
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        Self {
            force_cpu_bridge: force_cpu_bridge_from_env(),
            reuse_vertex_buffer: vertex_reuse_from_env(),
        }
    }
}

/// An acquired frame. Valid until the next [`DuplicationManager::release_frame`]
/// or [`DuplicationManager::get_frame`].
#[derive(Clone, Debug)]
pub struct FrameData<T> {
    pub texture: T,
    pub info: FrameInfo,
    pub layout: MetadataLayout,
    sequence: u64,
}

impl<T> FrameData<T> {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn move_count(&self) -> usize {
        self.layout.move_count
    }

    pub fn dirty_count(&self) -> usize {
        self.layout.dirty_count
    }
}

/// How a frame is composited; chosen once per `process_frame` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Replay move and dirty regions in place.
    Delta,
    /// Rotate, crop `source`, fit and center the whole frame.
    Letterbox { source: Rect },
}

impl ProcessingMode {
    pub fn select(source: Option<Rect>, destination: &Rect) -> Self {
        match source {
            Some(source) if source != *destination => Self::Letterbox { source },
            _ => Self::Delta,
        }
    }
}

/// What `process_frame` did to the shared surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameUpdate {
    /// The frame carried no change metadata.
    Unchanged,
    Delta { moves: usize, dirty_quads: usize },
    Letterbox(LetterboxPlan),
}

pub struct DuplicationManager<G, S>
where
    G: GraphicsDevice,
    S: DuplicationSource<Texture = G::Texture>,
{
    device: G,
    source: S,
    output: OutputDescriptor,
    config: ManagerConfig,
    pipeline: LazyPipeline<G>,
    metadata: MetadataBuffer,
    moves: MoveReplayer<G::Texture>,
    dirty: DirtyReplayer<G>,
    letterbox: LetterboxTransformer<G>,
    bridge: Option<CrossAdapterBridge>,
    held: Option<u64>,
    next_sequence: u64,
}

impl<G, S> DuplicationManager<G, S>
where
    G: GraphicsDevice,
    S: DuplicationSource<Texture = G::Texture>,
{
    /// Wrap an initialized duplication `source`. The output descriptor is
    /// captured here and never refreshed.
    pub fn new(device: G, shaders: ShaderSet, source: S, config: ManagerConfig) -> Self {
        let output = source.output().clone();
        let bridge =
            CrossAdapterBridge::activate(device.adapter(), output.adapter, config.force_cpu_bridge);
        log::debug!(
            "duplicating {} ({:?}, rotation {:?})",
            output.device_name,
            output.bounds,
            output.rotation
        );
        Self {
            device,
            source,
            output,
            config,
            pipeline: LazyPipeline::new(shaders),
            metadata: MetadataBuffer::new(),
            moves: MoveReplayer::new(),
            dirty: DirtyReplayer::new(config.reuse_vertex_buffer),
            letterbox: LetterboxTransformer::new(),
            bridge,
            held: None,
            next_sequence: 0,
        }
    }

    pub fn output_descriptor(&self) -> &OutputDescriptor {
        &self.output
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    pub fn device(&self) -> &G {
        &self.device
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_cross_adapter(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn holds_frame(&self) -> bool {
        self.held.is_some()
    }

    pub fn metadata_capacity(&self) -> usize {
        self.metadata.capacity_bytes()
    }

    /// Wait up to `timeout_ms` for the next frame and read its metadata.
    ///
    /// A frame still held from an earlier call is released first. When the
    /// metadata cannot be read the frame stays held and the error is
    /// returned.
    pub fn get_frame(&mut self, timeout_ms: u32) -> DuplicationResult<FrameData<G::Texture>> {
        if let Some(sequence) = self.held.take() {
            log::warn!("frame {sequence} was not released before the next acquire, releasing it");
            if let Err(error) = self.source.release_frame() {
                log::warn!("forced release of frame {sequence} failed: {error}");
            }
        }

        let (texture, info) = self.source.acquire_next_frame(timeout_ms)?;
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        self.held = Some(sequence);

        let layout = read_frame_metadata(
            &mut self.source,
            info.total_metadata_bytes as usize,
            &mut self.metadata,
        )?;

        Ok(FrameData {
            texture,
            info,
            layout,
            sequence,
        })
    }

    /// Release the held frame back to the source. Does nothing when no
    /// frame is held.
    pub fn release_frame(&mut self) -> DuplicationResult<()> {
        if self.held.take().is_none() {
            return Ok(());
        }
        self.source.release_frame()
    }

    fn ensure_current(&self, frame: &FrameData<G::Texture>) -> DuplicationResult<()> {
        if self.held == Some(frame.sequence) {
            Ok(())
        } else {
            Err(DuplicationError::StaleFrame)
        }
    }

    pub fn frame_moves(
        &self,
        frame: &FrameData<G::Texture>,
    ) -> DuplicationResult<impl ExactSizeIterator<Item = MoveRegion> + '_> {
        self.ensure_current(frame)?;
        Ok(self.metadata.moves(frame.layout))
    }

    pub fn frame_dirties(
        &self,
        frame: &FrameData<G::Texture>,
    ) -> DuplicationResult<impl ExactSizeIterator<Item = DirtyRegion> + '_> {
        self.ensure_current(frame)?;
        Ok(self.metadata.dirties(frame.layout))
    }

    /// The frame texture as seen by the compositing device.
    fn compositing_texture(&mut self, texture: &G::Texture) -> DuplicationResult<G::Texture> {
        match &mut self.bridge {
            Some(bridge) => bridge.transfer(&self.device, &mut self.source, texture),
            None => Ok(texture.clone()),
        }
    }

    /// Composite `frame` onto `shared`.
    ///
    /// `destination` is the output's area on `shared` before the
    /// (`offset_x`, `offset_y`) shift. A `source` crop that differs from
    /// `destination` selects the letterbox path.
    pub fn process_frame(
        &mut self,
        frame: &FrameData<G::Texture>,
        shared: &G::Texture,
        offset_x: i32,
        offset_y: i32,
        destination: Rect,
        source: Option<Rect>,
    ) -> DuplicationResult<FrameUpdate> {
        self.ensure_current(frame)?;
        if frame.info.total_metadata_bytes == 0 {
            return Ok(FrameUpdate::Unchanged);
        }

        let started = Instant::now();
        let rotation = self.output.rotation;
        let update = match ProcessingMode::select(source, &destination) {
            ProcessingMode::Delta => {
                let target = ReplayTarget::new(rotation, destination, offset_x, offset_y);
                let layout = frame.layout;

                let mut moves = 0;
                if layout.move_count > 0 {
                    moves = self.moves.replay(
                        &self.device,
                        shared,
                        self.metadata.moves(layout),
                        &target,
                    )?;
                }

                let mut dirty_quads = 0;
                if layout.dirty_count > 0 {
                    let texture = self.compositing_texture(&frame.texture)?;
                    dirty_quads = self.dirty.replay(
                        &self.device,
                        &mut self.pipeline,
                        shared,
                        &texture,
                        self.metadata.dirties(layout),
                        &target,
                    )?;
                }
                FrameUpdate::Delta { moves, dirty_quads }
            }
            ProcessingMode::Letterbox { source } => {
                let texture = self.compositing_texture(&frame.texture)?;
                let request = LetterboxRequest {
                    source,
                    destination,
                    offset: Point::new(offset_x, offset_y),
                };
                let plan = self.letterbox.apply(
                    &self.device,
                    &mut self.pipeline,
                    &texture,
                    rotation,
                    shared,
                    &request,
                )?;
                FrameUpdate::Letterbox(plan)
            }
        };

        log::trace!(
            "processed frame {} ({} moves, {} dirty) in {:?}",
            frame.sequence,
            frame.layout.move_count,
            frame.layout.dirty_count,
            started.elapsed()
        );
        Ok(update)
    }
}

impl<G, S> Drop for DuplicationManager<G, S>
where
    G: GraphicsDevice,
    S: DuplicationSource<Texture = G::Texture>,
{
    fn drop(&mut self) {
        if let Err(error) = self.release_frame() {
            log::warn!("failed to release held frame on teardown: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rotation, Size};
    use crate::gpu::PixelFormat;
    use crate::software::{ScriptedFrame, ScriptedSource, SoftwareDevice, SoftwareTexture};
    use crate::source::AdapterId;

    const BLUE: [u8; 4] = [255, 0, 0, 255];

    fn output(size: Size, rotation: Rotation) -> OutputDescriptor {
        OutputDescriptor {
            device_name: r"\\.\DISPLAY1".to_string(),
            bounds: Rect::from_size(size),
            rotation,
            adapter: AdapterId(1),
        }
    }

    fn manager(
        source: ScriptedSource,
        config: ManagerConfig,
    ) -> DuplicationManager<SoftwareDevice, ScriptedSource> {
        DuplicationManager::new(
            SoftwareDevice::with_adapter(AdapterId(1)),
            ShaderSet::default(),
            source,
            config,
        )
    }

    fn blue_frame(size: Size) -> SoftwareTexture {
        SoftwareTexture::from_fn(size, |_, _| BLUE).unwrap()
    }

    #[test]
    fn config_defaults_reuse_vertex_buffers() {
        let config = ManagerConfig::default();
        assert!(!config.force_cpu_bridge);
        assert!(config.reuse_vertex_buffer);
    }

    #[test]
    fn processing_mode_is_letterbox_only_for_a_differing_crop() {
        let dest = Rect::new(0, 0, 800, 600);
        assert_eq!(ProcessingMode::select(None, &dest), ProcessingMode::Delta);
        assert_eq!(ProcessingMode::select(Some(dest), &dest), ProcessingMode::Delta);
        let crop = Rect::new(0, 0, 1920, 1080);
        assert_eq!(
            ProcessingMode::select(Some(crop), &dest),
            ProcessingMode::Letterbox { source: crop }
        );
    }

    #[test]
    fn zero_metadata_frame_is_a_successful_no_op() {
        let size = Size::new(16, 16);
        let mut source = ScriptedSource::new(output(size, Rotation::Identity));
        source.push_frame(ScriptedFrame::new(blue_frame(size)));
        let mut manager = manager(source, ManagerConfig::default());
        let shared = SoftwareTexture::new(size, PixelFormat::Bgra8).unwrap();

        let frame = manager.get_frame(0).unwrap();
        assert_eq!(frame.move_count(), 0);
        assert_eq!(frame.dirty_count(), 0);
        assert_eq!(manager.metadata_capacity(), 0);

        let dest = Rect::from_size(size);
        assert_eq!(
            manager
                .process_frame(&frame, &shared, 0, 0, dest, None)
                .unwrap(),
            FrameUpdate::Unchanged
        );
        assert_eq!(
            manager
                .process_frame(&frame, &shared, 0, 0, dest, Some(Rect::new(0, 0, 8, 8)))
                .unwrap(),
            FrameUpdate::Unchanged
        );
        assert_eq!(manager.device().counters(), Default::default());
        assert_eq!(shared.snapshot().pixel(0, 0), &[0, 0, 0, 0]);
    }

    #[test]
    fn delta_frame_replays_moves_then_dirties() {
        let size = Size::new(32, 32);
        let mut source = ScriptedSource::new(output(size, Rotation::Identity));
        source.push_frame(
            ScriptedFrame::new(blue_frame(size))
                .with_move(MoveRegion {
                    source: Point::new(0, 0),
                    destination: Rect::new(16, 16, 24, 24),
                })
                .with_dirty(Rect::new(0, 0, 4, 4)),
        );
        let mut manager = manager(source, ManagerConfig::default());
        let shared =
            SoftwareTexture::from_fn(size, |x, y| [x as u8, y as u8, 0, 255]).unwrap();

        let frame = manager.get_frame(16).unwrap();
        assert_eq!((frame.move_count(), frame.dirty_count()), (1, 1));
        let update = manager
            .process_frame(&frame, &shared, 0, 0, Rect::from_size(size), None)
            .unwrap();
        assert_eq!(update, FrameUpdate::Delta { moves: 1, dirty_quads: 1 });
        manager.release_frame().unwrap();

        let out = shared.snapshot();
        assert_eq!(out.pixel(16, 16), &[0, 0, 0, 255]);
        assert_eq!(out.pixel(23, 23), &[7, 7, 0, 255]);
        assert_eq!(out.pixel(0, 0), &BLUE);
        assert_eq!(out.pixel(3, 3), &BLUE);
        assert_eq!(out.pixel(4, 4), &[4, 4, 0, 255]);
    }

    #[test]
    fn double_acquire_forces_release_of_the_held_frame() {
        let size = Size::new(8, 8);
        let mut source = ScriptedSource::new(output(size, Rotation::Identity));
        source.push_frame(ScriptedFrame::new(blue_frame(size)));
        source.push_frame(ScriptedFrame::new(blue_frame(size)));
        let mut manager = manager(source, ManagerConfig::default());

        let first = manager.get_frame(0).unwrap();
        let second = manager.get_frame(0).unwrap();
        assert_eq!(manager.source().releases(), 1);
        assert!(second.sequence() > first.sequence());

        let shared = SoftwareTexture::new(size, PixelFormat::Bgra8).unwrap();
        assert!(matches!(
            manager.process_frame(&first, &shared, 0, 0, Rect::from_size(size), None),
            Err(DuplicationError::StaleFrame)
        ));
        manager.release_frame().unwrap();
        assert_eq!(manager.source().releases(), 2);
    }

    #[test]
    fn release_without_a_held_frame_is_a_no_op() {
        let size = Size::new(8, 8);
        let mut manager = manager(
            ScriptedSource::new(output(size, Rotation::Identity)),
            ManagerConfig::default(),
        );
        manager.release_frame().unwrap();
        manager.release_frame().unwrap();
        assert_eq!(manager.source().releases(), 0);
    }

    #[test]
    fn timeout_leaves_no_frame_held() {
        let size = Size::new(8, 8);
        let mut manager = manager(
            ScriptedSource::new(output(size, Rotation::Identity)),
            ManagerConfig::default(),
        );
        assert!(matches!(manager.get_frame(5), Err(DuplicationError::Timeout)));
        assert!(!manager.holds_frame());
    }

    #[test]
    fn metadata_capacity_never_shrinks_across_frames() {
        let size = Size::new(64, 64);
        let mut source = ScriptedSource::new(output(size, Rotation::Identity));
        let many = (0..8).fold(ScriptedFrame::new(blue_frame(size)), |frame, i| {
            frame.with_dirty(Rect::new(i, i, i + 2, i + 2))
        });
        source.push_frame(ScriptedFrame::new(blue_frame(size)).with_dirty(Rect::new(0, 0, 2, 2)));
        source.push_frame(many);
        source.push_frame(ScriptedFrame::new(blue_frame(size)).with_dirty(Rect::new(0, 0, 2, 2)));
        let mut manager = manager(source, ManagerConfig::default());

        let mut capacities = Vec::new();
        for _ in 0..3 {
            manager.get_frame(0).unwrap();
            capacities.push(manager.metadata_capacity());
            manager.release_frame().unwrap();
        }
        assert_eq!(capacities, vec![16, 128, 128]);
    }

    #[test]
    fn metadata_failure_reports_the_error_and_keeps_the_frame_held() {
        let size = Size::new(8, 8);
        let mut source = ScriptedSource::new(output(size, Rotation::Identity));
        source.push_frame(
            ScriptedFrame::new(blue_frame(size))
                .with_dirty(Rect::new(0, 0, 2, 2))
                .failing_metadata(),
        );
        source.push_frame(ScriptedFrame::new(blue_frame(size)));
        let mut manager = manager(source, ManagerConfig::default());

        assert!(matches!(manager.get_frame(0), Err(DuplicationError::Device(_))));
        assert!(manager.holds_frame());
        manager.get_frame(0).unwrap();
        assert_eq!(manager.source().releases(), 1);
    }

    #[test]
    fn cross_adapter_output_bridges_dirty_frames_through_cpu() {
        let size = Size::new(8, 8);
        let mut descriptor = output(size, Rotation::Identity);
        descriptor.adapter = AdapterId(2);
        let mut source = ScriptedSource::new(descriptor);
        source.push_frame(ScriptedFrame::new(blue_frame(size)).with_dirty(Rect::new(0, 0, 8, 8)));
        let mut manager = manager(source, ManagerConfig::default());
        assert!(manager.is_cross_adapter());

        let shared = SoftwareTexture::new(size, PixelFormat::Bgra8).unwrap();
        let frame = manager.get_frame(0).unwrap();
        manager
            .process_frame(&frame, &shared, 0, 0, Rect::from_size(size), None)
            .unwrap();

        assert_eq!(manager.source().readbacks(), 1);
        assert_eq!(manager.device().counters().uploads, 1);
        assert_eq!(shared.snapshot().pixel(7, 7), &BLUE);
    }

    #[test]
    fn forced_bridge_applies_on_a_shared_adapter() {
        let size = Size::new(8, 8);
        let manager = manager(
            ScriptedSource::new(output(size, Rotation::Identity)),
            ManagerConfig {
                force_cpu_bridge: true,
                ..ManagerConfig::default()
            },
        );
        assert!(manager.is_cross_adapter());
    }

    #[test]
    fn differing_source_rect_letterboxes_the_whole_frame() {
        let size = Size::new(16, 8);
        let mut source = ScriptedSource::new(output(size, Rotation::Identity));
        source.push_frame(ScriptedFrame::new(blue_frame(size)).with_dirty(Rect::new(0, 0, 1, 1)));
        let mut manager = manager(source, ManagerConfig::default());
        let shared = SoftwareTexture::new(Size::new(8, 8), PixelFormat::Bgra8).unwrap();

        let frame = manager.get_frame(0).unwrap();
        let update = manager
            .process_frame(
                &frame,
                &shared,
                0,
                0,
                Rect::new(0, 0, 8, 8),
                Some(Rect::from_size(size)),
            )
            .unwrap();
        let FrameUpdate::Letterbox(plan) = update else {
            panic!("expected the letterbox path, got {update:?}");
        };
        assert_eq!(plan.resized, Some(Size::new(8, 4)));
        assert_eq!(plan.margin_top, 2);

        let out = shared.snapshot();
        assert_eq!(out.pixel(0, 1), &[0, 0, 0, 0]);
        assert_eq!(out.pixel(0, 2), &BLUE);
        assert_eq!(out.pixel(7, 5), &BLUE);
        assert_eq!(out.pixel(7, 6), &[0, 0, 0, 0]);
    }

    #[test]
    fn output_descriptor_is_the_one_captured_at_initialization() {
        let size = Size::new(1080, 1920);
        let manager = manager(
            ScriptedSource::new(output(size, Rotation::Rotate90)),
            ManagerConfig::default(),
        );
        let descriptor = manager.output_descriptor();
        assert_eq!(descriptor.rotation, Rotation::Rotate90);
        assert_eq!(descriptor.logical_size(), size);
        assert_eq!(descriptor.device_name, r"\\.\DISPLAY1");
    }
}
