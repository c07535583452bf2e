//! CPU reference backend.
//!
//! [`SoftwareDevice`] implements [`GraphicsDevice`] on plain memory with the
//! same copy and draw semantics as the GPU backend: copies with invalid
//! boxes are dropped, and quad passes rasterize pixel centers with
//! nearest-texel sampling. [`ScriptedSource`] replays a queue of prepared
//! frames. Both run on any OS.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::anyhow;

use crate::bridge::CpuSurface;
use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Rect, Size};
use crate::gpu::{GraphicsDevice, PixelFormat, QuadPass, ShaderSet, SurfaceDesc, SurfaceUsage};
use crate::metadata::{DIRTY_RECORD_BYTES, DirtyRegion, MOVE_RECORD_BYTES, MoveRegion};
use crate::rotation::{VERTICES_PER_QUAD, Vertex};
use crate::source::{AdapterId, DuplicationSource, FrameInfo, OutputDescriptor};

/// A shared, mutable CPU surface. Clones alias the same pixels and compare
/// equal only to each other.
#[derive(Clone, Debug)]
pub struct SoftwareTexture {
    pixels: Rc<RefCell<CpuSurface>>,
}

impl PartialEq for SoftwareTexture {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl Eq for SoftwareTexture {}

impl SoftwareTexture {
    pub fn new(size: Size, format: PixelFormat) -> DuplicationResult<Self> {
        Ok(Self::from_surface(CpuSurface::new(size, format)?))
    }

    pub fn from_surface(surface: CpuSurface) -> Self {
        Self {
            pixels: Rc::new(RefCell::new(surface)),
        }
    }

    /// BGRA8 texture with every pixel produced by `pixel(x, y)`.
    pub fn from_fn(
        size: Size,
        mut pixel: impl FnMut(u32, u32) -> [u8; 4],
    ) -> DuplicationResult<Self> {
        let mut surface = CpuSurface::new(size, PixelFormat::Bgra8)?;
        for y in 0..size.height {
            for x in 0..size.width {
                surface.pixel_mut(x, y).copy_from_slice(&pixel(x, y));
            }
        }
        Ok(Self::from_surface(surface))
    }

    pub fn desc(&self) -> SurfaceDesc {
        let surface = self.pixels.borrow();
        SurfaceDesc::new(surface.size, surface.format)
    }

    /// Copy of the current pixels.
    pub fn snapshot(&self) -> CpuSurface {
        self.pixels.borrow().clone()
    }
}

#[derive(Debug)]
pub struct SoftwarePipeline {
    pub vertex_shader_len: usize,
    pub pixel_shader_len: usize,
}

#[derive(Debug, Default)]
pub struct SoftwareVertexBuffer {
    vertices: RefCell<Vec<Vertex>>,
}

/// Number of resources created and commands issued on a [`SoftwareDevice`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceCounters {
    pub textures: u64,
    pub uploads: u64,
    pub pipelines: u64,
    pub render_targets: u64,
    pub shader_views: u64,
    pub vertex_buffers: u64,
    pub copies: u64,
    pub draws: u64,
}

#[derive(Debug, Default)]
pub struct SoftwareDevice {
    adapter: AdapterId,
    counters: Cell<DeviceCounters>,
    fail_vertex_updates: Cell<bool>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter(adapter: AdapterId) -> Self {
        Self {
            adapter,
            ..Self::default()
        }
    }

    /// Make every following vertex buffer update fail like a lost map.
    pub fn fail_vertex_updates(&self, fail: bool) {
        self.fail_vertex_updates.set(fail);
    }

    pub fn counters(&self) -> DeviceCounters {
        self.counters.get()
    }

    fn count(&self, bump: impl FnOnce(&mut DeviceCounters)) {
        let mut counters = self.counters.get();
        bump(&mut counters);
        self.counters.set(counters);
    }
}

/// A quad's pixel-space bounds and the texture coordinates at its
/// corners: top-left, top-right, bottom-left, bottom-right.
struct ScreenQuad {
    left: f32,
    top: f32,
    right: f32,
    bottom: f32,
    tex: [[f32; 2]; 4],
}

impl ScreenQuad {
    /// Corners come from vertices 0 (bottom-left), 1 (top-left),
    /// 2 (bottom-right) and 5 (top-right).
    fn from_vertices(quad: &[Vertex], target: Size) -> Self {
        let half_w = target.width as f32 / 2.0;
        let half_h = target.height as f32 / 2.0;
        let to_x = |v: &Vertex| (v.position[0] + 1.0) * half_w;
        let to_y = |v: &Vertex| (1.0 - v.position[1]) * half_h;
        let (bl, tl, br, tr) = (&quad[0], &quad[1], &quad[2], &quad[5]);
        Self {
            left: to_x(tl),
            top: to_y(tl),
            right: to_x(br),
            bottom: to_y(br),
            tex: [tl.tex_coord, tr.tex_coord, bl.tex_coord, br.tex_coord],
        }
    }

    fn tex_coord_at(&self, s: f32, t: f32) -> [f32; 2] {
        let lerp = |a: [f32; 2], b: [f32; 2], k: f32| {
            [a[0] + (b[0] - a[0]) * k, a[1] + (b[1] - a[1]) * k]
        };
        let top = lerp(self.tex[0], self.tex[1], s);
        let bottom = lerp(self.tex[2], self.tex[3], s);
        lerp(top, bottom, t)
    }
}

/// First and one-past-last pixel whose center lies in `[from, to)`.
fn covered_pixels(from: f32, to: f32, limit: u32) -> std::ops::Range<u32> {
    let start = (from - 0.5).ceil().max(0.0) as u32;
    let end = ((to - 0.5).ceil().max(0.0) as u32).min(limit);
    start..end.max(start)
}

fn rasterize(target: &mut CpuSurface, source: &CpuSurface, vertices: &[Vertex]) {
    if source.size.width == 0 || source.size.height == 0 {
        return;
    }
    let bpp = target.format.bytes_per_pixel().min(source.format.bytes_per_pixel());
    let max_x = source.size.width - 1;
    let max_y = source.size.height - 1;

    for quad in vertices.chunks_exact(VERTICES_PER_QUAD) {
        let quad = ScreenQuad::from_vertices(quad, target.size);
        let width = quad.right - quad.left;
        let height = quad.bottom - quad.top;
        if width <= 0.0 || height <= 0.0 {
            continue;
        }

        for y in covered_pixels(quad.top, quad.bottom, target.size.height) {
            let t = (y as f32 + 0.5 - quad.top) / height;
            for x in covered_pixels(quad.left, quad.right, target.size.width) {
                let s = (x as f32 + 0.5 - quad.left) / width;
                let [u, v] = quad.tex_coord_at(s, t);
                let tx = ((u * source.size.width as f32).floor().max(0.0) as u32).min(max_x);
                let ty = ((v * source.size.height as f32).floor().max(0.0) as u32).min(max_y);
                target.pixel_mut(x, y)[..bpp].copy_from_slice(&source.pixel(tx, ty)[..bpp]);
            }
        }
    }
}

impl GraphicsDevice for SoftwareDevice {
    type Texture = SoftwareTexture;
    type RenderTarget = SoftwareTexture;
    type ShaderView = SoftwareTexture;
    type Pipeline = SoftwarePipeline;
    type VertexBuffer = SoftwareVertexBuffer;

    fn adapter(&self) -> AdapterId {
        self.adapter
    }

    fn describe(&self, texture: &SoftwareTexture) -> SurfaceDesc {
        texture.desc()
    }

    fn create_texture(
        &self,
        desc: &SurfaceDesc,
        _usage: SurfaceUsage,
    ) -> DuplicationResult<SoftwareTexture> {
        let texture = SoftwareTexture::new(desc.size, desc.format)?;
        self.count(|c| c.textures += 1);
        Ok(texture)
    }

    fn create_texture_with_pixels(&self, pixels: &CpuSurface) -> DuplicationResult<SoftwareTexture> {
        self.count(|c| c.uploads += 1);
        Ok(SoftwareTexture::from_surface(pixels.clone()))
    }

    fn create_pipeline(&self, shaders: &ShaderSet) -> DuplicationResult<SoftwarePipeline> {
        self.count(|c| c.pipelines += 1);
        Ok(SoftwarePipeline {
            vertex_shader_len: shaders.vertex.len(),
            pixel_shader_len: shaders.pixel.len(),
        })
    }

    fn create_render_target(&self, texture: &SoftwareTexture) -> DuplicationResult<SoftwareTexture> {
        self.count(|c| c.render_targets += 1);
        Ok(texture.clone())
    }

    fn create_shader_view(&self, texture: &SoftwareTexture) -> DuplicationResult<SoftwareTexture> {
        self.count(|c| c.shader_views += 1);
        Ok(texture.clone())
    }

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> DuplicationResult<SoftwareVertexBuffer> {
        self.count(|c| c.vertex_buffers += 1);
        Ok(SoftwareVertexBuffer {
            vertices: RefCell::new(vertices.to_vec()),
        })
    }

    fn update_vertex_buffer(
        &self,
        buffer: &SoftwareVertexBuffer,
        vertices: &[Vertex],
    ) -> DuplicationResult<()> {
        if self.fail_vertex_updates.get() {
            return Err(DuplicationError::Device(anyhow!(
                "failed to map vertex buffer for update"
            )));
        }
        let mut stored = buffer.vertices.borrow_mut();
        stored.clear();
        stored.extend_from_slice(vertices);
        Ok(())
    }

    fn copy_region(
        &self,
        dst: &SoftwareTexture,
        dst_x: u32,
        dst_y: u32,
        src: &SoftwareTexture,
        src_rect: &Rect,
    ) {
        self.count(|c| c.copies += 1);
        let result = if dst == src {
            let source = src.snapshot();
            dst.pixels
                .borrow_mut()
                .copy_region_from(dst_x, dst_y, &source, src_rect)
        } else {
            dst.pixels
                .borrow_mut()
                .copy_region_from(dst_x, dst_y, &src.pixels.borrow(), src_rect)
        };
        if let Err(error) = result {
            log::warn!("dropped copy of {src_rect:?} to ({dst_x}, {dst_y}): {error}");
        }
    }

    fn draw_quads(&self, pass: QuadPass<'_, Self>) -> DuplicationResult<()> {
        self.count(|c| c.draws += 1);
        let vertices = pass.vertices.vertices.borrow();
        let count = (pass.vertex_count as usize).min(vertices.len());
        let source = pass.source.snapshot();
        let mut target = pass.target.pixels.borrow_mut();
        if target.size != pass.target_size {
            return Err(DuplicationError::Device(anyhow!(
                "viewport {:?} does not match render target {:?}",
                pass.target_size,
                target.size
            )));
        }
        rasterize(&mut target, &source, &vertices[..count]);
        Ok(())
    }
}

/// A frame queued on a [`ScriptedSource`].
#[derive(Clone, Debug)]
pub struct ScriptedFrame {
    texture: SoftwareTexture,
    info: FrameInfo,
    moves: Vec<MoveRegion>,
    dirties: Vec<DirtyRegion>,
    fail_metadata: bool,
}

impl ScriptedFrame {
    pub fn new(texture: SoftwareTexture) -> Self {
        Self {
            texture,
            info: FrameInfo {
                accumulated_frames: 1,
                ..FrameInfo::default()
            },
            moves: Vec::new(),
            dirties: Vec::new(),
            fail_metadata: false,
        }
    }

    pub fn with_move(mut self, region: MoveRegion) -> Self {
        self.moves.push(region);
        self
    }

    pub fn with_dirty(mut self, rect: Rect) -> Self {
        self.dirties.push(DirtyRegion { rect });
        self
    }

    pub fn with_present_time(mut self, qpc: i64) -> Self {
        self.info.last_present_time = qpc;
        self
    }

    /// Make both metadata queries fail with a device error.
    pub fn failing_metadata(mut self) -> Self {
        self.fail_metadata = true;
        self
    }

    fn metadata_bytes(&self) -> usize {
        self.moves.len() * MOVE_RECORD_BYTES + self.dirties.len() * DIRTY_RECORD_BYTES
    }
}

#[derive(Debug)]
enum ScriptedEvent {
    Frame(ScriptedFrame),
    AccessLost,
}

/// A [`DuplicationSource`] that hands out queued frames and times out
/// when the queue is empty.
#[derive(Debug)]
pub struct ScriptedSource {
    output: OutputDescriptor,
    queue: VecDeque<ScriptedEvent>,
    current: Option<ScriptedFrame>,
    releases: u64,
    readbacks: u64,
}

impl ScriptedSource {
    pub fn new(output: OutputDescriptor) -> Self {
        Self {
            output,
            queue: VecDeque::new(),
            current: None,
            releases: 0,
            readbacks: 0,
        }
    }

    pub fn push_frame(&mut self, frame: ScriptedFrame) {
        self.queue.push_back(ScriptedEvent::Frame(frame));
    }

    /// The next acquire fails as if the desktop mode changed.
    pub fn push_access_lost(&mut self) {
        self.queue.push_back(ScriptedEvent::AccessLost);
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }

    pub fn readbacks(&self) -> u64 {
        self.readbacks
    }

    fn current(&self) -> DuplicationResult<&ScriptedFrame> {
        let frame = self
            .current
            .as_ref()
            .ok_or_else(|| DuplicationError::Device(anyhow!("no frame is acquired")))?;
        if frame.fail_metadata {
            return Err(DuplicationError::Device(anyhow!(
                "scripted metadata query failure"
            )));
        }
        Ok(frame)
    }
}

fn write_records<T>(
    buffer: &mut [u8],
    records: &[T],
    record_bytes: usize,
    write: impl Fn(&T, &mut [u8]),
) -> DuplicationResult<usize> {
    let needed = records.len() * record_bytes;
    if buffer.len() < needed {
        return Err(DuplicationError::BufferOverflow);
    }
    for (record, slot) in records.iter().zip(buffer.chunks_exact_mut(record_bytes)) {
        write(record, slot);
    }
    Ok(needed)
}

impl DuplicationSource for ScriptedSource {
    type Texture = SoftwareTexture;

    fn output(&self) -> &OutputDescriptor {
        &self.output
    }

    fn acquire_next_frame(
        &mut self,
        _timeout_ms: u32,
    ) -> DuplicationResult<(SoftwareTexture, FrameInfo)> {
        if self.current.is_some() {
            return Err(DuplicationError::Device(anyhow!(
                "previous frame was not released"
            )));
        }
        match self.queue.pop_front() {
            None => Err(DuplicationError::Timeout),
            Some(ScriptedEvent::AccessLost) => Err(DuplicationError::AccessLost),
            Some(ScriptedEvent::Frame(mut frame)) => {
                frame.info.total_metadata_bytes = frame.metadata_bytes() as u32;
                let acquired = (frame.texture.clone(), frame.info);
                self.current = Some(frame);
                Ok(acquired)
            }
        }
    }

    fn release_frame(&mut self) -> DuplicationResult<()> {
        if self.current.take().is_none() {
            return Err(DuplicationError::Device(anyhow!("no frame to release")));
        }
        self.releases += 1;
        Ok(())
    }

    fn frame_move_rects(&mut self, buffer: &mut [u8]) -> DuplicationResult<usize> {
        let frame = self.current()?;
        write_records(buffer, &frame.moves, MOVE_RECORD_BYTES, |region, slot| {
            region.write_record(slot)
        })
    }

    fn frame_dirty_rects(&mut self, buffer: &mut [u8]) -> DuplicationResult<usize> {
        let frame = self.current()?;
        write_records(buffer, &frame.dirties, DIRTY_RECORD_BYTES, |region, slot| {
            region.write_record(slot)
        })
    }

    fn read_pixels(&mut self, texture: &SoftwareTexture) -> DuplicationResult<CpuSurface> {
        self.readbacks += 1;
        Ok(texture.snapshot())
    }
}
