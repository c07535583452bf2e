//! The graphics device seam the compositor draws through.
//!
//! Handles are reference counted: cloning a `Texture` adds a reference and
//! dropping it releases one. The manager owns every handle it creates and
//! borrows the device and the caller's shared surface.

use std::borrow::Cow;

use crate::bridge::CpuSurface;
use crate::error::DuplicationResult;
use crate::geometry::{Rect, Size};
use crate::rotation::Vertex;

/// Pixel format of a surface. Desktop duplication hands out BGRA8.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    #[default]
    Bgra8,
    Rgba8,
    Rgba16Float,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub size: Size,
    pub format: PixelFormat,
}

impl SurfaceDesc {
    pub const fn new(size: Size, format: PixelFormat) -> Self {
        Self { size, format }
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.size)
    }
}

/// What a surface created by the manager is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceUsage {
    /// Copy target/source only (move staging, crops).
    Intermediate,
    /// Drawn into by a quad pass and later sampled or copied.
    RenderTarget,
}

/// Compiled vertex/pixel shader pair for the textured-quad pass. The
/// vertex shader's input signature must match [`Vertex`].
#[derive(Clone, Debug, Default)]
pub struct ShaderSet {
    pub vertex: Cow<'static, [u8]>,
    pub pixel: Cow<'static, [u8]>,
}

/// One textured-quad draw: `vertex_count` vertices from `vertices`,
/// sampling `source`, into `target` whose full extent is `target_size`.
pub struct QuadPass<'a, D: GraphicsDevice + ?Sized> {
    pub pipeline: &'a D::Pipeline,
    pub target: &'a D::RenderTarget,
    pub target_size: Size,
    pub source: &'a D::ShaderView,
    pub vertices: &'a D::VertexBuffer,
    pub vertex_count: u32,
}

pub trait GraphicsDevice {
    type Texture: Clone + PartialEq;
    type RenderTarget;
    type ShaderView;
    /// Vertex shader, pixel shader, input layout and sampler.
    type Pipeline;
    type VertexBuffer;

    /// Adapter the device was created on.
    fn adapter(&self) -> crate::source::AdapterId;

    fn describe(&self, texture: &Self::Texture) -> SurfaceDesc;

    fn create_texture(
        &self,
        desc: &SurfaceDesc,
        usage: SurfaceUsage,
    ) -> DuplicationResult<Self::Texture>;

    /// Create a sampleable texture on this device holding `pixels`.
    fn create_texture_with_pixels(&self, pixels: &CpuSurface) -> DuplicationResult<Self::Texture>;

    fn create_pipeline(&self, shaders: &ShaderSet) -> DuplicationResult<Self::Pipeline>;

    fn create_render_target(
        &self,
        texture: &Self::Texture,
    ) -> DuplicationResult<Self::RenderTarget>;

    fn create_shader_view(&self, texture: &Self::Texture) -> DuplicationResult<Self::ShaderView>;

    fn create_vertex_buffer(&self, vertices: &[Vertex]) -> DuplicationResult<Self::VertexBuffer>;

    /// Overwrite an existing buffer whose byte width equals the new data.
    /// On failure the buffer contents are unspecified and must not be drawn.
    fn update_vertex_buffer(
        &self,
        buffer: &Self::VertexBuffer,
        vertices: &[Vertex],
    ) -> DuplicationResult<()>;

    /// Copy `src_rect` of `src` to (`dst_x`, `dst_y`) of `dst`.
    fn copy_region(
        &self,
        dst: &Self::Texture,
        dst_x: u32,
        dst_y: u32,
        src: &Self::Texture,
        src_rect: &Rect,
    );

    /// Bind the pass state, draw, then restore the caller's viewport and
    /// unbind the shader view.
    fn draw_quads(&self, pass: QuadPass<'_, Self>) -> DuplicationResult<()>;
}

/// The textured-quad pipeline, created from `shaders` on first use and
/// shared by every pass of one manager.
pub struct LazyPipeline<G: GraphicsDevice> {
    shaders: ShaderSet,
    pipeline: Option<G::Pipeline>,
}

impl<G: GraphicsDevice> LazyPipeline<G> {
    pub fn new(shaders: ShaderSet) -> Self {
        Self {
            shaders,
            pipeline: None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn get(&mut self, device: &G) -> DuplicationResult<&G::Pipeline> {
        let pipeline = match self.pipeline.take() {
            Some(existing) => existing,
            None => {
                let created = device.create_pipeline(&self.shaders)?;
                log::debug!("created textured quad pipeline");
                created
            }
        };
        Ok(self.pipeline.insert(pipeline))
    }
}
