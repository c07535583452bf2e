use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::clamp_rect;
use crate::gpu::{GraphicsDevice, LazyPipeline, QuadPass};
use crate::metadata::DirtyRegion;
use crate::rotation::{QuadPlacement, VERTICES_PER_QUAD, Vertex, dirty_quad_vertices};

use super::ReplayTarget;

/// CPU-side vertex memory for the dirty pass. Capacity only grows.
#[derive(Debug, Default)]
pub struct VertexScratch {
    vertices: Vec<Vertex>,
}

impl VertexScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity_quads(&self) -> usize {
        self.vertices.capacity() / VERTICES_PER_QUAD
    }

    /// Clear and make room for `quads` quads.
    pub fn reset_for(&mut self, quads: usize) -> DuplicationResult<()> {
        self.vertices.clear();
        let needed = quads
            .checked_mul(VERTICES_PER_QUAD)
            .ok_or(DuplicationError::BufferOverflow)?;
        if let Err(error) = self.vertices.try_reserve_exact(needed) {
            log::warn!("failed to grow dirty vertex scratch to {quads} quads: {error}");
            return Err(DuplicationError::OutOfMemory);
        }
        Ok(())
    }

    pub fn push_quad(&mut self, quad: &[Vertex; VERTICES_PER_QUAD]) {
        self.vertices.extend_from_slice(quad);
    }

    pub fn as_slice(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Composites dirty regions of a captured frame onto the shared surface
/// with one textured-quad draw.
pub struct DirtyReplayer<G: GraphicsDevice> {
    render_target: Option<(G::Texture, G::RenderTarget)>,
    vertex_buffer: Option<(G::VertexBuffer, usize)>,
    scratch: VertexScratch,
    reuse_vertex_buffer: bool,
}

impl<G: GraphicsDevice> DirtyReplayer<G> {
    pub fn new(reuse_vertex_buffer: bool) -> Self {
        Self {
            render_target: None,
            vertex_buffer: None,
            scratch: VertexScratch::new(),
            reuse_vertex_buffer,
        }
    }

    pub fn scratch(&self) -> &VertexScratch {
        &self.scratch
    }

    fn ensure_render_target(&mut self, device: &G, shared: &G::Texture) -> DuplicationResult<()> {
        let cached = matches!(&self.render_target, Some((texture, _)) if texture == shared);
        if !cached {
            let view = device.create_render_target(shared)?;
            if self.render_target.is_some() {
                log::debug!("shared surface changed, rebuilding render target view");
            }
            self.render_target = Some((shared.clone(), view));
        }
        Ok(())
    }

    /// Fill the vertex buffer with the scratch contents, reusing the
    /// previous buffer when its size matches.
    fn upload_vertices(&mut self, device: &G) -> DuplicationResult<()> {
        let vertices = self.scratch.as_slice();
        if let Some((buffer, len)) = &self.vertex_buffer {
            if self.reuse_vertex_buffer && *len == vertices.len() {
                let updated = device.update_vertex_buffer(buffer, vertices);
                if updated.is_err() {
                    self.vertex_buffer = None;
                }
                return updated;
            }
        }

        self.vertex_buffer = None;
        let buffer = device.create_vertex_buffer(vertices)?;
        self.vertex_buffer = Some((buffer, vertices.len()));
        Ok(())
    }

    /// Draw `dirties` (native texture space) from `frame` onto `shared`.
    /// Returns the number of quads drawn.
    pub fn replay<I>(
        &mut self,
        device: &G,
        pipeline: &mut LazyPipeline<G>,
        shared: &G::Texture,
        frame: &G::Texture,
        dirties: I,
        target: &ReplayTarget,
    ) -> DuplicationResult<usize>
    where
        I: ExactSizeIterator<Item = DirtyRegion>,
    {
        let frame_size = device.describe(frame).size;
        let placement = QuadPlacement {
            surface: device.describe(shared).size,
            origin: target.origin,
            logical: target.logical,
        };

        self.scratch.reset_for(dirties.len())?;
        for dirty in dirties {
            let Some(rect) = clamp_rect(dirty.rect, frame_size.width, frame_size.height) else {
                continue;
            };
            let quad = dirty_quad_vertices(target.rotation, rect, &placement, frame_size)?;
            self.scratch.push_quad(&quad);
        }
        if self.scratch.is_empty() {
            return Ok(0);
        }

        let pipeline = pipeline.get(device)?;
        self.ensure_render_target(device, shared)?;
        let source = device.create_shader_view(frame)?;
        self.upload_vertices(device)?;

        let (Some((_, render_target)), Some((vertices, vertex_count))) =
            (&self.render_target, &self.vertex_buffer)
        else {
            return Ok(0);
        };
        let vertex_count = *vertex_count;
        device.draw_quads(QuadPass {
            pipeline,
            target: render_target,
            target_size: placement.surface,
            source: &source,
            vertices,
            vertex_count: vertex_count as u32,
        })?;

        if !self.reuse_vertex_buffer {
            self.vertex_buffer = None;
        }
        Ok(vertex_count / VERTICES_PER_QUAD)
    }
}
