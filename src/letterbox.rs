//! Full-frame rotate, crop, resize and center path.
//!
//! Used instead of incremental replay when the caller asks for a source
//! crop that differs from the destination rect. The whole frame is
//! processed and copied into the destination rect, aspect ratio preserved.

use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Point, Rect, Rotation, Size, make_even};
use crate::gpu::{GraphicsDevice, LazyPipeline, QuadPass, SurfaceDesc, SurfaceUsage};
use crate::rotation::{
    QuadPlacement, VERTICES_PER_QUAD, Vertex, dirty_quad_vertices, stretch_quad_vertices,
};

/// Sizes and margins for fitting a cropped frame into a destination rect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LetterboxPlan {
    pub ratio: f64,
    /// Even-rounded target size, or `None` when the ratio is exactly one.
    pub resized: Option<Size>,
    pub margin_left: i32,
    pub margin_top: i32,
}

impl LetterboxPlan {
    pub fn compute(cropped: Size, destination: &Rect) -> DuplicationResult<Self> {
        if cropped.width == 0 || cropped.height == 0 || destination.is_empty() {
            return Err(DuplicationError::InvalidConfig(format!(
                "cannot letterbox {}x{} into {destination:?}",
                cropped.width, cropped.height
            )));
        }

        let dest_width = f64::from(destination.width());
        let dest_height = f64::from(destination.height());
        let ratio =
            (dest_width / f64::from(cropped.width)).min(dest_height / f64::from(cropped.height));
        if ratio == 1.0 {
            return Ok(Self {
                ratio,
                resized: None,
                margin_left: 0,
                margin_top: 0,
            });
        }

        let width = make_even((f64::from(cropped.width) * ratio).round() as i32);
        let height = make_even((f64::from(cropped.height) * ratio).round() as i32);
        if width <= 0 || height <= 0 {
            return Err(DuplicationError::InvalidConfig(format!(
                "destination {destination:?} too small for a {}x{} frame",
                cropped.width, cropped.height
            )));
        }

        let margin =
            |available: f64, used: i32| ((available - f64::from(used)).round() / 2.0).max(0.0) as i32;
        Ok(Self {
            ratio,
            resized: Some(Size::new(width as u32, height as u32)),
            margin_left: margin(dest_width, width),
            margin_top: margin(dest_height, height),
        })
    }

    pub fn output_size(&self, cropped: Size) -> Size {
        self.resized.unwrap_or(cropped)
    }

    /// Box copied out of the processed texture, always on even extents.
    pub fn copy_box(&self, cropped: Size) -> Rect {
        let size = self.output_size(cropped);
        Rect::new(
            0,
            0,
            make_even(size.width as i32),
            make_even(size.height as i32),
        )
    }
}

struct RenderSurface<G: GraphicsDevice> {
    texture: G::Texture,
    view: G::RenderTarget,
    desc: SurfaceDesc,
}

/// Reuse `slot` when its description matches, otherwise replace it.
fn ensure_render_surface<'a, G: GraphicsDevice>(
    device: &G,
    slot: &'a mut Option<RenderSurface<G>>,
    desc: SurfaceDesc,
    what: &'static str,
) -> DuplicationResult<&'a RenderSurface<G>> {
    let surface = match slot.take() {
        Some(existing) if existing.desc == desc => existing,
        _ => {
            let texture = device.create_texture(&desc, SurfaceUsage::RenderTarget)?;
            let view = device.create_render_target(&texture)?;
            log::debug!(
                "created {}x{} {what} surface",
                desc.size.width,
                desc.size.height
            );
            RenderSurface {
                texture,
                view,
                desc,
            }
        }
    };
    Ok(slot.insert(surface))
}

/// Where the processed frame goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LetterboxRequest {
    /// Crop rect in the output's logical (rotated) frame.
    pub source: Rect,
    /// Target rect on the shared surface, before the offset.
    pub destination: Rect,
    pub offset: Point,
}

/// Owns the intermediate surfaces of the letterbox path; each is reused
/// while its size and format stay the same.
pub struct LetterboxTransformer<G: GraphicsDevice> {
    rotated: Option<RenderSurface<G>>,
    cropped: Option<RenderSurface<G>>,
    resized: Option<RenderSurface<G>>,
    quad: Option<G::VertexBuffer>,
}

impl<G: GraphicsDevice> Default for LetterboxTransformer<G> {
    fn default() -> Self {
        Self {
            rotated: None,
            cropped: None,
            resized: None,
            quad: None,
        }
    }
}

impl<G: GraphicsDevice> LetterboxTransformer<G> {
    pub fn new() -> Self {
        Self::default()
    }

    fn draw_full(
        &mut self,
        device: &G,
        pipeline: &G::Pipeline,
        source: &G::Texture,
        target: &RenderSurface<G>,
        vertices: &[Vertex; VERTICES_PER_QUAD],
    ) -> DuplicationResult<()> {
        let quad = match self.quad.take() {
            Some(existing) => {
                device.update_vertex_buffer(&existing, vertices)?;
                existing
            }
            None => device.create_vertex_buffer(vertices)?,
        };
        let quad = self.quad.insert(quad);
        let view = device.create_shader_view(source)?;
        device.draw_quads(QuadPass {
            pipeline,
            target: &target.view,
            target_size: target.desc.size,
            source: &view,
            vertices: quad,
            vertex_count: VERTICES_PER_QUAD as u32,
        })
    }

    /// Rotate `frame` upright, crop, fit and copy it into `shared`.
    pub fn apply(
        &mut self,
        device: &G,
        pipeline: &mut LazyPipeline<G>,
        frame: &G::Texture,
        rotation: Rotation,
        shared: &G::Texture,
        request: &LetterboxRequest,
    ) -> DuplicationResult<LetterboxPlan> {
        rotation.ensure_supported()?;
        let frame_desc = device.describe(frame);
        let mut processed = frame.clone();
        let mut processed_size = frame_desc.size;

        if !rotation.is_identity() {
            let upright = rotation.native_size(frame_desc.size);
            let placement = QuadPlacement {
                surface: upright,
                origin: Point::default(),
                logical: upright,
            };
            let vertices = dirty_quad_vertices(
                rotation,
                Rect::from_size(frame_desc.size),
                &placement,
                frame_desc.size,
            )?;
            let pipeline = pipeline.get(device)?;
            let mut slot = self.rotated.take();
            let target = ensure_render_surface(
                device,
                &mut slot,
                SurfaceDesc::new(upright, frame_desc.format),
                "rotation",
            )?;
            let drawn = self.draw_full(device, pipeline, frame, target, &vertices);
            self.rotated = slot;
            drawn?;
            if let Some(rotated) = &self.rotated {
                processed = rotated.texture.clone();
                processed_size = upright;
            }
        }

        let crop = request
            .source
            .intersect(&Rect::from_size(processed_size))
            .ok_or_else(|| {
                DuplicationError::InvalidConfig(format!(
                    "source rect {:?} lies outside the {}x{} frame",
                    request.source, processed_size.width, processed_size.height
                ))
            })?;
        let cropped_size = crop.size();
        let cropped = ensure_render_surface(
            device,
            &mut self.cropped,
            SurfaceDesc::new(cropped_size, frame_desc.format),
            "crop",
        )?
        .texture
        .clone();
        device.copy_region(&cropped, 0, 0, &processed, &crop);
        processed = cropped;

        let plan = LetterboxPlan::compute(cropped_size, &request.destination)?;
        if let Some(resized) = plan.resized {
            let pipeline = pipeline.get(device)?;
            let mut slot = self.resized.take();
            let target = ensure_render_surface(
                device,
                &mut slot,
                SurfaceDesc::new(resized, frame_desc.format),
                "resize",
            )?;
            let drawn = self.draw_full(device, pipeline, &processed, target, &stretch_quad_vertices());
            self.resized = slot;
            drawn?;
            if let Some(surface) = &self.resized {
                processed = surface.texture.clone();
            }
        }

        let dst_x = request.destination.left + request.offset.x + plan.margin_left;
        let dst_y = request.destination.top + request.offset.y + plan.margin_top;
        let (Ok(x), Ok(y)) = (u32::try_from(dst_x), u32::try_from(dst_y)) else {
            return Err(DuplicationError::InvalidConfig(format!(
                "letterbox target ({dst_x}, {dst_y}) is off the shared surface"
            )));
        };

        let shared_size = device.describe(shared).size;
        let copy_box = plan.copy_box(cropped_size);
        let clipped = Rect::new(
            0,
            0,
            copy_box.right.min(shared_size.width.saturating_sub(x) as i32),
            copy_box.bottom.min(shared_size.height.saturating_sub(y) as i32),
        );
        if !clipped.is_empty() {
            device.copy_region(shared, x, y, &processed, &clipped);
        }
        Ok(plan)
    }
}
