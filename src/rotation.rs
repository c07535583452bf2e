//! Rotation-aware mapping of move and dirty regions.
//!
//! Move regions arrive in the output's logical space and are mapped into
//! native pixel space. Dirty regions arrive in native (scan-out) space and
//! are mapped onto the logically oriented composition surface. `W`/`H`
//! below are always the output's logical width and height.

use crate::error::{DuplicationError, DuplicationResult};
use crate::geometry::{Point, Rect, Rotation, Size};
use crate::metadata::MoveRegion;

pub const VERTICES_PER_QUAD: usize = 6;

/// One vertex of the textured-quad pass: `SV_POSITION` (NDC) then
/// `TEXCOORD` (normalized texel space).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const TEX_COORD_OFFSET: u32 = std::mem::size_of::<[f32; 3]>() as u32;
}

/// Source and destination of a move after rotation compensation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedMove {
    pub source: Rect,
    pub destination: Rect,
}

/// Logical to native remap applied to move regions.
fn logical_to_native(rotation: Rotation, r: Rect, logical: Size) -> DuplicationResult<Rect> {
    let w = logical.width as i32;
    let h = logical.height as i32;
    Ok(match rotation {
        Rotation::Identity | Rotation::Unspecified => r,
        Rotation::Rotate90 => Rect::new(h - r.bottom, r.left, h - r.top, r.right),
        Rotation::Rotate180 => Rect::new(w - r.right, h - r.bottom, w - r.left, h - r.top),
        Rotation::Rotate270 => Rect::new(r.top, w - r.right, r.bottom, w - r.left),
        Rotation::Unsupported(raw) => return Err(DuplicationError::UnsupportedRotation(raw)),
    })
}

fn native_to_logical(rotation: Rotation, r: Rect, logical: Size) -> DuplicationResult<Rect> {
    let w = logical.width as i32;
    let h = logical.height as i32;
    Ok(match rotation {
        Rotation::Identity | Rotation::Unspecified => r,
        Rotation::Rotate90 => Rect::new(w - r.bottom, r.left, w - r.top, r.right),
        Rotation::Rotate180 => Rect::new(w - r.right, h - r.bottom, w - r.left, h - r.top),
        Rotation::Rotate270 => Rect::new(r.top, h - r.right, r.bottom, h - r.left),
        Rotation::Unsupported(raw) => return Err(DuplicationError::UnsupportedRotation(raw)),
    })
}

pub fn map_move_region(
    rotation: Rotation,
    region: &MoveRegion,
    logical: Size,
) -> DuplicationResult<MappedMove> {
    let dest = region.destination;
    let source = Rect::new(
        region.source.x,
        region.source.y,
        region.source.x + dest.width(),
        region.source.y + dest.height(),
    );
    Ok(MappedMove {
        source: logical_to_native(rotation, source, logical)?,
        destination: logical_to_native(rotation, dest, logical)?,
    })
}

/// Inverse of [`map_move_region`] for one rect.
pub fn unmap_move_rect(rotation: Rotation, mapped: Rect, logical: Size) -> DuplicationResult<Rect> {
    let w = logical.width as i32;
    let h = logical.height as i32;
    Ok(match rotation {
        Rotation::Identity | Rotation::Unspecified => mapped,
        Rotation::Rotate90 => Rect::new(mapped.top, h - mapped.right, mapped.bottom, h - mapped.left),
        Rotation::Rotate180 => Rect::new(
            w - mapped.right,
            h - mapped.bottom,
            w - mapped.left,
            h - mapped.top,
        ),
        Rotation::Rotate270 => Rect::new(w - mapped.bottom, mapped.left, w - mapped.top, mapped.right),
        Rotation::Unsupported(raw) => return Err(DuplicationError::UnsupportedRotation(raw)),
    })
}

/// Where a dirty rect lands on the composition surface, before the
/// desktop/offset translation.
pub fn map_dirty_region(rotation: Rotation, dirty: Rect, logical: Size) -> DuplicationResult<Rect> {
    native_to_logical(rotation, dirty, logical)
}

/// Inverse of [`map_dirty_region`].
pub fn unmap_dirty_region(rotation: Rotation, mapped: Rect, logical: Size) -> DuplicationResult<Rect> {
    let w = logical.width as i32;
    let h = logical.height as i32;
    Ok(match rotation {
        Rotation::Identity | Rotation::Unspecified => mapped,
        Rotation::Rotate90 => Rect::new(mapped.top, w - mapped.right, mapped.bottom, w - mapped.left),
        Rotation::Rotate180 => Rect::new(
            w - mapped.right,
            h - mapped.bottom,
            w - mapped.left,
            h - mapped.top,
        ),
        Rotation::Rotate270 => Rect::new(h - mapped.bottom, mapped.left, h - mapped.top, mapped.right),
        Rotation::Unsupported(raw) => return Err(DuplicationError::UnsupportedRotation(raw)),
    })
}

/// Texture coordinates of the quad corners in vertex order
/// `[bottom-left, top-left, bottom-right, top-right]` of the destination.
pub fn dirty_tex_coords(
    rotation: Rotation,
    dirty: Rect,
    texture: Size,
) -> DuplicationResult<[[f32; 2]; 4]> {
    let tw = texture.width as f32;
    let th = texture.height as f32;
    let l = dirty.left as f32 / tw;
    let t = dirty.top as f32 / th;
    let r = dirty.right as f32 / tw;
    let b = dirty.bottom as f32 / th;
    Ok(match rotation {
        Rotation::Identity | Rotation::Unspecified => [[l, b], [l, t], [r, b], [r, t]],
        Rotation::Rotate90 => [[r, b], [l, b], [r, t], [l, t]],
        Rotation::Rotate180 => [[r, t], [r, b], [l, t], [l, b]],
        Rotation::Rotate270 => [[l, t], [r, t], [l, b], [r, b]],
        Rotation::Unsupported(raw) => return Err(DuplicationError::UnsupportedRotation(raw)),
    })
}

/// Placement of the output on the composition surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuadPlacement {
    /// Full size of the surface being drawn into.
    pub surface: Size,
    /// Surface pixel where the output's logical origin lands
    /// (destination rect origin plus caller offset).
    pub origin: Point,
    /// Logical size of the output.
    pub logical: Size,
}

fn quad(corners: [[f32; 2]; 4], tex: [[f32; 2]; 4]) -> [Vertex; VERTICES_PER_QUAD] {
    let vertex = |i: usize| Vertex {
        position: [corners[i][0], corners[i][1], 0.0],
        tex_coord: tex[i],
    };
    // Two triangles: (0, 1, 2) and (2, 1, 3), with corner 3 the top-right.
    [vertex(0), vertex(1), vertex(2), vertex(2), vertex(1), vertex(3)]
}

/// Six vertices drawing `dirty` (native texture space) onto the
/// composition surface.
pub fn dirty_quad_vertices(
    rotation: Rotation,
    dirty: Rect,
    placement: &QuadPlacement,
    texture: Size,
) -> DuplicationResult<[Vertex; VERTICES_PER_QUAD]> {
    let dest = map_dirty_region(rotation, dirty, placement.logical)?;
    let tex = dirty_tex_coords(rotation, dirty, texture)?;

    // Odd extents have a half-pixel center; keep it in float.
    let half_w = placement.surface.width as f32 / 2.0;
    let half_h = placement.surface.height as f32 / 2.0;
    let ndc_x = |x: i32| (x + placement.origin.x) as f32 / half_w - 1.0;
    let ndc_y = |y: i32| 1.0 - (y + placement.origin.y) as f32 / half_h;

    let corners = [
        [ndc_x(dest.left), ndc_y(dest.bottom)],
        [ndc_x(dest.left), ndc_y(dest.top)],
        [ndc_x(dest.right), ndc_y(dest.bottom)],
        [ndc_x(dest.right), ndc_y(dest.top)],
    ];
    Ok(quad(corners, tex))
}

/// Six vertices stretching the whole source over the whole target.
pub fn stretch_quad_vertices() -> [Vertex; VERTICES_PER_QUAD] {
    quad(
        [[-1.0, -1.0], [-1.0, 1.0], [1.0, -1.0], [1.0, 1.0]],
        [[0.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 0.0]],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const ROTATIONS: [Rotation; 5] = [
        Rotation::Unspecified,
        Rotation::Identity,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    #[test]
    fn rotate180_dirty_rect_mirrors_both_axes() {
        let mapped = map_dirty_region(
            Rotation::Rotate180,
            Rect::new(10, 20, 110, 220),
            Size::new(1920, 1080),
        )
        .unwrap();
        assert_eq!(mapped, Rect::new(1810, 860, 1910, 1060));
    }

    #[test]
    fn rotate90_move_swaps_and_mirrors() {
        let region = MoveRegion {
            source: Point::new(100, 200),
            destination: Rect::new(300, 400, 350, 420),
        };
        let mapped = map_move_region(Rotation::Rotate90, &region, Size::new(1080, 1920)).unwrap();
        assert_eq!(mapped.source, Rect::new(1920 - 220, 100, 1920 - 200, 150));
        assert_eq!(mapped.destination, Rect::new(1920 - 420, 300, 1920 - 400, 350));
    }

    #[test]
    fn rotate270_move_takes_its_left_edge_from_source_y() {
        let region = MoveRegion {
            source: Point::new(100, 200),
            destination: Rect::new(300, 400, 350, 420),
        };
        let mapped = map_move_region(Rotation::Rotate270, &region, Size::new(1080, 1920)).unwrap();
        // (top, W - right, bottom, W - left) with W = 1080
        assert_eq!(mapped.source, Rect::new(200, 930, 220, 980));
        assert_eq!(mapped.destination, Rect::new(400, 730, 420, 780));
    }

    #[test]
    fn odd_surface_quad_spans_the_full_viewport() {
        let placement = QuadPlacement {
            surface: Size::new(5, 3),
            origin: Point::new(0, 0),
            logical: Size::new(5, 3),
        };
        let vertices = dirty_quad_vertices(
            Rotation::Rotate180,
            Rect::new(0, 0, 5, 3),
            &placement,
            Size::new(5, 3),
        )
        .unwrap();
        assert_relative_eq!(vertices[0].position[0], -1.0);
        assert_relative_eq!(vertices[0].position[1], -1.0);
        assert_relative_eq!(vertices[5].position[0], 1.0);
        assert_relative_eq!(vertices[5].position[1], 1.0);

        let narrow = QuadPlacement {
            surface: Size::new(1, 1),
            origin: Point::new(0, 0),
            logical: Size::new(1, 1),
        };
        let vertices =
            dirty_quad_vertices(Rotation::Identity, Rect::new(0, 0, 1, 1), &narrow, Size::new(1, 1))
                .unwrap();
        assert_relative_eq!(vertices[1].position[0], -1.0);
        assert_relative_eq!(vertices[5].position[0], 1.0);
    }

    #[test]
    fn move_destinations_round_trip_for_every_rotation() {
        let logical = Size::new(1280, 720);
        let region = MoveRegion {
            source: Point::new(17, 33),
            destination: Rect::new(40, 60, 200, 95),
        };
        for rotation in ROTATIONS {
            let mapped = map_move_region(rotation, &region, logical).unwrap();
            assert_eq!(
                unmap_move_rect(rotation, mapped.destination, logical).unwrap(),
                region.destination,
                "{rotation:?}"
            );
            assert_eq!(mapped.source.size(), mapped.destination.size(), "{rotation:?}");
        }
    }

    #[test]
    fn dirty_rects_round_trip_for_every_rotation() {
        let logical = Size::new(1280, 720);
        let dirty = Rect::new(5, 9, 77, 130);
        for rotation in ROTATIONS {
            let mapped = map_dirty_region(rotation, dirty, logical).unwrap();
            assert_eq!(unmap_dirty_region(rotation, mapped, logical).unwrap(), dirty);
        }
    }

    #[test]
    fn unsupported_rotation_is_an_error_not_a_zero_rect() {
        let region = MoveRegion {
            source: Point::new(0, 0),
            destination: Rect::new(0, 0, 10, 10),
        };
        assert!(map_move_region(Rotation::Unsupported(42), &region, Size::new(8, 8)).is_err());
        assert!(
            dirty_tex_coords(Rotation::Unsupported(42), Rect::new(0, 0, 1, 1), Size::new(8, 8))
                .is_err()
        );
    }

    #[test]
    fn tex_coords_stay_normalized_for_in_bounds_dirty_rects() {
        let texture = Size::new(1920, 1080);
        let dirty_rects = [
            Rect::new(0, 0, 1920, 1080),
            Rect::new(1919, 1079, 1920, 1080),
            Rect::new(640, 10, 1280, 700),
        ];
        for rotation in ROTATIONS {
            for dirty in dirty_rects {
                for [u, v] in dirty_tex_coords(rotation, dirty, texture).unwrap() {
                    assert!((0.0..=1.0).contains(&u), "{rotation:?} {dirty:?} u={u}");
                    assert!((0.0..=1.0).contains(&v), "{rotation:?} {dirty:?} v={v}");
                }
            }
        }
    }

    #[test]
    fn identity_quad_positions_cover_the_dirty_rect() {
        let placement = QuadPlacement {
            surface: Size::new(200, 100),
            origin: Point::new(0, 0),
            logical: Size::new(200, 100),
        };
        let vertices = dirty_quad_vertices(
            Rotation::Identity,
            Rect::new(0, 0, 100, 50),
            &placement,
            Size::new(200, 100),
        )
        .unwrap();

        // bottom-left, top-left, bottom-right, bottom-right, top-left, top-right
        assert_relative_eq!(vertices[0].position[0], -1.0);
        assert_relative_eq!(vertices[0].position[1], 0.0);
        assert_relative_eq!(vertices[1].position[1], 1.0);
        assert_relative_eq!(vertices[5].position[0], 0.0);
        assert_eq!(vertices[3], vertices[2]);
        assert_eq!(vertices[4], vertices[1]);
        assert_relative_eq!(vertices[0].tex_coord[0], 0.0);
        assert_relative_eq!(vertices[0].tex_coord[1], 0.5);
        assert_relative_eq!(vertices[5].tex_coord[0], 0.5);
        assert_relative_eq!(vertices[5].tex_coord[1], 0.0);
    }

    #[test]
    fn placement_origin_shifts_positions() {
        let placement = QuadPlacement {
            surface: Size::new(400, 200),
            origin: Point::new(200, 100),
            logical: Size::new(200, 100),
        };
        let vertices = dirty_quad_vertices(
            Rotation::Identity,
            Rect::new(0, 0, 200, 100),
            &placement,
            Size::new(200, 100),
        )
        .unwrap();
        // Output occupies the bottom-right quadrant.
        assert_relative_eq!(vertices[1].position[0], 0.0);
        assert_relative_eq!(vertices[1].position[1], 0.0);
        assert_relative_eq!(vertices[2].position[0], 1.0);
        assert_relative_eq!(vertices[2].position[1], -1.0);
    }
}
