// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Triangle and line rasterization with near-plane clipping, perspective-correct
//! varyings, depth testing and blending.

use super::image::{quantize, texel_index, Texel};
use quadra_core::math::Vec4;
use quadra_core::renderer::api::{BlendMode, CullMode, DepthRange, PolygonMode, RasterState};

/// Number of interpolated floats per vertex.
pub const VARYINGS: usize = 12;
pub const WORLD: usize = 0;
pub const NORMAL: usize = 3;
pub const UV: usize = 6;
pub const CLIP: usize = 8;

/// A vertex after the vertex stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipVertex {
    pub position: Vec4,
    pub varyings: [f32; VARYINGS],
}

impl ClipVertex {
    fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        let mut varyings = [0.0; VARYINGS];
        for (i, v) in varyings.iter_mut().enumerate() {
            *v = a.varyings[i] + (b.varyings[i] - a.varyings[i]) * t;
        }
        Self {
            position: Vec4::lerp(a.position, b.position, t),
            varyings,
        }
    }
}

/// Maps NDC to window coordinates. A negative height flips the image vertically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    /// A viewport covering `width x height`, with NDC +Y at row 0 when `top_row_first`.
    pub fn full(width: u32, height: u32, top_row_first: bool) -> Self {
        if top_row_first {
            Self {
                x: 0.0,
                y: height as f32,
                width: width as f32,
                height: -(height as f32),
            }
        } else {
            Self {
                x: 0.0,
                y: 0.0,
                width: width as f32,
                height: height as f32,
            }
        }
    }
}

/// One fragment handed to the fragment stage.
#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub x: u32,
    pub y: u32,
    pub depth: f32,
    pub varyings: [f32; VARYINGS],
    /// uv area per pixel of the triangle, for mip selection.
    pub uv_density: f32,
    pub front_facing: bool,
}

/// What the fragment stage writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentOutput {
    pub color: Texel,
    /// Overrides the interpolated depth.
    pub depth: Option<f32>,
}

/// The attachments of the current pass, as raw level storage.
pub struct Surface<'a> {
    pub width: u32,
    pub height: u32,
    pub color: Option<&'a mut [Texel]>,
    pub depth: Option<&'a mut [Texel]>,
}

#[derive(Debug, Clone, Copy)]
struct WindowVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    varyings: [f32; VARYINGS],
}

fn inside_near(v: &ClipVertex, range: DepthRange) -> f32 {
    match range {
        DepthRange::NegativeOneToOne => v.position.z + v.position.w,
        DepthRange::ZeroToOne => v.position.z,
    }
}

/// Clips a triangle against the near plane (and `w > 0`), returning a convex polygon.
fn clip_near(tri: &[ClipVertex; 3], range: DepthRange) -> Vec<ClipVertex> {
    const W_MIN: f32 = 1e-5;
    let mut polygon = tri.to_vec();
    for plane in 0..2 {
        let dist = |v: &ClipVertex| {
            if plane == 0 {
                v.position.w - W_MIN
            } else {
                inside_near(v, range)
            }
        };
        let mut out = Vec::with_capacity(polygon.len() + 1);
        for i in 0..polygon.len() {
            let a = &polygon[i];
            let b = &polygon[(i + 1) % polygon.len()];
            let (da, db) = (dist(a), dist(b));
            if da >= 0.0 {
                out.push(*a);
            }
            if (da >= 0.0) != (db >= 0.0) {
                out.push(ClipVertex::lerp(a, b, da / (da - db)));
            }
        }
        polygon = out;
        if polygon.len() < 3 {
            return Vec::new();
        }
    }
    polygon
}

fn to_window(v: &ClipVertex, viewport: &Viewport, range: DepthRange) -> WindowVertex {
    let inv_w = 1.0 / v.position.w;
    let (nx, ny, nz) = (v.position.x * inv_w, v.position.y * inv_w, v.position.z * inv_w);
    WindowVertex {
        x: viewport.x + (nx * 0.5 + 0.5) * viewport.width,
        y: viewport.y + (ny * 0.5 + 0.5) * viewport.height,
        z: match range {
            DepthRange::NegativeOneToOne => nz * 0.5 + 0.5,
            DepthRange::ZeroToOne => nz,
        },
        inv_w,
        varyings: v.varyings,
    }
}

/// Rasterizes `triangles` into `surface`, calling `shade` for every covered pixel.
/// Returns the number of fragments written.
pub fn rasterize(
    surface: &mut Surface<'_>,
    viewport: &Viewport,
    state: &RasterState,
    range: DepthRange,
    triangles: &[[ClipVertex; 3]],
    shade: &mut dyn FnMut(&Fragment) -> Option<FragmentOutput>,
) -> u32 {
    let mut written = 0;
    for tri in triangles {
        let polygon = clip_near(tri, range);
        if polygon.len() < 3 {
            continue;
        }

        // Facing is decided in NDC so it does not depend on the viewport orientation.
        let ndc: Vec<(f32, f32)> = polygon
            .iter()
            .map(|v| (v.position.x / v.position.w, v.position.y / v.position.w))
            .collect();
        let ndc_area = (1..ndc.len() - 1)
            .map(|i| {
                let (a, b, c) = (ndc[0], ndc[i], ndc[i + 1]);
                (b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)
            })
            .sum::<f32>();
        let front_facing = ndc_area > 0.0;
        let culled = match state.cull {
            CullMode::None => false,
            CullMode::Back => !front_facing,
            CullMode::Front => front_facing,
        };
        if culled {
            continue;
        }

        let window: Vec<WindowVertex> = polygon
            .iter()
            .map(|v| to_window(v, viewport, range))
            .collect();
        for i in 1..window.len() - 1 {
            let tri = [window[0], window[i], window[i + 1]];
            written += match state.polygon {
                PolygonMode::Fill => fill_triangle(surface, state, &tri, front_facing, shade),
                PolygonMode::Line => {
                    // Only outline the original edges of the fan.
                    let mut n = 0;
                    if i == 1 {
                        n += draw_line(surface, state, &tri[0], &tri[1], front_facing, shade);
                    }
                    n += draw_line(surface, state, &tri[1], &tri[2], front_facing, shade);
                    if i == window.len() - 2 {
                        n += draw_line(surface, state, &tri[2], &tri[0], front_facing, shade);
                    }
                    n
                }
            };
        }
    }
    written
}

#[inline]
fn edge(a: &WindowVertex, b: &WindowVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn uv_density(tri: &[WindowVertex; 3], pixel_area: f32) -> f32 {
    let uv = |v: &WindowVertex| (v.varyings[UV], v.varyings[UV + 1]);
    let (a, b, c) = (uv(&tri[0]), uv(&tri[1]), uv(&tri[2]));
    let uv_area = ((b.0 - a.0) * (c.1 - a.1) - (c.0 - a.0) * (b.1 - a.1)).abs() * 0.5;
    if pixel_area <= 0.0 {
        0.0
    } else {
        uv_area / pixel_area
    }
}

fn fill_triangle(
    surface: &mut Surface<'_>,
    state: &RasterState,
    tri: &[WindowVertex; 3],
    front_facing: bool,
    shade: &mut dyn FnMut(&Fragment) -> Option<FragmentOutput>,
) -> u32 {
    let area = edge(&tri[0], &tri[1], tri[2].x, tri[2].y);
    if area.abs() < 1e-8 {
        return 0;
    }
    let density = uv_density(tri, area.abs() * 0.5);

    let min_x = tri.iter().map(|v| v.x).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = tri.iter().map(|v| v.y).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = tri.iter().map(|v| v.x).fold(f32::NEG_INFINITY, f32::max).ceil();
    let max_y = tri.iter().map(|v| v.y).fold(f32::NEG_INFINITY, f32::max).ceil();
    let max_x = (max_x.max(0.0) as u32).min(surface.width);
    let max_y = (max_y.max(0.0) as u32).min(surface.height);

    // Shared edges are owned by one triangle only (top-left rule on oriented edges).
    let sign = area.signum();
    let owns_edge = |a: &WindowVertex, b: &WindowVertex| {
        let (dx, dy) = ((b.x - a.x) * sign, (b.y - a.y) * sign);
        dy < 0.0 || (dy == 0.0 && dx > 0.0)
    };
    let owned = [
        owns_edge(&tri[1], &tri[2]),
        owns_edge(&tri[2], &tri[0]),
        owns_edge(&tri[0], &tri[1]),
    ];

    let mut written = 0;
    for y in min_y..max_y {
        for x in min_x..max_x {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let b = [
                edge(&tri[1], &tri[2], px, py) / area,
                edge(&tri[2], &tri[0], px, py) / area,
                edge(&tri[0], &tri[1], px, py) / area,
            ];
            let covered = (0..3).all(|i| b[i] > 0.0 || (b[i] == 0.0 && owned[i]));
            if !covered {
                continue;
            }

            let depth = b[0] * tri[0].z + b[1] * tri[1].z + b[2] * tri[2].z;
            let persp = [b[0] * tri[0].inv_w, b[1] * tri[1].inv_w, b[2] * tri[2].inv_w];
            let sum = persp[0] + persp[1] + persp[2];
            let mut varyings = [0.0; VARYINGS];
            for (i, v) in varyings.iter_mut().enumerate() {
                *v = (persp[0] * tri[0].varyings[i]
                    + persp[1] * tri[1].varyings[i]
                    + persp[2] * tri[2].varyings[i])
                    / sum;
            }
            let fragment = Fragment {
                x,
                y,
                depth,
                varyings,
                uv_density: density,
                front_facing,
            };
            if write_fragment(surface, state, &fragment, shade) {
                written += 1;
            }
        }
    }
    written
}

fn draw_line(
    surface: &mut Surface<'_>,
    state: &RasterState,
    a: &WindowVertex,
    b: &WindowVertex,
    front_facing: bool,
    shade: &mut dyn FnMut(&Fragment) -> Option<FragmentOutput>,
) -> u32 {
    let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as u32;
    let mut written = 0;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let (x, y) = (a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t);
        if x < 0.0 || y < 0.0 || x >= surface.width as f32 || y >= surface.height as f32 {
            continue;
        }
        let (pa, pb) = ((1.0 - t) * a.inv_w, t * b.inv_w);
        let mut varyings = [0.0; VARYINGS];
        for (k, v) in varyings.iter_mut().enumerate() {
            *v = (pa * a.varyings[k] + pb * b.varyings[k]) / (pa + pb);
        }
        let fragment = Fragment {
            x: x as u32,
            y: y as u32,
            depth: a.z + (b.z - a.z) * t,
            varyings,
            uv_density: 0.0,
            front_facing,
        };
        if write_fragment(surface, state, &fragment, shade) {
            written += 1;
        }
    }
    written
}

fn write_fragment(
    surface: &mut Surface<'_>,
    state: &RasterState,
    fragment: &Fragment,
    shade: &mut dyn FnMut(&Fragment) -> Option<FragmentOutput>,
) -> bool {
    const DEPTH_SLACK: f32 = 1e-5;
    if fragment.depth < -DEPTH_SLACK || fragment.depth > 1.0 + DEPTH_SLACK {
        return false;
    }
    let Some(out) = shade(fragment) else {
        return false;
    };
    let depth = out.depth.unwrap_or(fragment.depth).clamp(0.0, 1.0);
    let index = texel_index(fragment.x, fragment.y, surface.width);

    if let Some(depth_buffer) = surface.depth.as_deref_mut() {
        let Some(stored) = depth_buffer.get_mut(index) else {
            return false;
        };
        if !state.depth_compare.passes(depth, stored[0]) {
            return false;
        }
        if state.depth_write {
            stored[0] = depth;
        }
    }

    if let Some(color) = surface.color.as_deref_mut() {
        let Some(dst) = color.get_mut(index) else {
            return false;
        };
        let src = out.color;
        let blended = match state.blend {
            BlendMode::Opaque => src,
            BlendMode::Alpha => {
                let a = src[3].clamp(0.0, 1.0);
                [
                    src[0] * a + dst[0] * (1.0 - a),
                    src[1] * a + dst[1] * (1.0 - a),
                    src[2] * a + dst[2] * (1.0 - a),
                    a + dst[3] * (1.0 - a),
                ]
            }
        };
        *dst = blended.map(quantize);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_core::renderer::api::{CompareFunction, ShaderId};

    fn vertex(x: f32, y: f32, z: f32) -> ClipVertex {
        ClipVertex {
            position: Vec4::new(x, y, z, 1.0),
            varyings: [0.0; VARYINGS],
        }
    }

    fn red(_: &Fragment) -> Option<FragmentOutput> {
        Some(FragmentOutput {
            color: [1.0, 0.0, 0.0, 1.0],
            depth: None,
        })
    }

    fn render(
        tri: [ClipVertex; 3],
        state: RasterState,
        top_row_first: bool,
    ) -> (Vec<Texel>, u32) {
        let mut color = vec![[0.0; 4]; 16 * 16];
        let mut depth = vec![[1.0, 0.0, 0.0, 0.0]; 16 * 16];
        let mut surface = Surface {
            width: 16,
            height: 16,
            color: Some(&mut color),
            depth: Some(&mut depth),
        };
        let n = rasterize(
            &mut surface,
            &Viewport::full(16, 16, top_row_first),
            &state,
            DepthRange::ZeroToOne,
            &[tri],
            &mut red,
        );
        (color, n)
    }

    #[test]
    fn test_counter_clockwise_triangles_are_front_facing() {
        let ccw = [vertex(-1.0, -1.0, 0.5), vertex(1.0, -1.0, 0.5), vertex(0.0, 1.0, 0.5)];
        let state = RasterState::for_shader(ShaderId::Color);
        let (_, n) = render(ccw, state, false);
        assert!(n > 0);
        let cw = [ccw[0], ccw[2], ccw[1]];
        let (_, n) = render(cw, state, false);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_viewport_orientation_flips_rows() {
        // Upper half of NDC only.
        let tri = [vertex(-1.0, 0.1, 0.5), vertex(1.0, 0.1, 0.5), vertex(0.0, 1.0, 0.5)];
        let state = RasterState::for_shader(ShaderId::Color);
        let (top_first, _) = render(tri, state, true);
        let (bottom_first, _) = render(tri, state, false);
        assert_eq!(top_first[8][0], 1.0, "row 0 is the top on top-left targets");
        assert_eq!(bottom_first[8][0], 0.0);
        assert_eq!(bottom_first[15 * 16 + 8][0], 1.0);
    }

    #[test]
    fn test_near_plane_clips_geometry_behind_the_camera() {
        let tri = [vertex(-1.0, -1.0, -0.5), vertex(1.0, -1.0, -0.5), vertex(0.0, 1.0, -0.5)];
        let (_, n) = render(tri, RasterState::for_shader(ShaderId::Color), false);
        assert_eq!(n, 0);

        let partial = [vertex(-1.0, -1.0, -0.5), vertex(1.0, -1.0, 0.5), vertex(0.0, 1.0, 0.5)];
        let (_, n) = render(partial, RasterState::for_shader(ShaderId::Color), false);
        assert!(n > 0 && n < 128);
    }

    #[test]
    fn test_depth_test_rejects_farther_fragments() {
        let mut color = vec![[0.0; 4]; 4];
        let mut depth = vec![[0.2, 0.0, 0.0, 0.0]; 4];
        let mut surface = Surface {
            width: 2,
            height: 2,
            color: Some(&mut color),
            depth: Some(&mut depth),
        };
        let state = RasterState {
            depth_compare: CompareFunction::Less,
            ..RasterState::for_shader(ShaderId::Color)
        };
        let quad = [vertex(-1.0, -1.0, 0.5), vertex(3.0, -1.0, 0.5), vertex(-1.0, 3.0, 0.5)];
        let n = rasterize(
            &mut surface,
            &Viewport::full(2, 2, false),
            &state,
            DepthRange::ZeroToOne,
            &[quad],
            &mut red,
        );
        assert_eq!(n, 0);
        assert_eq!(color[0], [0.0; 4]);
    }

    #[test]
    fn test_shared_edges_are_drawn_once() {
        let mut count = vec![0u32; 8 * 8];
        let mut color = vec![[0.0; 4]; 64];
        let mut surface = Surface {
            width: 8,
            height: 8,
            color: Some(&mut color),
            depth: None,
        };
        let state = RasterState {
            cull: CullMode::None,
            ..RasterState::for_shader(ShaderId::Color)
        };
        let a = vertex(-1.0, -1.0, 0.5);
        let b = vertex(1.0, -1.0, 0.5);
        let c = vertex(1.0, 1.0, 0.5);
        let d = vertex(-1.0, 1.0, 0.5);
        let mut shade = |f: &Fragment| {
            count[(f.y * 8 + f.x) as usize] += 1;
            red(f)
        };
        rasterize(
            &mut surface,
            &Viewport::full(8, 8, false),
            &state,
            DepthRange::ZeroToOne,
            &[[a, b, c], [a, c, d]],
            &mut shade,
        );
        assert!(count.iter().all(|&n| n == 1));
    }
}
