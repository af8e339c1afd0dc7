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

//! Texture sampling: addressing, filtering, mip selection and cube face lookup.

use super::image::{texel_index, SoftImage, Texel};
use quadra_core::math::{Vec2, Vec3};
use quadra_core::renderer::api::{AddressMode, FilterMode, SamplerDescriptor};

/// Resolves an integer texel coordinate; `None` means "use the border color".
fn address(i: i64, n: u32, mode: AddressMode) -> Option<u32> {
    let n = n as i64;
    match mode {
        AddressMode::Repeat => Some(i.rem_euclid(n) as u32),
        AddressMode::MirrorRepeat => {
            let m = i.rem_euclid(2 * n);
            Some(if m >= n { 2 * n - 1 - m } else { m } as u32)
        }
        AddressMode::ClampToEdge => Some(i.clamp(0, n - 1) as u32),
        AddressMode::ClampToBorder => (0..n).contains(&i).then_some(i as u32),
    }
}

fn border(sampler: &SamplerDescriptor) -> Texel {
    sampler
        .border_color
        .map(|b| b.to_array())
        .unwrap_or([0.0; 4])
}

fn fetch(image: &SoftImage, layer: u32, mip: u32, sampler: &SamplerDescriptor, x: i64, y: i64) -> Texel {
    let (w, h) = image.extent(mip);
    let level = image.level(layer, mip);
    match (
        address(x, w, sampler.address_mode_u),
        address(y, h, sampler.address_mode_v),
    ) {
        (Some(x), Some(y)) => level
            .get(texel_index(x, y, w))
            .copied()
            .unwrap_or([0.0; 4]),
        _ => border(sampler),
    }
}

fn lerp(a: Texel, b: Texel, t: f32) -> Texel {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

fn sample_level(
    image: &SoftImage,
    layer: u32,
    mip: u32,
    sampler: &SamplerDescriptor,
    uv: Vec2,
    filter: FilterMode,
) -> Texel {
    let (w, h) = image.extent(mip);
    match filter {
        FilterMode::Nearest => {
            let x = (uv.x * w as f32).floor() as i64;
            let y = (uv.y * h as f32).floor() as i64;
            fetch(image, layer, mip, sampler, x, y)
        }
        FilterMode::Linear => {
            let fx = uv.x * w as f32 - 0.5;
            let fy = uv.y * h as f32 - 0.5;
            let (x0, y0) = (fx.floor(), fy.floor());
            let (tx, ty) = (fx - x0, fy - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);
            let top = lerp(
                fetch(image, layer, mip, sampler, x0, y0),
                fetch(image, layer, mip, sampler, x0 + 1, y0),
                tx,
            );
            let bottom = lerp(
                fetch(image, layer, mip, sampler, x0, y0 + 1),
                fetch(image, layer, mip, sampler, x0 + 1, y0 + 1),
                tx,
            );
            lerp(top, bottom, ty)
        }
    }
}

/// The level of detail for a triangle covering `uv_density` uv-units² per pixel.
pub fn lod_for(image: &SoftImage, uv_density: f32) -> f32 {
    let texels = uv_density * image.width as f32 * image.height as f32;
    if texels <= 0.0 || !texels.is_finite() {
        0.0
    } else {
        0.5 * texels.log2()
    }
}

/// Samples one layer of a 2D image.
pub fn sample_2d(image: &SoftImage, layer: u32, sampler: &SamplerDescriptor, uv: Vec2, lod: f32) -> Texel {
    if layer >= image.layers {
        return border(sampler);
    }
    if lod <= 0.0 || image.mips == 1 {
        let mip = 0;
        let filter = if lod <= 0.0 { sampler.mag_filter } else { sampler.min_filter };
        return sample_level(image, layer, mip, sampler, uv, filter);
    }

    let max = (image.mips - 1) as f32;
    let lod = lod.min(max);
    match sampler.mipmap_filter {
        FilterMode::Nearest => {
            let mip = lod.round() as u32;
            sample_level(image, layer, mip, sampler, uv, sampler.min_filter)
        }
        FilterMode::Linear => {
            let lo = lod.floor();
            let t = lod - lo;
            let a = sample_level(image, layer, lo as u32, sampler, uv, sampler.min_filter);
            if t <= 0.0 {
                return a;
            }
            let b = sample_level(image, layer, (lo as u32 + 1).min(image.mips - 1), sampler, uv, sampler.min_filter);
            lerp(a, b, t)
        }
    }
}

/// Maps a direction to a cube face (`+X, -X, +Y, -Y, +Z, -Z`) and face coordinates in `[0, 1]`.
pub fn cube_face(dir: Vec3) -> (u32, Vec2) {
    let (ax, ay, az) = (dir.x.abs(), dir.y.abs(), dir.z.abs());
    let (face, sc, tc, ma) = if ax >= ay && ax >= az {
        if dir.x >= 0.0 {
            (0, -dir.z, -dir.y, ax)
        } else {
            (1, dir.z, -dir.y, ax)
        }
    } else if ay >= az {
        if dir.y >= 0.0 {
            (2, dir.x, dir.z, ay)
        } else {
            (3, dir.x, -dir.z, ay)
        }
    } else if dir.z >= 0.0 {
        (4, dir.x, -dir.y, az)
    } else {
        (5, -dir.x, -dir.y, az)
    };
    if ma <= 0.0 {
        return (0, Vec2::new(0.5, 0.5));
    }
    (face, Vec2::new(0.5 * (sc / ma + 1.0), 0.5 * (tc / ma + 1.0)))
}

/// Samples cube `cube` of a cube or cube-array image along `dir`.
///
/// `flip_t` is set for render-target cubes stored top row first.
pub fn sample_cube(
    image: &SoftImage,
    cube: u32,
    sampler: &SamplerDescriptor,
    dir: Vec3,
    flip_t: bool,
) -> Texel {
    let (face, mut st) = cube_face(dir);
    if flip_t {
        st.y = 1.0 - st.y;
    }
    let edge = SamplerDescriptor {
        address_mode_u: AddressMode::ClampToEdge,
        address_mode_v: AddressMode::ClampToEdge,
        ..*sampler
    };
    sample_2d(image, cube * 6 + face, &edge, st, 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use quadra_core::math::Extent3D;
    use quadra_core::renderer::api::*;

    fn image(w: u32, h: u32, layers: u32, texels: &[Texel]) -> SoftImage {
        let descriptor = TextureDescriptor {
            label: None,
            size: Extent3D {
                width: w,
                height: h,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            format: TextureFormat::Rgba8Unorm,
            dimension: TextureDimension::D2,
            usage: TextureUsage::SAMPLED,
        };
        let mut image = SoftImage::new(&descriptor, ImageState::ShaderRead, false);
        for layer in 0..layers {
            image.level_mut(layer, 0).copy_from_slice(texels);
        }
        image
    }

    const BLACK: Texel = [0.0, 0.0, 0.0, 1.0];
    const WHITE: Texel = [1.0, 1.0, 1.0, 1.0];

    #[test]
    fn test_address_modes() {
        assert_eq!(address(-1, 4, AddressMode::Repeat), Some(3));
        assert_eq!(address(4, 4, AddressMode::MirrorRepeat), Some(3));
        assert_eq!(address(-1, 4, AddressMode::MirrorRepeat), Some(0));
        assert_eq!(address(9, 4, AddressMode::ClampToEdge), Some(3));
        assert_eq!(address(4, 4, AddressMode::ClampToBorder), None);
    }

    #[test]
    fn test_bilinear_blends_neighbours() {
        let img = image(2, 1, 1, &[BLACK, WHITE]);
        let sampler = SamplerDescriptor::default();
        let mid = sample_2d(&img, 0, &sampler, Vec2::new(0.5, 0.5), 0.0);
        assert_relative_eq!(mid[0], 0.5);

        let nearest = SamplerDescriptor {
            mag_filter: FilterMode::Nearest,
            ..sampler
        };
        assert_eq!(sample_2d(&img, 0, &nearest, Vec2::new(0.9, 0.5), 0.0), WHITE);
    }

    #[test]
    fn test_border_color_outside_the_image() {
        let img = image(1, 1, 1, &[BLACK]);
        let sampler = sampler_policy(TextureFlags::RENDER_TARGET, TextureDimension::D2Array);
        assert_eq!(sample_2d(&img, 0, &sampler, Vec2::new(1.5, 0.5), 0.0), WHITE);
        assert_eq!(sample_2d(&img, 0, &sampler, Vec2::new(0.5, 0.5), 0.0), BLACK);
    }

    #[test]
    fn test_cube_faces_follow_axis_convention() {
        assert_eq!(cube_face(Vec3::X).0, 0);
        assert_eq!(cube_face(-Vec3::X).0, 1);
        assert_eq!(cube_face(Vec3::Y).0, 2);
        assert_eq!(cube_face(-Vec3::Y).0, 3);
        assert_eq!(cube_face(Vec3::Z).0, 4);
        assert_eq!(cube_face(-Vec3::Z).0, 5);

        let (_, st) = cube_face(Vec3::new(1.0, 1.0, 0.0).normalize() + Vec3::new(0.01, 0.0, 0.0));
        assert!(st.y < 0.05, "looking up from +X lands at the top row");
    }

    #[test]
    fn test_cube_samples_pick_the_face_layer() {
        let mut texels = Vec::new();
        for face in 0..6 {
            texels.push([face as f32 / 10.0, 0.0, 0.0, 1.0]);
        }
        let mut img = image(1, 1, 6, &[BLACK]);
        for (face, t) in texels.iter().enumerate() {
            img.level_mut(face as u32, 0)[0] = *t;
        }
        let sampler = SamplerDescriptor::default();
        let t = sample_cube(&img, 0, &sampler, -Vec3::Z, false);
        assert_relative_eq!(t[0], 0.5);
    }
}
