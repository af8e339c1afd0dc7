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

//! The shader programs of the software device.
//!
//! Each program is the device-side counterpart of one [`ShaderId`]: a vertex stage
//! producing clip-space positions and varyings, and a fragment stage producing a
//! color (and optionally a depth). Programs read their uniforms from the decoded
//! canonical payload and their textures from the draw's bound slots.

use super::image::{SoftImage, Texel};
use super::raster::{ClipVertex, Fragment, FragmentOutput, CLIP, NORMAL, UV, VARYINGS, WORLD};
use super::sampler::{lod_for, sample_2d, sample_cube};
use quadra_core::math::{saturate, Mat4, Vec2, Vec3, Vec4};
use quadra_core::renderer::api::{
    DefaultUniforms, DepthRange, GpuLight, SamplerDescriptor, UniformPayload, Vertex, MAX_LIGHTS,
};

/// Conventions of the backend a program was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramEnv {
    /// Render targets store their bottom row first.
    pub bottom_left: bool,
    pub depth_range: DepthRange,
}

/// A texture bound to a slot for the duration of a draw.
#[derive(Debug, Clone, Copy)]
pub struct BoundTexture<'a> {
    pub image: &'a SoftImage,
    pub sampler: &'a SamplerDescriptor,
}

impl BoundTexture<'_> {
    fn sample(&self, uv: Vec2, uv_density: f32) -> Vec4 {
        let lod = lod_for(self.image, uv_density);
        v4(sample_2d(self.image, 0, self.sampler, uv, lod))
    }

    fn sample_layer(&self, layer: u32, uv: Vec2) -> f32 {
        sample_2d(self.image, layer, self.sampler, uv, 0.0)[0]
    }
}

/// The texture slots of a draw, indexed by slot number.
pub type Slots<'a> = [Option<BoundTexture<'a>>];

fn slot<'a>(slots: &'a Slots<'a>, index: usize) -> Option<&'a BoundTexture<'a>> {
    slots.get(index).and_then(Option::as_ref)
}

#[inline]
fn v4(t: Texel) -> Vec4 {
    Vec4::new(t[0], t[1], t[2], t[3])
}

#[inline]
fn mul(a: Vec4, b: Vec4) -> Vec4 {
    Vec4::new(a.x * b.x, a.y * b.y, a.z * b.z, a.w * b.w)
}

/// Screen-space `v` of a render target for an NDC height.
#[inline]
pub fn rt_v(ndc_y: f32, bottom_left: bool) -> f32 {
    if bottom_left {
        0.5 + 0.5 * ndc_y
    } else {
        0.5 - 0.5 * ndc_y
    }
}

fn pack(world: Vec3, normal: Vec3, uv: Vec2, clip: Vec4) -> ClipVertex {
    let mut varyings = [0.0; VARYINGS];
    varyings[WORLD..WORLD + 3].copy_from_slice(&[world.x, world.y, world.z]);
    varyings[NORMAL..NORMAL + 3].copy_from_slice(&[normal.x, normal.y, normal.z]);
    varyings[UV..UV + 2].copy_from_slice(&[uv.x, uv.y]);
    varyings[CLIP..CLIP + 4].copy_from_slice(&clip.to_array());
    ClipVertex {
        position: clip,
        varyings,
    }
}

struct Inputs {
    world: Vec3,
    normal: Vec3,
    uv: Vec2,
    clip: Vec4,
}

fn unpack(f: &Fragment) -> Inputs {
    let v = &f.varyings;
    Inputs {
        world: Vec3::new(v[WORLD], v[WORLD + 1], v[WORLD + 2]),
        normal: Vec3::new(v[NORMAL], v[NORMAL + 1], v[NORMAL + 2]),
        uv: Vec2::new(v[UV], v[UV + 1]),
        clip: Vec4::new(v[CLIP], v[CLIP + 1], v[CLIP + 2], v[CLIP + 3]),
    }
}

fn point(v: &Vertex) -> Vec4 {
    Vec4::new(v.position[0], v.position[1], v.position[2], 1.0)
}

fn lit_vertex(u: &DefaultUniforms, v: &Vertex) -> ClipVertex {
    let world = u.model * point(v);
    let normal = u.normal_matrix * Vec4::new(v.normal[0], v.normal[1], v.normal[2], 0.0);
    let uv = Vec2::new(v.uv[0] * u.tiling.x, v.uv[1] * u.tiling.y);
    let clip = u.projection * (u.view * world);
    pack(world.truncate(), normal.truncate(), uv, clip)
}

fn basic_vertex(model: &Mat4, view_projection: Mat4, v: &Vertex) -> ClipVertex {
    let world = *model * point(v);
    let clip = view_projection * world;
    pack(world.truncate(), Vec3::ZERO, Vec2::new(v.uv[0], v.uv[1]), clip)
}

/// Runs the vertex stage of the program the payload belongs to.
pub fn run_vertex(payload: &UniformPayload, v: &Vertex) -> ClipVertex {
    match payload {
        UniformPayload::Color(u) => basic_vertex(&u.model, u.projection * u.view, v),
        UniformPayload::Wireframe(u) => basic_vertex(&u.model, u.projection * u.view, v),
        UniformPayload::Depth(u) => basic_vertex(&u.model, u.light_view_projection, v),
        UniformPayload::Default(u) => lit_vertex(u, v),
        UniformPayload::Terrain(u) => lit_vertex(&u.base, v),
        UniformPayload::Water(u) => lit_vertex(&u.base, v),
        UniformPayload::Hud(u) => {
            let clip = u.transform * point(v);
            let uv = Vec2::new(
                u.uv_rect.x + v.uv[0] * u.uv_rect.z,
                u.uv_rect.y + v.uv[1] * u.uv_rect.w,
            );
            pack(Vec3::ZERO, Vec3::ZERO, uv, clip)
        }
        UniformPayload::Skybox(u) => {
            let mut clip = u.projection * (u.view * point(v));
            // Pin the sky to the far plane.
            clip.z = clip.w;
            let direction = Vec3::new(v.position[0], v.position[1], v.position[2]);
            pack(direction, Vec3::ZERO, Vec2::ZERO, clip)
        }
    }
}

fn clipped_by_plane(world: Vec3, plane: Vec4) -> bool {
    let normal = plane.truncate();
    normal.length_squared() > 0.0 && world.dot(normal) + plane.w < 0.0
}

fn clipped_by_volume(world: Vec3, min: Vec4, max: Vec4) -> bool {
    min.w > 0.5
        && (world.x < min.x
            || world.y < min.y
            || world.z < min.z
            || world.x > max.x
            || world.y > max.y
            || world.z > max.z)
}

fn discarded(u: &DefaultUniforms, world: Vec3) -> bool {
    clipped_by_plane(world, u.clip_plane) || clipped_by_volume(world, u.clip_min, u.clip_max)
}

fn output(color: Vec4) -> Option<FragmentOutput> {
    Some(FragmentOutput {
        color: color.to_array(),
        depth: None,
    })
}

/// Runs the fragment stage; `None` discards the fragment.
pub fn run_fragment(
    payload: &UniformPayload,
    f: &Fragment,
    slots: &Slots<'_>,
    env: &ProgramEnv,
) -> Option<FragmentOutput> {
    let inputs = unpack(f);
    match payload {
        UniformPayload::Color(u) => {
            if clipped_by_plane(inputs.world, u.clip_plane) {
                return None;
            }
            output(u.color)
        }
        UniformPayload::Wireframe(u) => output(u.color),
        UniformPayload::Depth(u) => {
            let depth = (u.light_position.w > 0.5 && u.params.x > 0.0)
                .then(|| (inputs.world - u.light_position.truncate()).length() / u.params.x);
            Some(FragmentOutput {
                color: [0.0, 0.0, 0.0, 1.0],
                depth,
            })
        }
        UniformPayload::Hud(u) => {
            let texel = slot(slots, 0)
                .map(|t| t.sample(inputs.uv, f.uv_density))
                .unwrap_or(Vec4::new(1.0, 1.0, 1.0, 1.0));
            let color = mul(texel, u.color);
            if color.w <= 0.0 {
                return None;
            }
            output(color)
        }
        UniformPayload::Skybox(u) => {
            let sky = slot(slots, 0)
                .map(|t| v4(sample_cube(t.image, 0, t.sampler, inputs.world, false)))
                .unwrap_or(Vec4::new(1.0, 1.0, 1.0, 1.0));
            output(mul(sky, u.tint))
        }
        UniformPayload::Default(u) => {
            if discarded(u, inputs.world) {
                return None;
            }
            let mut base = u.material_color;
            if u.material_specular.z > 0.5 {
                if let Some(diffuse) = slot(slots, 0) {
                    base = mul(base, diffuse.sample(inputs.uv, f.uv_density));
                }
            }
            let shadows = Shadows {
                atlas: slot(slots, 1),
                cube: slot(slots, 2),
            };
            output(shade_lit(u, base, &inputs, &shadows, env))
        }
        UniformPayload::Terrain(u) => {
            let base_u = &u.base;
            if discarded(base_u, inputs.world) {
                return None;
            }
            let (min, max) = (u.heights.x, u.heights.y);
            let t = if max > min {
                saturate((inputs.world.y - min) / (max - min))
            } else {
                0.0
            };
            let sharpness = u.heights.z.max(1.0);
            let low = saturate((0.5 - t) * 2.0 * sharpness);
            let high = saturate((t - 0.5) * 2.0 * sharpness);
            let weights = [low, (1.0 - low - high).max(0.0), high];

            let mut blended = Vec4::ZERO;
            for (layer, weight) in weights.iter().enumerate() {
                if *weight <= 0.0 {
                    continue;
                }
                let tiling = match u.layer_tiling[layer] {
                    t if t > 0.0 => t,
                    _ => 1.0,
                };
                let texel = slot(slots, layer)
                    .map(|tex| tex.sample(inputs.uv * tiling, f.uv_density * tiling * tiling))
                    .unwrap_or(Vec4::new(1.0, 1.0, 1.0, 1.0));
                blended = blended + texel * *weight;
            }
            let base = mul(blended, base_u.material_color);
            let shadows = Shadows {
                atlas: slot(slots, 3),
                cube: slot(slots, 4),
            };
            output(shade_lit(base_u, base, &inputs, &shadows, env))
        }
        UniformPayload::Water(u) => {
            let base_u = &u.base;
            if discarded(base_u, inputs.world) {
                return None;
            }
            let ndc = if inputs.clip.w.abs() > 1e-6 {
                Vec2::new(inputs.clip.x / inputs.clip.w, inputs.clip.y / inputs.clip.w)
            } else {
                Vec2::ZERO
            };
            let (strength, speed, time) = (u.wave.x, u.wave.y, u.wave.z);
            let offset = slot(slots, 2)
                .map(|t| {
                    let scroll = Vec2::new(time * speed, time * speed * 0.5);
                    let d = t.sample(inputs.uv + scroll, f.uv_density);
                    Vec2::new((d.x * 2.0 - 1.0) * strength, (d.y * 2.0 - 1.0) * strength)
                })
                .unwrap_or(Vec2::ZERO);

            let u_screen = 0.5 + 0.5 * ndc.x + offset.x;
            let reflection_uv = Vec2::new(u_screen, rt_v(-ndc.y, env.bottom_left) + offset.y);
            let refraction_uv = Vec2::new(u_screen, rt_v(ndc.y, env.bottom_left) + offset.y);
            let tint = u.water_color;
            let reflection = slot(slots, 0)
                .map(|t| t.sample(reflection_uv, 0.0))
                .unwrap_or(tint);
            let refraction = slot(slots, 1)
                .map(|t| t.sample(refraction_uv, 0.0))
                .unwrap_or(tint);
            let mixed = Vec4::lerp(refraction, reflection, saturate(u.wave.w));
            let water = Vec4::lerp(mixed, tint, 0.25);
            let base = Vec4::new(water.x, water.y, water.z, tint.w);
            let shadows = Shadows {
                atlas: slot(slots, 3),
                cube: None,
            };
            output(shade_lit(base_u, base, &inputs, &shadows, env))
        }
    }
}

struct Shadows<'a> {
    atlas: Option<&'a BoundTexture<'a>>,
    cube: Option<&'a BoundTexture<'a>>,
}

fn shadow_factor(
    light: &GpuLight,
    world: Vec3,
    bias: f32,
    shadows: &Shadows<'_>,
    env: &ProgramEnv,
) -> f32 {
    if light.params.y < 0.5 {
        return 1.0;
    }
    let layer = light.params.z.max(0.0) as u32;
    let is_point = light.position.w > 0.5 && light.position.w < 1.5;

    if is_point {
        let Some(cube) = shadows.cube else {
            return 1.0;
        };
        let to_fragment = world - light.position.truncate();
        let range = light.direction.w.max(1e-4);
        let current = to_fragment.length() / range;
        let stored = sample_cube(cube.image, layer, cube.sampler, to_fragment, !env.bottom_left)[0];
        return if current - bias > stored { 0.0 } else { 1.0 };
    }

    let Some(atlas) = shadows.atlas else {
        return 1.0;
    };
    let p = light.view_projection * world.extend(1.0);
    if p.w <= 0.0 {
        return 1.0;
    }
    let ndc = Vec3::new(p.x / p.w, p.y / p.w, p.z / p.w);
    let current = match env.depth_range {
        DepthRange::NegativeOneToOne => ndc.z * 0.5 + 0.5,
        DepthRange::ZeroToOne => ndc.z,
    };
    if current > 1.0 {
        return 1.0;
    }
    let uv = Vec2::new(0.5 + 0.5 * ndc.x, rt_v(ndc.y, env.bottom_left));
    let stored = atlas.sample_layer(layer, uv);
    if current - bias > stored {
        0.0
    } else {
        1.0
    }
}

/// Ambient plus Lambert diffuse and Blinn-Phong specular over the active lights.
fn shade_lit(
    u: &DefaultUniforms,
    base: Vec4,
    inputs: &Inputs,
    shadows: &Shadows<'_>,
    env: &ProgramEnv,
) -> Vec4 {
    let n = inputs.normal.normalize();
    let view_dir = (u.camera_position.truncate() - inputs.world).normalize();
    let albedo = base.truncate();
    let mut color = albedo * u.ambient.truncate();

    let count = (u.light_info.x.max(0.0) as usize).min(MAX_LIGHTS);
    let use_shadows = u.light_info.y > 0.5;
    let bias = u.light_info.z;
    let (spec_intensity, shininess) = (u.material_specular.x, u.material_specular.y.max(1.0));

    for light in &u.lights[..count] {
        let light_color = light.color.truncate() * light.color.w;
        let (to_light, attenuation) = match light.position.w as u32 {
            0 => (-light.direction.truncate().normalize(), 1.0),
            kind => {
                let d = light.position.truncate() - inputs.world;
                let distance = d.length();
                let range = light.direction.w.max(1e-4);
                let falloff = saturate(1.0 - distance / range);
                let mut attenuation = falloff * falloff;
                let l = d.normalize();
                if kind == 2 {
                    let cos_theta = (-l).dot(light.direction.truncate().normalize());
                    let (cos_outer, cos_inner) = (light.params.x, light.params.w);
                    let span = (cos_inner - cos_outer).max(1e-4);
                    attenuation *= saturate((cos_theta - cos_outer) / span);
                }
                (l, attenuation)
            }
        };
        if attenuation <= 0.0 {
            continue;
        }

        let diffuse = n.dot(to_light).max(0.0);
        if diffuse <= 0.0 {
            continue;
        }
        let half = (to_light + view_dir).normalize();
        let specular = n.dot(half).max(0.0).powf(shininess) * spec_intensity;
        let shadow = if use_shadows {
            shadow_factor(light, inputs.world, bias, shadows, env)
        } else {
            1.0
        };
        let contribution = (albedo * diffuse + Vec3::ONE * specular) * light_color;
        color += contribution * (attenuation * shadow);
    }
    color.extend(base.w)
}
