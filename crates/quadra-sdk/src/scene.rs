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

//! Scene-side data the render engine draws: mesh data, materials and the closed set
//! of renderable components.

use quadra_core::math::{LinearRgba, Mat4, Vec2, Vec3, Vec4};
use quadra_core::renderer::api::{ClipVolume, ShaderId};
use slotmap::new_key_type;

new_key_type! {
    /// A mesh submitted to the engine.
    pub struct MeshHandle;
    /// A texture loaded by the engine.
    pub struct TextureHandle;
    /// An object placed in the scene.
    pub struct ObjectId;
}

/// CPU-side geometry, kept so meshes can be rebuilt on another backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// An axis-aligned quad in the XZ plane centered on the origin, facing +Y.
    pub fn plane(half_extent: f32) -> Self {
        let h = half_extent;
        Self {
            positions: vec![
                Vec3::new(-h, 0.0, -h),
                Vec3::new(-h, 0.0, h),
                Vec3::new(h, 0.0, h),
                Vec3::new(h, 0.0, -h),
            ],
            normals: vec![Vec3::Y; 4],
            tex_coords: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// A screen quad covering `[-1, 1]` in x and y, for HUD elements.
    pub fn quad() -> Self {
        Self {
            positions: vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            normals: vec![Vec3::Z; 4],
            tex_coords: vec![
                Vec2::new(0.0, 1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 0.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    /// A cube of edge `2 * half_extent` with outward normals, counter-clockwise faces.
    pub fn cube(half_extent: f32) -> Self {
        let h = half_extent;
        // (normal, tangent u, tangent v) per face
        let faces = [
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
        ];
        let mut data = MeshData::default();
        for (normal, u, v) in faces {
            let base = data.positions.len() as u32;
            let center = normal * h;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                data.positions.push(center + u * (su * h) + v * (sv * h));
                data.normals.push(normal);
                data.tex_coords
                    .push(Vec2::new((su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5));
            }
            data.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        data
    }

    /// The object-space bounds of the positions.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(min, max), p| {
            (
                Vec3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
                Vec3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
            )
        }))
    }
}

/// Surface parameters of a lit mesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub color: LinearRgba,
    pub specular_intensity: f32,
    pub shininess: f32,
    pub diffuse: Option<TextureHandle>,
    pub tiling: Vec2,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: LinearRgba::WHITE,
            specular_intensity: 0.0,
            shininess: 32.0,
            diffuse: None,
            tiling: Vec2::ONE,
        }
    }
}

impl Material {
    /// An untextured material of one color.
    pub fn solid(color: LinearRgba) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }
}

/// How opaque geometry is rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    #[default]
    Solid,
    /// Opaque meshes and terrain are drawn as edges with the wireframe shader.
    Wireframe,
}

/// A regular mesh, lit (`Default`) or unlit (`Color`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshComponent {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    pub material: Material,
    pub shader: ShaderId,
    pub casts_shadows: bool,
    pub clip: Option<ClipVolume>,
}

impl MeshComponent {
    /// A lit, shadow-casting mesh.
    pub fn lit(mesh: MeshHandle, transform: Mat4, material: Material) -> Self {
        Self {
            mesh,
            transform,
            material,
            shader: ShaderId::Default,
            casts_shadows: true,
            clip: None,
        }
    }

    /// An unlit mesh of one color.
    pub fn unlit(mesh: MeshHandle, transform: Mat4, color: LinearRgba) -> Self {
        Self {
            shader: ShaderId::Color,
            casts_shadows: false,
            ..Self::lit(mesh, transform, Material::solid(color))
        }
    }
}

/// A height-blended terrain with three texture layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainComponent {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    pub material: Material,
    pub layers: [Option<TextureHandle>; 3],
    pub layer_tiling: [f32; 3],
    pub min_height: f32,
    pub max_height: f32,
    pub blend_sharpness: f32,
}

/// A horizontal water surface with its own reflection and refraction targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaterComponent {
    pub mesh: MeshHandle,
    pub transform: Mat4,
    /// World height of the surface.
    pub height: f32,
    pub color: LinearRgba,
    pub distortion: Option<TextureHandle>,
    pub distortion_strength: f32,
    pub wave_speed: f32,
    /// Reflection weight against refraction.
    pub reflectivity: f32,
}

/// A cubemap drawn behind everything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyboxComponent {
    pub mesh: MeshHandle,
    pub cubemap: TextureHandle,
    pub tint: LinearRgba,
}

/// A screen-space overlay drawn last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HudComponent {
    pub mesh: MeshHandle,
    /// Maps the mesh into NDC.
    pub transform: Mat4,
    pub texture: Option<TextureHandle>,
    pub color: LinearRgba,
    /// xy uv offset, zw uv scale.
    pub uv_rect: Vec4,
}

/// The closed set of things the engine can draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderComponent {
    Mesh(MeshComponent),
    Terrain(TerrainComponent),
    Water(WaterComponent),
    Skybox(SkyboxComponent),
    Hud(HudComponent),
}

impl RenderComponent {
    /// The mesh the component draws.
    pub fn mesh(&self) -> MeshHandle {
        match self {
            RenderComponent::Mesh(c) => c.mesh,
            RenderComponent::Terrain(c) => c.mesh,
            RenderComponent::Water(c) => c.mesh,
            RenderComponent::Skybox(c) => c.mesh,
            RenderComponent::Hud(c) => c.mesh,
        }
    }

    /// The world transform, when the component lives in world space.
    pub fn world_transform(&self) -> Option<Mat4> {
        match self {
            RenderComponent::Mesh(c) => Some(c.transform),
            RenderComponent::Terrain(c) => Some(c.transform),
            RenderComponent::Water(c) => Some(c.transform),
            RenderComponent::Skybox(_) | RenderComponent::Hud(_) => None,
        }
    }

    /// Whether the component is drawn into shadow maps.
    pub fn casts_shadows(&self) -> bool {
        match self {
            RenderComponent::Mesh(c) => c.casts_shadows,
            RenderComponent::Terrain(_) => true,
            _ => false,
        }
    }

    /// Every texture the component samples.
    pub fn textures(&self) -> Vec<TextureHandle> {
        match self {
            RenderComponent::Mesh(c) => c.material.diffuse.into_iter().collect(),
            RenderComponent::Terrain(c) => c
                .material
                .diffuse
                .into_iter()
                .chain(c.layers.iter().flatten().copied())
                .collect(),
            RenderComponent::Water(c) => c.distortion.into_iter().collect(),
            RenderComponent::Skybox(c) => vec![c.cubemap],
            RenderComponent::Hud(c) => c.texture.into_iter().collect(),
        }
    }
}
