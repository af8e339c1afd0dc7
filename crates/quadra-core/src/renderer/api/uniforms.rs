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

//! Canonical uniform schemas, their validated layouts and per-backend binding tables.
//!
//! Every shader identity owns exactly one `repr(C)` payload struct. Backends never
//! declare their own copies: binding tables are derived from these schemas and
//! checked against them when a shader is created.

use super::backend::DescriptorModel;
use super::shader::ShaderId;
use crate::math::{Mat4, Vec4};
use crate::renderer::error::ShaderError;
use std::fmt;
use std::mem::{offset_of, size_of};

/// The maximum number of lights a lit shader evaluates.
pub const MAX_LIGHTS: usize = 8;

/// A light as seen by shaders.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct GpuLight {
    /// xyz world position, w light type (0 directional, 1 point, 2 spot).
    pub position: Vec4,
    /// xyz direction, w range.
    pub direction: Vec4,
    /// rgb color, a intensity.
    pub color: Vec4,
    /// x cos(outer cone), y 1 if shadowed, z shadow layer, w cos(inner cone).
    pub params: Vec4,
    /// Light view-projection for shadow lookups.
    pub view_projection: Mat4,
}

/// The payload shared by the lit shaders. Terrain and water embed it as a prefix.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DefaultUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub normal_matrix: Mat4,
    /// xyz camera position, w time in seconds.
    pub camera_position: Vec4,
    /// xyz minimum corner, w 1 when the clip volume is enabled.
    pub clip_min: Vec4,
    pub clip_max: Vec4,
    /// Plane equation; fragments with `dot(p, xyz) + w < 0` are discarded. Zero disables.
    pub clip_plane: Vec4,
    pub material_color: Vec4,
    /// x specular intensity, y shininess, z 1 when a diffuse texture is bound.
    pub material_specular: Vec4,
    /// rgb ambient color premultiplied by intensity.
    pub ambient: Vec4,
    /// xy texture tiling.
    pub tiling: Vec4,
    /// x light count, y 1 when shadows are sampled, z shadow bias.
    pub light_info: Vec4,
    pub lights: [GpuLight; MAX_LIGHTS],
}

/// Terrain payload: the default payload plus height blending parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct TerrainUniforms {
    pub base: DefaultUniforms,
    /// x min height, y max height, z blend sharpness.
    pub heights: Vec4,
    /// Per-layer tiling for the three layers.
    pub layer_tiling: Vec4,
}

/// Water payload: the default payload plus wave parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct WaterUniforms {
    pub base: DefaultUniforms,
    /// x distortion strength, y wave speed, z time, w reflectivity.
    pub wave: Vec4,
    pub water_color: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct ColorUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub color: Vec4,
    pub clip_plane: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DepthUniforms {
    pub model: Mat4,
    pub light_view_projection: Mat4,
    /// xyz light position, w 1 for point lights (linear distance depth).
    pub light_position: Vec4,
    /// x far plane of point lights.
    pub params: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct HudUniforms {
    /// Maps the quad into NDC.
    pub transform: Mat4,
    pub color: Vec4,
    /// xy uv offset, zw uv scale.
    pub uv_rect: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct SkyboxUniforms {
    /// The camera view with its translation removed.
    pub view: Mat4,
    pub projection: Mat4,
    pub tint: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct WireframeUniforms {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub color: Vec4,
}

/// A complete uniform payload, tagged with the shader it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformPayload {
    Color(ColorUniforms),
    Default(DefaultUniforms),
    Depth(DepthUniforms),
    Hud(HudUniforms),
    Skybox(SkyboxUniforms),
    Terrain(TerrainUniforms),
    Water(WaterUniforms),
    Wireframe(WireframeUniforms),
}

impl UniformPayload {
    /// The shader this payload is laid out for.
    pub fn shader(&self) -> ShaderId {
        match self {
            UniformPayload::Color(_) => ShaderId::Color,
            UniformPayload::Default(_) => ShaderId::Default,
            UniformPayload::Depth(_) => ShaderId::Depth,
            UniformPayload::Hud(_) => ShaderId::Hud,
            UniformPayload::Skybox(_) => ShaderId::Skybox,
            UniformPayload::Terrain(_) => ShaderId::Terrain,
            UniformPayload::Water(_) => ShaderId::Water,
            UniformPayload::Wireframe(_) => ShaderId::Wireframe,
        }
    }

    /// The raw bytes as they are written to the uniform buffer.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            UniformPayload::Color(u) => bytemuck::bytes_of(u),
            UniformPayload::Default(u) => bytemuck::bytes_of(u),
            UniformPayload::Depth(u) => bytemuck::bytes_of(u),
            UniformPayload::Hud(u) => bytemuck::bytes_of(u),
            UniformPayload::Skybox(u) => bytemuck::bytes_of(u),
            UniformPayload::Terrain(u) => bytemuck::bytes_of(u),
            UniformPayload::Water(u) => bytemuck::bytes_of(u),
            UniformPayload::Wireframe(u) => bytemuck::bytes_of(u),
        }
    }

    /// Decodes a payload from buffer bytes, checking the size against the schema.
    pub fn from_bytes(shader: ShaderId, bytes: &[u8]) -> Result<Self, ShaderError> {
        validate_uniform_payload(shader, bytes)?;
        Ok(match shader {
            ShaderId::Color => UniformPayload::Color(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Default => UniformPayload::Default(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Depth => UniformPayload::Depth(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Hud => UniformPayload::Hud(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Skybox => UniformPayload::Skybox(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Terrain => UniformPayload::Terrain(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Water => UniformPayload::Water(bytemuck::pod_read_unaligned(bytes)),
            ShaderId::Wireframe => {
                UniformPayload::Wireframe(bytemuck::pod_read_unaligned(bytes))
            }
        })
    }
}

/// One field of a uniform schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    pub name: &'static str,
    pub offset: usize,
    pub size: usize,
}

/// The byte layout of a shader's uniform schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub shader: ShaderId,
    pub size: usize,
    pub fields: Vec<UniformField>,
    /// A schema this one embeds at offset zero.
    pub prefix: Option<ShaderId>,
}

fn field_size<T, F>(_: impl Fn(&T) -> &F) -> usize {
    size_of::<F>()
}

macro_rules! uniform_layout {
    ($shader:expr, $prefix:expr, $ty:ty { $($field:ident),* $(,)? }) => {
        UniformLayout {
            shader: $shader,
            size: size_of::<$ty>(),
            fields: vec![$(UniformField {
                name: stringify!($field),
                offset: offset_of!($ty, $field),
                size: field_size(|u: &$ty| &u.$field),
            }),*],
            prefix: $prefix,
        }
    };
}

/// The layout of `shader`'s canonical schema.
pub fn uniform_layout(shader: ShaderId) -> UniformLayout {
    match shader {
        ShaderId::Color => uniform_layout!(shader, None, ColorUniforms {
            model, view, projection, color, clip_plane
        }),
        ShaderId::Default => uniform_layout!(shader, None, DefaultUniforms {
            model, view, projection, normal_matrix, camera_position, clip_min, clip_max,
            clip_plane, material_color, material_specular, ambient, tiling, light_info, lights
        }),
        ShaderId::Depth => uniform_layout!(shader, None, DepthUniforms {
            model, light_view_projection, light_position, params
        }),
        ShaderId::Hud => uniform_layout!(shader, None, HudUniforms { transform, color, uv_rect }),
        ShaderId::Skybox => uniform_layout!(shader, None, SkyboxUniforms { view, projection, tint }),
        ShaderId::Terrain => uniform_layout!(shader, Some(ShaderId::Default), TerrainUniforms {
            base, heights, layer_tiling
        }),
        ShaderId::Water => uniform_layout!(shader, Some(ShaderId::Default), WaterUniforms {
            base, wave, water_color
        }),
        ShaderId::Wireframe => uniform_layout!(shader, None, WireframeUniforms {
            model, view, projection, color
        }),
    }
}

/// Checks that a layout is tightly packed, 16-byte aligned and embeds its prefix at offset zero.
pub fn validate_uniform_layout(layout: &UniformLayout) -> Result<(), ShaderError> {
    let fail = |details: String| ShaderError::LayoutMismatch {
        shader: layout.shader,
        details,
    };

    let mut cursor = 0;
    for field in &layout.fields {
        if field.offset != cursor {
            return Err(fail(format!(
                "field '{}' at offset {} but previous field ends at {}",
                field.name, field.offset, cursor
            )));
        }
        if field.offset % 16 != 0 {
            return Err(fail(format!("field '{}' is not 16-byte aligned", field.name)));
        }
        cursor = field.offset + field.size;
    }
    if cursor != layout.size {
        return Err(fail(format!(
            "fields cover {cursor} bytes of a {}-byte schema",
            layout.size
        )));
    }

    if let Some(prefix) = layout.prefix {
        let inner = uniform_layout(prefix);
        match layout.fields.first() {
            Some(first) if first.offset == 0 && first.size == inner.size => {}
            _ => {
                return Err(fail(format!(
                    "schema must embed '{prefix}' ({} bytes) at offset 0",
                    inner.size
                )))
            }
        }
    }
    Ok(())
}

/// Checks that `bytes` has exactly the size of `shader`'s schema.
pub fn validate_uniform_payload(shader: ShaderId, bytes: &[u8]) -> Result<(), ShaderError> {
    let expected = uniform_layout(shader).size;
    if bytes.len() != expected {
        return Err(ShaderError::LayoutMismatch {
            shader,
            details: format!("payload is {} bytes, schema is {expected}", bytes.len()),
        });
    }
    Ok(())
}

/// The named texture slots of each shader, in slot order.
pub fn texture_slot_names(shader: ShaderId) -> &'static [&'static str] {
    match shader {
        ShaderId::Color | ShaderId::Depth | ShaderId::Wireframe => &[],
        ShaderId::Default => &["diffuse", "shadow_atlas", "shadow_cube"],
        ShaderId::Hud => &["hud"],
        ShaderId::Skybox => &["skybox"],
        ShaderId::Terrain => &["layer0", "layer1", "layer2", "shadow_atlas", "shadow_cube"],
        ShaderId::Water => &["reflection", "refraction", "distortion", "shadow_atlas"],
    }
}

/// HLSL-style register classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// `b#`: constant buffers.
    ConstantBuffer,
    /// `t#`: shader resource views.
    ShaderResource,
    /// `s#`: samplers.
    Sampler,
}

/// Where a named slot lives in a backend's binding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingPoint {
    /// A uniform block binding index.
    UniformBlock(u32),
    /// A texture unit.
    TextureUnit(u32),
    /// A descriptor set binding.
    SetBinding {
        /// Descriptor set index.
        set: u32,
        /// Binding within the set.
        binding: u32,
    },
    /// A register.
    Register {
        /// Register class.
        class: RegisterClass,
        /// Register index.
        index: u32,
    },
}

impl fmt::Display for BindingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingPoint::UniformBlock(i) => write!(f, "block {i}"),
            BindingPoint::TextureUnit(i) => write!(f, "unit {i}"),
            BindingPoint::SetBinding { set, binding } => write!(f, "set={set},binding={binding}"),
            BindingPoint::Register { class, index } => {
                let c = match class {
                    RegisterClass::ConstantBuffer => 'b',
                    RegisterClass::ShaderResource => 't',
                    RegisterClass::Sampler => 's',
                };
                write!(f, "{c}{index}")
            }
        }
    }
}

/// What a named slot binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// The shader's uniform payload.
    Uniforms,
    /// The texture at this slot index.
    Texture(u32),
}

/// One named slot and its binding points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotBinding {
    pub name: &'static str,
    pub kind: SlotKind,
    /// Textures need a view and a sampler register on register-based backends.
    pub points: Vec<BindingPoint>,
}

/// The mapping from a shader's named slots to a backend's binding points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingTable {
    pub shader: ShaderId,
    /// Expected uniform payload size, taken from the canonical schema.
    pub uniform_size: usize,
    pub slots: Vec<SlotBinding>,
}

impl BindingTable {
    /// Derives the binding table of `shader` for a descriptor model.
    pub fn for_backend(shader: ShaderId, model: DescriptorModel) -> Self {
        let uniform_point = match model {
            DescriptorModel::TextureUnits => BindingPoint::UniformBlock(0),
            DescriptorModel::PerFramePool => BindingPoint::SetBinding { set: 0, binding: 0 },
            DescriptorModel::PerFrameHeapRegion | DescriptorModel::PersistentHeap => {
                BindingPoint::Register {
                    class: RegisterClass::ConstantBuffer,
                    index: 0,
                }
            }
        };
        let mut slots = vec![SlotBinding {
            name: "uniforms",
            kind: SlotKind::Uniforms,
            points: vec![uniform_point],
        }];

        for (i, name) in texture_slot_names(shader).iter().enumerate() {
            let i = i as u32;
            let points = match model {
                DescriptorModel::TextureUnits => vec![BindingPoint::TextureUnit(i)],
                DescriptorModel::PerFramePool => vec![BindingPoint::SetBinding { set: 1, binding: i }],
                DescriptorModel::PerFrameHeapRegion | DescriptorModel::PersistentHeap => vec![
                    BindingPoint::Register {
                        class: RegisterClass::ShaderResource,
                        index: i,
                    },
                    BindingPoint::Register {
                        class: RegisterClass::Sampler,
                        index: i,
                    },
                ],
            };
            slots.push(SlotBinding {
                name,
                kind: SlotKind::Texture(i),
                points,
            });
        }

        Self {
            shader,
            uniform_size: uniform_layout(shader).size,
            slots,
        }
    }

    /// The slot index of a named texture.
    pub fn texture_slot(&self, name: &str) -> Option<u32> {
        self.slots.iter().find_map(|s| match s.kind {
            SlotKind::Texture(i) if s.name == name => Some(i),
            _ => None,
        })
    }

    /// Number of texture slots.
    pub fn texture_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.kind, SlotKind::Texture(_)))
            .count()
    }

    /// Checks the table against the canonical schema and for binding collisions.
    pub fn validate(&self) -> Result<(), ShaderError> {
        let layout = uniform_layout(self.shader);
        validate_uniform_layout(&layout)?;
        if layout.size != self.uniform_size {
            return Err(ShaderError::LayoutMismatch {
                shader: self.shader,
                details: format!(
                    "binding table expects {} bytes, schema is {}",
                    self.uniform_size, layout.size
                ),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for point in self.slots.iter().flat_map(|s| s.points.iter()) {
            if !seen.insert(*point) {
                return Err(ShaderError::LayoutMismatch {
                    shader: self.shader,
                    details: format!("binding point {point} assigned twice"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_schema_is_packed_and_aligned() {
        for shader in ShaderId::ALL {
            validate_uniform_layout(&uniform_layout(shader)).unwrap();
        }
    }

    #[test]
    fn test_terrain_and_water_embed_default_prefix() {
        let default_size = size_of::<DefaultUniforms>();
        assert_eq!(offset_of!(TerrainUniforms, base), 0);
        assert_eq!(offset_of!(WaterUniforms, base), 0);
        assert_eq!(uniform_layout(ShaderId::Terrain).fields[0].size, default_size);
        assert_eq!(size_of::<GpuLight>(), 128);
        assert_eq!(default_size, 4 * 64 + 9 * 16 + MAX_LIGHTS * 128);
    }

    #[test]
    fn test_broken_layout_is_rejected() {
        let mut layout = uniform_layout(ShaderId::Water);
        layout.fields.swap(0, 1);
        assert!(validate_uniform_layout(&layout).is_err());

        let mut layout = uniform_layout(ShaderId::Terrain);
        layout.size += 16;
        assert!(validate_uniform_layout(&layout).is_err());
    }

    #[test]
    fn test_payload_size_is_checked() {
        let payload = UniformPayload::Color(ColorUniforms::default());
        assert!(validate_uniform_payload(ShaderId::Color, payload.as_bytes()).is_ok());
        let err = validate_uniform_payload(ShaderId::Default, payload.as_bytes()).unwrap_err();
        assert!(matches!(err, ShaderError::LayoutMismatch { .. }));
    }

    #[test]
    fn test_payload_decodes_back() {
        let mut u = ColorUniforms::default();
        u.color = Vec4::new(1.0, 0.5, 0.0, 1.0);
        let payload = UniformPayload::Color(u);
        let decoded = UniformPayload::from_bytes(ShaderId::Color, payload.as_bytes()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_binding_tables_are_valid_for_every_model() {
        for model in [
            DescriptorModel::TextureUnits,
            DescriptorModel::PerFramePool,
            DescriptorModel::PerFrameHeapRegion,
            DescriptorModel::PersistentHeap,
        ] {
            for shader in ShaderId::ALL {
                let table = BindingTable::for_backend(shader, model);
                table.validate().unwrap();
                assert_eq!(table.texture_count(), texture_slot_names(shader).len());
            }
        }
        let water = BindingTable::for_backend(ShaderId::Water, DescriptorModel::PersistentHeap);
        assert_eq!(water.texture_slot("refraction"), Some(1));
        assert_eq!(water.slots[2].points[0].to_string(), "t1");
    }
}
