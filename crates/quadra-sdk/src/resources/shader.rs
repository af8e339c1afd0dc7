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

use super::gpu_buffer::GpuBuffer;
use crate::error::UniformError;
use quadra_core::math::{LinearRgba, Mat4, Vec2, Vec3, Vec4};
use quadra_core::renderer::api::{
    BindingTable, BufferId, ColorUniforms, DefaultUniforms, DepthUniforms, DrawProperties,
    GpuLight, HudUniforms, ShaderId, ShaderModuleDescriptor, ShaderModuleId, ShaderSource,
    SkyboxUniforms, TerrainUniforms, TextureBinding, TextureId, UniformPayload, WaterUniforms,
    WireframeUniforms, MAX_LIGHTS,
};
use quadra_core::renderer::{GraphicsContext, GraphicsDevice, RenderError, ResourceError};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Scene state shared by every draw of one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    /// Seconds since the engine started drawing.
    pub time: f32,
    /// Ambient color premultiplied by its intensity.
    pub ambient: LinearRgba,
    pub lights: [GpuLight; MAX_LIGHTS],
    pub light_count: usize,
    /// Whether lit shaders sample shadow maps.
    pub shadows: bool,
    pub shadow_bias: f32,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            time: 0.0,
            ambient: LinearRgba::WHITE,
            lights: [GpuLight::default(); MAX_LIGHTS],
            light_count: 0,
            shadows: false,
            shadow_bias: 0.005,
        }
    }
}

/// Shader-specific inputs beyond the common material.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ShaderExtras {
    #[default]
    None,
    Terrain {
        /// x min height, y max height, z blend sharpness.
        heights: Vec4,
        layer_tiling: [f32; 3],
    },
    Water {
        distortion_strength: f32,
        wave_speed: f32,
        reflectivity: f32,
        color: LinearRgba,
    },
    Hud {
        uv_rect: Vec4,
    },
}

/// Per-object values a payload is built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub color: LinearRgba,
    pub specular_intensity: f32,
    pub shininess: f32,
    /// A diffuse texture is bound.
    pub textured: bool,
    pub tiling: Vec2,
    pub extras: ShaderExtras,
}

impl Default for ObjectUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            color: LinearRgba::WHITE,
            specular_intensity: 0.0,
            shininess: 32.0,
            textured: false,
            tiling: Vec2::ONE,
            extras: ShaderExtras::None,
        }
    }
}

/// One compiled shader for the active backend, with its binding table.
///
/// Programs are created once per backend and are read-only afterwards; every mesh
/// drawn with the shader shares the program.
#[derive(Debug)]
pub struct ShaderProgram {
    device: Arc<dyn GraphicsDevice>,
    id: ShaderId,
    module: Option<ShaderModuleId>,
    bindings: BindingTable,
}

impl ShaderProgram {
    /// Loads the stages of `id` in the backend's format.
    ///
    /// Without a shader directory the embedded sources are used. The binding table is
    /// derived from the canonical uniform schema and validated before compiling.
    pub fn load(
        device: Arc<dyn GraphicsDevice>,
        id: ShaderId,
        shader_dir: Option<&Path>,
    ) -> Result<Self, ResourceError> {
        let caps = device.capabilities();
        let bindings = BindingTable::for_backend(id, caps.descriptor_model);
        bindings.validate()?;

        let source = match shader_dir {
            Some(dir) => ShaderSource::load(dir, id, caps.shader_format)?,
            None => ShaderSource::embedded(id, caps.shader_format),
        };
        let module = device.create_shader_module(&ShaderModuleDescriptor {
            label: Some(Cow::Borrowed(id.name())),
            program: id,
            source: Cow::Owned(source),
        })?;
        log::debug!(
            "ShaderProgram: Loaded '{id}' ({:?}, {} bindings)",
            caps.shader_format,
            bindings.slots.len()
        );
        Ok(Self {
            device,
            id,
            module: Some(module),
            bindings,
        })
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn module(&self) -> Option<ShaderModuleId> {
        self.module
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    pub fn is_valid(&self) -> bool {
        self.module.is_some()
    }

    /// The slot index of a named texture.
    pub fn texture_slot(&self, name: &str) -> Option<u32> {
        self.bindings.texture_slot(name)
    }

    /// Builds this shader's payload and writes it to the mesh's slot for the draw's
    /// target. Returns the written uniform buffer.
    ///
    /// Fails without writing anything if the mesh has no vertex buffer (`-1`), the
    /// program has no module (`-2`), or the slot or payload is missing (`-3`).
    pub fn update_uniforms(
        &self,
        mesh: &GpuBuffer,
        properties: &DrawProperties,
        frame: &FrameUniforms,
        object: &ObjectUniforms,
    ) -> Result<BufferId, UniformError> {
        if mesh.vertex_buffer().is_none() {
            return Err(UniformError::MissingVertexBuffer);
        }
        if self.module.is_none() {
            return Err(UniformError::MissingModule(self.id));
        }
        let buffer = mesh
            .uniform(self.id, properties.target)
            .ok_or(UniformError::MissingSlot {
                shader: self.id,
                target: properties.target,
            })?;
        let payload = self
            .payload(properties, frame, object)
            .ok_or(UniformError::NullPayload(self.id))?;
        self.device.write_buffer(buffer, 0, payload.as_bytes())?;
        Ok(buffer)
    }

    /// Makes the shadow maps among `textures` readable before the draw that samples
    /// them. Backends without explicit layouts ignore the request.
    pub fn prepare_textures(
        &self,
        context: &mut dyn GraphicsContext,
        textures: &[TextureBinding],
    ) -> Result<(), RenderError> {
        let shadow_slots = [
            self.texture_slot("shadow_atlas"),
            self.texture_slot("shadow_cube"),
        ];
        let shadows: Vec<TextureId> = textures
            .iter()
            .filter(|b| shadow_slots.contains(&Some(b.slot)))
            .map(|b| b.texture)
            .collect();
        if shadows.is_empty() {
            return Ok(());
        }
        context.prepare_sampled(&shadows)
    }

    /// The full payload of this shader, or `None` when the inputs do not carry what
    /// the shader needs.
    pub fn payload(
        &self,
        properties: &DrawProperties,
        frame: &FrameUniforms,
        object: &ObjectUniforms,
    ) -> Option<UniformPayload> {
        let clip_plane = properties.clip_plane.unwrap_or(Vec4::ZERO);
        Some(match self.id {
            ShaderId::Color => UniformPayload::Color(ColorUniforms {
                model: object.model,
                view: frame.view,
                projection: frame.projection,
                color: object.color.to_vec4(),
                clip_plane,
            }),
            ShaderId::Wireframe => UniformPayload::Wireframe(WireframeUniforms {
                model: object.model,
                view: frame.view,
                projection: frame.projection,
                color: object.color.to_vec4(),
            }),
            ShaderId::Depth => {
                let light = properties.light?;
                let linear = light.far_plane > 0.0;
                UniformPayload::Depth(DepthUniforms {
                    model: object.model,
                    light_view_projection: light.view_projection,
                    light_position: light.position.extend(if linear { 1.0 } else { 0.0 }),
                    params: Vec4::new(light.far_plane, 0.0, 0.0, 0.0),
                })
            }
            ShaderId::Hud => {
                let uv_rect = match object.extras {
                    ShaderExtras::Hud { uv_rect } => uv_rect,
                    _ => Vec4::new(0.0, 0.0, 1.0, 1.0),
                };
                UniformPayload::Hud(HudUniforms {
                    transform: object.model,
                    color: object.color.to_vec4(),
                    uv_rect,
                })
            }
            ShaderId::Skybox => {
                let mut view = frame.view;
                view.cols[3] = Vec4::W;
                UniformPayload::Skybox(SkyboxUniforms {
                    view,
                    projection: frame.projection,
                    tint: object.color.to_vec4(),
                })
            }
            ShaderId::Default => UniformPayload::Default(lit_uniforms(properties, frame, object)),
            ShaderId::Terrain => {
                let ShaderExtras::Terrain {
                    heights,
                    layer_tiling,
                } = object.extras
                else {
                    return None;
                };
                UniformPayload::Terrain(TerrainUniforms {
                    base: lit_uniforms(properties, frame, object),
                    heights,
                    layer_tiling: Vec4::new(layer_tiling[0], layer_tiling[1], layer_tiling[2], 0.0),
                })
            }
            ShaderId::Water => {
                let ShaderExtras::Water {
                    distortion_strength,
                    wave_speed,
                    reflectivity,
                    color,
                } = object.extras
                else {
                    return None;
                };
                UniformPayload::Water(WaterUniforms {
                    base: lit_uniforms(properties, frame, object),
                    wave: Vec4::new(distortion_strength, wave_speed, frame.time, reflectivity),
                    water_color: color.to_vec4(),
                })
            }
        })
    }

    /// Releases the compiled module. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(id) = self.module.take() {
            if let Err(e) = self.device.destroy_shader_module(id) {
                log::warn!("ShaderProgram: Failed to destroy module of '{}': {e}", self.id);
            }
        }
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn lit_uniforms(
    properties: &DrawProperties,
    frame: &FrameUniforms,
    object: &ObjectUniforms,
) -> DefaultUniforms {
    let (clip_min, clip_max) = match properties.clip {
        Some(volume) => (volume.min.extend(1.0), volume.max.extend(1.0)),
        None => (Vec4::ZERO, Vec4::ZERO),
    };
    let light_count = frame.light_count.min(MAX_LIGHTS);
    DefaultUniforms {
        model: object.model,
        view: frame.view,
        projection: frame.projection,
        normal_matrix: object.model.normal_matrix(),
        camera_position: frame.camera_position.extend(frame.time),
        clip_min,
        clip_max,
        clip_plane: properties.clip_plane.unwrap_or(Vec4::ZERO),
        material_color: object.color.to_vec4(),
        material_specular: Vec4::new(
            object.specular_intensity,
            object.shininess,
            if object.textured { 1.0 } else { 0.0 },
            0.0,
        ),
        ambient: frame.ambient.to_vec4(),
        tiling: Vec4::new(object.tiling.x, object.tiling.y, 0.0, 0.0),
        light_info: Vec4::new(
            light_count as f32,
            if frame.shadows { 1.0 } else { 0.0 },
            frame.shadow_bias,
            0.0,
        ),
        lights: frame.lights,
    }
}

/// Every shader program of one backend, keyed by identity.
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    programs: BTreeMap<ShaderId, ShaderProgram>,
}

impl ShaderLibrary {
    /// Loads every shader identity. Nothing stays loaded if one of them fails.
    pub fn load_all(
        device: Arc<dyn GraphicsDevice>,
        shader_dir: Option<&Path>,
    ) -> Result<Self, ResourceError> {
        let mut library = Self::default();
        for id in ShaderId::ALL {
            let program = ShaderProgram::load(device.clone(), id, shader_dir)?;
            library.programs.insert(id, program);
        }
        log::info!("ShaderLibrary: Loaded {} programs", library.programs.len());
        Ok(library)
    }

    pub fn get(&self, id: ShaderId) -> Option<&ShaderProgram> {
        self.programs.get(&id)
    }

    pub fn programs(&self) -> impl Iterator<Item = &ShaderProgram> {
        self.programs.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = ShaderId> + '_ {
        self.programs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Releases every program. Idempotent.
    pub fn destroy(&mut self) {
        for (_, mut program) in std::mem::take(&mut self.programs) {
            program.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MeshData;
    use approx::assert_relative_eq;
    use quadra_core::platform::RenderWindowHandle;
    use quadra_core::renderer::api::{
        ClipVolume, GraphicsBackendType, LightContext, RenderSettings, TargetKind, TargetKey,
    };
    use quadra_core::renderer::GraphicsContextFactory;
    use quadra_core::Canvas;
    use quadra_infra::SoftContextFactory;

    fn context(kind: GraphicsBackendType) -> Box<dyn GraphicsContext> {
        let window: RenderWindowHandle = Canvas::new(16, 16);
        let settings = RenderSettings {
            width: 16,
            height: 16,
            ..RenderSettings::default()
        };
        SoftContextFactory.create(kind, window, &settings).unwrap()
    }

    #[test]
    fn test_library_loads_every_shader_on_every_backend() {
        for kind in GraphicsBackendType::ALL {
            let context = context(kind);
            let mut library = ShaderLibrary::load_all(context.device(), None).unwrap();
            assert_eq!(library.len(), ShaderId::ALL.len());
            assert!(library.programs().all(ShaderProgram::is_valid));
            assert_eq!(
                context.device().resource_counts().shader_modules,
                ShaderId::ALL.len()
            );
            library.destroy();
            library.destroy();
            assert_eq!(context.device().resource_counts().shader_modules, 0);
        }
    }

    #[test]
    fn test_missing_shader_dir_fails_to_load() {
        let context = context(GraphicsBackendType::Immediate);
        let dir = std::env::temp_dir().join("quadra-no-such-shader-dir");
        assert!(ShaderProgram::load(context.device(), ShaderId::Color, Some(&dir)).is_err());
        assert_eq!(context.device().resource_counts().shader_modules, 0);
    }

    #[test]
    fn test_update_reports_missing_vertex_buffer() {
        let context = context(GraphicsBackendType::FenceBased);
        let program = ShaderProgram::load(context.device(), ShaderId::Color, None).unwrap();
        let empty = GpuBuffer::new(context.device());
        let err = program
            .update_uniforms(
                &empty,
                &DrawProperties::default(),
                &FrameUniforms::default(),
                &ObjectUniforms::default(),
            )
            .unwrap_err();
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn test_update_reports_missing_module_and_slot() {
        let context = context(GraphicsBackendType::CommandListV1);
        let device = context.device();
        let mut library = ShaderLibrary::load_all(device.clone(), None).unwrap();
        let mesh = GpuBuffer::from_mesh(device.clone(), &MeshData::cube(1.0), &library).unwrap();

        let reflection = DrawProperties {
            target: TargetKey::new(TargetKind::Reflection, 0),
            ..Default::default()
        };
        let program = library.get(ShaderId::Default).unwrap();
        let err = program
            .update_uniforms(&mesh, &reflection, &FrameUniforms::default(), &ObjectUniforms::default())
            .unwrap_err();
        assert_eq!(err.code(), -3);

        let mut program = ShaderProgram::load(device, ShaderId::Color, None).unwrap();
        program.destroy();
        let err = program
            .update_uniforms(
                &mesh,
                &DrawProperties::default(),
                &FrameUniforms::default(),
                &ObjectUniforms::default(),
            )
            .unwrap_err();
        assert_eq!(err.code(), -2);
        library.destroy();
    }

    #[test]
    fn test_depth_payload_needs_a_light() {
        let context = context(GraphicsBackendType::Immediate);
        let program = ShaderProgram::load(context.device(), ShaderId::Depth, None).unwrap();
        let frame = FrameUniforms::default();
        let object = ObjectUniforms::default();
        assert!(program.payload(&DrawProperties::default(), &frame, &object).is_none());

        let properties = DrawProperties {
            light: Some(LightContext {
                light_index: 0,
                view_projection: Mat4::IDENTITY,
                position: Vec3::new(1.0, 2.0, 3.0),
                far_plane: 25.0,
            }),
            ..Default::default()
        };
        match program.payload(&properties, &frame, &object) {
            Some(UniformPayload::Depth(depth)) => {
                assert_eq!(depth.light_position, Vec4::new(1.0, 2.0, 3.0, 1.0));
                assert_relative_eq!(depth.params.x, 25.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_lit_payload_carries_clip_volume_and_material() {
        let context = context(GraphicsBackendType::CommandListV2);
        let program = ShaderProgram::load(context.device(), ShaderId::Default, None).unwrap();
        let properties = DrawProperties {
            clip: Some(ClipVolume {
                min: Vec3::new(-1.0, -2.0, -3.0),
                max: Vec3::ONE,
            }),
            ..Default::default()
        };
        let frame = FrameUniforms {
            time: 2.5,
            light_count: 12,
            ..Default::default()
        };
        let object = ObjectUniforms {
            specular_intensity: 0.5,
            shininess: 16.0,
            textured: true,
            ..Default::default()
        };
        let Some(UniformPayload::Default(uniforms)) = program.payload(&properties, &frame, &object)
        else {
            panic!("expected a default payload");
        };
        assert_eq!(uniforms.clip_min, Vec4::new(-1.0, -2.0, -3.0, 1.0));
        assert_relative_eq!(uniforms.camera_position.w, 2.5);
        assert_eq!(uniforms.material_specular, Vec4::new(0.5, 16.0, 1.0, 0.0));
        assert_relative_eq!(uniforms.light_info.x, MAX_LIGHTS as f32);
    }

    #[test]
    fn test_terrain_and_water_need_their_extras() {
        let context = context(GraphicsBackendType::FenceBased);
        let frame = FrameUniforms::default();
        for id in [ShaderId::Terrain, ShaderId::Water] {
            let program = ShaderProgram::load(context.device(), id, None).unwrap();
            assert!(program
                .payload(&DrawProperties::default(), &frame, &ObjectUniforms::default())
                .is_none());
        }
    }

    #[test]
    fn test_skybox_payload_drops_the_view_translation() {
        let context = context(GraphicsBackendType::Immediate);
        let program = ShaderProgram::load(context.device(), ShaderId::Skybox, None).unwrap();
        let frame = FrameUniforms {
            view: Mat4::from_translation(Vec3::new(4.0, 5.0, 6.0)),
            ..Default::default()
        };
        let Some(UniformPayload::Skybox(sky)) =
            program.payload(&DrawProperties::default(), &frame, &ObjectUniforms::default())
        else {
            panic!("expected a skybox payload");
        };
        assert_eq!(sky.view, Mat4::IDENTITY);
    }
}
