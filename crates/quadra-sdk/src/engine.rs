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

//! The render engine facade.

use crate::error::EngineError;
use crate::resources::{
    FrameBuffer, FrameUniforms, GpuBuffer, ObjectUniforms, PixelImage, ShaderExtras,
    ShaderLibrary, ShaderProgram, Texture,
};
use crate::scene::{
    DrawMode, MeshData, MeshHandle, ObjectId, RenderComponent, TextureHandle, WaterComponent,
};
use quadra_core::math::{LinearRgba, Mat4, Vec3, Vec4};
use quadra_core::platform::{RenderWindow, RenderWindowHandle};
use quadra_core::renderer::api::{
    point_light_face_matrices, Camera, CapturedFrame, DrawCall, DrawProperties, FrameReport,
    GpuLight, GraphicsAdapterInfo, GraphicsBackendType, Light, LightContext, RasterState,
    RenderSettings, RenderStats, ResourceCounts, ShaderId, ShadowLayout, ShadowSlot,
    TargetKey, TargetKind, TextureBinding, TextureDimension, TextureFlags, MAX_LIGHTS,
};
use quadra_core::renderer::{
    GraphicsContext, GraphicsContextFactory, GraphicsDevice, PresentOutcome,
};
use quadra_infra::{select_backend, DefaultContextFactory};
use slotmap::SlotMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the pixels of a texture come from.
#[derive(Debug, Clone)]
pub enum TextureSource {
    /// Decoded RGBA8 pixels.
    Pixels(PixelImage),
    /// Six faces in `+X, -X, +Y, -Y, +Z, -Z` order.
    Cubemap(Vec<PixelImage>),
    /// An image file decoded with the `image` crate.
    File(PathBuf),
}

/// CPU-side texture data kept so the texture can be rebuilt on another backend.
#[derive(Debug, Clone)]
enum TextureData {
    Image(PixelImage),
    Cubemap(Vec<PixelImage>),
}

#[derive(Debug)]
struct TextureEntry {
    label: String,
    data: TextureData,
    flags: TextureFlags,
    gpu: Option<Texture>,
}

impl TextureEntry {
    fn upload(&self, device: &Arc<dyn GraphicsDevice>) -> Result<Texture, EngineError> {
        let texture = match &self.data {
            TextureData::Image(image) => {
                Texture::from_pixels(device.clone(), &self.label, image, self.flags)?
            }
            TextureData::Cubemap(faces) => {
                Texture::from_cubemap(device.clone(), &self.label, faces, self.flags)?
            }
        };
        Ok(texture)
    }
}

#[derive(Debug)]
struct MeshEntry {
    data: MeshData,
    gpu: Option<GpuBuffer>,
    owner: Option<ObjectId>,
}

/// Reflection and refraction targets of one water body.
#[derive(Debug)]
struct WaterTargets {
    reflection: FrameBuffer,
    refraction: FrameBuffer,
}

/// Everything tied to the active backend.
#[derive(Debug)]
struct Backend {
    context: Box<dyn GraphicsContext>,
    device: Arc<dyn GraphicsDevice>,
    shaders: ShaderLibrary,
    shadow_atlas: Option<FrameBuffer>,
    shadow_cubes: Option<FrameBuffer>,
    water: Vec<WaterTargets>,
}

impl Backend {
    fn new(
        context: Box<dyn GraphicsContext>,
        settings: &RenderSettings,
    ) -> Result<Self, EngineError> {
        let device = context.device();
        let mut backend = Self {
            context,
            device: device.clone(),
            shaders: ShaderLibrary::default(),
            shadow_atlas: None,
            shadow_cubes: None,
            water: Vec::new(),
        };
        match ShaderLibrary::load_all(device, settings.shader_dir.as_deref()) {
            Ok(shaders) => {
                backend.shaders = shaders;
                Ok(backend)
            }
            Err(e) => {
                backend.release();
                Err(e.into())
            }
        }
    }

    fn kind(&self) -> GraphicsBackendType {
        self.context.kind()
    }

    /// Makes sure the shadow arrays hold at least the layers `layout` needs.
    fn ensure_shadow_targets(
        &mut self,
        layout: &ShadowLayout,
        size: u32,
    ) -> Result<(), EngineError> {
        let fits = |target: &Option<FrameBuffer>, layers: u32| {
            target.as_ref().is_some_and(|fb| {
                fb.texture().layers() >= layers && fb.texture().extent().width == size
            })
        };
        if layout.atlas_layers > 0 && !fits(&self.shadow_atlas, layout.atlas_layers) {
            self.shadow_atlas = None;
            self.shadow_atlas = Some(FrameBuffer::depth_array(
                self.device.clone(),
                "Shadow atlas",
                size,
                layout.atlas_layers,
                TextureDimension::D2Array,
            )?);
            log::debug!("RenderEngine: Shadow atlas resized to {} layers", layout.atlas_layers);
        }
        if layout.cube_count > 0 && !fits(&self.shadow_cubes, layout.cube_count * 6) {
            self.shadow_cubes = None;
            self.shadow_cubes = Some(FrameBuffer::depth_array(
                self.device.clone(),
                "Point shadows",
                size,
                layout.cube_count,
                TextureDimension::CubeArray,
            )?);
            log::debug!("RenderEngine: Point shadow array resized to {} cubes", layout.cube_count);
        }
        Ok(())
    }

    /// Keeps one pair of water targets per water body, sized to the surface.
    fn ensure_water_targets(&mut self, count: usize, scale: f32) -> Result<(), EngineError> {
        let surface = self.context.surface_extent();
        let width = ((surface.width as f32 * scale) as u32).max(1);
        let height = ((surface.height as f32 * scale) as u32).max(1);
        let stale = self.water.first().is_some_and(|targets| {
            let extent = targets.reflection.texture().extent();
            extent.width != width || extent.height != height
        });
        if stale {
            log::debug!("RenderEngine: Water targets resized to {width}x{height}");
            self.water.clear();
        }
        self.water.truncate(count);
        while self.water.len() < count {
            let index = self.water.len();
            self.water.push(WaterTargets {
                reflection: FrameBuffer::color(
                    self.device.clone(),
                    &format!("Water {index} reflection"),
                    width,
                    height,
                )?,
                refraction: FrameBuffer::color(
                    self.device.clone(),
                    &format!("Water {index} refraction"),
                    width,
                    height,
                )?,
            });
        }
        Ok(())
    }

    /// Drains the device, releases the engine-owned targets and programs, then the
    /// context itself.
    fn release(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::warn!("RenderEngine: Failed to drain {} before release: {e}", self.kind());
        }
        self.water.clear();
        self.shadow_atlas = None;
        self.shadow_cubes = None;
        self.shaders.destroy();
        self.context.release();
    }
}

/// Owns the active graphics backend, every resource created through it and the
/// scene it draws.
///
/// Meshes and textures are addressed by generation-checked handles. Their CPU data
/// is kept so a backend switch can rebuild every GPU resource on the new backend.
pub struct RenderEngine {
    settings: RenderSettings,
    window: RenderWindowHandle,
    factory: Box<dyn GraphicsContextFactory>,
    backend: Option<Backend>,
    meshes: SlotMap<MeshHandle, MeshEntry>,
    textures: SlotMap<TextureHandle, TextureEntry>,
    objects: SlotMap<ObjectId, RenderComponent>,
    placeholder: TextureHandle,
    camera: Option<Camera>,
    lights: Vec<Light>,
    ambient: LinearRgba,
    draw_mode: DrawMode,
    clear_color: LinearRgba,
    frame_number: u64,
    offscreen_passes: bool,
    /// The last explicit resize and the window size it was made at.
    requested_size: Option<((u32, u32), (u32, u32))>,
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("backend", &self.backend.as_ref().map(Backend::kind))
            .field("meshes", &self.meshes.len())
            .field("textures", &self.textures.len())
            .field("objects", &self.objects.len())
            .field("frame_number", &self.frame_number)
            .finish()
    }
}

impl RenderEngine {
    /// Validates `settings`, selects a backend through `factory` and loads every
    /// shader program on it.
    pub fn new(
        settings: RenderSettings,
        window: RenderWindowHandle,
        factory: Box<dyn GraphicsContextFactory>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let context = select_backend(factory.as_ref(), &settings.backend, &window, &settings)?;
        let backend = Backend::new(context, &settings)?;
        log::info!(
            "RenderEngine: Running on {} ({})",
            backend.kind(),
            backend.context.adapter_info()
        );

        let mut textures = SlotMap::with_key();
        let placeholder = textures.insert(TextureEntry {
            label: "Placeholder".to_owned(),
            data: TextureData::Image(PixelImage::solid(1, 1, [255, 255, 255, 255])),
            flags: TextureFlags::empty(),
            gpu: None,
        });
        let mut engine = Self {
            clear_color: settings.clear_color,
            settings,
            window,
            factory,
            backend: Some(backend),
            meshes: SlotMap::with_key(),
            textures,
            objects: SlotMap::with_key(),
            placeholder,
            camera: None,
            lights: Vec::new(),
            ambient: LinearRgba::rgb(0.2, 0.2, 0.2),
            draw_mode: DrawMode::Solid,
            frame_number: 0,
            offscreen_passes: true,
            requested_size: None,
        };
        engine.upload_texture(placeholder)?;
        Ok(engine)
    }

    /// Creates an engine on the built-in backends.
    pub fn with_default_factory(
        settings: RenderSettings,
        window: RenderWindowHandle,
    ) -> Result<Self, EngineError> {
        Self::new(settings, window, Box::new(DefaultContextFactory))
    }

    fn backend(&self) -> Result<&Backend, EngineError> {
        self.backend.as_ref().ok_or(EngineError::NoBackend)
    }

    fn device(&self) -> Result<Arc<dyn GraphicsDevice>, EngineError> {
        Ok(self.backend()?.device.clone())
    }

    // --- Meshes ---

    /// Uploads a mesh and creates its screen uniform slots for every loaded shader.
    pub fn submit_mesh(&mut self, data: MeshData) -> Result<MeshHandle, EngineError> {
        let backend = self.backend()?;
        let gpu = GpuBuffer::from_mesh(backend.device.clone(), &data, &backend.shaders)?;
        log::debug!(
            "RenderEngine: Submitted mesh ({} vertices, {} indices)",
            data.positions.len(),
            data.indices.len()
        );
        Ok(self.meshes.insert(MeshEntry {
            data,
            gpu: Some(gpu),
            owner: None,
        }))
    }

    /// Releases a mesh. Meshes still attached to an object are refused.
    pub fn remove_mesh(&mut self, handle: MeshHandle) -> Result<(), EngineError> {
        let entry = self.meshes.get(handle).ok_or(EngineError::UnknownMesh(handle))?;
        if entry.owner.is_some() {
            return Err(EngineError::MeshInUse(handle));
        }
        self.meshes.remove(handle);
        Ok(())
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&GpuBuffer> {
        self.meshes.get(handle).and_then(|entry| entry.gpu.as_ref())
    }

    // --- Textures ---

    /// Loads a texture. A source that cannot be decoded or uploaded yields the shared
    /// placeholder texture instead of an error.
    pub fn load_texture(&mut self, source: TextureSource, flags: TextureFlags) -> TextureHandle {
        match self.try_load_texture(source, flags) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("RenderEngine: Texture load failed ({e}); using the placeholder");
                self.placeholder
            }
        }
    }

    /// Loads a texture, returning the failure instead of falling back.
    pub fn try_load_texture(
        &mut self,
        source: TextureSource,
        flags: TextureFlags,
    ) -> Result<TextureHandle, EngineError> {
        let (label, data) = match source {
            TextureSource::Pixels(image) => ("Texture".to_owned(), TextureData::Image(image)),
            TextureSource::Cubemap(faces) => ("Cubemap".to_owned(), TextureData::Cubemap(faces)),
            TextureSource::File(path) => {
                let image = PixelImage::open(&path)?;
                (path.display().to_string(), TextureData::Image(image))
            }
        };
        let handle = self.textures.insert(TextureEntry {
            label,
            data,
            flags,
            gpu: None,
        });
        if let Err(e) = self.upload_texture(handle) {
            self.textures.remove(handle);
            return Err(e);
        }
        Ok(handle)
    }

    fn upload_texture(&mut self, handle: TextureHandle) -> Result<(), EngineError> {
        let device = self.device()?;
        let entry = self
            .textures
            .get_mut(handle)
            .ok_or(EngineError::UnknownTexture(handle))?;
        entry.gpu = Some(entry.upload(&device)?);
        Ok(())
    }

    /// Releases a texture. Objects still referring to it sample the placeholder.
    /// The placeholder itself is never released.
    pub fn unload_texture(&mut self, handle: TextureHandle) -> Result<(), EngineError> {
        if handle == self.placeholder {
            log::debug!("RenderEngine: Ignoring unload of the placeholder texture");
            return Ok(());
        }
        self.textures
            .remove(handle)
            .map(|_| ())
            .ok_or(EngineError::UnknownTexture(handle))
    }

    /// The shared fallback texture.
    pub fn placeholder_texture(&self) -> TextureHandle {
        self.placeholder
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(handle).and_then(|entry| entry.gpu.as_ref())
    }

    // --- Scene ---

    /// Adds an object. Its mesh must exist and must not be attached to another object.
    pub fn add_object(&mut self, component: RenderComponent) -> Result<ObjectId, EngineError> {
        let mesh = component.mesh();
        let entry = self.meshes.get(mesh).ok_or(EngineError::UnknownMesh(mesh))?;
        if entry.owner.is_some() {
            return Err(EngineError::MeshInUse(mesh));
        }
        let id = self.objects.insert(component);
        if let Some(entry) = self.meshes.get_mut(mesh) {
            entry.owner = Some(id);
        }
        Ok(id)
    }

    /// Removes an object, returning its component. The mesh stays loaded.
    pub fn remove_object(&mut self, id: ObjectId) -> Result<RenderComponent, EngineError> {
        let component = self.objects.remove(id).ok_or(EngineError::UnknownObject(id))?;
        if let Some(entry) = self.meshes.get_mut(component.mesh()) {
            entry.owner = None;
        }
        Ok(component)
    }

    pub fn object(&self, id: ObjectId) -> Option<&RenderComponent> {
        self.objects.get(id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = Some(camera);
    }

    /// Sets the scene lights. Lights past the eighth are ignored by shaders.
    pub fn set_lights(&mut self, lights: Vec<Light>) {
        if lights.len() > MAX_LIGHTS {
            log::warn!(
                "RenderEngine: {} lights submitted, only the first {MAX_LIGHTS} are used",
                lights.len()
            );
        }
        self.lights = lights;
    }

    pub fn set_ambient(&mut self, ambient: LinearRgba) {
        self.ambient = ambient;
    }

    pub fn set_draw_mode(&mut self, mode: DrawMode) {
        self.draw_mode = mode;
    }

    pub fn set_clear_color(&mut self, color: LinearRgba) {
        self.clear_color = color;
    }

    /// Enables or disables the shadow and water passes. Disabled passes leave their
    /// targets unwritten, which validation reports when they are sampled.
    pub fn set_offscreen_passes(&mut self, enabled: bool) {
        self.offscreen_passes = enabled;
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    // --- Frame ---

    /// Renders and presents one frame.
    ///
    /// Per-object failures are logged and the object is skipped; failures of the
    /// frame itself are returned.
    ///
    /// # Panics
    ///
    /// Panics if no camera was set.
    pub fn draw_frame(&mut self) -> Result<FrameReport, EngineError> {
        let Some(camera) = self.camera else {
            panic!("RenderEngine::draw_frame called with no camera set");
        };
        let layout = ShadowLayout::assign(&self.lights);
        let water_count = self.water_bodies().count();
        {
            let backend = self.backend.as_mut().ok_or(EngineError::NoBackend)?;
            backend.ensure_shadow_targets(&layout, self.settings.shadow_map_size)?;
            backend.ensure_water_targets(water_count, self.settings.water_target_scale)?;
        }

        let time = self.frame_number as f32 / 60.0;
        let (focus, radius) = self.scene_bounds();
        let Self {
            backend,
            meshes,
            textures,
            objects,
            placeholder,
            lights,
            ambient,
            draw_mode,
            clear_color,
            offscreen_passes,
            frame_number,
            ..
        } = self;
        let backend = backend.as_mut().ok_or(EngineError::NoBackend)?;
        let Backend {
            context,
            shaders,
            shadow_atlas,
            shadow_cubes,
            water,
            ..
        } = backend;
        let depth = context.capabilities().depth_range;

        let mut gpu_lights = [GpuLight::default(); MAX_LIGHTS];
        let mut passes = Vec::new();
        for (index, (light, slot)) in lights.iter().zip(&layout.slots).enumerate() {
            let view_projection = match slot {
                Some(ShadowSlot::Atlas(_)) => light.shadow_view_projection(depth, focus, radius),
                _ => Mat4::IDENTITY,
            };
            gpu_lights[index] = light.to_gpu(*slot, view_projection);
            if let Some(slot) = slot {
                passes.push((index, *light, *slot, view_projection));
            }
        }
        let light_count = lights.len().min(MAX_LIGHTS);
        let shadows = *offscreen_passes && !passes.is_empty();

        context.begin_frame(*clear_color)?;
        let mut frame = FrameRenderer {
            context: context.as_mut(),
            shaders,
            meshes,
            textures,
            objects,
            placeholder: *placeholder,
            draw_mode: *draw_mode,
            shadow_atlas: None,
            shadow_cubes: None,
            stats: RenderStats::default(),
        };
        let base = FrameUniforms {
            view: camera.view(),
            projection: camera.projection(frame.context.surface_extent().aspect_ratio(), depth),
            camera_position: camera.position,
            time,
            ambient: *ambient,
            lights: gpu_lights,
            light_count,
            shadows,
            shadow_bias: 0.005,
        };

        if *offscreen_passes {
            for (index, light, slot, view_projection) in &passes {
                match slot {
                    ShadowSlot::Atlas(layer) => {
                        if let Some(target) = shadow_atlas.as_mut() {
                            let light_context = LightContext {
                                light_index: *index,
                                view_projection: *view_projection,
                                position: light.position,
                                far_plane: 0.0,
                            };
                            let key = TargetKey::new(TargetKind::Shadow, *layer);
                            frame.shadow_pass(target, *layer, key, light_context)?;
                        }
                    }
                    ShadowSlot::Cube(cube) => {
                        if let Some(target) = shadow_cubes.as_mut() {
                            let faces = point_light_face_matrices(light.position, light.range(), depth);
                            for (face, face_view_projection) in faces.into_iter().enumerate() {
                                let layer = cube * 6 + face as u32;
                                let key = TargetKey::new(TargetKind::Shadow, MAX_LIGHTS as u32 + layer);
                                let light_context = LightContext {
                                    light_index: *index,
                                    view_projection: face_view_projection,
                                    position: light.position,
                                    far_plane: light.range(),
                                };
                                frame.shadow_pass(target, layer, key, light_context)?;
                            }
                        }
                    }
                }
            }
            if shadows {
                frame.shadow_atlas = shadow_atlas.as_ref().map(FrameBuffer::texture);
                frame.shadow_cubes = shadow_cubes.as_ref().map(FrameBuffer::texture);
            }
            let shadow_maps: Vec<_> = [frame.shadow_atlas, frame.shadow_cubes]
                .into_iter()
                .flatten()
                .filter_map(Texture::id)
                .collect();
            frame.context.prepare_sampled(&shadow_maps)?;

            let bodies: Vec<WaterComponent> = frame.water_bodies().collect();
            for ((index, body), targets) in bodies.iter().enumerate().zip(water.iter_mut()) {
                let index = index as u32;
                let reflected = camera.reflected(body.height);
                let reflection = FrameUniforms {
                    view: reflected.view(),
                    camera_position: reflected.position,
                    ..base
                };
                targets.reflection.bind(frame.context, 0, Some(*clear_color))?;
                frame.stats.offscreen_passes += 1;
                let properties = DrawProperties {
                    clip_plane: Some(Vec4::new(0.0, 1.0, 0.0, -body.height)),
                    target: TargetKey::new(TargetKind::Reflection, index),
                    ..Default::default()
                };
                frame.draw_skybox(&properties, &reflection);
                frame.draw_scene_geometry(&properties, &reflection);
                targets.reflection.unbind(frame.context)?;

                targets.refraction.bind(frame.context, 0, Some(*clear_color))?;
                frame.stats.offscreen_passes += 1;
                let properties = DrawProperties {
                    clip_plane: Some(Vec4::new(0.0, -1.0, 0.0, body.height)),
                    target: TargetKey::new(TargetKind::Refraction, index),
                    ..Default::default()
                };
                frame.draw_scene_geometry(&properties, &base);
                targets.refraction.unbind(frame.context)?;
            }
        }

        let screen = DrawProperties::default();
        frame.draw_skybox(&screen, &base);
        frame.draw_terrain(&screen, &base);
        let bodies: Vec<WaterComponent> = frame.water_bodies().collect();
        for (body, targets) in bodies.iter().zip(water.iter()) {
            frame.draw_water(body, targets, &base);
        }
        frame.draw_opaque(&screen, &base);
        frame.draw_hud(&base);

        let mut stats = frame.stats;
        let outcome = context.present()?;
        *frame_number += 1;
        stats.frame_number = *frame_number;
        let validation_errors = context.take_validation_errors();
        for error in &validation_errors {
            log::warn!("RenderEngine: Validation: {error}");
        }
        if outcome == PresentOutcome::Rebuilt {
            log::info!("RenderEngine: Swapchain rebuilt for a stale surface");
        }
        Ok(FrameReport {
            stats,
            validation_errors,
            swapchain_rebuilt: outcome == PresentOutcome::Rebuilt,
            presented: outcome != PresentOutcome::Skipped,
        })
    }

    fn water_bodies(&self) -> impl Iterator<Item = &WaterComponent> {
        self.objects.values().filter_map(|component| match component {
            RenderComponent::Water(water) => Some(water),
            _ => None,
        })
    }

    /// The center and radius of everything that lives in world space.
    fn scene_bounds(&self) -> (Vec3, f32) {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        let mut any = false;
        for component in self.objects.values() {
            let Some(transform) = component.world_transform() else {
                continue;
            };
            let Some((lo, hi)) = self
                .meshes
                .get(component.mesh())
                .and_then(|entry| entry.data.bounds())
            else {
                continue;
            };
            for corner in 0..8 {
                let local = Vec3::new(
                    if corner & 1 == 0 { lo.x } else { hi.x },
                    if corner & 2 == 0 { lo.y } else { hi.y },
                    if corner & 4 == 0 { lo.z } else { hi.z },
                );
                let world = transform.transform_point(local).truncate();
                min = min.min(world);
                max = max.max(world);
                any = true;
            }
        }
        if !any {
            return (Vec3::ZERO, 10.0);
        }
        let center = (min + max) * 0.5;
        (center, ((max - min).length() * 0.5).max(1.0))
    }

    // --- Backend ---

    /// Resizes the surface. A zero-area size is ignored by the context.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        let backend = self.backend.as_mut().ok_or(EngineError::NoBackend)?;
        backend.context.resize(width, height)?;
        if width > 0 && height > 0 {
            self.settings.width = width;
            self.settings.height = height;
            self.requested_size = Some(((width, height), self.window.inner_size()));
        }
        log::info!("RenderEngine: Resized to {width}x{height}");
        Ok(())
    }

    /// Switches to another backend, rebuilding every GPU resource on it.
    ///
    /// If the new backend cannot be brought up, the previous backend is rebuilt and
    /// [`EngineError::SwitchFailed`] is returned. If that fails too the engine is left
    /// without a backend and [`EngineError::RestoreFailed`] is returned.
    pub fn set_graphics_api(&mut self, kind: GraphicsBackendType) -> Result<(), EngineError> {
        let previous = self.backend()?.kind();
        if previous == kind {
            log::debug!("RenderEngine: Already running on {kind}");
            return Ok(());
        }
        log::info!("RenderEngine: Switching from {previous} to {kind}");
        self.teardown();

        let reason = match self.bring_up(kind) {
            Ok(()) => {
                log::info!("RenderEngine: Now running on {kind}");
                return Ok(());
            }
            Err(e) => e.to_string(),
        };
        log::warn!("RenderEngine: Switching to {kind} failed: {reason}");

        match self.bring_up(previous) {
            Ok(()) => {
                log::info!("RenderEngine: Restored {previous}");
                Err(EngineError::SwitchFailed {
                    failed: kind,
                    restored: previous,
                    reason,
                })
            }
            Err(e) => {
                log::error!("RenderEngine: Restoring {previous} failed: {e}");
                Err(EngineError::RestoreFailed {
                    failed: kind,
                    previous,
                    reason,
                })
            }
        }
    }

    /// Creates a context of `kind` and rebuilds every mesh and texture on it. On
    /// failure nothing of the attempt is left alive.
    fn bring_up(&mut self, kind: GraphicsBackendType) -> Result<(), EngineError> {
        let mut context = self.factory.create(kind, self.window.clone(), &self.settings)?;
        // An explicit resize outlives the context it was made on while the window keeps its size.
        if let Some(((width, height), window)) = self.requested_size {
            if window == self.window.inner_size() {
                context.resize(width, height)?;
            }
        }
        self.backend = Some(Backend::new(context, &self.settings)?);
        if let Err(e) = self.rebuild_resources() {
            self.teardown();
            return Err(e);
        }
        Ok(())
    }

    fn rebuild_resources(&mut self) -> Result<(), EngineError> {
        let backend = self.backend.as_ref().ok_or(EngineError::NoBackend)?;
        for entry in self.meshes.values_mut() {
            entry.gpu = Some(GpuBuffer::from_mesh(
                backend.device.clone(),
                &entry.data,
                &backend.shaders,
            )?);
        }
        for entry in self.textures.values_mut() {
            entry.gpu = Some(entry.upload(&backend.device)?);
        }
        log::debug!(
            "RenderEngine: Rebuilt {} meshes and {} textures",
            self.meshes.len(),
            self.textures.len()
        );
        Ok(())
    }

    /// Releases every GPU resource, then the context. CPU-side data is kept.
    fn teardown(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        if let Err(e) = backend.context.wait_idle() {
            log::warn!("RenderEngine: Failed to drain {}: {e}", backend.kind());
        }
        for entry in self.meshes.values_mut() {
            entry.gpu = None;
        }
        for entry in self.textures.values_mut() {
            entry.gpu = None;
        }
        backend.release();
    }

    /// The active backend's adapter description.
    pub fn backend_info(&self) -> Result<GraphicsAdapterInfo, EngineError> {
        Ok(self.backend()?.context.adapter_info())
    }

    pub fn backend_kind(&self) -> Option<GraphicsBackendType> {
        self.backend.as_ref().map(Backend::kind)
    }

    /// The last presented frame, top-down RGBA8.
    pub fn capture_frame(&mut self) -> Result<Option<CapturedFrame>, EngineError> {
        let backend = self.backend.as_mut().ok_or(EngineError::NoBackend)?;
        Ok(backend.context.capture_frame()?)
    }

    /// Live objects on the active device; zero without a backend.
    pub fn resource_counts(&self) -> ResourceCounts {
        self.backend
            .as_ref()
            .map(|backend| backend.device.resource_counts())
            .unwrap_or_default()
    }

    /// Releases every resource and the context. Idempotent.
    pub fn shutdown(&mut self) {
        if self.backend.is_some() {
            log::info!("RenderEngine: Shutting down");
        }
        self.teardown();
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Borrowed state for recording one frame.
struct FrameRenderer<'a> {
    context: &'a mut dyn GraphicsContext,
    shaders: &'a ShaderLibrary,
    meshes: &'a mut SlotMap<MeshHandle, MeshEntry>,
    textures: &'a SlotMap<TextureHandle, TextureEntry>,
    objects: &'a SlotMap<ObjectId, RenderComponent>,
    placeholder: TextureHandle,
    draw_mode: DrawMode,
    shadow_atlas: Option<&'a Texture>,
    shadow_cubes: Option<&'a Texture>,
    stats: RenderStats,
}

impl<'a> FrameRenderer<'a> {
    fn program(&self, id: ShaderId) -> Option<&'a ShaderProgram> {
        self.shaders.get(id)
    }

    fn water_bodies(&self) -> impl Iterator<Item = WaterComponent> + '_ {
        self.objects.values().filter_map(|component| match component {
            RenderComponent::Water(water) => Some(*water),
            _ => None,
        })
    }

    /// A loaded texture, or the placeholder when the handle went stale.
    fn texture(&self, handle: TextureHandle) -> Option<&'a Texture> {
        let textures = self.textures;
        textures
            .get(handle)
            .or_else(|| textures.get(self.placeholder))
            .and_then(|entry| entry.gpu.as_ref())
    }

    fn bind(program: &ShaderProgram, name: &str, texture: Option<&Texture>) -> Option<TextureBinding> {
        texture?.binding(program.texture_slot(name)?)
    }

    fn shadow_bindings(&self, program: &ShaderProgram, out: &mut Vec<TextureBinding>) {
        out.extend(Self::bind(program, "shadow_atlas", self.shadow_atlas));
        out.extend(Self::bind(program, "shadow_cube", self.shadow_cubes));
    }

    fn shadow_pass(
        &mut self,
        target: &mut FrameBuffer,
        layer: u32,
        key: TargetKey,
        light: LightContext,
    ) -> Result<(), EngineError> {
        target.bind(self.context, layer, Some(LinearRgba::WHITE))?;
        self.stats.offscreen_passes += 1;
        let properties = DrawProperties {
            target: key,
            light: Some(light),
            ..Default::default()
        };
        let frame = FrameUniforms::default();
        let casters: Vec<_> = self
            .objects
            .values()
            .filter(|component| component.casts_shadows())
            .filter_map(|component| Some((component.mesh(), component.world_transform()?)))
            .collect();
        for (mesh, model) in casters {
            let object = ObjectUniforms {
                model,
                ..Default::default()
            };
            self.submit(mesh, ShaderId::Depth, &properties, &frame, &object, &[]);
        }
        target.unbind(self.context)?;
        Ok(())
    }

    fn draw_skybox(&mut self, properties: &DrawProperties, frame: &FrameUniforms) {
        let Some(program) = self.program(ShaderId::Skybox) else {
            return;
        };
        let skyboxes: Vec<_> = self
            .objects
            .values()
            .filter_map(|component| match component {
                RenderComponent::Skybox(skybox) => Some(*skybox),
                _ => None,
            })
            .collect();
        for skybox in skyboxes {
            let textures: Vec<_> = Self::bind(program, "skybox", self.texture(skybox.cubemap))
                .into_iter()
                .collect();
            let object = ObjectUniforms {
                color: skybox.tint,
                ..Default::default()
            };
            self.submit(skybox.mesh, ShaderId::Skybox, properties, frame, &object, &textures);
        }
    }

    /// Terrain and opaque meshes, as seen from an offscreen water pass.
    fn draw_scene_geometry(&mut self, properties: &DrawProperties, frame: &FrameUniforms) {
        self.draw_terrain(properties, frame);
        self.draw_opaque(properties, frame);
    }

    fn draw_terrain(&mut self, properties: &DrawProperties, frame: &FrameUniforms) {
        let shader = match self.draw_mode {
            DrawMode::Solid => ShaderId::Terrain,
            DrawMode::Wireframe => ShaderId::Wireframe,
        };
        let Some(program) = self.program(shader) else {
            return;
        };
        let terrains: Vec<_> = self
            .objects
            .values()
            .filter_map(|component| match component {
                RenderComponent::Terrain(terrain) => Some(*terrain),
                _ => None,
            })
            .collect();
        for terrain in terrains {
            let mut textures = Vec::new();
            for (index, layer) in terrain.layers.iter().enumerate() {
                let texture = layer.and_then(|handle| self.texture(handle));
                textures.extend(Self::bind(program, &format!("layer{index}"), texture));
            }
            self.shadow_bindings(program, &mut textures);
            let object = ObjectUniforms {
                model: terrain.transform,
                color: terrain.material.color,
                specular_intensity: terrain.material.specular_intensity,
                shininess: terrain.material.shininess,
                textured: terrain.layers.iter().any(Option::is_some),
                tiling: terrain.material.tiling,
                extras: ShaderExtras::Terrain {
                    heights: Vec4::new(
                        terrain.min_height,
                        terrain.max_height,
                        terrain.blend_sharpness,
                        0.0,
                    ),
                    layer_tiling: terrain.layer_tiling,
                },
            };
            self.submit(terrain.mesh, shader, properties, frame, &object, &textures);
        }
    }

    fn draw_water(&mut self, body: &WaterComponent, targets: &WaterTargets, frame: &FrameUniforms) {
        let Some(program) = self.program(ShaderId::Water) else {
            return;
        };
        let mut textures = Vec::new();
        textures.extend(Self::bind(program, "reflection", Some(targets.reflection.texture())));
        textures.extend(Self::bind(program, "refraction", Some(targets.refraction.texture())));
        let distortion = body.distortion.and_then(|handle| self.texture(handle));
        textures.extend(Self::bind(program, "distortion", distortion));
        self.shadow_bindings(program, &mut textures);
        let object = ObjectUniforms {
            model: body.transform,
            color: body.color,
            textured: distortion.is_some(),
            extras: ShaderExtras::Water {
                distortion_strength: body.distortion_strength,
                wave_speed: body.wave_speed,
                reflectivity: body.reflectivity,
                color: body.color,
            },
            ..Default::default()
        };
        self.submit(body.mesh, ShaderId::Water, &DrawProperties::default(), frame, &object, &textures);
    }

    fn draw_opaque(&mut self, properties: &DrawProperties, frame: &FrameUniforms) {
        let meshes: Vec<_> = self
            .objects
            .values()
            .filter_map(|component| match component {
                RenderComponent::Mesh(mesh) => Some(*mesh),
                _ => None,
            })
            .collect();
        for mesh in meshes {
            let shader = match self.draw_mode {
                DrawMode::Solid => mesh.shader,
                DrawMode::Wireframe => ShaderId::Wireframe,
            };
            let Some(program) = self.program(shader) else {
                log::warn!("RenderEngine: Shader '{shader}' is not loaded; object skipped");
                continue;
            };
            let diffuse = mesh.material.diffuse.and_then(|handle| self.texture(handle));
            let mut textures: Vec<_> = Self::bind(program, "diffuse", diffuse).into_iter().collect();
            self.shadow_bindings(program, &mut textures);
            let object = ObjectUniforms {
                model: mesh.transform,
                color: mesh.material.color,
                specular_intensity: mesh.material.specular_intensity,
                shininess: mesh.material.shininess,
                textured: diffuse.is_some(),
                tiling: mesh.material.tiling,
                extras: ShaderExtras::None,
            };
            let properties = DrawProperties {
                clip: mesh.clip,
                ..*properties
            };
            self.submit(mesh.mesh, shader, &properties, frame, &object, &textures);
        }
    }

    fn draw_hud(&mut self, frame: &FrameUniforms) {
        let Some(program) = self.program(ShaderId::Hud) else {
            return;
        };
        let elements: Vec<_> = self
            .objects
            .values()
            .filter_map(|component| match component {
                RenderComponent::Hud(hud) => Some(*hud),
                _ => None,
            })
            .collect();
        for hud in elements {
            let texture = hud.texture.and_then(|handle| self.texture(handle));
            let textures: Vec<_> = Self::bind(program, "hud", texture).into_iter().collect();
            let object = ObjectUniforms {
                model: hud.transform,
                color: hud.color,
                textured: texture.is_some(),
                extras: ShaderExtras::Hud {
                    uv_rect: hud.uv_rect,
                },
                ..Default::default()
            };
            self.submit(hud.mesh, ShaderId::Hud, &DrawProperties::default(), frame, &object, &textures);
        }
    }

    /// Draws one object, logging and skipping it on failure.
    fn submit(
        &mut self,
        mesh: MeshHandle,
        shader: ShaderId,
        properties: &DrawProperties,
        frame: &FrameUniforms,
        object: &ObjectUniforms,
        textures: &[TextureBinding],
    ) {
        if let Err(e) = self.try_submit(mesh, shader, properties, frame, object, textures) {
            log::warn!("RenderEngine: Draw of '{shader}' skipped: {e}");
        }
    }

    fn try_submit(
        &mut self,
        mesh: MeshHandle,
        shader: ShaderId,
        properties: &DrawProperties,
        frame: &FrameUniforms,
        object: &ObjectUniforms,
        textures: &[TextureBinding],
    ) -> Result<(), EngineError> {
        let program = self
            .program(shader)
            .ok_or(crate::error::UniformError::MissingModule(shader))?;
        let module = program
            .module()
            .ok_or(crate::error::UniformError::MissingModule(shader))?;
        let gpu = self
            .meshes
            .get_mut(mesh)
            .and_then(|entry| entry.gpu.as_mut())
            .ok_or(EngineError::UnknownMesh(mesh))?;
        if !gpu.is_drawable() {
            log::trace!("RenderEngine: Mesh {mesh:?} has nothing to draw");
            return Ok(());
        }
        gpu.ensure_uniform(shader, properties.target)?;
        let uniform_buffer = program.update_uniforms(gpu, properties, frame, object)?;
        program.prepare_textures(self.context, textures)?;

        let (Some(vertex_buffer), Some(index_buffer)) = (gpu.vertex_buffer(), gpu.index_buffer())
        else {
            return Ok(());
        };
        let index_count = gpu.index_count();
        self.context.draw(&DrawCall {
            vertex_buffer,
            index_buffer,
            index_count,
            shader,
            module,
            pipeline: gpu.pipeline(shader, properties.target.target_class()),
            state: RasterState::for_shader(shader),
            uniform_buffer,
            textures,
        })?;
        log::trace!("RenderEngine: Drew '{shader}' ({index_count} indices) into {:?}", properties.target);
        self.stats.draw_calls += 1;
        self.stats.triangles_submitted += index_count / 3;
        Ok(())
    }
}
