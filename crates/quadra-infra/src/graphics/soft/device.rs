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

use super::command::{Command, HeapEntry};
use super::gpu::{
    GpuState, SoftBuffer, SoftFramebuffer, SoftGpu, SoftModule, SoftPipeline, SoftSampler,
};
use super::image::SoftImage;
use super::queue::{FenceSignal, Submission};
use super::store::{FenceKey, PublicId};
use super::sync::SoftFence;
use quadra_core::renderer::api::*;
use quadra_core::renderer::{
    GraphicsDevice, PipelineError, ResourceError, ShaderError, TransferEncoder,
};
use std::sync::Arc;

/// Transfers wait without a bound: they only ever depend on work already queued.
const TRANSFER_TIMEOUT_MS: u64 = u64::MAX;

/// The resource half of a software backend. All backends share this device type and
/// differ through their capabilities.
#[derive(Debug, Clone)]
pub struct SoftDevice {
    gpu: Arc<SoftGpu>,
}

impl SoftDevice {
    pub fn new(gpu: Arc<SoftGpu>) -> Self {
        Self { gpu }
    }

    pub fn gpu(&self) -> &Arc<SoftGpu> {
        &self.gpu
    }

    fn caps(&self) -> BackendCapabilities {
        self.gpu.kind().capabilities()
    }

    fn allocate_heap_entry(state: &mut GpuState, entry: HeapEntry) -> Option<u32> {
        let heap = state.persistent_heap?;
        state.heaps.get_mut(heap).map(|h| h.allocate(entry))
    }

    /// Submits `commands` behind a one-shot fence and waits for them. The fence is
    /// freed on every path.
    fn submit_and_wait(
        &self,
        state: &mut GpuState,
        label: &'static str,
        commands: Vec<Command>,
    ) -> Result<(), ResourceError> {
        let (fence, signal) = one_shot_fence(state);
        state.submit(Submission::new(label, commands).with_fence(signal));
        let result = state.wait_fence(fence, 1, TRANSFER_TIMEOUT_MS);
        state.fences.remove(fence);
        result.map_err(|e| ResourceError::BackendError(format!("{label} failed: {e}")))
    }

    fn insert_buffer(
        &self,
        state: &mut GpuState,
        descriptor: &BufferDescriptor,
    ) -> Result<BufferId, ResourceError> {
        let copies = if descriptor.usage.contains(BufferUsage::UNIFORM) {
            self.gpu.uniform_copies()
        } else {
            1
        };
        let bytes = descriptor.size * copies as u64;
        state.memory.reserve(bytes)?;
        let key = state.buffers.insert(SoftBuffer {
            data: vec![0; bytes as usize],
            usage: descriptor.usage,
            copy_size: descriptor.size,
            copies,
            heap_index: None,
        });
        if descriptor.usage.contains(BufferUsage::UNIFORM) {
            let index = Self::allocate_heap_entry(state, HeapEntry::UniformBuffer(key));
            if let Some(buffer) = state.buffers.get_mut(key) {
                buffer.heap_index = index;
            }
        }
        Ok(BufferId::from_key(key))
    }
}

fn one_shot_fence(state: &mut GpuState) -> (FenceKey, FenceSignal) {
    if state.kind.capabilities().bakes_pipelines {
        let fence = state.fences.insert(SoftFence::Timeline { completed: 0 });
        (fence, FenceSignal::Timeline(fence, 1))
    } else {
        let fence = state.fences.insert(SoftFence::Binary { signaled: false });
        (fence, FenceSignal::Binary(fence))
    }
}

fn label_of<'a>(label: &'a Option<std::borrow::Cow<'_, str>>) -> &'a str {
    label.as_deref().unwrap_or("unnamed")
}

impl GraphicsDevice for SoftDevice {
    // --- Shader Operations ---

    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleId, ResourceError> {
        let expected = self.caps().shader_format;
        if descriptor.source.format() != expected {
            return Err(ShaderError::CompilationError {
                label: descriptor.program.name().to_string(),
                details: format!(
                    "{} consumes {expected:?} shaders, got {:?}",
                    self.gpu.kind(),
                    descriptor.source.format()
                ),
            }
            .into());
        }
        let stages = validate_shader_source(descriptor.program, &descriptor.source)?;

        let key = self.gpu.lock().modules.insert(SoftModule {
            program: descriptor.program,
            stages,
        });
        log::debug!(
            "SoftDevice: Created shader module '{}' ({stages:?})",
            label_of(&descriptor.label)
        );
        Ok(ShaderModuleId::from_key(key))
    }

    fn destroy_shader_module(&self, id: ShaderModuleId) -> Result<(), ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        match state.modules.remove(id.key()) {
            Some(_) => Ok(()),
            None => Err(ShaderError::NotFound { id }.into()),
        }
    }

    // --- Pipeline Operations ---

    fn create_render_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<PipelineId, ResourceError> {
        if !self.caps().bakes_pipelines {
            return Err(ResourceError::Unsupported(format!(
                "{} has no pipeline objects",
                self.gpu.kind()
            )));
        }
        let fail = |details: String| {
            ResourceError::from(PipelineError::CompilationFailed {
                label: descriptor.label.as_ref().map(|l| l.to_string()),
                details,
            })
        };
        if descriptor.vertex_stride != VERTEX_STRIDE {
            return Err(fail(format!(
                "vertex stride {} does not match the {VERTEX_STRIDE}-byte layout",
                descriptor.vertex_stride
            )));
        }

        let mut state = self.gpu.lock();
        let module_key = descriptor.module.key();
        let Some(module) = state.modules.get(module_key) else {
            return Err(PipelineError::InvalidShaderModuleForPipeline {
                id: descriptor.module,
            }
            .into());
        };
        if module.program != descriptor.shader {
            return Err(fail(format!(
                "module implements '{}', pipeline needs '{}'",
                module.program, descriptor.shader
            )));
        }
        let key = state.pipelines.insert(SoftPipeline {
            shader: descriptor.shader,
            module: module_key,
            target: descriptor.target,
            state: descriptor.state,
        });
        log::debug!(
            "SoftDevice: Baked pipeline for '{}' / {:?}",
            descriptor.shader,
            descriptor.target
        );
        Ok(PipelineId::from_key(key))
    }

    fn destroy_render_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        match state.pipelines.remove(id.key()) {
            Some(_) => Ok(()),
            None => Err(PipelineError::InvalidRenderPipeline { id }.into()),
        }
    }

    // --- Buffer Operations ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = self.insert_buffer(&mut self.gpu.lock(), descriptor)?;
        log::debug!(
            "SoftDevice: Created buffer '{}' ({} bytes, {:?})",
            label_of(&descriptor.label),
            descriptor.size,
            descriptor.usage
        );
        Ok(id)
    }

    fn create_buffer_with_data(
        &self,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> Result<BufferId, ResourceError> {
        if data.len() as u64 > descriptor.size {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{} bytes of data for a {}-byte buffer",
                data.len(),
                descriptor.size
            )));
        }
        let mut state = self.gpu.lock();

        if !self.caps().explicit_sync {
            let id = self.insert_buffer(&mut state, descriptor)?;
            if let Some(buffer) = state.buffers.get_mut(id.key()) {
                buffer.data[..data.len()].copy_from_slice(data);
            }
            return Ok(id);
        }

        let staging = self.insert_buffer(
            &mut state,
            &BufferDescriptor {
                label: Some("staging".into()),
                size: data.len() as u64,
                usage: BufferUsage::COPY_SRC,
            },
        )?;
        if let Some(buffer) = state.buffers.get_mut(staging.key()) {
            buffer.data.copy_from_slice(data);
        }

        let result = self
            .insert_buffer(
                &mut state,
                &BufferDescriptor {
                    usage: descriptor.usage | BufferUsage::COPY_DST,
                    ..descriptor.clone()
                },
            )
            .and_then(|dst| {
                let copy = Command::CopyBuffer {
                    src: staging.key(),
                    dst: dst.key(),
                    size: data.len() as u64,
                };
                match self.submit_and_wait(&mut state, "buffer upload", vec![copy]) {
                    Ok(()) => Ok(dst),
                    Err(err) => {
                        state.remove_buffer(dst.key());
                        Err(err)
                    }
                }
            });
        state.remove_buffer(staging.key());

        let id = result?;
        log::debug!(
            "SoftDevice: Uploaded buffer '{}' ({} bytes) through staging",
            label_of(&descriptor.label),
            data.len()
        );
        Ok(id)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let copy = self.gpu.uniform_copy();
        let mut state = self.gpu.lock();
        let buffer = state
            .buffers
            .get_mut(id.key())
            .ok_or(ResourceError::InvalidHandle)?;
        let range = if buffer.usage.contains(BufferUsage::UNIFORM) {
            buffer.copy_range(copy)
        } else {
            0..buffer.data.len()
        };
        let (start, end) = usize::try_from(offset)
            .ok()
            .and_then(|offset| range.start.checked_add(offset))
            .and_then(|start| Some((start, start.checked_add(data.len())?)))
            .filter(|&(_, end)| end <= range.end)
            .ok_or(ResourceError::OutOfBounds)?;
        buffer.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        if state.remove_buffer(id.key()) {
            log::trace!("SoftDevice: Destroyed buffer {id:?}");
            Ok(())
        } else {
            Err(ResourceError::NotFound)
        }
    }

    // --- Texture Operations ---

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> Result<TextureId, ResourceError> {
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "texture size {}x{}x{} has a zero dimension",
                size.width, size.height, size.depth_or_array_layers
            )));
        }
        if descriptor.mip_level_count == 0
            || descriptor.mip_level_count > mip_level_count(size.width, size.height)
        {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{} mip levels for a {}x{} texture",
                descriptor.mip_level_count, size.width, size.height
            )));
        }
        if descriptor.dimension.is_cube() && size.depth_or_array_layers % 6 != 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "cube textures need a multiple of 6 layers, got {}",
                size.depth_or_array_layers
            )));
        }
        if let Some(data) = data {
            if data.len() != descriptor.level0_bytes() {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "{} bytes of pixel data, expected {}",
                    data.len(),
                    descriptor.level0_bytes()
                )));
            }
        }

        let caps = self.caps();
        let attachment = descriptor
            .usage
            .intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_TARGET);
        let sampled = descriptor.usage.contains(TextureUsage::SAMPLED);
        let staged = data.is_some() && caps.explicit_sync;
        let initial = if staged {
            ImageState::CopyDst
        } else if attachment && !sampled {
            if descriptor.format.is_depth() {
                ImageState::DepthWrite
            } else {
                ImageState::RenderTarget
            }
        } else {
            ImageState::ShaderRead
        };
        let bottom_up = attachment && caps.origin == FramebufferOrigin::BottomLeft;

        let mut state = self.gpu.lock();
        state.memory.reserve(SoftImage::byte_size(descriptor))?;
        let mut image = SoftImage::new(descriptor, initial, bottom_up);
        if let (Some(data), false) = (data, staged) {
            image.upload_rgba8(data);
        }
        let key = state.textures.insert(image);

        if let (Some(data), true) = (data, staged) {
            let staging = match self.insert_buffer(
                &mut state,
                &BufferDescriptor {
                    label: Some("texture staging".into()),
                    size: data.len() as u64,
                    usage: BufferUsage::COPY_SRC,
                },
            ) {
                Ok(staging) => staging,
                Err(err) => {
                    state.remove_texture(key);
                    return Err(err);
                }
            };
            if let Some(buffer) = state.buffers.get_mut(staging.key()) {
                buffer.data.copy_from_slice(data);
            }
            let copy = Command::CopyBufferToTexture {
                src: staging.key(),
                dst: key,
            };
            let result = self.submit_and_wait(&mut state, "texture upload", vec![copy]);
            state.remove_buffer(staging.key());
            if let Err(err) = result {
                state.remove_texture(key);
                return Err(err);
            }
            // A single level is complete after the copy; longer chains stay in
            // `CopyDst` until their mips are generated.
            if descriptor.mip_level_count == 1 {
                for layer in 0..size.depth_or_array_layers {
                    state.transition(key, layer, 0, ImageState::CopyDst, ImageState::ShaderRead);
                }
            }
        }

        if sampled {
            let index = Self::allocate_heap_entry(&mut state, HeapEntry::Texture(key));
            if let Some(image) = state.textures.get_mut(key) {
                image.heap_index = index;
            }
        }
        log::debug!(
            "SoftDevice: Created texture '{}' ({}x{}x{}, {} mips, {:?})",
            label_of(&descriptor.label),
            size.width,
            size.height,
            size.depth_or_array_layers,
            descriptor.mip_level_count,
            descriptor.dimension
        );
        Ok(TextureId::from_key(key))
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        if state.remove_texture(id.key()) {
            log::trace!("SoftDevice: Destroyed texture {id:?}");
            Ok(())
        } else {
            Err(ResourceError::NotFound)
        }
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError> {
        let mut state = self.gpu.lock();
        let key = state.samplers.insert(SoftSampler {
            descriptor: *descriptor,
            heap_index: None,
        });
        let index = Self::allocate_heap_entry(&mut state, HeapEntry::Sampler(key));
        if let Some(sampler) = state.samplers.get_mut(key) {
            sampler.heap_index = index;
        }
        Ok(SamplerId::from_key(key))
    }

    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        if state.remove_sampler(id.key()) {
            Ok(())
        } else {
            Err(ResourceError::NotFound)
        }
    }

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferId, ResourceError> {
        let mut state = self.gpu.lock();
        let mut extent = None;
        let mut check = |id: Option<TextureId>, usage: TextureUsage| -> Result<_, ResourceError> {
            let Some(id) = id else {
                return Ok(None);
            };
            let image = state.textures.get(id.key()).ok_or(ResourceError::InvalidHandle)?;
            if !image.usage.contains(usage) {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "attachment {id:?} lacks {usage:?} usage"
                )));
            }
            match extent {
                Some(e) if e != (image.width, image.height, image.layers) => {
                    return Err(ResourceError::InvalidDescriptor(
                        "attachments differ in size".to_string(),
                    ))
                }
                _ => extent = Some((image.width, image.height, image.layers)),
            }
            Ok(Some(id.key()))
        };
        let color = check(descriptor.color, TextureUsage::RENDER_TARGET)?;
        let depth = check(descriptor.depth, TextureUsage::DEPTH_TARGET)?;
        if color.is_none() && depth.is_none() {
            return Err(ResourceError::InvalidDescriptor(
                "a framebuffer needs at least one attachment".to_string(),
            ));
        }

        let key = state.framebuffers.insert(SoftFramebuffer { color, depth });
        log::debug!(
            "SoftDevice: Created framebuffer '{}'",
            label_of(&descriptor.label)
        );
        Ok(FramebufferId::from_key(key))
    }

    fn destroy_framebuffer(&self, id: FramebufferId) -> Result<(), ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        match state.framebuffers.remove(id.key()) {
            Some(_) => Ok(()),
            None => Err(ResourceError::NotFound),
        }
    }

    // --- Transfers and read-back ---

    fn generate_mipmaps(&self, texture: TextureId) -> Result<(), ResourceError> {
        if !self.caps().device_mipmaps {
            return Err(ResourceError::Unsupported(format!(
                "{} expects mip chains to be generated with transfers",
                self.gpu.kind()
            )));
        }
        let mut state = self.gpu.lock();
        let image = state
            .textures
            .get_mut(texture.key())
            .ok_or(ResourceError::InvalidHandle)?;
        image.generate_mips();
        for layer in 0..image.layers {
            for mip in 0..image.mips {
                image.set_state(layer, mip, ImageState::ShaderRead);
            }
        }
        Ok(())
    }

    fn begin_transfer(&self) -> Result<Box<dyn TransferEncoder + '_>, ResourceError> {
        if !self.caps().explicit_sync {
            return Err(ResourceError::Unsupported(format!(
                "{} has no transfer command streams",
                self.gpu.kind()
            )));
        }
        Ok(Box::new(SoftTransferEncoder {
            device: self,
            commands: Vec::new(),
        }))
    }

    fn read_texture(&self, id: TextureId, layer: u32, mip: u32) -> Result<Vec<u8>, ResourceError> {
        let mut state = self.gpu.lock();
        state.flush();
        let image = state.textures.get(id.key()).ok_or(ResourceError::InvalidHandle)?;
        if !image.contains(layer, mip) {
            return Err(ResourceError::OutOfBounds);
        }
        Ok(image.read_rgba8(layer, mip))
    }

    // --- Queries ---

    fn resource_counts(&self) -> ResourceCounts {
        self.gpu.lock().counts()
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.caps()
    }

    fn adapter_info(&self) -> GraphicsAdapterInfo {
        let kind = self.gpu.kind();
        let api_version = match kind {
            GraphicsBackendType::Immediate => "3.3 immediate",
            GraphicsBackendType::FenceBased => "1.2 fence/semaphore",
            GraphicsBackendType::CommandListV1 => "1.0 command list",
            GraphicsBackendType::CommandListV2 => "2.0 command list",
        };
        GraphicsAdapterInfo {
            vendor: "Quadra".to_string(),
            renderer: format!("Soft rasterizer ({kind})"),
            api_version: api_version.to_string(),
            backend_type: kind,
        }
    }

    fn frames_in_flight(&self) -> usize {
        self.gpu.frames_in_flight()
    }
}

/// Records barriers and blits for one transfer. Barriers update the tracked layouts
/// as they are recorded, blits run when the transfer is submitted.
#[derive(Debug)]
pub struct SoftTransferEncoder<'a> {
    device: &'a SoftDevice,
    commands: Vec<Command>,
}

impl TransferEncoder for SoftTransferEncoder<'_> {
    fn barrier(&mut self, texture: TextureId, layer: u32, mip: u32, from: ImageState, to: ImageState) {
        self.device
            .gpu
            .lock()
            .transition(texture.key(), layer, mip, from, to);
    }

    fn blit_mip(&mut self, texture: TextureId, layer: u32, src_mip: u32) {
        self.commands.push(Command::BlitMip {
            texture: texture.key(),
            layer,
            src_mip,
        });
    }

    fn finish_and_wait(self: Box<Self>) -> Result<(), ResourceError> {
        let device = self.device;
        let mut state = device.gpu.lock();
        device.submit_and_wait(&mut state, "transfer", self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_core::math::Extent3D;
    use quadra_core::renderer::generate_mip_chain;

    fn device(kind: GraphicsBackendType, budget: Option<u64>) -> SoftDevice {
        SoftDevice::new(Arc::new(SoftGpu::new(kind, 2, budget)))
    }

    fn checkerboard_descriptor() -> TextureDescriptor<'static> {
        TextureDescriptor {
            label: Some("checker".into()),
            size: Extent3D {
                width: 4,
                height: 4,
                depth_or_array_layers: 1,
            },
            mip_level_count: 3,
            format: TextureFormat::Rgba8Unorm,
            dimension: TextureDimension::D2,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
        }
    }

    fn checkerboard() -> Vec<u8> {
        (0..16)
            .flat_map(|i| {
                let v = if (i % 4 + i / 4) % 2 == 0 { 255 } else { 0 };
                [v, v, v, 255]
            })
            .collect()
    }

    #[test]
    fn test_staged_uploads_free_their_staging_buffer() {
        for kind in GraphicsBackendType::ALL {
            let device = device(kind, None);
            let data = [7u8; 64];
            let id = device
                .create_buffer_with_data(
                    &BufferDescriptor {
                        label: None,
                        size: 64,
                        usage: BufferUsage::VERTEX,
                    },
                    &data,
                )
                .unwrap();
            let counts = device.resource_counts();
            assert_eq!(counts.buffers, 1, "{kind}");
            assert_eq!(counts.fences, 0, "{kind}");
            assert_eq!(counts.bytes_allocated, 64, "{kind}");
            assert_eq!(device.gpu.lock().buffers[id.key()].data, data.to_vec());
        }
    }

    #[test]
    fn test_allocations_beyond_the_budget_fail_cleanly() {
        let device = device(GraphicsBackendType::FenceBased, Some(100));
        let err = device
            .create_buffer_with_data(
                &BufferDescriptor {
                    label: None,
                    size: 80,
                    usage: BufferUsage::VERTEX,
                },
                &[0; 80],
            )
            .unwrap_err();
        assert!(matches!(err, ResourceError::OutOfMemory { .. }));
        assert_eq!(device.resource_counts().total_objects(), 0);
        assert_eq!(device.resource_counts().bytes_allocated, 0);
    }

    #[test]
    fn test_uniform_writes_land_in_the_current_frame_copy() {
        let device = device(GraphicsBackendType::CommandListV1, None);
        let id = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        device.gpu.set_frame_slot(1);
        device.write_buffer(id, 0, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.gpu.lock().buffers[id.key()].data, vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(
            device.write_buffer(id, 2, &[0; 4]),
            Err(ResourceError::OutOfBounds)
        );
    }

    #[test]
    fn test_write_buffer_rejects_wrapping_offsets() {
        let device = device(GraphicsBackendType::Immediate, None);
        let id = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::VERTEX,
            })
            .unwrap();
        assert_eq!(device.write_buffer(id, u64::MAX, &[1]), Err(ResourceError::OutOfBounds));
        assert_eq!(
            device.write_buffer(id, u64::MAX - 3, &[0; 8]),
            Err(ResourceError::OutOfBounds)
        );
        assert_eq!(device.write_buffer(id, 16, &[1]), Err(ResourceError::OutOfBounds));
        assert!(device.write_buffer(id, 12, &[1, 2, 3, 4]).is_ok());
        assert_eq!(device.gpu.lock().buffers[id.key()].data[12..], [1, 2, 3, 4]);
    }

    #[test]
    fn test_oversized_textures_fail_before_allocating() {
        let device = device(GraphicsBackendType::FenceBased, Some(1 << 20));
        let descriptor = TextureDescriptor {
            label: None,
            size: Extent3D {
                width: 65536,
                height: 65536,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            format: TextureFormat::Rgba8Unorm,
            dimension: TextureDimension::Cube,
            usage: TextureUsage::SAMPLED,
        };
        assert!(matches!(
            device.create_texture(&descriptor, None),
            Err(ResourceError::OutOfMemory { .. })
        ));
        assert_eq!(device.resource_counts().total_objects(), 0);
        assert_eq!(device.resource_counts().bytes_allocated, 0);
    }

    #[test]
    fn test_shader_formats_are_fixed_per_backend() {
        let text = ShaderSource::embedded(ShaderId::Color, ShaderFormat::TextSource);
        let descriptor = ShaderModuleDescriptor {
            label: None,
            program: ShaderId::Color,
            source: std::borrow::Cow::Borrowed(&text),
        };
        assert!(device(GraphicsBackendType::FenceBased, None)
            .create_shader_module(&descriptor)
            .is_ok());
        assert!(matches!(
            device(GraphicsBackendType::CommandListV2, None).create_shader_module(&descriptor),
            Err(ResourceError::Shader(ShaderError::CompilationError { .. }))
        ));
    }

    #[test]
    fn test_pipelines_check_module_and_stride() {
        let device = device(GraphicsBackendType::CommandListV1, None);
        let blob = ShaderSource::embedded(ShaderId::Water, ShaderFormat::Bytecode);
        let module = device
            .create_shader_module(&ShaderModuleDescriptor {
                label: None,
                program: ShaderId::Water,
                source: std::borrow::Cow::Borrowed(&blob),
            })
            .unwrap();
        let mut descriptor = PipelineDescriptor {
            label: None,
            shader: ShaderId::Water,
            module,
            target: TargetClass::Screen,
            vertex_stride: VERTEX_STRIDE,
            state: RasterState::for_shader(ShaderId::Water),
        };
        assert!(device.create_render_pipeline(&descriptor).is_ok());
        descriptor.shader = ShaderId::Default;
        assert!(device.create_render_pipeline(&descriptor).is_err());
        descriptor.shader = ShaderId::Water;
        descriptor.vertex_stride = 12;
        assert!(device.create_render_pipeline(&descriptor).is_err());
    }

    #[test]
    fn test_checkerboard_mips_average_to_grey_on_every_path() {
        for kind in GraphicsBackendType::ALL {
            let device = device(kind, None);
            let id = device
                .create_texture(&checkerboard_descriptor(), Some(&checkerboard()))
                .unwrap();
            generate_mip_chain(&device, id, 3, 1).unwrap();

            let last = device.read_texture(id, 0, 2).unwrap();
            assert_eq!(last, vec![128, 128, 128, 255], "{kind}");
            let state = device.gpu.lock();
            assert!(state.validation.is_empty(), "{kind}: {:?}", state.validation);
            let image = &state.textures[id.key()];
            for mip in 0..3 {
                assert_eq!(image.state(0, mip), ImageState::ShaderRead, "{kind}");
            }
        }
    }

    #[test]
    fn test_framebuffers_require_matching_attachments() {
        let device = device(GraphicsBackendType::FenceBased, None);
        let target = |w, usage, format| {
            device
                .create_texture(
                    &TextureDescriptor {
                        label: None,
                        size: Extent3D {
                            width: w,
                            height: 8,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        format,
                        dimension: TextureDimension::D2,
                        usage,
                    },
                    None,
                )
                .unwrap()
        };
        let color = target(8, TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED, TextureFormat::Rgba8Unorm);
        let depth = target(8, TextureUsage::DEPTH_TARGET, TextureFormat::Depth32Float);
        let small = target(4, TextureUsage::DEPTH_TARGET, TextureFormat::Depth32Float);

        let fb = |color, depth| {
            device.create_framebuffer(&FramebufferDescriptor {
                label: None,
                color,
                depth,
            })
        };
        assert!(fb(Some(color), Some(depth)).is_ok());
        assert!(fb(Some(color), Some(small)).is_err());
        assert!(fb(None, None).is_err());
        assert!(fb(Some(depth), None).is_err());
    }
}
