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

//! The wgpu implementation of [`GraphicsDevice`].
//!
//! Every resource lives in one table behind a single lock, keyed by the public ids the
//! core hands out. Texture subresource states are tracked here as well, so the backend
//! models with explicit synchronization can validate their barriers.

use super::conversions::IntoWgpu;
use super::shaders::{self, SlotKind, MASK_BINDING, VERTEX_ATTRIBUTES};
use crate::graphics::memory::{texture_bytes, MemoryTracker};
use quadra_core::math::Extent2D;
use quadra_core::renderer::api::*;
use quadra_core::renderer::{
    GraphicsDevice, PipelineError, RenderError, ResourceError, ShaderError, TransferEncoder,
    ValidationError,
};
use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Depth format of every depth attachment.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug)]
pub(crate) struct WgpuModule {
    pub program: ShaderId,
    pub module: wgpu::ShaderModule,
}

#[derive(Debug)]
pub(crate) struct WgpuPipeline {
    pub shader: ShaderId,
    pub module: ShaderModuleId,
    pub target: TargetClass,
    pub state: RasterState,
}

#[derive(Debug)]
pub(crate) struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
    pub usage: BufferUsage,
    /// Size of one copy as requested.
    pub copy_size: u64,
    /// Distance between the starts of two copies.
    pub stride: u64,
    pub copies: usize,
    /// Mirror of the contents, used to widen writes to the copy alignment.
    contents: Vec<u8>,
}

impl WgpuBuffer {
    fn bytes(&self) -> u64 {
        self.buffer.size()
    }
}

#[derive(Debug)]
pub(crate) struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub usage: TextureUsage,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mips: u32,
    /// Owned by a swapchain rather than by a resource wrapper.
    pub swapchain: bool,
    pub bytes: u64,
    states: Vec<ImageState>,
    written_epoch: Vec<u64>,
}

impl WgpuTexture {
    #[inline]
    fn index(&self, layer: u32, mip: u32) -> usize {
        layer as usize * self.mips as usize + mip as usize
    }

    pub fn contains(&self, layer: u32, mip: u32) -> bool {
        layer < self.layers && mip < self.mips
    }

    pub fn state(&self, layer: u32, mip: u32) -> ImageState {
        self.states[self.index(layer, mip)]
    }

    pub fn set_state(&mut self, layer: u32, mip: u32, state: ImageState) {
        let i = self.index(layer, mip);
        self.states[i] = state;
    }

    /// Whether any mip of `layer` is currently an attachment.
    pub fn layer_is_attachment(&self, layer: u32) -> bool {
        (0..self.mips).any(|mip| self.state(layer, mip).is_attachment())
    }

    pub fn written_epoch(&self, layer: u32) -> u64 {
        self.written_epoch[layer as usize]
    }

    pub fn mark_written(&mut self, layer: u32, epoch: u64) {
        self.written_epoch[layer as usize] = epoch;
    }

    /// A single-layer view of one mip, as attachments and blits use.
    pub fn subresource_view(&self, layer: u32, mip: u32) -> wgpu::TextureView {
        layer_view(&self.texture, layer, mip)
    }

    /// The view a slot of `kind` samples, or `None` when this texture cannot serve it.
    fn sampled_view(&self, kind: SlotKind) -> Option<wgpu::TextureView> {
        if !self.texture.usage().contains(wgpu::TextureUsages::TEXTURE_BINDING) {
            return None;
        }
        let depth = self.format.is_depth();
        let (dimension, layers) = match kind {
            SlotKind::Color if !depth => (wgpu::TextureViewDimension::D2, 1),
            SlotKind::Cube if !depth && self.dimension.is_cube() => (wgpu::TextureViewDimension::Cube, 6),
            SlotKind::Shadow if depth => (wgpu::TextureViewDimension::D2Array, self.layers),
            _ => return None,
        };
        Some(self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: None,
            format: None,
            dimension: Some(dimension),
            usage: None,
            aspect: wgpu::TextureAspect::All,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: Some(layers),
        }))
    }
}

fn layer_view(texture: &wgpu::Texture, layer: u32, mip: u32) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: None,
        format: None,
        dimension: Some(wgpu::TextureViewDimension::D2),
        usage: None,
        aspect: wgpu::TextureAspect::All,
        base_mip_level: mip,
        mip_level_count: Some(1),
        base_array_layer: layer,
        array_layer_count: Some(1),
    })
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WgpuFramebuffer {
    pub color: Option<TextureId>,
    pub depth: Option<TextureId>,
}

/// Synchronization and descriptor objects held by the context.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    pub fences: usize,
    pub semaphores: usize,
    pub descriptor_pools: usize,
    pub descriptor_heaps: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    module: ShaderModuleId,
    shader: ShaderId,
    state: RasterState,
    color: Option<wgpu::TextureFormat>,
    depth: bool,
}

type TextureGroupKey = (ShaderId, Vec<Option<(TextureId, SamplerId)>>);

#[derive(Debug, Default)]
pub(crate) struct WgpuState {
    pub modules: HashMap<ShaderModuleId, WgpuModule>,
    pub pipelines: HashMap<PipelineId, WgpuPipeline>,
    pub buffers: HashMap<BufferId, WgpuBuffer>,
    pub textures: HashMap<TextureId, WgpuTexture>,
    pub samplers: HashMap<SamplerId, wgpu::Sampler>,
    pub framebuffers: HashMap<FramebufferId, WgpuFramebuffer>,
    pub memory: MemoryTracker,
    pub validation: Vec<ValidationError>,
    /// Frame counter render-target writes are stamped with.
    pub epoch: u64,
    pub sync: SyncCounts,
    render_pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    uniform_groups: HashMap<(BufferId, ShaderId), wgpu::BindGroup>,
    /// Persistent texture descriptors, kept only by the bindless model.
    texture_groups: HashMap<TextureGroupKey, wgpu::BindGroup>,
    mask_buffers: HashMap<u32, wgpu::Buffer>,
}

impl WgpuState {
    /// Records a layout transition of one subresource, reporting a mismatch between
    /// the expected and tracked state.
    pub fn transition(&mut self, texture: TextureId, layer: u32, mip: u32, from: ImageState, to: ImageState) {
        let Some(image) = self.textures.get_mut(&texture) else {
            log::warn!("Barrier on a destroyed texture ignored");
            return;
        };
        if !image.contains(layer, mip) {
            log::warn!("Barrier outside of texture bounds (layer {layer}, mip {mip}) ignored");
            return;
        }
        let actual = image.state(layer, mip);
        if actual != from {
            self.validation.push(ValidationError::InvalidStateTransition {
                texture,
                layer,
                mip,
                expected: from,
                actual,
            });
        }
        image.set_state(layer, mip, to);
    }

    pub fn counts(&self) -> ResourceCounts {
        let swapchain_images = self.textures.values().filter(|t| t.swapchain).count();
        ResourceCounts {
            buffers: self.buffers.len(),
            textures: self.textures.len() - swapchain_images,
            samplers: self.samplers.len(),
            shader_modules: self.modules.len(),
            pipelines: self.pipelines.len(),
            framebuffers: self.framebuffers.len(),
            fences: self.sync.fences,
            semaphores: self.sync.semaphores,
            descriptor_pools: self.sync.descriptor_pools,
            descriptor_heaps: self.sync.descriptor_heaps,
            swapchain_images,
            bytes_allocated: self.memory.allocated(),
        }
    }

    pub fn remove_buffer(&mut self, id: BufferId) -> bool {
        let Some(buffer) = self.buffers.remove(&id) else {
            return false;
        };
        self.memory.release(buffer.bytes());
        self.uniform_groups.retain(|(b, _), _| *b != id);
        buffer.buffer.destroy();
        true
    }

    pub fn remove_texture(&mut self, id: TextureId) -> bool {
        let Some(image) = self.textures.remove(&id) else {
            return false;
        };
        self.memory.release(image.bytes);
        self.texture_groups
            .retain(|(_, slots), _| !slots.iter().flatten().any(|(t, _)| *t == id));
        image.texture.destroy();
        true
    }

    pub fn remove_sampler(&mut self, id: SamplerId) -> bool {
        if self.samplers.remove(&id).is_none() {
            return false;
        }
        self.texture_groups
            .retain(|(_, slots), _| !slots.iter().flatten().any(|(_, s)| *s == id));
        true
    }
}

/// Everything one indexed draw needs once resolved against the tables.
#[derive(Debug)]
pub(crate) struct PreparedDraw {
    pub pipeline: wgpu::RenderPipeline,
    pub uniform_group: wgpu::BindGroup,
    pub uniform_offset: u32,
    pub texture_group: Option<wgpu::BindGroup>,
    pub vertex: wgpu::Buffer,
    pub index: wgpu::Buffer,
    pub index_count: u32,
}

/// Fallbacks bound to texture slots the draw leaves empty.
#[derive(Debug)]
struct Defaults {
    white: wgpu::TextureView,
    cube: wgpu::TextureView,
    shadow: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

#[derive(Debug)]
struct MipBlitter {
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
}

#[derive(Debug)]
struct ShaderLayouts {
    uniforms: wgpu::BindGroupLayout,
    textures: Option<wgpu::BindGroupLayout>,
    pipeline: wgpu::PipelineLayout,
}

#[derive(Debug)]
pub struct WgpuDevice {
    kind: GraphicsBackendType,
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: GraphicsAdapterInfo,
    frames: usize,
    frame_slot: AtomicUsize,
    uniform_alignment: u64,
    polygon_line: bool,
    clamp_to_border: bool,
    next_id: AtomicU64,
    layouts: HashMap<ShaderId, ShaderLayouts>,
    defaults: Defaults,
    blitter: MipBlitter,
    state: Mutex<WgpuState>,
}

fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn label_of<'a>(label: &'a Option<Cow<'_, str>>) -> &'a str {
    label.as_deref().unwrap_or("unnamed")
}

fn backend_error(what: &str) -> impl FnOnce(RenderError) -> ResourceError + '_ {
    move |e| ResourceError::BackendError(format!("{what} failed: {e}"))
}

impl WgpuDevice {
    /// Opens a logical device on `adapter` and builds the shared layouts and defaults.
    pub fn request(
        kind: GraphicsBackendType,
        adapter: &wgpu::Adapter,
        info: GraphicsAdapterInfo,
        frames_in_flight: usize,
        memory_budget: Option<u64>,
    ) -> Result<Self, RenderError> {
        let optional = wgpu::Features::POLYGON_MODE_LINE | wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let features = adapter.features() & optional;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Quadra device"),
            required_features: features,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: Default::default(),
            experimental_features: Default::default(),
        }))
        .map_err(|e| RenderError::InitializationFailed(format!("Failed to create logical device: {e}")))?;

        device.on_uncaptured_error(std::sync::Arc::new(|e| {
            log::error!("wgpu uncaptured error: {e}");
        }));
        log::info!("Logical device created with optional features {features:?}");

        let depth_range = kind.capabilities().depth_range;
        let mut layouts = HashMap::new();
        for shader in ShaderId::ALL {
            layouts.insert(shader, Self::shader_layouts(&device, shader));
        }
        let defaults = Self::create_defaults(&device, &queue);
        let blitter = Self::create_blitter(&device);
        log::debug!("Built-in layouts ready ({depth_range:?} depth)");

        Ok(Self {
            kind,
            uniform_alignment: u64::from(device.limits().min_uniform_buffer_offset_alignment).max(4),
            polygon_line: features.contains(wgpu::Features::POLYGON_MODE_LINE),
            clamp_to_border: features.contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER),
            device,
            queue,
            info,
            frames: frames_in_flight.clamp(1, 3),
            frame_slot: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            layouts,
            defaults,
            blitter,
            state: Mutex::new(WgpuState {
                memory: MemoryTracker::new(memory_budget),
                ..WgpuState::default()
            }),
        })
    }

    fn shader_layouts(device: &wgpu::Device, shader: ShaderId) -> ShaderLayouts {
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(shader.name()),
            entries: &shaders::uniform_layout_entries(uniform_layout(shader).size as u64),
        });
        let textures = shaders::texture_layout_entries(shader).map(|entries| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(shader.name()),
                entries: &entries,
            })
        });
        let mut groups = vec![Some(&uniforms)];
        groups.extend(textures.as_ref().map(Some));
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(shader.name()),
            bind_group_layouts: &groups,
            immediate_size: 0,
        });
        ShaderLayouts {
            uniforms,
            textures,
            pipeline,
        }
    }

    fn create_defaults(device: &wgpu::Device, queue: &wgpu::Queue) -> Defaults {
        let texture = |label, format, layers, usage| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        };
        let color_usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        let white = texture("white", wgpu::TextureFormat::Rgba8Unorm, 1, color_usage);
        let cube = texture("white cube", wgpu::TextureFormat::Rgba8Unorm, 6, color_usage);
        for (target, layers) in [(&white, 1), (&cube, 6)] {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: target,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &vec![255u8; 4 * layers as usize],
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4),
                    rows_per_image: Some(1),
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: layers,
                },
            );
        }
        // Two layers so every backend treats it as an array.
        let shadow = texture("no shadow", DEPTH_FORMAT, 2, wgpu::TextureUsages::TEXTURE_BINDING);
        let view = |texture: &wgpu::Texture, dimension| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                dimension: Some(dimension),
                ..Default::default()
            })
        };
        Defaults {
            white: view(&white, wgpu::TextureViewDimension::D2),
            cube: view(&cube, wgpu::TextureViewDimension::Cube),
            shadow: view(&shadow, wgpu::TextureViewDimension::D2Array),
            sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("default sampler"),
                ..Default::default()
            }),
        }
    }

    fn create_blitter(device: &wgpu::Device) -> MipBlitter {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mip blit"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mip blit"),
            bind_group_layouts: &[Some(&layout)],
            immediate_size: 0,
        });
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mip blit"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shaders::MIP_BLIT)),
        });
        let pipelines = [wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::Rgba8UnormSrgb]
            .into_iter()
            .map(|format| {
                let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("mip blit"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: Default::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: Some("fs_main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: Default::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                });
                (format, pipeline)
            })
            .collect();
        MipBlitter {
            layout,
            sampler: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("mip blit"),
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                ..Default::default()
            }),
            pipelines,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, WgpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn raw(&self) -> &wgpu::Device {
        &self.device
    }

    pub(crate) fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn kind(&self) -> GraphicsBackendType {
        self.kind
    }

    fn caps(&self) -> BackendCapabilities {
        self.kind.capabilities()
    }

    /// Copies uniform buffers are replicated into.
    pub fn uniform_copies(&self) -> usize {
        if self.caps().explicit_sync {
            self.frames
        } else {
            1
        }
    }

    pub fn set_frame_slot(&self, slot: usize) {
        self.frame_slot.store(slot, Ordering::Release);
    }

    /// The uniform copy the current frame slot reads and writes.
    pub fn uniform_copy(&self) -> usize {
        self.frame_slot.load(Ordering::Acquire) % self.uniform_copies()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Blocks until `submission` (or everything, when `None`) has completed.
    pub(crate) fn wait(
        &self,
        submission: Option<wgpu::SubmissionIndex>,
        timeout: Option<Duration>,
    ) -> Result<(), RenderError> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: submission,
                timeout,
            })
            .map(|_| ())
            .map_err(|e| match e {
                wgpu::PollError::Timeout => RenderError::Timeout {
                    millis: timeout.map_or(u64::MAX, |t| t.as_millis() as u64),
                },
                other => RenderError::Internal(format!("device poll failed: {other}")),
            })
    }

    fn submit_and_wait(&self, encoder: wgpu::CommandEncoder, label: &str) -> Result<(), ResourceError> {
        let submission = self.queue.submit(Some(encoder.finish()));
        self.wait(Some(submission), None).map_err(backend_error(label))
    }

    pub(crate) fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn insert_buffer(
        &self,
        state: &mut WgpuState,
        descriptor: &BufferDescriptor,
        initial: Option<&[u8]>,
    ) -> Result<BufferId, ResourceError> {
        let uniform = descriptor.usage.contains(BufferUsage::UNIFORM);
        let copies = if uniform { self.uniform_copies() } else { 1 };
        let stride = if uniform {
            align_to(descriptor.size.max(1), self.uniform_alignment)
        } else {
            align_to(descriptor.size.max(1), wgpu::COPY_BUFFER_ALIGNMENT)
        };
        let bytes = stride
            .checked_mul(copies as u64)
            .ok_or(ResourceError::OutOfMemory {
                requested: u64::MAX,
                available: 0,
            })?;
        state.memory.reserve(bytes)?;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: bytes,
            usage: descriptor.usage.into_wgpu() | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: initial.is_some(),
        });
        let mut contents = vec![0; (descriptor.size as usize).saturating_mul(copies)];
        if let Some(data) = initial {
            buffer.slice(..).get_mapped_range_mut().slice(..data.len()).copy_from_slice(data);
            buffer.unmap();
            contents[..data.len()].copy_from_slice(data);
        }

        let id = BufferId(self.next_id());
        state.buffers.insert(
            id,
            WgpuBuffer {
                buffer,
                usage: descriptor.usage,
                copy_size: descriptor.size,
                stride,
                copies,
                contents,
            },
        );
        Ok(id)
    }

    fn check_texture_descriptor(descriptor: &TextureDescriptor, data: Option<&[u8]>) -> Result<(), ResourceError> {
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth_or_array_layers == 0 {
            return Err(ResourceError::InvalidDescriptor(format!(
                "texture size {}x{}x{} has a zero dimension",
                size.width, size.height, size.depth_or_array_layers
            )));
        }
        if descriptor.mip_level_count == 0 || descriptor.mip_level_count > mip_level_count(size.width, size.height) {
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
            if descriptor.format.is_depth() {
                return Err(ResourceError::Unsupported("depth textures cannot be uploaded".into()));
            }
        }
        Ok(())
    }

    /// Allocates the wgpu texture of `descriptor` and registers it in `initial` state.
    fn insert_texture(
        &self,
        state: &mut WgpuState,
        descriptor: &TextureDescriptor,
        initial: ImageState,
        swapchain: bool,
    ) -> Result<TextureId, ResourceError> {
        let bytes = texture_bytes(descriptor);
        state.memory.reserve(bytes)?;

        let color = !descriptor.format.is_depth();
        let mut usage = descriptor.usage.into_wgpu() | wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        if color && descriptor.mip_level_count > 1 {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        }
        let mut layers = descriptor.size.depth_or_array_layers;
        // GL infers the texture target from the layer count; keep sampled depth a 2D array.
        let gl_array = self.kind == GraphicsBackendType::Immediate
            && !color
            && descriptor.usage.contains(TextureUsage::SAMPLED)
            && (layers == 1 || layers % 6 == 0);
        if gl_array {
            layers += 1;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                depth_or_array_layers: layers,
                ..descriptor.size.into_wgpu()
            },
            mip_level_count: descriptor.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.into_wgpu(),
            usage,
            view_formats: &[],
        });

        let layers = descriptor.size.depth_or_array_layers;
        let subresources = layers as usize * descriptor.mip_level_count as usize;
        let id = TextureId(self.next_id());
        state.textures.insert(
            id,
            WgpuTexture {
                texture,
                format: descriptor.format,
                dimension: descriptor.dimension,
                usage: descriptor.usage,
                width: descriptor.size.width,
                height: descriptor.size.height,
                layers,
                mips: descriptor.mip_level_count,
                swapchain,
                bytes,
                states: vec![initial; subresources],
                written_epoch: vec![0; layers as usize],
            },
        );
        Ok(id)
    }

    /// Creates one image of a swapchain: a color back buffer or the shared depth buffer.
    pub(crate) fn create_swapchain_image(
        &self,
        state: &mut WgpuState,
        extent: Extent2D,
        format: TextureFormat,
    ) -> Result<TextureId, RenderError> {
        let (usage, initial) = if format.is_depth() {
            (TextureUsage::DEPTH_TARGET, ImageState::DepthWrite)
        } else {
            (TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC, ImageState::Present)
        };
        let descriptor = TextureDescriptor {
            label: Some("swapchain".into()),
            size: quadra_core::math::Extent3D {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            format,
            dimension: TextureDimension::D2,
            usage,
        };
        self.insert_texture(state, &descriptor, initial, true)
            .map_err(|e| RenderError::InitializationFailed(format!("swapchain allocation: {e}")))
    }

    fn compile(&self, descriptor: &ShaderModuleDescriptor) -> Result<wgpu::ShaderModule, ShaderError> {
        let depth_range = self.caps().depth_range;
        let program = descriptor.program;
        let supplied = match &*descriptor.source {
            ShaderSource::Text { vertex, fragment, .. } if shaders::is_wgsl(vertex) => {
                Some(format!("{vertex}\n{fragment}"))
            }
            ShaderSource::Bytecode(blob) => bytecode_payload(blob)
                .and_then(|payload| std::str::from_utf8(payload).ok())
                .filter(|code| shaders::is_wgsl(code))
                .map(str::to_owned),
            _ => None,
        };
        let code = match supplied {
            Some(body) => shaders::compose(&body, depth_range),
            None => shaders::builtin(program, depth_range),
        };
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(program.name()),
            source: wgpu::ShaderSource::Wgsl(Cow::Owned(code)),
        });
        let info = pollster::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if errors.is_empty() {
            Ok(module)
        } else {
            Err(ShaderError::CompilationError {
                label: program.name().to_string(),
                details: errors.join("\n"),
            })
        }
    }

    fn render_pipeline(
        &self,
        state: &mut WgpuState,
        module: &wgpu::ShaderModule,
        key: PipelineKey,
    ) -> wgpu::RenderPipeline {
        if let Some(pipeline) = state.render_pipelines.get(&key) {
            return pipeline.clone();
        }
        let raster = key.state;
        let polygon_mode = if raster.polygon == PolygonMode::Line && !self.polygon_line {
            log::warn!("Line rasterization unavailable; '{}' falls back to fill", key.shader);
            wgpu::PolygonMode::Fill
        } else {
            raster.polygon.into_wgpu()
        };
        let write_mask = if key.shader == ShaderId::Depth {
            wgpu::ColorWrites::empty()
        } else {
            wgpu::ColorWrites::ALL
        };
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color
            .map(|format| wgpu::ColorTargetState {
                format,
                blend: raster.blend.into_wgpu(),
                write_mask,
            })
            .into_iter()
            .map(Some)
            .collect();
        let layout = self.layouts.get(&key.shader).map(|l| &l.pipeline);
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(key.shader.name()),
            layout,
            vertex: wgpu::VertexState {
                module,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: u64::from(VERTEX_STRIDE),
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module,
                entry_point: Some("fs_main"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: raster.cull.into_wgpu(),
                unclipped_depth: false,
                polygon_mode,
                conservative: false,
            },
            depth_stencil: key.depth.then(|| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: Some(raster.depth_write),
                depth_compare: Some(raster.depth_compare.into_wgpu()),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });
        log::debug!("WgpuDevice: Built render pipeline for '{}' ({:?})", key.shader, key.color);
        state.render_pipelines.insert(key, pipeline.clone());
        pipeline
    }

    fn mask_buffer(&self, state: &mut WgpuState, mask: u32) -> wgpu::Buffer {
        state
            .mask_buffers
            .entry(mask)
            .or_insert_with(|| {
                let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("bound slots"),
                    size: 16,
                    usage: wgpu::BufferUsages::UNIFORM,
                    mapped_at_creation: true,
                });
                buffer.slice(..).get_mapped_range_mut().slice(..4).copy_from_slice(&mask.to_le_bytes());
                buffer.unmap();
                buffer
            })
            .clone()
    }

    fn texture_group(
        &self,
        state: &mut WgpuState,
        shader: ShaderId,
        bindings: &[TextureBinding],
    ) -> Result<Option<wgpu::BindGroup>, RenderError> {
        let Some(layout) = self.layouts.get(&shader).and_then(|l| l.textures.as_ref()) else {
            return Ok(None);
        };
        let kinds = shaders::slot_kinds(shader);
        let mut slots: Vec<Option<(TextureId, SamplerId)>> = vec![None; kinds.len()];
        for binding in bindings {
            match slots.get_mut(binding.slot as usize) {
                Some(slot) => *slot = Some((binding.texture, binding.sampler)),
                None => log::warn!("'{shader}' has no texture slot {}", binding.slot),
            }
        }
        let key = (shader, slots);
        if let Some(group) = state.texture_groups.get(&key) {
            return Ok(Some(group.clone()));
        }

        let mut views = Vec::with_capacity(kinds.len());
        let mut samplers = Vec::with_capacity(kinds.len());
        let mut mask = 0u32;
        for (i, kind) in kinds.iter().enumerate() {
            let resolved = key.1[i].and_then(|(texture, sampler)| {
                let view = state.textures.get(&texture)?.sampled_view(*kind);
                if view.is_none() {
                    log::warn!("Texture {texture:?} cannot serve {kind:?} slot {i} of '{shader}'");
                }
                Some((view?, state.samplers.get(&sampler)?.clone()))
            });
            let (view, sampler) = match resolved {
                Some(pair) => {
                    mask |= 1 << i;
                    pair
                }
                None => {
                    let view = match kind {
                        SlotKind::Color => &self.defaults.white,
                        SlotKind::Cube => &self.defaults.cube,
                        SlotKind::Shadow => &self.defaults.shadow,
                    };
                    (view.clone(), self.defaults.sampler.clone())
                }
            };
            views.push(view);
            samplers.push(sampler);
        }
        let mask_buffer = self.mask_buffer(state, mask);

        let mut entries = Vec::with_capacity(kinds.len() * 2 + 1);
        for (i, kind) in kinds.iter().enumerate() {
            let binding = 2 * i as u32;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&views[i]),
            });
            if *kind != SlotKind::Shadow {
                entries.push(wgpu::BindGroupEntry {
                    binding: binding + 1,
                    resource: wgpu::BindingResource::Sampler(&samplers[i]),
                });
            }
        }
        entries.push(wgpu::BindGroupEntry {
            binding: MASK_BINDING,
            resource: mask_buffer.as_entire_binding(),
        });
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(shader.name()),
            layout,
            entries: &entries,
        });
        if self.kind == GraphicsBackendType::CommandListV2 {
            state.texture_groups.insert(key, group.clone());
        }
        Ok(Some(group))
    }

    fn uniform_group(
        &self,
        state: &mut WgpuState,
        shader: ShaderId,
        id: BufferId,
    ) -> Result<(wgpu::BindGroup, u32), RenderError> {
        let copy = self.uniform_copy() as u64;
        let block = uniform_layout(shader).size as u64;
        let buffer = state.buffers.get(&id).ok_or(ResourceError::NotFound)?;
        if buffer.copy_size < block {
            return Err(ResourceError::InvalidDescriptor(format!(
                "'{shader}' reads a {block}-byte uniform block from a {}-byte buffer",
                buffer.copy_size
            ))
            .into());
        }
        let offset = (copy % buffer.copies as u64) * buffer.stride;
        let offset = u32::try_from(offset).map_err(|_| ResourceError::OutOfBounds)?;
        if let Some(group) = state.uniform_groups.get(&(id, shader)) {
            return Ok((group.clone(), offset));
        }
        let layout = self
            .layouts
            .get(&shader)
            .map(|l| &l.uniforms)
            .ok_or_else(|| RenderError::Internal(format!("no layout for '{shader}'")))?;
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(shader.name()),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer.buffer,
                    offset: 0,
                    size: NonZeroU64::new(block),
                }),
            }],
        });
        state.uniform_groups.insert((id, shader), group.clone());
        Ok((group, offset))
    }

    /// Resolves one draw into wgpu objects. `bindings` are the texture bindings that
    /// survived validation; the others fall back to the slot defaults.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn prepare_draw(
        &self,
        state: &mut WgpuState,
        call: &DrawCall<'_>,
        module: ShaderModuleId,
        state_override: Option<RasterState>,
        bindings: &[TextureBinding],
        color: Option<wgpu::TextureFormat>,
        depth: bool,
    ) -> Result<PreparedDraw, RenderError> {
        let shader = call.shader;
        let wgpu_module = state
            .modules
            .get(&module)
            .map(|m| m.module.clone())
            .ok_or_else(|| RenderError::from(ResourceError::from(ShaderError::NotFound { id: module })))?;
        let (vertex, index, index_count) = {
            let vertex = state.buffers.get(&call.vertex_buffer).ok_or(ResourceError::NotFound)?;
            let index = state.buffers.get(&call.index_buffer).ok_or(ResourceError::NotFound)?;
            let available = u32::try_from(index.copy_size / 4).unwrap_or(u32::MAX);
            (vertex.buffer.clone(), index.buffer.clone(), call.index_count.min(available))
        };
        let (uniform_group, uniform_offset) = self.uniform_group(state, shader, call.uniform_buffer)?;
        let texture_group = self.texture_group(state, shader, bindings)?;
        let key = PipelineKey {
            module,
            shader,
            state: state_override.unwrap_or(call.state),
            color,
            depth,
        };
        let pipeline = self.render_pipeline(state, &wgpu_module, key);
        Ok(PreparedDraw {
            pipeline,
            uniform_group,
            uniform_offset,
            texture_group,
            vertex,
            index,
            index_count,
        })
    }

    /// Records a box-filtered downsample of `src_mip` into the next level.
    fn encode_blit(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, layer: u32, src_mip: u32) {
        let Some(pipeline) = self.blitter.pipelines.get(&texture.format()) else {
            log::warn!("No mip blit for {:?}; level {} left as is", texture.format(), src_mip + 1);
            return;
        };
        let source = layer_view(texture, layer, src_mip);
        let target = layer_view(texture, layer, src_mip + 1);
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mip blit"),
            layout: &self.blitter.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.blitter.sampler),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("mip blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &group, &[]);
        pass.draw(0..3, 0..1);
    }

    /// Maps a read-back buffer and copies its contents out.
    pub(crate) fn map_read(&self, buffer: &wgpu::Buffer) -> Result<Vec<u8>, RenderError> {
        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait(None, None)?;
        receiver
            .recv()
            .map_err(|_| RenderError::Internal("read-back callback dropped".into()))?
            .map_err(|e| RenderError::Internal(format!("read-back mapping failed: {e}")))?;
        let data = slice.get_mapped_range().to_vec();
        buffer.unmap();
        Ok(data)
    }
}

/// Bytes per row of a texture copy, padded to the copy alignment.
pub(crate) fn padded_row(width: u32) -> u32 {
    align_to(u64::from(width) * 4, u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)) as u32
}

/// Drops the row padding of a read-back, converting depth to grey.
pub(crate) fn unpad_rows(data: &[u8], width: u32, height: u32, depth: bool) -> Vec<u8> {
    let row = width as usize * 4;
    let padded = padded_row(width) as usize;
    let mut out = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let Some(src) = data.get(y * padded..y * padded + row) else {
            break;
        };
        if depth {
            for texel in src.chunks_exact(4) {
                let d = f32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                let v = (d.clamp(0.0, 1.0) * 255.0).round() as u8;
                out.extend_from_slice(&[v, v, v, 255]);
            }
        } else {
            out.extend_from_slice(src);
        }
    }
    out
}

/// The payload after the header of a bytecode blob.
fn bytecode_payload(blob: &[u8]) -> Option<&[u8]> {
    let name_len = *blob.get(8)? as usize;
    blob.get(9 + name_len..)
}

impl GraphicsDevice for WgpuDevice {
    // --- Shader Operations ---

    fn create_shader_module(&self, descriptor: &ShaderModuleDescriptor) -> Result<ShaderModuleId, ResourceError> {
        let expected = self.caps().shader_format;
        if descriptor.source.format() != expected {
            return Err(ShaderError::CompilationError {
                label: descriptor.program.name().to_string(),
                details: format!(
                    "{} consumes {expected:?} shaders, got {:?}",
                    self.kind,
                    descriptor.source.format()
                ),
            }
            .into());
        }
        let stages = validate_shader_source(descriptor.program, &descriptor.source)?;
        let module = self.compile(descriptor)?;

        let id = ShaderModuleId(self.next_id());
        self.lock().modules.insert(
            id,
            WgpuModule {
                program: descriptor.program,
                module,
            },
        );
        log::debug!(
            "WgpuDevice: Created shader module '{}' ({stages:?})",
            label_of(&descriptor.label)
        );
        Ok(id)
    }

    fn destroy_shader_module(&self, id: ShaderModuleId) -> Result<(), ResourceError> {
        let mut state = self.lock();
        match state.modules.remove(&id) {
            Some(_) => {
                state.render_pipelines.retain(|key, _| key.module != id);
                Ok(())
            }
            None => Err(ShaderError::NotFound { id }.into()),
        }
    }

    // --- Pipeline Operations ---

    fn create_render_pipeline(&self, descriptor: &PipelineDescriptor) -> Result<PipelineId, ResourceError> {
        if !self.caps().bakes_pipelines {
            return Err(ResourceError::Unsupported(format!("{} has no pipeline objects", self.kind)));
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

        let mut state = self.lock();
        let Some(module) = state.modules.get(&descriptor.module) else {
            return Err(PipelineError::InvalidShaderModuleForPipeline { id: descriptor.module }.into());
        };
        if module.program != descriptor.shader {
            return Err(fail(format!(
                "module implements '{}', pipeline needs '{}'",
                module.program, descriptor.shader
            )));
        }
        // Bake now so the first draw does not pay for it.
        let (color, depth) = match descriptor.target {
            TargetClass::Screen => (Some(wgpu::TextureFormat::Rgba8Unorm), true),
            TargetClass::OffscreenColor => (Some(wgpu::TextureFormat::Rgba8Unorm), true),
            TargetClass::DepthOnly => (None, true),
        };
        let module_handle = module.module.clone();
        self.render_pipeline(
            &mut state,
            &module_handle,
            PipelineKey {
                module: descriptor.module,
                shader: descriptor.shader,
                state: descriptor.state,
                color,
                depth,
            },
        );

        let id = PipelineId(self.next_id());
        state.pipelines.insert(
            id,
            WgpuPipeline {
                shader: descriptor.shader,
                module: descriptor.module,
                target: descriptor.target,
                state: descriptor.state,
            },
        );
        log::debug!(
            "WgpuDevice: Baked pipeline for '{}' / {:?}",
            descriptor.shader,
            descriptor.target
        );
        Ok(id)
    }

    fn destroy_render_pipeline(&self, id: PipelineId) -> Result<(), ResourceError> {
        match self.lock().pipelines.remove(&id) {
            Some(_) => Ok(()),
            None => Err(PipelineError::InvalidRenderPipeline { id }.into()),
        }
    }

    // --- Buffer Operations ---

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        let id = self.insert_buffer(&mut self.lock(), descriptor, None)?;
        log::debug!(
            "WgpuDevice: Created buffer '{}' ({} bytes, {:?})",
            label_of(&descriptor.label),
            descriptor.size,
            descriptor.usage
        );
        Ok(id)
    }

    fn create_buffer_with_data(&self, descriptor: &BufferDescriptor, data: &[u8]) -> Result<BufferId, ResourceError> {
        if data.len() as u64 > descriptor.size {
            return Err(ResourceError::InvalidDescriptor(format!(
                "{} bytes of data for a {}-byte buffer",
                data.len(),
                descriptor.size
            )));
        }
        let mut state = self.lock();
        if !self.caps().explicit_sync {
            return self.insert_buffer(&mut state, descriptor, Some(data));
        }

        let staged = align_to(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = self.insert_buffer(
            &mut state,
            &BufferDescriptor {
                label: Some("staging".into()),
                size: staged,
                usage: BufferUsage::COPY_SRC,
            },
            Some(data),
        )?;
        let result = self
            .insert_buffer(
                &mut state,
                &BufferDescriptor {
                    usage: descriptor.usage | BufferUsage::COPY_DST,
                    ..descriptor.clone()
                },
                None,
            )
            .and_then(|dst| {
                if let Some(target) = state.buffers.get_mut(&dst) {
                    target.contents[..data.len()].copy_from_slice(data);
                }
                let mut encoder = self.encoder("buffer upload");
                if let (Some(src), Some(target)) = (state.buffers.get(&staging), state.buffers.get(&dst)) {
                    encoder.copy_buffer_to_buffer(&src.buffer, 0, &target.buffer, 0, staged);
                }
                match self.submit_and_wait(encoder, "buffer upload") {
                    Ok(()) => Ok(dst),
                    Err(err) => {
                        state.remove_buffer(dst);
                        Err(err)
                    }
                }
            });
        state.remove_buffer(staging);

        let id = result?;
        log::debug!(
            "WgpuDevice: Uploaded buffer '{}' ({} bytes) through staging",
            label_of(&descriptor.label),
            data.len()
        );
        Ok(id)
    }

    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let copy = self.uniform_copy();
        let mut state = self.lock();
        let buffer = state.buffers.get_mut(&id).ok_or(ResourceError::InvalidHandle)?;
        let copy = if buffer.usage.contains(BufferUsage::UNIFORM) {
            copy % buffer.copies
        } else {
            0
        };
        let copy_size = usize::try_from(buffer.copy_size).map_err(|_| ResourceError::OutOfBounds)?;
        let (start, end) = usize::try_from(offset)
            .ok()
            .and_then(|offset| Some((offset, offset.checked_add(data.len())?)))
            .filter(|&(_, end)| end <= copy_size)
            .ok_or(ResourceError::OutOfBounds)?;

        let mirror = copy * copy_size;
        buffer.contents[mirror + start..mirror + end].copy_from_slice(data);
        // Widen to the copy alignment, reading the neighbours from the mirror.
        let aligned_start = start - start % 4;
        let aligned_end = align_to(end as u64, 4) as usize;
        let mut window = vec![0u8; aligned_end - aligned_start];
        let known = aligned_end.min(copy_size) - aligned_start;
        window[..known].copy_from_slice(&buffer.contents[mirror + aligned_start..mirror + aligned_start + known]);
        let device_offset = copy as u64 * buffer.stride + aligned_start as u64;
        self.queue.write_buffer(&buffer.buffer, device_offset, &window);
        Ok(())
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        if self.lock().remove_buffer(id) {
            log::trace!("WgpuDevice: Destroyed buffer {id:?}");
            Ok(())
        } else {
            Err(ResourceError::NotFound)
        }
    }

    // --- Texture Operations ---

    fn create_texture(&self, descriptor: &TextureDescriptor, data: Option<&[u8]>) -> Result<TextureId, ResourceError> {
        Self::check_texture_descriptor(descriptor, data)?;
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

        let mut state = self.lock();
        let id = self.insert_texture(&mut state, descriptor, initial, false)?;
        if let (Some(data), Some(image)) = (data, state.textures.get(&id)) {
            let size = descriptor.size;
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &image.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(size.width * descriptor.format.bytes_per_pixel()),
                    rows_per_image: Some(size.height),
                },
                size.into_wgpu(),
            );
        }
        if staged {
            if let Err(err) = self.submit_and_wait(self.encoder("texture upload"), "texture upload") {
                state.remove_texture(id);
                return Err(err);
            }
            // A single level is complete after the copy; longer chains stay in
            // `CopyDst` until their mips are generated.
            if descriptor.mip_level_count == 1 {
                for layer in 0..descriptor.size.depth_or_array_layers {
                    state.transition(id, layer, 0, ImageState::CopyDst, ImageState::ShaderRead);
                }
            }
        }
        log::debug!(
            "WgpuDevice: Created texture '{}' ({}x{}x{}, {} mips, {:?})",
            label_of(&descriptor.label),
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth_or_array_layers,
            descriptor.mip_level_count,
            descriptor.dimension
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        if self.lock().remove_texture(id) {
            log::trace!("WgpuDevice: Destroyed texture {id:?}");
            Ok(())
        } else {
            Err(ResourceError::NotFound)
        }
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError> {
        let address = |mode: AddressMode| {
            if mode == AddressMode::ClampToBorder && !self.clamp_to_border {
                wgpu::AddressMode::ClampToEdge
            } else {
                mode.into_wgpu()
            }
        };
        let modes = [descriptor.address_mode_u, descriptor.address_mode_v, descriptor.address_mode_w];
        let border = modes.iter().any(|m| *m == AddressMode::ClampToBorder) && self.clamp_to_border;
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: address(descriptor.address_mode_u),
            address_mode_v: address(descriptor.address_mode_v),
            address_mode_w: address(descriptor.address_mode_w),
            mag_filter: descriptor.mag_filter.into_wgpu(),
            min_filter: descriptor.min_filter.into_wgpu(),
            mipmap_filter: descriptor.mipmap_filter.into_wgpu(),
            border_color: descriptor
                .border_color
                .filter(|_| border)
                .map(IntoWgpu::into_wgpu),
            ..Default::default()
        });
        let id = SamplerId(self.next_id());
        self.lock().samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError> {
        if self.lock().remove_sampler(id) {
            Ok(())
        } else {
            Err(ResourceError::NotFound)
        }
    }

    fn create_framebuffer(&self, descriptor: &FramebufferDescriptor) -> Result<FramebufferId, ResourceError> {
        let mut state = self.lock();
        let mut extent = None;
        let mut check = |id: Option<TextureId>, usage: TextureUsage| -> Result<_, ResourceError> {
            let Some(id) = id else {
                return Ok(None);
            };
            let image = state.textures.get(&id).ok_or(ResourceError::InvalidHandle)?;
            if !image.usage.contains(usage) {
                return Err(ResourceError::InvalidDescriptor(format!("attachment {id:?} lacks {usage:?} usage")));
            }
            match extent {
                Some(e) if e != (image.width, image.height, image.layers) => {
                    return Err(ResourceError::InvalidDescriptor("attachments differ in size".to_string()))
                }
                _ => extent = Some((image.width, image.height, image.layers)),
            }
            Ok(Some(id))
        };
        let color = check(descriptor.color, TextureUsage::RENDER_TARGET)?;
        let depth = check(descriptor.depth, TextureUsage::DEPTH_TARGET)?;
        if color.is_none() && depth.is_none() {
            return Err(ResourceError::InvalidDescriptor(
                "a framebuffer needs at least one attachment".to_string(),
            ));
        }

        let id = FramebufferId(self.next_id());
        state.framebuffers.insert(id, WgpuFramebuffer { color, depth });
        log::debug!("WgpuDevice: Created framebuffer '{}'", label_of(&descriptor.label));
        Ok(id)
    }

    fn destroy_framebuffer(&self, id: FramebufferId) -> Result<(), ResourceError> {
        match self.lock().framebuffers.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::NotFound),
        }
    }

    // --- Transfers and read-back ---

    fn generate_mipmaps(&self, texture: TextureId) -> Result<(), ResourceError> {
        if !self.caps().device_mipmaps {
            return Err(ResourceError::Unsupported(format!(
                "{} expects mip chains to be generated with transfers",
                self.kind
            )));
        }
        let mut state = self.lock();
        let image = state.textures.get_mut(&texture).ok_or(ResourceError::InvalidHandle)?;
        if image.format.is_depth() {
            log::warn!("Mip generation skipped for depth texture {texture:?}");
        } else {
            let mut encoder = self.encoder("mipmaps");
            for layer in 0..image.layers {
                for mip in 0..image.mips.saturating_sub(1) {
                    self.encode_blit(&mut encoder, &image.texture, layer, mip);
                }
            }
            self.queue.submit(Some(encoder.finish()));
        }
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
                self.kind
            )));
        }
        Ok(Box::new(WgpuTransferEncoder {
            device: self,
            encoder: self.encoder("transfer"),
        }))
    }

    fn read_texture(&self, id: TextureId, layer: u32, mip: u32) -> Result<Vec<u8>, ResourceError> {
        let (texture, depth, width, height) = {
            let state = self.lock();
            let image = state.textures.get(&id).ok_or(ResourceError::InvalidHandle)?;
            if !image.contains(layer, mip) {
                return Err(ResourceError::OutOfBounds);
            }
            let (width, height) = mip_extent(image.width, image.height, mip);
            (image.texture.clone(), image.format.is_depth(), width, height)
        };
        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texture read-back"),
            size: u64::from(padded_row(width)) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self.encoder("texture read-back");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: mip,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: if depth {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &readback,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row(width)),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        let data = self.map_read(&readback).map_err(backend_error("texture read-back"))?;
        readback.destroy();
        Ok(unpad_rows(&data, width, height, depth))
    }

    // --- Queries ---

    fn resource_counts(&self) -> ResourceCounts {
        self.lock().counts()
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.caps()
    }

    fn adapter_info(&self) -> GraphicsAdapterInfo {
        self.info.clone()
    }

    fn frames_in_flight(&self) -> usize {
        self.frames
    }
}

/// A one-shot command stream of barriers and mip blits.
#[derive(Debug)]
pub struct WgpuTransferEncoder<'a> {
    device: &'a WgpuDevice,
    encoder: wgpu::CommandEncoder,
}

impl TransferEncoder for WgpuTransferEncoder<'_> {
    fn barrier(&mut self, texture: TextureId, layer: u32, mip: u32, from: ImageState, to: ImageState) {
        self.device.lock().transition(texture, layer, mip, from, to);
    }

    fn blit_mip(&mut self, texture: TextureId, layer: u32, src_mip: u32) {
        let image = {
            let state = self.device.lock();
            match state.textures.get(&texture) {
                Some(image) if image.contains(layer, src_mip + 1) => Some(image.texture.clone()),
                _ => None,
            }
        };
        match image {
            Some(image) => self.device.encode_blit(&mut self.encoder, &image, layer, src_mip),
            None => log::warn!("Mip blit outside of texture {texture:?} ignored"),
        }
    }

    fn finish_and_wait(self: Box<Self>) -> Result<(), ResourceError> {
        let WgpuTransferEncoder { device, encoder } = *self;
        device.submit_and_wait(encoder, "transfer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::wgpu::WgpuBackendSelector;
    use quadra_core::math::Extent3D;
    use quadra_core::renderer::generate_mip_chain;

    /// A device of `kind`, or `None` on machines without a matching adapter.
    fn device(kind: GraphicsBackendType, budget: Option<u64>) -> Option<WgpuDevice> {
        let selector = WgpuBackendSelector::new(kind, false);
        let adapter = match selector.select() {
            Ok(adapter) => adapter,
            Err(e) => {
                eprintln!("skipping {kind}: {e}");
                return None;
            }
        };
        let info = WgpuBackendSelector::adapter_info(&adapter, kind);
        WgpuDevice::request(kind, &adapter, info, 2, budget).ok()
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
    fn test_padded_rows_are_dropped_on_read_back() {
        let padded = padded_row(2) as usize;
        assert_eq!(padded, 256);
        let mut data = vec![0u8; padded * 2];
        data[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[padded..padded + 8].copy_from_slice(&[9; 8]);
        let rows = unpad_rows(&data, 2, 2, false);
        assert_eq!(rows.len(), 16);
        assert_eq!(&rows[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&rows[8..], &[9; 8]);
    }

    #[test]
    fn test_depth_reads_back_as_grey() {
        let mut data = vec![0u8; padded_row(1) as usize];
        data[..4].copy_from_slice(&1.0f32.to_le_bytes());
        assert_eq!(unpad_rows(&data, 1, 1, true), vec![255, 255, 255, 255]);
    }

    #[test]
    fn test_bytecode_payload_skips_the_header() {
        let blob = encode_bytecode(ShaderId::Hud, ShaderStages::VERTEX | ShaderStages::FRAGMENT, b"@vertex");
        assert_eq!(bytecode_payload(&blob), Some(&b"@vertex"[..]));
        assert_eq!(bytecode_payload(&[0; 4]), None);
    }

    #[test]
    fn test_staged_uploads_free_their_staging_buffer() {
        for kind in GraphicsBackendType::ALL {
            let Some(device) = device(kind, None) else {
                continue;
            };
            let data = [7u8; 64];
            device
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
            assert_eq!(counts.bytes_allocated, 64, "{kind}");
        }
    }

    #[test]
    fn test_allocations_beyond_the_budget_fail_cleanly() {
        let Some(device) = device(GraphicsBackendType::FenceBased, Some(100)) else {
            return;
        };
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
    fn test_write_buffer_rejects_wrapping_offsets() {
        let Some(device) = device(GraphicsBackendType::Immediate, None) else {
            return;
        };
        let id = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::VERTEX,
            })
            .unwrap();
        assert_eq!(device.write_buffer(id, u64::MAX, &[1]), Err(ResourceError::OutOfBounds));
        assert_eq!(device.write_buffer(id, u64::MAX - 3, &[0; 8]), Err(ResourceError::OutOfBounds));
        assert_eq!(device.write_buffer(id, 16, &[1]), Err(ResourceError::OutOfBounds));
        assert!(device.write_buffer(id, 13, &[1, 2, 3]).is_ok());
        assert_eq!(device.lock().buffers[&id].contents[12..], [0, 1, 2, 3]);
    }

    #[test]
    fn test_uniform_writes_land_in_the_current_frame_copy() {
        let Some(device) = device(GraphicsBackendType::CommandListV1, None) else {
            return;
        };
        let id = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        device.set_frame_slot(1);
        device.write_buffer(id, 0, &[1, 2, 3, 4]).unwrap();
        let state = device.lock();
        let buffer = &state.buffers[&id];
        assert_eq!(buffer.copies, 2);
        assert_eq!(buffer.stride % device.uniform_alignment, 0);
        assert_eq!(buffer.contents, vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_shader_formats_are_fixed_per_backend() {
        let text = ShaderSource::embedded(ShaderId::Color, ShaderFormat::TextSource);
        let descriptor = ShaderModuleDescriptor {
            label: None,
            program: ShaderId::Color,
            source: Cow::Borrowed(&text),
        };
        if let Some(device) = device(GraphicsBackendType::CommandListV2, None) {
            assert!(matches!(
                device.create_shader_module(&descriptor),
                Err(ResourceError::Shader(ShaderError::CompilationError { .. }))
            ));
        }
        if let Some(device) = device(GraphicsBackendType::FenceBased, None) {
            assert!(device.create_shader_module(&descriptor).is_ok());
        }
    }

    #[test]
    fn test_invalid_wgsl_fails_to_compile() {
        let Some(device) = device(GraphicsBackendType::FenceBased, None) else {
            return;
        };
        let broken = ShaderSource::Text {
            vertex: "#program color\n@vertex fn vs_main() -> nonsense {}".into(),
            fragment: "#program color\n".into(),
            geometry: None,
        };
        let result = device.create_shader_module(&ShaderModuleDescriptor {
            label: None,
            program: ShaderId::Color,
            source: Cow::Borrowed(&broken),
        });
        assert!(matches!(result, Err(ResourceError::Shader(ShaderError::CompilationError { .. }))));
    }

    #[test]
    fn test_pipelines_check_module_and_stride() {
        let Some(device) = device(GraphicsBackendType::CommandListV1, None) else {
            return;
        };
        let blob = ShaderSource::embedded(ShaderId::Water, ShaderFormat::Bytecode);
        let module = device
            .create_shader_module(&ShaderModuleDescriptor {
                label: None,
                program: ShaderId::Water,
                source: Cow::Borrowed(&blob),
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
            let Some(device) = device(kind, None) else {
                continue;
            };
            let descriptor = TextureDescriptor {
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
            };
            let id = device.create_texture(&descriptor, Some(&checkerboard())).unwrap();
            generate_mip_chain(&device, id, 3, 1).unwrap();

            let last = device.read_texture(id, 0, 2).unwrap();
            for channel in &last[..3] {
                assert!((127..=128).contains(channel), "{kind}: {last:?}");
            }
            let state = device.lock();
            assert!(state.validation.is_empty(), "{kind}: {:?}", state.validation);
            for mip in 0..3 {
                assert_eq!(state.textures[&id].state(0, mip), ImageState::ShaderRead, "{kind}");
            }
        }
    }

    #[test]
    fn test_framebuffers_require_matching_attachments() {
        let Some(device) = device(GraphicsBackendType::FenceBased, None) else {
            return;
        };
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
