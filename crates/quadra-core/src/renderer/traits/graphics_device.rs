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

use crate::renderer::api::*;
use crate::renderer::error::ResourceError;
use crate::renderer::traits::TransferEncoder;
use std::fmt::Debug;

/// The resource-creation half of a backend.
///
/// A device is shared (`Arc<dyn GraphicsDevice>`) by every resource wrapper created
/// against it, so all methods take `&self`. Creation calls are synchronous from the
/// caller's point of view: any staging copy is complete when they return.
pub trait GraphicsDevice: Send + Sync + Debug + 'static {
    /// Compiles a shader module.
    /// ## Errors
    /// * `ResourceError::Shader` - If the source is in the wrong format for this backend
    ///   or does not implement the requested program.
    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleId, ResourceError>;

    /// Destroys a shader module.
    fn destroy_shader_module(&self, id: ShaderModuleId) -> Result<(), ResourceError>;

    /// Bakes a pipeline object.
    /// ## Errors
    /// * `ResourceError::Pipeline` - If the module is unknown or does not implement `descriptor.shader`.
    fn create_render_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<PipelineId, ResourceError>;

    /// Destroys a pipeline object.
    fn destroy_render_pipeline(&self, id: PipelineId) -> Result<(), ResourceError>;

    /// Creates a zero-initialized buffer.
    /// ## Errors
    /// * `ResourceError::OutOfMemory` - If the allocation exceeds the memory budget.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError>;

    /// Creates a device-local buffer holding `data`.
    ///
    /// Explicit backends stage the data, copy it on the GPU and wait for the copy
    /// before returning; the staging allocation is freed on every path.
    fn create_buffer_with_data(
        &self,
        descriptor: &BufferDescriptor,
        data: &[u8],
    ) -> Result<BufferId, ResourceError>;

    /// Writes `data` at `offset`. For uniform buffers the write targets the current
    /// frame slot's copy.
    fn write_buffer(&self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), ResourceError>;

    /// Destroys a buffer.
    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError>;

    /// Creates a texture, optionally uploading tightly packed level-0 data for every layer.
    ///
    /// Uploaded textures with more than one mip level are left in `CopyDst` until their
    /// mip chain is generated.
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
        data: Option<&[u8]>,
    ) -> Result<TextureId, ResourceError>;

    /// Destroys a texture.
    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError>;

    /// Creates a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError>;

    /// Destroys a sampler.
    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError>;

    /// Creates a framebuffer over existing render-target textures.
    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferId, ResourceError>;

    /// Destroys a framebuffer (not its attachments).
    fn destroy_framebuffer(&self, id: FramebufferId) -> Result<(), ResourceError>;

    /// Generates the full mip chain on the device.
    /// ## Errors
    /// * `ResourceError::Unsupported` - On backends where the core drives mip generation.
    fn generate_mipmaps(&self, texture: TextureId) -> Result<(), ResourceError>;

    /// Opens a one-shot transfer command stream.
    /// ## Errors
    /// * `ResourceError::Unsupported` - On backends without explicit transfers.
    fn begin_transfer(&self) -> Result<Box<dyn TransferEncoder + '_>, ResourceError>;

    /// Reads one subresource back as top-down RGBA8, waiting for pending GPU work.
    /// Depth is returned as grey.
    fn read_texture(&self, id: TextureId, layer: u32, mip: u32) -> Result<Vec<u8>, ResourceError>;

    /// Counts live backend objects.
    fn resource_counts(&self) -> ResourceCounts;

    /// Static capabilities of the backend.
    fn capabilities(&self) -> BackendCapabilities;

    /// Display strings of the device.
    fn adapter_info(&self) -> GraphicsAdapterInfo;

    /// Number of frame slots uniform buffers are replicated for.
    fn frames_in_flight(&self) -> usize;
}
