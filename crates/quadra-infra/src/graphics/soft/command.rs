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

//! The command stream recorded by contexts and transfer encoders.

use super::raster::Viewport;
use super::store::{BufferKey, HeapKey, PipelineKey, PoolKey, SamplerKey, TextureKey};
use quadra_core::renderer::api::{RasterState, ShaderId};

/// One layer of a texture used as an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub texture: TextureKey,
    pub layer: u32,
}

/// The attachments of a pass and how they are loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassTarget {
    pub color: Option<Attachment>,
    pub depth: Option<Attachment>,
    pub clear_color: Option<[f32; 4]>,
    pub clear_depth: Option<f32>,
}

/// The frame copy of a uniform buffer a draw reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBinding {
    pub buffer: BufferKey,
    pub copy: usize,
}

/// A texture and sampler bound to a shader slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledBinding {
    pub slot: u32,
    pub texture: TextureKey,
    pub sampler: SamplerKey,
}

/// A complete set of resources for one draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSet {
    pub uniform: UniformBinding,
    pub textures: Vec<SampledBinding>,
}

/// An entry of a descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapEntry {
    Uniform(UniformBinding),
    Sampled(SampledBinding),
    UniformBuffer(BufferKey),
    Texture(TextureKey),
    Sampler(SamplerKey),
}

/// How a draw finds its descriptors when it executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorRef {
    /// Bound straight to texture units.
    Direct(DescriptorSet),
    /// A set allocated from a per-frame pool.
    PoolSet {
        pool: PoolKey,
        index: u32,
        generation: u64,
        slot: usize,
    },
    /// A contiguous range of a per-frame heap region: one uniform entry followed by
    /// one sampled entry per texture.
    HeapRegion {
        heap: HeapKey,
        offset: u32,
        len: u32,
        generation: u64,
        slot: usize,
    },
    /// Indices of descriptors that live as long as their resources.
    Persistent {
        heap: HeapKey,
        uniform: u32,
        copy: usize,
        /// `(slot, texture index, sampler index)`.
        textures: Vec<(u32, u32, u32)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass(PassTarget),
    EndPass,
    SetViewport(Viewport),
    SetRasterState {
        state: RasterState,
        pipeline: Option<PipelineKey>,
    },
    BindVertexBuffer(BufferKey),
    BindIndexBuffer(BufferKey),
    BindDescriptors(DescriptorRef),
    DrawIndexed {
        program: ShaderId,
        index_count: u32,
    },
    CopyBuffer {
        src: BufferKey,
        dst: BufferKey,
        size: u64,
    },
    CopyBufferToTexture {
        src: BufferKey,
        dst: TextureKey,
    },
    BlitMip {
        texture: TextureKey,
        layer: u32,
        src_mip: u32,
    },
    Present {
        image: TextureKey,
    },
}
