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

//! Second-generation command lists: every buffer, texture and sampler gets a
//! descriptor in one persistent heap when it is created, and draws only record
//! indices into it.

use super::common::Timeline;
use crate::graphics::soft::command::{Command, DescriptorRef, DescriptorSet};
use crate::graphics::soft::context::{BackendModel, SoftContext};
use crate::graphics::soft::gpu::GpuState;
use crate::graphics::soft::store::{HeapKey, TextureKey};
use crate::graphics::soft::sync::DescriptorHeap;
use quadra_core::renderer::api::GraphicsBackendType;
use quadra_core::renderer::{RenderError, ResourceError};

#[derive(Debug)]
pub struct CommandListV2Model {
    timeline: Timeline,
    heap: HeapKey,
}

impl BackendModel for CommandListV2Model {
    const KIND: GraphicsBackendType = GraphicsBackendType::CommandListV2;

    fn create(state: &mut GpuState, frames_in_flight: usize) -> Result<Self, RenderError> {
        let heap = state.heaps.insert(DescriptorHeap::persistent());
        state.persistent_heap = Some(heap);
        Ok(Self {
            timeline: Timeline::create(state, frames_in_flight),
            heap,
        })
    }

    fn begin_slot(&mut self, state: &mut GpuState, slot: usize, timeout_ms: u64) -> Result<(), RenderError> {
        self.timeline.wait_slot(state, slot, timeout_ms)
    }

    fn write_descriptors(
        &mut self,
        state: &mut GpuState,
        _slot: usize,
        set: DescriptorSet,
    ) -> Result<DescriptorRef, RenderError> {
        let missing = || RenderError::from(ResourceError::InvalidDescriptor("resource has no heap entry".into()));
        let uniform = state
            .buffers
            .get(set.uniform.buffer)
            .and_then(|b| b.heap_index)
            .ok_or_else(missing)?;
        let mut textures = Vec::with_capacity(set.textures.len());
        for binding in &set.textures {
            let texture = state
                .textures
                .get(binding.texture)
                .and_then(|t| t.heap_index)
                .ok_or_else(missing)?;
            let sampler = state
                .samplers
                .get(binding.sampler)
                .and_then(|s| s.heap_index)
                .ok_or_else(missing)?;
            textures.push((binding.slot, texture, sampler));
        }
        Ok(DescriptorRef::Persistent {
            heap: self.heap,
            uniform,
            copy: set.uniform.copy,
            textures,
        })
    }

    fn submit(
        &mut self,
        state: &mut GpuState,
        slot: usize,
        commands: Vec<Command>,
        image: TextureKey,
    ) -> Result<(), RenderError> {
        self.timeline.submit(state, slot, commands, image);
        Ok(())
    }

    fn destroy(&mut self, state: &mut GpuState) {
        self.timeline.destroy(state);
        if state.persistent_heap == Some(self.heap) {
            state.persistent_heap = None;
        }
        state.heaps.remove(self.heap);
    }
}

/// A context on the second command-list backend.
pub type CommandListV2Context = SoftContext<CommandListV2Model>;
