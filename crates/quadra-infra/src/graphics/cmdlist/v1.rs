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

//! First-generation command lists: descriptors are written into the frame slot's
//! region of a shared heap, which is rewound when the slot is reused.

use super::common::Timeline;
use crate::graphics::soft::command::{Command, DescriptorRef, DescriptorSet, HeapEntry};
use crate::graphics::soft::context::{BackendModel, SoftContext};
use crate::graphics::soft::gpu::GpuState;
use crate::graphics::soft::store::{HeapKey, TextureKey};
use crate::graphics::soft::sync::DescriptorHeap;
use quadra_core::renderer::api::GraphicsBackendType;
use quadra_core::renderer::RenderError;

/// Descriptor entries available to one frame.
pub const REGION_SIZE: u32 = 4096;

#[derive(Debug)]
pub struct CommandListV1Model {
    timeline: Timeline,
    heap: HeapKey,
}

impl BackendModel for CommandListV1Model {
    const KIND: GraphicsBackendType = GraphicsBackendType::CommandListV1;

    fn create(state: &mut GpuState, frames_in_flight: usize) -> Result<Self, RenderError> {
        Ok(Self {
            timeline: Timeline::create(state, frames_in_flight),
            heap: state.heaps.insert(DescriptorHeap::per_frame(frames_in_flight, REGION_SIZE)),
        })
    }

    fn begin_slot(&mut self, state: &mut GpuState, slot: usize, timeout_ms: u64) -> Result<(), RenderError> {
        self.timeline.wait_slot(state, slot, timeout_ms)?;
        if let Some(heap) = state.heaps.get_mut(self.heap) {
            heap.reset_region(slot);
        }
        Ok(())
    }

    fn write_descriptors(
        &mut self,
        state: &mut GpuState,
        slot: usize,
        set: DescriptorSet,
    ) -> Result<DescriptorRef, RenderError> {
        let entries: Vec<HeapEntry> = std::iter::once(HeapEntry::Uniform(set.uniform))
            .chain(set.textures.into_iter().map(HeapEntry::Sampled))
            .collect();
        let heap = state
            .heaps
            .get_mut(self.heap)
            .ok_or_else(|| RenderError::Internal("descriptor heap was destroyed".into()))?;
        let (offset, generation) = heap.write_region(slot, &entries).ok_or_else(|| {
            RenderError::RenderingFailed(format!("descriptor heap region of slot {slot} is full"))
        })?;
        Ok(DescriptorRef::HeapRegion {
            heap: self.heap,
            offset,
            len: entries.len() as u32,
            generation,
            slot,
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
        state.heaps.remove(self.heap);
    }
}

/// A context on the first command-list backend.
pub type CommandListV1Context = SoftContext<CommandListV1Model>;
