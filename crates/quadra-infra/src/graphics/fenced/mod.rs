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

//! The fence-based backend: each frame slot owns a fence, two semaphores and a
//! descriptor pool, and the CPU may run ahead of the GPU by up to the number of slots.

use super::soft::command::{Command, DescriptorRef, DescriptorSet};
use super::soft::context::{BackendModel, SoftContext};
use super::soft::gpu::GpuState;
use super::soft::queue::{FenceSignal, Submission};
use super::soft::store::{FenceKey, PoolKey, SemaphoreKey, TextureKey};
use super::soft::sync::{DescriptorPool, SoftFence, SoftSemaphore};
use quadra_core::renderer::api::GraphicsBackendType;
use quadra_core::renderer::RenderError;

#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    in_flight: FenceKey,
    image_available: SemaphoreKey,
    render_finished: SemaphoreKey,
    pool: PoolKey,
}

#[derive(Debug)]
pub struct FencedModel {
    slots: Vec<FrameSlot>,
}

impl FencedModel {
    fn slot(&self, slot: usize) -> Result<FrameSlot, RenderError> {
        self.slots
            .get(slot)
            .copied()
            .ok_or_else(|| RenderError::Internal(format!("no frame slot {slot}")))
    }
}

impl BackendModel for FencedModel {
    const KIND: GraphicsBackendType = GraphicsBackendType::FenceBased;

    fn create(state: &mut GpuState, frames_in_flight: usize) -> Result<Self, RenderError> {
        let slots = (0..frames_in_flight)
            .map(|_| FrameSlot {
                // Signaled so the first wait on each slot returns at once.
                in_flight: state.fences.insert(SoftFence::Binary { signaled: true }),
                image_available: state.semaphores.insert(SoftSemaphore::default()),
                render_finished: state.semaphores.insert(SoftSemaphore::default()),
                pool: state.pools.insert(DescriptorPool::default()),
            })
            .collect();
        Ok(Self { slots })
    }

    fn begin_slot(&mut self, state: &mut GpuState, slot: usize, timeout_ms: u64) -> Result<(), RenderError> {
        let frame = self.slot(slot)?;
        state.wait_fence(frame.in_flight, 0, timeout_ms)?;
        if let Some(fence) = state.fences.get_mut(frame.in_flight) {
            *fence = SoftFence::Binary { signaled: false };
        }
        if let Some(pool) = state.pools.get_mut(frame.pool) {
            pool.reset();
        }
        Ok(())
    }

    fn acquired(&mut self, state: &mut GpuState, slot: usize) {
        // The presentation engine is done with the image as soon as it is handed out.
        if let Some(semaphore) = self
            .slots
            .get(slot)
            .and_then(|s| state.semaphores.get_mut(s.image_available))
        {
            semaphore.signaled = true;
        }
    }

    fn write_descriptors(
        &mut self,
        state: &mut GpuState,
        slot: usize,
        set: DescriptorSet,
    ) -> Result<DescriptorRef, RenderError> {
        let frame = self.slot(slot)?;
        let pool = state
            .pools
            .get_mut(frame.pool)
            .ok_or_else(|| RenderError::Internal("descriptor pool was destroyed".into()))?;
        let index = pool.allocate(set);
        Ok(DescriptorRef::PoolSet {
            pool: frame.pool,
            index,
            generation: pool.generation,
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
        let frame = self.slot(slot)?;
        state.submit(
            Submission::new("frame", commands)
                .wait(frame.image_available)
                .signal(frame.render_finished)
                .with_fence(FenceSignal::Binary(frame.in_flight)),
        );
        state.submit(Submission::new("present", vec![Command::Present { image }]).wait(frame.render_finished));
        Ok(())
    }

    fn destroy(&mut self, state: &mut GpuState) {
        for frame in self.slots.drain(..) {
            state.fences.remove(frame.in_flight);
            state.semaphores.remove(frame.image_available);
            state.semaphores.remove(frame.render_finished);
            state.pools.remove(frame.pool);
        }
    }
}

/// A context on the fence-based backend.
pub type FencedContext = SoftContext<FencedModel>;
