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

//! The software GPU: object stores, layout tracking and queue execution.

use super::command::Command;
use super::executor::{self, ExecState};
use super::image::SoftImage;
use crate::graphics::memory::MemoryTracker;
use super::programs::ProgramEnv;
use super::queue::{FenceSignal, Submission, SubmissionQueue};
use super::store::*;
use super::sync::{DescriptorHeap, DescriptorPool, SoftFence, SoftSemaphore};
use quadra_core::renderer::api::{
    BufferUsage, CapturedFrame, FramebufferOrigin, GraphicsBackendType, ImageState, RasterState,
    ResourceCounts, SamplerDescriptor, ShaderId, ShaderStages, TargetClass,
};
use quadra_core::renderer::{RenderError, ValidationError};
use slotmap::SlotMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct SoftBuffer {
    pub data: Vec<u8>,
    pub usage: BufferUsage,
    /// Size of one frame copy.
    pub copy_size: u64,
    /// Uniform buffers hold one copy per frame in flight.
    pub copies: usize,
    pub heap_index: Option<u32>,
}

impl SoftBuffer {
    pub fn copy_range(&self, copy: usize) -> Range<usize> {
        let start = (copy % self.copies.max(1)) * self.copy_size as usize;
        start..start + self.copy_size as usize
    }
}

#[derive(Debug)]
pub struct SoftSampler {
    pub descriptor: SamplerDescriptor,
    pub heap_index: Option<u32>,
}

#[derive(Debug)]
pub struct SoftModule {
    pub program: ShaderId,
    pub stages: ShaderStages,
}

#[derive(Debug)]
pub struct SoftPipeline {
    pub shader: ShaderId,
    pub module: ModuleKey,
    pub target: TargetClass,
    pub state: RasterState,
}

#[derive(Debug)]
pub struct SoftFramebuffer {
    pub color: Option<TextureKey>,
    pub depth: Option<TextureKey>,
}

/// Everything the device owns, behind the device lock.
#[derive(Debug)]
pub struct GpuState {
    pub kind: GraphicsBackendType,
    pub buffers: SlotMap<BufferKey, SoftBuffer>,
    pub textures: SlotMap<TextureKey, SoftImage>,
    pub samplers: SlotMap<SamplerKey, SoftSampler>,
    pub modules: SlotMap<ModuleKey, SoftModule>,
    pub pipelines: SlotMap<PipelineKey, SoftPipeline>,
    pub framebuffers: SlotMap<FramebufferKey, SoftFramebuffer>,
    pub fences: SlotMap<FenceKey, SoftFence>,
    pub semaphores: SlotMap<SemaphoreKey, SoftSemaphore>,
    pub pools: SlotMap<PoolKey, DescriptorPool>,
    pub heaps: SlotMap<HeapKey, DescriptorHeap>,
    /// The device-wide heap of backends with persistent descriptors.
    pub persistent_heap: Option<HeapKey>,
    pub queue: SubmissionQueue,
    pub memory: MemoryTracker,
    pub validation: Vec<ValidationError>,
    /// Incremented at the start of every frame.
    pub epoch: u64,
    pub last_present: Option<CapturedFrame>,
    pub machine: ExecState,
}

impl GpuState {
    fn new(kind: GraphicsBackendType, memory_budget: Option<u64>) -> Self {
        Self {
            kind,
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            samplers: SlotMap::with_key(),
            modules: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            fences: SlotMap::with_key(),
            semaphores: SlotMap::with_key(),
            pools: SlotMap::with_key(),
            heaps: SlotMap::with_key(),
            persistent_heap: None,
            queue: SubmissionQueue::default(),
            memory: MemoryTracker::new(memory_budget),
            validation: Vec::new(),
            epoch: 0,
            last_present: None,
            machine: ExecState::default(),
        }
    }

    pub fn env(&self) -> ProgramEnv {
        let caps = self.kind.capabilities();
        ProgramEnv {
            bottom_left: caps.origin == FramebufferOrigin::BottomLeft,
            depth_range: caps.depth_range,
        }
    }

    /// Records a layout transition of one subresource, reporting a mismatch between
    /// the expected and tracked state.
    pub fn transition(
        &mut self,
        texture: TextureKey,
        layer: u32,
        mip: u32,
        from: ImageState,
        to: ImageState,
    ) {
        let Some(image) = self.textures.get_mut(texture) else {
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
                texture: quadra_core::renderer::api::TextureId::from_key(texture),
                layer,
                mip,
                expected: from,
                actual,
            });
        }
        image.set_state(layer, mip, to);
    }

    pub fn submit(&mut self, submission: Submission) {
        self.queue.push(submission);
    }

    /// Executes the oldest pending submission. Returns `false` when the queue is empty.
    pub fn execute_next(&mut self) -> bool {
        let Some(submission) = self.queue.pop() else {
            return false;
        };
        for wait in &submission.waits {
            match self.semaphores.get_mut(*wait) {
                Some(semaphore) if semaphore.signaled => semaphore.signaled = false,
                _ => self.validation.push(ValidationError::SemaphoreNotSignaled),
            }
        }

        executor::execute(self, &submission.commands);

        for signal in &submission.signals {
            if let Some(semaphore) = self.semaphores.get_mut(*signal) {
                semaphore.signaled = true;
            }
        }
        match submission.fence {
            Some(FenceSignal::Binary(key)) => {
                if let Some(fence) = self.fences.get_mut(key) {
                    *fence = SoftFence::Binary { signaled: true };
                }
            }
            Some(FenceSignal::Timeline(key, value)) => {
                if let Some(SoftFence::Timeline { completed }) = self.fences.get_mut(key) {
                    *completed = (*completed).max(value);
                }
            }
            None => {}
        }
        log::trace!("Executed submission '{}'", submission.label);
        true
    }

    /// Runs every pending submission.
    pub fn flush(&mut self) {
        while self.execute_next() {}
    }

    /// Runs commands straight away, outside of any submission.
    pub fn execute_now(&mut self, commands: &[Command]) {
        self.flush();
        executor::execute(self, commands);
    }

    /// Blocks until `fence` reaches `value` (ignored for binary fences).
    ///
    /// Fails with a timeout when no pending work can signal the fence.
    pub fn wait_fence(&mut self, fence: FenceKey, value: u64, timeout_ms: u64) -> Result<(), RenderError> {
        loop {
            match self.fences.get(fence) {
                Some(f) if f.is_reached(value) => return Ok(()),
                Some(_) => {}
                None => return Err(RenderError::Internal("wait on a destroyed fence".into())),
            }
            if !self.execute_next() {
                return Err(RenderError::Timeout { millis: timeout_ms });
            }
        }
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
            fences: self.fences.len(),
            semaphores: self.semaphores.len(),
            descriptor_pools: self.pools.len(),
            descriptor_heaps: self.heaps.len(),
            swapchain_images,
            bytes_allocated: self.memory.allocated(),
        }
    }

    pub fn remove_buffer(&mut self, key: BufferKey) -> bool {
        let Some(buffer) = self.buffers.remove(key) else {
            return false;
        };
        self.memory.release(buffer.data.len() as u64);
        self.release_heap_entry(buffer.heap_index);
        true
    }

    pub fn remove_texture(&mut self, key: TextureKey) -> bool {
        let Some(image) = self.textures.remove(key) else {
            return false;
        };
        self.memory.release(image.bytes);
        self.release_heap_entry(image.heap_index);
        true
    }

    pub fn remove_sampler(&mut self, key: SamplerKey) -> bool {
        let Some(sampler) = self.samplers.remove(key) else {
            return false;
        };
        self.release_heap_entry(sampler.heap_index);
        true
    }

    fn release_heap_entry(&mut self, index: Option<u32>) {
        if let (Some(index), Some(heap)) = (index, self.persistent_heap) {
            if let Some(heap) = self.heaps.get_mut(heap) {
                heap.release(index);
            }
        }
    }
}

/// A software device shared by one context and every resource created against it.
#[derive(Debug)]
pub struct SoftGpu {
    kind: GraphicsBackendType,
    frames_in_flight: usize,
    frame_slot: AtomicUsize,
    state: Mutex<GpuState>,
}

impl SoftGpu {
    pub fn new(kind: GraphicsBackendType, frames_in_flight: usize, memory_budget: Option<u64>) -> Self {
        Self {
            kind,
            frames_in_flight: frames_in_flight.max(1),
            frame_slot: AtomicUsize::new(0),
            state: Mutex::new(GpuState::new(kind, memory_budget)),
        }
    }

    pub fn kind(&self) -> GraphicsBackendType {
        self.kind
    }

    /// Locks the device state. A panic while the lock was held does not leave the
    /// state unusable, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, GpuState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Copies of each uniform buffer. Immediate backends consume uniforms as they
    /// are written, so one copy suffices.
    pub fn uniform_copies(&self) -> usize {
        if self.kind.capabilities().explicit_sync {
            self.frames_in_flight
        } else {
            1
        }
    }

    pub fn set_frame_slot(&self, slot: usize) {
        self.frame_slot.store(slot, Ordering::Release);
    }

    pub fn frame_slot(&self) -> usize {
        self.frame_slot.load(Ordering::Acquire)
    }

    /// The uniform copy writes and draws of the current frame use.
    pub fn uniform_copy(&self) -> usize {
        self.frame_slot() % self.uniform_copies()
    }

    /// Submissions queued but not yet executed.
    pub fn pending_submissions(&self) -> usize {
        self.lock().queue.pending()
    }

    /// Submissions the device has executed so far.
    pub fn completed_submissions(&self) -> u64 {
        self.lock().queue.completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_waits_execute_queued_work_in_order() {
        let gpu = SoftGpu::new(GraphicsBackendType::FenceBased, 2, None);
        let mut state = gpu.lock();
        let first = state.fences.insert(SoftFence::Binary { signaled: false });
        let second = state.fences.insert(SoftFence::Binary { signaled: false });
        state.submit(Submission::new("a", Vec::new()).with_fence(FenceSignal::Binary(first)));
        state.submit(Submission::new("b", Vec::new()).with_fence(FenceSignal::Binary(second)));

        state.wait_fence(first, 0, 10).unwrap();
        assert_eq!(state.queue.pending(), 1);
        state.wait_fence(second, 0, 10).unwrap();
        assert_eq!(state.queue.pending(), 0);
    }

    #[test]
    fn test_waiting_on_an_unsignaled_fence_times_out() {
        let gpu = SoftGpu::new(GraphicsBackendType::CommandListV1, 2, None);
        let mut state = gpu.lock();
        let timeline = state.fences.insert(SoftFence::Timeline { completed: 0 });
        state.submit(
            Submission::new("frame", Vec::new()).with_fence(FenceSignal::Timeline(timeline, 1)),
        );
        state.wait_fence(timeline, 1, 50).unwrap();
        assert_eq!(
            state.wait_fence(timeline, 2, 50),
            Err(RenderError::Timeout { millis: 50 })
        );
    }

    #[test]
    fn test_waits_on_unsignaled_semaphores_are_reported() {
        let gpu = SoftGpu::new(GraphicsBackendType::FenceBased, 2, None);
        let mut state = gpu.lock();
        let semaphore = state.semaphores.insert(SoftSemaphore::default());
        state.submit(Submission::new("present", Vec::new()).wait(semaphore));
        state.flush();
        assert_eq!(state.validation, vec![ValidationError::SemaphoreNotSignaled]);
    }

    #[test]
    fn test_uniform_copies_follow_the_sync_model() {
        assert_eq!(SoftGpu::new(GraphicsBackendType::Immediate, 2, None).uniform_copies(), 1);
        let gpu = SoftGpu::new(GraphicsBackendType::CommandListV2, 3, None);
        gpu.set_frame_slot(2);
        assert_eq!(gpu.uniform_copy(), 2);
    }
}
