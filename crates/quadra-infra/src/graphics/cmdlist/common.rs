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

use crate::graphics::soft::command::Command;
use crate::graphics::soft::gpu::GpuState;
use crate::graphics::soft::queue::{FenceSignal, Submission};
use crate::graphics::soft::store::{FenceKey, TextureKey};
use crate::graphics::soft::sync::SoftFence;
use quadra_core::renderer::RenderError;

/// Frame pacing over one monotonic fence: each slot remembers the value its last
/// frame signals.
#[derive(Debug)]
pub(super) struct Timeline {
    fence: FenceKey,
    next_value: u64,
    slot_values: Vec<u64>,
}

impl Timeline {
    pub(super) fn create(state: &mut GpuState, frames_in_flight: usize) -> Self {
        Self {
            fence: state.fences.insert(SoftFence::Timeline { completed: 0 }),
            next_value: 1,
            slot_values: vec![0; frames_in_flight],
        }
    }

    /// Waits for the frame that last used `slot`.
    pub(super) fn wait_slot(&self, state: &mut GpuState, slot: usize, timeout_ms: u64) -> Result<(), RenderError> {
        let value = self.slot_values.get(slot).copied().unwrap_or(0);
        if value == 0 {
            return Ok(());
        }
        state.wait_fence(self.fence, value, timeout_ms)
    }

    /// Queues a frame (with its present) that signals the next timeline value.
    pub(super) fn submit(&mut self, state: &mut GpuState, slot: usize, mut commands: Vec<Command>, image: TextureKey) {
        let value = self.next_value;
        self.next_value += 1;
        if let Some(v) = self.slot_values.get_mut(slot) {
            *v = value;
        }
        commands.push(Command::Present { image });
        state.submit(Submission::new("frame", commands).with_fence(FenceSignal::Timeline(self.fence, value)));
    }

    pub(super) fn destroy(&self, state: &mut GpuState) {
        state.fences.remove(self.fence);
    }
}
