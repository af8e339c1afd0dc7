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

//! The immediate backend: draws execute as they are issued, bound straight to
//! texture units, and the driver hides all synchronization.

use super::soft::command::{Command, DescriptorRef, DescriptorSet};
use super::soft::context::{BackendModel, SoftContext};
use super::soft::gpu::GpuState;
use super::soft::store::TextureKey;
use quadra_core::renderer::api::GraphicsBackendType;
use quadra_core::renderer::RenderError;

/// Driver-managed state. There is nothing to pace or allocate.
#[derive(Debug, Default)]
pub struct ImmediateModel;

impl BackendModel for ImmediateModel {
    const KIND: GraphicsBackendType = GraphicsBackendType::Immediate;

    fn create(_state: &mut GpuState, _frames_in_flight: usize) -> Result<Self, RenderError> {
        Ok(Self)
    }

    fn begin_slot(&mut self, state: &mut GpuState, _slot: usize, _timeout_ms: u64) -> Result<(), RenderError> {
        // Implicit sync: the previous frame is finished before the next one starts.
        state.flush();
        Ok(())
    }

    fn write_descriptors(
        &mut self,
        _state: &mut GpuState,
        _slot: usize,
        set: DescriptorSet,
    ) -> Result<DescriptorRef, RenderError> {
        Ok(DescriptorRef::Direct(set))
    }

    fn submit(
        &mut self,
        state: &mut GpuState,
        _slot: usize,
        mut commands: Vec<Command>,
        image: TextureKey,
    ) -> Result<(), RenderError> {
        commands.push(Command::Present { image });
        state.execute_now(&commands);
        Ok(())
    }

    fn executes_immediately(&self) -> bool {
        true
    }

    fn destroy(&mut self, _state: &mut GpuState) {}
}

/// A context on the immediate backend.
pub type ImmediateContext = SoftContext<ImmediateModel>;
