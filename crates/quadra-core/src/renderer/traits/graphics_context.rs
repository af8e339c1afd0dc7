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

use crate::math::{Extent2D, LinearRgba};
use crate::renderer::api::*;
use crate::renderer::error::{RenderError, ValidationError};
use crate::renderer::traits::GraphicsDevice;
use std::fmt::Debug;
use std::sync::Arc;

/// What happened to a frame on `present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation.
    Presented,
    /// The surface was stale or suboptimal and the swapchain was rebuilt; the frame may
    /// have been dropped.
    Rebuilt,
    /// The surface has a zero size; nothing was presented.
    Skipped,
}

/// One backend instance: device, surface, swapchain and frame synchronization.
///
/// Lifecycle: `Uninitialized → Initializing → Ready → (Resizing → Ready)* → Released`.
/// A frame is `begin_frame`, any number of `bind_target`/`draw`/`unbind_target`,
/// then `present`.
pub trait GraphicsContext: Send + Debug {
    /// The backend model of this context.
    fn kind(&self) -> GraphicsBackendType;

    /// The current lifecycle state.
    fn state(&self) -> ContextState;

    /// The shared device resources are created against.
    fn device(&self) -> Arc<dyn GraphicsDevice>;

    /// Static capabilities of the backend.
    fn capabilities(&self) -> BackendCapabilities {
        self.kind().capabilities()
    }

    /// Display strings of the device.
    fn adapter_info(&self) -> GraphicsAdapterInfo;

    /// The extent of the swapchain images.
    fn surface_extent(&self) -> Extent2D;

    /// The frame-in-flight slot the next (or current) frame records into.
    fn frame_index(&self) -> usize;

    /// Drains the GPU and rebuilds swapchain-level resources for a new size.
    /// A zero size is ignored.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError>;

    /// Begins a frame and clears the back buffer.
    ///
    /// Explicit backends wait on the slot's fence first, so the slot's resources can be
    /// reused safely. A stale surface is rebuilt transparently.
    fn begin_frame(&mut self, clear_color: LinearRgba) -> Result<(), RenderError>;

    /// Redirects subsequent draws to one layer of a framebuffer, optionally clearing it.
    fn bind_target(
        &mut self,
        framebuffer: FramebufferId,
        layer: u32,
        clear: Option<LinearRgba>,
    ) -> Result<(), RenderError>;

    /// Restores the back buffer as the draw target.
    fn unbind_target(&mut self) -> Result<(), RenderError>;

    /// Makes `textures` readable by the next draws (shadow maps left in a depth-write state).
    fn prepare_sampled(&mut self, textures: &[TextureId]) -> Result<(), RenderError>;

    /// Issues one indexed draw into the bound target.
    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), RenderError>;

    /// Ends the frame, submits it and presents; advances the frame slot.
    fn present(&mut self) -> Result<PresentOutcome, RenderError>;

    /// Blocks until the GPU has finished all submitted work.
    fn wait_idle(&mut self) -> Result<(), RenderError>;

    /// The last presented image, top-down RGBA8.
    fn capture_frame(&mut self) -> Result<Option<CapturedFrame>, RenderError>;

    /// Drains the contract violations recorded since the last call.
    fn take_validation_errors(&mut self) -> Vec<ValidationError>;

    /// Drains the GPU and releases swapchain-level then device-level resources.
    /// Idempotent.
    fn release(&mut self);
}
