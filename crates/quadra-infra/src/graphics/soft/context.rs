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

//! The frame loop shared by every software backend.
//!
//! A [`SoftContext`] owns the swapchain and the frame recorder; everything that
//! differs between backend models (frame pacing, descriptor allocation and how a
//! frame reaches the queue) lives behind [`BackendModel`].

use super::command::{Attachment, Command, DescriptorRef, DescriptorSet, SampledBinding, UniformBinding};
use super::device::SoftDevice;
use super::gpu::{GpuState, SoftGpu};
use super::recorder::{BoundTarget, FrameRecorder};
use super::store::{PublicId, TextureKey};
use super::swapchain::{Swapchain, SwapchainStatus};
use quadra_core::math::{Extent2D, LinearRgba};
use quadra_core::platform::{RenderWindow, RenderWindowHandle};
use quadra_core::renderer::api::*;
use quadra_core::renderer::{
    GraphicsContext, GraphicsDevice, PipelineError, PresentOutcome, RenderError, ResourceError,
    ShaderError, ValidationError,
};
use std::fmt::Debug;
use std::sync::Arc;

/// The part of a backend that decides how recorded frames reach the device.
pub trait BackendModel: Send + Debug + Sized + 'static {
    const KIND: GraphicsBackendType;

    /// Creates the per-slot synchronization objects and descriptor storage.
    fn create(state: &mut GpuState, frames_in_flight: usize) -> Result<Self, RenderError>;

    /// Makes `slot` reusable: waits for the frame that last used it and resets its
    /// descriptors.
    fn begin_slot(&mut self, state: &mut GpuState, slot: usize, timeout_ms: u64) -> Result<(), RenderError>;

    /// Called once the back buffer of `slot` has been acquired.
    fn acquired(&mut self, _state: &mut GpuState, _slot: usize) {}

    /// Stores the descriptors of one draw.
    fn write_descriptors(
        &mut self,
        state: &mut GpuState,
        slot: usize,
        set: DescriptorSet,
    ) -> Result<DescriptorRef, RenderError>;

    /// Hands a finished frame to the device, presenting `image` once it has run.
    fn submit(
        &mut self,
        state: &mut GpuState,
        slot: usize,
        commands: Vec<Command>,
        image: TextureKey,
    ) -> Result<(), RenderError>;

    /// Whether draws run as soon as they are issued.
    fn executes_immediately(&self) -> bool {
        false
    }

    /// Blocks until all submitted work has completed.
    fn drain(&mut self, state: &mut GpuState) -> Result<(), RenderError> {
        state.flush();
        Ok(())
    }

    /// Frees everything `create` made.
    fn destroy(&mut self, state: &mut GpuState);
}

/// A graphics context over the software device, parameterized by its backend model.
#[derive(Debug)]
pub struct SoftContext<B: BackendModel> {
    gpu: Arc<SoftGpu>,
    device: Arc<SoftDevice>,
    window: RenderWindowHandle,
    backend: Option<B>,
    state: ContextState,
    swapchain: Option<Swapchain>,
    frames: usize,
    slot: usize,
    timeout_ms: u64,
    validate: bool,
    frame: Option<FrameRecorder>,
    /// Set for a frame begun while the window has no area.
    skipping: bool,
    /// Set when the swapchain was rebuilt behind the caller's back.
    rebuilt: bool,
    /// Size set by `resize`; it holds until the window itself changes size.
    requested: Option<Extent2D>,
    /// Window size when `requested` was recorded.
    observed_window: Extent2D,
}

impl<B: BackendModel> SoftContext<B> {
    /// Creates a ready context presenting to `window`.
    pub fn new(window: RenderWindowHandle, settings: &RenderSettings) -> Result<Self, RenderError> {
        let frames = settings.frames_in_flight.clamp(1, 3);
        log::info!("Initializing {} context ({frames} frames in flight)", B::KIND);

        let gpu = Arc::new(SoftGpu::new(B::KIND, frames, settings.memory_budget_bytes));
        let device = Arc::new(SoftDevice::new(gpu.clone()));
        let extent = window_extent(window.as_ref());
        let (backend, swapchain) = {
            let mut state = gpu.lock();
            let backend = B::create(&mut state, frames)?;
            let swapchain = if extent.is_empty() {
                log::warn!("Window has no area; swapchain creation deferred");
                None
            } else {
                Some(Swapchain::create(&mut state, extent, Self::bottom_up())?)
            };
            (backend, swapchain)
        };

        log::info!("{} context ready", B::KIND);
        Ok(Self {
            gpu,
            device,
            window,
            backend: Some(backend),
            state: ContextState::Ready,
            swapchain,
            frames,
            slot: 0,
            timeout_ms: settings.fence_timeout_ms,
            validate: settings.validation,
            frame: None,
            skipping: false,
            rebuilt: false,
            requested: None,
            observed_window: extent,
        })
    }

    /// The device shared with every resource of this context.
    pub fn soft_device(&self) -> &Arc<SoftDevice> {
        &self.device
    }

    /// Submissions recorded but not yet executed.
    pub fn pending_submissions(&self) -> usize {
        self.gpu.pending_submissions()
    }

    fn bottom_up() -> bool {
        B::KIND.capabilities().origin == FramebufferOrigin::BottomLeft
    }

    fn explicit() -> bool {
        B::KIND.capabilities().explicit_sync
    }

    /// The extent the swapchain should have: the last resize, or the window's size
    /// once the window has changed since.
    fn target_extent(&mut self) -> Extent2D {
        let window = window_extent(self.window.as_ref());
        if window != self.observed_window {
            self.observed_window = window;
            self.requested = None;
        }
        self.requested.unwrap_or(window)
    }

    fn ensure_ready(&self) -> Result<(), RenderError> {
        match self.state {
            ContextState::Ready => Ok(()),
            ContextState::Uninitialized | ContextState::Released => Err(RenderError::NotInitialized),
            other => Err(RenderError::RenderingFailed(format!(
                "context is not accepting frames ({other:?})"
            ))),
        }
    }

    /// Drains the device and replaces the swapchain with one of `extent`.
    fn rebuild_swapchain(&mut self, state: &mut GpuState, extent: Extent2D) -> Result<(), RenderError> {
        if let Some(backend) = self.backend.as_mut() {
            backend.drain(state)?;
        }
        if let Some(old) = self.swapchain.take() {
            log::debug!(
                "Rebuilding swapchain: {}x{} -> {}x{}",
                old.extent().width,
                old.extent().height,
                extent.width,
                extent.height
            );
            old.destroy(state);
            self.rebuilt = true;
        }
        self.swapchain = Some(Swapchain::create(state, extent, Self::bottom_up())?);
        Ok(())
    }
}

fn window_extent(window: &dyn RenderWindow) -> Extent2D {
    let (width, height) = window.inner_size();
    Extent2D::new(width, height)
}

fn pipeline_error(err: PipelineError) -> RenderError {
    RenderError::from(ResourceError::from(err))
}

fn outside_frame(op: &str) -> RenderError {
    RenderError::RenderingFailed(format!("{op} called outside of a frame"))
}

/// Moves level 0 of one layer between states. Explicit backends record a checked
/// barrier; the immediate backend only tracks the state.
fn move_layer(
    explicit: bool,
    state: &mut GpuState,
    texture: TextureKey,
    layer: u32,
    from: ImageState,
    to: ImageState,
) {
    if explicit {
        state.transition(texture, layer, 0, from, to);
    } else if let Some(image) = state.textures.get_mut(texture) {
        if image.contains(layer, 0) {
            image.set_state(layer, 0, to);
        }
    }
}

fn is_sampled(state: &GpuState, texture: TextureKey) -> bool {
    state
        .textures
        .get(texture)
        .is_some_and(|t| t.usage.contains(TextureUsage::SAMPLED))
}

/// Ends the bound off-screen pass and returns its attachments to a readable state.
/// Depth-only layers on explicit backends stay writable until they are prepared for
/// sampling.
fn finish_target(explicit: bool, state: &mut GpuState, frame: &mut FrameRecorder) -> Option<BoundTarget> {
    let bound = frame.end_offscreen()?;
    if let Some(color) = bound.color {
        if is_sampled(state, color.texture) {
            move_layer(explicit, state, color.texture, color.layer, ImageState::RenderTarget, ImageState::ShaderRead);
        }
    }
    if let Some(depth) = bound.depth {
        if is_sampled(state, depth.texture) {
            if explicit && bound.color.is_none() {
                frame.defer_depth(depth.texture, depth.layer);
            } else {
                move_layer(explicit, state, depth.texture, depth.layer, ImageState::DepthWrite, ImageState::ShaderRead);
            }
        }
    }
    Some(bound)
}

impl<B: BackendModel> GraphicsContext for SoftContext<B> {
    fn kind(&self) -> GraphicsBackendType {
        B::KIND
    }

    fn state(&self) -> ContextState {
        self.state
    }

    fn device(&self) -> Arc<dyn GraphicsDevice> {
        self.device.clone()
    }

    fn adapter_info(&self) -> GraphicsAdapterInfo {
        self.device.adapter_info()
    }

    fn surface_extent(&self) -> Extent2D {
        self.swapchain.as_ref().map_or_else(
            || self.requested.unwrap_or_else(|| window_extent(self.window.as_ref())),
            Swapchain::extent,
        )
    }

    fn frame_index(&self) -> usize {
        self.slot
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return Ok(());
        }
        if self.frame.is_some() || self.skipping {
            return Err(RenderError::RenderingFailed("resize during a frame".into()));
        }
        self.state = ContextState::Resizing;
        let extent = Extent2D::new(width, height);
        self.observed_window = window_extent(self.window.as_ref());
        self.requested = Some(extent);
        let gpu = self.gpu.clone();
        let result = {
            let mut state = gpu.lock();
            self.rebuild_swapchain(&mut state, extent)
        };
        if result.is_err() {
            self.requested = None;
        }
        self.rebuilt = false;
        self.state = ContextState::Ready;
        result
    }

    fn begin_frame(&mut self, clear_color: LinearRgba) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if self.frame.is_some() || self.skipping {
            return Err(RenderError::RenderingFailed("begin_frame called twice without present".into()));
        }
        let target = self.target_extent();
        if window_extent(self.window.as_ref()).is_empty() || target.is_empty() {
            log::trace!("Window has no area; skipping frame");
            self.skipping = true;
            return Ok(());
        }

        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        if self.swapchain.as_ref().map(Swapchain::extent) != Some(target) {
            self.rebuild_swapchain(&mut state, target)?;
        }
        let Some(backend) = self.backend.as_mut() else {
            return Err(RenderError::NotInitialized);
        };
        backend.begin_slot(&mut state, self.slot, self.timeout_ms)?;
        gpu.set_frame_slot(self.slot);
        state.epoch += 1;

        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::SurfaceAcquisitionFailed("no swapchain".into()))?;
        let (_, image) = swapchain.acquire(target)?;
        backend.acquired(&mut state, self.slot);
        move_layer(Self::explicit(), &mut state, image, 0, ImageState::Present, ImageState::RenderTarget);

        self.frame = Some(FrameRecorder::new(
            image,
            swapchain.depth(),
            swapchain.extent(),
            clear_color.to_array(),
            !Self::bottom_up(),
        ));
        Ok(())
    }

    fn bind_target(
        &mut self,
        framebuffer: FramebufferId,
        layer: u32,
        clear: Option<LinearRgba>,
    ) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            return Ok(());
        }
        let explicit = Self::explicit();
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        let frame = self.frame.as_mut().ok_or_else(|| outside_frame("bind_target"))?;

        if let Some(bound) = frame.bound().copied() {
            state.validation.push(ValidationError::UnmatchedBind {
                framebuffer: bound.framebuffer,
                layer: bound.layer,
            });
            finish_target(explicit, &mut state, frame);
        }

        let (color, depth) = state
            .framebuffers
            .get(framebuffer.key())
            .map(|f| (f.color, f.depth))
            .ok_or(ResourceError::NotFound)?;
        let mut extent = None;
        for texture in color.iter().chain(depth.iter()) {
            let image = state.textures.get(*texture).ok_or(ResourceError::NotFound)?;
            if layer >= image.layers {
                return Err(ResourceError::OutOfBounds.into());
            }
            extent.get_or_insert((image.width, image.height));
        }
        let Some((width, height)) = extent else {
            return Err(ResourceError::InvalidHandle.into());
        };

        let epoch = state.epoch;
        if let Some(texture) = color {
            if is_sampled(&state, texture) {
                move_layer(explicit, &mut state, texture, layer, ImageState::ShaderRead, ImageState::RenderTarget);
            }
            if let Some(image) = state.textures.get_mut(texture) {
                image.mark_written(layer, epoch);
            }
        }
        if let Some(texture) = depth {
            if is_sampled(&state, texture) && !frame.resume_depth(texture, layer) {
                move_layer(explicit, &mut state, texture, layer, ImageState::ShaderRead, ImageState::DepthWrite);
            }
            if let Some(image) = state.textures.get_mut(texture) {
                image.mark_written(layer, epoch);
            }
        }

        let target = BoundTarget {
            framebuffer,
            layer,
            color: color.map(|texture| Attachment { texture, layer }),
            depth: depth.map(|texture| Attachment { texture, layer }),
            class: if color.is_some() {
                TargetClass::OffscreenColor
            } else {
                TargetClass::DepthOnly
            },
        };
        frame.begin_offscreen(target, clear.map(LinearRgba::to_array), width, height);
        Ok(())
    }

    fn unbind_target(&mut self) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            return Ok(());
        }
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        let frame = self.frame.as_mut().ok_or_else(|| outside_frame("unbind_target"))?;
        if finish_target(Self::explicit(), &mut state, frame).is_none() {
            state.validation.push(ValidationError::UnbindWithoutBind);
        }
        Ok(())
    }

    fn prepare_sampled(&mut self, textures: &[TextureId]) -> Result<(), RenderError> {
        self.ensure_ready()?;
        let Some(frame) = self.frame.as_mut() else {
            return Ok(());
        };
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        for texture in textures {
            let key = texture.key();
            for layer in frame.take_pending_of(key) {
                move_layer(Self::explicit(), &mut state, key, layer, ImageState::DepthWrite, ImageState::ShaderRead);
            }
        }
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            return Ok(());
        }
        let caps = B::KIND.capabilities();
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        let frame = self.frame.as_mut().ok_or_else(|| outside_frame("draw"))?;
        if frame.bound().is_none() {
            frame.open_screen_pass();
        }
        let target = frame.target_class();

        let pipeline = if caps.bakes_pipelines {
            let id = call.pipeline.ok_or_else(|| {
                pipeline_error(PipelineError::MissingPipeline {
                    shader: call.shader,
                    target,
                })
            })?;
            let baked = state
                .pipelines
                .get(id.key())
                .ok_or_else(|| pipeline_error(PipelineError::InvalidRenderPipeline { id }))?;
            if baked.target != target {
                let mismatch = ValidationError::PipelineTargetMismatch {
                    shader: call.shader,
                    pipeline: baked.target,
                    target,
                };
                log::warn!("Draw skipped: {mismatch}");
                state.validation.push(mismatch);
                return Ok(());
            }
            Some(id.key())
        } else {
            if !state.modules.contains_key(call.module.key()) {
                return Err(ResourceError::from(ShaderError::NotFound { id: call.module }).into());
            }
            None
        };

        let vertex = call.vertex_buffer.key();
        let index = call.index_buffer.key();
        let uniform = call.uniform_buffer.key();
        if [vertex, index, uniform].iter().any(|b| !state.buffers.contains_key(*b)) {
            return Err(ResourceError::NotFound.into());
        }

        let mut textures = Vec::with_capacity(call.textures.len());
        for binding in call.textures {
            let key = binding.texture.key();
            let sampler = binding.sampler.key();
            let image = state.textures.get(key).ok_or(ResourceError::NotFound)?;
            if !state.samplers.contains_key(sampler) {
                return Err(ResourceError::NotFound.into());
            }
            let feedback = (0..image.layers).find(|&layer| image.layer_is_attachment(layer));
            let stale = image.dimension == TextureDimension::D2
                && image.usage.contains(TextureUsage::RENDER_TARGET)
                && image.written_epoch(0) != state.epoch;
            if let Some(layer) = feedback {
                state.validation.push(ValidationError::ReadWhileWritable {
                    texture: binding.texture,
                    layer,
                });
            } else if stale {
                state.validation.push(ValidationError::StaleRead {
                    texture: binding.texture,
                });
            }
            textures.push(SampledBinding {
                slot: binding.slot,
                texture: key,
                sampler,
            });
        }

        let set = DescriptorSet {
            uniform: UniformBinding {
                buffer: uniform,
                copy: gpu.uniform_copy(),
            },
            textures,
        };
        let Some(backend) = self.backend.as_mut() else {
            return Err(RenderError::NotInitialized);
        };
        let descriptors = backend.write_descriptors(&mut state, self.slot, set)?;
        frame.push_draw([
            Command::SetRasterState {
                state: call.state,
                pipeline,
            },
            Command::BindVertexBuffer(vertex),
            Command::BindIndexBuffer(index),
            Command::BindDescriptors(descriptors),
            Command::DrawIndexed {
                program: call.shader,
                index_count: call.index_count,
            },
        ]);
        if backend.executes_immediately() {
            let commands = frame.take_commands();
            state.execute_now(&commands);
        }
        Ok(())
    }

    fn present(&mut self) -> Result<PresentOutcome, RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            self.skipping = false;
            return Ok(PresentOutcome::Skipped);
        }
        let explicit = Self::explicit();
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        let mut frame = self.frame.take().ok_or_else(|| outside_frame("present"))?;

        if let Some(bound) = frame.bound().copied() {
            state.validation.push(ValidationError::UnmatchedBind {
                framebuffer: bound.framebuffer,
                layer: bound.layer,
            });
            finish_target(explicit, &mut state, &mut frame);
        }
        for (texture, layer) in frame.take_all_pending() {
            move_layer(explicit, &mut state, texture, layer, ImageState::DepthWrite, ImageState::ShaderRead);
        }

        let image = frame.image();
        log::trace!("Presenting frame slot {} ({} draws)", self.slot, frame.draws());
        let commands = frame.finish();
        move_layer(explicit, &mut state, image, 0, ImageState::RenderTarget, ImageState::Present);
        let Some(backend) = self.backend.as_mut() else {
            return Err(RenderError::NotInitialized);
        };
        backend.submit(&mut state, self.slot, commands, image)?;
        self.slot = (self.slot + 1) % self.frames;

        let target = self.target_extent();
        let status = self
            .swapchain
            .as_ref()
            .map_or(SwapchainStatus::Suboptimal, |s| s.present(target));
        if status == SwapchainStatus::Suboptimal && !target.is_empty() {
            log::debug!("Presented to a suboptimal swapchain; rebuilding");
            self.rebuild_swapchain(&mut state, target)?;
        }
        Ok(if std::mem::take(&mut self.rebuilt) {
            PresentOutcome::Rebuilt
        } else {
            PresentOutcome::Presented
        })
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        match self.backend.as_mut() {
            Some(backend) => backend.drain(&mut state),
            None => Ok(()),
        }
    }

    fn capture_frame(&mut self) -> Result<Option<CapturedFrame>, RenderError> {
        if self.state == ContextState::Released {
            return Err(RenderError::NotInitialized);
        }
        let mut state = self.gpu.lock();
        state.flush();
        Ok(state.last_present.clone())
    }

    fn take_validation_errors(&mut self) -> Vec<ValidationError> {
        let errors = std::mem::take(&mut self.gpu.lock().validation);
        if self.validate {
            errors
        } else {
            Vec::new()
        }
    }

    fn release(&mut self) {
        if self.state == ContextState::Released {
            return;
        }
        log::info!("Releasing {} context", B::KIND);
        let gpu = self.gpu.clone();
        let mut state = gpu.lock();
        if let Some(backend) = self.backend.as_mut() {
            if let Err(e) = backend.drain(&mut state) {
                log::warn!("Failed to drain the device before release: {e}");
            }
        }
        self.frame = None;
        self.skipping = false;
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&mut state);
        }
        if let Some(mut backend) = self.backend.take() {
            backend.destroy(&mut state);
        }
        self.state = ContextState::Released;
    }
}

impl<B: BackendModel> Drop for SoftContext<B> {
    fn drop(&mut self) {
        self.release();
    }
}
