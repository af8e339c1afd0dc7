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

//! The frame loop of the wgpu backends.
//!
//! One [`WgpuContext`] serves every backend model. The model decides which wgpu
//! backend the adapter is requested on and how frames reach the queue: the immediate
//! model submits after every draw, the others record a whole frame and pace the CPU
//! on the submission of the frame slot being reused.

use super::backend::WgpuBackendSelector;
use super::conversions::IntoWgpu;
use super::device::{padded_row, unpad_rows, PreparedDraw, SyncCounts, WgpuDevice, WgpuState};
use super::swapchain::{SwapchainStatus, WgpuSwapchain};
use quadra_core::math::{Extent2D, LinearRgba};
use quadra_core::platform::{RenderWindow, RenderWindowHandle};
use quadra_core::renderer::api::*;
use quadra_core::renderer::{
    GraphicsContext, GraphicsDevice, PipelineError, PresentOutcome, RenderError, ResourceError,
    ShaderError, ValidationError,
};
use std::sync::Arc;
use std::time::Duration;

/// The off-screen target draws currently go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BoundTarget {
    framebuffer: FramebufferId,
    layer: u32,
    color: Option<TextureId>,
    depth: Option<TextureId>,
    class: TargetClass,
}

/// One render pass as recorded; encoded when the pass closes.
#[derive(Debug)]
struct PassRecord {
    color: Option<(wgpu::TextureView, wgpu::TextureFormat)>,
    depth: Option<wgpu::TextureView>,
    clear_color: Option<wgpu::Color>,
    clear_depth: bool,
    draws: Vec<PreparedDraw>,
}

impl PassRecord {
    /// The same attachments, loaded rather than cleared.
    fn continuation(&self) -> Self {
        Self {
            color: self.color.clone(),
            depth: self.depth.clone(),
            clear_color: None,
            clear_depth: false,
            draws: Vec::new(),
        }
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let colors: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = self
            .color
            .iter()
            .map(|(view, _)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: self.clear_color.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth = self.depth.as_ref().map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: if self.clear_depth {
                    wgpu::LoadOp::Clear(1.0)
                } else {
                    wgpu::LoadOp::Load
                },
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        });

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Quadra pass"),
            color_attachments: &colors,
            depth_stencil_attachment: depth,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        for draw in &self.draws {
            pass.set_pipeline(&draw.pipeline);
            pass.set_bind_group(0, &draw.uniform_group, &[draw.uniform_offset]);
            if let Some(group) = &draw.texture_group {
                pass.set_bind_group(1, group, &[]);
            }
            pass.set_vertex_buffer(0, draw.vertex.slice(..));
            pass.set_index_buffer(draw.index.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..draw.index_count, 0, 0..1);
        }
    }
}

/// The passes of the frame being recorded.
///
/// The back-buffer pass is opened lazily and cleared only the first time, so a frame
/// may alternate between off-screen targets and the screen.
#[derive(Debug)]
struct WgpuFrame {
    image: TextureId,
    screen_color: wgpu::TextureView,
    screen_depth: wgpu::TextureView,
    clear: wgpu::Color,
    encoder: wgpu::CommandEncoder,
    pass: Option<PassRecord>,
    screen_open: bool,
    screen_cleared: bool,
    bound: Option<BoundTarget>,
    /// Depth-only layers left in `DepthWrite` after their pass.
    pending_depth: Vec<(TextureId, u32)>,
    draws: u32,
}

impl WgpuFrame {
    fn target_class(&self) -> TargetClass {
        self.bound.map_or(TargetClass::Screen, |b| b.class)
    }

    /// Color format and depth presence of the open pass.
    fn attachments(&self) -> (Option<wgpu::TextureFormat>, bool) {
        self.pass
            .as_ref()
            .map_or((None, false), |p| (p.color.as_ref().map(|(_, f)| *f), p.depth.is_some()))
    }

    fn close_pass(&mut self) {
        if let Some(pass) = self.pass.take() {
            pass.encode(&mut self.encoder);
        }
    }

    fn open_screen_pass(&mut self) {
        if self.screen_open {
            return;
        }
        let clear = !self.screen_cleared;
        self.pass = Some(PassRecord {
            color: Some((self.screen_color.clone(), wgpu::TextureFormat::Rgba8Unorm)),
            depth: Some(self.screen_depth.clone()),
            clear_color: clear.then_some(self.clear),
            clear_depth: clear,
            draws: Vec::new(),
        });
        self.screen_open = true;
        self.screen_cleared = true;
    }

    fn close_screen_pass(&mut self) {
        if self.screen_open {
            self.close_pass();
            self.screen_open = false;
        }
    }

    fn begin_offscreen(&mut self, target: BoundTarget, pass: PassRecord) {
        self.close_screen_pass();
        self.pass = Some(pass);
        self.bound = Some(target);
    }

    fn end_offscreen(&mut self) -> Option<BoundTarget> {
        let bound = self.bound.take()?;
        self.close_pass();
        Some(bound)
    }

    fn push_draw(&mut self, draw: PreparedDraw) {
        if let Some(pass) = self.pass.as_mut() {
            pass.draws.push(draw);
            self.draws += 1;
        }
    }

    /// Encodes what was recorded so far and submits it; the open pass continues
    /// without clearing.
    fn flush(&mut self, device: &WgpuDevice) {
        if let Some(pass) = self.pass.as_mut() {
            let next = pass.continuation();
            std::mem::replace(pass, next).encode(&mut self.encoder);
        }
        let encoder = std::mem::replace(&mut self.encoder, device.encoder("Quadra frame"));
        device.queue().submit(Some(encoder.finish()));
    }

    fn defer_depth(&mut self, texture: TextureId, layer: u32) {
        if !self.pending_depth.contains(&(texture, layer)) {
            self.pending_depth.push((texture, layer));
        }
    }

    fn resume_depth(&mut self, texture: TextureId, layer: u32) -> bool {
        let before = self.pending_depth.len();
        self.pending_depth.retain(|p| *p != (texture, layer));
        self.pending_depth.len() != before
    }

    fn take_pending_of(&mut self, texture: TextureId) -> Vec<u32> {
        let (taken, kept) = self
            .pending_depth
            .drain(..)
            .partition::<Vec<_>, _>(|(t, _)| *t == texture);
        self.pending_depth = kept;
        taken.into_iter().map(|(_, layer)| layer).collect()
    }

    /// Closes the frame: the back buffer is cleared even if nothing was drawn to it.
    fn finish(mut self) -> wgpu::CommandEncoder {
        self.open_screen_pass();
        self.close_screen_pass();
        self.encoder
    }
}

/// A presented image copied out for `capture_frame`.
#[derive(Debug)]
struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
}

/// Synchronization objects each backend model keeps for its frame slots.
fn sync_objects(kind: GraphicsBackendType, frames: usize) -> SyncCounts {
    match kind {
        GraphicsBackendType::Immediate => SyncCounts::default(),
        GraphicsBackendType::FenceBased => SyncCounts {
            fences: frames,
            semaphores: 2 * frames,
            descriptor_pools: frames,
            descriptor_heaps: 0,
        },
        GraphicsBackendType::CommandListV1 | GraphicsBackendType::CommandListV2 => SyncCounts {
            fences: 1,
            descriptor_heaps: 1,
            ..SyncCounts::default()
        },
    }
}

/// A graphics context rendering through wgpu into a headless swapchain.
#[derive(Debug)]
pub struct WgpuContext {
    kind: GraphicsBackendType,
    device: Arc<WgpuDevice>,
    window: RenderWindowHandle,
    state: ContextState,
    swapchain: Option<WgpuSwapchain>,
    frames: usize,
    slot: usize,
    timeout_ms: u64,
    validate: bool,
    frame: Option<WgpuFrame>,
    /// Set for a frame begun while the window has no area.
    skipping: bool,
    /// Set when the swapchain was rebuilt behind the caller's back.
    rebuilt: bool,
    /// Size set by `resize`; it holds until the window itself changes size.
    requested: Option<Extent2D>,
    observed_window: Extent2D,
    /// Last submission of each frame slot.
    in_flight: Vec<Option<wgpu::SubmissionIndex>>,
    presented: Option<Readback>,
    captured: Option<CapturedFrame>,
}

impl WgpuContext {
    /// Requests an adapter for `kind` and creates a ready context presenting to `window`.
    pub fn new(
        kind: GraphicsBackendType,
        window: RenderWindowHandle,
        settings: &RenderSettings,
    ) -> Result<Self, RenderError> {
        let frames = settings.frames_in_flight.clamp(1, 3);
        log::info!("Initializing {kind} context on wgpu ({frames} frames in flight)");

        let selector = WgpuBackendSelector::new(kind, settings.validation);
        let adapter = selector.select()?;
        let info = WgpuBackendSelector::adapter_info(&adapter, kind);
        log::info!("Using graphics adapter: {info}");
        let device = Arc::new(WgpuDevice::request(
            kind,
            &adapter,
            info,
            frames,
            settings.memory_budget_bytes,
        )?);

        let extent = window_extent(window.as_ref());
        let swapchain = {
            let mut state = device.lock();
            state.sync = sync_objects(kind, frames);
            if extent.is_empty() {
                log::warn!("Window has no area; swapchain creation deferred");
                None
            } else {
                Some(WgpuSwapchain::create(&device, &mut state, extent)?)
            }
        };

        log::info!("{kind} context ready");
        Ok(Self {
            kind,
            device,
            window,
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
            in_flight: vec![None; frames],
            presented: None,
            captured: None,
        })
    }

    /// The device shared with every resource of this context.
    pub fn wgpu_device(&self) -> &Arc<WgpuDevice> {
        &self.device
    }

    fn explicit(&self) -> bool {
        self.kind.capabilities().explicit_sync
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

    fn drain(&mut self) -> Result<(), RenderError> {
        self.in_flight.iter_mut().for_each(|s| *s = None);
        self.device.wait(None, None)
    }

    /// Blocks until the frame that last used the current slot has completed.
    fn wait_slot(&mut self) -> Result<(), RenderError> {
        let Some(submission) = self.in_flight.get_mut(self.slot).and_then(Option::take) else {
            return Ok(());
        };
        let timeout = Duration::from_millis(self.timeout_ms);
        self.device.wait(Some(submission), Some(timeout)).inspect_err(|e| {
            log::error!("Frame slot {} did not complete: {e}", self.slot);
        })
    }

    /// Drains the device and replaces the swapchain with one of `extent`.
    fn rebuild_swapchain(&mut self, state: &mut WgpuState, extent: Extent2D) -> Result<(), RenderError> {
        self.drain()?;
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
        self.swapchain = Some(WgpuSwapchain::create(&self.device, state, extent)?);
        Ok(())
    }

    /// Records a copy of `image` into a fresh read-back buffer.
    fn record_readback(
        &self,
        state: &WgpuState,
        encoder: &mut wgpu::CommandEncoder,
        image: TextureId,
    ) -> Option<Readback> {
        let texture = state.textures.get(&image)?;
        let (width, height) = (texture.width, texture.height);
        let buffer = self.device.raw().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Presented image"),
            size: u64::from(padded_row(width)) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row(width)),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Some(Readback { buffer, width, height })
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

/// Moves level 0 of one layer between states. Explicit backends check the barrier;
/// the immediate backend only tracks the state.
fn move_layer(explicit: bool, state: &mut WgpuState, texture: TextureId, layer: u32, from: ImageState, to: ImageState) {
    if explicit {
        state.transition(texture, layer, 0, from, to);
    } else if let Some(image) = state.textures.get_mut(&texture) {
        if image.contains(layer, 0) {
            image.set_state(layer, 0, to);
        }
    }
}

fn is_sampled(state: &WgpuState, texture: TextureId) -> bool {
    state
        .textures
        .get(&texture)
        .is_some_and(|t| t.usage.contains(TextureUsage::SAMPLED))
}

/// Ends the bound off-screen pass and returns its attachments to a readable state.
/// Depth-only layers on explicit backends stay writable until they are prepared for
/// sampling.
fn finish_target(explicit: bool, state: &mut WgpuState, frame: &mut WgpuFrame) -> Option<BoundTarget> {
    let bound = frame.end_offscreen()?;
    if let Some(color) = bound.color {
        if is_sampled(state, color) {
            move_layer(explicit, state, color, bound.layer, ImageState::RenderTarget, ImageState::ShaderRead);
        }
    }
    if let Some(depth) = bound.depth {
        if is_sampled(state, depth) {
            if explicit && bound.color.is_none() {
                frame.defer_depth(depth, bound.layer);
            } else {
                move_layer(explicit, state, depth, bound.layer, ImageState::DepthWrite, ImageState::ShaderRead);
            }
        }
    }
    Some(bound)
}

impl GraphicsContext for WgpuContext {
    fn kind(&self) -> GraphicsBackendType {
        self.kind
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
            WgpuSwapchain::extent,
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
        let device = self.device.clone();
        let result = self.rebuild_swapchain(&mut device.lock(), extent);
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

        let device = self.device.clone();
        let mut state = device.lock();
        if self.swapchain.as_ref().map(WgpuSwapchain::extent) != Some(target) {
            self.rebuild_swapchain(&mut state, target)?;
        }
        if self.explicit() {
            self.wait_slot()?;
        }
        device.set_frame_slot(self.slot);
        state.epoch += 1;

        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or_else(|| RenderError::SurfaceAcquisitionFailed("no swapchain".into()))?;
        let image = swapchain.acquire(target)?;
        let depth = swapchain.depth();
        move_layer(self.explicit(), &mut state, image, 0, ImageState::Present, ImageState::RenderTarget);

        let view = |id: TextureId| {
            state
                .textures
                .get(&id)
                .map(|t| t.subresource_view(0, 0))
                .ok_or_else(|| RenderError::SurfaceAcquisitionFailed("swapchain image lost".into()))
        };
        self.frame = Some(WgpuFrame {
            image,
            screen_color: view(image)?,
            screen_depth: view(depth)?,
            clear: clear_color.into_wgpu(),
            encoder: device.encoder("Quadra frame"),
            pass: None,
            screen_open: false,
            screen_cleared: false,
            bound: None,
            pending_depth: Vec::new(),
            draws: 0,
        });
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
        let explicit = self.explicit();
        let immediate = self.kind == GraphicsBackendType::Immediate;
        let device = self.device.clone();
        let mut state = device.lock();
        let frame = self.frame.as_mut().ok_or_else(|| outside_frame("bind_target"))?;

        if let Some(bound) = frame.bound {
            state.validation.push(ValidationError::UnmatchedBind {
                framebuffer: bound.framebuffer,
                layer: bound.layer,
            });
            finish_target(explicit, &mut state, frame);
        }

        let (color, depth) = state
            .framebuffers
            .get(&framebuffer)
            .map(|f| (f.color, f.depth))
            .ok_or(ResourceError::NotFound)?;
        for texture in color.iter().chain(depth.iter()) {
            let image = state.textures.get(texture).ok_or(ResourceError::NotFound)?;
            if layer >= image.layers {
                return Err(ResourceError::OutOfBounds.into());
            }
        }

        let epoch = state.epoch;
        if let Some(texture) = color {
            if is_sampled(&state, texture) {
                move_layer(explicit, &mut state, texture, layer, ImageState::ShaderRead, ImageState::RenderTarget);
            }
            if let Some(image) = state.textures.get_mut(&texture) {
                image.mark_written(layer, epoch);
            }
        }
        if let Some(texture) = depth {
            if is_sampled(&state, texture) && !frame.resume_depth(texture, layer) {
                move_layer(explicit, &mut state, texture, layer, ImageState::ShaderRead, ImageState::DepthWrite);
            }
            if let Some(image) = state.textures.get_mut(&texture) {
                image.mark_written(layer, epoch);
            }
        }

        let color_view = color
            .and_then(|id| state.textures.get(&id))
            .map(|t| (t.subresource_view(layer, 0), t.format.into_wgpu()));
        let depth_view = depth
            .and_then(|id| state.textures.get(&id))
            .map(|t| t.subresource_view(layer, 0));
        let target = BoundTarget {
            framebuffer,
            layer,
            color,
            depth,
            class: if color.is_some() {
                TargetClass::OffscreenColor
            } else {
                TargetClass::DepthOnly
            },
        };
        frame.begin_offscreen(
            target,
            PassRecord {
                clear_color: clear.filter(|_| color_view.is_some()).map(IntoWgpu::into_wgpu),
                clear_depth: clear.is_some(),
                color: color_view,
                depth: depth_view,
                draws: Vec::new(),
            },
        );
        if immediate {
            frame.flush(&device);
        }
        Ok(())
    }

    fn unbind_target(&mut self) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            return Ok(());
        }
        let explicit = self.explicit();
        let device = self.device.clone();
        let mut state = device.lock();
        let frame = self.frame.as_mut().ok_or_else(|| outside_frame("unbind_target"))?;
        if finish_target(explicit, &mut state, frame).is_none() {
            state.validation.push(ValidationError::UnbindWithoutBind);
        }
        Ok(())
    }

    fn prepare_sampled(&mut self, textures: &[TextureId]) -> Result<(), RenderError> {
        self.ensure_ready()?;
        let explicit = self.explicit();
        let Some(frame) = self.frame.as_mut() else {
            return Ok(());
        };
        let mut state = self.device.lock();
        for texture in textures {
            for layer in frame.take_pending_of(*texture) {
                move_layer(explicit, &mut state, *texture, layer, ImageState::DepthWrite, ImageState::ShaderRead);
            }
        }
        Ok(())
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            return Ok(());
        }
        let caps = self.kind.capabilities();
        let immediate = self.kind == GraphicsBackendType::Immediate;
        let device = self.device.clone();
        let mut state = device.lock();
        let frame = self.frame.as_mut().ok_or_else(|| outside_frame("draw"))?;
        if frame.bound.is_none() {
            frame.open_screen_pass();
        }
        let target = frame.target_class();

        let (module, raster) = if caps.bakes_pipelines {
            let id = call.pipeline.ok_or_else(|| {
                pipeline_error(PipelineError::MissingPipeline {
                    shader: call.shader,
                    target,
                })
            })?;
            let baked = state
                .pipelines
                .get(&id)
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
            (baked.module, Some(baked.state))
        } else {
            if !state.modules.contains_key(&call.module) {
                return Err(ResourceError::from(ShaderError::NotFound { id: call.module }).into());
            }
            (call.module, None)
        };

        let buffers = [call.vertex_buffer, call.index_buffer, call.uniform_buffer];
        if buffers.iter().any(|b| !state.buffers.contains_key(b)) {
            return Err(ResourceError::NotFound.into());
        }

        let mut bindings = Vec::with_capacity(call.textures.len());
        for binding in call.textures {
            let image = state.textures.get(&binding.texture).ok_or(ResourceError::NotFound)?;
            if !state.samplers.contains_key(&binding.sampler) {
                return Err(ResourceError::NotFound.into());
            }
            let feedback = (0..image.layers).find(|&layer| image.layer_is_attachment(layer));
            let stale = image.dimension == TextureDimension::D2
                && image.usage.contains(TextureUsage::RENDER_TARGET)
                && image.written_epoch(0) != state.epoch;
            if let Some(layer) = feedback {
                // The slot falls back to its default rather than sampling an attachment.
                state.validation.push(ValidationError::ReadWhileWritable {
                    texture: binding.texture,
                    layer,
                });
                continue;
            }
            if stale {
                state.validation.push(ValidationError::StaleRead {
                    texture: binding.texture,
                });
            }
            bindings.push(*binding);
        }

        let (color, depth) = frame.attachments();
        let prepared = device.prepare_draw(&mut state, call, module, raster, &bindings, color, depth)?;
        frame.push_draw(prepared);
        if immediate {
            frame.flush(&device);
        }
        Ok(())
    }

    fn present(&mut self) -> Result<PresentOutcome, RenderError> {
        self.ensure_ready()?;
        if self.skipping {
            self.skipping = false;
            return Ok(PresentOutcome::Skipped);
        }
        let explicit = self.explicit();
        let device = self.device.clone();
        let mut state = device.lock();
        let mut frame = self.frame.take().ok_or_else(|| outside_frame("present"))?;

        if let Some(bound) = frame.bound {
            state.validation.push(ValidationError::UnmatchedBind {
                framebuffer: bound.framebuffer,
                layer: bound.layer,
            });
            finish_target(explicit, &mut state, &mut frame);
        }
        for (texture, layer) in std::mem::take(&mut frame.pending_depth) {
            move_layer(explicit, &mut state, texture, layer, ImageState::DepthWrite, ImageState::ShaderRead);
        }

        let image = frame.image;
        log::trace!("Presenting frame slot {} ({} draws)", self.slot, frame.draws);
        let mut encoder = frame.finish();
        move_layer(explicit, &mut state, image, 0, ImageState::RenderTarget, ImageState::Present);
        let readback = self.record_readback(&state, &mut encoder, image);
        let submission = device.queue().submit(Some(encoder.finish()));
        if explicit {
            self.in_flight[self.slot] = Some(submission);
        }
        if let Some(old) = std::mem::replace(&mut self.presented, readback) {
            old.buffer.destroy();
        }
        self.captured = None;
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
        if self.state == ContextState::Released {
            return Ok(());
        }
        self.drain()
    }

    fn capture_frame(&mut self) -> Result<Option<CapturedFrame>, RenderError> {
        if self.state == ContextState::Released {
            return Err(RenderError::NotInitialized);
        }
        if self.captured.is_none() {
            if let Some(readback) = &self.presented {
                let data = self.device.map_read(&readback.buffer)?;
                self.captured = Some(CapturedFrame {
                    width: readback.width,
                    height: readback.height,
                    rgba: unpad_rows(&data, readback.width, readback.height, false),
                });
            }
        }
        Ok(self.captured.clone())
    }

    fn take_validation_errors(&mut self) -> Vec<ValidationError> {
        let errors = std::mem::take(&mut self.device.lock().validation);
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
        log::info!("Releasing {} context", self.kind);
        if let Err(e) = self.drain() {
            log::warn!("Failed to drain the device before release: {e}");
        }
        self.frame = None;
        self.skipping = false;
        let device = self.device.clone();
        let mut state = device.lock();
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&mut state);
        }
        state.sync = SyncCounts::default();
        if let Some(readback) = self.presented.take() {
            readback.buffer.destroy();
        }
        self.captured = None;
        self.state = ContextState::Released;
    }
}

impl Drop for WgpuContext {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_core::platform::Canvas;

    fn context(kind: GraphicsBackendType, canvas: &Arc<Canvas>) -> Option<WgpuContext> {
        let settings = RenderSettings {
            validation: true,
            ..RenderSettings::default()
        };
        match WgpuContext::new(kind, canvas.clone(), &settings) {
            Ok(context) => Some(context),
            Err(e) => {
                eprintln!("skipping {kind}: {e}");
                None
            }
        }
    }

    #[test]
    fn test_sync_objects_follow_the_backend_model() {
        assert_eq!(sync_objects(GraphicsBackendType::Immediate, 2), SyncCounts::default());
        let fenced = sync_objects(GraphicsBackendType::FenceBased, 3);
        assert_eq!((fenced.fences, fenced.semaphores, fenced.descriptor_pools), (3, 6, 3));
        let v2 = sync_objects(GraphicsBackendType::CommandListV2, 3);
        assert_eq!((v2.fences, v2.descriptor_heaps), (1, 1));
    }

    #[test]
    fn test_empty_frames_present_the_clear_color() {
        for kind in GraphicsBackendType::ALL {
            let canvas = Canvas::new(8, 4);
            let Some(mut context) = context(kind, &canvas) else {
                continue;
            };
            context.begin_frame(LinearRgba::RED).unwrap();
            assert_eq!(context.present().unwrap(), PresentOutcome::Presented);
            let frame = context.capture_frame().unwrap().unwrap();
            assert_eq!((frame.width, frame.height), (8, 4), "{kind}");
            assert_eq!(frame.pixel(3, 2), [255, 0, 0, 255], "{kind}");
            assert!(context.take_validation_errors().is_empty(), "{kind}");
        }
    }

    #[test]
    fn test_resize_holds_until_the_window_changes() {
        for kind in GraphicsBackendType::ALL {
            let canvas = Canvas::new(8, 8);
            let Some(mut context) = context(kind, &canvas) else {
                continue;
            };
            context.resize(32, 16).unwrap();
            context.begin_frame(LinearRgba::BLUE).unwrap();
            assert_eq!(context.present().unwrap(), PresentOutcome::Presented, "{kind}");
            let frame = context.capture_frame().unwrap().unwrap();
            assert_eq!((frame.width, frame.height), (32, 16), "{kind}");

            canvas.set_size(12, 6);
            context.begin_frame(LinearRgba::BLUE).unwrap();
            assert_eq!(context.present().unwrap(), PresentOutcome::Rebuilt, "{kind}");
            assert_eq!(context.surface_extent(), Extent2D::new(12, 6), "{kind}");
        }
    }

    #[test]
    fn test_zero_area_frames_are_skipped() {
        let canvas = Canvas::new(8, 8);
        let Some(mut context) = context(GraphicsBackendType::FenceBased, &canvas) else {
            return;
        };
        canvas.set_size(0, 0);
        context.begin_frame(LinearRgba::BLACK).unwrap();
        assert_eq!(context.present().unwrap(), PresentOutcome::Skipped);
    }

    #[test]
    fn test_unbalanced_targets_are_reported() {
        let canvas = Canvas::new(8, 8);
        let Some(mut context) = context(GraphicsBackendType::CommandListV1, &canvas) else {
            return;
        };
        let device = context.device();
        let color = device
            .create_texture(
                &TextureDescriptor {
                    label: None,
                    size: quadra_core::math::Extent3D {
                        width: 8,
                        height: 8,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    format: TextureFormat::Rgba8Unorm,
                    dimension: TextureDimension::D2,
                    usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
                },
                None,
            )
            .unwrap();
        let framebuffer = device
            .create_framebuffer(&FramebufferDescriptor {
                label: None,
                color: Some(color),
                depth: None,
            })
            .unwrap();

        context.begin_frame(LinearRgba::BLACK).unwrap();
        context.unbind_target().unwrap();
        context.bind_target(framebuffer, 0, Some(LinearRgba::GREEN)).unwrap();
        context.present().unwrap();

        let errors = context.take_validation_errors();
        assert_eq!(
            errors,
            vec![
                ValidationError::UnbindWithoutBind,
                ValidationError::UnmatchedBind { framebuffer, layer: 0 },
            ]
        );
        assert_eq!(device.read_texture(color, 0, 0).unwrap()[..4], [0, 255, 0, 255]);
    }

    #[test]
    fn test_release_frees_everything_and_is_idempotent() {
        for kind in GraphicsBackendType::ALL {
            let canvas = Canvas::new(8, 8);
            let Some(mut context) = context(kind, &canvas) else {
                continue;
            };
            context.begin_frame(LinearRgba::BLACK).unwrap();
            context.present().unwrap();
            let device = context.device();
            assert!(device.resource_counts().swapchain_images > 0);

            context.release();
            context.release();
            assert_eq!(context.state(), ContextState::Released);
            assert_eq!(device.resource_counts().total_objects(), 0, "{kind}");
            assert_eq!(device.resource_counts().bytes_allocated, 0, "{kind}");
            assert_eq!(context.capture_frame(), Err(RenderError::NotInitialized));
        }
    }
}
