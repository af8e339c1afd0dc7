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

use super::texture::Texture;
use quadra_core::math::LinearRgba;
use quadra_core::renderer::api::{
    FramebufferDescriptor, FramebufferId, TextureDimension, TextureFormat,
};
use quadra_core::renderer::{
    GraphicsContext, GraphicsDevice, RenderError, ResourceError, TextureError,
};
use std::borrow::Cow;
use std::sync::Arc;

/// A render-target texture paired with the backend attachment object that redirects
/// draws into it.
///
/// `bind` and `unbind` must be paired within a frame. The wrapper tracks the bound
/// layer but always forwards to the context, so an unmatched call is reported by the
/// context's validation instead of being hidden here.
#[derive(Debug)]
pub struct FrameBuffer {
    device: Arc<dyn GraphicsDevice>,
    texture: Texture,
    framebuffer: Option<FramebufferId>,
    bound: Option<u32>,
}

impl FrameBuffer {
    /// Wraps a render-target texture.
    pub fn new(device: Arc<dyn GraphicsDevice>, texture: Texture) -> Result<Self, TextureError> {
        let Some(id) = texture.id().filter(|_| texture.is_render_target()) else {
            return Err(ResourceError::InvalidDescriptor(
                "a framebuffer needs a valid render-target texture".into(),
            )
            .into());
        };
        let (color, depth) = if texture.format().is_depth() {
            (None, Some(id))
        } else {
            (Some(id), texture.depth_attachment())
        };
        let framebuffer = device.create_framebuffer(&FramebufferDescriptor {
            label: Some(Cow::Borrowed("framebuffer")),
            color,
            depth,
        })?;
        Ok(Self {
            device,
            texture,
            framebuffer: Some(framebuffer),
            bound: None,
        })
    }

    /// A color target with depth, e.g. a water reflection or refraction target.
    pub fn color(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, TextureError> {
        let texture = Texture::render_target(
            device.clone(),
            label,
            width,
            height,
            TextureFormat::Rgba8Unorm,
        )?;
        Self::new(device, texture)
    }

    /// A layered depth target for shadow maps.
    pub fn depth_array(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        size: u32,
        count: u32,
        dimension: TextureDimension,
    ) -> Result<Self, TextureError> {
        let texture = Texture::render_target_array(device.clone(), label, size, count, dimension)?;
        Self::new(device, texture)
    }

    /// Redirects subsequent draws to `layer`, optionally clearing it.
    pub fn bind(
        &mut self,
        context: &mut dyn GraphicsContext,
        layer: u32,
        clear: Option<LinearRgba>,
    ) -> Result<(), RenderError> {
        let framebuffer = self.framebuffer.ok_or(ResourceError::InvalidHandle)?;
        if let Some(previous) = self.bound {
            log::debug!("FrameBuffer: Layer {previous} still bound while binding layer {layer}");
        }
        context.bind_target(framebuffer, layer, clear)?;
        self.bound = Some(layer);
        Ok(())
    }

    /// Restores the back buffer as the draw target.
    pub fn unbind(&mut self, context: &mut dyn GraphicsContext) -> Result<(), RenderError> {
        self.bound = None;
        context.unbind_target()
    }

    pub fn bound_layer(&self) -> Option<u32> {
        self.bound
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn id(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    pub fn is_valid(&self) -> bool {
        self.framebuffer.is_some() && self.texture.is_valid()
    }

    /// Releases the attachment object, then the texture. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(id) = self.framebuffer.take() {
            if let Err(e) = self.device.destroy_framebuffer(id) {
                log::warn!("FrameBuffer: Failed to destroy framebuffer {id:?}: {e}");
            }
        }
        self.bound = None;
        self.texture.destroy();
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}
