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

//! Back buffers for a headless wgpu context: a ring of color textures and a depth
//! texture, owned by the context rather than by any resource wrapper.

use super::device::{WgpuDevice, WgpuState};
use quadra_core::math::Extent2D;
use quadra_core::renderer::api::{TextureFormat, TextureId};
use quadra_core::renderer::RenderError;

/// Back buffers per swapchain.
pub const SWAPCHAIN_IMAGES: usize = 2;

/// How well a presented image still fits its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    /// The surface changed size; rebuild before the next frame.
    Suboptimal,
}

#[derive(Debug)]
pub struct WgpuSwapchain {
    images: Vec<TextureId>,
    depth: TextureId,
    extent: Extent2D,
    next: usize,
}

impl WgpuSwapchain {
    pub fn create(device: &WgpuDevice, state: &mut WgpuState, extent: Extent2D) -> Result<Self, RenderError> {
        let mut created = Vec::with_capacity(SWAPCHAIN_IMAGES + 1);
        let mut result = Ok(());
        for format in [TextureFormat::Rgba8Unorm, TextureFormat::Rgba8Unorm, TextureFormat::Depth32Float] {
            match device.create_swapchain_image(state, extent, format) {
                Ok(id) => created.push(id),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if let Err(err) = result {
            for id in created {
                state.remove_texture(id);
            }
            return Err(err);
        }

        let depth = created.pop().ok_or_else(|| RenderError::Internal("swapchain without depth".into()))?;
        log::debug!(
            "Swapchain created: {} images at {}x{}",
            created.len(),
            extent.width,
            extent.height
        );
        Ok(Self {
            images: created,
            depth,
            extent,
            next: 0,
        })
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn depth(&self) -> TextureId {
        self.depth
    }

    /// Hands out the next back buffer, or reports the surface as out of date when it
    /// no longer has the swapchain's size.
    pub fn acquire(&mut self, surface: Extent2D) -> Result<TextureId, RenderError> {
        if surface != self.extent {
            return Err(RenderError::SurfaceOutOfDate);
        }
        let image = self.images[self.next];
        self.next = (self.next + 1) % self.images.len();
        Ok(image)
    }

    pub fn present(&self, target: Extent2D) -> SwapchainStatus {
        if target == self.extent {
            SwapchainStatus::Optimal
        } else {
            SwapchainStatus::Suboptimal
        }
    }

    pub fn destroy(self, state: &mut WgpuState) {
        for image in self.images.into_iter().chain(std::iter::once(self.depth)) {
            state.remove_texture(image);
        }
    }
}
