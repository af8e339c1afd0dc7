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

//! An emulated presentation surface: a ring of color images plus a depth image,
//! all owned by the context rather than by any resource wrapper.

use super::gpu::GpuState;
use super::image::SoftImage;
use super::store::TextureKey;
use quadra_core::math::{Extent2D, Extent3D};
use quadra_core::renderer::api::{
    ImageState, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};
use quadra_core::renderer::RenderError;

/// Back buffers per swapchain.
pub const SWAPCHAIN_IMAGES: usize = 2;

/// How well a presented image still fits its surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    /// The swapchain matches the surface.
    Optimal,
    /// The image was presented, but the surface changed size; the swapchain should be
    /// rebuilt before the next frame.
    Suboptimal,
}

#[derive(Debug)]
pub struct Swapchain {
    images: Vec<TextureKey>,
    depth: TextureKey,
    extent: Extent2D,
    next: usize,
}

impl Swapchain {
    pub fn create(state: &mut GpuState, extent: Extent2D, bottom_up: bool) -> Result<Self, RenderError> {
        let size = Extent3D {
            width: extent.width,
            height: extent.height,
            depth_or_array_layers: 1,
        };
        let mut created = Vec::with_capacity(SWAPCHAIN_IMAGES + 1);
        let mut create = |format: TextureFormat, usage: TextureUsage, initial: ImageState| {
            let descriptor = TextureDescriptor {
                label: None,
                size,
                mip_level_count: 1,
                format,
                dimension: TextureDimension::D2,
                usage,
            };
            state
                .memory
                .reserve(SoftImage::byte_size(&descriptor))
                .map_err(|e| RenderError::InitializationFailed(format!("swapchain allocation: {e}")))?;
            let mut image = SoftImage::new(&descriptor, initial, bottom_up);
            image.swapchain = true;
            let key = state.textures.insert(image);
            created.push(key);
            Ok::<_, RenderError>(key)
        };

        let result = (|| {
            let mut images = Vec::with_capacity(SWAPCHAIN_IMAGES);
            for _ in 0..SWAPCHAIN_IMAGES {
                images.push(create(
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
                    ImageState::Present,
                )?);
            }
            let depth = create(
                TextureFormat::Depth32Float,
                TextureUsage::DEPTH_TARGET,
                ImageState::DepthWrite,
            )?;
            Ok::<_, RenderError>((images, depth))
        })();
        let (images, depth) = match result {
            Ok(parts) => parts,
            Err(err) => {
                for key in created {
                    state.remove_texture(key);
                }
                return Err(err);
            }
        };
        log::debug!(
            "Swapchain created: {} images at {}x{}",
            images.len(),
            extent.width,
            extent.height
        );
        Ok(Self {
            images,
            depth,
            extent,
            next: 0,
        })
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn depth(&self) -> TextureKey {
        self.depth
    }

    /// Hands out the next back buffer, or reports the surface as out of date when the
    /// window no longer has the swapchain's size.
    pub fn acquire(&mut self, window: Extent2D) -> Result<(usize, TextureKey), RenderError> {
        if window != self.extent {
            return Err(RenderError::SurfaceOutOfDate);
        }
        let index = self.next;
        self.next = (self.next + 1) % self.images.len();
        Ok((index, self.images[index]))
    }

    /// Reports whether the swapchain still fits a surface of `target` after a present.
    pub fn present(&self, target: Extent2D) -> SwapchainStatus {
        if target == self.extent {
            SwapchainStatus::Optimal
        } else {
            SwapchainStatus::Suboptimal
        }
    }

    pub fn destroy(self, state: &mut GpuState) {
        for image in self.images.into_iter().chain(std::iter::once(self.depth)) {
            state.remove_texture(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::soft::gpu::SoftGpu;
    use quadra_core::renderer::api::GraphicsBackendType;

    #[test]
    fn test_acquire_rotates_and_detects_stale_surfaces() {
        let gpu = SoftGpu::new(GraphicsBackendType::FenceBased, 2, None);
        let mut state = gpu.lock();
        let extent = Extent2D {
            width: 8,
            height: 4,
        };
        let mut swapchain = Swapchain::create(&mut state, extent, false).unwrap();
        assert_eq!(state.counts().swapchain_images, SWAPCHAIN_IMAGES + 1);

        let (first, _) = swapchain.acquire(extent).unwrap();
        let (second, _) = swapchain.acquire(extent).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            swapchain.acquire(Extent2D {
                width: 4,
                height: 4
            }),
            Err(RenderError::SurfaceOutOfDate)
        );

        assert_eq!(swapchain.present(extent), SwapchainStatus::Optimal);
        assert_eq!(
            swapchain.present(Extent2D {
                width: 8,
                height: 5
            }),
            SwapchainStatus::Suboptimal
        );

        swapchain.destroy(&mut state);
        assert_eq!(state.counts().swapchain_images, 0);
        assert_eq!(state.memory.allocated(), 0);
    }

    #[test]
    fn test_oversized_swapchain_fails_before_allocating() {
        let gpu = SoftGpu::new(GraphicsBackendType::FenceBased, 2, Some(1 << 20));
        let mut state = gpu.lock();
        let huge = Extent2D {
            width: 65536,
            height: 65536,
        };
        assert!(matches!(
            Swapchain::create(&mut state, huge, false),
            Err(RenderError::InitializationFailed(_))
        ));
        assert_eq!(state.counts().swapchain_images, 0);
        assert_eq!(state.memory.allocated(), 0);

        // Two color images fit, the depth image does not.
        let gpu = SoftGpu::new(GraphicsBackendType::FenceBased, 2, Some(2 * 64 * 64 * 4));
        let mut state = gpu.lock();
        let square = Extent2D {
            width: 64,
            height: 64,
        };
        assert!(Swapchain::create(&mut state, square, false).is_err());
        assert_eq!(state.counts().swapchain_images, 0);
        assert_eq!(state.memory.allocated(), 0);
    }
}
