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

//! Texel storage, per-subresource state and mip downsampling.

use crate::graphics::memory::texture_bytes;
use quadra_core::math::{linear_to_srgb, srgb_to_linear};
use quadra_core::renderer::api::{
    mip_extent, ImageState, TextureDescriptor, TextureDimension, TextureFormat, TextureUsage,
};

/// One linear RGBA texel. Depth images keep the depth in channel 0.
pub type Texel = [f32; 4];

/// Rounds a color channel to the nearest 8-bit value, as an 8-bit attachment stores it.
#[inline]
pub fn quantize(c: f32) -> f32 {
    (c.clamp(0.0, 1.0) * 255.0).round() / 255.0
}

/// Texels in a `width` x `height` level, computed without 32-bit overflow.
#[inline]
pub fn texel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

/// Row-major index of texel `(x, y)` in a level `width` texels wide.
#[inline]
pub fn texel_index(x: u32, y: u32, width: u32) -> usize {
    y as usize * width as usize + x as usize
}

#[inline]
fn to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// A texture living in device memory.
#[derive(Debug)]
pub struct SoftImage {
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mips: u32,
    pub format: TextureFormat,
    pub dimension: TextureDimension,
    pub usage: TextureUsage,
    /// Row 0 is the bottom of the image (attachments of bottom-left backends).
    pub bottom_up: bool,
    /// Owned by a swapchain rather than by a resource wrapper.
    pub swapchain: bool,
    /// Device memory accounted for this image.
    pub bytes: u64,
    /// Slot in the persistent descriptor heap, where one exists.
    pub heap_index: Option<u32>,
    levels: Vec<Vec<Texel>>,
    states: Vec<ImageState>,
    written_epoch: Vec<u64>,
}

impl SoftImage {
    pub fn new(descriptor: &TextureDescriptor, initial: ImageState, bottom_up: bool) -> Self {
        let (width, height) = (descriptor.size.width, descriptor.size.height);
        let layers = descriptor.size.depth_or_array_layers.max(1);
        let mips = descriptor.mip_level_count.max(1);
        let fill = if descriptor.format.is_depth() {
            [1.0, 0.0, 0.0, 0.0]
        } else {
            [0.0; 4]
        };

        let subresources = layers as usize * mips as usize;
        let mut levels = Vec::with_capacity(subresources);
        for _ in 0..layers {
            for mip in 0..mips {
                let (w, h) = mip_extent(width, height, mip);
                levels.push(vec![fill; texel_count(w, h)]);
            }
        }

        Self {
            width,
            height,
            layers,
            mips,
            format: descriptor.format,
            dimension: descriptor.dimension,
            usage: descriptor.usage,
            bottom_up,
            swapchain: false,
            bytes: Self::byte_size(descriptor),
            heap_index: None,
            levels,
            states: vec![initial; subresources],
            written_epoch: vec![0; layers as usize],
        }
    }

    /// Bytes of device memory the full mip chain of `descriptor` occupies.
    pub fn byte_size(descriptor: &TextureDescriptor) -> u64 {
        texture_bytes(descriptor)
    }

    #[inline]
    fn index(&self, layer: u32, mip: u32) -> usize {
        layer as usize * self.mips as usize + mip as usize
    }

    pub fn extent(&self, mip: u32) -> (u32, u32) {
        mip_extent(self.width, self.height, mip)
    }

    pub fn contains(&self, layer: u32, mip: u32) -> bool {
        layer < self.layers && mip < self.mips
    }

    pub fn level(&self, layer: u32, mip: u32) -> &[Texel] {
        &self.levels[self.index(layer, mip)]
    }

    pub fn level_mut(&mut self, layer: u32, mip: u32) -> &mut Vec<Texel> {
        let i = self.index(layer, mip);
        &mut self.levels[i]
    }

    /// Moves a level out so it can be written while other images are sampled.
    /// Sampling the image meanwhile sees an empty level.
    pub fn take_level(&mut self, layer: u32, mip: u32) -> Vec<Texel> {
        std::mem::take(self.level_mut(layer, mip))
    }

    pub fn restore_level(&mut self, layer: u32, mip: u32, data: Vec<Texel>) {
        *self.level_mut(layer, mip) = data;
    }

    pub fn state(&self, layer: u32, mip: u32) -> ImageState {
        self.states[self.index(layer, mip)]
    }

    pub fn set_state(&mut self, layer: u32, mip: u32, state: ImageState) {
        let i = self.index(layer, mip);
        self.states[i] = state;
    }

    /// Whether any mip of `layer` is currently an attachment.
    pub fn layer_is_attachment(&self, layer: u32) -> bool {
        (0..self.mips).any(|mip| self.state(layer, mip).is_attachment())
    }

    pub fn written_epoch(&self, layer: u32) -> u64 {
        self.written_epoch[layer as usize]
    }

    pub fn mark_written(&mut self, layer: u32, epoch: u64) {
        self.written_epoch[layer as usize] = epoch;
    }

    /// Fills level 0 of every layer from tightly packed RGBA8 rows, top row first.
    pub fn upload_rgba8(&mut self, data: &[u8]) {
        let texels_per_layer = texel_count(self.width, self.height);
        let srgb = self.format == TextureFormat::Rgba8UnormSrgb;
        let depth = self.format.is_depth();
        for layer in 0..self.layers {
            let start = layer as usize * texels_per_layer * 4;
            let Some(bytes) = data.get(start..start + texels_per_layer * 4) else {
                break;
            };
            let level = self.level_mut(layer, 0);
            for (texel, px) in level.iter_mut().zip(bytes.chunks_exact(4)) {
                let c = |b: u8| b as f32 / 255.0;
                *texel = if depth {
                    [c(px[0]), 0.0, 0.0, 0.0]
                } else if srgb {
                    [srgb_to_linear(c(px[0])), srgb_to_linear(c(px[1])), srgb_to_linear(c(px[2])), c(px[3])]
                } else {
                    [c(px[0]), c(px[1]), c(px[2]), c(px[3])]
                };
            }
        }
    }

    /// Box-filters `src_mip` of `layer` into the next level.
    pub fn downsample(&mut self, layer: u32, src_mip: u32) {
        if src_mip + 1 >= self.mips {
            return;
        }
        let (sw, sh) = self.extent(src_mip);
        let (dw, dh) = self.extent(src_mip + 1);
        let quantized = !self.format.is_depth();
        let src = self.level(layer, src_mip).to_vec();
        if src.len() != texel_count(sw, sh) {
            return;
        }

        let dst = self.level_mut(layer, src_mip + 1);
        for y in 0..dh {
            for x in 0..dw {
                let mut sum = [0.0f32; 4];
                let mut n = 0.0;
                for (sx, sy) in [(2 * x, 2 * y), (2 * x + 1, 2 * y), (2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1)] {
                    if sx < sw && sy < sh {
                        let t = src[texel_index(sx, sy, sw)];
                        for c in 0..4 {
                            sum[c] += t[c];
                        }
                        n += 1.0;
                    }
                }
                let texel = sum.map(|s| if quantized { quantize(s / n) } else { s / n });
                dst[texel_index(x, y, dw)] = texel;
            }
        }
    }

    /// Generates every level of every layer from level 0.
    pub fn generate_mips(&mut self) {
        for layer in 0..self.layers {
            for mip in 0..self.mips.saturating_sub(1) {
                self.downsample(layer, mip);
            }
        }
    }

    /// Reads a subresource as top-down RGBA8. Depth reads as grey.
    pub fn read_rgba8(&self, layer: u32, mip: u32) -> Vec<u8> {
        let (w, h) = self.extent(mip);
        let level = self.level(layer, mip);
        let srgb = self.format == TextureFormat::Rgba8UnormSrgb;
        let depth = self.format.is_depth();
        let mut out = Vec::with_capacity(texel_count(w, h) * 4);
        for row in 0..h {
            let src_row = if self.bottom_up { h - 1 - row } else { row };
            for x in 0..w {
                let t = level
                    .get(texel_index(x, src_row, w))
                    .copied()
                    .unwrap_or([0.0; 4]);
                let px = if depth {
                    [t[0], t[0], t[0], 1.0]
                } else if srgb {
                    [linear_to_srgb(t[0]), linear_to_srgb(t[1]), linear_to_srgb(t[2]), t[3]]
                } else {
                    t
                };
                out.extend(px.map(to_u8));
            }
        }
        out
    }
}
