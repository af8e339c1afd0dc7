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

//! Frame statistics, resource counts and captured frames.

use crate::renderer::error::ValidationError;

/// Live backend objects, used to detect leaks across resize and backend switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub buffers: usize,
    pub textures: usize,
    pub samplers: usize,
    pub shader_modules: usize,
    pub pipelines: usize,
    pub framebuffers: usize,
    pub fences: usize,
    pub semaphores: usize,
    pub descriptor_pools: usize,
    pub descriptor_heaps: usize,
    pub swapchain_images: usize,
    /// Device memory currently allocated.
    pub bytes_allocated: u64,
}

impl ResourceCounts {
    /// Total number of live objects.
    pub fn total_objects(&self) -> usize {
        self.buffers
            + self.textures
            + self.samplers
            + self.shader_modules
            + self.pipelines
            + self.framebuffers
            + self.fences
            + self.semaphores
            + self.descriptor_pools
            + self.descriptor_heaps
            + self.swapchain_images
    }
}

/// Statistics gathered while rendering one frame.
#[derive(Debug, Clone, Default)]
pub struct RenderStats {
    /// A sequential counter for rendered frames.
    pub frame_number: u64,
    /// The number of draw calls issued.
    pub draw_calls: u32,
    /// The number of triangles submitted.
    pub triangles_submitted: u32,
    /// Off-screen passes rendered before the main pass.
    pub offscreen_passes: u32,
}

/// The outcome of one `draw_frame`.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub stats: RenderStats,
    /// Contract violations detected during the frame.
    pub validation_errors: Vec<ValidationError>,
    /// Whether the swapchain was rebuilt (stale surface) during the frame.
    pub swapchain_rebuilt: bool,
    /// Whether an image was presented.
    pub presented: bool,
}

/// A presented image read back to the CPU, top-down RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl CapturedFrame {
    /// The pixel at `(x, y)` with `y` counted from the top.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_frame_indexes_top_down() {
        let frame = CapturedFrame {
            width: 2,
            height: 2,
            rgba: (0..16).collect(),
        };
        assert_eq!(frame.pixel(1, 0), [4, 5, 6, 7]);
        assert_eq!(frame.pixel(0, 1), [8, 9, 10, 11]);
    }
}
