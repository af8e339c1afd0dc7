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

//! Integer extents for surfaces, textures and viewports.

use serde::{Deserialize, Serialize};

/// A 2D extent in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2D {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Extent2D {
    /// Creates a new extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if either dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height, `1.0` for empty extents.
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Number of pixels covered by the extent.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A 3D extent; the third component is the depth or the array layer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3D {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels, or the number of array layers.
    pub depth_or_array_layers: u32,
}

impl Extent3D {
    /// Returns the 2D part of the extent.
    pub fn size_2d(&self) -> Extent2D {
        Extent2D::new(self.width, self.height)
    }
}
