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

//! Defines the `LinearRgba` color type and its conversions to 8-bit storage.

use crate::math::vector::Vec4;
use serde::{Deserialize, Serialize};

/// A color in a **linear RGBA** color space using `f32` components.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct LinearRgba {
    /// The red component in linear space.
    pub r: f32,
    /// The green component in linear space.
    pub g: f32,
    /// The blue component in linear space.
    pub b: f32,
    /// The alpha (opacity) component.
    pub a: f32,
}

impl LinearRgba {
    /// Opaque red.
    pub const RED: Self = Self::rgb(1.0, 0.0, 0.0);
    /// Opaque green.
    pub const GREEN: Self = Self::rgb(0.0, 1.0, 0.0);
    /// Opaque blue.
    pub const BLUE: Self = Self::rgb(0.0, 0.0, 1.0);
    /// Opaque white.
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    /// Opaque black.
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    /// Fully transparent black.
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Creates a new `LinearRgba` with explicit RGBA values.
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a new opaque `LinearRgba` (alpha = 1.0).
    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Builds a color from 8-bit unorm components without any gamma decoding.
    #[inline]
    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self::new(
            rgba[0] as f32 / 255.0,
            rgba[1] as f32 / 255.0,
            rgba[2] as f32 / 255.0,
            rgba[3] as f32 / 255.0,
        )
    }

    /// Builds a linear color from 8-bit sRGB-encoded components.
    #[inline]
    pub fn from_srgba8(rgba: [u8; 4]) -> Self {
        Self::new(
            srgb_to_linear(rgba[0] as f32 / 255.0),
            srgb_to_linear(rgba[1] as f32 / 255.0),
            srgb_to_linear(rgba[2] as f32 / 255.0),
            rgba[3] as f32 / 255.0,
        )
    }

    /// Quantizes to 8-bit unorm, rounding to nearest.
    #[inline]
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            unorm8(self.r),
            unorm8(self.g),
            unorm8(self.b),
            unorm8(self.a),
        ]
    }

    /// Returns the color as a `Vec4` (r, g, b, a).
    #[inline]
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r, self.g, self.b, self.a)
    }

    /// Returns the color as an array.
    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for LinearRgba {
    fn default() -> Self {
        Self::BLACK
    }
}

impl From<Vec4> for LinearRgba {
    fn from(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }
}

impl From<[f32; 4]> for LinearRgba {
    fn from(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

#[inline]
fn unorm8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Converts an sRGB component to linear space.
#[inline]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Converts a linear component to sRGB space.
#[inline]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rgba8_rounds_half_up() {
        assert_eq!(LinearRgba::rgb(1.0, 0.5, 0.0).to_rgba8(), [255, 128, 0, 255]);
        assert_eq!(LinearRgba::new(2.0, -1.0, 0.0, 0.0).to_rgba8(), [255, 0, 0, 0]);
    }

    #[test]
    fn test_srgb_round_trip() {
        for i in 0..=10 {
            let c = i as f32 / 10.0;
            assert_relative_eq!(linear_to_srgb(srgb_to_linear(c)), c, epsilon = 1e-5);
        }
    }
}
