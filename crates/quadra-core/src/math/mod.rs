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

//! Provides the math primitives used by the renderer.
//!
//! All angular functions in this module operate in **radians**.

/// A small constant for floating-point comparisons.
pub const EPSILON: f32 = 1e-5;

pub use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI, TAU};

/// The factor to convert degrees to radians (PI / 180.0).
pub const DEG_TO_RAD: f32 = PI / 180.0;

pub mod color;
pub mod dimension;
pub mod matrix;
pub mod vector;

pub use self::color::{linear_to_srgb, srgb_to_linear, LinearRgba};
pub use self::dimension::{Extent2D, Extent3D};
pub use self::matrix::Mat4;
pub use self::vector::{Vec2, Vec3, Vec4};

/// Converts an angle from degrees to radians.
///
/// # Examples
///
/// ```
/// use quadra_core::math::{degrees_to_radians, PI};
/// assert_eq!(degrees_to_radians(180.0), PI);
/// ```
#[inline]
pub fn degrees_to_radians(degrees: f32) -> f32 {
    degrees * DEG_TO_RAD
}

/// Clamps a floating-point value to the `[0.0, 1.0]` range.
#[inline]
pub fn saturate(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Performs an approximate equality comparison between two floats with a custom tolerance.
#[inline]
pub fn approx_eq_eps(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() < epsilon
}
