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

//! The scene camera and its water-plane mirror.

use super::backend::DepthRange;
use crate::math::{degrees_to_radians, Mat4, Vec3};

/// A perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view, radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: degrees_to_radians(60.0),
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    /// Creates a camera looking from `position` at `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Self::default()
        }
    }

    /// The view matrix.
    ///
    /// # Panics
    ///
    /// Panics if the camera is degenerate (position equals target, or up is parallel
    /// to the view direction).
    pub fn view(&self) -> Mat4 {
        match Mat4::look_at_rh(self.position, self.target, self.up) {
            Some(view) => view,
            None => panic!("degenerate camera: {self:?}"),
        }
    }

    /// The view matrix with its translation removed, for skyboxes.
    pub fn rotation_only_view(&self) -> Mat4 {
        let mut view = self.view();
        view.cols[3] = crate::math::Vec4::W;
        view
    }

    /// The projection for a backend's depth convention.
    pub fn projection(&self, aspect_ratio: f32, depth: DepthRange) -> Mat4 {
        match depth {
            DepthRange::NegativeOneToOne => {
                Mat4::perspective_rh_gl(self.fov_y, aspect_ratio, self.near, self.far)
            }
            DepthRange::ZeroToOne => {
                Mat4::perspective_rh_zo(self.fov_y, aspect_ratio, self.near, self.far)
            }
        }
    }

    /// The camera mirrored below a horizontal water plane at `height`, keeping +Y up.
    ///
    /// The resulting image is upside down relative to the main view; water shaders
    /// compensate when they sample the reflection.
    pub fn reflected(&self, height: f32) -> Self {
        let mirror = |p: Vec3| Vec3::new(p.x, 2.0 * height - p.y, p.z);
        Self {
            position: mirror(self.position),
            target: mirror(self.target),
            ..*self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflection_mirrors_position_and_target() {
        let camera = Camera::looking_at(Vec3::new(1.0, 5.0, 2.0), Vec3::new(0.0, 1.0, 0.0));
        let mirrored = camera.reflected(0.5);
        assert_eq!(mirrored.position, Vec3::new(1.0, -4.0, 2.0));
        assert_eq!(mirrored.target, Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(mirrored.up, Vec3::Y);
    }

    #[test]
    #[should_panic(expected = "degenerate camera")]
    fn test_degenerate_camera_fails_loud() {
        Camera::looking_at(Vec3::ONE, Vec3::ONE).view();
    }
}
