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

//! Provides the column-major `Mat4` type used for transforms and projections.

use super::vector::{Vec3, Vec4};
use super::EPSILON;
use std::ops::Mul;

/// A 4x4 column-major matrix.
///
/// The memory layout is column-major, which is what every uniform schema expects,
/// so a `Mat4` can be copied into a GPU payload as-is.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Mat4 {
    /// The columns of the matrix. `cols[0]` is the first column, and so on.
    pub cols: [Vec4; 4],
}

impl Mat4 {
    /// The 4x4 identity matrix.
    pub const IDENTITY: Self = Self {
        cols: [Vec4::X, Vec4::Y, Vec4::Z, Vec4::W],
    };

    /// Creates a new matrix from four column vectors.
    #[inline]
    pub fn from_cols(c0: Vec4, c1: Vec4, c2: Vec4, c3: Vec4) -> Self {
        Self {
            cols: [c0, c1, c2, c3],
        }
    }

    /// Creates a translation matrix.
    #[inline]
    pub fn from_translation(v: Vec3) -> Self {
        Self::from_cols(Vec4::X, Vec4::Y, Vec4::Z, v.extend(1.0))
    }

    /// Creates a non-uniform scale matrix.
    #[inline]
    pub fn from_scale(scale: Vec3) -> Self {
        Self::from_cols(
            Vec4::new(scale.x, 0.0, 0.0, 0.0),
            Vec4::new(0.0, scale.y, 0.0, 0.0),
            Vec4::new(0.0, 0.0, scale.z, 0.0),
            Vec4::W,
        )
    }

    /// Creates a rotation around the X axis.
    #[inline]
    pub fn from_rotation_x(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_cols(
            Vec4::X,
            Vec4::new(0.0, c, s, 0.0),
            Vec4::new(0.0, -s, c, 0.0),
            Vec4::W,
        )
    }

    /// Creates a rotation around the Y axis.
    #[inline]
    pub fn from_rotation_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        Self::from_cols(
            Vec4::new(c, 0.0, -s, 0.0),
            Vec4::Y,
            Vec4::new(s, 0.0, c, 0.0),
            Vec4::W,
        )
    }

    /// Creates a right-handed perspective projection with a `[-1, 1]` depth range (GL).
    #[inline]
    pub fn perspective_rh_gl(fov_y_radians: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Self {
        assert!(z_near > 0.0 && z_far > z_near);
        let f = 1.0 / (fov_y_radians / 2.0).tan();
        Self::from_cols(
            Vec4::new(f / aspect_ratio, 0.0, 0.0, 0.0),
            Vec4::new(0.0, f, 0.0, 0.0),
            Vec4::new(0.0, 0.0, (z_far + z_near) / (z_near - z_far), -1.0),
            Vec4::new(0.0, 0.0, 2.0 * z_far * z_near / (z_near - z_far), 0.0),
        )
    }

    /// Creates a right-handed perspective projection with a `[0, 1]` depth range (ZO).
    #[inline]
    pub fn perspective_rh_zo(fov_y_radians: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Self {
        assert!(z_near > 0.0 && z_far > z_near);
        let f = 1.0 / (fov_y_radians / 2.0).tan();
        Self::from_cols(
            Vec4::new(f / aspect_ratio, 0.0, 0.0, 0.0),
            Vec4::new(0.0, f, 0.0, 0.0),
            Vec4::new(0.0, 0.0, z_far / (z_near - z_far), -1.0),
            Vec4::new(0.0, 0.0, z_near * z_far / (z_near - z_far), 0.0),
        )
    }

    /// Creates a right-handed orthographic projection with a `[-1, 1]` depth range (GL).
    #[inline]
    pub fn orthographic_rh_gl(left: f32, right: f32, bottom: f32, top: f32, z_near: f32, z_far: f32) -> Self {
        let rml = right - left;
        let tmb = top - bottom;
        let fmn = z_far - z_near;
        Self::from_cols(
            Vec4::new(2.0 / rml, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / tmb, 0.0, 0.0),
            Vec4::new(0.0, 0.0, -2.0 / fmn, 0.0),
            Vec4::new(
                -(right + left) / rml,
                -(top + bottom) / tmb,
                -(z_far + z_near) / fmn,
                1.0,
            ),
        )
    }

    /// Creates a right-handed orthographic projection with a `[0, 1]` depth range (ZO).
    #[inline]
    pub fn orthographic_rh_zo(left: f32, right: f32, bottom: f32, top: f32, z_near: f32, z_far: f32) -> Self {
        let rml = right - left;
        let tmb = top - bottom;
        let fmn = z_far - z_near;
        Self::from_cols(
            Vec4::new(2.0 / rml, 0.0, 0.0, 0.0),
            Vec4::new(0.0, 2.0 / tmb, 0.0, 0.0),
            Vec4::new(0.0, 0.0, -1.0 / fmn, 0.0),
            Vec4::new(-(right + left) / rml, -(top + bottom) / tmb, -z_near / fmn, 1.0),
        )
    }

    /// Creates a right-handed view matrix for a camera looking from `eye` towards `target`.
    ///
    /// Returns `None` if `eye` and `target` coincide or `up` is parallel to the view direction.
    #[inline]
    pub fn look_at_rh(eye: Vec3, target: Vec3, up: Vec3) -> Option<Self> {
        let forward = target - eye;
        if forward.length_squared() < EPSILON * EPSILON {
            return None;
        }
        let f = forward.normalize();
        let s = f.cross(up);
        if s.length_squared() < EPSILON * EPSILON {
            return None;
        }
        let s = s.normalize();
        let u = s.cross(f);

        Some(Self::from_cols(
            Vec4::new(s.x, u.x, -f.x, 0.0),
            Vec4::new(s.y, u.y, -f.y, 0.0),
            Vec4::new(s.z, u.z, -f.z, 0.0),
            Vec4::new(-eye.dot(s), -eye.dot(u), eye.dot(f), 1.0),
        ))
    }

    /// Returns the matrix as a flat column-major array.
    #[inline]
    pub fn to_cols_array(&self) -> [f32; 16] {
        let c = &self.cols;
        [
            c[0].x, c[0].y, c[0].z, c[0].w, c[1].x, c[1].y, c[1].z, c[1].w, c[2].x, c[2].y,
            c[2].z, c[2].w, c[3].x, c[3].y, c[3].z, c[3].w,
        ]
    }

    /// Builds a matrix from a flat column-major array.
    #[inline]
    pub fn from_cols_array(m: &[f32; 16]) -> Self {
        Self::from_cols(
            Vec4::new(m[0], m[1], m[2], m[3]),
            Vec4::new(m[4], m[5], m[6], m[7]),
            Vec4::new(m[8], m[9], m[10], m[11]),
            Vec4::new(m[12], m[13], m[14], m[15]),
        )
    }

    /// Returns the transpose of the matrix.
    #[inline]
    pub fn transpose(&self) -> Self {
        let c = &self.cols;
        Self::from_cols(
            Vec4::new(c[0].x, c[1].x, c[2].x, c[3].x),
            Vec4::new(c[0].y, c[1].y, c[2].y, c[3].y),
            Vec4::new(c[0].z, c[1].z, c[2].z, c[3].z),
            Vec4::new(c[0].w, c[1].w, c[2].w, c[3].w),
        )
    }

    /// Computes the inverse of the matrix, or `None` if it is singular.
    pub fn inverse(&self) -> Option<Self> {
        let m = self.to_cols_array();
        let mut inv = [0.0f32; 16];

        inv[0] = m[5] * m[10] * m[15] - m[5] * m[11] * m[14] - m[9] * m[6] * m[15]
            + m[9] * m[7] * m[14]
            + m[13] * m[6] * m[11]
            - m[13] * m[7] * m[10];
        inv[4] = -m[4] * m[10] * m[15] + m[4] * m[11] * m[14] + m[8] * m[6] * m[15]
            - m[8] * m[7] * m[14]
            - m[12] * m[6] * m[11]
            + m[12] * m[7] * m[10];
        inv[8] = m[4] * m[9] * m[15] - m[4] * m[11] * m[13] - m[8] * m[5] * m[15]
            + m[8] * m[7] * m[13]
            + m[12] * m[5] * m[11]
            - m[12] * m[7] * m[9];
        inv[12] = -m[4] * m[9] * m[14] + m[4] * m[10] * m[13] + m[8] * m[5] * m[14]
            - m[8] * m[6] * m[13]
            - m[12] * m[5] * m[10]
            + m[12] * m[6] * m[9];
        inv[1] = -m[1] * m[10] * m[15] + m[1] * m[11] * m[14] + m[9] * m[2] * m[15]
            - m[9] * m[3] * m[14]
            - m[13] * m[2] * m[11]
            + m[13] * m[3] * m[10];
        inv[5] = m[0] * m[10] * m[15] - m[0] * m[11] * m[14] - m[8] * m[2] * m[15]
            + m[8] * m[3] * m[14]
            + m[12] * m[2] * m[11]
            - m[12] * m[3] * m[10];
        inv[9] = -m[0] * m[9] * m[15] + m[0] * m[11] * m[13] + m[8] * m[1] * m[15]
            - m[8] * m[3] * m[13]
            - m[12] * m[1] * m[11]
            + m[12] * m[3] * m[9];
        inv[13] = m[0] * m[9] * m[14] - m[0] * m[10] * m[13] - m[8] * m[1] * m[14]
            + m[8] * m[2] * m[13]
            + m[12] * m[1] * m[10]
            - m[12] * m[2] * m[9];
        inv[2] = m[1] * m[6] * m[15] - m[1] * m[7] * m[14] - m[5] * m[2] * m[15]
            + m[5] * m[3] * m[14]
            + m[13] * m[2] * m[7]
            - m[13] * m[3] * m[6];
        inv[6] = -m[0] * m[6] * m[15] + m[0] * m[7] * m[14] + m[4] * m[2] * m[15]
            - m[4] * m[3] * m[14]
            - m[12] * m[2] * m[7]
            + m[12] * m[3] * m[6];
        inv[10] = m[0] * m[5] * m[15] - m[0] * m[7] * m[13] - m[4] * m[1] * m[15]
            + m[4] * m[3] * m[13]
            + m[12] * m[1] * m[7]
            - m[12] * m[3] * m[5];
        inv[14] = -m[0] * m[5] * m[14] + m[0] * m[6] * m[13] + m[4] * m[1] * m[14]
            - m[4] * m[2] * m[13]
            - m[12] * m[1] * m[6]
            + m[12] * m[2] * m[5];
        inv[3] = -m[1] * m[6] * m[11] + m[1] * m[7] * m[10] + m[5] * m[2] * m[11]
            - m[5] * m[3] * m[10]
            - m[9] * m[2] * m[7]
            + m[9] * m[3] * m[6];
        inv[7] = m[0] * m[6] * m[11] - m[0] * m[7] * m[10] - m[4] * m[2] * m[11]
            + m[4] * m[3] * m[10]
            + m[8] * m[2] * m[7]
            - m[8] * m[3] * m[6];
        inv[11] = -m[0] * m[5] * m[11] + m[0] * m[7] * m[9] + m[4] * m[1] * m[11]
            - m[4] * m[3] * m[9]
            - m[8] * m[1] * m[7]
            + m[8] * m[3] * m[5];
        inv[15] = m[0] * m[5] * m[10] - m[0] * m[6] * m[9] - m[4] * m[1] * m[10]
            + m[4] * m[2] * m[9]
            + m[8] * m[1] * m[6]
            - m[8] * m[2] * m[5];

        let det = m[0] * inv[0] + m[1] * inv[4] + m[2] * inv[8] + m[3] * inv[12];
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        for v in inv.iter_mut() {
            *v *= inv_det;
        }
        Some(Self::from_cols_array(&inv))
    }

    /// Returns the matrix used to transform normals: the inverse-transpose of `self`.
    /// Falls back to identity for singular matrices.
    pub fn normal_matrix(&self) -> Self {
        self.inverse()
            .map(|inv| inv.transpose())
            .unwrap_or(Self::IDENTITY)
    }

    /// Transforms a point (`w = 1`) and returns the homogeneous result.
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec4 {
        *self * p.extend(1.0)
    }
}

impl Default for Mat4 {
    #[inline]
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul<Vec4> for Mat4 {
    type Output = Vec4;
    #[inline]
    fn mul(self, v: Vec4) -> Vec4 {
        self.cols[0] * v.x + self.cols[1] * v.y + self.cols[2] * v.z + self.cols[3] * v.w
    }
}

impl Mul<Mat4> for Mat4 {
    type Output = Mat4;
    #[inline]
    fn mul(self, rhs: Mat4) -> Mat4 {
        Mat4::from_cols(
            self * rhs.cols[0],
            self * rhs.cols[1],
            self * rhs.cols[2],
            self * rhs.cols[3],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FRAC_PI_2;
    use approx::assert_relative_eq;

    fn assert_mat_eq(a: &Mat4, b: &Mat4) {
        for (x, y) in a.to_cols_array().iter().zip(b.to_cols_array().iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_inverse_of_translation() {
        let m = Mat4::from_translation(Vec3::new(1.0, -2.0, 3.0));
        let inv = m.inverse().unwrap();
        assert_mat_eq(&(m * inv), &Mat4::IDENTITY);
    }

    #[test]
    fn test_inverse_of_singular_is_none() {
        assert!(Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0)).inverse().is_none());
    }

    #[test]
    fn test_perspective_depth_ranges() {
        let gl = Mat4::perspective_rh_gl(FRAC_PI_2, 1.0, 0.1, 100.0);
        let zo = Mat4::perspective_rh_zo(FRAC_PI_2, 1.0, 0.1, 100.0);

        let near = Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = Vec4::new(0.0, 0.0, -100.0, 1.0);
        let ndc = |m: Mat4, p: Vec4| {
            let c = m * p;
            c.z / c.w
        };
        assert_relative_eq!(ndc(gl, near), -1.0, epsilon = 1e-4);
        assert_relative_eq!(ndc(gl, far), 1.0, epsilon = 1e-3);
        assert_relative_eq!(ndc(zo, near), 0.0, epsilon = 1e-4);
        assert_relative_eq!(ndc(zo, far), 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_look_at_rejects_degenerate_input() {
        assert!(Mat4::look_at_rh(Vec3::ZERO, Vec3::ZERO, Vec3::Y).is_none());
        assert!(Mat4::look_at_rh(Vec3::ZERO, Vec3::Y, Vec3::Y).is_none());
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y).unwrap();
        let p = view.transform_point(Vec3::ZERO);
        assert_relative_eq!(p.z, -5.0, epsilon = 1e-5);
    }
}
