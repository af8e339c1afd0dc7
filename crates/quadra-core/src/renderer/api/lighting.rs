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

//! Light types, shadow layer assignment and light-space projections.

use super::backend::DepthRange;
use super::uniforms::{GpuLight, MAX_LIGHTS};
use crate::math::{LinearRgba, Mat4, Vec3, Vec4, FRAC_PI_2};

/// A light that illuminates from a uniform direction, like the sun.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// The direction the light travels (normalized), from the light towards the scene.
    pub direction: Vec3,
    pub color: LinearRgba,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, -1.0, -0.5).normalize(),
            color: LinearRgba::WHITE,
            intensity: 1.0,
        }
    }
}

/// A light emitting in all directions from a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub color: LinearRgba,
    pub intensity: f32,
    /// Beyond this distance the light has no effect.
    pub range: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: LinearRgba::WHITE,
            intensity: 1.0,
            range: 10.0,
        }
    }
}

/// A light emitting in a cone from a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub direction: Vec3,
    pub color: LinearRgba,
    pub intensity: f32,
    pub range: f32,
    /// Full-intensity half angle, radians.
    pub inner_cone_angle: f32,
    /// Zero-intensity half angle, radians.
    pub outer_cone_angle: f32,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(0.0, -1.0, 0.0),
            color: LinearRgba::WHITE,
            intensity: 1.0,
            range: 20.0,
            inner_cone_angle: 15.0_f32.to_radians(),
            outer_cone_angle: 30.0_f32.to_radians(),
        }
    }
}

/// The closed set of light kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
}

impl LightKind {
    /// The value stored in `GpuLight::position.w`.
    pub fn type_code(&self) -> f32 {
        match self {
            LightKind::Directional(_) => 0.0,
            LightKind::Point(_) => 1.0,
            LightKind::Spot(_) => 2.0,
        }
    }
}

/// A light placed in the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    /// World position; ignored for directional lights.
    pub position: Vec3,
    pub cast_shadows: bool,
}

impl Light {
    /// A shadow-casting directional light.
    pub fn directional(direction: Vec3, color: LinearRgba, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional(DirectionalLight {
                direction: direction.normalize(),
                color,
                intensity,
            }),
            position: Vec3::ZERO,
            cast_shadows: true,
        }
    }

    /// A shadow-casting point light.
    pub fn point(position: Vec3, color: LinearRgba, intensity: f32, range: f32) -> Self {
        Self {
            kind: LightKind::Point(PointLight {
                color,
                intensity,
                range,
            }),
            position,
            cast_shadows: true,
        }
    }

    /// Disables shadow casting.
    pub fn without_shadows(mut self) -> Self {
        self.cast_shadows = false;
        self
    }

    /// Directional/spot shadows go to the 2D atlas, point shadows to the cube array.
    pub fn uses_cube_shadow(&self) -> bool {
        matches!(self.kind, LightKind::Point(_))
    }

    /// The range used for attenuation and as the shadow far plane.
    pub fn range(&self) -> f32 {
        match self.kind {
            LightKind::Directional(_) => 0.0,
            LightKind::Point(p) => p.range,
            LightKind::Spot(s) => s.range,
        }
    }

    /// The light-space view-projection used for atlas shadows.
    ///
    /// Directional lights fit an orthographic box of `radius` around `focus`.
    /// Point lights have no single projection and return identity.
    pub fn shadow_view_projection(&self, depth: DepthRange, focus: Vec3, radius: f32) -> Mat4 {
        match self.kind {
            LightKind::Directional(d) => {
                let eye = focus - d.direction * (radius * 2.0);
                let view = look_at_any_up(eye, focus, d.direction);
                let (l, r, b, t, n, f) = (-radius, radius, -radius, radius, 0.01, radius * 4.0);
                let proj = match depth {
                    DepthRange::NegativeOneToOne => Mat4::orthographic_rh_gl(l, r, b, t, n, f),
                    DepthRange::ZeroToOne => Mat4::orthographic_rh_zo(l, r, b, t, n, f),
                };
                proj * view
            }
            LightKind::Spot(s) => {
                let view = look_at_any_up(self.position, self.position + s.direction, s.direction);
                let fov = (s.outer_cone_angle * 2.0).clamp(0.01, 3.0);
                let proj = match depth {
                    DepthRange::NegativeOneToOne => Mat4::perspective_rh_gl(fov, 1.0, 0.05, s.range.max(0.1)),
                    DepthRange::ZeroToOne => Mat4::perspective_rh_zo(fov, 1.0, 0.05, s.range.max(0.1)),
                };
                proj * view
            }
            LightKind::Point(_) => Mat4::IDENTITY,
        }
    }

    /// Converts to the shader representation.
    pub fn to_gpu(&self, shadow: Option<ShadowSlot>, view_projection: Mat4) -> GpuLight {
        let type_code = self.kind.type_code();
        let (direction, color, intensity, range, cos_outer, cos_inner) = match self.kind {
            LightKind::Directional(d) => (d.direction, d.color, d.intensity, 0.0, -1.0, -1.0),
            LightKind::Point(p) => (Vec3::ZERO, p.color, p.intensity, p.range, -1.0, -1.0),
            LightKind::Spot(s) => (
                s.direction.normalize(),
                s.color,
                s.intensity,
                s.range,
                s.outer_cone_angle.cos(),
                s.inner_cone_angle.cos(),
            ),
        };
        let (shadowed, layer) = match shadow {
            Some(ShadowSlot::Atlas(layer)) | Some(ShadowSlot::Cube(layer)) => (1.0, layer as f32),
            None => (0.0, 0.0),
        };
        GpuLight {
            position: self.position.extend(type_code),
            direction: direction.extend(range),
            color: Vec4::new(color.r, color.g, color.b, intensity),
            params: Vec4::new(cos_outer, shadowed, layer, cos_inner),
            view_projection,
        }
    }
}

fn look_at_any_up(eye: Vec3, target: Vec3, direction: Vec3) -> Mat4 {
    let up = if direction.normalize().cross(Vec3::Y).length_squared() < 1e-4 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    Mat4::look_at_rh(eye, target, up).unwrap_or(Mat4::IDENTITY)
}

/// Where a light's shadow map lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowSlot {
    /// A layer of the 2D shadow atlas.
    Atlas(u32),
    /// A cube of the point shadow cube array.
    Cube(u32),
}

/// Shadow slots assigned to the first `MAX_LIGHTS` lights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowLayout {
    /// One entry per considered light.
    pub slots: Vec<Option<ShadowSlot>>,
    /// Atlas layers in use.
    pub atlas_layers: u32,
    /// Cubes in use.
    pub cube_count: u32,
}

impl ShadowLayout {
    /// Assigns consecutive atlas layers and cube indices to shadow-casting lights.
    pub fn assign(lights: &[Light]) -> Self {
        let mut layout = ShadowLayout::default();
        for light in lights.iter().take(MAX_LIGHTS) {
            let slot = if !light.cast_shadows {
                None
            } else if light.uses_cube_shadow() {
                layout.cube_count += 1;
                Some(ShadowSlot::Cube(layout.cube_count - 1))
            } else {
                layout.atlas_layers += 1;
                Some(ShadowSlot::Atlas(layout.atlas_layers - 1))
            };
            layout.slots.push(slot);
        }
        layout
    }
}

/// View-projections of the six cube faces around a point light, in face order
/// `+X, -X, +Y, -Y, +Z, -Z`.
pub fn point_light_face_matrices(position: Vec3, far: f32, depth: DepthRange) -> [Mat4; 6] {
    let proj = match depth {
        DepthRange::NegativeOneToOne => Mat4::perspective_rh_gl(FRAC_PI_2, 1.0, 0.05, far.max(0.1)),
        DepthRange::ZeroToOne => Mat4::perspective_rh_zo(FRAC_PI_2, 1.0, 0.05, far.max(0.1)),
    };
    let faces = [
        (Vec3::X, -Vec3::Y),
        (-Vec3::X, -Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (-Vec3::Y, -Vec3::Z),
        (Vec3::Z, -Vec3::Y),
        (-Vec3::Z, -Vec3::Y),
    ];
    faces.map(|(dir, up)| {
        proj * Mat4::look_at_rh(position, position + dir, up).unwrap_or(Mat4::IDENTITY)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_layers_are_assigned_per_kind() {
        let lights = [
            Light::directional(-Vec3::Y, LinearRgba::WHITE, 1.0),
            Light::point(Vec3::ONE, LinearRgba::WHITE, 1.0, 5.0),
            Light::point(Vec3::ZERO, LinearRgba::WHITE, 1.0, 5.0).without_shadows(),
            Light::directional(Vec3::X, LinearRgba::WHITE, 1.0),
        ];
        let layout = ShadowLayout::assign(&lights);
        assert_eq!(
            layout.slots,
            vec![
                Some(ShadowSlot::Atlas(0)),
                Some(ShadowSlot::Cube(0)),
                None,
                Some(ShadowSlot::Atlas(1)),
            ]
        );
        assert_eq!(layout.atlas_layers, 2);
        assert_eq!(layout.cube_count, 1);
    }

    #[test]
    fn test_light_ceiling_is_respected() {
        let lights = vec![Light::directional(-Vec3::Y, LinearRgba::WHITE, 1.0); MAX_LIGHTS + 3];
        assert_eq!(ShadowLayout::assign(&lights).slots.len(), MAX_LIGHTS);
    }

    #[test]
    fn test_gpu_light_packs_type_and_shadow_layer() {
        let light = Light::point(Vec3::new(1.0, 2.0, 3.0), LinearRgba::RED, 4.0, 9.0);
        let gpu = light.to_gpu(Some(ShadowSlot::Cube(2)), Mat4::IDENTITY);
        assert_eq!(gpu.position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(gpu.direction.w, 9.0);
        assert_eq!(gpu.color.w, 4.0);
        assert_eq!(gpu.params.y, 1.0);
        assert_eq!(gpu.params.z, 2.0);
    }

    #[test]
    fn test_directional_shadow_projects_focus_inside_clip_volume() {
        let light = Light::directional(Vec3::new(-0.3, -1.0, -0.2), LinearRgba::WHITE, 1.0);
        for depth in [DepthRange::NegativeOneToOne, DepthRange::ZeroToOne] {
            let vp = light.shadow_view_projection(depth, Vec3::ZERO, 10.0);
            let clip = vp.transform_point(Vec3::ZERO);
            assert!(clip.x.abs() < 1e-3 && clip.y.abs() < 1e-3);
            assert!(clip.z > -1.0 && clip.z < 1.0);
        }
    }
}
