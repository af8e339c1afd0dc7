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

//! Pipeline descriptors and the fixed-function state of each shader.

use super::shader::{ShaderId, ShaderModuleId};
use std::borrow::Cow;

/// An opaque handle to a baked pipeline object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub u64);

/// The class of render target a pipeline is baked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetClass {
    /// The swapchain back buffer with its depth buffer.
    Screen,
    /// An off-screen color target with depth (water reflection/refraction).
    OffscreenColor,
    /// A depth-only target (shadow maps).
    DepthOnly,
}

impl TargetClass {
    /// Every target class.
    pub const ALL: [TargetClass; 3] = [
        TargetClass::Screen,
        TargetClass::OffscreenColor,
        TargetClass::DepthOnly,
    ];
}

/// Which triangles are discarded before rasterization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// Keep both faces.
    None,
    /// Discard back faces (clockwise in NDC).
    Back,
    /// Discard front faces.
    Front,
}

/// How triangles are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    /// Fill the interior.
    Fill,
    /// Draw the edges only.
    Line,
}

/// Color blending of fragment output with the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Replace the target.
    Opaque,
    /// `src * a + dst * (1 - a)`.
    Alpha,
}

/// Depth comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    /// Pass if closer.
    Less,
    /// Pass if closer or equal.
    LessEqual,
    /// Always pass.
    Always,
}

impl CompareFunction {
    /// Evaluates the comparison of an incoming depth against the stored one.
    #[inline]
    pub fn passes(&self, incoming: f32, stored: f32) -> bool {
        match self {
            CompareFunction::Less => incoming < stored,
            CompareFunction::LessEqual => incoming <= stored,
            CompareFunction::Always => true,
        }
    }
}

/// Fixed-function state that is part of a pipeline's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    /// Face culling.
    pub cull: CullMode,
    /// Fill or line.
    pub polygon: PolygonMode,
    /// Blend mode.
    pub blend: BlendMode,
    /// Depth comparison.
    pub depth_compare: CompareFunction,
    /// Whether passing fragments write depth.
    pub depth_write: bool,
}

impl RasterState {
    /// The fixed-function state a shader is always drawn with.
    pub fn for_shader(shader: ShaderId) -> Self {
        let opaque = RasterState {
            cull: CullMode::Back,
            polygon: PolygonMode::Fill,
            blend: BlendMode::Opaque,
            depth_compare: CompareFunction::Less,
            depth_write: true,
        };
        match shader {
            ShaderId::Color | ShaderId::Default | ShaderId::Terrain => opaque,
            ShaderId::Depth => RasterState {
                cull: CullMode::None,
                ..opaque
            },
            ShaderId::Skybox => RasterState {
                cull: CullMode::None,
                depth_compare: CompareFunction::LessEqual,
                depth_write: false,
                ..opaque
            },
            ShaderId::Water => RasterState {
                cull: CullMode::None,
                blend: BlendMode::Alpha,
                ..opaque
            },
            ShaderId::Hud => RasterState {
                cull: CullMode::None,
                blend: BlendMode::Alpha,
                depth_compare: CompareFunction::Always,
                depth_write: false,
                ..opaque
            },
            ShaderId::Wireframe => RasterState {
                cull: CullMode::None,
                polygon: PolygonMode::Line,
                depth_compare: CompareFunction::LessEqual,
                ..opaque
            },
        }
    }
}

/// A descriptor used to bake a [`PipelineId`].
#[derive(Debug, Clone)]
pub struct PipelineDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The logical shader.
    pub shader: ShaderId,
    /// The compiled module implementing `shader`.
    pub module: ShaderModuleId,
    /// The class of target the pipeline renders into.
    pub target: TargetClass,
    /// Vertex stride in bytes; part of the pipeline's identity.
    pub vertex_stride: u32,
    /// Fixed-function state.
    pub state: RasterState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_shaders_skip_depth_writes() {
        assert!(!RasterState::for_shader(ShaderId::Hud).depth_write);
        assert!(!RasterState::for_shader(ShaderId::Skybox).depth_write);
        assert_eq!(
            RasterState::for_shader(ShaderId::Wireframe).polygon,
            PolygonMode::Line
        );
    }

    #[test]
    fn test_compare_functions() {
        assert!(CompareFunction::Less.passes(0.2, 0.5));
        assert!(!CompareFunction::Less.passes(0.5, 0.5));
        assert!(CompareFunction::LessEqual.passes(0.5, 0.5));
        assert!(CompareFunction::Always.passes(2.0, 0.0));
    }
}
