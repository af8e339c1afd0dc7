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

//! Per-draw data: target keys, draw properties and the draw call handed to a context.

use super::buffer::BufferId;
use super::pipeline::{PipelineId, RasterState, TargetClass};
use super::shader::{ShaderId, ShaderModuleId};
use super::texture::{SamplerId, TextureId};
use crate::math::{Mat4, Vec3, Vec4};

/// The kind of target a mesh is drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    /// The presented back buffer.
    Screen,
    /// A water reflection target.
    Reflection,
    /// A water refraction target.
    Refraction,
    /// A shadow map layer.
    Shadow,
}

/// Identifies one uniform slot of a mesh: which target, and which instance of it
/// (water body index, or shadow layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey {
    pub kind: TargetKind,
    pub index: u32,
}

impl TargetKey {
    /// The main pass.
    pub const SCREEN: TargetKey = TargetKey {
        kind: TargetKind::Screen,
        index: 0,
    };

    /// Creates a key.
    pub const fn new(kind: TargetKind, index: u32) -> Self {
        Self { kind, index }
    }

    /// The pipeline target class draws with this key render into.
    pub fn target_class(&self) -> TargetClass {
        match self.kind {
            TargetKind::Screen => TargetClass::Screen,
            TargetKind::Reflection | TargetKind::Refraction => TargetClass::OffscreenColor,
            TargetKind::Shadow => TargetClass::DepthOnly,
        }
    }
}

impl Default for TargetKey {
    fn default() -> Self {
        Self::SCREEN
    }
}

/// An axis-aligned world-space volume outside of which fragments are discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipVolume {
    pub min: Vec3,
    pub max: Vec3,
}

/// The light a depth pass renders from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightContext {
    /// Index into the scene's light list.
    pub light_index: usize,
    /// View-projection of the light (or of one cube face).
    pub view_projection: Mat4,
    /// World position of the light.
    pub position: Vec3,
    /// Far plane used for linear point-light depth; zero for projected depth.
    pub far_plane: f32,
}

/// Transient per-draw options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DrawProperties {
    /// Optional clip volume.
    pub clip: Option<ClipVolume>,
    /// Optional world clip plane (water passes).
    pub clip_plane: Option<Vec4>,
    /// Where the draw goes; selects the mesh's uniform slot.
    pub target: TargetKey,
    /// Set for shadow depth passes.
    pub light: Option<LightContext>,
}

/// A texture bound to a shader slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub slot: u32,
    pub texture: TextureId,
    pub sampler: SamplerId,
}

/// Everything a context needs to issue one indexed draw.
#[derive(Debug, Clone)]
pub struct DrawCall<'a> {
    pub vertex_buffer: BufferId,
    pub index_buffer: BufferId,
    pub index_count: u32,
    pub shader: ShaderId,
    pub module: ShaderModuleId,
    /// The baked pipeline for the bound target, on backends that bake pipelines.
    pub pipeline: Option<PipelineId>,
    /// Fixed-function state, applied directly on backends without baked pipelines.
    pub state: RasterState,
    pub uniform_buffer: BufferId,
    pub textures: &'a [TextureBinding],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_keys_map_to_classes() {
        assert_eq!(TargetKey::SCREEN.target_class(), TargetClass::Screen);
        assert_eq!(
            TargetKey::new(TargetKind::Refraction, 3).target_class(),
            TargetClass::OffscreenColor
        );
        assert_eq!(
            TargetKey::new(TargetKind::Shadow, 0).target_class(),
            TargetClass::DepthOnly
        );
    }
}
