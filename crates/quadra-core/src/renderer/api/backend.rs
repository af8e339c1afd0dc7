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

//! Backend identities, capabilities and selection configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four backend models a context can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphicsBackendType {
    /// A global state machine where draws execute when they are issued.
    Immediate,
    /// Command buffers synchronized with binary fences and semaphores.
    FenceBased,
    /// Command lists with a timeline fence and per-frame descriptor heap regions.
    CommandListV1,
    /// Command lists with a timeline fence and persistent descriptors.
    CommandListV2,
}

impl GraphicsBackendType {
    /// Every backend, in default preference order.
    pub const ALL: [GraphicsBackendType; 4] = [
        GraphicsBackendType::Immediate,
        GraphicsBackendType::FenceBased,
        GraphicsBackendType::CommandListV1,
        GraphicsBackendType::CommandListV2,
    ];

    /// A short human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            GraphicsBackendType::Immediate => "Immediate",
            GraphicsBackendType::FenceBased => "FenceBased",
            GraphicsBackendType::CommandListV1 => "CommandListV1",
            GraphicsBackendType::CommandListV2 => "CommandListV2",
        }
    }

    /// The static capabilities of this backend model.
    pub fn capabilities(&self) -> BackendCapabilities {
        match self {
            GraphicsBackendType::Immediate => BackendCapabilities {
                depth_range: DepthRange::NegativeOneToOne,
                origin: FramebufferOrigin::BottomLeft,
                shader_format: ShaderFormat::TextSource,
                descriptor_model: DescriptorModel::TextureUnits,
                bakes_pipelines: false,
                device_mipmaps: true,
                explicit_sync: false,
            },
            GraphicsBackendType::FenceBased => BackendCapabilities {
                depth_range: DepthRange::ZeroToOne,
                origin: FramebufferOrigin::TopLeft,
                shader_format: ShaderFormat::TextSource,
                descriptor_model: DescriptorModel::PerFramePool,
                bakes_pipelines: false,
                device_mipmaps: false,
                explicit_sync: true,
            },
            GraphicsBackendType::CommandListV1 => BackendCapabilities {
                depth_range: DepthRange::ZeroToOne,
                origin: FramebufferOrigin::TopLeft,
                shader_format: ShaderFormat::Bytecode,
                descriptor_model: DescriptorModel::PerFrameHeapRegion,
                bakes_pipelines: true,
                device_mipmaps: false,
                explicit_sync: true,
            },
            GraphicsBackendType::CommandListV2 => BackendCapabilities {
                depth_range: DepthRange::ZeroToOne,
                origin: FramebufferOrigin::TopLeft,
                shader_format: ShaderFormat::Bytecode,
                descriptor_model: DescriptorModel::PersistentHeap,
                bakes_pipelines: true,
                device_mipmaps: false,
                explicit_sync: true,
            },
        }
    }
}

impl fmt::Display for GraphicsBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The clip-space depth convention of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthRange {
    /// NDC depth in `[-1, 1]`.
    NegativeOneToOne,
    /// NDC depth in `[0, 1]`.
    ZeroToOne,
}

/// Where row zero of a framebuffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferOrigin {
    /// Row zero is the bottom of the image.
    BottomLeft,
    /// Row zero is the top of the image.
    TopLeft,
}

/// The on-disk shader format a backend consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderFormat {
    /// Paired vertex/fragment text sources.
    TextSource,
    /// Precompiled bytecode blobs.
    Bytecode,
}

/// How a backend binds textures and uniform buffers to a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorModel {
    /// Textures are bound to numbered units of a global state machine.
    TextureUnits,
    /// A descriptor set is allocated per draw from a pool reset once per frame slot.
    PerFramePool,
    /// Descriptors are written per draw into a frame slot's region of a shader-visible heap.
    PerFrameHeapRegion,
    /// Descriptors live in a device-wide heap for the lifetime of their resource.
    PersistentHeap,
}

/// Static properties of a backend model that callers must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendCapabilities {
    /// Clip-space depth convention; selects the projection matrix flavour.
    pub depth_range: DepthRange,
    /// Row order of framebuffers and render targets.
    pub origin: FramebufferOrigin,
    /// Shader format consumed by `create_shader_module`.
    pub shader_format: ShaderFormat,
    /// Descriptor binding model.
    pub descriptor_model: DescriptorModel,
    /// Whether every (shader, target class) pair needs a baked pipeline before drawing.
    pub bakes_pipelines: bool,
    /// Whether the device generates mip chains itself.
    pub device_mipmaps: bool,
    /// Whether CPU/GPU overlap is managed with explicit fences.
    pub explicit_sync: bool,
}

/// The lifecycle of a graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Constructed, no device acquired yet.
    Uninitialized,
    /// Acquiring device, surface and swapchain.
    Initializing,
    /// Accepting frames.
    Ready,
    /// Draining and rebuilding swapchain-level resources.
    Resizing,
    /// All resources released; the context cannot be used again.
    Released,
}

/// Display strings describing the active device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsAdapterInfo {
    /// Vendor string.
    pub vendor: String,
    /// Renderer (device) string.
    pub renderer: String,
    /// API version string.
    pub api_version: String,
    /// The backend model in use.
    pub backend_type: GraphicsBackendType,
}

impl fmt::Display for GraphicsAdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {} ({})",
            self.vendor, self.renderer, self.api_version, self.backend_type
        )
    }
}

/// Configuration for backend selection with fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSelectionConfig {
    /// The backend to try first.
    pub preferred: GraphicsBackendType,
    /// Backends to try, in order, if the preferred one fails to initialize.
    pub fallback_order: Vec<GraphicsBackendType>,
}

impl BackendSelectionConfig {
    /// The ordered, de-duplicated list of backends to attempt.
    pub fn candidates(&self) -> Vec<GraphicsBackendType> {
        let mut out = vec![self.preferred];
        for kind in &self.fallback_order {
            if !out.contains(kind) {
                out.push(*kind);
            }
        }
        out
    }
}

impl Default for BackendSelectionConfig {
    fn default() -> Self {
        Self {
            preferred: GraphicsBackendType::FenceBased,
            fallback_order: GraphicsBackendType::ALL.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_start_with_preferred_and_have_no_duplicates() {
        let config = BackendSelectionConfig {
            preferred: GraphicsBackendType::CommandListV2,
            fallback_order: vec![
                GraphicsBackendType::CommandListV2,
                GraphicsBackendType::Immediate,
            ],
        };
        assert_eq!(
            config.candidates(),
            vec![
                GraphicsBackendType::CommandListV2,
                GraphicsBackendType::Immediate
            ]
        );
    }

    #[test]
    fn test_only_command_list_backends_bake_pipelines() {
        for kind in GraphicsBackendType::ALL {
            let caps = kind.capabilities();
            let is_cmdlist = matches!(
                kind,
                GraphicsBackendType::CommandListV1 | GraphicsBackendType::CommandListV2
            );
            assert_eq!(caps.bakes_pipelines, is_cmdlist);
            assert_eq!(caps.device_mipmaps, kind == GraphicsBackendType::Immediate);
        }
    }
}
