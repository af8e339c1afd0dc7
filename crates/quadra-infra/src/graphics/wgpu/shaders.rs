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

//! Built-in WGSL programs and the bind group layout each shader expects.
//!
//! Group 0 holds the uniform payload behind a dynamic offset. Group 1 holds the
//! texture slots: a color or cube slot `i` takes bindings `2i` (view) and `2i + 1`
//! (sampler), a shadow slot only binding `2i`. Binding [`MASK_BINDING`] carries a
//! bit per slot that is actually bound, so programs can fall back to their defaults.

use quadra_core::renderer::api::{DepthRange, ShaderId};
use std::num::NonZeroU64;

const COMMON: &str = include_str!("shaders/common.wgsl");

/// Downsamples one mip level into the next.
pub const MIP_BLIT: &str = include_str!("shaders/mip_blit.wgsl");

/// Group 1 binding of the bound-slot mask.
pub const MASK_BINDING: u32 = 15;

/// What a texture slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// A filterable 2D color texture with its sampler.
    Color,
    /// A color cube map with its sampler.
    Cube,
    /// A depth texture array read texel by texel.
    Shadow,
}

/// The kind of each texture slot of `shader`, in slot order.
pub fn slot_kinds(shader: ShaderId) -> &'static [SlotKind] {
    use SlotKind::*;
    match shader {
        ShaderId::Color | ShaderId::Depth | ShaderId::Wireframe => &[],
        ShaderId::Default => &[Color, Shadow, Shadow],
        ShaderId::Hud => &[Color],
        ShaderId::Skybox => &[Cube],
        ShaderId::Terrain => &[Color, Color, Color, Shadow, Shadow],
        ShaderId::Water => &[Color, Color, Color, Shadow],
    }
}

fn body(shader: ShaderId) -> &'static str {
    match shader {
        ShaderId::Color => include_str!("shaders/color.wgsl"),
        ShaderId::Default => include_str!("shaders/default.wgsl"),
        ShaderId::Depth => include_str!("shaders/depth.wgsl"),
        ShaderId::Hud => include_str!("shaders/hud.wgsl"),
        ShaderId::Skybox => include_str!("shaders/skybox.wgsl"),
        ShaderId::Terrain => include_str!("shaders/terrain.wgsl"),
        ShaderId::Water => include_str!("shaders/water.wgsl"),
        ShaderId::Wireframe => include_str!("shaders/wireframe.wgsl"),
    }
}

/// Whether shader text is WGSL rather than a placeholder for another language.
pub fn is_wgsl(code: &str) -> bool {
    code.contains("@vertex") || code.contains("@fragment")
}

/// Prepends the depth convention and the shared declarations to a program body.
/// `#program` directives are dropped.
pub fn compose(body: &str, depth_range: DepthRange) -> String {
    let remap = match depth_range {
        DepthRange::NegativeOneToOne => "1.0",
        DepthRange::ZeroToOne => "0.0",
    };
    let body = body
        .lines()
        .filter(|line| !line.trim_start().starts_with("#program"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("const DEPTH_REMAP: f32 = {remap};\n{COMMON}\n{body}\n")
}

/// The complete built-in module of `shader`.
pub fn builtin(shader: ShaderId, depth_range: DepthRange) -> String {
    compose(body(shader), depth_range)
}

/// The group 0 layout: one uniform buffer with a dynamic offset.
pub fn uniform_layout_entries(uniform_size: u64) -> [wgpu::BindGroupLayoutEntry; 1] {
    [wgpu::BindGroupLayoutEntry {
        binding: 0,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(uniform_size),
        },
        count: None,
    }]
}

/// The group 1 layout of `shader`, or `None` for shaders without textures.
pub fn texture_layout_entries(shader: ShaderId) -> Option<Vec<wgpu::BindGroupLayoutEntry>> {
    let kinds = slot_kinds(shader);
    if kinds.is_empty() {
        return None;
    }
    let fragment = wgpu::ShaderStages::FRAGMENT;
    let mut entries = Vec::with_capacity(kinds.len() * 2 + 1);
    for (i, kind) in kinds.iter().enumerate() {
        let binding = 2 * i as u32;
        let (sample_type, view_dimension) = match kind {
            SlotKind::Color => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::D2,
            ),
            SlotKind::Cube => (
                wgpu::TextureSampleType::Float { filterable: true },
                wgpu::TextureViewDimension::Cube,
            ),
            SlotKind::Shadow => (
                wgpu::TextureSampleType::Depth,
                wgpu::TextureViewDimension::D2Array,
            ),
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: fragment,
            ty: wgpu::BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        });
        if *kind != SlotKind::Shadow {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding + 1,
                visibility: fragment,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
    }
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: MASK_BINDING,
        visibility: fragment,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: NonZeroU64::new(16),
        },
        count: None,
    });
    Some(entries)
}

/// The three interleaved attributes of [`quadra_core::renderer::api::Vertex`].
pub const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_core::renderer::api::{texture_slot_names, Vertex, VERTEX_STRIDE};

    #[test]
    fn test_slot_kinds_cover_every_named_slot() {
        for shader in ShaderId::ALL {
            assert_eq!(
                slot_kinds(shader).len(),
                texture_slot_names(shader).len(),
                "{shader}"
            );
        }
        assert!((2 * 5) < MASK_BINDING);
    }

    #[test]
    fn test_programs_declare_their_bindings() {
        for shader in ShaderId::ALL {
            let source = builtin(shader, DepthRange::ZeroToOne);
            assert!(source.contains("fn vs_main"), "{shader}");
            assert!(source.contains("fn fs_main"), "{shader}");
            assert!(source.contains("@group(0) @binding(0)"), "{shader}");
            for i in 0..slot_kinds(shader).len() {
                let binding = format!("@group(1) @binding({})", 2 * i);
                assert!(source.contains(&binding), "{shader}: {binding}");
            }
            let has_mask = source.contains(&format!("@binding({MASK_BINDING})"));
            assert_eq!(has_mask, texture_layout_entries(shader).is_some(), "{shader}");
        }
    }

    #[test]
    fn test_compose_sets_the_depth_convention() {
        let gl = compose("#program color\nfn f() {}", DepthRange::NegativeOneToOne);
        assert!(gl.starts_with("const DEPTH_REMAP: f32 = 1.0;"));
        assert!(!gl.contains("#program"));
        let zero = builtin(ShaderId::Color, DepthRange::ZeroToOne);
        assert!(zero.starts_with("const DEPTH_REMAP: f32 = 0.0;"));
    }

    #[test]
    fn test_placeholder_sources_are_not_wgsl() {
        assert!(!is_wgsl("#program hud\nvoid main() {}\n"));
        assert!(is_wgsl(body(ShaderId::Hud)));
    }

    #[test]
    fn test_vertex_attributes_match_the_vertex_layout() {
        let last = VERTEX_ATTRIBUTES[2];
        assert_eq!(last.offset, std::mem::offset_of!(Vertex, uv) as u64);
        assert_eq!(last.offset + last.format.size(), VERTEX_STRIDE as u64);
    }
}
