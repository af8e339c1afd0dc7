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

use quadra_core::math::{Extent3D, LinearRgba};
use quadra_core::renderer::api::{
    AddressMode, BlendMode, BorderColor, BufferUsage, CompareFunction, CullMode, FilterMode,
    PolygonMode, TextureDimension, TextureFormat, TextureUsage,
};

/// A local extension trait to convert our engine's types into WGPU-compatible types.
/// This avoids Rust's orphan rules while keeping an idiomatic `.into_wgpu()` syntax.
pub trait IntoWgpu<T> {
    /// Consumes self and converts it into a WGPU-compatible type.
    fn into_wgpu(self) -> T;
}

// --- Dimensions ---

impl IntoWgpu<wgpu::Extent3d> for Extent3D {
    fn into_wgpu(self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: self.depth_or_array_layers,
        }
    }
}

// --- Texture related Enums ---

impl IntoWgpu<wgpu::TextureFormat> for TextureFormat {
    fn into_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }
}

/// The view shaders sample through. Cube arrays are read face by face as a 2D array.
impl IntoWgpu<wgpu::TextureViewDimension> for TextureDimension {
    fn into_wgpu(self) -> wgpu::TextureViewDimension {
        match self {
            TextureDimension::D2 => wgpu::TextureViewDimension::D2,
            TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
            TextureDimension::D2Array | TextureDimension::CubeArray => {
                wgpu::TextureViewDimension::D2Array
            }
        }
    }
}

impl IntoWgpu<wgpu::TextureUsages> for TextureUsage {
    fn into_wgpu(self) -> wgpu::TextureUsages {
        let mut usages = wgpu::TextureUsages::empty();
        if self.contains(TextureUsage::SAMPLED) {
            usages |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if self.intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_TARGET) {
            usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if self.contains(TextureUsage::COPY_SRC) {
            usages |= wgpu::TextureUsages::COPY_SRC;
        }
        if self.contains(TextureUsage::COPY_DST) {
            usages |= wgpu::TextureUsages::COPY_DST;
        }
        usages
    }
}

impl IntoWgpu<wgpu::AddressMode> for AddressMode {
    fn into_wgpu(self) -> wgpu::AddressMode {
        match self {
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
            AddressMode::ClampToBorder => wgpu::AddressMode::ClampToBorder,
        }
    }
}

impl IntoWgpu<wgpu::FilterMode> for FilterMode {
    fn into_wgpu(self) -> wgpu::FilterMode {
        match self {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }
}

impl IntoWgpu<wgpu::MipmapFilterMode> for FilterMode {
    fn into_wgpu(self) -> wgpu::MipmapFilterMode {
        match self {
            FilterMode::Nearest => wgpu::MipmapFilterMode::Nearest,
            FilterMode::Linear => wgpu::MipmapFilterMode::Linear,
        }
    }
}

impl IntoWgpu<wgpu::SamplerBorderColor> for BorderColor {
    fn into_wgpu(self) -> wgpu::SamplerBorderColor {
        match self {
            BorderColor::TransparentBlack => wgpu::SamplerBorderColor::TransparentBlack,
            BorderColor::OpaqueBlack => wgpu::SamplerBorderColor::OpaqueBlack,
            BorderColor::OpaqueWhite => wgpu::SamplerBorderColor::OpaqueWhite,
        }
    }
}

// --- Pipeline state ---

impl IntoWgpu<wgpu::CompareFunction> for CompareFunction {
    fn into_wgpu(self) -> wgpu::CompareFunction {
        match self {
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }
}

impl IntoWgpu<Option<wgpu::Face>> for CullMode {
    fn into_wgpu(self) -> Option<wgpu::Face> {
        match self {
            CullMode::Back => Some(wgpu::Face::Back),
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::None => None,
        }
    }
}

impl IntoWgpu<wgpu::PolygonMode> for PolygonMode {
    fn into_wgpu(self) -> wgpu::PolygonMode {
        match self {
            PolygonMode::Fill => wgpu::PolygonMode::Fill,
            PolygonMode::Line => wgpu::PolygonMode::Line,
        }
    }
}

impl IntoWgpu<Option<wgpu::BlendState>> for BlendMode {
    fn into_wgpu(self) -> Option<wgpu::BlendState> {
        match self {
            BlendMode::Opaque => None,
            BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        }
    }
}

// --- Buffers and colors ---

impl IntoWgpu<wgpu::BufferUsages> for BufferUsage {
    fn into_wgpu(self) -> wgpu::BufferUsages {
        let mut usages = wgpu::BufferUsages::empty();
        if self.contains(BufferUsage::COPY_SRC) {
            usages |= wgpu::BufferUsages::COPY_SRC;
        }
        if self.contains(BufferUsage::COPY_DST) {
            usages |= wgpu::BufferUsages::COPY_DST;
        }
        if self.contains(BufferUsage::INDEX) {
            usages |= wgpu::BufferUsages::INDEX;
        }
        if self.contains(BufferUsage::VERTEX) {
            usages |= wgpu::BufferUsages::VERTEX;
        }
        if self.contains(BufferUsage::UNIFORM) {
            usages |= wgpu::BufferUsages::UNIFORM;
        }
        usages
    }
}

impl IntoWgpu<wgpu::Color> for LinearRgba {
    fn into_wgpu(self) -> wgpu::Color {
        wgpu::Color {
            r: self.r as f64,
            g: self.g as f64,
            b: self.b as f64,
            a: self.a as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_format_conversion() {
        let srgb: wgpu::TextureFormat = TextureFormat::Rgba8UnormSrgb.into_wgpu();
        assert!(srgb.is_srgb());
        let depth: wgpu::TextureFormat = TextureFormat::Depth32Float.into_wgpu();
        assert_eq!(depth, wgpu::TextureFormat::Depth32Float);
    }

    #[test]
    fn test_cube_arrays_are_sampled_as_layers() {
        let view: wgpu::TextureViewDimension = TextureDimension::CubeArray.into_wgpu();
        assert_eq!(view, wgpu::TextureViewDimension::D2Array);
        let cube: wgpu::TextureViewDimension = TextureDimension::Cube.into_wgpu();
        assert_eq!(cube, wgpu::TextureViewDimension::Cube);
    }

    #[test]
    fn test_texture_usage_conversion() {
        let usages: wgpu::TextureUsages =
            (TextureUsage::SAMPLED | TextureUsage::DEPTH_TARGET).into_wgpu();
        assert_eq!(
            usages,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT
        );
    }

    #[test]
    fn test_raster_state_conversion() {
        let cull: Option<wgpu::Face> = CullMode::None.into_wgpu();
        assert_eq!(cull, None);
        let blend: Option<wgpu::BlendState> = BlendMode::Alpha.into_wgpu();
        assert_eq!(blend, Some(wgpu::BlendState::ALPHA_BLENDING));
        let compare: wgpu::CompareFunction = CompareFunction::LessEqual.into_wgpu();
        assert_eq!(compare, wgpu::CompareFunction::LessEqual);
    }

    #[test]
    fn test_buffer_usage_conversion() {
        let usages: wgpu::BufferUsages = (BufferUsage::VERTEX | BufferUsage::COPY_DST).into_wgpu();
        assert_eq!(usages, wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST);
    }
}
