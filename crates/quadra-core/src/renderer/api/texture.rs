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

//! Texture, sampler and framebuffer descriptors, plus the sampling policy.

use crate::math::Extent3D;
use bitflags::bitflags;
use std::borrow::Cow;

/// An opaque handle to a texture (image plus its default view).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// An opaque handle to a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerId(pub u64);

/// An opaque handle to a framebuffer (a set of render-target attachments).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferId(pub u64);

/// Texel formats supported by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear.
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB-encoded; decoded to linear on upload.
    Rgba8UnormSrgb,
    /// 32-bit float depth.
    Depth32Float,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub fn bytes_per_pixel(&self) -> u32 {
        4
    }

    /// Whether this is a depth format.
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// The shape of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureDimension {
    /// A single 2D image.
    D2,
    /// Six 2D faces.
    Cube,
    /// An array of 2D layers (shadow atlas).
    D2Array,
    /// An array of cubes (point-light shadows); layers are `6 * cube_count`.
    CubeArray,
}

impl TextureDimension {
    /// Whether this is an array dimension.
    pub fn is_array(&self) -> bool {
        matches!(self, TextureDimension::D2Array | TextureDimension::CubeArray)
    }

    /// Whether the layers are cube faces.
    pub fn is_cube(&self) -> bool {
        matches!(self, TextureDimension::Cube | TextureDimension::CubeArray)
    }
}

bitflags! {
    /// How a texture may be used by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Can be sampled by shaders.
        const SAMPLED = 1 << 0;
        /// Can be a color attachment.
        const RENDER_TARGET = 1 << 1;
        /// Can be a depth attachment.
        const DEPTH_TARGET = 1 << 2;
        /// Can be the source of copies and blits.
        const COPY_SRC = 1 << 3;
        /// Can be the destination of copies and blits.
        const COPY_DST = 1 << 4;
    }
}

/// A descriptor used to create a [`TextureId`].
#[derive(Debug, Clone)]
pub struct TextureDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// Size; `depth_or_array_layers` is the total layer count (6 for a cube).
    pub size: Extent3D,
    /// Number of mip levels, at least 1.
    pub mip_level_count: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Shape of the texture.
    pub dimension: TextureDimension,
    /// Allowed usages.
    pub usage: TextureUsage,
}

impl TextureDescriptor<'_> {
    /// Bytes of tightly packed level-0 data across all layers.
    pub fn level0_bytes(&self) -> usize {
        self.size.width as usize
            * self.size.height as usize
            * self.size.depth_or_array_layers as usize
            * self.format.bytes_per_pixel() as usize
    }
}

/// How texture coordinates outside `[0, 1]` are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    /// Tile the texture.
    Repeat,
    /// Tile the texture, mirroring every other repetition.
    MirrorRepeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Return the sampler's border color.
    ClampToBorder,
}

/// Texel filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    /// Nearest texel.
    Nearest,
    /// Bilinear blend of the four nearest texels.
    Linear,
}

/// Border colors for [`AddressMode::ClampToBorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    /// `[0, 0, 0, 0]`.
    TransparentBlack,
    /// `[0, 0, 0, 1]`.
    OpaqueBlack,
    /// `[1, 1, 1, 1]`; for depth textures this reads as the far plane.
    OpaqueWhite,
}

impl BorderColor {
    /// The border value as RGBA.
    pub fn to_array(self) -> [f32; 4] {
        match self {
            BorderColor::TransparentBlack => [0.0, 0.0, 0.0, 0.0],
            BorderColor::OpaqueBlack => [0.0, 0.0, 0.0, 1.0],
            BorderColor::OpaqueWhite => [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// A descriptor used to create a [`SamplerId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    /// Addressing along U.
    pub address_mode_u: AddressMode,
    /// Addressing along V.
    pub address_mode_v: AddressMode,
    /// Addressing along W.
    pub address_mode_w: AddressMode,
    /// Magnification filter.
    pub mag_filter: FilterMode,
    /// Minification filter.
    pub min_filter: FilterMode,
    /// Filter between mip levels.
    pub mipmap_filter: FilterMode,
    /// Border color for `ClampToBorder`.
    pub border_color: Option<BorderColor>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Linear,
            min_filter: FilterMode::Linear,
            mipmap_filter: FilterMode::Linear,
            border_color: None,
        }
    }
}

bitflags! {
    /// Load-time flags of a texture that drive its sampler and mip policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Tile the texture across the surface.
        const REPEAT = 1 << 0;
        /// The texture has meaningful alpha and is blended.
        const TRANSPARENT = 1 << 1;
        /// Pixel data is sRGB-encoded.
        const SRGB = 1 << 2;
        /// Generate a full mip chain after upload.
        const MIPMAPS = 1 << 3;
        /// The texture is written by off-screen passes.
        const RENDER_TARGET = 1 << 4;
    }
}

/// Derives the sampler for a texture from its flags and dimension.
///
/// * Array textures (shadow atlases) clamp to an opaque white border so lookups outside
///   the light frustum read as fully lit.
/// * Other render targets use point filtering with clamp-to-edge.
/// * Transparent textures never repeat, so blended edges do not bleed.
pub fn sampler_policy(flags: TextureFlags, dimension: TextureDimension) -> SamplerDescriptor {
    if dimension.is_array() {
        return SamplerDescriptor {
            address_mode_u: AddressMode::ClampToBorder,
            address_mode_v: AddressMode::ClampToBorder,
            address_mode_w: AddressMode::ClampToBorder,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            border_color: Some(BorderColor::OpaqueWhite),
        };
    }
    if flags.contains(TextureFlags::RENDER_TARGET) {
        return SamplerDescriptor {
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            ..SamplerDescriptor::default()
        };
    }

    let wrap = if flags.contains(TextureFlags::REPEAT) && !flags.contains(TextureFlags::TRANSPARENT) {
        AddressMode::Repeat
    } else {
        AddressMode::ClampToEdge
    };
    SamplerDescriptor {
        address_mode_u: wrap,
        address_mode_v: wrap,
        address_mode_w: if dimension.is_cube() {
            AddressMode::ClampToEdge
        } else {
            wrap
        },
        ..SamplerDescriptor::default()
    }
}

/// Number of levels in a full mip chain: `floor(log2(max(w, h))) + 1`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// The size of `level`, never smaller than one texel.
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

/// The layout/state a texture subresource is in, as tracked by explicit backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageState {
    /// Contents are undefined.
    Undefined,
    /// Readable by shaders.
    ShaderRead,
    /// Writable as a color attachment.
    RenderTarget,
    /// Writable as a depth attachment.
    DepthWrite,
    /// Source of a copy or blit.
    CopySrc,
    /// Destination of a copy or blit.
    CopyDst,
    /// Owned by the presentation engine.
    Present,
}

impl ImageState {
    /// Whether the state allows the GPU to write through an attachment.
    pub fn is_attachment(&self) -> bool {
        matches!(self, ImageState::RenderTarget | ImageState::DepthWrite)
    }
}

/// A descriptor used to create a [`FramebufferId`].
#[derive(Debug, Clone)]
pub struct FramebufferDescriptor<'a> {
    /// An optional debug label.
    pub label: Option<Cow<'a, str>>,
    /// The color attachment, if any.
    pub color: Option<TextureId>,
    /// The depth attachment, if any.
    pub depth: Option<TextureId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_policy_truth_table() {
        let repeat = sampler_policy(TextureFlags::REPEAT, TextureDimension::D2);
        assert_eq!(repeat.address_mode_u, AddressMode::Repeat);
        assert_eq!(repeat.min_filter, FilterMode::Linear);

        let transparent = sampler_policy(
            TextureFlags::REPEAT | TextureFlags::TRANSPARENT,
            TextureDimension::D2,
        );
        assert_eq!(transparent.address_mode_u, AddressMode::ClampToEdge);
        assert_eq!(transparent.address_mode_v, AddressMode::ClampToEdge);

        let target = sampler_policy(
            TextureFlags::RENDER_TARGET | TextureFlags::REPEAT,
            TextureDimension::D2,
        );
        assert_eq!(target.address_mode_u, AddressMode::ClampToEdge);
        assert_eq!(target.mag_filter, FilterMode::Nearest);
        assert_eq!(target.min_filter, FilterMode::Nearest);

        let atlas = sampler_policy(TextureFlags::RENDER_TARGET, TextureDimension::D2Array);
        assert_eq!(atlas.address_mode_u, AddressMode::ClampToBorder);
        assert_eq!(atlas.border_color, Some(BorderColor::OpaqueWhite));

        let plain = sampler_policy(TextureFlags::empty(), TextureDimension::D2);
        assert_eq!(plain.address_mode_u, AddressMode::ClampToEdge);
    }

    #[test]
    fn test_mip_counts() {
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(4, 4), 3);
        assert_eq!(mip_level_count(256, 64), 9);
        assert_eq!(mip_level_count(300, 10), 9);
        assert_eq!(mip_extent(300, 10, 4), (18, 1));
    }
}
