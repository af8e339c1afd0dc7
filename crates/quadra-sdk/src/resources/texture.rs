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

use quadra_core::math::{Extent2D, Extent3D};
use quadra_core::renderer::api::{
    mip_level_count, sampler_policy, SamplerId, TextureBinding, TextureDescriptor,
    TextureDimension, TextureFlags, TextureFormat, TextureId, TextureUsage,
};
use quadra_core::renderer::{generate_mip_chain, GraphicsDevice, ResourceError, TextureError};
use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

/// Decoded RGBA8 pixels, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl PixelImage {
    /// Wraps raw pixels, checking their length.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, TextureError> {
        let image = Self {
            width,
            height,
            rgba,
        };
        image.validate()?;
        Ok(image)
    }

    /// Checks that the pixel data matches the dimensions.
    pub fn validate(&self) -> Result<(), TextureError> {
        let expected = self.width as usize * self.height as usize * 4;
        if self.width == 0 || self.height == 0 || self.rgba.len() != expected {
            return Err(TextureError::InvalidDimensions {
                expected,
                actual: self.rgba.len(),
            });
        }
        Ok(())
    }

    /// An image of one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self {
            width,
            height,
            rgba: rgba.repeat(width as usize * height as usize),
        }
    }

    /// Decodes an encoded image (PNG, JPEG) from memory.
    pub fn decode(bytes: &[u8]) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| TextureError::Decode(e.to_string()))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Self::new(width, height, img.into_raw())
    }

    /// Reads and decodes an image file.
    pub fn open(path: &Path) -> Result<Self, TextureError> {
        let bytes = std::fs::read(path)
            .map_err(|e| TextureError::Decode(format!("{}: {e}", path.display())))?;
        Self::decode(&bytes)
    }
}

/// A sampled image with its sampler.
///
/// Render targets created by [`Texture::render_target`] with a color format also own
/// the depth attachment they are drawn with; it is released with the texture.
#[derive(Debug)]
pub struct Texture {
    device: Arc<dyn GraphicsDevice>,
    texture: Option<TextureId>,
    sampler: Option<SamplerId>,
    depth_attachment: Option<TextureId>,
    extent: Extent2D,
    layers: u32,
    mip_levels: u32,
    format: TextureFormat,
    dimension: TextureDimension,
    flags: TextureFlags,
}

impl Texture {
    /// Uploads a 2D image. `MIPMAPS` generates the full chain; `SRGB` decodes on upload.
    pub fn from_pixels(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        image: &PixelImage,
        flags: TextureFlags,
    ) -> Result<Self, TextureError> {
        image.validate()?;
        let mip_levels = if flags.contains(TextureFlags::MIPMAPS) {
            mip_level_count(image.width, image.height)
        } else {
            1
        };
        Self::upload(
            device,
            label,
            Extent2D::new(image.width, image.height),
            1,
            mip_levels,
            TextureDimension::D2,
            flags,
            &image.rgba,
        )
    }

    /// Uploads the six faces of a cubemap in `+X, -X, +Y, -Y, +Z, -Z` order.
    ///
    /// Cubemaps have a single mip level.
    pub fn from_cubemap(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        faces: &[PixelImage],
        flags: TextureFlags,
    ) -> Result<Self, TextureError> {
        if faces.len() != 6 {
            return Err(TextureError::CubemapFaceCount(faces.len()));
        }
        let (width, height) = (faces[0].width, faces[0].height);
        let mut data = Vec::with_capacity(faces[0].rgba.len() * 6);
        for face in faces {
            face.validate()?;
            if (face.width, face.height) != (width, height) {
                return Err(TextureError::InvalidDimensions {
                    expected: faces[0].rgba.len(),
                    actual: face.rgba.len(),
                });
            }
            data.extend_from_slice(&face.rgba);
        }
        let flags = flags - TextureFlags::MIPMAPS;
        Self::upload(
            device,
            label,
            Extent2D::new(width, height),
            6,
            1,
            TextureDimension::Cube,
            flags,
            &data,
        )
    }

    /// An empty 2D render target. Color targets get a private depth attachment.
    pub fn render_target(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, TextureError> {
        let mut target = Self::empty_target(
            device,
            label,
            Extent2D::new(width, height),
            1,
            format,
            TextureDimension::D2,
        )?;
        if !format.is_depth() {
            let depth = target.device.create_texture(
                &TextureDescriptor {
                    label: Some(Cow::Owned(format!("{label} depth"))),
                    size: Extent3D {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    format: TextureFormat::Depth32Float,
                    dimension: TextureDimension::D2,
                    usage: TextureUsage::DEPTH_TARGET,
                },
                None,
            );
            match depth {
                Ok(id) => target.depth_attachment = Some(id),
                Err(err) => {
                    target.destroy();
                    return Err(err.into());
                }
            }
        }
        Ok(target)
    }

    /// An empty depth array: `D2Array` with `count` layers (shadow atlas) or
    /// `CubeArray` with `count` cubes (point shadows).
    pub fn render_target_array(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        size: u32,
        count: u32,
        dimension: TextureDimension,
    ) -> Result<Self, TextureError> {
        let layers = match dimension {
            TextureDimension::D2Array => count,
            TextureDimension::CubeArray => count * 6,
            other => {
                return Err(ResourceError::InvalidDescriptor(format!(
                    "{other:?} is not an array dimension"
                ))
                .into())
            }
        };
        Self::empty_target(
            device,
            label,
            Extent2D::new(size, size),
            layers.max(1),
            TextureFormat::Depth32Float,
            dimension,
        )
    }

    fn empty_target(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        extent: Extent2D,
        layers: u32,
        format: TextureFormat,
        dimension: TextureDimension,
    ) -> Result<Self, TextureError> {
        let attachment = if format.is_depth() {
            TextureUsage::DEPTH_TARGET
        } else {
            TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC
        };
        let descriptor = TextureDescriptor {
            label: Some(Cow::Borrowed(label)),
            size: Extent3D {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            format,
            dimension,
            usage: TextureUsage::SAMPLED | attachment,
        };
        let texture = device.create_texture(&descriptor, None)?;
        let mut target = Self {
            device,
            texture: Some(texture),
            sampler: None,
            depth_attachment: None,
            extent,
            layers,
            mip_levels: 1,
            format,
            dimension,
            flags: TextureFlags::RENDER_TARGET,
        };
        target.create_sampler()?;
        log::debug!(
            "Texture: Created render target '{label}' ({}x{}x{layers}, {format:?})",
            extent.width,
            extent.height
        );
        Ok(target)
    }

    #[allow(clippy::too_many_arguments)]
    fn upload(
        device: Arc<dyn GraphicsDevice>,
        label: &str,
        extent: Extent2D,
        layers: u32,
        mip_levels: u32,
        dimension: TextureDimension,
        flags: TextureFlags,
        data: &[u8],
    ) -> Result<Self, TextureError> {
        let format = if flags.contains(TextureFlags::SRGB) {
            TextureFormat::Rgba8UnormSrgb
        } else {
            TextureFormat::Rgba8Unorm
        };
        let mut usage = TextureUsage::SAMPLED | TextureUsage::COPY_DST;
        if mip_levels > 1 {
            usage |= TextureUsage::COPY_SRC;
        }
        let descriptor = TextureDescriptor {
            label: Some(Cow::Borrowed(label)),
            size: Extent3D {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: layers,
            },
            mip_level_count: mip_levels,
            format,
            dimension,
            usage,
        };
        let texture = device.create_texture(&descriptor, Some(data))?;
        let mut created = Self {
            device,
            texture: Some(texture),
            sampler: None,
            depth_attachment: None,
            extent,
            layers,
            mip_levels,
            format,
            dimension,
            flags,
        };
        if let Err(err) = generate_mip_chain(created.device.as_ref(), texture, mip_levels, layers) {
            created.destroy();
            return Err(err.into());
        }
        created.create_sampler()?;
        log::debug!(
            "Texture: Uploaded '{label}' ({}x{}x{layers}, {mip_levels} mips, {flags:?})",
            extent.width,
            extent.height
        );
        Ok(created)
    }

    fn create_sampler(&mut self) -> Result<(), TextureError> {
        match self
            .device
            .create_sampler(&sampler_policy(self.flags, self.dimension))
        {
            Ok(sampler) => {
                self.sampler = Some(sampler);
                Ok(())
            }
            Err(err) => {
                self.destroy();
                Err(err.into())
            }
        }
    }

    pub fn id(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn sampler(&self) -> Option<SamplerId> {
        self.sampler
    }

    /// The private depth attachment of a color render target.
    pub fn depth_attachment(&self) -> Option<TextureId> {
        self.depth_attachment
    }

    /// Binds this texture to a shader slot, if it is valid.
    pub fn binding(&self, slot: u32) -> Option<TextureBinding> {
        Some(TextureBinding {
            slot,
            texture: self.texture?,
            sampler: self.sampler?,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.texture.is_some() && self.sampler.is_some()
    }

    pub fn is_render_target(&self) -> bool {
        self.flags.contains(TextureFlags::RENDER_TARGET)
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn dimension(&self) -> TextureDimension {
        self.dimension
    }

    pub fn flags(&self) -> TextureFlags {
        self.flags
    }

    /// Releases the sampler, the image and any depth attachment. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(id) = self.sampler.take() {
            if let Err(e) = self.device.destroy_sampler(id) {
                log::warn!("Texture: Failed to destroy sampler {id:?}: {e}");
            }
        }
        for id in [self.texture.take(), self.depth_attachment.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = self.device.destroy_texture(id) {
                log::warn!("Texture: Failed to destroy texture {id:?}: {e}");
            }
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.destroy();
    }
}
