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

//! Defines GPU texture resources.

use crate::math::Extent2D;
use crate::prism_bitflags;
use crate::renderer::api::enums::Format;
use crate::renderer::error::ResourceError;
use crate::renderer::traits::Backend;
use std::sync::Arc;

prism_bitflags! {
    /// A set of flags describing the allowed usages of a [`Texture`].
    pub struct TextureUsage: u32 {
        /// The texture can be bound to a texture unit and sampled.
        const SAMPLED = 1 << 0;
        /// The texture can be a color attachment of a render pass.
        const RENDER_TARGET = 1 << 1;
        /// The texture can be the depth attachment of a render pass.
        const DEPTH_STENCIL = 1 << 2;
        /// The texture is owned by the platform and was imported.
        const EXTERNAL = 1 << 3;
    }
}

/// A descriptor used to create a [`Texture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Size of the single mip level, in texels.
    pub extent: Extent2D,
    /// Texel format.
    pub format: Format,
    /// How the texture will be used.
    pub usage: TextureUsage,
}

/// A two-dimensional GPU texture.
pub struct Texture<B: Backend> {
    backend: Arc<B>,
    raw: B::Texture,
    descriptor: TextureDescriptor,
}

impl<B: Backend> Texture<B> {
    pub(crate) fn new(backend: Arc<B>, descriptor: TextureDescriptor) -> Result<Self, ResourceError> {
        if descriptor.extent.is_empty() {
            return Err(ResourceError::InvalidSize);
        }
        if descriptor.usage.contains(TextureUsage::DEPTH_STENCIL) != descriptor.format.is_depth() {
            return Err(ResourceError::AttachmentMismatch(format!(
                "format {:?} does not match usage {:?}",
                descriptor.format, descriptor.usage
            )));
        }
        let raw = backend.create_texture(&descriptor)?;
        log::debug!(
            "[{}] created texture {}x{} {:?}",
            B::NAME,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.format
        );
        Ok(Self {
            backend,
            raw,
            descriptor,
        })
    }

    pub(crate) fn import(backend: Arc<B>, external_id: u64) -> Result<Self, ResourceError> {
        let (raw, mut descriptor) = backend.import_texture(external_id)?;
        descriptor.usage.insert(TextureUsage::EXTERNAL);
        Ok(Self {
            backend,
            raw,
            descriptor,
        })
    }

    /// Size in texels.
    pub fn size(&self) -> Extent2D {
        self.descriptor.extent
    }

    /// Texel format.
    pub fn format(&self) -> Format {
        self.descriptor.format
    }

    /// Usage flags.
    pub fn usage(&self) -> TextureUsage {
        self.descriptor.usage
    }

    /// Returns `true` if the texture can be a color attachment.
    pub fn is_render_texture(&self) -> bool {
        self.descriptor.usage.contains(TextureUsage::RENDER_TARGET)
    }

    /// Returns `true` if the texture can be a depth attachment.
    pub fn is_depth_texture(&self) -> bool {
        self.descriptor.usage.contains(TextureUsage::DEPTH_STENCIL)
    }

    /// The native texture.
    pub fn raw(&self) -> &B::Texture {
        &self.raw
    }

    /// Uploads the full contents of the texture. `data` must hold exactly one texel
    /// per pixel, tightly packed.
    pub fn write(&self, data: &[u8]) -> Result<(), ResourceError> {
        let expected = self.descriptor.extent.area() * u64::from(self.descriptor.format.bytes_per_pixel());
        if data.len() as u64 != expected {
            return Err(ResourceError::InvalidSize);
        }
        self.backend.write_texture(&self.raw, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::mock;

    #[test]
    fn write_requires_exact_pixel_data() {
        let device = mock::device::<false>();
        let texture = device
            .create_texture(TextureDescriptor {
                extent: Extent2D::new(4, 2),
                format: Format::R8G8B8A8Unorm,
                usage: TextureUsage::SAMPLED,
            })
            .unwrap();
        assert!(texture.write(&[0u8; 32]).is_ok());
        assert_eq!(texture.write(&[0u8; 31]), Err(ResourceError::InvalidSize));
        assert!(!texture.is_render_texture());
        assert!(!texture.is_depth_texture());
    }

    #[test]
    fn usage_must_agree_with_format() {
        let device = mock::device::<false>();
        let depth_as_color = device.create_texture(TextureDescriptor {
            extent: Extent2D::new(4, 4),
            format: Format::D32Float,
            usage: TextureUsage::RENDER_TARGET,
        });
        assert!(matches!(depth_as_color, Err(ResourceError::AttachmentMismatch(_))));

        let empty = device.create_texture(TextureDescriptor {
            extent: Extent2D::new(0, 4),
            format: Format::R8G8B8A8Unorm,
            usage: TextureUsage::SAMPLED,
        });
        assert!(matches!(empty, Err(ResourceError::InvalidSize)));
    }
}
