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

//! What a single shader stage sees during a draw.

use crate::renderer::api::enums::{TextureMinMagFilter, TextureWrapMode};
use crate::renderer::traits::Backend;

/// Number of texture units each shader stage exposes.
pub const MAX_TEXTURE_COUNT: usize = 8;

/// A texture bound to one unit, with the sampler mode it is read with.
pub struct TextureSlot<'a, B: Backend> {
    /// The native texture.
    pub texture: &'a B::Texture,
    /// Addressing outside `[0, 1]`.
    pub wrap: TextureWrapMode,
    /// Minification and magnification filter.
    pub filter: TextureMinMagFilter,
}

impl<B: Backend> Clone for TextureSlot<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend> Copy for TextureSlot<'_, B> {}

/// The resources of one stage handed to [`Backend::write_binding_group`].
pub struct StageResources<'a, B: Backend> {
    /// The constant buffer of the stage and the byte range it exposes.
    pub constant_buffer: Option<(&'a B::Buffer, u64)>,
    /// Texture units, indexed by unit.
    pub textures: [Option<TextureSlot<'a, B>>; MAX_TEXTURE_COUNT],
}

impl<'a, B: Backend> StageResources<'a, B> {
    /// A stage with nothing bound.
    pub fn empty() -> Self {
        Self {
            constant_buffer: None,
            textures: [None; MAX_TEXTURE_COUNT],
        }
    }

    /// Returns `true` if neither a constant buffer nor any texture is bound.
    pub fn is_empty(&self) -> bool {
        self.constant_buffer.is_none() && self.textures.iter().all(Option::is_none)
    }

    /// Iterates over the bound texture units as `(unit, slot)`.
    pub fn bound_textures(&self) -> impl Iterator<Item = (usize, &TextureSlot<'a, B>)> {
        self.textures
            .iter()
            .enumerate()
            .filter_map(|(unit, slot)| slot.as_ref().map(|slot| (unit, slot)))
    }
}
