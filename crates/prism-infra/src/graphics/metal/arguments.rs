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

//! The argument table a Metal binding group replays onto a render command encoder.
//!
//! Metal has no descriptor objects. Every argument is set on the encoder slot by slot,
//! and the encoder keeps whatever it was given until the render pass ends. A group
//! therefore stores every slot of a stage, empty ones included, so that binding it
//! also clears what a previous draw left in the same pass.

use prism_core::renderer::{ShaderStage, TextureMinMagFilter, TextureWrapMode, MAX_TEXTURE_COUNT};
use std::ops::Range;

/// Buffer argument index of the vertex buffer in the vertex stage.
pub const VERTEX_BUFFER_INDEX: usize = 0;
/// Buffer argument index of the constant buffer in each stage.
pub const CONSTANT_BUFFER_INDEX: usize = 1;

/// The sampler state a texture unit is read with.
///
/// There are only four of them, so a backend creates each once and shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerKind {
    pub wrap: TextureWrapMode,
    pub filter: TextureMinMagFilter,
}

impl SamplerKind {
    pub const COUNT: usize = 4;

    pub fn new(wrap: TextureWrapMode, filter: TextureMinMagFilter) -> Self {
        Self { wrap, filter }
    }

    /// Dense index in `0..COUNT`.
    pub fn index(self) -> usize {
        let repeat = matches!(self.wrap, TextureWrapMode::Repeat) as usize;
        let linear = matches!(self.filter, TextureMinMagFilter::Linear) as usize;
        repeat | (linear << 1)
    }

    /// Every kind, ordered by [`index`](Self::index).
    pub fn all() -> [SamplerKind; Self::COUNT] {
        [
            Self::new(TextureWrapMode::Clamp, TextureMinMagFilter::Nearest),
            Self::new(TextureWrapMode::Repeat, TextureMinMagFilter::Nearest),
            Self::new(TextureWrapMode::Clamp, TextureMinMagFilter::Linear),
            Self::new(TextureWrapMode::Repeat, TextureMinMagFilter::Linear),
        ]
    }
}

/// What one shader stage sees: a constant buffer and up to eight texture units.
#[derive(Debug, Clone)]
pub struct StageArguments<B, T> {
    pub constant_buffer: Option<B>,
    pub textures: [Option<(T, SamplerKind)>; MAX_TEXTURE_COUNT],
}

impl<B, T> Default for StageArguments<B, T> {
    fn default() -> Self {
        Self {
            constant_buffer: None,
            textures: std::array::from_fn(|_| None),
        }
    }
}

/// The arguments of every stage of a draw.
#[derive(Debug, Clone)]
pub struct ArgumentTable<B, T> {
    stages: [StageArguments<B, T>; ShaderStage::COUNT],
}

impl<B, T> Default for ArgumentTable<B, T> {
    fn default() -> Self {
        Self {
            stages: std::array::from_fn(|_| StageArguments::default()),
        }
    }
}

impl<B, T> ArgumentTable<B, T> {
    /// Replaces everything `stage` sees. Units past the iterator's end are emptied,
    /// units past [`MAX_TEXTURE_COUNT`] are ignored.
    pub fn write(
        &mut self,
        stage: ShaderStage,
        constant_buffer: Option<B>,
        textures: impl IntoIterator<Item = Option<(T, SamplerKind)>>,
    ) {
        let mut units = textures.into_iter();
        self.stages[stage.index()] = StageArguments {
            constant_buffer,
            textures: std::array::from_fn(|_| units.next().flatten()),
        };
    }

    pub fn stage(&self, stage: ShaderStage) -> &StageArguments<B, T> {
        &self.stages[stage.index()]
    }

    /// The stages a draw binding `stages` sets on the encoder.
    pub fn bound(&self, stages: Range<usize>) -> impl Iterator<Item = (ShaderStage, &StageArguments<B, T>)> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |stage| stages.contains(&stage.index()))
            .map(move |stage| (stage, &self.stages[stage.index()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_clamp() -> SamplerKind {
        SamplerKind::new(TextureWrapMode::Clamp, TextureMinMagFilter::Linear)
    }

    #[test]
    fn sampler_kinds_have_distinct_dense_indices() {
        for (index, kind) in SamplerKind::all().into_iter().enumerate() {
            assert_eq!(kind.index(), index);
        }
    }

    #[test]
    fn rewriting_a_stage_empties_units_it_no_longer_uses() {
        let mut table = ArgumentTable::<&str, &str>::default();
        table.write(
            ShaderStage::Pixel,
            Some("constants"),
            [Some(("albedo", linear_clamp())), Some(("normal", linear_clamp()))],
        );
        table.write(ShaderStage::Pixel, None, [Some(("albedo", linear_clamp()))]);

        let pixel = table.stage(ShaderStage::Pixel);
        assert!(pixel.constant_buffer.is_none());
        assert_eq!(pixel.textures[0].map(|(texture, _)| texture), Some("albedo"));
        assert!(pixel.textures[1..].iter().all(Option::is_none));
    }

    #[test]
    fn extra_units_are_ignored() {
        let mut table = ArgumentTable::<(), usize>::default();
        table.write(
            ShaderStage::Vertex,
            None,
            (0..MAX_TEXTURE_COUNT + 4).map(|unit| Some((unit, linear_clamp()))),
        );
        let units: Vec<_> = table
            .stage(ShaderStage::Vertex)
            .textures
            .iter()
            .map(|entry| entry.map(|(unit, _)| unit))
            .collect();
        assert_eq!(units, (0..MAX_TEXTURE_COUNT).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn binding_a_range_yields_only_those_stages() {
        let mut table = ArgumentTable::<u32, u32>::default();
        table.write(ShaderStage::Vertex, Some(1), []);
        table.write(ShaderStage::Pixel, Some(2), []);

        let pixel_only: Vec<_> = table.bound(1..2).map(|(stage, args)| (stage, args.constant_buffer)).collect();
        assert_eq!(pixel_only, vec![(ShaderStage::Pixel, Some(2))]);
        assert_eq!(table.bound(0..ShaderStage::COUNT).count(), ShaderStage::COUNT);
    }
}
