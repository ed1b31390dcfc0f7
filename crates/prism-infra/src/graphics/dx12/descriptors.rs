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

//! Descriptor table layout of the Direct3D 12 backend.
//!
//! A binding group owns one CBV/SRV table spanning every stage and points at one
//! sampler table. Each slot of a written stage holds either a live view or a null
//! descriptor, and stages a draw does not bind are nulled before the table is set,
//! so a group reused from its pool never exposes an earlier draw's resources.

use prism_core::renderer::api::enums::{ShaderStage, TextureMinMagFilter, TextureWrapMode};
use prism_core::renderer::MAX_TEXTURE_COUNT;
use std::cell::Cell;
use std::ops::Range;

pub const STAGE_COUNT: u32 = ShaderStage::COUNT as u32;
pub const TEXTURES_PER_STAGE: u32 = MAX_TEXTURE_COUNT as u32;
/// CBV/SRV slots per binding group: one CBV per stage, then every stage's SRVs.
pub const CBV_SRV_PER_GROUP: u32 = STAGE_COUNT + STAGE_COUNT * TEXTURES_PER_STAGE;
pub const SAMPLERS_PER_GROUP: u32 = STAGE_COUNT * TEXTURES_PER_STAGE;
/// Size limit of a shader-visible sampler heap.
pub const MAX_SAMPLER_HEAP_SIZE: u32 = 2048;
pub const MAX_SAMPLER_TABLES: u32 = MAX_SAMPLER_HEAP_SIZE / SAMPLERS_PER_GROUP;
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Table slot of the constant buffer of `stage`.
pub const fn cbv_slot(stage: usize) -> u32 {
    stage as u32
}

/// Table slot of texture `unit` of `stage`.
pub const fn srv_slot(stage: usize, unit: usize) -> u32 {
    STAGE_COUNT + sampler_slot(stage, unit)
}

/// Sampler table slot of texture `unit` of `stage`.
pub const fn sampler_slot(stage: usize, unit: usize) -> u32 {
    (stage * MAX_TEXTURE_COUNT + unit) as u32
}

/// Size of the view over a constant buffer: `range` rounded up to 256 bytes, never
/// past the end of the buffer.
pub fn constant_buffer_view_size(range: u64, buffer_size: u64) -> u64 {
    range
        .div_ceil(CONSTANT_BUFFER_ALIGNMENT)
        .saturating_mul(CONSTANT_BUFFER_ALIGNMENT)
        .min(buffer_size)
}

/// One descriptor written into a group's CBV/SRV table. `None` is a null descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableWrite<C, T> {
    ConstantBuffer { slot: u32, buffer: Option<C> },
    ShaderResource { slot: u32, texture: Option<T> },
}

/// The writes covering every CBV/SRV slot of `stage`.
pub fn stage_writes<C, T>(
    stage: usize,
    constant_buffer: Option<C>,
    textures: impl IntoIterator<Item = Option<T>>,
) -> Vec<TableWrite<C, T>> {
    let mut writes = Vec::with_capacity(1 + MAX_TEXTURE_COUNT);
    writes.push(TableWrite::ConstantBuffer {
        slot: cbv_slot(stage),
        buffer: constant_buffer,
    });
    let mut textures = textures.into_iter();
    for unit in 0..MAX_TEXTURE_COUNT {
        writes.push(TableWrite::ShaderResource {
            slot: srv_slot(stage, unit),
            texture: textures.next().flatten(),
        });
    }
    writes
}

/// The writes that null every CBV/SRV slot of `stage`.
pub fn null_stage_writes<C, T>(stage: usize) -> Vec<TableWrite<C, T>> {
    stage_writes(stage, None, std::iter::empty())
}

/// Sampler state of every unit of a group, two bits per sampler slot.
///
/// Groups with equal keys share one sampler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerKey(u32);

impl SamplerKey {
    const REPEAT: u32 = 0b01;
    const LINEAR: u32 = 0b10;

    pub fn with(self, slot: u32, wrap: TextureWrapMode, filter: TextureMinMagFilter) -> Self {
        let mut bits = 0;
        if wrap == TextureWrapMode::Repeat {
            bits |= Self::REPEAT;
        }
        if filter == TextureMinMagFilter::Linear {
            bits |= Self::LINEAR;
        }
        let shift = slot * 2;
        Self((self.0 & !(0b11 << shift)) | (bits << shift))
    }

    pub fn get(self, slot: u32) -> (TextureWrapMode, TextureMinMagFilter) {
        let bits = (self.0 >> (slot * 2)) & 0b11;
        let wrap = if bits & Self::REPEAT != 0 {
            TextureWrapMode::Repeat
        } else {
            TextureWrapMode::Clamp
        };
        let filter = if bits & Self::LINEAR != 0 {
            TextureMinMagFilter::Linear
        } else {
            TextureMinMagFilter::Nearest
        };
        (wrap, filter)
    }

    /// Resets the units of `stage` to clamped nearest sampling.
    pub fn clear_stage(self, stage: usize) -> Self {
        (0..MAX_TEXTURE_COUNT).fold(self, |key, unit| {
            key.with(
                sampler_slot(stage, unit),
                TextureWrapMode::Clamp,
                TextureMinMagFilter::Nearest,
            )
        })
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

/// Which stages of a group hold live descriptors.
#[derive(Debug, Default)]
pub struct StageTracker {
    written: Cell<u32>,
}

impl StageTracker {
    pub fn mark_written(&self, stage: usize) {
        self.written.set(self.written.get() | (1 << stage));
    }

    pub fn is_written(&self, stage: usize) -> bool {
        self.written.get() & (1 << stage) != 0
    }

    /// Returns the written stages outside `bound` and forgets them. The caller nulls
    /// their slots before the table is set.
    pub fn take_stale(&self, bound: Range<usize>) -> Vec<usize> {
        let stale: Vec<usize> = (0..ShaderStage::COUNT)
            .filter(|stage| !bound.contains(stage) && self.is_written(*stage))
            .collect();
        for stage in &stale {
            self.written.set(self.written.get() & !(1 << stage));
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn slots_of_every_stage_are_disjoint_and_inside_the_table() {
        let mut seen = HashSet::new();
        for stage in 0..ShaderStage::COUNT {
            assert!(seen.insert(cbv_slot(stage)));
            for unit in 0..MAX_TEXTURE_COUNT {
                assert!(seen.insert(srv_slot(stage, unit)));
                assert!(sampler_slot(stage, unit) < SAMPLERS_PER_GROUP);
            }
        }
        assert_eq!(seen.len() as u32, CBV_SRV_PER_GROUP);
        assert!(seen.iter().all(|slot| *slot < CBV_SRV_PER_GROUP));
    }

    #[test]
    fn stage_writes_null_every_unbound_unit() {
        let writes = stage_writes(1, Some("constants"), [Some("albedo"), None, Some("normal")]);
        assert_eq!(writes.len(), 1 + MAX_TEXTURE_COUNT);
        assert_eq!(
            writes[0],
            TableWrite::ConstantBuffer {
                slot: cbv_slot(1),
                buffer: Some("constants")
            }
        );
        assert_eq!(
            writes[1],
            TableWrite::ShaderResource {
                slot: srv_slot(1, 0),
                texture: Some("albedo")
            }
        );
        assert_eq!(
            writes[2],
            TableWrite::ShaderResource {
                slot: srv_slot(1, 1),
                texture: None
            }
        );
        let nulls = writes[4..]
            .iter()
            .filter(|write| matches!(write, TableWrite::ShaderResource { texture: None, .. }))
            .count();
        assert_eq!(nulls, MAX_TEXTURE_COUNT - 3);
    }

    #[test]
    fn reused_group_nulls_stages_outside_the_bound_range() {
        let tracker = StageTracker::default();

        // First draw: both stages carry resources.
        tracker.mark_written(ShaderStage::Vertex.index());
        tracker.mark_written(ShaderStage::Pixel.index());
        assert!(tracker.take_stale(0..2).is_empty());

        // The pool rewinds and the group serves a draw binding only the pixel stage.
        tracker.mark_written(ShaderStage::Pixel.index());
        let stale = tracker.take_stale(1..2);
        assert_eq!(stale, vec![ShaderStage::Vertex.index()]);

        let writes: Vec<TableWrite<(), ()>> = null_stage_writes(stale[0]);
        let slots: HashSet<u32> = writes
            .iter()
            .map(|write| match write {
                TableWrite::ConstantBuffer { slot, buffer } => {
                    assert!(buffer.is_none());
                    *slot
                }
                TableWrite::ShaderResource { slot, texture } => {
                    assert!(texture.is_none());
                    *slot
                }
            })
            .collect();
        let vertex_slots: HashSet<u32> = std::iter::once(cbv_slot(0))
            .chain((0..MAX_TEXTURE_COUNT).map(|unit| srv_slot(0, unit)))
            .collect();
        assert_eq!(slots, vertex_slots);

        // Once nulled, the stage is not reported again.
        assert!(tracker.take_stale(1..2).is_empty());
        assert!(!tracker.is_written(ShaderStage::Vertex.index()));
    }

    #[test]
    fn sampler_key_packs_each_slot_independently() {
        let last = SAMPLERS_PER_GROUP - 1;
        let key = SamplerKey::default()
            .with(0, TextureWrapMode::Repeat, TextureMinMagFilter::Nearest)
            .with(last, TextureWrapMode::Clamp, TextureMinMagFilter::Linear);
        assert_eq!(key.get(0), (TextureWrapMode::Repeat, TextureMinMagFilter::Nearest));
        assert_eq!(key.get(last), (TextureWrapMode::Clamp, TextureMinMagFilter::Linear));
        assert_eq!(key.get(1), (TextureWrapMode::Clamp, TextureMinMagFilter::Nearest));

        let cleared = key.clear_stage(1);
        assert_eq!(cleared.get(last), (TextureWrapMode::Clamp, TextureMinMagFilter::Nearest));
        assert_eq!(cleared.get(0), key.get(0));
    }

    #[test]
    fn constant_buffer_views_round_up_without_overrunning() {
        assert_eq!(constant_buffer_view_size(64, 1024), 256);
        assert_eq!(constant_buffer_view_size(256, 1024), 256);
        assert_eq!(constant_buffer_view_size(300, 1024), 512);
        assert_eq!(constant_buffer_view_size(300, 400), 400);
    }

    #[test]
    fn sampler_heap_holds_a_whole_number_of_tables() {
        assert_eq!(MAX_SAMPLER_TABLES * SAMPLERS_PER_GROUP, MAX_SAMPLER_HEAP_SIZE);
    }
}
