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

//! Per swap-slot cache of binding groups.

use crate::renderer::error::{CommandError, ResourceError};
use crate::renderer::traits::Backend;

/// Binding groups allocated for one swap slot of a command list.
///
/// Groups are handed out in order from a cursor that [`reset`](Self::reset) rewinds at
/// the start of every recording session; allocated groups are kept and reused, so
/// the cache grows to the busiest frame's demand and then stays put. Everything is
/// released in bulk when the pool drops.
pub struct BindingPool<B: Backend> {
    raw: B::DescriptorPool,
    cache: Vec<B::BindingGroup>,
    cursor: usize,
    capacity: usize,
}

impl<B: Backend> BindingPool<B> {
    /// Creates an empty pool able to hold up to `capacity` groups.
    pub fn new(backend: &B, capacity: usize) -> Result<Self, ResourceError> {
        let raw = backend.create_descriptor_pool(capacity)?;
        Ok(Self {
            raw,
            cache: Vec::new(),
            cursor: 0,
            capacity,
        })
    }

    /// Rewinds the cursor. Nothing is released.
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Returns the next group, allocating one laid out for `pipeline` when every
    /// cached group is already in use this session.
    pub fn get(
        &mut self,
        backend: &B,
        pipeline: &B::Pipeline,
    ) -> Result<&mut B::BindingGroup, CommandError> {
        if self.cursor == self.cache.len() {
            if self.cache.len() >= self.capacity {
                return Err(CommandError::BindingPoolExhausted {
                    capacity: self.capacity,
                });
            }
            let group = backend.allocate_binding_group(&mut self.raw, pipeline)?;
            self.cache.push(group);
            log::trace!("[{}] binding pool grew to {}", B::NAME, self.cache.len());
        }

        let index = self.cursor;
        self.cursor += 1;
        Ok(&mut self.cache[index])
    }

    /// Number of groups allocated so far.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// `true` while no group has ever been allocated.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of groups handed out since the last reset.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// The most groups this pool will ever allocate.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
