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

//! Recording statistics of a command list.

/// Counters gathered while a [`CommandList`](super::CommandList) records one slot.
///
/// Reset by `begin`. Bind counters count backend bind calls actually recorded, so
/// they directly expose redundant-state elimination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandListStats {
    /// Indexed draws recorded.
    pub draw_calls: u32,
    /// Total indices submitted by those draws.
    pub indices: u64,
    /// Vertex buffer bind calls.
    pub vertex_buffer_binds: u32,
    /// Index buffer bind calls.
    pub index_buffer_binds: u32,
    /// Pipeline bind calls.
    pub pipeline_binds: u32,
    /// Binding group bind calls.
    pub binding_group_binds: u32,
    /// Binding groups taken from the slot's pool.
    pub binding_groups_acquired: u32,
    /// Render passes begun.
    pub render_passes: u32,
}

impl CommandListStats {
    /// Sum of all bind calls, whatever the category.
    pub fn total_binds(&self) -> u32 {
        self.vertex_buffer_binds
            + self.index_buffer_binds
            + self.pipeline_binds
            + self.binding_group_binds
    }
}
