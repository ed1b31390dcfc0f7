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

//! Device-wide settings.

use serde::{Deserialize, Serialize};

/// Settings applied when a [`Device`](super::Device) is created.
///
/// Missing fields fall back to [`Default`] when deserialized, so a settings file only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Ceiling on binding groups a single swap slot of a command list may hold.
    /// Reaching it makes `draw` fail with `BindingPoolExhausted`.
    pub max_binding_groups_per_slot: usize,
    /// If `true`, offscreen render passes reject attachments with differing extents or formats.
    pub validate_attachments: bool,
    /// Optional label prefixed to backend debug names.
    pub label: Option<String>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            max_binding_groups_per_slot: 10_000,
            validate_attachments: true,
            label: None,
        }
    }
}
