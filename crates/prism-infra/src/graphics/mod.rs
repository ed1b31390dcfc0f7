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

//! Graphics backends.
//!
//! - **vulkan**: descriptor sets, one per shader stage.
//! - **dx12**: a shared root signature with descriptor tables.
//! - **metal**: per-stage argument slots on a render command encoder.
//!
//! Direct3D 12 and Metal only build their native parts on Windows and Apple targets;
//! their platform-independent binding layouts compile everywhere.

#[cfg(feature = "dx12")]
pub mod dx12;
#[cfg(feature = "metal")]
pub mod metal;
#[cfg(feature = "vulkan")]
pub mod vulkan;

/// Converts an error reported by a platform into the message stored in core errors.
pub(crate) fn platform_error(context: &str, error: anyhow::Error) -> String {
    format!("{context}: {error:#}")
}
