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

//! # Prism Infra
//!
//! Concrete backends for `prism-core`, each implementing
//! [`prism_core::renderer::Backend`] on its native binding crate: `ash` for Vulkan,
//! `windows` for Direct3D 12 and `objc2-metal` for Metal.
//!
//! Backends own their device and queue. Window surfaces stay with the embedding
//! application, which hands them over through a small swap-chain trait per backend.

pub mod graphics;

#[cfg(all(windows, feature = "dx12"))]
pub use graphics::dx12::{Dx12Backend, Dx12Context, Dx12Swapchain};
#[cfg(all(target_vendor = "apple", feature = "metal"))]
pub use graphics::metal::{MetalBackend, MetalContext, MetalSwapchain};
#[cfg(feature = "vulkan")]
pub use graphics::vulkan::{VulkanBackend, VulkanContext, VulkanSwapchain};
