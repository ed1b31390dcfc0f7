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

//! Vulkan backend on `ash`: one descriptor set per shader stage, carved from a
//! per-slot descriptor pool, with dynamic uniform buffers at binding 0 and combined
//! image samplers at bindings 1 to 8. Memory comes from `gpu-allocator`.
//!
//! Presentation stays with the embedding application behind [`VulkanSwapchain`].

mod command;
mod context;
mod conversions;
mod device;
mod resources;
mod swapchain;

pub use command::{layout_access, LayoutTransition, VulkanCommandBuffer};
pub use context::VulkanContext;
pub use conversions::{barrier_aspect, from_vk_format, view_aspect, IntoVk};
pub use device::{color_clear_value, stage_set_layout_bindings, VulkanBackend, SPIRV_MAGIC};
pub use resources::{
    VulkanBuffer, VulkanDescriptorGroup, VulkanDescriptorPool, VulkanFramebuffer,
    VulkanPipeline, VulkanRenderPass, VulkanShader, VulkanTexture,
};
pub use swapchain::{NativeImage, VulkanSwapchain};
