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

//! Metal backend on `objc2-metal`: arguments are set straight on the render command
//! encoder, which is recreated for every render pass. Shaders are MSL source.
//!
//! Presentation stays with the embedding application behind [`MetalSwapchain`].

pub mod arguments;

#[cfg(target_vendor = "apple")]
mod command;
#[cfg(target_vendor = "apple")]
mod context;
#[cfg(target_vendor = "apple")]
mod conversions;
#[cfg(target_vendor = "apple")]
mod device;
#[cfg(target_vendor = "apple")]
mod resources;
#[cfg(target_vendor = "apple")]
mod swapchain;

pub use arguments::{ArgumentTable, SamplerKind, StageArguments, CONSTANT_BUFFER_INDEX, VERTEX_BUFFER_INDEX};

#[cfg(target_vendor = "apple")]
pub use command::MetalCommandBuffer;
#[cfg(target_vendor = "apple")]
pub use context::MetalContext;
#[cfg(target_vendor = "apple")]
pub use conversions::{
    clear_color, from_mtl_pixel_format, has_stencil, mtl_pixel_format, mtl_vertex_format, IntoMtl,
};
#[cfg(target_vendor = "apple")]
pub use device::{MetalBackend, MSL_ENTRY_POINT};
#[cfg(target_vendor = "apple")]
pub use resources::{
    MetalArgumentPool, MetalBindingGroup, MetalBuffer, MetalFramebuffer, MetalPipeline,
    MetalRenderPassLayout, MetalShader, MetalTexture, Native,
};
#[cfg(target_vendor = "apple")]
pub use swapchain::MetalSwapchain;
