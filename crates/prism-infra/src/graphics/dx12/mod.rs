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

//! Direct3D 12 backend: one root signature shared by every pipeline, with binding
//! groups carved out of per-slot shader-visible descriptor heaps.
//!
//! The descriptor table layout is platform independent; everything touching the
//! `windows` crate is only built on Windows.

pub mod descriptors;

#[cfg(windows)]
mod command;
#[cfg(windows)]
mod context;
#[cfg(windows)]
mod conversions;
#[cfg(windows)]
mod device;
#[cfg(windows)]
mod resources;
#[cfg(windows)]
mod swapchain;

#[cfg(windows)]
pub use command::Dx12CommandBuffer;
#[cfg(windows)]
pub use context::Dx12Context;
#[cfg(windows)]
pub use conversions::{
    clear_color, from_dxgi_format, sampler_desc, split_semantic, texture_formats, IntoD3d12,
    TextureFormats,
};
#[cfg(windows)]
pub use device::{Dx12Backend, DXBC_MAGIC};
#[cfg(windows)]
pub use resources::{
    Dx12Buffer, Dx12DescriptorGroup, Dx12DescriptorPool, Dx12Framebuffer, Dx12Pipeline,
    Dx12RenderPassLayout, Dx12Shader, Dx12Texture, Transition, SHADER_RESOURCE_STATE,
};
#[cfg(windows)]
pub use swapchain::Dx12Swapchain;
