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

//! Backend-agnostic rendering API.
//!
//! - **[`enums`]**: formats, stages and fixed-function state enumerations.
//! - **[`buffer`]** / **[`texture`]** / **[`shader`]**: GPU resources and their descriptors.
//! - **[`pipeline`]**: pipeline description and compilation.
//! - **[`render_pass`]**: render targets and the compatible-layout cache.
//! - **[`binding`]**: what a shader stage sees during a draw.

pub mod binding;
pub mod buffer;
pub mod enums;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod texture;

pub use self::binding::{StageResources, TextureSlot, MAX_TEXTURE_COUNT};
pub use self::buffer::{
    Buffer, BufferDescriptor, BufferLock, BufferUsage, ConstantBuffer, IndexBuffer, VertexBuffer,
};
pub use self::enums::*;
pub use self::pipeline::{
    BindingLayoutDescriptor, BlendState, CompileState, PipelineDescriptor, PipelineState,
    VertexAttribute, VertexLayoutElement, MAX_VERTEX_LAYOUT_COUNT,
};
pub use self::render_pass::{
    FramebufferAttachments, RenderPass, RenderPassBeginInfo, RenderPassPipelineState,
    RenderPassPipelineStateCache, RenderPassPipelineStateKey, RenderTarget, ScreenTarget,
};
pub use self::shader::Shader;
pub use self::texture::{Texture, TextureDescriptor, TextureUsage};
