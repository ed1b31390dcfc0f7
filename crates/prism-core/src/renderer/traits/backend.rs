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

use crate::math::{Rect2D, Viewport};
use crate::renderer::api::binding::StageResources;
use crate::renderer::api::buffer::BufferDescriptor;
use crate::renderer::api::enums::{IndexFormat, ShaderStage};
use crate::renderer::api::pipeline::PipelineDescriptor;
use crate::renderer::api::render_pass::{
    FramebufferAttachments, RenderPassBeginInfo, RenderPassPipelineStateKey, ScreenTarget,
};
use crate::renderer::api::texture::TextureDescriptor;
use crate::renderer::error::{PipelineError, RenderError, ResourceError, ShaderError};
use std::ops::Range;

/// The capability interface of a native graphics backend.
///
/// A backend is chosen once, as the type parameter of [`Device`](crate::Device), and is
/// never mixed with another at runtime. Associated types are the backend's native
/// objects; they release their native handles when dropped, so an early `?` return
/// inside a backend method frees everything created so far.
///
/// The methods fall into three groups:
/// * **compile**: object creation (`create_*`, `allocate_binding_group`),
/// * **bind**: `write_binding_group` and the `cmd_bind_*` family,
/// * **draw**: render pass bracketing, dynamic state and `cmd_draw_indexed`.
///
/// Recording methods cannot fail: validation happens in the backend-generic layer
/// before they are called.
pub trait Backend: Send + Sync + Sized + 'static {
    /// A GPU buffer.
    type Buffer: Send + Sync;
    /// A GPU texture together with the view used to sample or render to it.
    type Texture: Send + Sync;
    /// A shader module created from opaque bytecode.
    type Shader: Send + Sync;
    /// A compiled pipeline object together with its binding layout.
    type Pipeline: Send + Sync;
    /// The attachment-shape object pipelines and framebuffers are created against.
    type CompatibleLayout: Send + Sync;
    /// The attachments a render pass renders into.
    type Framebuffer: Send + Sync;
    /// The allocator binding groups of one binding pool are carved from.
    type DescriptorPool: Send;
    /// One group of per-stage binding sets.
    type BindingGroup: Send;
    /// A command buffer recorded for one swap slot.
    type CommandBuffer: Send;

    /// Human readable backend name, used in logs.
    const NAME: &'static str;

    /// `true` when beginning a render pass discards every binding recorded before it.
    const RESETS_BINDINGS_PER_PASS: bool = false;

    // --- Frame lifecycle ---

    /// Number of rotating swap slots.
    fn swap_count(&self) -> usize;

    /// Index of the swap slot being recorded this frame.
    fn current_swap_index(&self) -> usize;

    /// Advances the platform to the next frame.
    fn new_frame(&self) -> Result<(), RenderError>;

    /// Hands a finished command buffer to the submission queue.
    fn submit(&self, command_buffer: &Self::CommandBuffer) -> Result<(), RenderError>;

    /// Blocks until the device has finished all submitted work.
    fn wait_idle(&self);

    // --- Resources ---

    /// Creates a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Self::Buffer, ResourceError>;

    /// Copies `data` into the CPU-visible memory of `buffer` at `offset`.
    fn write_buffer(
        &self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError>;

    /// Reads the CPU-visible memory of `buffer` at `offset` into `out`.
    fn read_buffer(
        &self,
        buffer: &Self::Buffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), ResourceError>;

    /// Creates a texture.
    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Self::Texture, ResourceError>;

    /// Wraps a texture owned by the platform, identified by an opaque id.
    fn import_texture(
        &self,
        external_id: u64,
    ) -> Result<(Self::Texture, TextureDescriptor), ResourceError>;

    /// Uploads the full contents of `texture`.
    fn write_texture(&self, texture: &Self::Texture, data: &[u8]) -> Result<(), ResourceError>;

    /// Creates a shader module from compiled bytecode.
    fn create_shader(&self, bytecode: &[u8]) -> Result<Self::Shader, ShaderError>;

    // --- Compile ---

    /// Describes the presentation target of the current swap slot.
    fn screen_target(&self) -> ScreenTarget;

    /// Compiles the attachment-shape object for `key`.
    fn create_compatible_layout(
        &self,
        key: &RenderPassPipelineStateKey,
    ) -> Result<Self::CompatibleLayout, ResourceError>;

    /// Creates the framebuffer a render pass renders into.
    fn create_framebuffer(
        &self,
        layout: &Self::CompatibleLayout,
        attachments: &FramebufferAttachments<'_, Self>,
    ) -> Result<Self::Framebuffer, ResourceError>;

    /// Creates the binding layout and pipeline object described by `descriptor`.
    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_, Self>,
    ) -> Result<Self::Pipeline, PipelineError>;

    /// Creates the allocator of one binding pool, sized for `capacity` groups.
    fn create_descriptor_pool(&self, capacity: usize)
        -> Result<Self::DescriptorPool, ResourceError>;

    /// Allocates one binding group laid out for `pipeline`.
    fn allocate_binding_group(
        &self,
        pool: &mut Self::DescriptorPool,
        pipeline: &Self::Pipeline,
    ) -> Result<Self::BindingGroup, ResourceError>;

    /// Creates an empty command buffer.
    fn create_command_buffer(&self) -> Result<Self::CommandBuffer, ResourceError>;

    // --- Bind ---

    /// Resets `command_buffer` for reuse and opens it for recording.
    fn begin_command_buffer(&self, command_buffer: &mut Self::CommandBuffer);

    /// Closes `command_buffer` so it can be submitted.
    fn end_command_buffer(&self, command_buffer: &mut Self::CommandBuffer);

    /// Points the `stage` entry of `group` at `resources`.
    fn write_binding_group(
        &self,
        group: &mut Self::BindingGroup,
        stage: ShaderStage,
        resources: &StageResources<'_, Self>,
    );

    /// Binds the vertex buffer used by subsequent draws.
    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        buffer: &Self::Buffer,
        stride: u32,
        offset: u64,
    );

    /// Binds the index buffer used by subsequent draws.
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        buffer: &Self::Buffer,
        format: IndexFormat,
    );

    /// Binds the pipeline used by subsequent draws.
    fn cmd_bind_pipeline(&self, command_buffer: &mut Self::CommandBuffer, pipeline: &Self::Pipeline);

    /// Binds the `stages` entries of `group`, laid out for `pipeline`.
    fn cmd_bind_binding_group(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        pipeline: &Self::Pipeline,
        group: &Self::BindingGroup,
        stages: Range<usize>,
    );

    // --- Draw ---

    /// Transitions and clears the attachments, then opens a native render pass.
    fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut Self::CommandBuffer,
        info: &RenderPassBeginInfo<'_, Self>,
    );

    /// Closes the current native render pass.
    fn cmd_end_render_pass(&self, command_buffer: &mut Self::CommandBuffer);

    /// Sets the viewport.
    fn cmd_set_viewport(&self, command_buffer: &mut Self::CommandBuffer, viewport: &Viewport);

    /// Sets the scissor rectangle.
    fn cmd_set_scissor(&self, command_buffer: &mut Self::CommandBuffer, rect: &Rect2D);

    /// Records one indexed draw of `index_count` indices, one instance, zero base
    /// vertex and zero first index.
    fn cmd_draw_indexed(&self, command_buffer: &mut Self::CommandBuffer, index_count: u32);
}
