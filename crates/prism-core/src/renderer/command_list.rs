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

//! The command-list state machine.
//!
//! A [`CommandList`] owns one backend command buffer and one [`BindingPool`] per swap
//! slot. Setters only update pending state; `draw` compares it with what the command
//! buffer already has bound and records the minimal set of backend bind calls.

use crate::math::{Rect2D, Viewport};
use crate::renderer::api::binding::{StageResources, TextureSlot, MAX_TEXTURE_COUNT};
use crate::renderer::api::buffer::{ConstantBuffer, IndexBuffer, VertexBuffer};
use crate::renderer::api::enums::{IndexFormat, ShaderStage, TextureMinMagFilter, TextureWrapMode};
use crate::renderer::api::pipeline::PipelineState;
use crate::renderer::api::render_pass::RenderPass;
use crate::renderer::api::texture::Texture;
use crate::renderer::binding_pool::BindingPool;
use crate::renderer::error::{CommandError, ResourceError};
use crate::renderer::stats::CommandListStats;
use crate::renderer::tracked::{SameBinding, Tracked};
use crate::renderer::traits::Backend;
use std::any::Any;
use std::sync::Arc;

/// Recording state of a [`CommandList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Not recording. The last recorded buffer, if any, can be executed.
    Idle,
    /// Between `begin` and `end`, outside a render pass.
    Recording,
    /// Inside a render pass.
    InRenderPass,
}

struct VertexBinding<B: Backend> {
    buffer: Arc<VertexBuffer<B>>,
    stride: u32,
    offset: u64,
}

impl<B: Backend> Clone for VertexBinding<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: self.buffer.clone(),
            stride: self.stride,
            offset: self.offset,
        }
    }
}

impl<B: Backend> SameBinding for VertexBinding<B> {
    fn same_binding(&self, other: &Self) -> bool {
        self.buffer.same_binding(&other.buffer)
            && self.stride == other.stride
            && self.offset == other.offset
    }
}

struct BoundTexture<B: Backend> {
    texture: Arc<Texture<B>>,
    wrap: TextureWrapMode,
    filter: TextureMinMagFilter,
}

impl<B: Backend> Clone for BoundTexture<B> {
    fn clone(&self) -> Self {
        Self {
            texture: self.texture.clone(),
            wrap: self.wrap,
            filter: self.filter,
        }
    }
}

impl<B: Backend> SameBinding for BoundTexture<B> {
    fn same_binding(&self, other: &Self) -> bool {
        self.texture.same_binding(&other.texture)
            && self.wrap == other.wrap
            && self.filter == other.filter
    }
}

struct StageBinding<B: Backend> {
    constant_buffer: Option<Arc<ConstantBuffer<B>>>,
    textures: [Option<BoundTexture<B>>; MAX_TEXTURE_COUNT],
}

impl<B: Backend> StageBinding<B> {
    fn is_empty(&self) -> bool {
        self.constant_buffer.is_none() && self.textures.iter().all(Option::is_none)
    }

    fn resources(&self) -> StageResources<'_, B> {
        let mut resources = StageResources::empty();
        resources.constant_buffer = self
            .constant_buffer
            .as_ref()
            .map(|cb| (cb.raw(), cb.size()));
        for (slot, bound) in resources.textures.iter_mut().zip(&self.textures) {
            *slot = bound.as_ref().map(|t| TextureSlot {
                texture: t.texture.raw(),
                wrap: t.wrap,
                filter: t.filter,
            });
        }
        resources
    }
}

impl<B: Backend> Default for StageBinding<B> {
    fn default() -> Self {
        Self {
            constant_buffer: None,
            textures: Default::default(),
        }
    }
}

impl<B: Backend> Clone for StageBinding<B> {
    fn clone(&self) -> Self {
        Self {
            constant_buffer: self.constant_buffer.clone(),
            textures: self.textures.clone(),
        }
    }
}

impl<B: Backend> SameBinding for StageBinding<B> {
    fn same_binding(&self, other: &Self) -> bool {
        self.constant_buffer.same_binding(&other.constant_buffer)
            && self
                .textures
                .iter()
                .zip(&other.textures)
                .all(|(a, b)| a.same_binding(b))
    }
}

/// Bindings of every stage, tracked as one category.
struct StageBindings<B: Backend>([StageBinding<B>; ShaderStage::COUNT]);

impl<B: Backend> Default for StageBindings<B> {
    fn default() -> Self {
        Self([StageBinding::default(), StageBinding::default()])
    }
}

impl<B: Backend> Clone for StageBindings<B> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<B: Backend> SameBinding for StageBindings<B> {
    fn same_binding(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(&other.0)
            .all(|(a, b)| a.same_binding(b))
    }
}

type Retained = Arc<dyn Any + Send + Sync>;

/// Records draw calls into one backend command buffer per swap slot.
///
/// Everything bound is kept alive through `Arc` clones until the slot is recorded
/// again, by which time its previous submission has finished executing.
pub struct CommandList<B: Backend> {
    backend: Arc<B>,
    command_buffers: Vec<B::CommandBuffer>,
    binding_pools: Vec<BindingPool<B>>,
    retained: Vec<Vec<Retained>>,
    slot: usize,
    state: RecordingState,
    finished: bool,
    vertex_buffer: Tracked<VertexBinding<B>>,
    index_buffer: Tracked<Arc<IndexBuffer<B>>>,
    pipeline: Tracked<Arc<PipelineState<B>>>,
    bindings: Tracked<StageBindings<B>>,
    stats: CommandListStats,
}

impl<B: Backend> CommandList<B> {
    pub(crate) fn new(backend: Arc<B>, max_binding_groups: usize) -> Result<Self, ResourceError> {
        let swap_count = backend.swap_count();
        let mut command_buffers = Vec::with_capacity(swap_count);
        let mut binding_pools = Vec::with_capacity(swap_count);
        for _ in 0..swap_count {
            command_buffers.push(backend.create_command_buffer()?);
            binding_pools.push(BindingPool::new(&*backend, max_binding_groups)?);
        }
        log::debug!("[{}] created command list with {} slots", B::NAME, swap_count);

        Ok(Self {
            backend,
            command_buffers,
            binding_pools,
            retained: (0..swap_count).map(|_| Vec::new()).collect(),
            slot: 0,
            state: RecordingState::Idle,
            finished: false,
            vertex_buffer: Tracked::default(),
            index_buffer: Tracked::default(),
            pipeline: Tracked::default(),
            bindings: Tracked::default(),
            stats: CommandListStats::default(),
        })
    }

    /// Starts recording into the current swap slot's command buffer.
    pub fn begin(&mut self) -> Result<(), CommandError> {
        if self.state != RecordingState::Idle {
            return Err(CommandError::AlreadyRecording);
        }

        self.slot = self.backend.current_swap_index() % self.command_buffers.len();
        self.backend
            .begin_command_buffer(&mut self.command_buffers[self.slot]);
        self.binding_pools[self.slot].reset();
        self.retained[self.slot].clear();

        self.vertex_buffer.reset();
        self.index_buffer.reset();
        self.pipeline.reset();
        self.bindings.reset();
        self.stats = CommandListStats::default();

        self.state = RecordingState::Recording;
        self.finished = false;
        Ok(())
    }

    /// Finalizes the command buffer so it can be executed.
    pub fn end(&mut self) -> Result<(), CommandError> {
        match self.state {
            RecordingState::Idle => return Err(CommandError::NotRecording),
            RecordingState::InRenderPass => return Err(CommandError::RenderPassStillOpen),
            RecordingState::Recording => {}
        }
        self.backend
            .end_command_buffer(&mut self.command_buffers[self.slot]);
        self.state = RecordingState::Idle;
        self.finished = true;
        Ok(())
    }

    fn ensure_recording(&self) -> Result<(), CommandError> {
        match self.state {
            RecordingState::Idle => Err(CommandError::NotRecording),
            _ => Ok(()),
        }
    }

    fn ensure_in_render_pass(&self) -> Result<(), CommandError> {
        match self.state {
            RecordingState::Idle => Err(CommandError::NotRecording),
            RecordingState::Recording => Err(CommandError::NotInRenderPass),
            RecordingState::InRenderPass => Ok(()),
        }
    }

    /// Sets the vertex buffer, the size of one vertex and the byte offset of the first.
    pub fn set_vertex_buffer(
        &mut self,
        buffer: &Arc<VertexBuffer<B>>,
        stride: u32,
        offset: u64,
    ) -> Result<(), CommandError> {
        self.ensure_recording()?;
        self.vertex_buffer.set(VertexBinding {
            buffer: buffer.clone(),
            stride,
            offset,
        });
        Ok(())
    }

    /// Sets the index buffer. Its stride selects the index width at draw time.
    pub fn set_index_buffer(&mut self, buffer: &Arc<IndexBuffer<B>>) -> Result<(), CommandError> {
        self.ensure_recording()?;
        self.index_buffer.set(buffer.clone());
        Ok(())
    }

    /// Sets the pipeline used by subsequent draws.
    pub fn set_pipeline_state(
        &mut self,
        pipeline: &Arc<PipelineState<B>>,
    ) -> Result<(), CommandError> {
        self.ensure_recording()?;
        self.pipeline.set(pipeline.clone());
        Ok(())
    }

    /// Sets or clears the constant buffer of `stage`.
    pub fn set_constant_buffer(
        &mut self,
        stage: ShaderStage,
        buffer: Option<&Arc<ConstantBuffer<B>>>,
    ) -> Result<(), CommandError> {
        self.ensure_recording()?;
        self.bindings.pending_mut().0[stage.index()].constant_buffer = buffer.cloned();
        Ok(())
    }

    /// Binds `texture` to texture `unit` of `stage`.
    pub fn set_texture(
        &mut self,
        stage: ShaderStage,
        unit: usize,
        texture: &Arc<Texture<B>>,
        wrap: TextureWrapMode,
        filter: TextureMinMagFilter,
    ) -> Result<(), CommandError> {
        self.ensure_recording()?;
        let slot = texture_unit(&mut self.bindings, stage, unit)?;
        *slot = Some(BoundTexture {
            texture: texture.clone(),
            wrap,
            filter,
        });
        Ok(())
    }

    /// Clears texture `unit` of `stage`.
    pub fn unset_texture(&mut self, stage: ShaderStage, unit: usize) -> Result<(), CommandError> {
        self.ensure_recording()?;
        *texture_unit(&mut self.bindings, stage, unit)? = None;
        Ok(())
    }

    /// Opens `pass`: transitions and clears its attachments, then sets viewport and
    /// scissor to its full extent.
    pub fn begin_render_pass(&mut self, pass: &Arc<RenderPass<B>>) -> Result<(), CommandError> {
        match self.state {
            RecordingState::Idle => return Err(CommandError::NotRecording),
            RecordingState::InRenderPass => return Err(CommandError::NestedRenderPass),
            RecordingState::Recording => {}
        }

        let cmd = &mut self.command_buffers[self.slot];
        let extent = pass.extent();
        self.backend.cmd_begin_render_pass(cmd, &pass.begin_info());
        self.backend
            .cmd_set_viewport(cmd, &Viewport::from_extent(extent));
        self.backend.cmd_set_scissor(cmd, &Rect2D::from_extent(extent));

        if B::RESETS_BINDINGS_PER_PASS {
            self.vertex_buffer.invalidate();
            self.index_buffer.invalidate();
            self.pipeline.invalidate();
            self.bindings.invalidate();
        }

        self.retained[self.slot].push(pass.clone());
        self.stats.render_passes += 1;
        self.state = RecordingState::InRenderPass;
        Ok(())
    }

    /// Closes the render pass opened by [`begin_render_pass`](Self::begin_render_pass).
    pub fn end_render_pass(&mut self) -> Result<(), CommandError> {
        self.ensure_in_render_pass()?;
        self.backend
            .cmd_end_render_pass(&mut self.command_buffers[self.slot]);
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Overrides the scissor rectangle of the current render pass.
    pub fn set_scissor(&mut self, x: i32, y: i32, width: u32, height: u32) -> Result<(), CommandError> {
        self.ensure_in_render_pass()?;
        let rect = Rect2D {
            x,
            y,
            width,
            height,
        };
        self.backend
            .cmd_set_scissor(&mut self.command_buffers[self.slot], &rect);
        Ok(())
    }

    /// Draws `primitive_count` primitives with the current bindings.
    ///
    /// Only categories whose value changed since the previous draw are rebound.
    /// Nothing is recorded when validation fails.
    pub fn draw(&mut self, primitive_count: u32) -> Result<(), CommandError> {
        self.ensure_in_render_pass()?;

        let vertex = self
            .vertex_buffer
            .pending()
            .cloned()
            .ok_or(CommandError::MissingVertexBuffer)?;
        let index = self
            .index_buffer
            .pending()
            .cloned()
            .ok_or(CommandError::MissingIndexBuffer)?;
        let pipeline = self
            .pipeline
            .pending()
            .cloned()
            .ok_or(CommandError::MissingPipeline)?;
        let raw_pipeline = pipeline.raw().ok_or(CommandError::PipelineNotCompiled)?;
        let index_format = IndexFormat::from_stride(index.stride()).ok_or(
            CommandError::UnsupportedIndexStride {
                stride: index.stride(),
            },
        )?;
        let index_count = primitive_count
            .checked_mul(pipeline.topology().indices_per_primitive())
            .ok_or(CommandError::IndexCountOverflow { primitive_count })?;

        let stage_bindings = if self.bindings.is_dirty() {
            self.bindings.pending().cloned()
        } else {
            None
        };
        let active: Vec<ShaderStage> = stage_bindings
            .as_ref()
            .map(|b| {
                ShaderStage::ALL
                    .into_iter()
                    .filter(|stage| !b.0[stage.index()].is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let backend = &*self.backend;
        let cmd = &mut self.command_buffers[self.slot];
        let retained = &mut self.retained[self.slot];

        // Take the group before recording anything, so exhaustion leaves the buffer untouched.
        let group = match (&stage_bindings, active.is_empty()) {
            (Some(_), false) => {
                let group = self.binding_pools[self.slot].get(backend, raw_pipeline)?;
                self.stats.binding_groups_acquired += 1;
                Some(group)
            }
            _ => None,
        };

        if self.vertex_buffer.is_dirty() {
            backend.cmd_bind_vertex_buffer(cmd, vertex.buffer.raw(), vertex.stride, vertex.offset);
            retained.push(vertex.buffer.clone());
            self.stats.vertex_buffer_binds += 1;
        }
        if self.index_buffer.is_dirty() {
            backend.cmd_bind_index_buffer(cmd, index.raw(), index_format);
            retained.push(index.clone());
            self.stats.index_buffer_binds += 1;
        }
        if self.pipeline.is_dirty() {
            backend.cmd_bind_pipeline(cmd, raw_pipeline);
            retained.push(pipeline.clone());
            self.stats.pipeline_binds += 1;
        }

        if let (Some(group), Some(bindings)) = (group, &stage_bindings) {
            for stage in &active {
                let binding = &bindings.0[stage.index()];
                backend.write_binding_group(group, *stage, &binding.resources());
                if let Some(cb) = &binding.constant_buffer {
                    retained.push(cb.clone());
                }
                for texture in binding.textures.iter().flatten() {
                    retained.push(texture.texture.clone());
                }
            }
            let first = active.first().map_or(0, |s| s.index());
            let last = active.last().map_or(0, |s| s.index());
            backend.cmd_bind_binding_group(cmd, raw_pipeline, group, first..last + 1);
            self.stats.binding_group_binds += 1;
        }

        backend.cmd_draw_indexed(cmd, index_count);
        self.stats.draw_calls += 1;
        self.stats.indices += u64::from(index_count);

        self.vertex_buffer.mark_bound();
        self.index_buffer.mark_bound();
        self.pipeline.mark_bound();
        self.bindings.mark_bound();
        Ok(())
    }

    /// Current recording state.
    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// `true` once a session has ended and until the next `begin`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Statistics of the current (or last) recording session.
    pub fn stats(&self) -> &CommandListStats {
        &self.stats
    }

    /// Swap slot recorded by the current (or last) session.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The command buffer of the current (or last) session.
    pub fn command_buffer(&self) -> &B::CommandBuffer {
        &self.command_buffers[self.slot]
    }

    /// The binding pool of swap slot `slot`.
    pub fn binding_pool(&self, slot: usize) -> Option<&BindingPool<B>> {
        self.binding_pools.get(slot)
    }
}

fn texture_unit<B: Backend>(
    bindings: &mut Tracked<StageBindings<B>>,
    stage: ShaderStage,
    unit: usize,
) -> Result<&mut Option<BoundTexture<B>>, CommandError> {
    bindings.pending_mut().0[stage.index()]
        .textures
        .get_mut(unit)
        .ok_or(CommandError::TextureUnitOutOfRange {
            unit,
            max: MAX_TEXTURE_COUNT,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Color8;
    use crate::renderer::api::enums::{ConstantBufferType, Format, PrimitiveTopology};
    use crate::renderer::api::texture::{TextureDescriptor, TextureUsage};
    use crate::renderer::mock::{self, MockCommand, MockBackend, EncoderMockBackend};
    use crate::math::Extent2D;
    use std::ops::Range;

    fn is_bind(c: &MockCommand) -> bool {
        matches!(
            c,
            MockCommand::BindVertexBuffer { .. }
                | MockCommand::BindIndexBuffer { .. }
                | MockCommand::BindPipeline(_)
                | MockCommand::BindBindingGroup { .. }
        )
    }

    #[test]
    fn repeated_draw_with_same_bindings_rebinds_nothing() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(1024).unwrap();
        let ib = device.create_index_buffer(4, 6).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();
        list.draw(2).unwrap();
        let binds_after_first = list.command_buffer().count(is_bind);
        list.draw(2).unwrap();
        list.end_render_pass().unwrap();
        list.end().unwrap();

        let cmd = list.command_buffer();
        assert_eq!(binds_after_first, 3);
        assert_eq!(cmd.count(is_bind), 3, "second draw must not rebind");
        assert_eq!(cmd.draws(), vec![6, 6]);
        assert_eq!(
            cmd.commands
                .iter()
                .find(|c| matches!(c, MockCommand::BindIndexBuffer { .. })),
            Some(&MockCommand::BindIndexBuffer {
                buffer: ib.raw().id,
                format: IndexFormat::Uint32
            })
        );
        let stats = list.stats();
        assert_eq!(stats.vertex_buffer_binds, 1);
        assert_eq!(stats.index_buffer_binds, 1);
        assert_eq!(stats.pipeline_binds, 1);
        assert_eq!(stats.draw_calls, 2);
        assert_eq!(stats.indices, 12);
    }

    #[test]
    fn only_changed_categories_are_rebound() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb1 = device.create_vertex_buffer(256).unwrap();
        let vb2 = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 3).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.set_vertex_buffer(&vb1, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();
        list.draw(1).unwrap();

        list.set_vertex_buffer(&vb2, 20, 0).unwrap();
        list.draw(1).unwrap();
        assert_eq!(list.stats().total_binds(), 4);

        // Set then restore counts as unchanged.
        list.set_vertex_buffer(&vb1, 20, 0).unwrap();
        list.set_vertex_buffer(&vb2, 20, 0).unwrap();
        list.draw(1).unwrap();
        assert_eq!(list.stats().total_binds(), 4);

        // Same buffer at a new offset is a new binding.
        list.set_vertex_buffer(&vb2, 20, 64).unwrap();
        list.draw(1).unwrap();
        assert_eq!(list.stats().vertex_buffer_binds, 3);
        assert_eq!(list.stats().index_buffer_binds, 1);
        assert_eq!(list.stats().pipeline_binds, 1);
    }

    #[test]
    fn index_count_follows_topology() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let lines = mock::pipeline(&device, &pass, PrimitiveTopology::Line);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 64).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&lines).unwrap();
        list.draw(5).unwrap();
        assert_eq!(list.command_buffer().draws(), vec![10]);
    }

    #[test]
    fn unsupported_index_stride_records_nothing() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(3, 6).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        let recorded = list.command_buffer().commands.len();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();

        assert_eq!(
            list.draw(1).unwrap_err(),
            CommandError::UnsupportedIndexStride { stride: 3 }
        );
        assert_eq!(list.command_buffer().commands.len(), recorded);
    }

    #[test]
    fn overflowing_index_count_records_nothing() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(4, 6).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        let recorded = list.command_buffer().commands.len();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();

        assert_eq!(
            list.draw(u32::MAX / 2).unwrap_err(),
            CommandError::IndexCountOverflow {
                primitive_count: u32::MAX / 2
            }
        );
        assert_eq!(list.command_buffer().commands.len(), recorded);
        assert_eq!(list.stats().draw_calls, 0);

        // The categories stay dirty, so the next valid draw still binds them.
        list.draw(2).unwrap();
        assert_eq!(list.command_buffer().draws(), vec![6]);
        assert_eq!(list.stats().pipeline_binds, 1);
    }

    #[test]
    fn missing_bindings_are_reported_in_order() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 6).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        assert_eq!(list.draw(1).unwrap_err(), CommandError::MissingVertexBuffer);
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        assert_eq!(list.draw(1).unwrap_err(), CommandError::MissingIndexBuffer);
        list.set_index_buffer(&ib).unwrap();
        assert_eq!(list.draw(1).unwrap_err(), CommandError::MissingPipeline);

        let uncompiled = Arc::new(device.create_pipeline_state());
        list.set_pipeline_state(&uncompiled).unwrap();
        assert_eq!(list.draw(1).unwrap_err(), CommandError::PipelineNotCompiled);
    }

    #[test]
    fn state_machine_rejects_out_of_order_calls() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let vb = device.create_vertex_buffer(256).unwrap();

        let mut list = device.create_command_list().unwrap();
        assert_eq!(list.end().unwrap_err(), CommandError::NotRecording);
        assert_eq!(
            list.set_vertex_buffer(&vb, 20, 0).unwrap_err(),
            CommandError::NotRecording
        );
        assert_eq!(list.begin_render_pass(&pass).unwrap_err(), CommandError::NotRecording);

        list.begin().unwrap();
        assert_eq!(list.begin().unwrap_err(), CommandError::AlreadyRecording);
        assert_eq!(list.draw(1).unwrap_err(), CommandError::NotInRenderPass);
        assert_eq!(list.end_render_pass().unwrap_err(), CommandError::NotInRenderPass);
        assert_eq!(list.set_scissor(0, 0, 8, 8).unwrap_err(), CommandError::NotInRenderPass);

        list.begin_render_pass(&pass).unwrap();
        assert_eq!(list.begin_render_pass(&pass).unwrap_err(), CommandError::NestedRenderPass);
        assert_eq!(list.end().unwrap_err(), CommandError::RenderPassStillOpen);
        list.set_scissor(4, 4, 16, 16).unwrap();
        list.end_render_pass().unwrap();
        list.end().unwrap();
        assert_eq!(list.state(), RecordingState::Idle);
    }

    #[test]
    fn render_pass_sets_full_viewport_and_scissor() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();

        let commands = &list.command_buffer().commands;
        assert!(matches!(
            commands[0],
            MockCommand::BeginRenderPass {
                clear_color: Some(Color8::BLACK),
                clear_depth: Some(_),
                ..
            }
        ));
        assert_eq!(
            commands[1],
            MockCommand::SetViewport(Viewport::from_extent(Extent2D::new(1280, 720)))
        );
        assert_eq!(
            commands[2],
            MockCommand::SetScissor(Rect2D::from_extent(Extent2D::new(1280, 720)))
        );
    }

    #[test]
    fn binding_groups_cover_active_stage_range() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 6).unwrap();
        let cb = device
            .create_constant_buffer(64, ConstantBufferType::ShortTime)
            .unwrap();
        let texture = device
            .create_texture(TextureDescriptor {
                extent: Extent2D::new(4, 4),
                format: Format::R8G8B8A8Unorm,
                usage: TextureUsage::SAMPLED,
            })
            .unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();

        // Nothing bound to any stage: no group is taken.
        list.draw(1).unwrap();
        assert_eq!(list.stats().binding_groups_acquired, 0);

        list.set_texture(
            ShaderStage::Pixel,
            3,
            &texture,
            TextureWrapMode::Repeat,
            TextureMinMagFilter::Nearest,
        )
        .unwrap();
        list.draw(1).unwrap();
        list.draw(1).unwrap();
        assert_eq!(list.stats().binding_groups_acquired, 1);

        list.set_constant_buffer(ShaderStage::Vertex, Some(&cb)).unwrap();
        list.draw(1).unwrap();
        assert_eq!(list.stats().binding_groups_acquired, 2);

        let ranges: Vec<Range<usize>> = list
            .command_buffer()
            .commands
            .iter()
            .filter_map(|c| match c {
                MockCommand::BindBindingGroup { stages, .. } => Some(stages.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ranges, vec![1..2, 0..2]);
        assert_eq!(
            list.set_texture(
                ShaderStage::Pixel,
                MAX_TEXTURE_COUNT,
                &texture,
                TextureWrapMode::Clamp,
                TextureMinMagFilter::Linear
            )
            .unwrap_err(),
            CommandError::TextureUnitOutOfRange { unit: 8, max: 8 }
        );
    }

    #[test]
    fn binding_pool_is_reused_across_frames() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 6).unwrap();
        let cbs: Vec<_> = (0..4)
            .map(|_| {
                device
                    .create_constant_buffer(64, ConstantBufferType::LongTime)
                    .unwrap()
            })
            .collect();

        let mut list = device.create_command_list().unwrap();
        let record = |list: &mut CommandList<MockBackend>, draws: usize| {
            list.begin().unwrap();
            list.begin_render_pass(&pass).unwrap();
            list.set_vertex_buffer(&vb, 20, 0).unwrap();
            list.set_index_buffer(&ib).unwrap();
            list.set_pipeline_state(&pipeline).unwrap();
            for cb in cbs.iter().take(draws) {
                list.set_constant_buffer(ShaderStage::Vertex, Some(cb)).unwrap();
                list.draw(1).unwrap();
            }
            list.end_render_pass().unwrap();
            list.end().unwrap();
        };

        // Slot 0 twice, with a frame on slot 1 in between.
        record(&mut list, 3);
        assert_eq!(device.backend().binding_groups_allocated(), 3);
        device.new_frame().unwrap();
        record(&mut list, 2);
        assert_eq!(device.backend().binding_groups_allocated(), 5);
        device.new_frame().unwrap();
        record(&mut list, 4);
        assert_eq!(device.backend().binding_groups_allocated(), 6);
        assert_eq!(list.binding_pool(0).unwrap().len(), 4);
        assert_eq!(list.binding_pool(1).unwrap().len(), 2);
    }

    #[test]
    fn binding_pool_ceiling_fails_draw() {
        let device = crate::renderer::Device::new(
            MockBackend::new(1),
            crate::renderer::DeviceSettings {
                max_binding_groups_per_slot: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 6).unwrap();
        let cb1 = device.create_constant_buffer(64, ConstantBufferType::LongTime).unwrap();
        let cb2 = device.create_constant_buffer(64, ConstantBufferType::LongTime).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();
        list.set_constant_buffer(ShaderStage::Pixel, Some(&cb1)).unwrap();
        list.draw(1).unwrap();
        list.set_constant_buffer(ShaderStage::Pixel, Some(&cb2)).unwrap();
        assert_eq!(
            list.draw(1).unwrap_err(),
            CommandError::BindingPoolExhausted { capacity: 1 }
        );
        assert_eq!(list.command_buffer().draws().len(), 1);
    }

    #[test]
    fn encoder_backends_rebind_after_each_pass() {
        let device = mock::device::<true>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 6).unwrap();

        let mut list: CommandList<EncoderMockBackend> = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();
        for _ in 0..2 {
            list.begin_render_pass(&pass).unwrap();
            list.draw(1).unwrap();
            list.draw(1).unwrap();
            list.end_render_pass().unwrap();
        }
        assert_eq!(list.stats().total_binds(), 6);
        assert_eq!(list.stats().render_passes, 2);
    }

    #[test]
    fn begin_clears_previous_bindings() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let vb = device.create_vertex_buffer(256).unwrap();
        let ib = device.create_index_buffer(2, 6).unwrap();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.set_vertex_buffer(&vb, 20, 0).unwrap();
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();
        list.draw(1).unwrap();
        list.end_render_pass().unwrap();
        list.end().unwrap();

        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        assert_eq!(list.draw(1).unwrap_err(), CommandError::MissingVertexBuffer);
        assert_eq!(list.stats().draw_calls, 0);
    }

    #[test]
    fn bound_resources_outlive_caller_handles() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        let ib = device.create_index_buffer(2, 6).unwrap();
        let live_before = device.backend().live_objects();

        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        {
            let vb = device.create_vertex_buffer(256).unwrap();
            list.set_vertex_buffer(&vb, 20, 0).unwrap();
        }
        list.set_index_buffer(&ib).unwrap();
        list.set_pipeline_state(&pipeline).unwrap();
        list.draw(1).unwrap();
        list.end_render_pass().unwrap();
        list.end().unwrap();
        assert!(device.backend().live_objects() > live_before);

        drop(list);
        assert_eq!(device.backend().live_objects(), live_before);
    }
}
