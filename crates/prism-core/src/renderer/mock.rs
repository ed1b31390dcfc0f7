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

//! A call-recording backend used by the unit tests of this crate.

use crate::math::{Color8, Extent2D, Rect2D, Viewport};
use crate::renderer::api::binding::StageResources;
use crate::renderer::api::buffer::BufferDescriptor;
use crate::renderer::api::enums::{Format, IndexFormat, ShaderStage};
use crate::renderer::api::pipeline::PipelineDescriptor;
use crate::renderer::api::render_pass::{
    FramebufferAttachments, RenderPassBeginInfo, RenderPassPipelineStateKey, ScreenTarget,
};
use crate::renderer::api::texture::{TextureDescriptor, TextureUsage};
use crate::renderer::error::{PipelineError, RenderError, ResourceError, ShaderError};
use crate::renderer::api::pipeline::PipelineState;
use crate::renderer::api::render_pass::RenderPass;
use crate::renderer::api::enums::PrimitiveTopology;
use crate::renderer::device::Device;
use crate::renderer::settings::DeviceSettings;
use crate::renderer::traits::Backend;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A backend that keeps its bindings across render passes.
pub(crate) type MockBackend = Mock<false>;
/// A backend whose render passes start with nothing bound.
pub(crate) type EncoderMockBackend = Mock<true>;

#[derive(Debug)]
pub(crate) struct MockHandle {
    pub(crate) id: u64,
    live: Arc<AtomicIsize>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct MockPipeline {
    pub(crate) handle: MockHandle,
    _layout: MockHandle,
}

#[derive(Debug)]
pub(crate) struct MockGroup {
    pub(crate) handle: MockHandle,
    pub(crate) writes: Vec<(ShaderStage, bool, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MockCommand {
    BindVertexBuffer { buffer: u64, stride: u32, offset: u64 },
    BindIndexBuffer { buffer: u64, format: IndexFormat },
    BindPipeline(u64),
    BindBindingGroup { group: u64, stages: Range<usize> },
    BeginRenderPass { framebuffer: u64, clear_color: Option<Color8>, clear_depth: Option<f32> },
    EndRenderPass,
    SetViewport(Viewport),
    SetScissor(Rect2D),
    DrawIndexed(u32),
}

pub(crate) struct MockCommandBuffer {
    _handle: MockHandle,
    pub(crate) commands: Vec<MockCommand>,
    pub(crate) open: bool,
}

impl MockCommandBuffer {
    pub(crate) fn draws(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                MockCommand::DrawIndexed(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&MockCommand) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }
}

pub(crate) struct Mock<const RESETS: bool> {
    swap_count: usize,
    current: AtomicUsize,
    next_id: AtomicU64,
    live: Arc<AtomicIsize>,
    layouts_created: AtomicUsize,
    framebuffers_created: AtomicUsize,
    groups_allocated: AtomicUsize,
    memory: Mutex<HashMap<u64, Vec<u8>>>,
    submitted: Mutex<Vec<Vec<MockCommand>>>,
    screen: Mutex<ScreenTarget>,
    pub(crate) fail_pipeline: AtomicBool,
}

impl<const RESETS: bool> Mock<RESETS> {
    pub(crate) fn new(swap_count: usize) -> Self {
        Self {
            swap_count,
            current: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            live: Arc::new(AtomicIsize::new(0)),
            layouts_created: AtomicUsize::new(0),
            framebuffers_created: AtomicUsize::new(0),
            groups_allocated: AtomicUsize::new(0),
            memory: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            screen: Mutex::new(ScreenTarget {
                extent: Extent2D::new(1280, 720),
                format: Format::B8G8R8A8Unorm,
                has_depth: true,
            }),
            fail_pipeline: AtomicBool::new(false),
        }
    }

    fn handle(&self) -> MockHandle {
        self.live.fetch_add(1, Ordering::SeqCst);
        MockHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            live: self.live.clone(),
        }
    }

    pub(crate) fn dummy_pipeline(&self) -> MockPipeline {
        MockPipeline {
            handle: self.handle(),
            _layout: self.handle(),
        }
    }

    pub(crate) fn live_objects(&self) -> isize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn layouts_created(&self) -> usize {
        self.layouts_created.load(Ordering::SeqCst)
    }

    pub(crate) fn framebuffers_created(&self) -> usize {
        self.framebuffers_created.load(Ordering::SeqCst)
    }

    pub(crate) fn binding_groups_allocated(&self) -> usize {
        self.groups_allocated.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<Vec<MockCommand>> {
        self.submitted.lock().unwrap().clone()
    }

    pub(crate) fn set_screen(&self, screen: ScreenTarget) {
        *self.screen.lock().unwrap() = screen;
    }

    pub(crate) fn memory_of(&self, id: u64) -> Vec<u8> {
        self.memory.lock().unwrap().get(&id).cloned().unwrap_or_default()
    }
}

impl<const RESETS: bool> Backend for Mock<RESETS> {
    type Buffer = MockHandle;
    type Texture = MockHandle;
    type Shader = MockHandle;
    type Pipeline = MockPipeline;
    type CompatibleLayout = MockHandle;
    type Framebuffer = MockHandle;
    type DescriptorPool = MockHandle;
    type BindingGroup = MockGroup;
    type CommandBuffer = MockCommandBuffer;

    const NAME: &'static str = "mock";
    const RESETS_BINDINGS_PER_PASS: bool = RESETS;

    fn swap_count(&self) -> usize {
        self.swap_count
    }

    fn current_swap_index(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn new_frame(&self) -> Result<(), RenderError> {
        let next = (self.current.load(Ordering::SeqCst) + 1) % self.swap_count;
        self.current.store(next, Ordering::SeqCst);
        Ok(())
    }

    fn submit(&self, command_buffer: &MockCommandBuffer) -> Result<(), RenderError> {
        if command_buffer.open {
            return Err(RenderError::SubmissionFailed("buffer still open".to_owned()));
        }
        self.submitted
            .lock()
            .unwrap()
            .push(command_buffer.commands.clone());
        Ok(())
    }

    fn wait_idle(&self) {}

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<MockHandle, ResourceError> {
        let handle = self.handle();
        self.memory
            .lock()
            .unwrap()
            .insert(handle.id, vec![0; descriptor.size as usize]);
        Ok(handle)
    }

    fn write_buffer(&self, buffer: &MockHandle, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut memory = self.memory.lock().unwrap();
        let bytes = memory.get_mut(&buffer.id).ok_or(ResourceError::NotFound)?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &MockHandle, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let memory = self.memory.lock().unwrap();
        let bytes = memory.get(&buffer.id).ok_or(ResourceError::NotFound)?;
        let start = offset as usize;
        out.copy_from_slice(&bytes[start..start + out.len()]);
        Ok(())
    }

    fn create_texture(&self, _descriptor: &TextureDescriptor) -> Result<MockHandle, ResourceError> {
        Ok(self.handle())
    }

    fn import_texture(&self, external_id: u64) -> Result<(MockHandle, TextureDescriptor), ResourceError> {
        if external_id == 0 {
            return Err(ResourceError::NotFound);
        }
        let descriptor = TextureDescriptor {
            extent: Extent2D::new(64, 64),
            format: Format::R8G8B8A8Unorm,
            usage: TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET,
        };
        Ok((self.handle(), descriptor))
    }

    fn write_texture(&self, _texture: &MockHandle, _data: &[u8]) -> Result<(), ResourceError> {
        Ok(())
    }

    fn create_shader(&self, _bytecode: &[u8]) -> Result<MockHandle, ShaderError> {
        Ok(self.handle())
    }

    fn screen_target(&self) -> ScreenTarget {
        *self.screen.lock().unwrap()
    }

    fn create_compatible_layout(&self, _key: &RenderPassPipelineStateKey) -> Result<MockHandle, ResourceError> {
        self.layouts_created.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle())
    }

    fn create_framebuffer(
        &self,
        _layout: &MockHandle,
        _attachments: &FramebufferAttachments<'_, Self>,
    ) -> Result<MockHandle, ResourceError> {
        self.framebuffers_created.fetch_add(1, Ordering::SeqCst);
        Ok(self.handle())
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor<'_, Self>) -> Result<MockPipeline, PipelineError> {
        let layout = self.handle();
        if self.fail_pipeline.load(Ordering::SeqCst) {
            return Err(PipelineError::CompilationFailed {
                label: descriptor.label.map(str::to_owned),
                details: "injected failure".to_owned(),
            });
        }
        Ok(MockPipeline {
            handle: self.handle(),
            _layout: layout,
        })
    }

    fn create_descriptor_pool(&self, _capacity: usize) -> Result<MockHandle, ResourceError> {
        Ok(self.handle())
    }

    fn allocate_binding_group(&self, _pool: &mut MockHandle, _pipeline: &MockPipeline) -> Result<MockGroup, ResourceError> {
        self.groups_allocated.fetch_add(1, Ordering::SeqCst);
        Ok(MockGroup {
            handle: self.handle(),
            writes: Vec::new(),
        })
    }

    fn create_command_buffer(&self) -> Result<MockCommandBuffer, ResourceError> {
        Ok(MockCommandBuffer {
            _handle: self.handle(),
            commands: Vec::new(),
            open: false,
        })
    }

    fn begin_command_buffer(&self, command_buffer: &mut MockCommandBuffer) {
        command_buffer.commands.clear();
        command_buffer.open = true;
    }

    fn end_command_buffer(&self, command_buffer: &mut MockCommandBuffer) {
        command_buffer.open = false;
    }

    fn write_binding_group(&self, group: &mut MockGroup, stage: ShaderStage, resources: &StageResources<'_, Self>) {
        group.writes.push((
            stage,
            resources.constant_buffer.is_some(),
            resources.bound_textures().count(),
        ));
    }

    fn cmd_bind_vertex_buffer(&self, cmd: &mut MockCommandBuffer, buffer: &MockHandle, stride: u32, offset: u64) {
        cmd.commands.push(MockCommand::BindVertexBuffer {
            buffer: buffer.id,
            stride,
            offset,
        });
    }

    fn cmd_bind_index_buffer(&self, cmd: &mut MockCommandBuffer, buffer: &MockHandle, format: IndexFormat) {
        cmd.commands.push(MockCommand::BindIndexBuffer {
            buffer: buffer.id,
            format,
        });
    }

    fn cmd_bind_pipeline(&self, cmd: &mut MockCommandBuffer, pipeline: &MockPipeline) {
        cmd.commands.push(MockCommand::BindPipeline(pipeline.handle.id));
    }

    fn cmd_bind_binding_group(&self, cmd: &mut MockCommandBuffer, _pipeline: &MockPipeline, group: &MockGroup, stages: Range<usize>) {
        cmd.commands.push(MockCommand::BindBindingGroup {
            group: group.handle.id,
            stages,
        });
    }

    fn cmd_begin_render_pass(&self, cmd: &mut MockCommandBuffer, info: &RenderPassBeginInfo<'_, Self>) {
        cmd.commands.push(MockCommand::BeginRenderPass {
            framebuffer: info.framebuffer.id,
            clear_color: info.clear_color,
            clear_depth: info.clear_depth,
        });
    }

    fn cmd_end_render_pass(&self, cmd: &mut MockCommandBuffer) {
        cmd.commands.push(MockCommand::EndRenderPass);
    }

    fn cmd_set_viewport(&self, cmd: &mut MockCommandBuffer, viewport: &Viewport) {
        cmd.commands.push(MockCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, cmd: &mut MockCommandBuffer, rect: &Rect2D) {
        cmd.commands.push(MockCommand::SetScissor(*rect));
    }

    fn cmd_draw_indexed(&self, cmd: &mut MockCommandBuffer, index_count: u32) {
        cmd.commands.push(MockCommand::DrawIndexed(index_count));
    }
}

pub(crate) fn device<const RESETS: bool>() -> Device<Mock<RESETS>> {
    let _ = env_logger::builder().is_test(true).try_init();
    Device::new(Mock::new(2), DeviceSettings::default()).unwrap()
}

pub(crate) fn screen_pass<const RESETS: bool>(device: &Device<Mock<RESETS>>) -> Arc<RenderPass<Mock<RESETS>>> {
    Arc::new(device.current_screen(Color8::BLACK, true, true).unwrap())
}

pub(crate) fn pipeline<const RESETS: bool>(
    device: &Device<Mock<RESETS>>,
    pass: &RenderPass<Mock<RESETS>>,
    topology: PrimitiveTopology,
) -> Arc<PipelineState<Mock<RESETS>>> {
    let mut pipeline = device.create_pipeline_state();
    pipeline.set_shader(ShaderStage::Vertex, device.create_shader(b"vs").unwrap()).unwrap();
    pipeline.set_shader(ShaderStage::Pixel, device.create_shader(b"ps").unwrap()).unwrap();
    pipeline.push_vertex_element("POSITION", Format::R32G32B32Float).unwrap();
    pipeline.push_vertex_element("UV", Format::R32G32Float).unwrap();
    pipeline.set_topology(topology).unwrap();
    pipeline
        .set_render_pass_pipeline_state(pass.render_pass_pipeline_state().clone())
        .unwrap();
    pipeline.compile().unwrap();
    Arc::new(pipeline)
}
