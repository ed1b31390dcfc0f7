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

//! The device: owner of the backend and factory of everything else.

use crate::math::{Color8, Extent2D};
use crate::renderer::api::buffer::{ConstantBuffer, IndexBuffer, VertexBuffer};
use crate::renderer::api::enums::ConstantBufferType;
use crate::renderer::api::pipeline::PipelineState;
use crate::renderer::api::render_pass::{
    FramebufferAttachments, RenderPass, RenderPassPipelineState, RenderPassPipelineStateCache,
    RenderPassPipelineStateKey,
};
use crate::renderer::api::shader::Shader;
use crate::renderer::api::texture::{Texture, TextureDescriptor};
use crate::renderer::command_list::{CommandList, RecordingState};
use crate::renderer::error::{CommandError, RenderError, ResourceError, ShaderError};
use crate::renderer::settings::DeviceSettings;
use crate::renderer::traits::Backend;
use std::sync::{Arc, Mutex, MutexGuard};

struct ScreenFramebuffer<B: Backend> {
    key: RenderPassPipelineStateKey,
    extent: Extent2D,
    framebuffer: Arc<B::Framebuffer>,
}

/// A rendering device bound to one backend for its whole life.
///
/// `Device` is `Send + Sync`: its caches sit behind mutexes, and everything it
/// creates is handed out through `Arc`.
pub struct Device<B: Backend> {
    backend: Arc<B>,
    settings: DeviceSettings,
    layout_cache: Mutex<RenderPassPipelineStateCache<B>>,
    screen_framebuffers: Mutex<Vec<Option<ScreenFramebuffer<B>>>>,
}

impl<B: Backend> Device<B> {
    /// Wraps `backend` into a device.
    pub fn new(backend: B, settings: DeviceSettings) -> Result<Self, RenderError> {
        let swap_count = backend.swap_count();
        if swap_count == 0 {
            return Err(RenderError::InitializationFailed(
                "backend reports zero swap slots".to_owned(),
            ));
        }
        if settings.max_binding_groups_per_slot == 0 {
            return Err(RenderError::InitializationFailed(
                "max_binding_groups_per_slot must be non-zero".to_owned(),
            ));
        }
        log::info!(
            "Created {} device '{}' with {} swap slots",
            B::NAME,
            settings.label.as_deref().unwrap_or("default"),
            swap_count
        );

        Ok(Self {
            backend: Arc::new(backend),
            settings,
            layout_cache: Mutex::new(RenderPassPipelineStateCache::default()),
            screen_framebuffers: Mutex::new((0..swap_count).map(|_| None).collect()),
        })
    }

    /// The backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Settings the device was created with.
    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    fn layout_cache(&self) -> MutexGuard<'_, RenderPassPipelineStateCache<B>> {
        self.layout_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // --- Resources ---

    /// Creates a CPU-writable vertex buffer of `size` bytes.
    pub fn create_vertex_buffer(&self, size: u64) -> Result<Arc<VertexBuffer<B>>, ResourceError> {
        VertexBuffer::new(self.backend.clone(), size).map(Arc::new)
    }

    /// Creates an index buffer of `count` indices, `stride` bytes each.
    pub fn create_index_buffer(
        &self,
        stride: u32,
        count: u32,
    ) -> Result<Arc<IndexBuffer<B>>, ResourceError> {
        IndexBuffer::new(self.backend.clone(), stride, count).map(Arc::new)
    }

    /// Creates a constant buffer of `size` bytes.
    pub fn create_constant_buffer(
        &self,
        size: u64,
        ty: ConstantBufferType,
    ) -> Result<Arc<ConstantBuffer<B>>, ResourceError> {
        ConstantBuffer::new(self.backend.clone(), size, ty).map(Arc::new)
    }

    /// Creates a texture, validating that its usage matches its format.
    pub fn create_texture(
        &self,
        descriptor: TextureDescriptor,
    ) -> Result<Arc<Texture<B>>, ResourceError> {
        Texture::new(self.backend.clone(), descriptor).map(Arc::new)
    }

    /// Wraps a platform-owned texture identified by `external_id`.
    pub fn import_texture(&self, external_id: u64) -> Result<Arc<Texture<B>>, ResourceError> {
        Texture::import(self.backend.clone(), external_id).map(Arc::new)
    }

    /// Creates a shader module from compiled bytecode.
    pub fn create_shader(&self, bytecode: &[u8]) -> Result<Arc<Shader<B>>, ShaderError> {
        Shader::new(&*self.backend, bytecode).map(Arc::new)
    }

    // --- Pipelines and passes ---

    /// Creates an empty pipeline description. Configure it, `compile` it, then share
    /// it through an `Arc`.
    pub fn create_pipeline_state(&self) -> PipelineState<B> {
        PipelineState::new(self.backend.clone())
    }

    /// Returns the live compatible layout for `key`, compiling one if needed.
    pub fn render_pass_pipeline_state(
        &self,
        key: RenderPassPipelineStateKey,
    ) -> Result<Arc<RenderPassPipelineState<B>>, ResourceError> {
        self.layout_cache().get_or_create(&self.backend, key)
    }

    /// Number of compatible layouts still referenced by a pass or a pipeline.
    pub fn live_render_pass_pipeline_states(&self) -> usize {
        self.layout_cache().live_entries()
    }

    /// Creates an offscreen render pass over `colors` and an optional `depth` texture.
    pub fn create_render_pass(
        &self,
        colors: &[Arc<Texture<B>>],
        depth: Option<Arc<Texture<B>>>,
    ) -> Result<RenderPass<B>, ResourceError> {
        let mut cache = self.layout_cache();
        RenderPass::offscreen(
            &self.backend,
            &mut cache,
            colors,
            depth,
            self.settings.validate_attachments,
        )
    }

    /// Returns the render pass targeting the presentation image of the current slot.
    ///
    /// Framebuffers are cached per slot until the window size or the screen format
    /// changes.
    pub fn current_screen(
        &self,
        clear_color: Color8,
        is_color_cleared: bool,
        is_depth_cleared: bool,
    ) -> Result<RenderPass<B>, ResourceError> {
        let slot = self.backend.current_swap_index();
        let target = self.backend.screen_target();
        let key = RenderPassPipelineStateKey {
            is_present_mode: true,
            has_depth: target.has_depth,
            color_format: target.format,
        };
        let pipeline_state = self.render_pass_pipeline_state(key)?;

        let mut framebuffers = self
            .screen_framebuffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = framebuffers
            .get_mut(slot)
            .ok_or(ResourceError::NotFound)?;

        let cached = entry
            .as_ref()
            .filter(|cached| cached.key == key && cached.extent == target.extent)
            .map(|cached| cached.framebuffer.clone());

        let framebuffer = match cached {
            Some(framebuffer) => framebuffer,
            None => {
                let attachments = FramebufferAttachments::Screen {
                    slot,
                    extent: target.extent,
                };
                let framebuffer =
                    Arc::new(self.backend.create_framebuffer(pipeline_state.raw(), &attachments)?);
                log::debug!(
                    "[{}] created screen framebuffer for slot {} ({}x{})",
                    B::NAME,
                    slot,
                    target.extent.width,
                    target.extent.height
                );
                *entry = Some(ScreenFramebuffer {
                    key,
                    extent: target.extent,
                    framebuffer: framebuffer.clone(),
                });
                framebuffer
            }
        };

        let mut pass = RenderPass::screen(slot, target.extent, pipeline_state, framebuffer);
        pass.set_clear_color(clear_color);
        pass.set_is_color_cleared(is_color_cleared);
        pass.set_is_depth_cleared(is_depth_cleared);
        Ok(pass)
    }

    /// Drops every cached screen framebuffer; the next [`current_screen`](Self::current_screen)
    /// recreates them at the new size.
    pub fn set_window_size(&self, size: Extent2D) {
        log::info!(
            "[{}] window resized to {}x{}, dropping screen framebuffers",
            B::NAME,
            size.width,
            size.height
        );
        let mut framebuffers = self
            .screen_framebuffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        framebuffers.iter_mut().for_each(|entry| *entry = None);
    }

    // --- Recording and submission ---

    /// Creates a command list with one command buffer and binding pool per swap slot.
    pub fn create_command_list(&self) -> Result<CommandList<B>, ResourceError> {
        CommandList::new(
            self.backend.clone(),
            self.settings.max_binding_groups_per_slot,
        )
    }

    /// Advances the platform to the next frame and swap slot.
    pub fn new_frame(&self) -> Result<(), RenderError> {
        self.backend.new_frame()
    }

    /// Submits the command buffer `list` recorded last. The list must have ended.
    pub fn execute(&self, list: &CommandList<B>) -> Result<(), RenderError> {
        if list.state() != RecordingState::Idle {
            return Err(CommandError::StillRecording.into());
        }
        if !list.is_finished() {
            return Err(CommandError::NothingRecorded.into());
        }
        self.backend.submit(list.command_buffer())
    }

    /// Blocks until the device finished every submitted command buffer.
    pub fn wait_idle(&self) {
        self.backend.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::enums::{Format, PrimitiveTopology};
    use crate::renderer::api::render_pass::ScreenTarget;
    use crate::renderer::api::texture::TextureUsage;
    use crate::renderer::mock::{self, MockBackend, MockCommand};

    fn color_target(device: &Device<MockBackend>, format: Format) -> Arc<Texture<MockBackend>> {
        device
            .create_texture(TextureDescriptor {
                extent: Extent2D::new(256, 256),
                format,
                usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
            })
            .unwrap()
    }

    fn depth_target(device: &Device<MockBackend>, extent: Extent2D) -> Arc<Texture<MockBackend>> {
        device
            .create_texture(TextureDescriptor {
                extent,
                format: Format::D32Float,
                usage: TextureUsage::DEPTH_STENCIL,
            })
            .unwrap()
    }

    #[test]
    fn identical_attachment_shapes_share_a_layout() {
        let device = mock::device::<false>();
        let a = color_target(&device, Format::R8G8B8A8Unorm);
        let b = color_target(&device, Format::R8G8B8A8Unorm);

        let pass_a = device.create_render_pass(&[a.clone()], None).unwrap();
        let pass_b = device.create_render_pass(&[b], None).unwrap();
        assert!(Arc::ptr_eq(
            pass_a.render_pass_pipeline_state(),
            pass_b.render_pass_pipeline_state()
        ));
        assert_eq!(device.backend().layouts_created(), 1);

        let with_depth = device
            .create_render_pass(&[a.clone()], Some(depth_target(&device, Extent2D::new(256, 256))))
            .unwrap();
        let other_format = device
            .create_render_pass(&[color_target(&device, Format::R16G16B16A16Float)], None)
            .unwrap();
        let screen = device.current_screen(Color8::BLACK, true, false).unwrap();
        assert_eq!(device.backend().layouts_created(), 4);
        assert_eq!(device.live_render_pass_pipeline_states(), 4);

        drop((with_depth, other_format, screen));
        assert_eq!(device.live_render_pass_pipeline_states(), 1);
    }

    #[test]
    fn layout_is_recompiled_after_all_owners_drop() {
        let device = mock::device::<false>();
        let target = color_target(&device, Format::R8G8B8A8Unorm);

        let pass = device.create_render_pass(&[target.clone()], None).unwrap();
        let pipeline = mock::pipeline(&device, &pass, PrimitiveTopology::Triangle);
        drop(pass);
        // The pipeline still owns the layout.
        let _again = device.create_render_pass(&[target.clone()], None).unwrap();
        assert_eq!(device.backend().layouts_created(), 1);

        drop(_again);
        drop(pipeline);
        assert_eq!(device.live_render_pass_pipeline_states(), 0);
        let _fresh = device.create_render_pass(&[target], None).unwrap();
        assert_eq!(device.backend().layouts_created(), 2);
    }

    #[test]
    fn offscreen_pass_validation() {
        let device = mock::device::<false>();
        assert_eq!(
            device.create_render_pass(&[], None).err(),
            Some(ResourceError::EmptyRenderPass)
        );

        let color = color_target(&device, Format::R8G8B8A8Unorm);
        let small_depth = depth_target(&device, Extent2D::new(128, 128));
        assert!(matches!(
            device.create_render_pass(&[color.clone()], Some(small_depth)),
            Err(ResourceError::AttachmentMismatch(_))
        ));

        let other = color_target(&device, Format::R32Float);
        assert!(matches!(
            device.create_render_pass(&[color.clone(), other], None),
            Err(ResourceError::AttachmentMismatch(_))
        ));

        let sampled_only = device
            .create_texture(TextureDescriptor {
                extent: Extent2D::new(256, 256),
                format: Format::R8G8B8A8Unorm,
                usage: TextureUsage::SAMPLED,
            })
            .unwrap();
        assert!(matches!(
            device.create_render_pass(&[sampled_only], None),
            Err(ResourceError::AttachmentMismatch(_))
        ));
    }

    #[test]
    fn screen_framebuffers_are_cached_per_slot_until_resize() {
        let device = mock::device::<false>();
        let first = device.current_screen(Color8::WHITE, true, true).unwrap();
        let again = device.current_screen(Color8::WHITE, true, true).unwrap();
        assert_eq!(first.framebuffer().id, again.framebuffer().id);
        assert_eq!(device.backend().framebuffers_created(), 1);

        device.new_frame().unwrap();
        let second_slot = device.current_screen(Color8::WHITE, true, true).unwrap();
        assert_ne!(first.framebuffer().id, second_slot.framebuffer().id);
        assert_eq!(device.backend().framebuffers_created(), 2);

        device.set_window_size(Extent2D::new(640, 480));
        device.current_screen(Color8::WHITE, true, true).unwrap();
        assert_eq!(device.backend().framebuffers_created(), 3);

        device.backend().set_screen(ScreenTarget {
            extent: Extent2D::new(800, 600),
            format: Format::B8G8R8A8Unorm,
            has_depth: true,
        });
        let resized = device.current_screen(Color8::WHITE, true, true).unwrap();
        assert_eq!(resized.extent(), Extent2D::new(800, 600));
        assert_eq!(device.backend().framebuffers_created(), 4);
    }

    #[test]
    fn execute_submits_the_ended_buffer() {
        let device = mock::device::<false>();
        let pass = mock::screen_pass(&device);
        let mut list = device.create_command_list().unwrap();
        list.begin().unwrap();
        list.begin_render_pass(&pass).unwrap();
        list.end_render_pass().unwrap();
        assert!(matches!(
            device.execute(&list),
            Err(RenderError::CommandError(CommandError::StillRecording))
        ));
        list.end().unwrap();
        device.execute(&list).unwrap();

        let submitted = device.backend().submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].last(), Some(&MockCommand::EndRenderPass));
    }

    #[test]
    fn execute_rejects_a_list_that_was_never_recorded() {
        let device = mock::device::<false>();
        let mut list = device.create_command_list().unwrap();
        assert!(matches!(
            device.execute(&list),
            Err(RenderError::CommandError(CommandError::NothingRecorded))
        ));

        list.begin().unwrap();
        assert!(matches!(
            device.execute(&list),
            Err(RenderError::CommandError(CommandError::StillRecording))
        ));
        list.end().unwrap();
        device.execute(&list).unwrap();
        assert!(device.backend().submitted().len() == 1);
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let settings = DeviceSettings {
            max_binding_groups_per_slot: 0,
            ..Default::default()
        };
        assert!(matches!(
            Device::new(MockBackend::new(2), settings),
            Err(RenderError::InitializationFailed(_))
        ));
        assert!(matches!(
            Device::new(MockBackend::new(0), DeviceSettings::default()),
            Err(RenderError::InitializationFailed(_))
        ));
    }

    #[test]
    fn imported_textures_are_flagged_external() {
        let device = mock::device::<false>();
        let texture = device.import_texture(7).unwrap();
        assert!(texture.usage().contains(TextureUsage::EXTERNAL));
        assert!(texture.is_render_texture());
        assert_eq!(device.import_texture(0).err(), Some(ResourceError::NotFound));
    }
}
