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

//! [`Backend`] implementation on `ash`.

use super::command::{record_transitions, LayoutTransition, VulkanCommandBuffer};
use super::context::VulkanContext;
use super::conversions::{barrier_aspect, from_vk_format, view_aspect, IntoVk};
use super::resources::{
    lock, vk_error, VulkanBuffer, VulkanDescriptorGroup, VulkanDescriptorPool,
    VulkanFramebuffer, VulkanPipeline, VulkanRenderPass, VulkanShader, VulkanShared,
    VulkanTexture,
};
use super::swapchain::{NativeImage, VulkanSwapchain};
use crate::graphics::platform_error;
use ash::vk;
use prism_core::math::{Color8, Extent2D, Rect2D, Viewport};
use prism_core::renderer::api::enums::{TextureMinMagFilter, TextureWrapMode};
use prism_core::renderer::{
    Backend, BufferDescriptor, BufferUsage, Format, FramebufferAttachments, IndexFormat,
    PipelineDescriptor, PipelineError, RenderError, RenderPassBeginInfo,
    RenderPassPipelineStateKey, ResourceError, ScreenTarget, ShaderError, ShaderStage,
    StageResources, TextureDescriptor, TextureUsage, MAX_TEXTURE_COUNT,
};
use std::collections::HashMap;
use std::io::Cursor;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

const ENTRY_POINT: &std::ffi::CStr = c"main";
const FALLBACK_BUFFER_SIZE: u64 = 256;

fn submission_error(context: &str, result: vk::Result) -> RenderError {
    if result == vk::Result::ERROR_DEVICE_LOST {
        RenderError::DeviceLost
    } else {
        RenderError::SubmissionFailed(format!("{context}: {result}"))
    }
}

/// The descriptor set layout of one stage: a dynamic uniform buffer at binding 0
/// and combined image samplers at bindings 1 to 8.
pub fn stage_set_layout_bindings(stage: ShaderStage) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    let stage_flags: vk::ShaderStageFlags = stage.into_vk();
    let mut bindings = Vec::with_capacity(1 + MAX_TEXTURE_COUNT);
    bindings.push(
        vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(stage_flags),
    );
    bindings.extend((0..MAX_TEXTURE_COUNT as u32).map(|unit| {
        vk::DescriptorSetLayoutBinding::default()
            .binding(unit + 1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }));
    bindings
}

/// The clear value of a color attachment; integer formats take the raw bytes.
pub fn color_clear_value(format: Format, color: Color8) -> vk::ClearValue {
    let value = match format {
        Format::R8G8B8A8Uint => vk::ClearColorValue {
            uint32: [
                u32::from(color.r),
                u32::from(color.g),
                u32::from(color.b),
                u32::from(color.a),
            ],
        },
        _ => vk::ClearColorValue {
            float32: color.to_f32_array(),
        },
    };
    vk::ClearValue { color: value }
}

/// Resources written into descriptor slots nothing is bound to.
struct Fallback {
    buffer: VulkanBuffer,
    texture: VulkanTexture,
}

struct FrameState {
    current: usize,
    /// Semaphore of the last acquired image, waited by the next submission.
    acquire: Option<vk::Semaphore>,
}

/// The Vulkan backend.
///
/// With a [`VulkanSwapchain`] the swap slots are the swap-chain images. Without one
/// the backend renders offscreen only and rotates through `frames_in_flight` slots.
pub struct VulkanBackend {
    shared: Arc<VulkanShared>,
    swapchain: Option<Arc<dyn VulkanSwapchain>>,
    slot_count: usize,
    frames: Mutex<FrameState>,
    render_finished: Vec<vk::Semaphore>,
    depth_format: vk::Format,
    external: Mutex<HashMap<u64, (NativeImage, Extent2D)>>,
    fallback: Fallback,
}

impl VulkanBackend {
    /// Creates a backend presenting through `swapchain`.
    pub fn new(
        context: VulkanContext,
        swapchain: Arc<dyn VulkanSwapchain>,
    ) -> Result<Self, RenderError> {
        let slot_count = swapchain.image_count();
        Self::build(context, Some(swapchain), slot_count)
    }

    /// Creates a backend without presentation, cycling `frames_in_flight` slots.
    pub fn headless(context: VulkanContext, frames_in_flight: usize) -> Result<Self, RenderError> {
        Self::build(context, None, frames_in_flight)
    }

    fn build(
        context: VulkanContext,
        swapchain: Option<Arc<dyn VulkanSwapchain>>,
        slot_count: usize,
    ) -> Result<Self, RenderError> {
        if slot_count == 0 {
            return Err(RenderError::InitializationFailed(
                "at least one swap slot is required".into(),
            ));
        }
        let depth_format = pick_depth_format(&context);
        let shared = Arc::new(VulkanShared::new(context)?);

        let fallback_buffer = shared
            .create_buffer(
                "prism fallback constants",
                FALLBACK_BUFFER_SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )
            .map_err(RenderError::ResourceError)?;
        let fallback_descriptor = TextureDescriptor {
            extent: Extent2D::new(1, 1),
            format: Format::R8G8B8A8Unorm,
            usage: TextureUsage::SAMPLED,
        };
        let fallback_texture = shared
            .create_texture(
                &fallback_descriptor,
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .map_err(RenderError::ResourceError)?;

        let mut backend = Self {
            shared,
            swapchain,
            slot_count,
            frames: Mutex::new(FrameState {
                current: 0,
                acquire: None,
            }),
            render_finished: Vec::new(),
            depth_format,
            external: Mutex::new(HashMap::new()),
            fallback: Fallback {
                buffer: fallback_buffer,
                texture: fallback_texture,
            },
        };
        backend
            .write_texture(&backend.fallback.texture, &[0, 0, 0, 255])
            .map_err(RenderError::ResourceError)?;
        if backend.swapchain.is_some() {
            for _ in 0..slot_count {
                let semaphore = unsafe {
                    backend
                        .shared
                        .device()
                        .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                }
                .map_err(|e| RenderError::InitializationFailed(format!("vkCreateSemaphore: {e}")))?;
                backend.render_finished.push(semaphore);
            }
        }
        log::info!(
            "Vulkan backend created with {} swap slots ({}), depth format {:?}.",
            slot_count,
            if backend.swapchain.is_some() { "presenting" } else { "headless" },
            depth_format
        );
        Ok(backend)
    }

    pub fn context(&self) -> &VulkanContext {
        self.shared.context()
    }

    /// The format offscreen depth textures must use to be rendered to.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Makes an image owned by the embedding application available to
    /// [`Backend::import_texture`] under `id`.
    ///
    /// The image must stay alive and in `SHADER_READ_ONLY_OPTIMAL` outside render passes.
    pub fn register_external_image(&self, id: u64, image: NativeImage, extent: Extent2D) {
        lock(&self.external).insert(id, (image, extent));
    }

    /// Presents the current swap-chain image once every submission of the frame ends.
    pub fn present(&self) -> Result<(), RenderError> {
        let Some(swapchain) = &self.swapchain else {
            return Err(RenderError::SubmissionFailed(
                "a headless backend has nothing to present".into(),
            ));
        };
        let mut frames = lock(&self.frames);
        let index = frames.current;
        let signal = [self.render_finished[index]];
        let wait = frames.acquire.take();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait.as_slice().len()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(wait.as_slice())
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal);
        let queue = lock(&self.shared.queue);
        unsafe {
            self.shared
                .device()
                .queue_submit(*queue, &[submit], vk::Fence::null())
        }
        .map_err(|e| submission_error("vkQueueSubmit", e))?;
        swapchain
            .present(*queue, index, signal[0])
            .map_err(|e| RenderError::SubmissionFailed(platform_error("vkQueuePresentKHR", e)))
    }

    /// Copies the pixels of `texture` into `out`, tightly packed.
    ///
    /// Blocks until the copy finished. Meant for tests and screenshots.
    pub fn read_texture(&self, texture: &VulkanTexture, out: &mut [u8]) -> Result<(), ResourceError> {
        let descriptor = texture.descriptor();
        let size = descriptor.extent.area() * u64::from(descriptor.format.bytes_per_pixel());
        if out.len() as u64 != size {
            return Err(ResourceError::OutOfBounds);
        }
        let staging = self.shared.create_buffer(
            "prism readback",
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
        )?;
        let aspect = barrier_aspect(texture.format());
        let region = copy_region(view_aspect(texture.format()), descriptor.extent);
        let image = texture.image();
        self.shared.immediate_submit(|device, command_buffer| unsafe {
            record_transitions(
                device,
                command_buffer,
                &[LayoutTransition {
                    image,
                    aspect,
                    old_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                }],
            );
            device.cmd_copy_image_to_buffer(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.raw(),
                &[region],
            );
            record_transitions(
                device,
                command_buffer,
                &[LayoutTransition {
                    image,
                    aspect,
                    old_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }],
            );
        })?;
        staging.read(0, out)
    }

    fn recording(command_buffer: &VulkanCommandBuffer) -> Option<vk::CommandBuffer> {
        if command_buffer.is_recording() {
            Some(command_buffer.raw())
        } else {
            log::warn!("VulkanBackend: command recorded outside begin/end, ignored.");
            None
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let device = self.shared.device();
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::error!("VulkanBackend: vkDeviceWaitIdle failed on teardown: {e}");
            }
            for semaphore in &self.render_finished {
                device.destroy_semaphore(*semaphore, None);
            }
        }
    }
}

fn pick_depth_format(context: &VulkanContext) -> vk::Format {
    [vk::Format::D32_SFLOAT, vk::Format::D24_UNORM_S8_UINT]
        .into_iter()
        .find(|format| {
            let properties = unsafe {
                context
                    .instance()
                    .get_physical_device_format_properties(context.physical_device(), *format)
            };
            properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .unwrap_or(vk::Format::D32_SFLOAT)
}

fn copy_region(aspect: vk::ImageAspectFlags, extent: Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .image_subresource(vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

fn vk_extent(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

fn attachment_transitions(
    texture: &VulkanTexture,
    attachment_layout: vk::ImageLayout,
) -> (LayoutTransition, LayoutTransition) {
    let aspect = barrier_aspect(texture.format());
    (
        LayoutTransition {
            image: texture.image(),
            aspect,
            old_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            new_layout: attachment_layout,
        },
        LayoutTransition {
            image: texture.image(),
            aspect,
            old_layout: attachment_layout,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        },
    )
}

impl Backend for VulkanBackend {
    type Buffer = VulkanBuffer;
    type Texture = VulkanTexture;
    type Shader = VulkanShader;
    type Pipeline = VulkanPipeline;
    type CompatibleLayout = VulkanRenderPass;
    type Framebuffer = VulkanFramebuffer;
    type DescriptorPool = VulkanDescriptorPool;
    type BindingGroup = VulkanDescriptorGroup;
    type CommandBuffer = VulkanCommandBuffer;

    const NAME: &'static str = "vulkan";

    fn swap_count(&self) -> usize {
        self.slot_count
    }

    fn current_swap_index(&self) -> usize {
        lock(&self.frames).current
    }

    fn new_frame(&self) -> Result<(), RenderError> {
        let mut frames = lock(&self.frames);
        match &self.swapchain {
            Some(swapchain) => {
                let (index, semaphore) = swapchain.acquire_next_image().map_err(|e| {
                    RenderError::SubmissionFailed(platform_error("vkAcquireNextImageKHR", e))
                })?;
                frames.current = index % self.slot_count;
                frames.acquire = Some(semaphore);
            }
            None => frames.current = (frames.current + 1) % self.slot_count,
        }
        Ok(())
    }

    fn submit(&self, command_buffer: &VulkanCommandBuffer) -> Result<(), RenderError> {
        if command_buffer.is_recording() {
            return Err(RenderError::SubmissionFailed(
                "command buffer is still recording".to_string(),
            ));
        }
        command_buffer
            .wait_completion()
            .map_err(|e| submission_error("vkWaitForFences", e))?;

        let mut frames = lock(&self.frames);
        let wait = frames.acquire.take();
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait.as_slice().len()];
        let buffers = [command_buffer.raw()];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(wait.as_slice())
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&buffers);
        let queue = lock(&self.shared.queue);
        let result = unsafe {
            self.shared
                .device()
                .queue_submit(*queue, &[submit], command_buffer.fence())
        };
        match result {
            Ok(()) => {
                command_buffer.mark_pending();
                Ok(())
            }
            Err(e) => {
                frames.acquire = wait;
                Err(submission_error("vkQueueSubmit", e))
            }
        }
    }

    fn wait_idle(&self) {
        if let Err(e) = unsafe { self.shared.device().device_wait_idle() } {
            log::error!("VulkanBackend: vkDeviceWaitIdle failed: {e}");
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<VulkanBuffer, ResourceError> {
        if descriptor.size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        let mut usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        if descriptor.usage.contains(BufferUsage::VERTEX) {
            usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if descriptor.usage.contains(BufferUsage::INDEX) {
            usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if descriptor.usage.contains(BufferUsage::CONSTANT) {
            usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        let name = descriptor.label.as_deref().unwrap_or("prism buffer");
        self.shared.create_buffer(name, descriptor.size, usage)
    }

    fn write_buffer(&self, buffer: &VulkanBuffer, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        buffer.write(offset, data)
    }

    fn read_buffer(&self, buffer: &VulkanBuffer, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        buffer.read(offset, out)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<VulkanTexture, ResourceError> {
        let mut usage = vk::ImageUsageFlags::SAMPLED
            | vk::ImageUsageFlags::TRANSFER_DST
            | vk::ImageUsageFlags::TRANSFER_SRC;
        if descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if descriptor.usage.contains(TextureUsage::DEPTH_STENCIL) {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        self.shared.create_texture(descriptor, usage)
    }

    fn import_texture(&self, external_id: u64) -> Result<(VulkanTexture, TextureDescriptor), ResourceError> {
        let Some((image, extent)) = lock(&self.external).get(&external_id).copied() else {
            log::warn!("VulkanBackend: external image {} is not registered.", external_id);
            return Err(ResourceError::NotFound);
        };
        let format = from_vk_format(image.format).ok_or_else(|| {
            ResourceError::BackendError(format!("unsupported external format {:?}", image.format))
        })?;
        let mut usage = TextureUsage::SAMPLED | TextureUsage::EXTERNAL;
        if format.is_depth() {
            usage.insert(TextureUsage::DEPTH_STENCIL);
        } else {
            usage.insert(TextureUsage::RENDER_TARGET);
        }
        let descriptor = TextureDescriptor {
            extent,
            format,
            usage,
        };
        let texture =
            VulkanTexture::borrowed(&self.shared, image.image, image.view, image.format, descriptor);
        Ok((texture, descriptor))
    }

    fn write_texture(&self, texture: &VulkanTexture, data: &[u8]) -> Result<(), ResourceError> {
        let staging = self.shared.create_buffer(
            "prism upload",
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write(0, data)?;
        let image = texture.image();
        let aspect = barrier_aspect(texture.format());
        let region = copy_region(view_aspect(texture.format()), texture.descriptor().extent);
        self.shared.immediate_submit(|device, command_buffer| unsafe {
            record_transitions(
                device,
                command_buffer,
                &[LayoutTransition {
                    image,
                    aspect,
                    old_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                }],
            );
            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging.raw(),
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            record_transitions(
                device,
                command_buffer,
                &[LayoutTransition {
                    image,
                    aspect,
                    old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                }],
            );
        })
    }

    fn create_shader(&self, bytecode: &[u8]) -> Result<VulkanShader, ShaderError> {
        let magic = bytecode
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u32::from_le_bytes);
        if magic != Some(SPIRV_MAGIC) {
            return Err(ShaderError::CreationFailed {
                details: "bytecode is not a little-endian SPIR-V module".into(),
            });
        }
        let words = ash::util::read_spv(&mut Cursor::new(bytecode)).map_err(|e| {
            ShaderError::CreationFailed {
                details: format!("invalid SPIR-V: {e}"),
            }
        })?;
        let info = vk::ShaderModuleCreateInfo::default().code(&words);
        let raw = unsafe { self.shared.device().create_shader_module(&info, None) }.map_err(|e| {
            ShaderError::CreationFailed {
                details: format!("vkCreateShaderModule: {e}"),
            }
        })?;
        Ok(VulkanShader {
            shared: self.shared.clone(),
            raw,
        })
    }

    fn screen_target(&self) -> ScreenTarget {
        match &self.swapchain {
            Some(swapchain) => {
                let extent = swapchain.extent();
                let format = from_vk_format(swapchain.image(0).format).unwrap_or_else(|| {
                    log::warn!("VulkanBackend: unknown swap-chain format, assuming BGRA8.");
                    Format::B8G8R8A8Unorm
                });
                ScreenTarget {
                    extent: Extent2D::new(extent.width, extent.height),
                    format,
                    has_depth: swapchain.depth_image().is_some(),
                }
            }
            None => ScreenTarget {
                extent: Extent2D::new(0, 0),
                format: Format::B8G8R8A8Unorm,
                has_depth: false,
            },
        }
    }

    fn create_compatible_layout(
        &self,
        key: &RenderPassPipelineStateKey,
    ) -> Result<VulkanRenderPass, ResourceError> {
        // Attachments are loaded and cleared explicitly after the pass begins.
        // Screen images arrive undefined and leave presentable; offscreen images are
        // moved to attachment layouts by barriers recorded around the pass.
        let (initial_layout, final_layout, depth_initial_layout) = if key.is_present_mode {
            (
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::PRESENT_SRC_KHR,
                vk::ImageLayout::UNDEFINED,
            )
        } else {
            (
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            )
        };
        let depth_format = key.has_depth.then(|| {
            let screen_depth = key
                .is_present_mode
                .then(|| self.swapchain.as_ref().and_then(|s| s.depth_image()))
                .flatten();
            screen_depth.map_or(self.depth_format, |depth| depth.format)
        });

        let mut attachments = vec![vk::AttachmentDescription::default()
            .format(key.color_format.into_vk())
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(initial_layout)
            .final_layout(final_layout)];
        if let Some(format) = depth_format {
            attachments.push(
                vk::AttachmentDescription::default()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::LOAD)
                    .stencil_store_op(vk::AttachmentStoreOp::STORE)
                    .initial_layout(depth_initial_layout)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            );
        }
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages)
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));
        let raw = unsafe { self.shared.device().create_render_pass(&info, None) }
            .map_err(|e| vk_error("vkCreateRenderPass", e))?;
        Ok(VulkanRenderPass {
            shared: self.shared.clone(),
            raw,
            depth_format,
        })
    }

    fn create_framebuffer(
        &self,
        layout: &VulkanRenderPass,
        attachments: &FramebufferAttachments<'_, Self>,
    ) -> Result<VulkanFramebuffer, ResourceError> {
        let mut views = Vec::new();
        let mut begin_transitions = Vec::new();
        let mut end_transitions = Vec::new();
        let extent = match attachments {
            FramebufferAttachments::Screen { slot, extent } => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| {
                    ResourceError::AttachmentMismatch("a headless backend has no screen".into())
                })?;
                views.push(swapchain.image(*slot).view);
                if layout.depth_format.is_some() {
                    let depth = swapchain.depth_image().ok_or_else(|| {
                        ResourceError::AttachmentMismatch("swap chain has no depth buffer".into())
                    })?;
                    views.push(depth.view);
                }
                *extent
            }
            FramebufferAttachments::Offscreen { colors, depth, extent } => {
                if colors.len() != 1 {
                    return Err(ResourceError::AttachmentMismatch(format!(
                        "the Vulkan backend renders to exactly one color texture, got {}",
                        colors.len()
                    )));
                }
                for color in colors {
                    views.push(color.view());
                    let (begin, end) =
                        attachment_transitions(color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                    begin_transitions.push(begin);
                    end_transitions.push(end);
                }
                match (depth, layout.depth_format) {
                    (Some(depth), Some(expected)) => {
                        if depth.format() != expected {
                            return Err(ResourceError::AttachmentMismatch(format!(
                                "depth texture is {:?}, render pass expects {:?}",
                                depth.format(),
                                expected
                            )));
                        }
                        views.push(depth.view());
                        let (begin, end) = attachment_transitions(
                            depth,
                            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                        );
                        begin_transitions.push(begin);
                        end_transitions.push(end);
                    }
                    (None, None) => {}
                    _ => {
                        return Err(ResourceError::AttachmentMismatch(
                            "depth attachment does not match the render pass".into(),
                        ))
                    }
                }
                *extent
            }
        };
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(layout.raw())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let raw = unsafe { self.shared.device().create_framebuffer(&info, None) }
            .map_err(|e| vk_error("vkCreateFramebuffer", e))?;
        Ok(VulkanFramebuffer {
            shared: self.shared.clone(),
            raw,
            begin_transitions,
            end_transitions,
        })
    }

    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_, Self>,
    ) -> Result<VulkanPipeline, PipelineError> {
        let device = self.shared.device();
        let label = descriptor.label.map(str::to_string);
        let mut pipeline = VulkanPipeline {
            shared: self.shared.clone(),
            raw: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layouts: Vec::with_capacity(descriptor.bindings.stage_count),
        };

        for stage in ShaderStage::ALL.iter().take(descriptor.bindings.stage_count) {
            let bindings = stage_set_layout_bindings(*stage);
            let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
            let set_layout = unsafe { device.create_descriptor_set_layout(&info, None) }
                .map_err(|e| {
                    PipelineError::LayoutCreationFailed(format!("vkCreateDescriptorSetLayout: {e}"))
                })?;
            pipeline.set_layouts.push(set_layout);
        }
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&pipeline.set_layouts);
        pipeline.layout = unsafe { device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| PipelineError::LayoutCreationFailed(format!("vkCreatePipelineLayout: {e}")))?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(descriptor.vertex_shader.raw())
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(descriptor.pixel_shader.raw())
                .name(ENTRY_POINT),
        ];
        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: descriptor.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = descriptor
            .vertex_attributes
            .iter()
            .map(|attribute| vk::VertexInputAttributeDescription {
                location: attribute.location,
                binding: 0,
                format: attribute.format.into_vk(),
                offset: attribute.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(descriptor.topology.into_vk());
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(descriptor.culling.into_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(descriptor.depth_test)
            .depth_write_enable(descriptor.depth_write)
            .depth_compare_op(descriptor.depth_func.into_vk());
        let blend_attachment = match descriptor.blend {
            Some(blend) => vk::PipelineColorBlendAttachmentState::default()
                .blend_enable(true)
                .src_color_blend_factor(blend.src.into_vk())
                .dst_color_blend_factor(blend.dst.into_vk())
                .color_blend_op(blend.op_rgb.into_vk())
                .src_alpha_blend_factor(blend.src_alpha.into_vk())
                .dst_alpha_blend_factor(blend.dst_alpha.into_vk())
                .alpha_blend_op(blend.op_alpha.into_vk()),
            None => vk::PipelineColorBlendAttachmentState::default().blend_enable(false),
        }
        .color_write_mask(vk::ColorComponentFlags::RGBA);
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(std::slice::from_ref(&blend_attachment));
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(pipeline.layout)
            .render_pass(descriptor.layout.raw())
            .subpass(0);
        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        let compilation_failed = |details: String| PipelineError::CompilationFailed {
            label: label.clone(),
            details,
        };
        pipeline.raw = created
            .map_err(|(_, e)| compilation_failed(format!("vkCreateGraphicsPipelines: {e}")))?
            .into_iter()
            .next()
            .ok_or_else(|| compilation_failed("no pipeline returned".into()))?;
        Ok(pipeline)
    }

    fn create_descriptor_pool(&self, capacity: usize) -> Result<VulkanDescriptorPool, ResourceError> {
        let sets = u32::try_from(capacity.max(1) * ShaderStage::COUNT)
            .map_err(|_| ResourceError::InvalidSize)?;
        let sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: sets,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: sets * MAX_TEXTURE_COUNT as u32,
            },
        ];
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(sets)
            .pool_sizes(&sizes);
        let raw = unsafe { self.shared.device().create_descriptor_pool(&info, None) }
            .map_err(|e| vk_error("vkCreateDescriptorPool", e))?;
        Ok(VulkanDescriptorPool {
            shared: self.shared.clone(),
            raw,
        })
    }

    fn allocate_binding_group(
        &self,
        pool: &mut VulkanDescriptorPool,
        pipeline: &VulkanPipeline,
    ) -> Result<VulkanDescriptorGroup, ResourceError> {
        if pipeline.set_layouts.is_empty() {
            return Ok(VulkanDescriptorGroup { sets: Vec::new() });
        }
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.raw)
            .set_layouts(&pipeline.set_layouts);
        let sets = unsafe { self.shared.device().allocate_descriptor_sets(&info) }
            .map_err(|e| vk_error("vkAllocateDescriptorSets", e))?;
        Ok(VulkanDescriptorGroup { sets })
    }

    fn create_command_buffer(&self) -> Result<VulkanCommandBuffer, ResourceError> {
        VulkanCommandBuffer::new(&self.shared).map_err(|e| vk_error("vkAllocateCommandBuffers", e))
    }

    fn begin_command_buffer(&self, command_buffer: &mut VulkanCommandBuffer) {
        if let Err(e) = command_buffer.reset() {
            log::error!("VulkanBackend: vkBeginCommandBuffer failed: {e}");
            command_buffer.is_recording = false;
        }
    }

    fn end_command_buffer(&self, command_buffer: &mut VulkanCommandBuffer) {
        if !command_buffer.is_recording {
            return;
        }
        command_buffer.is_recording = false;
        if let Err(e) = unsafe { self.shared.device().end_command_buffer(command_buffer.raw()) } {
            log::error!("VulkanBackend: vkEndCommandBuffer failed: {e}");
        }
    }

    fn write_binding_group(
        &self,
        group: &mut VulkanDescriptorGroup,
        stage: ShaderStage,
        resources: &StageResources<'_, Self>,
    ) {
        let Some(&set) = group.sets.get(stage.index()) else {
            log::warn!("VulkanBackend: no descriptor set for stage {:?}.", stage);
            return;
        };
        // Every binding is written so a reused set never keeps a stale descriptor.
        let (buffer, range) = match resources.constant_buffer {
            Some((buffer, range)) => (buffer.raw(), range),
            None => (self.fallback.buffer.raw(), self.fallback.buffer.size()),
        };
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range,
        }];
        let image_infos: Vec<vk::DescriptorImageInfo> = resources
            .textures
            .iter()
            .map(|slot| match slot {
                Some(slot) => vk::DescriptorImageInfo {
                    sampler: self.shared.sampler(slot.wrap, slot.filter),
                    image_view: slot.texture.view(),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
                None => vk::DescriptorImageInfo {
                    sampler: self
                        .shared
                        .sampler(TextureWrapMode::Clamp, TextureMinMagFilter::Nearest),
                    image_view: self.fallback.texture.view(),
                    image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            })
            .collect();

        let mut writes = Vec::with_capacity(1 + MAX_TEXTURE_COUNT);
        writes.push(
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                .buffer_info(&buffer_info),
        );
        for (unit, info) in image_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(unit as u32 + 1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        unsafe { self.shared.device().update_descriptor_sets(&writes, &[]) };
    }

    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: &mut VulkanCommandBuffer,
        buffer: &VulkanBuffer,
        _stride: u32,
        offset: u64,
    ) {
        // The stride is baked into the pipeline's vertex input state.
        let Some(raw) = Self::recording(command_buffer) else { return };
        unsafe {
            self.shared
                .device()
                .cmd_bind_vertex_buffers(raw, 0, &[buffer.raw()], &[offset])
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: &mut VulkanCommandBuffer,
        buffer: &VulkanBuffer,
        format: IndexFormat,
    ) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        unsafe {
            self.shared
                .device()
                .cmd_bind_index_buffer(raw, buffer.raw(), 0, format.into_vk())
        };
    }

    fn cmd_bind_pipeline(&self, command_buffer: &mut VulkanCommandBuffer, pipeline: &VulkanPipeline) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        unsafe {
            self.shared
                .device()
                .cmd_bind_pipeline(raw, vk::PipelineBindPoint::GRAPHICS, pipeline.raw())
        };
    }

    fn cmd_bind_binding_group(
        &self,
        command_buffer: &mut VulkanCommandBuffer,
        pipeline: &VulkanPipeline,
        group: &VulkanDescriptorGroup,
        stages: Range<usize>,
    ) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        let Some(sets) = group.sets.get(stages.clone()) else {
            log::warn!("VulkanBackend: stage range {:?} outside the descriptor group.", stages);
            return;
        };
        let dynamic_offsets = vec![0; sets.len()];
        unsafe {
            self.shared.device().cmd_bind_descriptor_sets(
                raw,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                stages.start as u32,
                sets,
                &dynamic_offsets,
            )
        };
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut VulkanCommandBuffer,
        info: &RenderPassBeginInfo<'_, Self>,
    ) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        let device = self.shared.device();
        let framebuffer = info.framebuffer;
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk_extent(info.extent),
        };

        let mut clears = Vec::with_capacity(2);
        if let Some(color) = info.clear_color {
            clears.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: color_clear_value(info.key.color_format, color),
            });
        }
        if let (Some(depth), Some(format)) = (info.clear_depth, info.layout.depth_format()) {
            clears.push(vk::ClearAttachment {
                aspect_mask: barrier_aspect(format),
                color_attachment: 0,
                clear_value: vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
                },
            });
        }
        let clear_rects = [vk::ClearRect {
            rect: render_area,
            base_array_layer: 0,
            layer_count: 1,
        }];

        let begin = vk::RenderPassBeginInfo::default()
            .render_pass(info.layout.raw())
            .framebuffer(framebuffer.raw())
            .render_area(render_area);
        unsafe {
            record_transitions(device, raw, &framebuffer.begin_transitions);
            device.cmd_begin_render_pass(raw, &begin, vk::SubpassContents::INLINE);
            if !clears.is_empty() {
                device.cmd_clear_attachments(raw, &clears, &clear_rects);
            }
        }
        command_buffer.end_transitions = framebuffer.end_transitions.clone();
    }

    fn cmd_end_render_pass(&self, command_buffer: &mut VulkanCommandBuffer) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        let transitions = std::mem::take(&mut command_buffer.end_transitions);
        let device = self.shared.device();
        unsafe {
            device.cmd_end_render_pass(raw);
            record_transitions(device, raw, &transitions);
        }
    }

    fn cmd_set_viewport(&self, command_buffer: &mut VulkanCommandBuffer, viewport: &Viewport) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.shared.device().cmd_set_viewport(raw, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, command_buffer: &mut VulkanCommandBuffer, rect: &Rect2D) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: rect.x, y: rect.y },
            extent: vk::Extent2D {
                width: rect.width,
                height: rect.height,
            },
        };
        unsafe { self.shared.device().cmd_set_scissor(raw, 0, &[scissor]) };
    }

    fn cmd_draw_indexed(&self, command_buffer: &mut VulkanCommandBuffer, index_count: u32) {
        let Some(raw) = Self::recording(command_buffer) else { return };
        unsafe {
            self.shared
                .device()
                .cmd_draw_indexed(raw, index_count, 1, 0, 0, 0)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_layout_has_one_uniform_buffer_and_eight_samplers() {
        let bindings = stage_set_layout_bindings(ShaderStage::Pixel);
        assert_eq!(bindings.len(), 1 + MAX_TEXTURE_COUNT);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        for (unit, binding) in bindings[1..].iter().enumerate() {
            assert_eq!(binding.binding, unit as u32 + 1);
            assert_eq!(binding.descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        }
    }

    #[test]
    fn integer_targets_clear_with_raw_bytes() {
        let color = Color8::new(1, 2, 3, 4);
        let value = color_clear_value(Format::R8G8B8A8Uint, color);
        assert_eq!(unsafe { value.color.uint32 }, [1, 2, 3, 4]);

        let value = color_clear_value(Format::R8G8B8A8Unorm, Color8::WHITE);
        assert_eq!(unsafe { value.color.float32 }, [1.0; 4]);
    }
}
