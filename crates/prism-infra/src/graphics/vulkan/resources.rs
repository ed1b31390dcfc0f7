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

//! Native Vulkan objects and the device state they share.
//!
//! Every object holds an `Arc<VulkanShared>` and destroys its handles when dropped,
//! so the device outlives everything created on it.

use super::command::{record_transitions, whole_image, LayoutTransition};
use super::context::VulkanContext;
use super::conversions::{barrier_aspect, view_aspect, IntoVk};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use prism_core::renderer::api::enums::{TextureMinMagFilter, TextureWrapMode};
use prism_core::renderer::{RenderError, ResourceError, TextureDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn vk_error(context: &str, result: vk::Result) -> ResourceError {
    ResourceError::BackendError(format!("{context}: {result}"))
}

fn allocator_error(error: gpu_allocator::AllocationError) -> ResourceError {
    ResourceError::BackendError(format!("gpu-allocator: {error}"))
}

/// Device-wide state: the memory allocator, the queue, the upload command pool and
/// the sampler cache.
///
/// Field order is destruction order: allocator blocks are freed before the context
/// destroys the device.
pub(crate) struct VulkanShared {
    allocator: Mutex<Allocator>,
    pub(crate) queue: Mutex<vk::Queue>,
    upload_pool: Mutex<vk::CommandPool>,
    samplers: HashMap<(TextureWrapMode, TextureMinMagFilter), vk::Sampler>,
    context: VulkanContext,
}

impl VulkanShared {
    pub(crate) fn new(context: VulkanContext) -> Result<Self, RenderError> {
        let init_error = |context: &str, result: vk::Result| {
            RenderError::InitializationFailed(format!("{context}: {result}"))
        };
        let device = context.device();
        let queue = unsafe { device.get_device_queue(context.queue_family_index(), 0) };
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance().clone(),
            device: device.clone(),
            physical_device: context.physical_device(),
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| RenderError::InitializationFailed(format!("gpu-allocator: {e}")))?;
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(context.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let upload_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| init_error("vkCreateCommandPool", e))?;

        let mut shared = Self {
            allocator: Mutex::new(allocator),
            queue: Mutex::new(queue),
            upload_pool: Mutex::new(upload_pool),
            samplers: HashMap::new(),
            context,
        };
        for wrap in [TextureWrapMode::Clamp, TextureWrapMode::Repeat] {
            for filter in [TextureMinMagFilter::Nearest, TextureMinMagFilter::Linear] {
                let address: vk::SamplerAddressMode = wrap.into_vk();
                let info = vk::SamplerCreateInfo::default()
                    .mag_filter(filter.into_vk())
                    .min_filter(filter.into_vk())
                    .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
                    .address_mode_u(address)
                    .address_mode_v(address)
                    .address_mode_w(address)
                    .max_lod(0.0);
                let sampler = unsafe { shared.device().create_sampler(&info, None) }
                    .map_err(|e| init_error("vkCreateSampler", e))?;
                shared.samplers.insert((wrap, filter), sampler);
            }
        }
        Ok(shared)
    }

    pub(crate) fn context(&self) -> &VulkanContext {
        &self.context
    }

    pub(crate) fn device(&self) -> &ash::Device {
        self.context.device()
    }

    /// The cached sampler for a wrap and filter combination.
    pub(crate) fn sampler(&self, wrap: TextureWrapMode, filter: TextureMinMagFilter) -> vk::Sampler {
        self.samplers
            .get(&(wrap, filter))
            .copied()
            .unwrap_or_default()
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation, ResourceError> {
        lock(&self.allocator)
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(allocator_error)
    }

    fn free(&self, allocation: Allocation) {
        if let Err(e) = lock(&self.allocator).free(allocation) {
            log::error!("VulkanShared: failed to free an allocation: {e}");
        }
    }

    /// Records with `record` into a transient command buffer, submits it and waits.
    pub(crate) fn immediate_submit(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<(), ResourceError> {
        let device = self.device();
        let pool = lock(&self.upload_pool);
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| vk_error("vkAllocateCommandBuffers", e))?
            .into_iter()
            .next()
            .ok_or_else(|| ResourceError::BackendError("no upload command buffer".into()))?;
        let result = unsafe { self.run_once(command_buffer, record) };
        unsafe { device.free_command_buffers(*pool, &[command_buffer]) };
        result.map_err(|e| vk_error("upload submission", e))
    }

    unsafe fn run_once(
        &self,
        command_buffer: vk::CommandBuffer,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> Result<(), vk::Result> {
        let device = self.device();
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device.begin_command_buffer(command_buffer, &begin)?;
        record(device, command_buffer);
        device.end_command_buffer(command_buffer)?;

        let fence = device.create_fence(&vk::FenceCreateInfo::default(), None)?;
        let buffers = [command_buffer];
        let submit = vk::SubmitInfo::default().command_buffers(&buffers);
        let submitted = {
            let queue = lock(&self.queue);
            device.queue_submit(*queue, &[submit], fence)
        };
        let result = submitted.and_then(|()| device.wait_for_fences(&[fence], true, u64::MAX));
        device.destroy_fence(fence, None);
        result
    }

    /// Creates a host-visible buffer.
    pub(crate) fn create_buffer(
        self: &Arc<Self>,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Result<VulkanBuffer, ResourceError> {
        let device = self.device();
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { device.create_buffer(&info, None) }
            .map_err(|e| vk_error("vkCreateBuffer", e))?;
        let buffer = VulkanBuffer {
            shared: self.clone(),
            raw,
            allocation: Mutex::new(None),
            size,
        };
        let requirements = unsafe { device.get_buffer_memory_requirements(raw) };
        let allocation = self.allocate(name, requirements, MemoryLocation::CpuToGpu, true)?;
        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        *lock(&buffer.allocation) = Some(allocation);
        unsafe { device.bind_buffer_memory(raw, memory, offset) }
            .map_err(|e| vk_error("vkBindBufferMemory", e))?;
        Ok(buffer)
    }

    /// Creates a device-local image with its view, left in `SHADER_READ_ONLY_OPTIMAL`.
    pub(crate) fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
        usage: vk::ImageUsageFlags,
    ) -> Result<VulkanTexture, ResourceError> {
        let device = self.device();
        let format: vk::Format = descriptor.format.into_vk();
        let info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: descriptor.extent.width,
                height: descriptor.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { device.create_image(&info, None) }
            .map_err(|e| vk_error("vkCreateImage", e))?;
        let mut texture = VulkanTexture {
            shared: self.clone(),
            image,
            view: vk::ImageView::null(),
            allocation: None,
            owned: true,
            format,
            descriptor: *descriptor,
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = self.allocate("prism texture", requirements, MemoryLocation::GpuOnly, false)?;
        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        texture.allocation = Some(allocation);
        unsafe { device.bind_image_memory(image, memory, offset) }
            .map_err(|e| vk_error("vkBindImageMemory", e))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(whole_image(view_aspect(format)));
        texture.view = unsafe { device.create_image_view(&view_info, None) }
            .map_err(|e| vk_error("vkCreateImageView", e))?;

        let transition = LayoutTransition {
            image,
            aspect: barrier_aspect(format),
            old_layout: vk::ImageLayout::UNDEFINED,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        self.immediate_submit(|device, command_buffer| unsafe {
            record_transitions(device, command_buffer, &[transition]);
        })?;
        Ok(texture)
    }
}

impl Drop for VulkanShared {
    fn drop(&mut self) {
        let device = self.context.device();
        unsafe {
            if let Err(e) = device.device_wait_idle() {
                log::error!("VulkanShared: vkDeviceWaitIdle failed on teardown: {e}");
            }
            for sampler in self.samplers.values() {
                device.destroy_sampler(*sampler, None);
            }
            device.destroy_command_pool(*lock(&self.upload_pool), None);
        }
    }
}

/// A host-visible `VkBuffer` with its memory.
pub struct VulkanBuffer {
    shared: Arc<VulkanShared>,
    raw: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
    size: u64,
}

impl VulkanBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>, ResourceError> {
        let end = offset
            .checked_add(len as u64)
            .filter(|end| *end <= self.size)
            .ok_or(ResourceError::OutOfBounds)?;
        Ok(offset as usize..end as usize)
    }

    pub(crate) fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let range = self.range(offset, data.len())?;
        let mut allocation = lock(&self.allocation);
        let mapped = allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| ResourceError::BackendError("buffer memory is not mapped".into()))?;
        mapped
            .get_mut(range)
            .ok_or(ResourceError::OutOfBounds)?
            .copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let range = self.range(offset, out.len())?;
        let allocation = lock(&self.allocation);
        let mapped = allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .ok_or_else(|| ResourceError::BackendError("buffer memory is not mapped".into()))?;
        out.copy_from_slice(mapped.get(range).ok_or(ResourceError::OutOfBounds)?);
        Ok(())
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.shared.device().destroy_buffer(self.raw, None) };
        let allocation = self
            .allocation
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(allocation) = allocation {
            self.shared.free(allocation);
        }
    }
}

/// A `VkImage` and its view.
///
/// Imported images belong to the embedding application and are never destroyed.
pub struct VulkanTexture {
    shared: Arc<VulkanShared>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    owned: bool,
    format: vk::Format,
    descriptor: TextureDescriptor,
}

impl VulkanTexture {
    pub(crate) fn borrowed(
        shared: &Arc<VulkanShared>,
        image: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        descriptor: TextureDescriptor,
    ) -> Self {
        Self {
            shared: shared.clone(),
            image,
            view,
            allocation: None,
            owned: false,
            format,
            descriptor,
        }
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let device = self.shared.device();
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.shared.free(allocation);
        }
    }
}

pub struct VulkanShader {
    pub(crate) shared: Arc<VulkanShared>,
    pub(crate) raw: vk::ShaderModule,
}

impl VulkanShader {
    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        unsafe { self.shared.device().destroy_shader_module(self.raw, None) };
    }
}

/// A `VkRenderPass` created for one attachment shape.
pub struct VulkanRenderPass {
    pub(crate) shared: Arc<VulkanShared>,
    pub(crate) raw: vk::RenderPass,
    pub(crate) depth_format: Option<vk::Format>,
}

impl VulkanRenderPass {
    pub fn raw(&self) -> vk::RenderPass {
        self.raw
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe { self.shared.device().destroy_render_pass(self.raw, None) };
    }
}

/// A `VkFramebuffer` and the layout transitions recorded around passes into it.
pub struct VulkanFramebuffer {
    pub(crate) shared: Arc<VulkanShared>,
    pub(crate) raw: vk::Framebuffer,
    pub(crate) begin_transitions: Vec<LayoutTransition>,
    pub(crate) end_transitions: Vec<LayoutTransition>,
}

impl VulkanFramebuffer {
    pub fn raw(&self) -> vk::Framebuffer {
        self.raw
    }

    pub fn begin_transitions(&self) -> &[LayoutTransition] {
        &self.begin_transitions
    }
}

impl Drop for VulkanFramebuffer {
    fn drop(&mut self) {
        unsafe { self.shared.device().destroy_framebuffer(self.raw, None) };
    }
}

/// A graphics pipeline with the layouts it was created against.
///
/// Null handles are left by a creation that failed midway; destroying them is a
/// no-op.
pub struct VulkanPipeline {
    pub(crate) shared: Arc<VulkanShared>,
    pub(crate) raw: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl VulkanPipeline {
    pub fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn set_layouts(&self) -> &[vk::DescriptorSetLayout] {
        &self.set_layouts
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        let device = self.shared.device();
        unsafe {
            device.destroy_pipeline(self.raw, None);
            device.destroy_pipeline_layout(self.layout, None);
            for set_layout in &self.set_layouts {
                device.destroy_descriptor_set_layout(*set_layout, None);
            }
        }
    }
}

pub struct VulkanDescriptorPool {
    pub(crate) shared: Arc<VulkanShared>,
    pub(crate) raw: vk::DescriptorPool,
}

impl Drop for VulkanDescriptorPool {
    fn drop(&mut self) {
        // Sets allocated from the pool are freed with it.
        unsafe { self.shared.device().destroy_descriptor_pool(self.raw, None) };
    }
}

/// One descriptor set per shader stage, in stage order.
#[derive(Debug)]
pub struct VulkanDescriptorGroup {
    pub(crate) sets: Vec<vk::DescriptorSet>,
}

impl VulkanDescriptorGroup {
    pub fn sets(&self) -> &[vk::DescriptorSet] {
        &self.sets
    }
}
