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

use super::resources::VulkanShared;
use ash::vk;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One image layout change recorded around a render pass or an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
}

/// The accesses and pipeline stages that touch an image in `layout`.
pub fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        _ => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
    }
}

/// Records one `vkCmdPipelineBarrier` covering every transition.
///
/// # Safety
/// `command_buffer` must be recording on `device`, outside a render pass.
pub(crate) unsafe fn record_transitions(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    transitions: &[LayoutTransition],
) {
    if transitions.is_empty() {
        return;
    }
    let mut src_stage = vk::PipelineStageFlags::empty();
    let mut dst_stage = vk::PipelineStageFlags::empty();
    let barriers: Vec<vk::ImageMemoryBarrier<'_>> = transitions
        .iter()
        .map(|transition| {
            let (src_access, src) = layout_access(transition.old_layout);
            let (dst_access, dst) = layout_access(transition.new_layout);
            src_stage |= src;
            dst_stage |= dst;
            vk::ImageMemoryBarrier::default()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .old_layout(transition.old_layout)
                .new_layout(transition.new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(transition.image)
                .subresource_range(whole_image(transition.aspect))
        })
        .collect();
    device.cmd_pipeline_barrier(
        command_buffer,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &barriers,
    );
}

/// The single mip level and array layer every prism image has.
pub(crate) fn whole_image(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// A primary `VkCommandBuffer` with its own pool and completion fence.
///
/// Beginning a buffer that is still executing waits for its fence first, so a swap
/// slot's buffer is only rewritten once the GPU is done with it.
pub struct VulkanCommandBuffer {
    shared: Arc<VulkanShared>,
    pool: vk::CommandPool,
    raw: vk::CommandBuffer,
    fence: vk::Fence,
    pending: AtomicBool,
    pub(crate) is_recording: bool,
    /// Transitions to apply when the open render pass ends.
    pub(crate) end_transitions: Vec<LayoutTransition>,
}

impl VulkanCommandBuffer {
    pub(crate) fn new(shared: &Arc<VulkanShared>) -> Result<Self, vk::Result> {
        let device = shared.device();
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(shared.context().queue_family_index());
        let pool = unsafe { device.create_command_pool(&pool_info, None) }?;
        let mut buffer = Self {
            shared: shared.clone(),
            pool,
            raw: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            pending: AtomicBool::new(false),
            is_recording: false,
            end_transitions: Vec::new(),
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { device.allocate_command_buffers(&alloc_info) }?;
        buffer.raw = buffers
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)?;
        buffer.fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
        Ok(buffer)
    }

    /// The native handle commands are recorded into.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// `true` between `begin_command_buffer` and `end_command_buffer`.
    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// `true` while a submission of this buffer may still be executing.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Marks the buffer as submitted. Returns the previous pending state.
    pub(crate) fn mark_pending(&self) -> bool {
        self.pending.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.store(false, Ordering::Release);
    }

    /// Blocks until the last submission finished and rearms the fence.
    pub(crate) fn wait_completion(&self) -> Result<(), vk::Result> {
        if !self.is_pending() {
            return Ok(());
        }
        let device = self.shared.device();
        unsafe {
            device.wait_for_fences(&[self.fence], true, u64::MAX)?;
            device.reset_fences(&[self.fence])?;
        }
        self.clear_pending();
        Ok(())
    }

    pub(crate) fn reset(&mut self) -> Result<(), vk::Result> {
        self.wait_completion()?;
        self.end_transitions.clear();
        let device = self.shared.device();
        unsafe {
            device.reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
            device.begin_command_buffer(self.raw, &vk::CommandBufferBeginInfo::default())?;
        }
        self.is_recording = true;
        Ok(())
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.wait_completion() {
            log::error!("VulkanCommandBuffer: waiting for the last submission failed: {e}");
        }
        let device = self.shared.device();
        unsafe {
            device.destroy_fence(self.fence, None);
            // Destroying the pool frees the buffer allocated from it.
            device.destroy_command_pool(self.pool, None);
        }
    }
}

impl std::fmt::Debug for VulkanCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanCommandBuffer")
            .field("raw", &self.raw)
            .field("is_recording", &self.is_recording)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_layouts_wait_on_attachment_stages() {
        let (access, stage) = layout_access(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert_eq!(stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let (access, stage) = layout_access(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert!(access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(stage.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
    }

    #[test]
    fn undefined_layout_has_nothing_to_wait_for() {
        let (access, stage) = layout_access(vk::ImageLayout::UNDEFINED);
        assert!(access.is_empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn whole_image_covers_one_level_and_layer() {
        let range = whole_image(vk::ImageAspectFlags::DEPTH);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.layer_count, 1);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }
}
