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

use ash::vk;

/// An image the backend renders into but never destroys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
}

/// The presentation seam of the Vulkan backend.
///
/// The window layer owns the surface and `VkSwapchainKHR`; the backend only needs
/// to know which image to render into and when to hand it back.
pub trait VulkanSwapchain: Send + Sync {
    /// Number of swap-chain images, which is also the number of swap slots.
    fn image_count(&self) -> usize;

    fn extent(&self) -> vk::Extent2D;

    /// The color image at `index`.
    fn image(&self, index: usize) -> NativeImage;

    /// The depth image shared by every swap-chain image, if the surface has one.
    fn depth_image(&self) -> Option<NativeImage> {
        None
    }

    /// Acquires the next image. The returned semaphore is signaled once the image
    /// can be rendered to.
    fn acquire_next_image(&self) -> anyhow::Result<(usize, vk::Semaphore)>;

    /// Queues image `index` for presentation once `wait` is signaled.
    fn present(&self, queue: vk::Queue, index: usize, wait: vk::Semaphore) -> anyhow::Result<()>;
}
