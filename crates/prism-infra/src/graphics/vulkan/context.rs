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

use anyhow::{anyhow, Context};
use ash::vk;

/// The instance, device and queue family a [`VulkanBackend`](super::VulkanBackend) runs on.
///
/// A context built by [`headless`](Self::headless) owns its objects and destroys
/// them when dropped. One built by [`from_raw`](Self::from_raw) borrows objects the
/// embedding application keeps alive.
pub struct VulkanContext {
    _entry: Option<ash::Entry>,
    instance: ash::Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
    owned: bool,
}

impl VulkanContext {
    /// Wraps objects created by the embedding application.
    ///
    /// # Safety
    /// The handles must be valid, `queue_family_index` must support graphics, and the
    /// objects must outlive the context and every backend built from it.
    pub unsafe fn from_raw(
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Self {
        Self {
            _entry: None,
            instance,
            device,
            physical_device,
            queue_family_index,
            owned: false,
        }
    }

    /// Loads the system Vulkan loader and opens the first device with a graphics
    /// queue, without any surface.
    pub fn headless() -> anyhow::Result<Self> {
        let entry = unsafe { ash::Entry::load() }.context("failed to load the Vulkan loader")?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"prism")
            .engine_name(c"prism")
            .api_version(vk::API_VERSION_1_0);
        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance =
            unsafe { entry.create_instance(&instance_info, None) }.context("vkCreateInstance")?;

        match open_graphics_device(&instance) {
            Ok((physical_device, queue_family_index, device)) => {
                log::info!(
                    "Opened headless Vulkan device {:?} (queue family {}).",
                    physical_device,
                    queue_family_index
                );
                Ok(Self {
                    _entry: Some(entry),
                    instance,
                    device,
                    physical_device,
                    queue_family_index,
                    owned: true,
                })
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }
}

fn open_graphics_device(
    instance: &ash::Instance,
) -> anyhow::Result<(vk::PhysicalDevice, u32, ash::Device)> {
    let physical_devices =
        unsafe { instance.enumerate_physical_devices() }.context("vkEnumeratePhysicalDevices")?;
    let (physical_device, queue_family_index) = physical_devices
        .into_iter()
        .find_map(|physical_device| {
            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
            families
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|index| (physical_device, index as u32))
        })
        .ok_or_else(|| anyhow!("no Vulkan device exposes a graphics queue"))?;

    let priorities = [1.0];
    let queue_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_index)
        .queue_priorities(&priorities);
    let device_info =
        vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));
    let device = unsafe { instance.create_device(physical_device, &device_info, None) }
        .context("vkCreateDevice")?;
    Ok((physical_device, queue_family_index, device))
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                self.device.destroy_device(None);
                self.instance.destroy_instance(None);
            }
        }
    }
}
