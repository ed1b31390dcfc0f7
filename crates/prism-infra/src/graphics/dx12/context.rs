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

use anyhow::Context;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12CreateDevice, ID3D12CommandQueue, ID3D12Device, D3D12_COMMAND_LIST_TYPE_DIRECT,
    D3D12_COMMAND_QUEUE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIAdapter, IDXGIFactory4, DXGI_ADAPTER_FLAG_SOFTWARE,
    DXGI_CREATE_FACTORY_FLAGS,
};

/// The device and direct queue every object of the backend is created on.
pub struct Dx12Context {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
}

// Direct3D 12 devices and command queues are free-threaded.
unsafe impl Send for Dx12Context {}
unsafe impl Sync for Dx12Context {}

impl Dx12Context {
    /// Wraps a device and direct queue created by the embedding application.
    pub fn from_raw(device: ID3D12Device, queue: ID3D12CommandQueue) -> Self {
        Self { device, queue }
    }

    /// Creates a device on the first hardware adapter, or on WARP when none is usable.
    pub fn headless() -> anyhow::Result<Self> {
        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)) }
            .context("CreateDXGIFactory2")?;
        let device = match hardware_device(&factory) {
            Some(device) => device,
            None => {
                log::warn!("No hardware Direct3D 12 adapter, falling back to WARP.");
                let adapter: IDXGIAdapter =
                    unsafe { factory.EnumWarpAdapter() }.context("EnumWarpAdapter")?;
                create_device(&adapter)?
            }
        };
        let queue = unsafe {
            device.CreateCommandQueue::<ID3D12CommandQueue>(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .context("CreateCommandQueue")?;
        Ok(Self { device, queue })
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

fn create_device(adapter: &IDXGIAdapter) -> anyhow::Result<ID3D12Device> {
    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }
        .context("D3D12CreateDevice")?;
    device.context("D3D12CreateDevice returned no device")
}

fn hardware_device(factory: &IDXGIFactory4) -> Option<ID3D12Device> {
    (0..)
        .map_while(|index| unsafe { factory.EnumAdapters1(index) }.ok())
        .filter(|adapter| {
            unsafe { adapter.GetDesc1() }
                .map(|desc| desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 == 0)
                .unwrap_or(false)
        })
        .find_map(|adapter| {
            let adapter: IDXGIAdapter = windows::core::Interface::cast(&adapter).ok()?;
            match create_device(&adapter) {
                Ok(device) => Some(device),
                Err(e) => {
                    log::debug!("Skipping Direct3D 12 adapter: {e:#}");
                    None
                }
            }
        })
}
