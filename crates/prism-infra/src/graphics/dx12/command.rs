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

use super::resources::{Dx12Shared, Transition};
use std::mem::ManuallyDrop;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use windows::Win32::Graphics::Direct3D12::*;

pub(crate) fn transition_barrier(transition: &Transition) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                // Borrowed without AddRef; the barrier never releases it.
                pResource: unsafe { std::mem::transmute_copy(&transition.resource) },
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: transition.before,
                StateAfter: transition.after,
            }),
        },
    }
}

pub(crate) fn record_transitions(list: &ID3D12GraphicsCommandList, transitions: &[Transition]) {
    if transitions.is_empty() {
        return;
    }
    let barriers: Vec<D3D12_RESOURCE_BARRIER> = transitions.iter().map(transition_barrier).collect();
    unsafe { list.ResourceBarrier(&barriers) };
}

/// A direct command list with its allocator, recorded for one swap slot.
///
/// `submitted` holds the fence value of the last submission; beginning the list
/// again waits for it so the allocator and the slot's descriptors can be reused.
pub struct Dx12CommandBuffer {
    shared: Arc<Dx12Shared>,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    submitted: AtomicU64,
    pub(crate) is_recording: bool,
    pub(crate) end_transitions: Vec<Transition>,
    pub(crate) heap: Option<ID3D12DescriptorHeap>,
}

unsafe impl Send for Dx12CommandBuffer {}

impl Dx12CommandBuffer {
    pub(crate) fn new(shared: &Arc<Dx12Shared>) -> windows::core::Result<Self> {
        let device = shared.device();
        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;
        let list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
        }?;
        unsafe { list.Close() }?;
        Ok(Self {
            shared: shared.clone(),
            allocator,
            list,
            submitted: AtomicU64::new(0),
            is_recording: false,
            end_transitions: Vec::new(),
            heap: None,
        })
    }

    pub fn list(&self) -> &ID3D12GraphicsCommandList {
        &self.list
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// Fence value of the last submission, zero before the first one.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_submitted(&self, value: u64) {
        self.submitted.store(value, Ordering::Release);
    }

    pub(crate) fn wait_completion(&self) -> windows::core::Result<()> {
        self.shared.wait_for(self.submitted())
    }

    /// Waits for the last submission, then reopens the list with the shared root signature.
    pub(crate) fn reset(&mut self) -> windows::core::Result<()> {
        self.wait_completion()?;
        self.end_transitions.clear();
        self.heap = None;
        unsafe {
            self.allocator.Reset()?;
            self.list.Reset(&self.allocator, None::<&ID3D12PipelineState>)?;
            self.list.SetGraphicsRootSignature(self.shared.root_signature());
        }
        self.is_recording = true;
        Ok(())
    }
}

impl Drop for Dx12CommandBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.wait_completion() {
            log::error!("Dx12CommandBuffer: waiting for the last submission failed: {e}");
        }
    }
}

impl std::fmt::Debug for Dx12CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dx12CommandBuffer")
            .field("is_recording", &self.is_recording)
            .field("submitted", &self.submitted())
            .finish_non_exhaustive()
    }
}
