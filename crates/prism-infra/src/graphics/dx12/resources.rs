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

//! Native objects of the Direct3D 12 backend and the state they share.

use super::context::Dx12Context;
use super::conversions::{sampler_desc, TextureFormats};
use super::descriptors::{
    SamplerKey, StageTracker, CBV_SRV_PER_GROUP, MAX_SAMPLER_TABLES, SAMPLERS_PER_GROUP,
    STAGE_COUNT, TEXTURES_PER_STAGE,
};
use prism_core::renderer::{RenderError, ResourceError, TextureDescriptor};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use windows::core::Interface;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D::{ID3DBlob, D3D_PRIMITIVE_TOPOLOGY};
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_FORMAT_UNKNOWN, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::DXGI_ERROR_DEVICE_REMOVED;

/// The state textures created by the backend stay in outside render passes.
pub const SHADER_RESOURCE_STATE: D3D12_RESOURCE_STATES = D3D12_RESOURCE_STATE_ALL_SHADER_RESOURCE;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn dx_error(context: &str, error: windows::core::Error) -> ResourceError {
    ResourceError::BackendError(format!("{context}: {error}"))
}

pub(crate) fn submission_error(context: &str, error: windows::core::Error) -> RenderError {
    if error.code() == DXGI_ERROR_DEVICE_REMOVED {
        RenderError::DeviceLost
    } else {
        RenderError::SubmissionFailed(format!("{context}: {error}"))
    }
}

pub(crate) fn offset_cpu(start: D3D12_CPU_DESCRIPTOR_HANDLE, index: u32, increment: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE {
        ptr: start.ptr + index as usize * increment as usize,
    }
}

pub(crate) fn offset_gpu(start: D3D12_GPU_DESCRIPTOR_HANDLE, index: u32, increment: u32) -> D3D12_GPU_DESCRIPTOR_HANDLE {
    D3D12_GPU_DESCRIPTOR_HANDLE {
        ptr: start.ptr + u64::from(index) * u64::from(increment),
    }
}

pub(crate) fn buffer_desc(size: u64) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: 0,
        Width: size,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: D3D12_RESOURCE_FLAG_NONE,
    }
}

pub(crate) fn texture_desc(descriptor: &TextureDescriptor, format: DXGI_FORMAT, flags: D3D12_RESOURCE_FLAGS) -> D3D12_RESOURCE_DESC {
    D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        Alignment: 0,
        Width: u64::from(descriptor.extent.width),
        Height: descriptor.extent.height,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: flags,
    }
}

/// Descriptor handle increments of the device, per heap type.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DescriptorIncrements {
    pub cbv_srv: u32,
    pub sampler: u32,
    pub rtv: u32,
    pub dsv: u32,
}

/// The shader-visible sampler heap, carved into tables of `SAMPLERS_PER_GROUP`.
///
/// Only one sampler heap can be set on a command list, so groups with the same
/// sampler states share one table.
pub(crate) struct SamplerTables {
    heap: ID3D12DescriptorHeap,
    tables: HashMap<SamplerKey, u32>,
}

impl SamplerTables {
    fn table(&mut self, device: &ID3D12Device, increment: u32, key: SamplerKey) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        let gpu_start = unsafe { self.heap.GetGPUDescriptorHandleForHeapStart() };
        let next = self.tables.len() as u32;
        let index = match self.tables.get(&key).copied() {
            Some(index) => index,
            None if next < MAX_SAMPLER_TABLES => {
                let cpu_start = unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() };
                for slot in 0..SAMPLERS_PER_GROUP {
                    let (wrap, filter) = key.get(slot);
                    let handle = offset_cpu(cpu_start, next * SAMPLERS_PER_GROUP + slot, increment);
                    unsafe { device.CreateSampler(&sampler_desc(wrap, filter), handle) };
                }
                self.tables.insert(key, next);
                next
            }
            None => {
                log::warn!(
                    "Dx12Backend: {} distinct sampler tables in use, falling back to clamped nearest sampling.",
                    MAX_SAMPLER_TABLES
                );
                self.tables.get(&SamplerKey::default()).copied().unwrap_or(0)
            }
        };
        offset_gpu(gpu_start, index * SAMPLERS_PER_GROUP, increment)
    }
}

struct UploadList {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
}

/// State shared by the backend and every object it creates.
pub(crate) struct Dx12Shared {
    root_signature: ID3D12RootSignature,
    sampler_heap: ID3D12DescriptorHeap,
    samplers: Mutex<SamplerTables>,
    fence: ID3D12Fence,
    fence_value: Mutex<u64>,
    upload: Mutex<UploadList>,
    pub(crate) increments: DescriptorIncrements,
    context: Dx12Context,
}

// Direct3D 12 objects are free-threaded; command lists are only touched under a lock.
unsafe impl Send for Dx12Shared {}
unsafe impl Sync for Dx12Shared {}

impl Dx12Shared {
    pub(crate) fn new(context: Dx12Context) -> Result<Self, RenderError> {
        let device = context.device();
        let init = |what: &str, e: windows::core::Error| RenderError::InitializationFailed(format!("{what}: {e}"));

        let increments = unsafe {
            DescriptorIncrements {
                cbv_srv: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV),
                sampler: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER),
                rtv: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV),
                dsv: device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_DSV),
            }
        };
        let root_signature = create_root_signature(device)?;
        let sampler_heap: ID3D12DescriptorHeap = unsafe {
            device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
                NumDescriptors: MAX_SAMPLER_TABLES * SAMPLERS_PER_GROUP,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                NodeMask: 0,
            })
        }
        .map_err(|e| init("CreateDescriptorHeap(sampler)", e))?;
        let mut samplers = SamplerTables {
            heap: sampler_heap.clone(),
            tables: HashMap::new(),
        };
        samplers.table(device, increments.sampler, SamplerKey::default());

        let fence: ID3D12Fence =
            unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }.map_err(|e| init("CreateFence", e))?;
        let allocator: ID3D12CommandAllocator = unsafe {
            device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
        }
        .map_err(|e| init("CreateCommandAllocator", e))?;
        let list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None::<&ID3D12PipelineState>)
        }
        .map_err(|e| init("CreateCommandList", e))?;
        unsafe { list.Close() }.map_err(|e| init("ID3D12GraphicsCommandList::Close", e))?;

        Ok(Self {
            root_signature,
            sampler_heap,
            samplers: Mutex::new(samplers),
            fence,
            fence_value: Mutex::new(0),
            upload: Mutex::new(UploadList { allocator, list }),
            increments,
            context,
        })
    }

    pub(crate) fn context(&self) -> &Dx12Context {
        &self.context
    }

    pub(crate) fn device(&self) -> &ID3D12Device {
        self.context.device()
    }

    pub(crate) fn root_signature(&self) -> &ID3D12RootSignature {
        &self.root_signature
    }

    pub(crate) fn sampler_heap(&self) -> &ID3D12DescriptorHeap {
        &self.sampler_heap
    }

    pub(crate) fn sampler_table(&self, key: SamplerKey) -> D3D12_GPU_DESCRIPTOR_HANDLE {
        lock(&self.samplers).table(self.device(), self.increments.sampler, key)
    }

    /// Signals the shared fence on the queue and returns the value it will reach.
    pub(crate) fn signal(&self) -> windows::core::Result<u64> {
        let mut value = lock(&self.fence_value);
        *value += 1;
        unsafe { self.context.queue().Signal(&self.fence, *value) }?;
        Ok(*value)
    }

    /// Blocks until the queue passed the signal `value`. Zero never blocks.
    pub(crate) fn wait_for(&self, value: u64) -> windows::core::Result<()> {
        if value == 0 || unsafe { self.fence.GetCompletedValue() } >= value {
            return Ok(());
        }
        // A null event makes the call block until the fence reaches the value.
        unsafe { self.fence.SetEventOnCompletion(value, HANDLE::default()) }
    }

    pub(crate) fn wait_idle(&self) -> windows::core::Result<()> {
        let value = self.signal()?;
        self.wait_for(value)
    }

    pub(crate) fn execute(&self, list: &ID3D12GraphicsCommandList) -> windows::core::Result<u64> {
        let list: ID3D12CommandList = list.cast()?;
        unsafe { self.context.queue().ExecuteCommandLists(&[Some(list)]) };
        self.signal()
    }

    /// Records a one-off command list, executes it and waits for it to finish.
    pub(crate) fn immediate_submit(&self, record: impl FnOnce(&ID3D12GraphicsCommandList)) -> Result<(), ResourceError> {
        let upload = lock(&self.upload);
        unsafe {
            upload.allocator.Reset().map_err(|e| dx_error("ID3D12CommandAllocator::Reset", e))?;
            upload
                .list
                .Reset(&upload.allocator, None::<&ID3D12PipelineState>)
                .map_err(|e| dx_error("ID3D12GraphicsCommandList::Reset", e))?;
        }
        record(&upload.list);
        unsafe { upload.list.Close() }.map_err(|e| dx_error("ID3D12GraphicsCommandList::Close", e))?;
        let value = self.execute(&upload.list).map_err(|e| dx_error("ExecuteCommandLists", e))?;
        self.wait_for(value).map_err(|e| dx_error("SetEventOnCompletion", e))
    }

    pub(crate) fn create_committed(
        &self,
        heap: D3D12_HEAP_TYPE,
        desc: &D3D12_RESOURCE_DESC,
        state: D3D12_RESOURCE_STATES,
    ) -> Result<ID3D12Resource, ResourceError> {
        let properties = D3D12_HEAP_PROPERTIES {
            Type: heap,
            ..Default::default()
        };
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device()
                .CreateCommittedResource(&properties, D3D12_HEAP_FLAG_NONE, desc, state, None, &mut resource)
        }
        .map_err(|e| dx_error("CreateCommittedResource", e))?;
        resource.ok_or_else(|| ResourceError::BackendError("CreateCommittedResource returned no resource".into()))
    }

    pub(crate) fn create_heap(
        &self,
        kind: D3D12_DESCRIPTOR_HEAP_TYPE,
        count: u32,
        shader_visible: bool,
    ) -> Result<ID3D12DescriptorHeap, ResourceError> {
        let flags = if shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };
        unsafe {
            self.device().CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: kind,
                NumDescriptors: count,
                Flags: flags,
                NodeMask: 0,
            })
        }
        .map_err(|e| dx_error("CreateDescriptorHeap", e))
    }
}

impl Drop for Dx12Shared {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            log::error!("Dx12Shared: waiting for the queue failed on teardown: {e}");
        }
    }
}

/// One root signature for every pipeline:
/// * table 0: CBVs `b0..b1` (one per stage) then SRVs `t0..t15` (eight per stage),
/// * table 1: samplers `s0..s15`, matching the SRV registers.
fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature, RenderError> {
    let range = |kind, count| D3D12_DESCRIPTOR_RANGE {
        RangeType: kind,
        NumDescriptors: count,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
    };
    let cbv_srv = [
        range(D3D12_DESCRIPTOR_RANGE_TYPE_CBV, STAGE_COUNT),
        range(D3D12_DESCRIPTOR_RANGE_TYPE_SRV, STAGE_COUNT * TEXTURES_PER_STAGE),
    ];
    let samplers = [range(D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER, SAMPLERS_PER_GROUP)];
    let table = |ranges: &[D3D12_DESCRIPTOR_RANGE]| D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                NumDescriptorRanges: ranges.len() as u32,
                pDescriptorRanges: ranges.as_ptr(),
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };
    let parameters = [table(&cbv_srv), table(&samplers)];
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
    };

    let mut blob: Option<ID3DBlob> = None;
    let mut message: Option<ID3DBlob> = None;
    let serialized = unsafe {
        D3D12SerializeRootSignature(&desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut blob, Some(&mut message))
    };
    if let Err(e) = serialized {
        let details = message.as_ref().map(|m| String::from_utf8_lossy(blob_bytes(m)).into_owned());
        return Err(RenderError::InitializationFailed(format!(
            "D3D12SerializeRootSignature: {e} {}",
            details.unwrap_or_default()
        )));
    }
    let blob = blob.ok_or_else(|| RenderError::InitializationFailed("empty root signature blob".into()))?;
    unsafe { device.CreateRootSignature(0, blob_bytes(&blob)) }
        .map_err(|e| RenderError::InitializationFailed(format!("CreateRootSignature: {e}")))
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

/// A buffer in an upload heap, mapped for its whole life.
///
/// Constant buffer views cover 256-byte multiples, so the resource is rounded up.
pub struct Dx12Buffer {
    resource: ID3D12Resource,
    mapped: *mut u8,
    size: u64,
    allocated: u64,
}

unsafe impl Send for Dx12Buffer {}
unsafe impl Sync for Dx12Buffer {}

impl Dx12Buffer {
    pub(crate) fn new(
        shared: &Dx12Shared,
        size: u64,
        heap: D3D12_HEAP_TYPE,
        state: D3D12_RESOURCE_STATES,
    ) -> Result<Self, ResourceError> {
        let allocated = size.div_ceil(256).saturating_mul(256).max(256);
        let resource = shared.create_committed(heap, &buffer_desc(allocated), state)?;
        let mut mapped = std::ptr::null_mut();
        unsafe { resource.Map(0, None, Some(&mut mapped)) }.map_err(|e| dx_error("ID3D12Resource::Map", e))?;
        Ok(Self {
            resource,
            mapped: mapped.cast(),
            size,
            allocated,
        })
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn allocated_size(&self) -> u64 {
        self.allocated
    }

    pub fn gpu_address(&self) -> u64 {
        unsafe { self.resource.GetGPUVirtualAddress() }
    }

    fn checked_range(&self, offset: u64, len: usize) -> Result<usize, ResourceError> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.allocated => Ok(offset as usize),
            _ => Err(ResourceError::OutOfBounds),
        }
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let start = self.checked_range(offset, data.len())?;
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.mapped.add(start), data.len()) };
        Ok(())
    }

    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let start = self.checked_range(offset, out.len())?;
        unsafe { std::ptr::copy_nonoverlapping(self.mapped.add(start), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

impl Drop for Dx12Buffer {
    fn drop(&mut self) {
        unsafe { self.resource.Unmap(0, None) };
    }
}

/// A texture resource with the formats its views use.
pub struct Dx12Texture {
    resource: ID3D12Resource,
    formats: TextureFormats,
    descriptor: TextureDescriptor,
}

unsafe impl Send for Dx12Texture {}
unsafe impl Sync for Dx12Texture {}

impl Dx12Texture {
    pub(crate) fn new(resource: ID3D12Resource, formats: TextureFormats, descriptor: TextureDescriptor) -> Self {
        Self {
            resource,
            formats,
            descriptor,
        }
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    pub fn formats(&self) -> TextureFormats {
        self.formats
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }
}

/// DXBC or DXIL bytecode, embedded into pipeline state objects at creation.
pub struct Dx12Shader {
    pub(crate) bytecode: Vec<u8>,
}

/// Direct3D 12 has no render pass object; pipelines only record attachment formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dx12RenderPassLayout {
    pub color_format: DXGI_FORMAT,
    pub depth_format: Option<DXGI_FORMAT>,
}

/// A resource state change recorded around a render pass.
#[derive(Clone)]
pub struct Transition {
    pub resource: ID3D12Resource,
    pub before: D3D12_RESOURCE_STATES,
    pub after: D3D12_RESOURCE_STATES,
}

impl Transition {
    pub fn reversed(&self) -> Self {
        Self {
            resource: self.resource.clone(),
            before: self.after,
            after: self.before,
        }
    }
}

/// CPU-only RTV and DSV heaps for the attachments of one render pass.
pub struct Dx12Framebuffer {
    pub(crate) rtv_heap: ID3D12DescriptorHeap,
    pub(crate) dsv_heap: Option<ID3D12DescriptorHeap>,
    pub(crate) depth_format: Option<DXGI_FORMAT>,
    pub(crate) begin_transitions: Vec<Transition>,
    pub(crate) end_transitions: Vec<Transition>,
}

unsafe impl Send for Dx12Framebuffer {}
unsafe impl Sync for Dx12Framebuffer {}

impl Dx12Framebuffer {
    pub fn rtv(&self) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        unsafe { self.rtv_heap.GetCPUDescriptorHandleForHeapStart() }
    }

    pub fn dsv(&self) -> Option<D3D12_CPU_DESCRIPTOR_HANDLE> {
        self.dsv_heap
            .as_ref()
            .map(|heap| unsafe { heap.GetCPUDescriptorHandleForHeapStart() })
    }
}

pub struct Dx12Pipeline {
    pub(crate) state: ID3D12PipelineState,
    pub(crate) topology: D3D_PRIMITIVE_TOPOLOGY,
}

unsafe impl Send for Dx12Pipeline {}
unsafe impl Sync for Dx12Pipeline {}

impl Dx12Pipeline {
    pub fn state(&self) -> &ID3D12PipelineState {
        &self.state
    }
}

/// A shader-visible CBV/SRV heap holding the binding groups of one swap slot.
pub struct Dx12DescriptorPool {
    pub(crate) heap: ID3D12DescriptorHeap,
    pub(crate) capacity: u32,
    pub(crate) allocated: u32,
}

unsafe impl Send for Dx12DescriptorPool {}

/// A `CBV_SRV_PER_GROUP` range of a pool's heap plus the sampler table it uses.
pub struct Dx12DescriptorGroup {
    pub(crate) heap: ID3D12DescriptorHeap,
    pub(crate) cpu_start: D3D12_CPU_DESCRIPTOR_HANDLE,
    pub(crate) gpu_start: D3D12_GPU_DESCRIPTOR_HANDLE,
    pub(crate) sampler_key: SamplerKey,
    pub(crate) sampler_table: D3D12_GPU_DESCRIPTOR_HANDLE,
    pub(crate) stages: StageTracker,
}

unsafe impl Send for Dx12DescriptorGroup {}

impl Dx12DescriptorGroup {
    pub(crate) fn slot(&self, slot: u32, increment: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        debug_assert!(slot < CBV_SRV_PER_GROUP);
        offset_cpu(self.cpu_start, slot, increment)
    }

    pub fn sampler_key(&self) -> SamplerKey {
        self.sampler_key
    }
}
