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

//! [`Backend`] implementation on Direct3D 12.

use super::command::{record_transitions, Dx12CommandBuffer};
use super::context::Dx12Context;
use super::conversions::{
    clear_color, from_dxgi_format, split_semantic, texture_formats, IntoD3d12, TextureFormats,
};
use super::descriptors::{
    constant_buffer_view_size, null_stage_writes, sampler_slot, stage_writes, TableWrite,
    CBV_SRV_PER_GROUP,
};
use super::resources::{
    dx_error, lock, offset_cpu, offset_gpu, submission_error, texture_desc, Dx12Buffer, Dx12DescriptorGroup,
    Dx12DescriptorPool, Dx12Framebuffer, Dx12Pipeline, Dx12RenderPassLayout, Dx12Shader,
    Dx12Shared, Dx12Texture, Transition, SHADER_RESOURCE_STATE,
};
use super::swapchain::Dx12Swapchain;
use crate::graphics::platform_error;
use prism_core::math::{Extent2D, Rect2D, Viewport};
use prism_core::renderer::{
    Backend, BufferDescriptor, Format, FramebufferAttachments, IndexFormat, PipelineDescriptor,
    PipelineError, RenderError, RenderPassBeginInfo, RenderPassPipelineStateKey, ResourceError,
    ScreenTarget, ShaderError, ShaderStage, StageResources, TextureDescriptor, TextureUsage,
};
use std::collections::HashMap;
use std::ffi::CString;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use windows::core::PCSTR;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

/// Magic of the container every DXBC and DXIL shader is stored in.
pub const DXBC_MAGIC: &[u8; 4] = b"DXBC";

const DEFAULT_DEPTH_FORMAT: Format = Format::D32Float;

struct FrameState {
    current: usize,
}

/// The Direct3D 12 backend.
///
/// With a [`Dx12Swapchain`] the swap slots are its back buffers. Without one the
/// backend renders offscreen only and rotates through `frames_in_flight` slots.
///
/// The binding group table always spans every stage. Draws bind a sub-range of
/// stages; groups reused from a pool null the stages outside it.
pub struct Dx12Backend {
    shared: Arc<Dx12Shared>,
    swapchain: Option<Arc<dyn Dx12Swapchain>>,
    slot_count: usize,
    frames: Mutex<FrameState>,
    external: Mutex<HashMap<u64, ID3D12Resource>>,
}

// Registered external resources are free-threaded COM objects.
unsafe impl Send for Dx12Backend {}
unsafe impl Sync for Dx12Backend {}

impl Dx12Backend {
    /// Creates a backend presenting through `swapchain`.
    pub fn new(context: Dx12Context, swapchain: Arc<dyn Dx12Swapchain>) -> Result<Self, RenderError> {
        let slot_count = swapchain.buffer_count();
        Self::build(context, Some(swapchain), slot_count)
    }

    /// Creates a backend without presentation, cycling `frames_in_flight` slots.
    pub fn headless(context: Dx12Context, frames_in_flight: usize) -> Result<Self, RenderError> {
        Self::build(context, None, frames_in_flight)
    }

    fn build(
        context: Dx12Context,
        swapchain: Option<Arc<dyn Dx12Swapchain>>,
        slot_count: usize,
    ) -> Result<Self, RenderError> {
        if slot_count == 0 {
            return Err(RenderError::InitializationFailed(
                "at least one swap slot is required".into(),
            ));
        }
        let shared = Arc::new(Dx12Shared::new(context)?);
        let current = swapchain.as_ref().map_or(0, |s| s.current_index() % slot_count);
        log::info!(
            "Direct3D 12 backend created with {} swap slots ({}).",
            slot_count,
            if swapchain.is_some() { "presenting" } else { "headless" }
        );
        Ok(Self {
            shared,
            swapchain,
            slot_count,
            frames: Mutex::new(FrameState { current }),
            external: Mutex::new(HashMap::new()),
        })
    }

    pub fn context(&self) -> &Dx12Context {
        self.shared.context()
    }

    /// The format offscreen depth textures must use to be rendered to.
    pub fn depth_format(&self) -> Format {
        DEFAULT_DEPTH_FORMAT
    }

    /// Makes a texture owned by the embedding application available to
    /// [`Backend::import_texture`] under `id`.
    ///
    /// The resource must be in `ALL_SHADER_RESOURCE` outside render passes.
    pub fn register_external_texture(&self, id: u64, resource: ID3D12Resource) {
        lock(&self.external).insert(id, resource);
    }

    /// Presents the current back buffer.
    pub fn present(&self) -> Result<(), RenderError> {
        let Some(swapchain) = &self.swapchain else {
            return Err(RenderError::SubmissionFailed(
                "a headless backend has nothing to present".into(),
            ));
        };
        swapchain
            .present()
            .map_err(|e| RenderError::SubmissionFailed(platform_error("IDXGISwapChain::Present", e)))
    }

    /// Copies the pixels of `texture` into `out`, tightly packed.
    ///
    /// Blocks until the copy finished. Meant for tests and screenshots.
    pub fn read_texture(&self, texture: &Dx12Texture, out: &mut [u8]) -> Result<(), ResourceError> {
        let footprint = self.footprint(texture, out.len())?;
        let staging = Dx12Buffer::new(
            &self.shared,
            footprint.total,
            D3D12_HEAP_TYPE_READBACK,
            D3D12_RESOURCE_STATE_COPY_DEST,
        )?;
        let resource = texture.resource().clone();
        let to_copy = Transition {
            resource: resource.clone(),
            before: SHADER_RESOURCE_STATE,
            after: D3D12_RESOURCE_STATE_COPY_SOURCE,
        };
        self.shared.immediate_submit(|list| unsafe {
            record_transitions(list, std::slice::from_ref(&to_copy));
            let dst = placed_location(staging.resource(), footprint.layout);
            let src = subresource_location(&resource);
            list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            record_transitions(list, &[to_copy.reversed()]);
        })?;
        for (row, chunk) in out.chunks_exact_mut(footprint.row_bytes).enumerate() {
            staging.read(footprint.layout.Offset + row as u64 * footprint.pitch(), chunk)?;
        }
        Ok(())
    }

    fn footprint(&self, texture: &Dx12Texture, data_len: usize) -> Result<Footprint, ResourceError> {
        let descriptor = texture.descriptor();
        if descriptor.format == Format::D24UnormS8Uint {
            return Err(ResourceError::BackendError(
                "depth-stencil textures cannot be copied from the CPU".into(),
            ));
        }
        let row_bytes = descriptor.extent.width as usize * descriptor.format.bytes_per_pixel() as usize;
        if row_bytes == 0 || data_len != row_bytes * descriptor.extent.height as usize {
            return Err(ResourceError::OutOfBounds);
        }
        let desc = unsafe { texture.resource().GetDesc() };
        let mut layout = D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default();
        let mut total = 0u64;
        unsafe {
            self.shared.device().GetCopyableFootprints(
                &desc,
                0,
                1,
                0,
                Some(&mut layout),
                None,
                None,
                Some(&mut total),
            )
        };
        Ok(Footprint {
            layout,
            total,
            row_bytes,
        })
    }

    fn recording(command_buffer: &Dx12CommandBuffer) -> Option<&ID3D12GraphicsCommandList> {
        if command_buffer.is_recording() {
            Some(command_buffer.list())
        } else {
            log::warn!("Dx12Backend: command recorded outside begin/end, ignored.");
            None
        }
    }

    fn write_table(&self, group: &Dx12DescriptorGroup, write: TableWrite<D3D12_CONSTANT_BUFFER_VIEW_DESC, &Dx12Texture>) {
        let device = self.shared.device();
        let increment = self.shared.increments.cbv_srv;
        match write {
            TableWrite::ConstantBuffer { slot, buffer } => {
                let desc = buffer.unwrap_or_default();
                unsafe { device.CreateConstantBufferView(Some(&desc), group.slot(slot, increment)) };
            }
            TableWrite::ShaderResource { slot, texture } => {
                let handle = group.slot(slot, increment);
                match texture {
                    Some(texture) => unsafe {
                        device.CreateShaderResourceView(
                            texture.resource(),
                            Some(&srv_desc(texture.formats().shader_resource)),
                            handle,
                        )
                    },
                    None => unsafe {
                        device.CreateShaderResourceView(
                            None::<&ID3D12Resource>,
                            Some(&srv_desc(DXGI_FORMAT_R8G8B8A8_UNORM)),
                            handle,
                        )
                    },
                }
            }
        }
    }

    fn rtv_heap(&self, resource: &ID3D12Resource) -> Result<ID3D12DescriptorHeap, ResourceError> {
        let heap = self.shared.create_heap(D3D12_DESCRIPTOR_HEAP_TYPE_RTV, 1, false)?;
        unsafe {
            self.shared.device().CreateRenderTargetView(
                resource,
                None,
                heap.GetCPUDescriptorHandleForHeapStart(),
            )
        };
        Ok(heap)
    }

    fn dsv_heap(&self, resource: &ID3D12Resource, format: DXGI_FORMAT) -> Result<ID3D12DescriptorHeap, ResourceError> {
        let heap = self.shared.create_heap(D3D12_DESCRIPTOR_HEAP_TYPE_DSV, 1, false)?;
        let desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
            Flags: D3D12_DSV_FLAG_NONE,
            Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
            },
        };
        unsafe {
            self.shared.device().CreateDepthStencilView(
                resource,
                Some(&desc),
                heap.GetCPUDescriptorHandleForHeapStart(),
            )
        };
        Ok(heap)
    }

    fn screen_depth_format(&self) -> Option<DXGI_FORMAT> {
        let depth = self.swapchain.as_ref()?.depth_buffer()?;
        let format = from_dxgi_format(unsafe { depth.GetDesc() }.Format)?;
        Some(texture_formats(format).attachment)
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        if let Err(e) = self.shared.wait_idle() {
            log::error!("Dx12Backend: waiting for the queue failed on teardown: {e}");
        }
    }
}

struct Footprint {
    layout: D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
    total: u64,
    row_bytes: usize,
}

impl Footprint {
    fn pitch(&self) -> u64 {
        u64::from(self.layout.Footprint.RowPitch)
    }
}

fn srv_desc(format: DXGI_FORMAT) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: format,
        ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
            Texture2D: D3D12_TEX2D_SRV {
                MostDetailedMip: 0,
                MipLevels: 1,
                PlaneSlice: 0,
                ResourceMinLODClamp: 0.0,
            },
        },
    }
}

fn subresource_location(resource: &ID3D12Resource) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
    }
}

fn placed_location(
    resource: &ID3D12Resource,
    footprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT,
) -> D3D12_TEXTURE_COPY_LOCATION {
    D3D12_TEXTURE_COPY_LOCATION {
        pResource: unsafe { std::mem::transmute_copy(resource) },
        Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
        Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
            PlacedFootprint: footprint,
        },
    }
}

fn attachment_transitions(resource: &ID3D12Resource, before: D3D12_RESOURCE_STATES, during: D3D12_RESOURCE_STATES) -> (Transition, Transition) {
    let begin = Transition {
        resource: resource.clone(),
        before,
        after: during,
    };
    let end = begin.reversed();
    (begin, end)
}

impl Backend for Dx12Backend {
    type Buffer = Dx12Buffer;
    type Texture = Dx12Texture;
    type Shader = Dx12Shader;
    type Pipeline = Dx12Pipeline;
    type CompatibleLayout = Dx12RenderPassLayout;
    type Framebuffer = Dx12Framebuffer;
    type DescriptorPool = Dx12DescriptorPool;
    type BindingGroup = Dx12DescriptorGroup;
    type CommandBuffer = Dx12CommandBuffer;

    const NAME: &'static str = "dx12";

    fn swap_count(&self) -> usize {
        self.slot_count
    }

    fn current_swap_index(&self) -> usize {
        lock(&self.frames).current
    }

    fn new_frame(&self) -> Result<(), RenderError> {
        let mut frames = lock(&self.frames);
        frames.current = match &self.swapchain {
            Some(swapchain) => swapchain.current_index() % self.slot_count,
            None => (frames.current + 1) % self.slot_count,
        };
        Ok(())
    }

    fn submit(&self, command_buffer: &Dx12CommandBuffer) -> Result<(), RenderError> {
        if command_buffer.is_recording() {
            return Err(RenderError::SubmissionFailed(
                "command list is still recording".to_string(),
            ));
        }
        command_buffer
            .wait_completion()
            .map_err(|e| submission_error("SetEventOnCompletion", e))?;
        let value = self
            .shared
            .execute(command_buffer.list())
            .map_err(|e| submission_error("ExecuteCommandLists", e))?;
        command_buffer.mark_submitted(value);
        Ok(())
    }

    fn wait_idle(&self) {
        if let Err(e) = self.shared.wait_idle() {
            log::error!("Dx12Backend: waiting for the queue failed: {e}");
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Dx12Buffer, ResourceError> {
        if descriptor.size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        Dx12Buffer::new(
            &self.shared,
            descriptor.size,
            D3D12_HEAP_TYPE_UPLOAD,
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )
    }

    fn write_buffer(&self, buffer: &Dx12Buffer, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        buffer.write(offset, data)
    }

    fn read_buffer(&self, buffer: &Dx12Buffer, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        buffer.read(offset, out)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<Dx12Texture, ResourceError> {
        let formats = texture_formats(descriptor.format);
        let mut flags = D3D12_RESOURCE_FLAG_NONE;
        if descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
        }
        if descriptor.usage.contains(TextureUsage::DEPTH_STENCIL) {
            flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        }
        let resource = self.shared.create_committed(
            D3D12_HEAP_TYPE_DEFAULT,
            &texture_desc(descriptor, formats.resource, flags),
            SHADER_RESOURCE_STATE,
        )?;
        Ok(Dx12Texture::new(resource, formats, *descriptor))
    }

    fn import_texture(&self, external_id: u64) -> Result<(Dx12Texture, TextureDescriptor), ResourceError> {
        let Some(resource) = lock(&self.external).get(&external_id).cloned() else {
            log::warn!("Dx12Backend: external texture {} is not registered.", external_id);
            return Err(ResourceError::NotFound);
        };
        let desc = unsafe { resource.GetDesc() };
        let format = from_dxgi_format(desc.Format).ok_or_else(|| {
            ResourceError::BackendError(format!("unsupported external format {:?}", desc.Format))
        })?;
        let mut usage = TextureUsage::SAMPLED | TextureUsage::EXTERNAL;
        if (desc.Flags & D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET).0 != 0 {
            usage.insert(TextureUsage::RENDER_TARGET);
        }
        if (desc.Flags & D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL).0 != 0 {
            usage.insert(TextureUsage::DEPTH_STENCIL);
        }
        let extent = u32::try_from(desc.Width)
            .map(|width| Extent2D::new(width, desc.Height))
            .map_err(|_| ResourceError::InvalidSize)?;
        let descriptor = TextureDescriptor {
            extent,
            format,
            usage,
        };
        let formats = TextureFormats {
            resource: desc.Format,
            ..texture_formats(format)
        };
        Ok((Dx12Texture::new(resource, formats, descriptor), descriptor))
    }

    fn write_texture(&self, texture: &Dx12Texture, data: &[u8]) -> Result<(), ResourceError> {
        let footprint = self.footprint(texture, data.len())?;
        let staging = Dx12Buffer::new(
            &self.shared,
            footprint.total,
            D3D12_HEAP_TYPE_UPLOAD,
            D3D12_RESOURCE_STATE_GENERIC_READ,
        )?;
        for (row, chunk) in data.chunks_exact(footprint.row_bytes).enumerate() {
            staging.write(footprint.layout.Offset + row as u64 * footprint.pitch(), chunk)?;
        }
        let resource = texture.resource().clone();
        let to_copy = Transition {
            resource: resource.clone(),
            before: SHADER_RESOURCE_STATE,
            after: D3D12_RESOURCE_STATE_COPY_DEST,
        };
        self.shared.immediate_submit(|list| unsafe {
            record_transitions(list, std::slice::from_ref(&to_copy));
            let dst = subresource_location(&resource);
            let src = placed_location(staging.resource(), footprint.layout);
            list.CopyTextureRegion(&dst, 0, 0, 0, &src, None);
            record_transitions(list, &[to_copy.reversed()]);
        })
    }

    fn create_shader(&self, bytecode: &[u8]) -> Result<Dx12Shader, ShaderError> {
        if !bytecode.starts_with(DXBC_MAGIC) {
            return Err(ShaderError::CreationFailed {
                details: "bytecode is not a DXBC or DXIL container".into(),
            });
        }
        Ok(Dx12Shader {
            bytecode: bytecode.to_vec(),
        })
    }

    fn screen_target(&self) -> ScreenTarget {
        match &self.swapchain {
            Some(swapchain) => ScreenTarget {
                extent: swapchain.extent(),
                format: from_dxgi_format(swapchain.format()).unwrap_or_else(|| {
                    log::warn!("Dx12Backend: unknown swap-chain format, assuming BGRA8.");
                    Format::B8G8R8A8Unorm
                }),
                has_depth: swapchain.depth_buffer().is_some(),
            },
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
    ) -> Result<Dx12RenderPassLayout, ResourceError> {
        let depth_format = if !key.has_depth {
            None
        } else if key.is_present_mode {
            Some(self.screen_depth_format().ok_or_else(|| {
                ResourceError::AttachmentMismatch("swap chain has no depth buffer".into())
            })?)
        } else {
            Some(texture_formats(DEFAULT_DEPTH_FORMAT).attachment)
        };
        Ok(Dx12RenderPassLayout {
            color_format: key.color_format.into_d3d12(),
            depth_format,
        })
    }

    fn create_framebuffer(
        &self,
        layout: &Dx12RenderPassLayout,
        attachments: &FramebufferAttachments<'_, Self>,
    ) -> Result<Dx12Framebuffer, ResourceError> {
        let mut begin_transitions = Vec::new();
        let mut end_transitions = Vec::new();
        let (rtv_heap, dsv_heap) = match attachments {
            FramebufferAttachments::Screen { slot, .. } => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| {
                    ResourceError::AttachmentMismatch("a headless backend has no screen".into())
                })?;
                let back_buffer = swapchain.back_buffer(*slot).map_err(|e| {
                    ResourceError::BackendError(platform_error("IDXGISwapChain::GetBuffer", e))
                })?;
                let (begin, end) = attachment_transitions(
                    &back_buffer,
                    D3D12_RESOURCE_STATE_PRESENT,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                );
                begin_transitions.push(begin);
                end_transitions.push(end);
                let dsv_heap = match (layout.depth_format, swapchain.depth_buffer()) {
                    (Some(format), Some(depth)) => Some(self.dsv_heap(&depth, format)?),
                    (None, _) => None,
                    (Some(_), None) => {
                        return Err(ResourceError::AttachmentMismatch(
                            "swap chain has no depth buffer".into(),
                        ))
                    }
                };
                (self.rtv_heap(&back_buffer)?, dsv_heap)
            }
            FramebufferAttachments::Offscreen { colors, depth, .. } => {
                let [color] = colors.as_slice() else {
                    return Err(ResourceError::AttachmentMismatch(format!(
                        "the Direct3D 12 backend renders to exactly one color texture, got {}",
                        colors.len()
                    )));
                };
                let (begin, end) = attachment_transitions(
                    color.resource(),
                    SHADER_RESOURCE_STATE,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                );
                begin_transitions.push(begin);
                end_transitions.push(end);
                let dsv_heap = match (depth, layout.depth_format) {
                    (Some(depth), Some(expected)) => {
                        let format = depth.formats().attachment;
                        if format != expected {
                            return Err(ResourceError::AttachmentMismatch(format!(
                                "depth texture is {:?}, render pass expects {:?}",
                                format, expected
                            )));
                        }
                        let (begin, end) = attachment_transitions(
                            depth.resource(),
                            SHADER_RESOURCE_STATE,
                            D3D12_RESOURCE_STATE_DEPTH_WRITE,
                        );
                        begin_transitions.push(begin);
                        end_transitions.push(end);
                        Some(self.dsv_heap(depth.resource(), format)?)
                    }
                    (None, None) => None,
                    _ => {
                        return Err(ResourceError::AttachmentMismatch(
                            "depth attachment does not match the render pass".into(),
                        ))
                    }
                };
                (self.rtv_heap(color.resource())?, dsv_heap)
            }
        };
        Ok(Dx12Framebuffer {
            rtv_heap,
            dsv_heap,
            depth_format: layout.depth_format,
            begin_transitions,
            end_transitions,
        })
    }

    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_, Self>,
    ) -> Result<Dx12Pipeline, PipelineError> {
        let label = descriptor.label.map(str::to_string);
        let compilation_failed = |details: String| PipelineError::CompilationFailed {
            label: label.clone(),
            details,
        };

        let semantics = descriptor
            .vertex_attributes
            .iter()
            .map(|attribute| {
                let (name, index) = split_semantic(&attribute.semantic);
                CString::new(name)
                    .map(|name| (name, index))
                    .map_err(|_| compilation_failed(format!("invalid semantic {:?}", attribute.semantic)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = descriptor
            .vertex_attributes
            .iter()
            .zip(&semantics)
            .map(|(attribute, (name, index))| D3D12_INPUT_ELEMENT_DESC {
                SemanticName: PCSTR(name.as_ptr().cast()),
                SemanticIndex: *index,
                Format: attribute.format.into_d3d12(),
                InputSlot: 0,
                AlignedByteOffset: attribute.offset,
                InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let layout = descriptor.layout;
        let mut blend_target = D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: false.into(),
            LogicOpEnable: false.into(),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_ZERO,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_ZERO,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        };
        if let Some(blend) = descriptor.blend {
            blend_target.BlendEnable = true.into();
            blend_target.SrcBlend = blend.src.into_d3d12();
            blend_target.DestBlend = blend.dst.into_d3d12();
            blend_target.BlendOp = blend.op_rgb.into_d3d12();
            blend_target.SrcBlendAlpha = blend.src_alpha.into_d3d12();
            blend_target.DestBlendAlpha = blend.dst_alpha.into_d3d12();
            blend_target.BlendOpAlpha = blend.op_alpha.into_d3d12();
        }
        let has_depth = layout.depth_format.is_some();
        let depth_write = if descriptor.depth_write {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        };

        let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(self.shared.root_signature()) },
            VS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: descriptor.vertex_shader.bytecode.as_ptr().cast(),
                BytecodeLength: descriptor.vertex_shader.bytecode.len(),
            },
            PS: D3D12_SHADER_BYTECODE {
                pShaderBytecode: descriptor.pixel_shader.bytecode.as_ptr().cast(),
                BytecodeLength: descriptor.pixel_shader.bytecode.len(),
            },
            BlendState: D3D12_BLEND_DESC {
                AlphaToCoverageEnable: false.into(),
                IndependentBlendEnable: false.into(),
                RenderTarget: [blend_target; 8],
            },
            SampleMask: u32::MAX,
            RasterizerState: D3D12_RASTERIZER_DESC {
                FillMode: D3D12_FILL_MODE_SOLID,
                CullMode: descriptor.culling.into_d3d12(),
                FrontCounterClockwise: true.into(),
                DepthClipEnable: true.into(),
                ..Default::default()
            },
            DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: (has_depth && descriptor.depth_test).into(),
                DepthWriteMask: depth_write,
                DepthFunc: descriptor.depth_func.into_d3d12(),
                StencilEnable: false.into(),
                ..Default::default()
            },
            InputLayout: D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
            PrimitiveTopologyType: descriptor.topology.into_d3d12(),
            NumRenderTargets: 1,
            DSVFormat: layout.depth_format.unwrap_or(DXGI_FORMAT_UNKNOWN),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };
        desc.RTVFormats[0] = layout.color_format;

        let state = unsafe {
            self.shared
                .device()
                .CreateGraphicsPipelineState::<ID3D12PipelineState>(&desc)
        }
        .map_err(|e| compilation_failed(format!("CreateGraphicsPipelineState: {e}")))?;
        Ok(Dx12Pipeline {
            state,
            topology: descriptor.topology.into_d3d12(),
        })
    }

    fn create_descriptor_pool(&self, capacity: usize) -> Result<Dx12DescriptorPool, ResourceError> {
        let capacity = u32::try_from(capacity.max(1)).map_err(|_| ResourceError::InvalidSize)?;
        let count = capacity
            .checked_mul(CBV_SRV_PER_GROUP)
            .ok_or(ResourceError::InvalidSize)?;
        let heap = self
            .shared
            .create_heap(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV, count, true)?;
        Ok(Dx12DescriptorPool {
            heap,
            capacity,
            allocated: 0,
        })
    }

    fn allocate_binding_group(
        &self,
        pool: &mut Dx12DescriptorPool,
        _pipeline: &Dx12Pipeline,
    ) -> Result<Dx12DescriptorGroup, ResourceError> {
        if pool.allocated == pool.capacity {
            return Err(ResourceError::BackendError(format!(
                "descriptor heap holds only {} binding groups",
                pool.capacity
            )));
        }
        let increment = self.shared.increments.cbv_srv;
        let first = pool.allocated * CBV_SRV_PER_GROUP;
        let group = unsafe {
            Dx12DescriptorGroup {
                heap: pool.heap.clone(),
                cpu_start: offset_cpu(pool.heap.GetCPUDescriptorHandleForHeapStart(), first, increment),
                gpu_start: offset_gpu(pool.heap.GetGPUDescriptorHandleForHeapStart(), first, increment),
                sampler_key: Default::default(),
                sampler_table: self.shared.sampler_table(Default::default()),
                stages: Default::default(),
            }
        };
        pool.allocated += 1;
        // Fresh heap memory is undefined; every slot starts as a null descriptor.
        for stage in 0..ShaderStage::COUNT {
            for write in null_stage_writes(stage) {
                self.write_table(&group, write);
            }
        }
        Ok(group)
    }

    fn create_command_buffer(&self) -> Result<Dx12CommandBuffer, ResourceError> {
        Dx12CommandBuffer::new(&self.shared).map_err(|e| dx_error("CreateCommandList", e))
    }

    fn begin_command_buffer(&self, command_buffer: &mut Dx12CommandBuffer) {
        if let Err(e) = command_buffer.reset() {
            log::error!("Dx12Backend: resetting the command list failed: {e}");
            command_buffer.is_recording = false;
        }
    }

    fn end_command_buffer(&self, command_buffer: &mut Dx12CommandBuffer) {
        if !command_buffer.is_recording {
            return;
        }
        command_buffer.is_recording = false;
        if let Err(e) = unsafe { command_buffer.list().Close() } {
            log::error!("Dx12Backend: closing the command list failed: {e}");
        }
    }

    fn write_binding_group(
        &self,
        group: &mut Dx12DescriptorGroup,
        stage: ShaderStage,
        resources: &StageResources<'_, Self>,
    ) {
        let index = stage.index();
        let constant_buffer = resources
            .constant_buffer
            .map(|(buffer, range)| D3D12_CONSTANT_BUFFER_VIEW_DESC {
                BufferLocation: buffer.gpu_address(),
                SizeInBytes: constant_buffer_view_size(range, buffer.allocated_size()) as u32,
            });
        let textures = resources
            .textures
            .iter()
            .map(|slot| slot.as_ref().map(|slot| slot.texture));
        for write in stage_writes(index, constant_buffer, textures) {
            self.write_table(group, write);
        }

        let mut key = group.sampler_key.clear_stage(index);
        for (unit, slot) in resources.bound_textures() {
            key = key.with(sampler_slot(index, unit), slot.wrap, slot.filter);
        }
        if key != group.sampler_key {
            group.sampler_key = key;
            group.sampler_table = self.shared.sampler_table(key);
        }
        group.stages.mark_written(index);
    }

    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: &mut Dx12CommandBuffer,
        buffer: &Dx12Buffer,
        stride: u32,
        offset: u64,
    ) {
        let Some(list) = Self::recording(command_buffer) else { return };
        let view = D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: buffer.gpu_address() + offset,
            SizeInBytes: buffer.size().saturating_sub(offset) as u32,
            StrideInBytes: stride,
        };
        unsafe { list.IASetVertexBuffers(0, Some(&[view])) };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: &mut Dx12CommandBuffer,
        buffer: &Dx12Buffer,
        format: IndexFormat,
    ) {
        let Some(list) = Self::recording(command_buffer) else { return };
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: buffer.gpu_address(),
            SizeInBytes: buffer.size() as u32,
            Format: format.into_d3d12(),
        };
        unsafe { list.IASetIndexBuffer(Some(&view)) };
    }

    fn cmd_bind_pipeline(&self, command_buffer: &mut Dx12CommandBuffer, pipeline: &Dx12Pipeline) {
        let Some(list) = Self::recording(command_buffer) else { return };
        unsafe {
            list.SetPipelineState(pipeline.state());
            list.IASetPrimitiveTopology(pipeline.topology);
        }
    }

    fn cmd_bind_binding_group(
        &self,
        command_buffer: &mut Dx12CommandBuffer,
        _pipeline: &Dx12Pipeline,
        group: &Dx12DescriptorGroup,
        stages: Range<usize>,
    ) {
        if !command_buffer.is_recording() {
            log::warn!("Dx12Backend: command recorded outside begin/end, ignored.");
            return;
        }
        for stage in group.stages.take_stale(stages) {
            for write in null_stage_writes(stage) {
                self.write_table(group, write);
            }
        }
        let list = command_buffer.list().clone();
        unsafe {
            if command_buffer.heap.as_ref() != Some(&group.heap) {
                list.SetDescriptorHeaps(&[
                    Some(group.heap.clone()),
                    Some(self.shared.sampler_heap().clone()),
                ]);
                command_buffer.heap = Some(group.heap.clone());
            }
            list.SetGraphicsRootDescriptorTable(0, group.gpu_start);
            list.SetGraphicsRootDescriptorTable(1, group.sampler_table);
        }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut Dx12CommandBuffer,
        info: &RenderPassBeginInfo<'_, Self>,
    ) {
        let Some(list) = Self::recording(command_buffer) else { return };
        let framebuffer = info.framebuffer;
        let rtv = framebuffer.rtv();
        let dsv = framebuffer.dsv();
        unsafe {
            record_transitions(list, &framebuffer.begin_transitions);
            list.OMSetRenderTargets(1, Some(&rtv), false, dsv.as_ref().map(|h| h as *const _));
            if let Some(color) = info.clear_color {
                let value = clear_color(info.key.color_format, color);
                list.ClearRenderTargetView(rtv, value.as_ptr(), None);
            }
            if let (Some(depth), Some(dsv)) = (info.clear_depth, dsv) {
                let mut flags = D3D12_CLEAR_FLAG_DEPTH;
                if framebuffer.depth_format == Some(DXGI_FORMAT_D24_UNORM_S8_UINT) {
                    flags |= D3D12_CLEAR_FLAG_STENCIL;
                }
                list.ClearDepthStencilView(dsv, flags, depth, 0, None);
            }
        }
        command_buffer.end_transitions = framebuffer.end_transitions.clone();
    }

    fn cmd_end_render_pass(&self, command_buffer: &mut Dx12CommandBuffer) {
        if !command_buffer.is_recording() {
            log::warn!("Dx12Backend: command recorded outside begin/end, ignored.");
            return;
        }
        let transitions = std::mem::take(&mut command_buffer.end_transitions);
        record_transitions(command_buffer.list(), &transitions);
    }

    fn cmd_set_viewport(&self, command_buffer: &mut Dx12CommandBuffer, viewport: &Viewport) {
        let Some(list) = Self::recording(command_buffer) else { return };
        let viewport = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { list.RSSetViewports(&[viewport]) };
    }

    fn cmd_set_scissor(&self, command_buffer: &mut Dx12CommandBuffer, rect: &Rect2D) {
        let Some(list) = Self::recording(command_buffer) else { return };
        let scissor = RECT {
            left: rect.x,
            top: rect.y,
            right: rect.x.saturating_add(rect.width as i32),
            bottom: rect.y.saturating_add(rect.height as i32),
        };
        unsafe { list.RSSetScissorRects(&[scissor]) };
    }

    fn cmd_draw_indexed(&self, command_buffer: &mut Dx12CommandBuffer, index_count: u32) {
        let Some(list) = Self::recording(command_buffer) else { return };
        unsafe { list.DrawIndexedInstanced(index_count, 1, 0, 0, 0) };
    }
}

#[cfg(test)]
mod tests {
    use super::super::resources::buffer_desc;
    use super::*;

    #[test]
    fn shaders_must_be_dxbc_containers() {
        assert!(b"DXBC\0\0\0\0".starts_with(DXBC_MAGIC));
        assert!(!b"\x03\x02\x23\x07".starts_with(DXBC_MAGIC));
    }

    #[test]
    fn buffer_descriptions_are_row_major() {
        let desc = buffer_desc(512);
        assert_eq!(desc.Width, 512);
        assert_eq!(desc.Layout, D3D12_TEXTURE_LAYOUT_ROW_MAJOR);
        assert_eq!(desc.Format, DXGI_FORMAT_UNKNOWN);
    }
}
