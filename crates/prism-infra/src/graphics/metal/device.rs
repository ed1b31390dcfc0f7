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

//! [`Backend`] implementation on Metal.

use super::arguments::{SamplerKind, StageArguments, CONSTANT_BUFFER_INDEX, VERTEX_BUFFER_INDEX};
use super::command::{report_failure, MetalCommandBuffer};
use super::context::MetalContext;
use super::conversions::{
    clear_color, from_mtl_pixel_format, has_stencil, mtl_pixel_format, mtl_vertex_format, IntoMtl,
};
use super::resources::{
    lock, MetalArgumentPool, MetalBindingGroup, MetalBuffer, MetalFramebuffer, MetalPipeline,
    MetalRenderPassLayout, MetalShader, MetalTexture, Native,
};
use super::swapchain::MetalSwapchain;
use crate::graphics::platform_error;
use objc2::runtime::ProtocolObject;
use objc2_foundation::NSString;
use objc2_metal::{
    MTLBlitCommandEncoder, MTLBuffer, MTLCommandBuffer, MTLCommandEncoder, MTLCommandQueue,
    MTLCompareFunction, MTLDepthStencilDescriptor, MTLDevice, MTLLibrary, MTLLoadAction,
    MTLOrigin, MTLPixelFormat, MTLRenderCommandEncoder, MTLRenderPassDescriptor,
    MTLRenderPipelineDescriptor, MTLResourceOptions, MTLSamplerDescriptor, MTLSamplerState,
    MTLScissorRect, MTLSize, MTLStorageMode, MTLStoreAction, MTLTexture, MTLTextureDescriptor,
    MTLTextureUsage, MTLVertexDescriptor, MTLVertexStepFunction, MTLViewport, MTLWinding,
};
use prism_core::math::{Extent2D, Rect2D, Viewport};
use prism_core::renderer::{
    Backend, BufferDescriptor, Format, FramebufferAttachments, IndexFormat, PipelineDescriptor,
    PipelineError, RenderError, RenderPassBeginInfo, RenderPassPipelineStateKey, ResourceError,
    ScreenTarget, ShaderError, ShaderStage, StageResources, TextureDescriptor, TextureUsage,
};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Entry point every MSL shader is looked up by, as emitted by SPIRV-Cross.
pub const MSL_ENTRY_POINT: &str = "main0";

const DEFAULT_DEPTH_FORMAT: Format = Format::D32Float;

struct FrameState {
    current: usize,
    drawable: Option<Native<dyn MTLTexture>>,
}

/// The Metal backend.
///
/// With a [`MetalSwapchain`] the swap slots follow its drawables. Without one the
/// backend renders offscreen only and rotates through `frames_in_flight` slots.
///
/// A render command encoder lives exactly as long as a render pass, so every binding
/// is lost when a pass begins.
pub struct MetalBackend {
    context: MetalContext,
    swapchain: Option<Arc<dyn MetalSwapchain>>,
    slot_count: usize,
    frames: Mutex<FrameState>,
    samplers: Vec<Native<dyn MTLSamplerState>>,
    external: Mutex<HashMap<u64, Native<dyn MTLTexture>>>,
}

// Metal resources and sampler states are thread-safe; drawables are only handed out
// under the frame lock.
unsafe impl Send for MetalBackend {}
unsafe impl Sync for MetalBackend {}

impl MetalBackend {
    /// Creates a backend presenting through `swapchain`.
    pub fn new(context: MetalContext, swapchain: Arc<dyn MetalSwapchain>) -> Result<Self, RenderError> {
        let slot_count = swapchain.drawable_count();
        Self::build(context, Some(swapchain), slot_count)
    }

    /// Creates a backend without presentation, cycling `frames_in_flight` slots.
    pub fn headless(context: MetalContext, frames_in_flight: usize) -> Result<Self, RenderError> {
        Self::build(context, None, frames_in_flight)
    }

    fn build(
        context: MetalContext,
        swapchain: Option<Arc<dyn MetalSwapchain>>,
        slot_count: usize,
    ) -> Result<Self, RenderError> {
        if slot_count == 0 {
            return Err(RenderError::InitializationFailed(
                "at least one swap slot is required".into(),
            ));
        }
        let samplers = SamplerKind::all()
            .into_iter()
            .map(|kind| new_sampler(context.device(), kind))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                RenderError::InitializationFailed("newSamplerStateWithDescriptor returned nil".into())
            })?;
        log::info!(
            "Metal backend created with {} swap slots ({}).",
            slot_count,
            if swapchain.is_some() { "presenting" } else { "headless" }
        );
        Ok(Self {
            context,
            swapchain,
            slot_count,
            frames: Mutex::new(FrameState {
                current: 0,
                drawable: None,
            }),
            samplers,
            external: Mutex::new(HashMap::new()),
        })
    }

    pub fn context(&self) -> &MetalContext {
        &self.context
    }

    /// The format offscreen depth textures must use to be rendered to.
    pub fn depth_format(&self) -> Format {
        DEFAULT_DEPTH_FORMAT
    }

    /// Makes a texture owned by the embedding application available to
    /// [`Backend::import_texture`] under `id`.
    pub fn register_external_texture(&self, id: u64, texture: Native<dyn MTLTexture>) {
        lock(&self.external).insert(id, texture);
    }

    /// Presents the drawable acquired by the latest [`Backend::new_frame`].
    pub fn present(&self) -> Result<(), RenderError> {
        let Some(swapchain) = &self.swapchain else {
            return Err(RenderError::SubmissionFailed(
                "a headless backend has nothing to present".into(),
            ));
        };
        swapchain
            .present()
            .map_err(|e| RenderError::SubmissionFailed(platform_error("presentDrawable", e)))
    }

    /// Copies the pixels of `texture` into `out`, tightly packed.
    ///
    /// Blocks until the copy finished. Meant for tests and screenshots.
    pub fn read_texture(&self, texture: &MetalTexture, out: &mut [u8]) -> Result<(), ResourceError> {
        let layout = CopyLayout::new(texture.descriptor(), out.len())?;
        let staging = self.shared_buffer(out.len())?;
        self.immediate_blit(|encoder| unsafe {
            encoder.copyFromTexture_sourceSlice_sourceLevel_sourceOrigin_sourceSize_toBuffer_destinationOffset_destinationBytesPerRow_destinationBytesPerImage(
                texture.raw(),
                0,
                0,
                MTLOrigin { x: 0, y: 0, z: 0 },
                layout.size,
                staging.raw(),
                0,
                layout.row_bytes,
                layout.image_bytes,
            );
        })?;
        staging.read(0, out)
    }

    fn shared_buffer(&self, size: usize) -> Result<MetalBuffer, ResourceError> {
        let buffer = self
            .context
            .device()
            .newBufferWithLength_options(size, MTLResourceOptions::StorageModeShared)
            .ok_or_else(|| {
                ResourceError::BackendError(format!("newBufferWithLength({size}) returned nil"))
            })?;
        Ok(MetalBuffer::new(buffer, size as u64))
    }

    /// Records blits into a one-off command buffer and waits for it.
    fn immediate_blit(
        &self,
        record: impl FnOnce(&ProtocolObject<dyn MTLBlitCommandEncoder>),
    ) -> Result<(), ResourceError> {
        let commands = self
            .context
            .queue()
            .commandBuffer()
            .ok_or_else(|| ResourceError::BackendError("commandBuffer returned nil".into()))?;
        let encoder = commands
            .blitCommandEncoder()
            .ok_or_else(|| ResourceError::BackendError("blitCommandEncoder returned nil".into()))?;
        record(&*encoder);
        encoder.endEncoding();
        commands.commit();
        commands.waitUntilCompleted();
        match report_failure(&commands) {
            Some(details) => Err(ResourceError::BackendError(details)),
            None => Ok(()),
        }
    }

    fn sampler(&self, kind: SamplerKind) -> &ProtocolObject<dyn MTLSamplerState> {
        &self.samplers[kind.index()]
    }

    fn set_stage_arguments(
        &self,
        encoder: &ProtocolObject<dyn MTLRenderCommandEncoder>,
        stage: ShaderStage,
        arguments: &StageArguments<Native<dyn MTLBuffer>, Native<dyn MTLTexture>>,
    ) {
        let constant_buffer = arguments.constant_buffer.as_deref();
        let units = arguments.textures.iter().enumerate().map(|(unit, entry)| {
            let texture = entry.as_ref().map(|(texture, _)| &**texture);
            let sampler = entry.as_ref().map(|(_, kind)| self.sampler(*kind));
            (unit, texture, sampler)
        });
        unsafe {
            match stage {
                ShaderStage::Vertex => {
                    encoder.setVertexBuffer_offset_atIndex(constant_buffer, 0, CONSTANT_BUFFER_INDEX);
                    for (unit, texture, sampler) in units {
                        encoder.setVertexTexture_atIndex(texture, unit);
                        encoder.setVertexSamplerState_atIndex(sampler, unit);
                    }
                }
                ShaderStage::Pixel => {
                    encoder.setFragmentBuffer_offset_atIndex(constant_buffer, 0, CONSTANT_BUFFER_INDEX);
                    for (unit, texture, sampler) in units {
                        encoder.setFragmentTexture_atIndex(texture, unit);
                        encoder.setFragmentSamplerState_atIndex(sampler, unit);
                    }
                }
            }
        }
    }

    fn screen_depth_format(&self) -> Option<MTLPixelFormat> {
        let depth = self.swapchain.as_ref()?.depth_texture()?;
        Some(depth.pixelFormat())
    }
}

impl Drop for MetalBackend {
    fn drop(&mut self) {
        self.wait_idle();
    }
}

fn new_sampler(
    device: &ProtocolObject<dyn MTLDevice>,
    kind: SamplerKind,
) -> Option<Native<dyn MTLSamplerState>> {
    let descriptor = MTLSamplerDescriptor::new();
    descriptor.setMinFilter(kind.filter.into_mtl());
    descriptor.setMagFilter(kind.filter.into_mtl());
    descriptor.setSAddressMode(kind.wrap.into_mtl());
    descriptor.setTAddressMode(kind.wrap.into_mtl());
    device.newSamplerStateWithDescriptor(&descriptor)
}

fn load_action(clear: bool) -> MTLLoadAction {
    if clear {
        MTLLoadAction::Clear
    } else {
        MTLLoadAction::Load
    }
}

/// The buffer layout of a whole-texture CPU copy.
#[derive(Clone, Copy)]
struct CopyLayout {
    row_bytes: usize,
    image_bytes: usize,
    size: MTLSize,
}

impl CopyLayout {
    fn new(descriptor: &TextureDescriptor, data_len: usize) -> Result<Self, ResourceError> {
        if descriptor.format == Format::D24UnormS8Uint {
            return Err(ResourceError::BackendError(
                "depth-stencil textures cannot be copied from the CPU".into(),
            ));
        }
        let width = descriptor.extent.width as usize;
        let height = descriptor.extent.height as usize;
        let row_bytes = width * descriptor.format.bytes_per_pixel() as usize;
        let image_bytes = row_bytes * height;
        if image_bytes == 0 || data_len != image_bytes {
            return Err(ResourceError::OutOfBounds);
        }
        Ok(Self {
            row_bytes,
            image_bytes,
            size: MTLSize {
                width,
                height,
                depth: 1,
            },
        })
    }
}

fn scissor_rect(rect: &Rect2D) -> MTLScissorRect {
    let x = rect.x.max(0);
    let y = rect.y.max(0);
    MTLScissorRect {
        x: x as usize,
        y: y as usize,
        width: (rect.width as i64 - (x - rect.x) as i64).max(0) as usize,
        height: (rect.height as i64 - (y - rect.y) as i64).max(0) as usize,
    }
}

impl Backend for MetalBackend {
    type Buffer = MetalBuffer;
    type Texture = MetalTexture;
    type Shader = MetalShader;
    type Pipeline = MetalPipeline;
    type CompatibleLayout = MetalRenderPassLayout;
    type Framebuffer = MetalFramebuffer;
    type DescriptorPool = MetalArgumentPool;
    type BindingGroup = MetalBindingGroup;
    type CommandBuffer = MetalCommandBuffer;

    const NAME: &'static str = "metal";
    const RESETS_BINDINGS_PER_PASS: bool = true;

    fn swap_count(&self) -> usize {
        self.slot_count
    }

    fn current_swap_index(&self) -> usize {
        lock(&self.frames).current
    }

    fn new_frame(&self) -> Result<(), RenderError> {
        let mut frames = lock(&self.frames);
        frames.current = (frames.current + 1) % self.slot_count;
        if let Some(swapchain) = &self.swapchain {
            let drawable = swapchain
                .next_drawable()
                .map_err(|e| RenderError::SubmissionFailed(platform_error("nextDrawable", e)))?;
            frames.drawable = Some(drawable);
        }
        Ok(())
    }

    fn submit(&self, command_buffer: &MetalCommandBuffer) -> Result<(), RenderError> {
        command_buffer.commit().map_err(RenderError::SubmissionFailed)
    }

    fn wait_idle(&self) {
        // The queue executes in order, so an empty buffer completes after everything before it.
        match self.context.queue().commandBuffer() {
            Some(commands) => {
                commands.commit();
                commands.waitUntilCompleted();
            }
            None => log::error!("MetalBackend: the queue returned no command buffer to wait on."),
        }
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<MetalBuffer, ResourceError> {
        if descriptor.size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        let size = usize::try_from(descriptor.size).map_err(|_| ResourceError::InvalidSize)?;
        self.shared_buffer(size)
    }

    fn write_buffer(&self, buffer: &MetalBuffer, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        buffer.write(offset, data)
    }

    fn read_buffer(&self, buffer: &MetalBuffer, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        buffer.read(offset, out)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<MetalTexture, ResourceError> {
        if descriptor.extent.width == 0 || descriptor.extent.height == 0 {
            return Err(ResourceError::InvalidSize);
        }
        let pixel_format = mtl_pixel_format(descriptor.format).ok_or_else(|| {
            ResourceError::BackendError(format!("{:?} textures are not supported by Metal", descriptor.format))
        })?;
        let texture_descriptor = unsafe {
            MTLTextureDescriptor::texture2DDescriptorWithPixelFormat_width_height_mipmapped(
                pixel_format,
                descriptor.extent.width as usize,
                descriptor.extent.height as usize,
                false,
            )
        };
        let mut usage = MTLTextureUsage::ShaderRead;
        if descriptor
            .usage
            .intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_STENCIL)
        {
            usage |= MTLTextureUsage::RenderTarget;
        }
        texture_descriptor.setUsage(usage);
        texture_descriptor.setStorageMode(MTLStorageMode::Private);
        let texture = self
            .context
            .device()
            .newTextureWithDescriptor(&texture_descriptor)
            .ok_or_else(|| ResourceError::BackendError("newTextureWithDescriptor returned nil".into()))?;
        Ok(MetalTexture::new(texture, *descriptor))
    }

    fn import_texture(&self, external_id: u64) -> Result<(MetalTexture, TextureDescriptor), ResourceError> {
        let Some(texture) = lock(&self.external).get(&external_id).cloned() else {
            log::warn!("MetalBackend: external texture {} is not registered.", external_id);
            return Err(ResourceError::NotFound);
        };
        let format = from_mtl_pixel_format(texture.pixelFormat()).ok_or_else(|| {
            ResourceError::BackendError(format!("unsupported external format {:?}", texture.pixelFormat()))
        })?;
        let mut usage = TextureUsage::SAMPLED | TextureUsage::EXTERNAL;
        if texture.usage().0 & MTLTextureUsage::RenderTarget.0 != 0 {
            usage.insert(if format.is_depth() {
                TextureUsage::DEPTH_STENCIL
            } else {
                TextureUsage::RENDER_TARGET
            });
        }
        let extent = u32::try_from(texture.width())
            .and_then(|width| u32::try_from(texture.height()).map(|height| Extent2D::new(width, height)))
            .map_err(|_| ResourceError::InvalidSize)?;
        let descriptor = TextureDescriptor {
            extent,
            format,
            usage,
        };
        Ok((MetalTexture::new(texture, descriptor), descriptor))
    }

    fn write_texture(&self, texture: &MetalTexture, data: &[u8]) -> Result<(), ResourceError> {
        let layout = CopyLayout::new(texture.descriptor(), data.len())?;
        let staging = self.shared_buffer(data.len())?;
        staging.write(0, data)?;
        self.immediate_blit(|encoder| unsafe {
            encoder.copyFromBuffer_sourceOffset_sourceBytesPerRow_sourceBytesPerImage_sourceSize_toTexture_destinationSlice_destinationLevel_destinationOrigin(
                staging.raw(),
                0,
                layout.row_bytes,
                layout.image_bytes,
                layout.size,
                texture.raw(),
                0,
                0,
                MTLOrigin { x: 0, y: 0, z: 0 },
            );
        })
    }

    fn create_shader(&self, bytecode: &[u8]) -> Result<MetalShader, ShaderError> {
        let source = std::str::from_utf8(bytecode).map_err(|e| ShaderError::CreationFailed {
            details: format!("MSL source is not UTF-8: {e}"),
        })?;
        let library = self
            .context
            .device()
            .newLibraryWithSource_options_error(&NSString::from_str(source), None)
            .map_err(|e| ShaderError::CreationFailed {
                details: format!("newLibraryWithSource: {}", e.localizedDescription()),
            })?;
        let function = library
            .newFunctionWithName(&NSString::from_str(MSL_ENTRY_POINT))
            .ok_or_else(|| ShaderError::CreationFailed {
                details: format!("the library has no `{MSL_ENTRY_POINT}` function"),
            })?;
        Ok(MetalShader { library, function })
    }

    fn screen_target(&self) -> ScreenTarget {
        match &self.swapchain {
            Some(swapchain) => ScreenTarget {
                extent: swapchain.extent(),
                format: from_mtl_pixel_format(swapchain.pixel_format()).unwrap_or_else(|| {
                    log::warn!("MetalBackend: unknown drawable format, assuming BGRA8.");
                    Format::B8G8R8A8Unorm
                }),
                has_depth: swapchain.depth_texture().is_some(),
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
    ) -> Result<MetalRenderPassLayout, ResourceError> {
        let color_format = mtl_pixel_format(key.color_format).ok_or_else(|| {
            ResourceError::AttachmentMismatch(format!("{:?} cannot be rendered to", key.color_format))
        })?;
        let depth_format = if !key.has_depth {
            None
        } else if key.is_present_mode {
            Some(self.screen_depth_format().ok_or_else(|| {
                ResourceError::AttachmentMismatch("swap chain has no depth texture".into())
            })?)
        } else {
            mtl_pixel_format(DEFAULT_DEPTH_FORMAT)
        };
        Ok(MetalRenderPassLayout {
            color_format,
            depth_format,
        })
    }

    fn create_framebuffer(
        &self,
        layout: &MetalRenderPassLayout,
        attachments: &FramebufferAttachments<'_, Self>,
    ) -> Result<MetalFramebuffer, ResourceError> {
        match attachments {
            FramebufferAttachments::Screen { .. } => {
                let swapchain = self.swapchain.as_ref().ok_or_else(|| {
                    ResourceError::AttachmentMismatch("a headless backend has no screen".into())
                })?;
                let depth = match (layout.depth_format, swapchain.depth_texture()) {
                    (Some(_), Some(depth)) => Some(depth),
                    (None, _) => None,
                    (Some(_), None) => {
                        return Err(ResourceError::AttachmentMismatch(
                            "swap chain has no depth texture".into(),
                        ))
                    }
                };
                Ok(MetalFramebuffer::Screen { depth })
            }
            FramebufferAttachments::Offscreen { colors, depth, .. } => {
                let [color] = colors.as_slice() else {
                    return Err(ResourceError::AttachmentMismatch(format!(
                        "the Metal backend renders to exactly one color texture, got {}",
                        colors.len()
                    )));
                };
                let depth = match (depth, layout.depth_format) {
                    (Some(depth), Some(expected)) => {
                        if depth.pixel_format() != expected {
                            return Err(ResourceError::AttachmentMismatch(format!(
                                "depth texture is {:?}, render pass expects {:?}",
                                depth.pixel_format(),
                                expected
                            )));
                        }
                        Some(depth.retained())
                    }
                    (None, None) => None,
                    _ => {
                        return Err(ResourceError::AttachmentMismatch(
                            "depth attachment does not match the render pass".into(),
                        ))
                    }
                };
                Ok(MetalFramebuffer::Offscreen {
                    color: color.retained(),
                    depth,
                })
            }
        }
    }

    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor<'_, Self>,
    ) -> Result<MetalPipeline, PipelineError> {
        let label = descriptor.label.map(str::to_string);
        let compilation_failed = |details: String| PipelineError::CompilationFailed {
            label: label.clone(),
            details,
        };

        let vertex_descriptor = MTLVertexDescriptor::new();
        for (index, attribute) in descriptor.vertex_attributes.iter().enumerate() {
            let format = mtl_vertex_format(attribute.format).ok_or_else(|| {
                PipelineError::UnsupportedVertexFormat {
                    index,
                    semantic: attribute.semantic.clone(),
                    format: attribute.format,
                }
            })?;
            unsafe {
                let element = vertex_descriptor
                    .attributes()
                    .objectAtIndexedSubscript(attribute.location as usize);
                element.setFormat(format);
                element.setOffset(attribute.offset as usize);
                element.setBufferIndex(VERTEX_BUFFER_INDEX);
            }
        }
        unsafe {
            let layout = vertex_descriptor
                .layouts()
                .objectAtIndexedSubscript(VERTEX_BUFFER_INDEX);
            layout.setStride(descriptor.vertex_stride as usize);
            layout.setStepFunction(MTLVertexStepFunction::PerVertex);
            layout.setStepRate(1);
        }

        let layout = descriptor.layout;
        let pipeline = MTLRenderPipelineDescriptor::new();
        if let Some(label) = descriptor.label {
            pipeline.setLabel(Some(&NSString::from_str(label)));
        }
        pipeline.setVertexFunction(Some(descriptor.vertex_shader.function()));
        pipeline.setFragmentFunction(Some(descriptor.pixel_shader.function()));
        pipeline.setVertexDescriptor(Some(&vertex_descriptor));
        pipeline.setInputPrimitiveTopology(descriptor.topology.into_mtl());
        let color = unsafe { pipeline.colorAttachments().objectAtIndexedSubscript(0) };
        color.setPixelFormat(layout.color_format);
        if let Some(blend) = descriptor.blend {
            color.setBlendingEnabled(true);
            color.setSourceRGBBlendFactor(blend.src.into_mtl());
            color.setDestinationRGBBlendFactor(blend.dst.into_mtl());
            color.setRgbBlendOperation(blend.op_rgb.into_mtl());
            color.setSourceAlphaBlendFactor(blend.src_alpha.into_mtl());
            color.setDestinationAlphaBlendFactor(blend.dst_alpha.into_mtl());
            color.setAlphaBlendOperation(blend.op_alpha.into_mtl());
        }
        if let Some(depth) = layout.depth_format {
            pipeline.setDepthAttachmentPixelFormat(depth);
            if has_stencil(depth) {
                pipeline.setStencilAttachmentPixelFormat(depth);
            }
        }
        let state = self
            .context
            .device()
            .newRenderPipelineStateWithDescriptor_error(&pipeline)
            .map_err(|e| compilation_failed(format!("newRenderPipelineState: {}", e.localizedDescription())))?;

        let depth_testing = layout.depth_format.is_some() && descriptor.depth_test;
        let depth_stencil = MTLDepthStencilDescriptor::new();
        depth_stencil.setDepthCompareFunction(if depth_testing {
            descriptor.depth_func.into_mtl()
        } else {
            MTLCompareFunction::Always
        });
        depth_stencil.setDepthWriteEnabled(depth_testing && descriptor.depth_write);
        let depth_stencil = self
            .context
            .device()
            .newDepthStencilStateWithDescriptor(&depth_stencil)
            .ok_or_else(|| compilation_failed("newDepthStencilState returned nil".into()))?;

        Ok(MetalPipeline {
            state,
            depth_stencil,
            cull_mode: descriptor.culling.into_mtl(),
            primitive_type: descriptor.topology.into_mtl(),
        })
    }

    fn create_descriptor_pool(&self, _capacity: usize) -> Result<MetalArgumentPool, ResourceError> {
        Ok(MetalArgumentPool::default())
    }

    fn allocate_binding_group(
        &self,
        pool: &mut MetalArgumentPool,
        _pipeline: &MetalPipeline,
    ) -> Result<MetalBindingGroup, ResourceError> {
        pool.allocated += 1;
        Ok(MetalBindingGroup::default())
    }

    fn create_command_buffer(&self) -> Result<MetalCommandBuffer, ResourceError> {
        Ok(MetalCommandBuffer::new(self.context.retained_queue()))
    }

    fn begin_command_buffer(&self, command_buffer: &mut MetalCommandBuffer) {
        command_buffer.begin();
    }

    fn end_command_buffer(&self, command_buffer: &mut MetalCommandBuffer) {
        command_buffer.end();
    }

    fn write_binding_group(
        &self,
        group: &mut MetalBindingGroup,
        stage: ShaderStage,
        resources: &StageResources<'_, Self>,
    ) {
        let textures = resources.textures.iter().map(|slot| {
            slot.as_ref()
                .map(|slot| (slot.texture.retained(), SamplerKind::new(slot.wrap, slot.filter)))
        });
        group.table.write(
            stage,
            resources.constant_buffer.map(|(buffer, _)| buffer.retained()),
            textures,
        );
    }

    fn cmd_bind_vertex_buffer(
        &self,
        command_buffer: &mut MetalCommandBuffer,
        buffer: &MetalBuffer,
        _stride: u32,
        offset: u64,
    ) {
        let Some(encoder) = command_buffer.encoder() else { return };
        unsafe {
            encoder.setVertexBuffer_offset_atIndex(Some(buffer.raw()), offset as usize, VERTEX_BUFFER_INDEX)
        };
    }

    fn cmd_bind_index_buffer(
        &self,
        command_buffer: &mut MetalCommandBuffer,
        buffer: &MetalBuffer,
        format: IndexFormat,
    ) {
        command_buffer.index_buffer = Some((buffer.retained(), format.into_mtl()));
    }

    fn cmd_bind_pipeline(&self, command_buffer: &mut MetalCommandBuffer, pipeline: &MetalPipeline) {
        command_buffer.primitive_type = pipeline.primitive_type;
        let Some(encoder) = command_buffer.encoder() else { return };
        encoder.setRenderPipelineState(&pipeline.state);
        encoder.setDepthStencilState(Some(&pipeline.depth_stencil));
        encoder.setCullMode(pipeline.cull_mode);
        encoder.setFrontFacingWinding(MTLWinding::CounterClockwise);
    }

    fn cmd_bind_binding_group(
        &self,
        command_buffer: &mut MetalCommandBuffer,
        _pipeline: &MetalPipeline,
        group: &MetalBindingGroup,
        stages: Range<usize>,
    ) {
        let Some(encoder) = command_buffer.encoder() else { return };
        for (stage, arguments) in group.table.bound(stages) {
            self.set_stage_arguments(encoder, stage, arguments);
        }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: &mut MetalCommandBuffer,
        info: &RenderPassBeginInfo<'_, Self>,
    ) {
        if !command_buffer.is_recording() {
            log::warn!("MetalBackend: render pass begun outside begin/end, ignored.");
            return;
        }
        let (color_texture, depth_texture) = match info.framebuffer {
            MetalFramebuffer::Screen { depth } => (lock(&self.frames).drawable.clone(), depth.clone()),
            MetalFramebuffer::Offscreen { color, depth } => (Some(color.clone()), depth.clone()),
        };
        let Some(color_texture) = color_texture else {
            log::warn!("MetalBackend: no drawable acquired for the screen pass, ignored.");
            return;
        };

        let pass = MTLRenderPassDescriptor::new();
        let color = unsafe { pass.colorAttachments().objectAtIndexedSubscript(0) };
        color.setTexture(Some(&color_texture));
        color.setLoadAction(load_action(info.clear_color.is_some()));
        color.setStoreAction(MTLStoreAction::Store);
        if let Some(clear) = info.clear_color {
            color.setClearColor(clear_color(info.key.color_format, clear));
        }
        if let Some(depth_texture) = &depth_texture {
            let depth = pass.depthAttachment();
            depth.setTexture(Some(depth_texture));
            depth.setLoadAction(load_action(info.clear_depth.is_some()));
            depth.setStoreAction(MTLStoreAction::Store);
            depth.setClearDepth(f64::from(info.clear_depth.unwrap_or(1.0)));
            if has_stencil(depth_texture.pixelFormat()) {
                let stencil = pass.stencilAttachment();
                stencil.setTexture(Some(depth_texture));
                stencil.setLoadAction(load_action(info.clear_depth.is_some()));
                stencil.setStoreAction(MTLStoreAction::Store);
                stencil.setClearStencil(0);
            }
        }

        let encoder = command_buffer
            .raw()
            .and_then(|commands| commands.renderCommandEncoderWithDescriptor(&pass));
        if encoder.is_none() {
            log::error!("MetalBackend: renderCommandEncoderWithDescriptor returned nil.");
        }
        command_buffer.set_encoder(encoder);
    }

    fn cmd_end_render_pass(&self, command_buffer: &mut MetalCommandBuffer) {
        command_buffer.end_encoding();
    }

    fn cmd_set_viewport(&self, command_buffer: &mut MetalCommandBuffer, viewport: &Viewport) {
        let Some(encoder) = command_buffer.encoder() else { return };
        encoder.setViewport(MTLViewport {
            originX: f64::from(viewport.x),
            originY: f64::from(viewport.y),
            width: f64::from(viewport.width),
            height: f64::from(viewport.height),
            znear: f64::from(viewport.min_depth),
            zfar: f64::from(viewport.max_depth),
        });
    }

    fn cmd_set_scissor(&self, command_buffer: &mut MetalCommandBuffer, rect: &Rect2D) {
        let Some(encoder) = command_buffer.encoder() else { return };
        encoder.setScissorRect(scissor_rect(rect));
    }

    fn cmd_draw_indexed(&self, command_buffer: &mut MetalCommandBuffer, index_count: u32) {
        let Some((index_buffer, index_type)) = &command_buffer.index_buffer else {
            log::warn!("MetalBackend: draw without an index buffer, ignored.");
            return;
        };
        let Some(encoder) = command_buffer.encoder() else { return };
        unsafe {
            encoder.drawIndexedPrimitives_indexCount_indexType_indexBuffer_indexBufferOffset(
                command_buffer.primitive_type,
                index_count as usize,
                *index_type,
                index_buffer,
                0,
            )
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(format: Format, width: u32, height: u32) -> TextureDescriptor {
        TextureDescriptor {
            extent: Extent2D::new(width, height),
            format,
            usage: TextureUsage::SAMPLED,
        }
    }

    #[test]
    fn copies_cover_the_whole_texture_tightly_packed() {
        let layout = CopyLayout::new(&descriptor(Format::R8G8B8A8Unorm, 4, 2), 32).expect("layout");
        assert_eq!((layout.row_bytes, layout.image_bytes), (16, 32));
        assert_eq!((layout.size.width, layout.size.height, layout.size.depth), (4, 2, 1));
    }

    #[test]
    fn copies_reject_mismatched_lengths_and_packed_depth() {
        assert!(matches!(
            CopyLayout::new(&descriptor(Format::R8G8B8A8Unorm, 4, 2), 31),
            Err(ResourceError::OutOfBounds)
        ));
        assert!(matches!(
            CopyLayout::new(&descriptor(Format::D24UnormS8Uint, 4, 2), 32),
            Err(ResourceError::BackendError(_))
        ));
    }

    #[test]
    fn scissors_are_clipped_to_the_top_left_corner() {
        let clipped = scissor_rect(&Rect2D {
            x: -4,
            y: 2,
            width: 10,
            height: 3,
        });
        assert_eq!((clipped.x, clipped.y, clipped.width, clipped.height), (0, 2, 6, 3));
    }
}
