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

use super::arguments::ArgumentTable;
use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{
    MTLBuffer, MTLCullMode, MTLDepthStencilState, MTLFunction, MTLLibrary, MTLPixelFormat,
    MTLPrimitiveType, MTLRenderPipelineState, MTLTexture,
};
use prism_core::renderer::{ResourceError, TextureDescriptor};

/// A retained Metal object behind one of its protocols.
pub type Native<P> = Retained<ProtocolObject<P>>;

/// A `StorageModeShared` buffer, read and written through its contents pointer.
pub struct MetalBuffer {
    buffer: Native<dyn MTLBuffer>,
    size: u64,
}

// Buffer contents are only touched through bounds-checked copies.
unsafe impl Send for MetalBuffer {}
unsafe impl Sync for MetalBuffer {}

impl MetalBuffer {
    pub(crate) fn new(buffer: Native<dyn MTLBuffer>, size: u64) -> Self {
        Self { buffer, size }
    }

    pub fn raw(&self) -> &ProtocolObject<dyn MTLBuffer> {
        &self.buffer
    }

    pub(crate) fn retained(&self) -> Native<dyn MTLBuffer> {
        self.buffer.clone()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn range(&self, offset: u64, len: usize) -> Result<usize, ResourceError> {
        let end = offset.checked_add(len as u64).ok_or(ResourceError::OutOfBounds)?;
        if end > self.size {
            return Err(ResourceError::OutOfBounds);
        }
        usize::try_from(offset).map_err(|_| ResourceError::OutOfBounds)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let offset = self.range(offset, data.len())?;
        unsafe {
            let dst = self.buffer.contents().as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    pub fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), ResourceError> {
        let offset = self.range(offset, out.len())?;
        unsafe {
            let src = self.buffer.contents().as_ptr().cast::<u8>().add(offset);
            std::ptr::copy_nonoverlapping(src, out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}

pub struct MetalTexture {
    texture: Native<dyn MTLTexture>,
    descriptor: TextureDescriptor,
}

unsafe impl Send for MetalTexture {}
unsafe impl Sync for MetalTexture {}

impl MetalTexture {
    pub(crate) fn new(texture: Native<dyn MTLTexture>, descriptor: TextureDescriptor) -> Self {
        Self { texture, descriptor }
    }

    pub fn raw(&self) -> &ProtocolObject<dyn MTLTexture> {
        &self.texture
    }

    pub fn retained(&self) -> Native<dyn MTLTexture> {
        self.texture.clone()
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn pixel_format(&self) -> MTLPixelFormat {
        self.texture.pixelFormat()
    }
}

/// A compiled MSL library and the entry point pipelines use.
pub struct MetalShader {
    pub(crate) library: Native<dyn MTLLibrary>,
    pub(crate) function: Native<dyn MTLFunction>,
}

unsafe impl Send for MetalShader {}
unsafe impl Sync for MetalShader {}

impl MetalShader {
    pub fn library(&self) -> &ProtocolObject<dyn MTLLibrary> {
        &self.library
    }

    pub fn function(&self) -> &ProtocolObject<dyn MTLFunction> {
        &self.function
    }
}

/// Attachment formats render pipelines are created against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetalRenderPassLayout {
    pub color_format: MTLPixelFormat,
    pub depth_format: Option<MTLPixelFormat>,
}

/// The textures a render command encoder draws into.
pub enum MetalFramebuffer {
    /// The drawable acquired by the latest frame, resolved when the pass begins.
    Screen {
        depth: Option<Native<dyn MTLTexture>>,
    },
    Offscreen {
        color: Native<dyn MTLTexture>,
        depth: Option<Native<dyn MTLTexture>>,
    },
}

unsafe impl Send for MetalFramebuffer {}
unsafe impl Sync for MetalFramebuffer {}

/// A render pipeline state with the fixed-function state Metal sets on the encoder.
pub struct MetalPipeline {
    pub(crate) state: Native<dyn MTLRenderPipelineState>,
    pub(crate) depth_stencil: Native<dyn MTLDepthStencilState>,
    pub(crate) cull_mode: MTLCullMode,
    pub(crate) primitive_type: MTLPrimitiveType,
}

unsafe impl Send for MetalPipeline {}
unsafe impl Sync for MetalPipeline {}

/// Metal binds arguments directly on the encoder; there is nothing to allocate from.
#[derive(Debug, Default)]
pub struct MetalArgumentPool {
    pub(crate) allocated: usize,
}

/// What a draw sets on the encoder for each stage.
#[derive(Default)]
pub struct MetalBindingGroup {
    pub(crate) table: ArgumentTable<Native<dyn MTLBuffer>, Native<dyn MTLTexture>>,
}

unsafe impl Send for MetalBindingGroup {}

impl MetalBindingGroup {
    pub fn table(&self) -> &ArgumentTable<Native<dyn MTLBuffer>, Native<dyn MTLTexture>> {
        &self.table
    }
}

pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
