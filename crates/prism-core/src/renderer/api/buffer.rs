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

//! Defines GPU buffer resources and the lock guard used to update them.

use crate::prism_bitflags;
use crate::renderer::api::enums::ConstantBufferType;
use crate::renderer::error::ResourceError;
use crate::renderer::traits::Backend;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

prism_bitflags! {
    /// A set of flags describing the allowed usages of a [`Buffer`].
    ///
    /// Backends use them to pick the memory type and the usage bits of the native
    /// allocation.
    pub struct BufferUsage: u32 {
        /// The buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 0;
        /// The buffer can be bound as an index buffer.
        const INDEX = 1 << 1;
        /// The buffer can be bound as a constant (uniform) buffer.
        const CONSTANT = 1 << 2;
        /// The buffer is CPU visible and can be written through a lock.
        const MAP_WRITE = 1 << 3;
    }
}

/// A descriptor used to create a [`Buffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// An optional debug label for the buffer.
    pub label: Option<String>,
    /// The total size of the buffer in bytes.
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
}

/// A GPU buffer owning its backend allocation.
///
/// The native handle is released when the last `Arc` to the buffer drops, which
/// includes the bound state of any command list still holding it.
pub struct Buffer<B: Backend> {
    backend: Arc<B>,
    raw: B::Buffer,
    size: u64,
    usage: BufferUsage,
    locked: AtomicBool,
}

impl<B: Backend> Buffer<B> {
    pub(crate) fn new(backend: Arc<B>, descriptor: &BufferDescriptor) -> Result<Self, ResourceError> {
        if descriptor.size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        let raw = backend.create_buffer(descriptor)?;
        log::debug!(
            "[{}] created buffer {:?} ({} bytes, {:?})",
            B::NAME,
            descriptor.label,
            descriptor.size,
            descriptor.usage
        );
        Ok(Self {
            backend,
            raw,
            size: descriptor.size,
            usage: descriptor.usage,
            locked: AtomicBool::new(false),
        })
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// The native buffer.
    pub fn raw(&self) -> &B::Buffer {
        &self.raw
    }

    /// Returns `true` while a [`BufferLock`] is alive.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Locks the whole buffer for CPU access.
    pub fn lock(&self) -> Result<BufferLock<'_, B>, ResourceError> {
        self.lock_range(0, self.size)
    }

    /// Locks `size` bytes starting at `offset`.
    ///
    /// The guard exposes the current contents of the range; edits are flushed to the
    /// backend by [`BufferLock::unlock`] or when the guard drops. Only one lock may be
    /// held at a time.
    pub fn lock_range(&self, offset: u64, size: u64) -> Result<BufferLock<'_, B>, ResourceError> {
        if size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        self.check_range(offset, size)?;
        if self.locked.swap(true, Ordering::AcqRel) {
            return Err(ResourceError::AlreadyLocked);
        }

        let len = usize::try_from(size).map_err(|_| ResourceError::OutOfBounds);
        let mut data = match len {
            Ok(len) => vec![0u8; len],
            Err(e) => {
                self.locked.store(false, Ordering::Release);
                return Err(e);
            }
        };
        if let Err(e) = self.backend.read_buffer(&self.raw, offset, &mut data) {
            self.locked.store(false, Ordering::Release);
            return Err(e);
        }

        Ok(BufferLock {
            buffer: self,
            offset,
            data,
            flushed: false,
        })
    }

    /// Copies `data` into the buffer at `offset` without taking a lock guard.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        self.check_range(offset, data.len() as u64)?;
        if self.is_locked() {
            return Err(ResourceError::AlreadyLocked);
        }
        self.backend.write_buffer(&self.raw, offset, data)
    }

    /// Writes one plain-old-data value at `offset`.
    pub fn write_pod<T: bytemuck::Pod>(&self, offset: u64, value: &T) -> Result<(), ResourceError> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    /// Writes a slice of plain-old-data values starting at `offset`.
    pub fn write_slice<T: bytemuck::Pod>(
        &self,
        offset: u64,
        values: &[T],
    ) -> Result<(), ResourceError> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    fn check_range(&self, offset: u64, size: u64) -> Result<(), ResourceError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ResourceError::OutOfBounds),
        }
    }
}

impl<B: Backend> Drop for Buffer<B> {
    fn drop(&mut self) {
        log::debug!("[{}] releasing buffer ({} bytes)", B::NAME, self.size);
    }
}

/// Exclusive CPU access to a range of a [`Buffer`].
pub struct BufferLock<'a, B: Backend> {
    buffer: &'a Buffer<B>,
    offset: u64,
    data: Vec<u8>,
    flushed: bool,
}

impl<B: Backend> BufferLock<'_, B> {
    /// Byte offset of the locked range within the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Flushes the edited range to the backend and releases the lock.
    pub fn unlock(mut self) -> Result<(), ResourceError> {
        self.flush()
    }

    fn flush(&mut self) -> Result<(), ResourceError> {
        self.flushed = true;
        self.buffer
            .backend
            .write_buffer(&self.buffer.raw, self.offset, &self.data)
    }
}

impl<B: Backend> Deref for BufferLock<'_, B> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl<B: Backend> DerefMut for BufferLock<'_, B> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl<B: Backend> Drop for BufferLock<'_, B> {
    fn drop(&mut self) {
        if !self.flushed {
            if let Err(e) = self.flush() {
                log::error!("[{}] failed to flush buffer lock on drop: {}", B::NAME, e);
            }
        }
        self.buffer.locked.store(false, Ordering::Release);
    }
}

/// A buffer holding vertex data.
pub struct VertexBuffer<B: Backend>(Buffer<B>);

impl<B: Backend> VertexBuffer<B> {
    pub(crate) fn new(backend: Arc<B>, size: u64) -> Result<Self, ResourceError> {
        let descriptor = BufferDescriptor {
            label: Some("vertex buffer".to_owned()),
            size,
            usage: BufferUsage::VERTEX | BufferUsage::MAP_WRITE,
        };
        Buffer::new(backend, &descriptor).map(Self)
    }
}

impl<B: Backend> Deref for VertexBuffer<B> {
    type Target = Buffer<B>;

    fn deref(&self) -> &Buffer<B> {
        &self.0
    }
}

/// A buffer holding `count` indices of `stride` bytes each.
///
/// Any non-zero stride is accepted here; drawing requires a stride of 2 or 4.
pub struct IndexBuffer<B: Backend> {
    buffer: Buffer<B>,
    stride: u32,
    count: u32,
}

impl<B: Backend> IndexBuffer<B> {
    pub(crate) fn new(backend: Arc<B>, stride: u32, count: u32) -> Result<Self, ResourceError> {
        if stride == 0 || count == 0 {
            return Err(ResourceError::InvalidSize);
        }
        let descriptor = BufferDescriptor {
            label: Some("index buffer".to_owned()),
            size: u64::from(stride) * u64::from(count),
            usage: BufferUsage::INDEX | BufferUsage::MAP_WRITE,
        };
        let buffer = Buffer::new(backend, &descriptor)?;
        Ok(Self {
            buffer,
            stride,
            count,
        })
    }

    /// Size of one index in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Number of indices the buffer holds.
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl<B: Backend> Deref for IndexBuffer<B> {
    type Target = Buffer<B>;

    fn deref(&self) -> &Buffer<B> {
        &self.buffer
    }
}

/// A buffer read by shaders as constants.
pub struct ConstantBuffer<B: Backend> {
    buffer: Buffer<B>,
    ty: ConstantBufferType,
}

impl<B: Backend> ConstantBuffer<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        size: u64,
        ty: ConstantBufferType,
    ) -> Result<Self, ResourceError> {
        let descriptor = BufferDescriptor {
            label: Some(format!("constant buffer ({ty:?})")),
            size,
            usage: BufferUsage::CONSTANT | BufferUsage::MAP_WRITE,
        };
        let buffer = Buffer::new(backend, &descriptor)?;
        Ok(Self { buffer, ty })
    }

    /// Lifetime hint the buffer was created with.
    pub fn buffer_type(&self) -> ConstantBufferType {
        self.ty
    }
}

impl<B: Backend> Deref for ConstantBuffer<B> {
    type Target = Buffer<B>;

    fn deref(&self) -> &Buffer<B> {
        &self.buffer
    }
}
