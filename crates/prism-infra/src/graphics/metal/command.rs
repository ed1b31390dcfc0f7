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

use super::resources::Native;
use objc2::runtime::ProtocolObject;
use objc2_metal::{
    MTLBuffer, MTLCommandBuffer, MTLCommandBufferStatus, MTLCommandEncoder, MTLCommandQueue,
    MTLIndexType, MTLPrimitiveType, MTLRenderCommandEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// Logs the error a finished command buffer carries, if any.
pub(crate) fn report_failure(commands: &ProtocolObject<dyn MTLCommandBuffer>) -> Option<String> {
    if commands.status() != MTLCommandBufferStatus::Error {
        return None;
    }
    let details = commands
        .error()
        .map(|error| error.localizedDescription().to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    log::error!("Metal command buffer failed: {details}");
    Some(details)
}

/// The commands recorded for one swap slot.
///
/// A fresh `MTLCommandBuffer` is taken from the queue every time recording begins,
/// after the one committed last from this slot has completed. Render command encoders
/// live exactly as long as a render pass.
pub struct MetalCommandBuffer {
    queue: Native<dyn MTLCommandQueue>,
    commands: Option<Native<dyn MTLCommandBuffer>>,
    committed: AtomicBool,
    encoder: Option<Native<dyn MTLRenderCommandEncoder>>,
    pub(crate) index_buffer: Option<(Native<dyn MTLBuffer>, MTLIndexType)>,
    pub(crate) primitive_type: MTLPrimitiveType,
    is_recording: bool,
}

// Only the thread owning the command list records into it.
unsafe impl Send for MetalCommandBuffer {}

impl MetalCommandBuffer {
    pub(crate) fn new(queue: Native<dyn MTLCommandQueue>) -> Self {
        Self {
            queue,
            commands: None,
            committed: AtomicBool::new(false),
            encoder: None,
            index_buffer: None,
            primitive_type: MTLPrimitiveType::Triangle,
            is_recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    /// The Metal command buffer of the current recording.
    pub fn raw(&self) -> Option<&ProtocolObject<dyn MTLCommandBuffer>> {
        self.commands.as_deref()
    }

    /// Blocks until the last commit of this slot has completed.
    pub(crate) fn wait_completion(&self) {
        if !self.committed.load(Ordering::Acquire) {
            return;
        }
        if let Some(commands) = &self.commands {
            commands.waitUntilCompleted();
            report_failure(commands);
        }
    }

    pub(crate) fn begin(&mut self) {
        self.wait_completion();
        self.end_encoding();
        self.index_buffer = None;
        self.primitive_type = MTLPrimitiveType::Triangle;
        self.commands = self.queue.commandBuffer();
        self.committed.store(false, Ordering::Release);
        self.is_recording = self.commands.is_some();
        if !self.is_recording {
            log::error!("MetalCommandBuffer: the queue returned no command buffer.");
        }
    }

    pub(crate) fn end(&mut self) {
        if self.encoder.is_some() {
            log::warn!("MetalCommandBuffer: ended inside a render pass, closing the encoder.");
            self.end_encoding();
        }
        self.is_recording = false;
    }

    /// Commits the recorded commands. A recording is committed at most once.
    pub(crate) fn commit(&self) -> Result<(), String> {
        if self.is_recording {
            return Err("command buffer is still recording".into());
        }
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| "command buffer was never recorded".to_string())?;
        if self.committed.swap(true, Ordering::AcqRel) {
            return Err("command buffer was already submitted".into());
        }
        commands.commit();
        Ok(())
    }

    /// Opens a render command encoder. Any encoder still open is closed first.
    pub(crate) fn set_encoder(&mut self, encoder: Option<Native<dyn MTLRenderCommandEncoder>>) {
        self.end_encoding();
        self.encoder = encoder;
    }

    pub(crate) fn end_encoding(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            encoder.endEncoding();
        }
    }

    /// The open render command encoder, if recording inside a render pass.
    pub(crate) fn encoder(&self) -> Option<&ProtocolObject<dyn MTLRenderCommandEncoder>> {
        if !self.is_recording {
            log::warn!("MetalCommandBuffer: command recorded outside begin/end, ignored.");
            return None;
        }
        let encoder = self.encoder.as_deref();
        if encoder.is_none() {
            log::warn!("MetalCommandBuffer: command recorded outside a render pass, ignored.");
        }
        encoder
    }
}

impl Drop for MetalCommandBuffer {
    fn drop(&mut self) {
        self.end_encoding();
        self.wait_completion();
    }
}

impl std::fmt::Debug for MetalCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalCommandBuffer")
            .field("is_recording", &self.is_recording)
            .field("committed", &self.committed.load(Ordering::Relaxed))
            .field("in_render_pass", &self.encoder.is_some())
            .finish()
    }
}
