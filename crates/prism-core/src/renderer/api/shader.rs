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

//! Opaque compiled shader modules.

use crate::renderer::error::ShaderError;
use crate::renderer::traits::Backend;

/// A shader module created from compiled bytecode (SPIR-V, DXIL or a Metal library,
/// depending on the backend). The bytecode is never inspected.
pub struct Shader<B: Backend> {
    raw: B::Shader,
    size: usize,
}

impl<B: Backend> Shader<B> {
    pub(crate) fn new(backend: &B, bytecode: &[u8]) -> Result<Self, ShaderError> {
        if bytecode.is_empty() {
            return Err(ShaderError::EmptyBytecode);
        }
        let raw = backend.create_shader(bytecode)?;
        log::debug!("[{}] created shader ({} bytes)", B::NAME, bytecode.len());
        Ok(Self {
            raw,
            size: bytecode.len(),
        })
    }

    /// Length of the bytecode the shader was created from.
    pub fn bytecode_size(&self) -> usize {
        self.size
    }

    /// The native shader module.
    pub fn raw(&self) -> &B::Shader {
        &self.raw
    }
}
